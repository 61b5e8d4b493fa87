use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use design_landscape::config::LandscapeConfig;
use design_landscape::orchestrator::{
    self, FeatureSource, ProjectOptions, ScaleOptions, VocabularySource,
};
use design_landscape::postprocess::Axis;
use design_landscape::prune::RENDER_FIELDS;
use design_landscape::{collector, render};

/// Design Landscape - data preparation stages for the landscape point clouds
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a JSON config file (overrides LANDSCAPE_CONFIG environment variable)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    stage: Stage,
}

#[derive(Subcommand, Debug)]
enum Stage {
    /// Match taxonomy keywords in every sentence and score it
    Score {
        #[arg(short, long, default_value = "data/sentences.json")]
        input: PathBuf,
        #[arg(short, long, default_value = "data/keywords_precomputed.json")]
        taxonomy: PathBuf,
        #[arg(short, long, default_value = "data/sentences_scored.json")]
        output: PathBuf,
        /// Keep only sentences with at least one keyword match
        #[arg(long)]
        only_matched: bool,
    },
    /// Build feature vectors and project them to normalized 2D/3D coordinates
    Project {
        #[arg(short, long, default_value = "data/nodes.json")]
        input: PathBuf,
        /// Defaults to rewriting the input file
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = FeatureSource::Counts)]
        features: FeatureSource,
        #[arg(long, value_enum, default_value_t = VocabularySource::Design)]
        vocabulary: VocabularySource,
        /// Precomputed embeddings (JSON array of arrays), one row per record
        #[arg(long)]
        embeddings: Option<PathBuf>,
        /// Standardize feature columns before projecting
        #[arg(long)]
        standardize: bool,
        /// Number of output dimensions (2 or 3), overrides the config
        #[arg(long)]
        components: Option<usize>,
        /// Replace z with embedded_speculative * 5 (3D only)
        #[arg(long)]
        z_from_score: bool,
    },
    /// Map normalized coordinates onto the landscape canvas
    Scale {
        #[arg(short, long, default_value = "data/nodes.json")]
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Merged landscape file whose metadata.svg defines the canvas
        #[arg(long)]
        canvas_from: Option<PathBuf>,
        /// Read x/y(/z) instead of umap_x/umap_y
        #[arg(long)]
        xyz: bool,
        /// Rescale raw values to [0, 1] before mapping
        #[arg(long)]
        renormalize: bool,
        /// Jitter amount in canvas units (offsets fall in [-J/2, J/2])
        #[arg(long)]
        jitter: Option<f64>,
        /// Seed that makes the jitter reproducible
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Generate the keyword -> RGB color table
    Colors {
        #[arg(short, long, default_value = "data/keywords_precomputed.json")]
        taxonomy: PathBuf,
        #[arg(short, long, default_value = "data/colorsnew.json")]
        output: PathBuf,
    },
    /// Color every record by its dominant keyword
    Paint {
        #[arg(short, long, default_value = "data/umap_3d_data.json")]
        input: PathBuf,
        #[arg(short, long, default_value = "data/keywords_precomputed.json")]
        taxonomy: PathBuf,
        /// Existing color table; generated from the taxonomy when omitted
        #[arg(long)]
        colors: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write the lowercase keyword -> #rrggbb map used by the browser extension
    HexMap {
        #[arg(short, long, default_value = "data/keywords_precomputed.json")]
        taxonomy: PathBuf,
        #[arg(long)]
        colors: Option<PathBuf>,
        #[arg(short, long, default_value = "data/keywords_with_colors.json")]
        output: PathBuf,
    },
    /// Keep only the listed fields of every record
    Prune {
        #[arg(short, long, default_value = "data/nodes.json")]
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Comma separated allow-list; defaults to the rendered fields
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },
    /// Combine several JSON files under named top-level keys
    Merge {
        /// name=path, repeatable
        #[arg(short, long = "section", required = true)]
        sections: Vec<String>,
        #[arg(short, long, default_value = "data/landscape_data.json")]
        output: PathBuf,
    },
    /// Copy positions from a merged landscape file onto records by URL
    Attach {
        #[arg(short, long, default_value = "data/nodes.json")]
        input: PathBuf,
        #[arg(short, long, default_value = "data/landscape_data.json")]
        landscape: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write the merged metadata + positions file for the landscape page
    Export {
        #[arg(short, long, default_value = "data/nodes.json")]
        input: PathBuf,
        #[arg(short, long, default_value = "data/landscape_data.json")]
        output: PathBuf,
    },
    /// Replace every keyword occurrence with its base keyword
    Lemmatize {
        #[arg(short, long, default_value = "data/umap_3d_data.json")]
        input: PathBuf,
        #[arg(short, long, default_value = "data/keywords_precomputed.json")]
        taxonomy: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Force a neutral score on records containing the given keywords
    Neutralize {
        #[arg(short, long, default_value = "data/umap_3d_data.json")]
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Comma separated; defaults to the config's neutral_keywords
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,
    },
    /// Negate one coordinate field
    Flip {
        #[arg(short, long, default_value = "data/nodes.json")]
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Axis::UmapX)]
        axis: Axis,
    },
    /// Keep records where a keyword occurs exactly N times
    Filter {
        #[arg(short, long, default_value = "data/umap_3d_data.json")]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        keyword: String,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Print sample records and keyword frequencies
    Inspect {
        #[arg(short, long, default_value = "data/nodes.json")]
        input: PathBuf,
        #[arg(long, default_value_t = 5)]
        samples: usize,
        #[arg(long, default_value_t = 50)]
        top: usize,
    },
    /// Run the URL collector HTTP service
    Serve {
        /// Address to bind the HTTP server to (host:port)
        #[arg(long, env = "LANDSCAPE_BIND", default_value = "127.0.0.1:5000")]
        bind: String,
        #[arg(long, env = "LANDSCAPE_URL_STORE", default_value = "data/all_urls.json")]
        store: PathBuf,
    },
}

fn or_input<'a>(output: &'a Option<PathBuf>, input: &'a Path) -> &'a Path {
    output.as_deref().unwrap_or(input)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(true)
        .init();

    let args = Args::parse();
    let cfg = LandscapeConfig::resolve(args.config.as_deref())?;
    debug!("Config resolved - score_rule={:?}, conflict_policy={:?}", cfg.score_rule, cfg.conflict_policy);

    let start = std::time::Instant::now();
    match args.stage {
        Stage::Score { input, taxonomy, output, only_matched } => {
            let summary = orchestrator::run_score(&input, &taxonomy, &output, &cfg, only_matched)?;
            print!("{}", render::render_score_summary(&summary));
        }
        Stage::Project { input, output, features, vocabulary, embeddings, standardize, components, z_from_score } => {
            let opts = ProjectOptions { features, vocabulary, embeddings, standardize, components, z_from_score };
            orchestrator::run_project(&input, or_input(&output, &input), &cfg, &opts)?;
        }
        Stage::Scale { input, output, canvas_from, xyz, renormalize, jitter, seed } => {
            let opts = ScaleOptions { canvas_from, source_xyz: xyz, renormalize, jitter, seed };
            orchestrator::run_scale(&input, or_input(&output, &input), &cfg, &opts)?;
        }
        Stage::Colors { taxonomy, output } => {
            orchestrator::run_colors(&taxonomy, &output, &cfg)?;
        }
        Stage::Paint { input, taxonomy, colors, output } => {
            let report = orchestrator::run_paint(&input, &taxonomy, colors.as_deref(), or_input(&output, &input), &cfg)?;
            print!("{}", render::render_paint_report(&report));
        }
        Stage::HexMap { taxonomy, colors, output } => {
            orchestrator::run_hex_map(&taxonomy, colors.as_deref(), &output, &cfg)?;
        }
        Stage::Prune { input, output, fields } => {
            let out = or_input(&output, &input);
            if fields.is_empty() {
                orchestrator::run_prune(&input, out, RENDER_FIELDS.as_slice())?;
            } else {
                orchestrator::run_prune(&input, out, fields.as_slice())?;
            }
        }
        Stage::Merge { sections, output } => {
            let sections = sections
                .iter()
                .map(|s| orchestrator::parse_section(s))
                .collect::<Result<Vec<_>>>()?;
            orchestrator::run_merge(&sections, &output)?;
        }
        Stage::Attach { input, landscape, output } => {
            let r = orchestrator::run_attach(&input, &landscape, or_input(&output, &input))?;
            let total = (r.positioned + r.unpositioned).max(1) as f64;
            println!(
                "With positions: {} ({:.1}%), without: {} ({:.1}%)",
                r.positioned,
                r.positioned as f64 / total * 100.0,
                r.unpositioned,
                r.unpositioned as f64 / total * 100.0
            );
        }
        Stage::Export { input, output } => {
            orchestrator::run_export(&input, &output, &cfg)?;
        }
        Stage::Lemmatize { input, taxonomy, output } => {
            let report = orchestrator::run_lemmatize(&input, &taxonomy, or_input(&output, &input), &cfg)?;
            print!("{}", render::render_lemmatize_report(&report, 15));
        }
        Stage::Neutralize { input, output, keywords } => {
            let keywords = if keywords.is_empty() { cfg.neutral_keywords.clone() } else { keywords };
            let n = orchestrator::run_neutralize(&input, or_input(&output, &input), &keywords)?;
            println!("Updated {} records", n);
        }
        Stage::Flip { input, output, axis } => {
            let n = orchestrator::run_flip(&input, or_input(&output, &input), axis)?;
            println!("Flipped {:?} for {} records", axis, n);
        }
        Stage::Filter { input, output, keyword, count } => {
            orchestrator::run_filter(&input, &output, &keyword, count)?;
        }
        Stage::Inspect { input, samples, top } => {
            print!("{}", orchestrator::run_inspect(&input, samples, top)?);
        }
        Stage::Serve { bind, store } => {
            collector::serve(&bind, &store).await?;
        }
    }

    info!("Stage finished - duration={:.2}s", start.elapsed().as_secs_f32());
    Ok(())
}
