use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::color::{assign_colors, hex_keyword_map, ColorTable, PaintReport};
use crate::config::LandscapeConfig;
use crate::models::{LandscapeData, TextUnit};
use crate::postprocess::{self, Axis, LemmatizeReport};
use crate::project::{project_normalized, UmapProjector};
use crate::prune::{self, AttachReport, Record, SizeReport};
use crate::render;
use crate::scale::{self, Canvas, Jitter, ScaleSummary, SourceFields};
use crate::scorer::{score_units, KeywordMatcher, ScoreSummary};
use crate::taxonomy::KeywordTaxonomy;
use crate::vectorize::{load_embeddings, FeatureMatrix, FeatureMode, TfIdfVectorizer, Vocabulary};
use crate::viz_export::{build_landscape, canvas_from_landscape, file_size, read_json, write_json};

fn load_units(path: &Path) -> Result<Vec<TextUnit>> {
    let units: Vec<TextUnit> = read_json(path)?;
    debug!("Loaded {} units from {}", units.len(), path.display());
    Ok(units)
}

fn load_taxonomy(path: &Path, cfg: &LandscapeConfig) -> Result<KeywordTaxonomy> {
    KeywordTaxonomy::load(path, cfg.conflict_policy)
}

/* ---------------------------- Score ---------------------------- */

pub fn run_score(
    input: &Path,
    taxonomy: &Path,
    output: &Path,
    cfg: &LandscapeConfig,
    only_matched: bool,
) -> Result<ScoreSummary> {
    let start = Instant::now();
    let units = load_units(input)?;
    let taxonomy = load_taxonomy(taxonomy, cfg)?;
    let matcher = KeywordMatcher::compile(&taxonomy);
    if !matcher.failures().is_empty() {
        warn!("{} keyword pattern(s) could not be compiled and were skipped", matcher.failures().len());
    }

    let (scored, summary) = score_units(units, &matcher, &cfg.score_rule, only_matched);
    write_json(output, &scored)?;
    info!(
        "Score stage completed - duration={:.2}s, mean={:.3}, min={:.3}, max={:.3}, output={}",
        start.elapsed().as_secs_f32(),
        summary.mean,
        summary.min,
        summary.max,
        output.display()
    );
    Ok(summary)
}

/* ---------------------------- Project ---------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FeatureSource {
    /// keyword occurrence counts
    Counts,
    /// keyword presence (0/1)
    Presence,
    /// TF-IDF over the sentence text
    Tfidf,
    /// precomputed embeddings file
    Embeddings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VocabularySource {
    /// fixed design/critical term list
    Design,
    /// every keyword seen in the corpus, most frequent first
    Discovered,
}

#[derive(Debug, Clone)]
pub struct ProjectOptions {
    pub features: FeatureSource,
    pub vocabulary: VocabularySource,
    pub embeddings: Option<PathBuf>,
    pub standardize: bool,
    pub components: Option<usize>,
    pub z_from_score: bool,
}

impl Default for ProjectOptions {
    fn default() -> Self {
        Self {
            features: FeatureSource::Counts,
            vocabulary: VocabularySource::Design,
            embeddings: None,
            standardize: false,
            components: None,
            z_from_score: false,
        }
    }
}

pub fn build_features(units: &[TextUnit], opts: &ProjectOptions, cfg: &LandscapeConfig) -> Result<FeatureMatrix> {
    let vocab = || match opts.vocabulary {
        VocabularySource::Design => Vocabulary::design_terms(),
        VocabularySource::Discovered => Vocabulary::discovered(units),
    };
    let matrix = match opts.features {
        FeatureSource::Counts => FeatureMatrix::from_units(units, &vocab(), FeatureMode::Counts),
        FeatureSource::Presence => FeatureMatrix::from_units(units, &vocab(), FeatureMode::Presence),
        FeatureSource::Tfidf => {
            let texts: Vec<&str> = units.iter().map(TextUnit::text).collect();
            TfIdfVectorizer::fit_transform(&texts, cfg.tfidf.clone())?
        }
        FeatureSource::Embeddings => {
            let Some(path) = opts.embeddings.as_deref() else {
                bail!("--embeddings <file> is required for embedding features");
            };
            load_embeddings(path, units.len())?
        }
    };
    debug!("Feature matrix built - rows={}, width={}", matrix.n_rows(), matrix.width());
    Ok(matrix)
}

pub fn run_project(input: &Path, output: &Path, cfg: &LandscapeConfig, opts: &ProjectOptions) -> Result<usize> {
    let start = Instant::now();
    let mut units = load_units(input)?;

    let mut matrix = build_features(&units, opts, cfg)?;
    if opts.standardize {
        matrix.standardize();
    }

    let mut params = cfg.projector.clone();
    if let Some(c) = opts.components {
        params.n_components = c;
    }
    let projector = UmapProjector::new(params)?;
    let coords = project_normalized(&projector, &matrix)?;

    for (unit, c) in units.iter_mut().zip(&coords) {
        if c.len() == 2 {
            unit.umap_x = Some(c[0]);
            unit.umap_y = Some(c[1]);
        } else {
            unit.x = Some(c[0]);
            unit.y = Some(c[1]);
            unit.z = Some(if opts.z_from_score {
                unit.embedded_speculative.unwrap_or(0.0) * 5.0
            } else {
                c[2]
            });
        }
    }

    write_json(output, &units)?;
    info!(
        "Project stage completed - duration={:.2}s, points={}, features={:?}, output={}",
        start.elapsed().as_secs_f32(),
        coords.len(),
        opts.features,
        output.display()
    );
    Ok(coords.len())
}

/* ---------------------------- Scale ---------------------------- */

#[derive(Debug, Clone, Default)]
pub struct ScaleOptions {
    /// Take the canvas from a merged landscape file instead of the config.
    pub canvas_from: Option<PathBuf>,
    pub source_xyz: bool,
    pub renormalize: bool,
    pub jitter: Option<f64>,
    pub seed: Option<u64>,
}

pub fn run_scale(input: &Path, output: &Path, cfg: &LandscapeConfig, opts: &ScaleOptions) -> Result<ScaleSummary> {
    let start = Instant::now();
    let mut units = load_units(input)?;

    let canvas: Canvas = match &opts.canvas_from {
        Some(p) => canvas_from_landscape(p)?,
        None => cfg.canvas.clone(),
    };
    let jitter = Jitter {
        amount: opts.jitter.unwrap_or(cfg.jitter.amount),
        seed: opts.seed.or(cfg.jitter.seed),
    };
    let source = if opts.source_xyz { SourceFields::Xyz } else { SourceFields::Umap };

    let summary = scale::scale_units(&mut units, &canvas, &jitter, source, opts.renormalize);
    write_json(output, &units)?;
    info!(
        "Scale stage completed - duration={:.2}s, scaled={}, skipped={}, canvas={}x{}, jitter={}",
        start.elapsed().as_secs_f32(),
        summary.scaled,
        summary.skipped,
        canvas.width,
        canvas.height,
        jitter.amount
    );
    Ok(summary)
}

/* ---------------------------- Colors ---------------------------- */

pub fn run_colors(taxonomy: &Path, output: &Path, cfg: &LandscapeConfig) -> Result<ColorTable> {
    let taxonomy = load_taxonomy(taxonomy, cfg)?;
    let table = ColorTable::from_taxonomy(&taxonomy);
    write_json(output, &table)?;
    info!("Color table written - keywords={}, output={}", table.len(), output.display());
    Ok(table)
}

fn table_for(taxonomy: &KeywordTaxonomy, colors: Option<&Path>) -> Result<ColorTable> {
    match colors {
        Some(p) => ColorTable::load(p),
        None => Ok(ColorTable::from_taxonomy(taxonomy)),
    }
}

pub fn run_paint(
    input: &Path,
    taxonomy: &Path,
    colors: Option<&Path>,
    output: &Path,
    cfg: &LandscapeConfig,
) -> Result<PaintReport> {
    let start = Instant::now();
    let mut units = load_units(input)?;
    let taxonomy = load_taxonomy(taxonomy, cfg)?;
    let table = table_for(&taxonomy, colors)?;

    let report = assign_colors(&mut units, &taxonomy, &table);
    write_json(output, &units)?;
    debug!("{}", render::render_paint_report(&report));
    info!("Paint stage completed - duration={:.2}s, output={}", start.elapsed().as_secs_f32(), output.display());
    Ok(report)
}

pub fn run_hex_map(taxonomy: &Path, colors: Option<&Path>, output: &Path, cfg: &LandscapeConfig) -> Result<usize> {
    let taxonomy = load_taxonomy(taxonomy, cfg)?;
    let table = table_for(&taxonomy, colors)?;
    let map = hex_keyword_map(&taxonomy, &table);
    write_json(output, &map)?;
    info!("Hex keyword map written - entries={}, output={}", map.len(), output.display());
    Ok(map.len())
}

/* ---------------------------- Prune / merge ---------------------------- */

pub fn run_prune<S: AsRef<str>>(input: &Path, output: &Path, fields: &[S]) -> Result<SizeReport> {
    let input_bytes = file_size(input)?;
    let records: Vec<Record> = read_json(input)?;
    let pruned = prune::prune_records(&records, fields);
    let output_bytes = write_json(output, &pruned)?;
    let report = SizeReport { input_bytes, output_bytes };
    report.log();
    Ok(report)
}

/// `name=path` pairs, each file placed under its own top-level key.
pub fn run_merge(sections: &[(String, PathBuf)], output: &Path) -> Result<u64> {
    let mut docs = Vec::with_capacity(sections.len());
    for (name, path) in sections {
        let doc: Value = read_json(path)?;
        docs.push((name.clone(), doc));
    }
    let merged = prune::merge_documents(docs)?;
    let bytes = write_json(output, &merged)?;
    info!(
        "Merge completed - sections={}, size={:.1}KB, output={}",
        sections.len(),
        bytes as f64 / 1024.0,
        output.display()
    );
    Ok(bytes)
}

pub fn parse_section(arg: &str) -> Result<(String, PathBuf)> {
    let (name, path) = arg
        .split_once('=')
        .with_context(|| format!("section must look like name=path, got {:?}", arg))?;
    if name.is_empty() || path.is_empty() {
        bail!("section must look like name=path, got {:?}", arg);
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

pub fn run_attach(input: &Path, landscape: &Path, output: &Path) -> Result<AttachReport> {
    let mut records: Vec<Record> = read_json(input)?;
    let data: LandscapeData = read_json(landscape)?;
    let report = prune::attach_positions(&mut records, &data.positions);
    write_json(output, &records)?;
    Ok(report)
}

pub fn run_export(input: &Path, output: &Path, cfg: &LandscapeConfig) -> Result<usize> {
    let units = load_units(input)?;
    let data = build_landscape(&units, &cfg.canvas);
    let bytes = write_json(output, &data)?;
    info!(
        "Landscape export completed - positions={}, size={:.1}KB, output={}",
        data.positions.len(),
        bytes as f64 / 1024.0,
        output.display()
    );
    Ok(data.positions.len())
}

/* ---------------------------- Post-processing ---------------------------- */

pub fn run_lemmatize(input: &Path, taxonomy: &Path, output: &Path, cfg: &LandscapeConfig) -> Result<LemmatizeReport> {
    let mut units = load_units(input)?;
    let taxonomy = load_taxonomy(taxonomy, cfg)?;
    let report = postprocess::lemmatize(&mut units, &taxonomy);
    write_json(output, &units)?;
    debug!("{}", render::render_lemmatize_report(&report, 15));
    Ok(report)
}

pub fn run_neutralize(input: &Path, output: &Path, keywords: &[String]) -> Result<usize> {
    let mut units = load_units(input)?;
    let updated = postprocess::neutralize(&mut units, keywords);
    write_json(output, &units)?;
    Ok(updated)
}

pub fn run_flip(input: &Path, output: &Path, axis: Axis) -> Result<usize> {
    let mut units = load_units(input)?;
    let flipped = postprocess::flip_axis(&mut units, axis);
    write_json(output, &units)?;
    Ok(flipped)
}

pub fn run_filter(input: &Path, output: &Path, keyword: &str, count: usize) -> Result<usize> {
    let units = load_units(input)?;
    let kept = postprocess::filter_by_occurrence(&units, keyword, count);
    let pct = if units.is_empty() { 0.0 } else { kept.len() as f64 / units.len() as f64 * 100.0 };
    info!(
        "Occurrence filter - keyword={:?}, count={}, matching={} ({:.1}%)",
        keyword,
        count,
        kept.len(),
        pct
    );
    write_json(output, &kept)?;
    Ok(kept.len())
}

pub fn run_inspect(input: &Path, samples: usize, top: usize) -> Result<String> {
    let units = load_units(input)?;
    let mut out = render::render_samples(&units, samples);
    out.push('\n');
    out.push_str(&render::render_keyword_counts(&units, top));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Color;
    use serde_json::json;

    fn write(dir: &tempfile::TempDir, name: &str, v: Value) -> PathBuf {
        let p = dir.path().join(name);
        write_json(&p, &v).unwrap();
        p
    }

    fn corpus() -> Value {
        let sentences = [
            "the future of speculative design",
            "a future vision",
            "craft and place in everyday making",
            "local craft traditions of place",
            "speculative futures and craft",
            "nothing relevant here",
        ];
        Value::Array(
            sentences
                .iter()
                .enumerate()
                .map(|(i, s)| json!({"url": format!("https://s.test/{}", i), "sentence": s, "group": i}))
                .collect(),
        )
    }

    fn taxonomy_doc() -> Value {
        json!({
            "speculative_keywords": {"future": ["future", "futures"], "speculative": ["speculative"]},
            "embedded_keywords": {"craft": ["craft"], "place": ["place"], "making": ["making"]}
        })
    }

    #[test]
    fn score_project_scale_paint_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(&dir, "sentences.json", corpus());
        let tax = write(&dir, "keywords_precomputed.json", taxonomy_doc());
        let cfg = LandscapeConfig::default();

        let scored = dir.path().join("scored.json");
        let summary = run_score(&input, &tax, &scored, &cfg, true).unwrap();
        assert_eq!(summary.total, 6);
        assert_eq!(summary.kept, 5);

        let projected = dir.path().join("projected.json");
        let opts = ProjectOptions { vocabulary: VocabularySource::Discovered, ..ProjectOptions::default() };
        assert_eq!(run_project(&scored, &projected, &cfg, &opts).unwrap(), 5);

        let scaled = dir.path().join("scaled.json");
        let s = run_scale(&projected, &scaled, &cfg, &ScaleOptions::default()).unwrap();
        assert_eq!(s.scaled, 5);

        let painted = dir.path().join("painted.json");
        let report = run_paint(&scaled, &tax, None, &painted, &cfg).unwrap();
        assert_eq!(report.painted, 5);

        let units: Vec<TextUnit> = read_json(&painted).unwrap();
        for u in &units {
            let (x, y) = (u.x.unwrap(), u.y.unwrap());
            assert!(x >= cfg.canvas.margin_x - 1e-9 && x <= cfg.canvas.width - cfg.canvas.margin_x + 1e-9);
            assert!(y >= cfg.canvas.margin_y - 1e-9 && y <= cfg.canvas.height - cfg.canvas.margin_y + 1e-9);
            assert!(matches!(u.color, Some(Color::Rgb(_))));
            assert!(u.extra.contains_key("group"));
        }
    }

    #[test]
    fn projection_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(&dir, "sentences.json", corpus());
        let tax = write(&dir, "kp.json", taxonomy_doc());
        let cfg = LandscapeConfig::default();
        let scored = dir.path().join("scored.json");
        run_score(&input, &tax, &scored, &cfg, false).unwrap();

        let opts = ProjectOptions {
            components: Some(3),
            z_from_score: true,
            vocabulary: VocabularySource::Discovered,
            ..ProjectOptions::default()
        };
        let (a, b) = (dir.path().join("a.json"), dir.path().join("b.json"));
        run_project(&scored, &a, &cfg, &opts).unwrap();
        run_project(&scored, &b, &cfg, &opts).unwrap();
        let ua: Vec<TextUnit> = read_json(&a).unwrap();
        let ub: Vec<TextUnit> = read_json(&b).unwrap();
        assert_eq!(ua, ub);
        for u in &ua {
            assert_eq!(u.z, Some(u.embedded_speculative.unwrap() * 5.0));
            assert!(u.umap_x.is_none());
        }
    }

    #[test]
    fn embeddings_without_file_is_an_error() {
        let opts = ProjectOptions { features: FeatureSource::Embeddings, ..ProjectOptions::default() };
        let err = build_features(&[], &opts, &LandscapeConfig::default()).unwrap_err();
        assert!(err.to_string().contains("--embeddings"));
    }

    #[test]
    fn prune_merge_attach_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = write(
            &dir,
            "nodes.json",
            json!([
                {"url": "a", "sentence": "s", "umap_x": 0.2, "weights": [1, 2, 3], "x": 1.0, "y": 2.0, "color": [1, 2, 3]},
                {"url": "b", "sentence": "t"}
            ]),
        );
        let meta = write(&dir, "meta.json", json!({"svg": {"width": 100.0, "height": 50.0, "marginX": 5.0, "marginY": 5.0}}));
        let positions = write(&dir, "positions.json", json!([{"url": "b", "umap_x": 0.7, "umap_y": 0.3}]));

        let pruned = dir.path().join("pruned.json");
        let report = run_prune(&nodes, &pruned, &prune::RENDER_FIELDS).unwrap();
        assert_eq!(report.input_bytes, file_size(&nodes).unwrap());
        assert_eq!(report.output_bytes, file_size(&pruned).unwrap());

        let merged = dir.path().join("landscape_data.json");
        let sections = vec![
            parse_section(&format!("metadata={}", meta.display())).unwrap(),
            parse_section(&format!("positions={}", positions.display())).unwrap(),
        ];
        run_merge(&sections, &merged).unwrap();
        assert_eq!(canvas_from_landscape(&merged).unwrap().width, 100.0);

        let attached = dir.path().join("attached.json");
        let r = run_attach(&pruned, &merged, &attached).unwrap();
        assert_eq!(r, AttachReport { positioned: 1, unpositioned: 1 });
        let out: Vec<Record> = read_json(&attached).unwrap();
        assert_eq!(out[0]["x"], json!(1.0));
        assert_eq!(out[1]["x"], json!(0.7));
        assert!(out[0].get("weights").is_none());
    }

    #[test]
    fn malformed_section_argument() {
        assert!(parse_section("metadata").is_err());
        assert!(parse_section("=file.json").is_err());
    }
}
