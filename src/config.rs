use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::project::ProjectorParams;
use crate::scale::{Canvas, Jitter};
use crate::scorer::ScoreRule;
use crate::taxonomy::ConflictPolicy;
use crate::vectorize::TfIdfParams;

pub const CONFIG_ENV: &str = "LANDSCAPE_CONFIG";

/// Tunables shared by the pipeline stages. Every field has a default, so an
/// empty `{}` file (or no file at all) reproduces the stock landscape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LandscapeConfig {
    pub score_rule: ScoreRule,
    pub conflict_policy: ConflictPolicy,
    pub projector: ProjectorParams,
    pub tfidf: TfIdfParams,
    pub canvas: Canvas,
    pub jitter: Jitter,
    /// Keywords whose sentences are forced to a neutral score.
    pub neutral_keywords: Vec<String>,
}

impl LandscapeConfig {
    /// Resolve the config file: explicit path > `LANDSCAPE_CONFIG` > defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var(CONFIG_ENV).ok().map(PathBuf::from),
        };
        match path {
            Some(p) => {
                debug!("Loading config file from {}", p.display());
                Self::load(&p)
            }
            None => {
                debug!("No config file given, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }
}

impl Default for LandscapeConfig {
    fn default() -> Self {
        Self {
            score_rule: ScoreRule::default(),
            conflict_policy: ConflictPolicy::default(),
            projector: ProjectorParams::default(),
            tfidf: TfIdfParams::default(),
            canvas: Canvas::default(),
            jitter: Jitter::default(),
            neutral_keywords: [
                "make", "making", "made", "maker", "makers", "material", "materials", "materiality",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}
