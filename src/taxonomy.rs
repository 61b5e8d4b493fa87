use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

/// Category sections of `keywords_precomputed.json`, in precedence order,
/// with the score a variant gets when no contextual score covers it.
pub const CATEGORY_SECTIONS: [(&str, &str, f64); 3] = [
    ("embedded_keywords", "embedded", -0.5),
    ("speculative_keywords", "speculative", 0.5),
    ("critique_keywords", "critique", 0.0),
];

const CONTEXTUAL_SECTION: &str = "contextual_scores";
const DATA_CATEGORY_SECTION: &str = "data_keyword_categories";

/// Case-fold a keyword or a text for matching.
pub fn fold(s: &str) -> String {
    s.nfc().collect::<String>().to_lowercase()
}

/// What to do when one variant is listed under two different base keywords.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Keep the mapping from the earlier category (embedded, speculative,
    /// critique, then the rest alphabetically) and report the rest.
    #[default]
    FirstWins,
    /// Refuse to build the taxonomy.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantConflict {
    pub variant: String,
    pub kept: (String, String),
    pub dropped: (String, String),
}

/// One searchable keyword after folding.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordEntry {
    pub keyword: String,
    pub base: String,
    pub category: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct KeywordGroup {
    pub category: String,
    pub base: String,
    /// Variants as written in the source document.
    pub variants: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct KeywordTaxonomy {
    policy: ConflictPolicy,
    groups: Vec<KeywordGroup>,
    entries: BTreeMap<String, KeywordEntry>,
    contextual: BTreeMap<String, (String, f64)>,
    contextual_keys: Vec<String>,
    data_categories: BTreeMap<String, String>,
    conflicts: Vec<VariantConflict>,
}

impl KeywordTaxonomy {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            groups: Vec::new(),
            entries: BTreeMap::new(),
            contextual: BTreeMap::new(),
            contextual_keys: Vec::new(),
            data_categories: BTreeMap::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn load(path: &Path, policy: ConflictPolicy) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read taxonomy {}", path.display()))?;
        let doc: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parse taxonomy {}", path.display()))?;
        Self::from_value(&doc, policy)
    }

    /// Build from a `keywords_precomputed.json` document.
    pub fn from_value(doc: &Value, policy: ConflictPolicy) -> Result<Self> {
        let mut t = Self::new(policy);

        if let Some(Value::Object(ctx)) = doc.get(CONTEXTUAL_SECTION) {
            for (section, scores) in ctx {
                let class = contextual_class(section);
                let Value::Object(scores) = scores else { continue };
                for (kw, score) in scores {
                    if let Some(score) = score.as_f64() {
                        t.set_contextual_score(kw, &class, score);
                    }
                }
            }
        }

        let mut sections: Vec<(String, String, f64)> = CATEGORY_SECTIONS
            .iter()
            .map(|(s, c, d)| (s.to_string(), c.to_string(), *d))
            .collect();
        if let Value::Object(map) = doc {
            let mut extra: Vec<(String, String, f64)> = map
                .keys()
                .filter(|k| k.ends_with("_keywords"))
                .filter(|k| !CATEGORY_SECTIONS.iter().any(|(s, _, _)| s == k))
                .map(|k| (k.clone(), k.trim_end_matches("_keywords").to_string(), 0.0))
                .collect();
            extra.sort_by(|a, b| a.0.cmp(&b.0));
            sections.extend(extra);
        }

        for (section, category, default_score) in &sections {
            let Some(Value::Object(groups)) = doc.get(section.as_str()) else {
                continue;
            };
            for (base, variants) in groups {
                // non-list entries are annotations, not keyword groups
                let Value::Array(variants) = variants else { continue };
                let variants: Vec<String> = variants
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                t.add_group(category, base, &variants, *default_score);
            }
        }

        if let Some(Value::Object(cats)) = doc.get(DATA_CATEGORY_SECTION) {
            for (kw, cat) in cats {
                if let Some(cat) = cat.as_str() {
                    t.data_categories.insert(kw.clone(), cat.to_string());
                }
            }
        }

        t.finish()
    }

    /// Register an explicit score. Contextual keywords are searchable on
    /// their own and count toward `class` unless a category lists them.
    pub fn set_contextual_score(&mut self, keyword: &str, class: &str, score: f64) {
        let folded = fold(keyword);
        if !self.contextual_keys.iter().any(|k| k == keyword) {
            self.contextual_keys.push(keyword.to_string());
        }
        self.contextual.insert(folded.clone(), (class.to_string(), score));
        match self.entries.get_mut(&folded) {
            Some(entry) => entry.score = score,
            None => {
                self.entries.insert(
                    folded.clone(),
                    KeywordEntry {
                        keyword: folded,
                        base: keyword.to_string(),
                        category: class.to_string(),
                        score,
                    },
                );
            }
        }
    }

    /// Register a base keyword and its surface variants under `category`.
    pub fn add_group(&mut self, category: &str, base: &str, variants: &[String], default_score: f64) {
        let inherited = self.contextual.get(&fold(base)).map(|(_, s)| *s);
        for variant in variants {
            let folded = fold(variant);
            if let Some(existing) = self.entries.get_mut(&folded) {
                let from_contextual_only = self.contextual.contains_key(&folded)
                    && !self.groups.iter().any(|g| g.variants.iter().any(|v| fold(v) == folded));
                if from_contextual_only {
                    // contextual key gains its category; score stays explicit
                    existing.base = base.to_string();
                    existing.category = category.to_string();
                    continue;
                }
                if existing.base != base || existing.category != category {
                    self.conflicts.push(VariantConflict {
                        variant: folded.clone(),
                        kept: (existing.category.clone(), existing.base.clone()),
                        dropped: (category.to_string(), base.to_string()),
                    });
                }
                continue;
            }
            let score = inherited.unwrap_or(default_score);
            self.entries.insert(
                folded.clone(),
                KeywordEntry {
                    keyword: folded,
                    base: base.to_string(),
                    category: category.to_string(),
                    score,
                },
            );
        }
        self.groups.push(KeywordGroup {
            category: category.to_string(),
            base: base.to_string(),
            variants: variants.to_vec(),
        });
    }

    /// Apply the conflict policy and log what was found.
    pub fn finish(self) -> Result<Self> {
        if !self.conflicts.is_empty() {
            for c in &self.conflicts {
                warn!(
                    "Taxonomy conflict - variant={:?}, kept={}/{}, dropped={}/{}",
                    c.variant, c.kept.0, c.kept.1, c.dropped.0, c.dropped.1
                );
            }
            if self.policy == ConflictPolicy::Error {
                let listed = self
                    .conflicts
                    .iter()
                    .map(|c| c.variant.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                bail!("{} ambiguous keyword variant(s): {}", self.conflicts.len(), listed);
            }
        }
        debug!(
            "Taxonomy built - groups={}, keywords={}, contextual={}, conflicts={}",
            self.groups.len(),
            self.entries.len(),
            self.contextual.len(),
            self.conflicts.len()
        );
        Ok(self)
    }

    pub fn entries(&self) -> impl Iterator<Item = &KeywordEntry> {
        self.entries.values()
    }

    pub fn entry(&self, keyword: &str) -> Option<&KeywordEntry> {
        self.entries.get(&fold(keyword))
    }

    pub fn score(&self, keyword: &str) -> Option<f64> {
        self.entry(keyword).map(|e| e.score)
    }

    /// Base keyword a surface form belongs to.
    pub fn base_of(&self, keyword: &str) -> Option<&str> {
        self.entry(keyword).map(|e| e.base.as_str())
    }

    pub fn groups(&self) -> &[KeywordGroup] {
        &self.groups
    }

    pub fn conflicts(&self) -> &[VariantConflict] {
        &self.conflicts
    }

    pub fn data_categories(&self) -> &BTreeMap<String, String> {
        &self.data_categories
    }

    /// Every keyword that gets its own color: contextual keys plus all
    /// variants, as written in the document.
    pub fn color_keywords(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self.contextual_keys.iter().cloned().collect();
        for g in &self.groups {
            out.extend(g.variants.iter().cloned());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn contextual_class(section: &str) -> String {
    match section {
        "embeddedness_keywords" => "embedded".to_string(),
        other => other.trim_end_matches("_keywords").to_string(),
    }
}
