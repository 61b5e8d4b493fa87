use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Node-level annotation maps produced by the extraction step
/// (base keyword -> matched surface forms).
pub const ANNOTATION_FIELDS: [&str; 2] = ["design_keywords_found", "critical_keywords_found"];

/// One node or sentence flowing through the pipeline.
///
/// Only the fields a stage reads or writes are typed; everything else rides
/// along in `extra` so a stage never drops data it does not understand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextUnit {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentence: Option<String>,
    /// Matched keyword occurrences, duplicates are repeat hits.
    #[serde(
        rename = "keyword",
        alias = "keywords_found",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_speculative: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub umap_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub umap_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TextUnit {
    pub fn new(url: impl Into<String>, sentence: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sentence: Some(sentence.into()),
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        self.sentence.as_deref().unwrap_or("")
    }

    /// Keyword occurrences for this unit: the scored `keyword` list when
    /// present, otherwise the annotation maps with each base keyword
    /// repeated once per matched form.
    pub fn occurrences(&self) -> Vec<String> {
        self.occurrences_as(OccurrenceForm::Base)
    }

    pub fn occurrences_as(&self, form: OccurrenceForm) -> Vec<String> {
        if let Some(kws) = &self.keywords {
            return kws.clone();
        }
        match form {
            OccurrenceForm::Base => self.base_occurrences(),
            OccurrenceForm::Surface => self.surface_occurrences(),
        }
    }

    fn annotation_maps(&self) -> impl Iterator<Item = &Map<String, Value>> {
        ANNOTATION_FIELDS.iter().filter_map(|f| match self.extra.get(*f) {
            Some(Value::Object(groups)) => Some(groups),
            _ => None,
        })
    }

    // a base listed in both maps is counted from the first one only
    fn base_occurrences(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for groups in self.annotation_maps() {
            for (base, forms) in groups {
                if !seen.insert(base.as_str()) {
                    continue;
                }
                let n = match forms {
                    Value::Array(items) => items.len(),
                    Value::Null => 0,
                    _ => 1,
                };
                out.extend(std::iter::repeat(base.clone()).take(n));
            }
        }
        out
    }

    fn surface_occurrences(&self) -> Vec<String> {
        let mut out = Vec::new();
        for groups in self.annotation_maps() {
            for forms in groups.values() {
                match forms {
                    Value::Array(items) => {
                        out.extend(items.iter().filter_map(|v| v.as_str().map(str::to_string)))
                    }
                    Value::String(s) => out.push(s.clone()),
                    _ => {}
                }
            }
        }
        out
    }
}

/// How annotation-map records report their keywords.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OccurrenceForm {
    /// Base keyword, once per matched form
    #[default]
    Base,
    /// The matched words themselves
    Surface,
}

/// Display color of a point: `[r, g, b]` from the color table, or a
/// `#rrggbb` string written by older tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Color {
    Rgb([u8; 3]),
    Hex(String),
}

/// Single `[x, y(, z)]` coordinate row.
pub type Coordinate = Vec<f64>;

/// Entry of a `positions` list in the merged landscape file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEntry {
    pub url: String,
    pub umap_x: f64,
    pub umap_y: f64,
}

/// SVG block of `landscape_metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SvgMetadata {
    pub width: f64,
    pub height: f64,
    pub margin_x: f64,
    pub margin_y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandscapeMetadata {
    pub svg: SvgMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Merged `{"metadata": ..., "positions": [...]}` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandscapeData {
    pub metadata: LandscapeMetadata,
    #[serde(default)]
    pub positions: Vec<PositionEntry>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => None,
        Some(OneOrMany::One(s)) => Some(vec![s]),
        Some(OneOrMany::Many(v)) => Some(v),
    })
}
