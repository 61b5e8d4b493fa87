use anyhow::{bail, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::models::PositionEntry;

/// Fields the landscape page actually renders.
pub const RENDER_FIELDS: [&str; 6] = ["url", "sentence", "highlighted_sentence", "x", "y", "color"];

pub type Record = Map<String, Value>;

/// Copy of `record` holding exactly the allowed keys, in allow-list order.
pub fn prune_record<S: AsRef<str>>(record: &Record, allow: &[S]) -> Record {
    allow
        .iter()
        .map(|k| {
            let k = k.as_ref();
            (k.to_string(), record.get(k).cloned().unwrap_or(Value::Null))
        })
        .collect()
}

pub fn prune_records<S: AsRef<str>>(records: &[Record], allow: &[S]) -> Vec<Record> {
    let out: Vec<Record> = records.iter().map(|r| prune_record(r, allow)).collect();
    debug!("Pruned records - count={}, fields={}", out.len(), allow.len());
    out
}

/// Place each section under its own top-level key. No deep merge.
pub fn merge_documents(sections: Vec<(String, Value)>) -> Result<Value> {
    let mut merged = Map::with_capacity(sections.len());
    for (name, doc) in sections {
        if merged.contains_key(&name) {
            bail!("duplicate section name {:?}", name);
        }
        merged.insert(name, doc);
    }
    Ok(Value::Object(merged))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachReport {
    pub positioned: usize,
    pub unpositioned: usize,
}

/// Copy `umap_x`/`umap_y` of the matching position entry into `x`/`y`.
/// Records without a match keep their coordinates, or get explicit nulls.
pub fn attach_positions(records: &mut [Record], positions: &[PositionEntry]) -> AttachReport {
    let by_url: HashMap<&str, &PositionEntry> = positions.iter().map(|p| (p.url.as_str(), p)).collect();
    let mut report = AttachReport::default();

    for record in records.iter_mut() {
        let hit = record
            .get("url")
            .and_then(Value::as_str)
            .and_then(|u| by_url.get(u))
            .copied();
        match hit {
            Some(p) => {
                record.insert("x".into(), Value::from(p.umap_x));
                record.insert("y".into(), Value::from(p.umap_y));
                report.positioned += 1;
            }
            None => {
                record.entry("x").or_insert(Value::Null);
                record.entry("y").or_insert(Value::Null);
                report.unpositioned += 1;
            }
        }
    }
    info!(
        "Positions attached - positioned={}, unpositioned={}",
        report.positioned, report.unpositioned
    );
    report
}

/// Byte sizes before and after a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeReport {
    pub input_bytes: u64,
    pub output_bytes: u64,
}

impl SizeReport {
    pub fn reduction_pct(&self) -> f64 {
        if self.input_bytes == 0 {
            return 0.0;
        }
        (self.input_bytes as f64 - self.output_bytes as f64) / self.input_bytes as f64 * 100.0
    }

    pub fn log(&self) {
        info!(
            "Size report - input={:.2}MB, output={:.2}MB, reduction={:.1}%",
            self.input_bytes as f64 / 1024.0 / 1024.0,
            self.output_bytes as f64 / 1024.0 / 1024.0,
            self.reduction_pct()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Record {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn prune_keeps_exactly_the_allow_list() {
        let r = record(json!({"url": "u", "x": 1.0, "umap_x": 0.3, "weights": [1, 2]}));
        let pruned = prune_record(&r, &["url", "x", "color"]);
        assert_eq!(Value::Object(pruned), json!({"url": "u", "x": 1.0, "color": null}));
    }

    #[test]
    fn prune_default_fields_in_order() {
        let r = record(json!({"color": [1, 2, 3], "url": "u"}));
        let pruned = prune_record(&r, &RENDER_FIELDS);
        let keys: Vec<&String> = pruned.keys().collect();
        assert_eq!(keys, RENDER_FIELDS.iter().collect::<Vec<_>>());
    }

    #[test]
    fn merge_rejects_duplicate_sections() {
        let merged = merge_documents(vec![
            ("metadata".into(), json!({"svg": {}})),
            ("positions".into(), json!([])),
        ])
        .unwrap();
        assert_eq!(merged, json!({"metadata": {"svg": {}}, "positions": []}));

        let dup = merge_documents(vec![("a".into(), json!(1)), ("a".into(), json!(2))]);
        assert!(dup.is_err());
    }

    #[test]
    fn attach_copies_by_url_and_nulls_the_rest() {
        let mut records = vec![
            record(json!({"url": "a"})),
            record(json!({"url": "b", "x": 7.0})),
            record(json!({"sentence": "no url"})),
        ];
        let positions = vec![PositionEntry { url: "a".into(), umap_x: 1.5, umap_y: 2.5 }];
        let report = attach_positions(&mut records, &positions);
        assert_eq!(report, AttachReport { positioned: 1, unpositioned: 2 });
        assert_eq!(records[0]["x"], json!(1.5));
        assert_eq!(records[0]["y"], json!(2.5));
        assert_eq!(records[1]["x"], json!(7.0));
        assert_eq!(records[1]["y"], Value::Null);
        assert_eq!(records[2]["x"], Value::Null);
    }

    #[test]
    fn size_reduction_percentage() {
        let r = SizeReport { input_bytes: 200, output_bytes: 50 };
        assert_eq!(r.reduction_pct(), 75.0);
        assert_eq!(SizeReport { input_bytes: 0, output_bytes: 0 }.reduction_pct(), 0.0);
    }
}
