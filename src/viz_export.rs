// src/viz_export.rs
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::{fs, path::Path};
use tracing::debug;

use crate::models::{LandscapeData, LandscapeMetadata, PositionEntry, SvgMetadata, TextUnit};
use crate::scale::Canvas;

/* -------------------------------------------------------------------------- */
/* JSON files                                                                 */
/* -------------------------------------------------------------------------- */

pub fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parse {}", path.display()))
}

/// Pretty JSON, non-ASCII written as-is. Returns the byte count.
pub fn write_json<P: AsRef<Path>, T: ?Sized + Serialize>(path: P, value: &T) -> Result<u64> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, &bytes).with_context(|| format!("write {}", path.display()))?;
    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(bytes.len() as u64)
}

pub fn file_size<P: AsRef<Path>>(path: P) -> Result<u64> {
    let path = path.as_ref();
    Ok(fs::metadata(path).with_context(|| format!("stat {}", path.display()))?.len())
}

/* -------------------------------------------------------------------------- */
/* Landscape export                                                           */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// Extent of the `umap_x`/`umap_y` values, missing values read as 0.5.
pub fn umap_bounds(units: &[TextUnit]) -> Option<Bounds> {
    if units.is_empty() {
        return None;
    }
    let mut b = Bounds {
        min_x: f64::INFINITY,
        max_x: f64::NEG_INFINITY,
        min_y: f64::INFINITY,
        max_y: f64::NEG_INFINITY,
    };
    for u in units {
        let (x, y) = (u.umap_x.unwrap_or(0.5), u.umap_y.unwrap_or(0.5));
        b.min_x = b.min_x.min(x);
        b.max_x = b.max_x.max(x);
        b.min_y = b.min_y.min(y);
        b.max_y = b.max_y.max(y);
    }
    Some(b)
}

/// Metadata + one position per unit, the shape the landscape page fetches
/// in a single request.
pub fn build_landscape(units: &[TextUnit], canvas: &Canvas) -> LandscapeData {
    let positions: Vec<PositionEntry> = units
        .iter()
        .filter(|u| !u.url.is_empty())
        .map(|u| PositionEntry {
            url: u.url.clone(),
            umap_x: u.umap_x.unwrap_or(0.5),
            umap_y: u.umap_y.unwrap_or(0.5),
        })
        .collect();

    let mut extra = Map::new();
    if let Some(b) = umap_bounds(units) {
        extra.insert(
            "bounds".into(),
            json!({"minX": b.min_x, "maxX": b.max_x, "minY": b.min_y, "maxY": b.max_y}),
        );
    }
    extra.insert(
        "counts".into(),
        json!({"nodes": units.len(), "positions": positions.len()}),
    );

    LandscapeData {
        metadata: LandscapeMetadata {
            svg: SvgMetadata {
                width: canvas.width,
                height: canvas.height,
                margin_x: canvas.margin_x,
                margin_y: canvas.margin_y,
            },
            extra,
        },
        positions,
    }
}

/// Canvas of a merged landscape file (`metadata.svg`).
pub fn canvas_from_landscape(path: &Path) -> Result<Canvas> {
    let data: Value = read_json(path)?;
    let svg = data
        .get("metadata")
        .and_then(|m| m.get("svg"))
        .cloned()
        .with_context(|| format!("{} has no metadata.svg block", path.display()))?;
    let svg: SvgMetadata =
        serde_json::from_value(svg).with_context(|| format!("parse metadata.svg of {}", path.display()))?;
    Ok(Canvas::from(&svg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip_keeps_non_ascii() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.json");
        let bytes = write_json(&path, &json!({"sentence": "Gestaltung für Morgen"})).unwrap();
        assert_eq!(bytes, file_size(&path).unwrap());
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("für"));
        let back: Value = read_json(&path).unwrap();
        assert_eq!(back["sentence"], "Gestaltung für Morgen");
    }

    #[test]
    fn read_json_names_the_file_on_error() {
        let err = read_json::<Value, _>("/definitely/not/here.json").unwrap_err();
        assert!(format!("{:#}", err).contains("/definitely/not/here.json"));
    }

    #[test]
    fn landscape_export_carries_canvas_and_positions() {
        let units = vec![
            TextUnit { url: "a".into(), umap_x: Some(0.1), umap_y: Some(0.9), ..TextUnit::default() },
            TextUnit { url: "b".into(), ..TextUnit::default() },
            TextUnit::default(),
        ];
        let canvas = Canvas::default();
        let data = build_landscape(&units, &canvas);
        assert_eq!(data.positions.len(), 2);
        assert_eq!(data.positions[1].umap_x, 0.5);
        assert_eq!(data.metadata.extra["counts"]["nodes"], 3);
        assert_eq!(data.metadata.extra["bounds"]["minX"], 0.1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("landscape_data.json");
        write_json(&path, &data).unwrap();
        let raw: Value = read_json(&path).unwrap();
        assert_eq!(raw["metadata"]["svg"]["marginX"], 133.0);
        assert_eq!(canvas_from_landscape(&path).unwrap(), canvas);
    }
}
