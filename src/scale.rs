use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::models::{SvgMetadata, TextUnit};

const BASE_WIDTH: f64 = 1920.0;
const BASE_HEIGHT: f64 = 1080.0;
const WIDTH_SCALE: f64 = 1.67;
const HEIGHT_SCALE: f64 = 4.5;

/// Target drawing area. Depth is only used by 3D layouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Canvas {
    pub width: f64,
    pub height: f64,
    pub depth: f64,
    pub margin_x: f64,
    pub margin_y: f64,
    pub margin_z: f64,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: BASE_WIDTH * WIDTH_SCALE,
            height: BASE_HEIGHT * HEIGHT_SCALE,
            depth: 1.0,
            margin_x: (80.0 * WIDTH_SCALE).floor(),
            margin_y: (60.0 * HEIGHT_SCALE).floor(),
            margin_z: 0.0,
        }
    }
}

impl From<&SvgMetadata> for Canvas {
    fn from(svg: &SvgMetadata) -> Self {
        Self {
            width: svg.width,
            height: svg.height,
            margin_x: svg.margin_x,
            margin_y: svg.margin_y,
            ..Self::default()
        }
    }
}

impl Canvas {
    fn axis(&self, d: usize) -> (f64, f64) {
        match d {
            0 => (self.width, self.margin_x),
            1 => (self.height, self.margin_y),
            _ => (self.depth, self.margin_z),
        }
    }

    /// Map a normalized coordinate onto the canvas.
    pub fn place(&self, normalized: &[f64]) -> Vec<f64> {
        normalized
            .iter()
            .enumerate()
            .map(|(d, &v)| {
                let (size, margin) = self.axis(d);
                scale_axis(v, size, margin)
            })
            .collect()
    }
}

/// `margin + n * (size - 2 * margin)`
pub fn scale_axis(normalized: f64, size: f64, margin: f64) -> f64 {
    margin + normalized * (size - 2.0 * margin)
}

/// Random visual declumping. Unseeded jitter differs on every run; seeded
/// jitter is a pure function of seed and record URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Jitter {
    pub amount: f64,
    pub seed: Option<u64>,
}

impl Jitter {
    pub fn none() -> Self {
        Self::default()
    }

    fn rng_for(&self, key: &str) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ xxh3_64(key.as_bytes())),
            None => StdRng::from_entropy(),
        }
    }

    /// One offset per axis, each uniform in `[-amount/2, amount/2]`.
    pub fn offsets(&self, key: &str, dims: usize) -> Vec<f64> {
        if self.amount <= 0.0 {
            return vec![0.0; dims];
        }
        let mut rng = self.rng_for(key);
        (0..dims).map(|_| (rng.gen::<f64>() - 0.5) * self.amount).collect()
    }
}

/// Which record fields hold the coordinates to scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFields {
    /// `umap_x` / `umap_y`, missing values read as 0.5
    Umap,
    /// `x` / `y` (/ `z`), records without them are left alone
    Xyz,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleSummary {
    pub scaled: usize,
    pub skipped: usize,
}

fn read_coords(unit: &TextUnit, source: SourceFields) -> Option<Vec<f64>> {
    match source {
        SourceFields::Umap => Some(vec![unit.umap_x.unwrap_or(0.5), unit.umap_y.unwrap_or(0.5)]),
        SourceFields::Xyz => {
            let (x, y) = (unit.x?, unit.y?);
            let mut c = vec![x, y];
            if let Some(z) = unit.z {
                c.push(z);
            }
            Some(c)
        }
    }
}

/// Write final canvas `x`/`y`(/`z`) for every unit. With `renormalize`,
/// raw values are first min-max rescaled per axis (a constant axis lands
/// on the canvas center).
pub fn scale_units(
    units: &mut [TextUnit],
    canvas: &Canvas,
    jitter: &Jitter,
    source: SourceFields,
    renormalize: bool,
) -> ScaleSummary {
    let mut summary = ScaleSummary::default();
    let coords: Vec<Option<Vec<f64>>> = units.iter().map(|u| read_coords(u, source)).collect();

    let present: Vec<Vec<f64>> = coords.iter().flatten().cloned().collect();
    let dims = present.iter().map(Vec::len).max().unwrap_or(0);
    let mut normalized = if renormalize {
        crate::project::normalize_axes(&present)
    } else {
        present
    };
    // a record without z sits mid-depth when others have one
    for c in normalized.iter_mut() {
        c.resize(dims, 0.5);
    }

    let mut it = normalized.into_iter();
    for (unit, c) in units.iter_mut().zip(&coords) {
        if c.is_none() {
            summary.skipped += 1;
            continue;
        }
        let Some(n) = it.next() else { break };
        let mut placed = canvas.place(&n);
        for (v, off) in placed.iter_mut().zip(jitter.offsets(&unit.url, n.len())) {
            *v += off;
        }
        unit.x = placed.first().copied();
        unit.y = placed.get(1).copied();
        if placed.len() > 2 {
            unit.z = placed.get(2).copied();
        }
        summary.scaled += 1;
    }
    debug!("Scaling completed - scaled={}, skipped={}", summary.scaled, summary.skipped);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_canvas_matches_landscape_page() {
        let c = Canvas::default();
        assert!((c.width - 3206.4).abs() < 1e-9);
        assert!((c.height - 4860.0).abs() < 1e-9);
        assert_eq!(c.margin_x, 133.0);
        assert_eq!(c.margin_y, 270.0);
    }

    #[test]
    fn scale_axis_keeps_margins() {
        assert_eq!(scale_axis(0.0, 1000.0, 50.0), 50.0);
        assert_eq!(scale_axis(1.0, 1000.0, 50.0), 950.0);
        assert_eq!(scale_axis(0.5, 1000.0, 50.0), 500.0);
    }

    #[test]
    fn seeded_jitter_is_stable_and_bounded() {
        let j = Jitter { amount: 100.0, seed: Some(42) };
        let a = j.offsets("https://a.test", 3);
        assert_eq!(a, j.offsets("https://a.test", 3));
        assert_ne!(a, j.offsets("https://b.test", 3));
        assert!(a.iter().all(|v| (-50.0..=50.0).contains(v)));
        assert_eq!(Jitter::none().offsets("x", 2), vec![0.0, 0.0]);
    }

    #[test]
    fn renormalized_constant_axis_lands_on_center() {
        let canvas = Canvas { width: 200.0, height: 100.0, margin_x: 10.0, margin_y: 10.0, ..Canvas::default() };
        let mut units = vec![
            TextUnit { url: "a".into(), umap_x: Some(1.0), umap_y: Some(3.0), ..TextUnit::default() },
            TextUnit { url: "b".into(), umap_x: Some(2.0), umap_y: Some(3.0), ..TextUnit::default() },
        ];
        let s = scale_units(&mut units, &canvas, &Jitter::none(), SourceFields::Umap, true);
        assert_eq!(s.scaled, 2);
        assert_eq!((units[0].x, units[0].y), (Some(10.0), Some(50.0)));
        assert_eq!((units[1].x, units[1].y), (Some(190.0), Some(50.0)));
    }

    #[test]
    fn xyz_records_without_z_are_placed_mid_depth() {
        let canvas = Canvas { width: 100.0, height: 100.0, depth: 10.0, margin_x: 0.0, margin_y: 0.0, margin_z: 0.0 };
        let mut units = vec![
            TextUnit { url: "a".into(), x: Some(0.0), y: Some(0.0), z: Some(4.0), ..TextUnit::default() },
            TextUnit { url: "b".into(), x: Some(2.0), y: Some(1.0), ..TextUnit::default() },
            TextUnit { url: "c".into(), x: Some(1.0), y: Some(2.0), z: Some(8.0), ..TextUnit::default() },
        ];
        let s = scale_units(&mut units, &canvas, &Jitter::none(), SourceFields::Xyz, true);
        assert_eq!(s.scaled, 3);
        assert_eq!((units[0].x, units[0].y, units[0].z), (Some(0.0), Some(0.0), Some(0.0)));
        assert_eq!((units[1].x, units[1].y, units[1].z), (Some(100.0), Some(50.0), Some(5.0)));
        assert_eq!((units[2].x, units[2].y, units[2].z), (Some(50.0), Some(100.0), Some(10.0)));
    }

    #[test]
    fn xyz_source_skips_unpositioned_records() {
        let canvas = Canvas { width: 100.0, height: 100.0, margin_x: 0.0, margin_y: 0.0, ..Canvas::default() };
        let mut units = vec![
            TextUnit { url: "a".into(), x: Some(0.25), y: Some(0.75), ..TextUnit::default() },
            TextUnit { url: "b".into(), ..TextUnit::default() },
        ];
        let s = scale_units(&mut units, &canvas, &Jitter::none(), SourceFields::Xyz, false);
        assert_eq!(s, ScaleSummary { scaled: 1, skipped: 1 });
        assert_eq!((units[0].x, units[0].y), (Some(25.0), Some(75.0)));
        assert_eq!(units[1].x, None);
    }
}
