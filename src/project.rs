use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::models::Coordinate;
use crate::vectorize::FeatureMatrix;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
}

impl DistanceMetric {
    pub fn distance(self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f64>()
                .sqrt(),
            DistanceMetric::Cosine => {
                let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
                let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
                match (na == 0.0, nb == 0.0) {
                    (true, true) => 0.0,
                    (true, false) | (false, true) => 1.0,
                    _ => (1.0 - dot / (na * nb)).max(0.0),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorParams {
    pub n_components: usize,
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub metric: DistanceMetric,
    pub seed: u64,
    pub n_epochs: usize,
    pub learning_rate: f64,
    pub negative_sample_rate: usize,
}

impl Default for ProjectorParams {
    fn default() -> Self {
        Self {
            n_components: 2,
            n_neighbors: 15,
            min_dist: 0.1,
            spread: 1.0,
            metric: DistanceMetric::Cosine,
            seed: 42,
            n_epochs: 200,
            learning_rate: 1.0,
            negative_sample_rate: 5,
        }
    }
}

/// Reduces an N×D feature matrix to N×k display coordinates.
pub trait Projector {
    fn n_components(&self) -> usize;
    fn project(&self, matrix: &FeatureMatrix) -> Result<Vec<Coordinate>>;
}

/// Project and rescale every output axis to [0, 1].
pub fn project_normalized(projector: &dyn Projector, matrix: &FeatureMatrix) -> Result<Vec<Coordinate>> {
    let raw = projector.project(matrix)?;
    Ok(normalize_axes(&raw))
}

/// Per-axis min-max rescaling. An axis whose values are all equal maps
/// every point to 0.5. Rows shorter than the widest one keep their length;
/// their missing axes take no part in that axis' range.
pub fn normalize_axes(coords: &[Coordinate]) -> Vec<Coordinate> {
    let dims = coords.iter().map(Vec::len).max().unwrap_or(0);
    let mut out: Vec<Coordinate> = coords.to_vec();
    for d in 0..dims {
        let (min, max) = coords
            .iter()
            .filter_map(|c| c.get(d))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = max - min;
        for v in out.iter_mut().filter_map(|c| c.get_mut(d)) {
            *v = if range > 0.0 { (*v - min) / range } else { 0.5 };
        }
    }
    out
}

/// Seeded UMAP: k-NN graph, fuzzy simplicial set, SGD layout.
pub struct UmapProjector {
    params: ProjectorParams,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Neighbors {
    pub indices: Vec<usize>,
    pub distances: Vec<f64>,
}

impl UmapProjector {
    pub fn new(params: ProjectorParams) -> Result<Self> {
        if !(2..=3).contains(&params.n_components) {
            bail!("projection supports 2 or 3 components, got {}", params.n_components);
        }
        if params.n_neighbors < 2 {
            bail!("n_neighbors must be at least 2, got {}", params.n_neighbors);
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &ProjectorParams {
        &self.params
    }

    pub(crate) fn knn(&self, matrix: &FeatureMatrix, k: usize) -> Vec<Neighbors> {
        let rows = matrix.rows();
        let metric = self.params.metric;
        (0..rows.len())
            .into_par_iter()
            .map(|i| {
                let mut d: Vec<(f64, usize)> = (0..rows.len())
                    .filter(|&j| j != i)
                    .map(|j| (metric.distance(&rows[i], &rows[j]), j))
                    .collect();
                d.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                d.truncate(k);
                Neighbors {
                    indices: d.iter().map(|&(_, j)| j).collect(),
                    distances: d.iter().map(|&(dist, _)| dist).collect(),
                }
            })
            .collect()
    }

    /// Symmetric fuzzy union of the directed membership strengths, as a
    /// sorted `(i, j, w)` edge list with `i < j`.
    pub(crate) fn fuzzy_graph(&self, knn: &[Neighbors]) -> Vec<(usize, usize, f64)> {
        let mut directed: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for (i, nb) in knn.iter().enumerate() {
            for (j, w) in nb.indices.iter().zip(membership_strengths(&nb.distances)) {
                directed.insert((i, *j), w);
            }
        }
        let mut undirected: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for (&(i, j), &a) in &directed {
            let key = (i.min(j), i.max(j));
            if undirected.contains_key(&key) {
                continue;
            }
            let b = directed.get(&(j, i)).copied().unwrap_or(0.0);
            undirected.insert(key, a + b - a * b);
        }
        undirected
            .into_iter()
            .filter(|(_, w)| *w > 0.0)
            .map(|((i, j), w)| (i, j, w))
            .collect()
    }
}

impl Projector for UmapProjector {
    fn n_components(&self) -> usize {
        self.params.n_components
    }

    fn project(&self, matrix: &FeatureMatrix) -> Result<Vec<Coordinate>> {
        let p = &self.params;
        let n = matrix.n_rows();
        let dims = p.n_components;
        if n == 0 {
            return Ok(Vec::new());
        }
        if n == 1 {
            return Ok(vec![vec![0.0; dims]]);
        }

        let start = std::time::Instant::now();
        let k = p.n_neighbors.min(n - 1);
        debug!(
            "Projection started - rows={}, features={}, k={}, components={}, metric={:?}, seed={}",
            n, matrix.width(), k, dims, p.metric, p.seed
        );

        let knn = self.knn(matrix, k);
        let edges = self.fuzzy_graph(&knn);
        let (a, b) = find_ab_params(p.spread, p.min_dist);
        debug!("Fuzzy graph built - edges={}, a={:.4}, b={:.4}", edges.len(), a, b);

        let mut rng = StdRng::seed_from_u64(p.seed);
        let mut y: Vec<Coordinate> = (0..n)
            .map(|_| (0..dims).map(|_| rng.gen_range(-10.0..10.0)).collect())
            .collect();

        let max_w = edges.iter().map(|e| e.2).fold(0.0, f64::max);
        for epoch in 0..p.n_epochs {
            let alpha = p.learning_rate * (1.0 - epoch as f64 / p.n_epochs as f64);
            for &(i, j, w) in &edges {
                if rng.gen::<f64>() > w / max_w {
                    continue;
                }
                let d2 = sq_dist(&y[i], &y[j]);
                if d2 > 0.0 {
                    let coeff = -2.0 * a * b * d2.powf(b - 1.0) / (a * d2.powf(b) + 1.0);
                    for d in 0..dims {
                        let g = clip(coeff * (y[i][d] - y[j][d])) * alpha;
                        y[i][d] += g;
                        y[j][d] -= g;
                    }
                }
                for _ in 0..p.negative_sample_rate {
                    let other = rng.gen_range(0..n);
                    if other == i {
                        continue;
                    }
                    let d2 = sq_dist(&y[i], &y[other]);
                    let coeff = if d2 > 0.0 {
                        2.0 * b / ((0.001 + d2) * (a * d2.powf(b) + 1.0))
                    } else {
                        0.0
                    };
                    for d in 0..dims {
                        let g = if coeff > 0.0 { clip(coeff * (y[i][d] - y[other][d])) } else { 4.0 };
                        y[i][d] += g * alpha;
                    }
                }
            }
        }

        info!(
            "Projection completed - duration={:.2}s, rows={}, components={}",
            start.elapsed().as_secs_f32(),
            n,
            dims
        );
        Ok(y)
    }
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn clip(v: f64) -> f64 {
    v.clamp(-4.0, 4.0)
}

/// Membership strength of each neighbor: distances are shifted by the
/// nearest non-zero distance and scaled by a bandwidth chosen so the
/// strengths sum to log2(k).
pub(crate) fn membership_strengths(distances: &[f64]) -> Vec<f64> {
    let k = distances.len();
    if k == 0 {
        return Vec::new();
    }
    let rho = distances.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);
    let target = (k as f64).log2();
    let psum = |sigma: f64| -> f64 {
        distances
            .iter()
            .map(|&d| {
                let shifted = d - rho;
                if shifted > 0.0 { (-shifted / sigma).exp() } else { 1.0 }
            })
            .sum()
    };

    let (mut lo, mut hi, mut sigma) = (0.0, f64::INFINITY, 1.0);
    for _ in 0..64 {
        let s = psum(sigma);
        if (s - target).abs() < 1e-5 {
            break;
        }
        if s > target {
            hi = sigma;
            sigma = (lo + hi) / 2.0;
        } else {
            lo = sigma;
            sigma = if hi.is_infinite() { sigma * 2.0 } else { (lo + hi) / 2.0 };
        }
    }
    let mean = distances.iter().sum::<f64>() / k as f64;
    sigma = sigma.max(1e-3 * mean).max(1e-12);

    distances
        .iter()
        .map(|&d| {
            let shifted = d - rho;
            if shifted > 0.0 { (-shifted / sigma).exp() } else { 1.0 }
        })
        .collect()
}

/// Least-squares fit of `1 / (1 + a x^(2b))` to the target low-dimensional
/// membership curve for `spread` and `min_dist`.
pub fn find_ab_params(spread: f64, min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..300).map(|i| i as f64 * spread * 3.0 / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| if x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() })
        .collect();
    let loss = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| (1.0 / (1.0 + a * x.powf(2.0 * b)) - y).powi(2))
            .sum()
    };

    let mut best = (1.0, 1.0, f64::INFINITY);
    for ai in 0..200 {
        let a = 0.05 * (10.0f64 / 0.05).powf(ai as f64 / 199.0);
        for bi in 0..171 {
            let b = 0.3 + bi as f64 * 0.01;
            let l = loss(a, b);
            if l < best.2 {
                best = (a, b, l);
            }
        }
    }
    (best.0, best.1)
}
