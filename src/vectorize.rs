use anyhow::{bail, Context, Result};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use crate::models::{OccurrenceForm, TextUnit};

/// The 17 design + 19 critical terms of the 2D landscape.
pub const DESIGN_TERMS: [&str; 36] = [
    // design
    "design", "method", "making", "applied art", "intention", "plan", "research", "tool", "inquiry",
    "practice", "work", "concept", "craft", "exploration", "engineering", "shape", "project",
    // critical
    "critical", "conceptual", "analytical", "deconstructive", "collaborative", "interdisciplinary",
    "contextual", "iterative", "reflective", "theoretical", "evaluative", "investigative",
    "explorative", "dialectical", "discursive", "reflexive", "narrative", "speculative", "systemic",
];

/// Ordered, frozen list of feature terms.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    terms: Vec<String>,
    index: HashMap<String, usize>,
    form: OccurrenceForm,
}

impl Vocabulary {
    fn from_ordered(terms: Vec<String>, form: OccurrenceForm) -> Self {
        let index = terms.iter().enumerate().map(|(i, t)| (t.clone(), i)).collect();
        Self { terms, index, form }
    }

    /// Literal term set, sorted and deduplicated.
    pub fn fixed<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .sorted()
            .dedup()
            .collect();
        Self::from_ordered(terms, OccurrenceForm::Base)
    }

    pub fn design_terms() -> Self {
        Self::fixed(DESIGN_TERMS)
    }

    /// Every matched word seen in the corpus, most frequent first.
    pub fn discovered(units: &[TextUnit]) -> Self {
        let counts = units
            .iter()
            .flat_map(|u| u.occurrences_as(OccurrenceForm::Surface))
            .counts();
        let terms = counts
            .into_iter()
            .sorted_by(|a, b| (Reverse(a.1), &a.0).cmp(&(Reverse(b.1), &b.0)))
            .map(|(t, _)| t)
            .collect();
        Self::from_ordered(terms, OccurrenceForm::Surface)
    }

    /// Which occurrence form rows are built from.
    pub fn form(&self) -> OccurrenceForm {
        self.form
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn position(&self, term: &str) -> Option<usize> {
        self.index.get(term).copied()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureMode {
    #[default]
    Counts,
    Presence,
}

/// One row per unit: occurrence count (or presence) of each vocabulary term.
pub fn vectorize(occurrences: &[String], vocab: &Vocabulary, mode: FeatureMode) -> Vec<f64> {
    let mut row = vec![0.0; vocab.len()];
    for kw in occurrences {
        if let Some(i) = vocab.position(kw) {
            match mode {
                FeatureMode::Counts => row[i] += 1.0,
                FeatureMode::Presence => row[i] = 1.0,
            }
        }
    }
    row
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    rows: Vec<Vec<f64>>,
    width: usize,
}

impl FeatureMatrix {
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if let Some((i, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            bail!("feature row {} has width {}, expected {}", i, r.len(), width);
        }
        Ok(Self { rows, width })
    }

    pub fn from_units(units: &[TextUnit], vocab: &Vocabulary, mode: FeatureMode) -> Self {
        let rows = units
            .iter()
            .map(|u| vectorize(&u.occurrences_as(vocab.form()), vocab, mode))
            .collect();
        Self { rows, width: vocab.len() }
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Zero mean, unit population variance per column. Constant columns
    /// are only centered.
    pub fn standardize(&mut self) {
        let n = self.rows.len();
        if n == 0 {
            return;
        }
        for col in 0..self.width {
            let mean = self.rows.iter().map(|r| r[col]).sum::<f64>() / n as f64;
            let var = self.rows.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / n as f64;
            let std = var.sqrt();
            let scale = if std > 0.0 { std } else { 1.0 };
            for r in self.rows.iter_mut() {
                r[col] = (r[col] - mean) / scale;
            }
        }
    }
}

/// Precomputed sentence embeddings, one array per record.
pub fn load_embeddings(path: &Path, expected_rows: usize) -> Result<FeatureMatrix> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read embeddings {}", path.display()))?;
    let rows: Vec<Vec<f64>> = serde_json::from_str(&raw)
        .with_context(|| format!("parse embeddings {}", path.display()))?;
    if rows.len() != expected_rows {
        bail!(
            "embeddings file {} has {} rows but there are {} records",
            path.display(),
            rows.len(),
            expected_rows
        );
    }
    FeatureMatrix::from_rows(rows)
}

/* ------------------------------- TF-IDF ----------------------------------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TfIdfParams {
    pub max_features: usize,
    /// minimum number of documents a term must appear in
    pub min_df: usize,
    /// maximum share of documents a term may appear in
    pub max_df: f64,
    pub ngram_max: usize,
}

impl Default for TfIdfParams {
    fn default() -> Self {
        Self {
            max_features: 384,
            min_df: 2,
            max_df: 0.8,
            ngram_max: 2,
        }
    }
}

pub struct DocumentFrequencyCounter {
    pub counter: HashMap<String, usize>,
    pub n_documents: usize,
}

impl DocumentFrequencyCounter {
    pub fn doc_freq(&self, term: &str) -> usize {
        self.counter.get(term).copied().unwrap_or(0)
    }

    /// Smoothed idf: `ln((1 + n) / (1 + df)) + 1`.
    pub fn inv_doc_freq(&self, term: &str) -> f64 {
        ((1.0 + self.n_documents as f64) / (1.0 + self.doc_freq(term) as f64)).ln() + 1.0
    }
}

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w\w+\b").expect("static token pattern"));

fn terms_of(text: &str, ngram_max: usize) -> Vec<String> {
    let lower = text.to_lowercase();
    let tokens: Vec<&str> = TOKEN_RE.find_iter(&lower).map(|m| m.as_str()).collect();
    let mut out = Vec::new();
    for n in 1..=ngram_max.max(1) {
        out.extend(tokens.windows(n).map(|w| w.join(" ")));
    }
    out
}

/// Text-based alternative to keyword features.
pub struct TfIdfVectorizer {
    params: TfIdfParams,
    vocab: Vocabulary,
    idf: Vec<f64>,
}

impl TfIdfVectorizer {
    pub fn fit(texts: &[&str], params: TfIdfParams) -> Result<Self> {
        let docs: Vec<Vec<String>> = texts.iter().map(|t| terms_of(t, params.ngram_max)).collect();
        let n = docs.len();

        let mut counter: HashMap<String, usize> = HashMap::new();
        let mut corpus_freq: HashMap<String, usize> = HashMap::new();
        for doc in &docs {
            let distinct: HashSet<&String> = doc.iter().collect();
            for term in distinct {
                *counter.entry(term.clone()).or_insert(0) += 1;
            }
            for term in doc {
                *corpus_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }
        let dfc = DocumentFrequencyCounter { counter, n_documents: n };

        let max_docs = params.max_df * n as f64;
        let kept: Vec<String> = corpus_freq
            .into_iter()
            .filter(|(t, _)| {
                let df = dfc.doc_freq(t);
                df >= params.min_df && df as f64 <= max_docs
            })
            .sorted_by(|a, b| (Reverse(a.1), &a.0).cmp(&(Reverse(b.1), &b.0)))
            .take(params.max_features)
            .map(|(t, _)| t)
            .collect();
        if kept.is_empty() {
            bail!("TF-IDF vocabulary is empty after document-frequency pruning ({} documents)", n);
        }

        let vocab = Vocabulary::fixed(kept);
        let idf = vocab.terms().iter().map(|t| dfc.inv_doc_freq(t)).collect();
        debug!("TF-IDF fitted - documents={}, features={}", n, vocab.len());
        Ok(Self { params, vocab, idf })
    }

    pub fn transform(&self, text: &str) -> Vec<f64> {
        let mut row = vec![0.0; self.vocab.len()];
        for term in terms_of(text, self.params.ngram_max) {
            if let Some(i) = self.vocab.position(&term) {
                row[i] += 1.0;
            }
        }
        for (v, idf) in row.iter_mut().zip(&self.idf) {
            *v *= idf;
        }
        let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            row.iter_mut().for_each(|v| *v /= norm);
        }
        row
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn fit_transform(texts: &[&str], params: TfIdfParams) -> Result<FeatureMatrix> {
        let v = Self::fit(texts, params)?;
        FeatureMatrix::from_rows(texts.iter().map(|t| v.transform(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(kws: &[&str]) -> TextUnit {
        TextUnit {
            keywords: Some(kws.iter().map(|s| s.to_string()).collect()),
            ..TextUnit::default()
        }
    }

    #[test]
    fn design_vocabulary_is_sorted_and_complete() {
        let v = Vocabulary::design_terms();
        assert_eq!(v.len(), 36);
        assert_eq!(v.terms()[0], "analytical");
        assert_eq!(v.position("applied art"), Some(1));
        assert!(v.terms().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn discovered_vocabulary_orders_by_frequency_then_name() {
        let units = vec![unit(&["tool", "craft", "tool"]), unit(&["craft", "art"])];
        let v = Vocabulary::discovered(&units);
        assert_eq!(v.terms(), &["craft", "tool", "art"]);
    }

    #[test]
    fn annotated_nodes_use_surface_words_or_base_counts_by_vocabulary() {
        let node: TextUnit = serde_json::from_value(serde_json::json!({
            "url": "u",
            "design_keywords_found": {"tool": ["tools", "tool"]},
            "critical_keywords_found": {"tool": ["tooling"], "narrative": ["narratives"]}
        }))
        .unwrap();
        let units = vec![node];

        let discovered = Vocabulary::discovered(&units);
        assert_eq!(discovered.form(), OccurrenceForm::Surface);
        assert_eq!(discovered.terms(), &["narratives", "tool", "tooling", "tools"]);
        let m = FeatureMatrix::from_units(&units, &discovered, FeatureMode::Presence);
        assert_eq!(m.rows()[0], vec![1.0; 4]);

        let fixed = Vocabulary::fixed(["narrative", "tool"]);
        let m = FeatureMatrix::from_units(&units, &fixed, FeatureMode::Counts);
        assert_eq!(m.rows()[0], vec![1.0, 2.0]);
    }

    #[test]
    fn counts_and_presence_share_one_width() {
        let v = Vocabulary::fixed(["b", "a", "c"]);
        let occ = vec!["a".to_string(), "a".to_string(), "c".to_string(), "zzz".to_string()];
        assert_eq!(vectorize(&occ, &v, FeatureMode::Counts), vec![2.0, 0.0, 1.0]);
        assert_eq!(vectorize(&occ, &v, FeatureMode::Presence), vec![1.0, 0.0, 1.0]);
        assert_eq!(vectorize(&[], &v, FeatureMode::Counts).len(), 3);
    }

    #[test]
    fn standardize_centers_and_scales_columns() {
        let mut m = FeatureMatrix::from_rows(vec![vec![1.0, 5.0], vec![3.0, 5.0]]).unwrap();
        m.standardize();
        assert_eq!(m.rows(), &[vec![-1.0, 0.0], vec![1.0, 0.0]]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(FeatureMatrix::from_rows(vec![vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn tfidf_rows_are_unit_length_and_prune_rare_terms() {
        let texts = [
            "design research shapes practice",
            "design research and critical practice",
            "speculative design research",
            "a unique sentence",
        ];
        let params = TfIdfParams { max_df: 1.0, ..TfIdfParams::default() };
        let v = TfIdfVectorizer::fit(&texts, params).unwrap();
        assert!(v.vocabulary().position("design").is_some());
        assert!(v.vocabulary().position("design research").is_some());
        assert!(v.vocabulary().position("unique").is_none());

        let row = v.transform(texts[0]);
        let norm: f64 = row.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
        assert!(v.transform("nothing in common").iter().all(|&x| x == 0.0));
    }
}
