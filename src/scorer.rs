use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use tracing::{debug, info, warn};

use crate::models::TextUnit;
use crate::taxonomy::{fold, KeywordTaxonomy};

/// How a text unit's matched keywords collapse into one scalar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoreRule {
    /// `count(numerator) / (count(numerator) + count(denominator))`,
    /// 0.5 when neither class matched.
    Ratio { numerator: String, denominator: String },
    /// Mean of per-keyword scores over all occurrences, 0.0 when empty.
    #[default]
    Mean,
}

impl ScoreRule {
    /// speculative / (embedded + speculative)
    pub fn speculation_ratio() -> Self {
        ScoreRule::Ratio {
            numerator: "speculative".into(),
            denominator: "embedded".into(),
        }
    }
}

/// A keyword whose word-boundary pattern did not compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternFailure {
    pub keyword: String,
    pub error: String,
}

#[derive(Debug)]
enum Pattern {
    /// multi-word phrase, plain substring containment
    Phrase,
    Word(Regex),
}

#[derive(Debug)]
struct CompiledKeyword {
    keyword: String,
    category: String,
    score: f64,
    pattern: Pattern,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordMatches {
    pub occurrences: Vec<String>,
    pub score: f64,
}

/// Keyword patterns compiled once per run, longest keyword first.
#[derive(Debug)]
pub struct KeywordMatcher {
    keywords: Vec<CompiledKeyword>,
    failures: Vec<PatternFailure>,
}

impl KeywordMatcher {
    pub fn compile(taxonomy: &KeywordTaxonomy) -> Self {
        let mut entries: Vec<_> = taxonomy.entries().collect();
        entries.sort_by(|a, b| {
            (Reverse(a.keyword.chars().count()), &a.keyword)
                .cmp(&(Reverse(b.keyword.chars().count()), &b.keyword))
        });

        let mut keywords = Vec::with_capacity(entries.len());
        let mut failures = Vec::new();
        for e in entries {
            let pattern = if e.keyword.contains(' ') {
                Pattern::Phrase
            } else {
                match Regex::new(&format!(r"\b{}\b", regex::escape(&e.keyword))) {
                    Ok(re) => Pattern::Word(re),
                    Err(err) => {
                        failures.push(PatternFailure {
                            keyword: e.keyword.clone(),
                            error: err.to_string(),
                        });
                        continue;
                    }
                }
            };
            keywords.push(CompiledKeyword {
                keyword: e.keyword.clone(),
                category: e.category.clone(),
                score: e.score,
                pattern,
            });
        }

        for f in &failures {
            warn!("Keyword pattern rejected - keyword={:?}, error={}", f.keyword, f.error);
        }
        debug!("Keyword matcher compiled - patterns={}, failures={}", keywords.len(), failures.len());
        Self { keywords, failures }
    }

    pub fn failures(&self) -> &[PatternFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    fn scan(&self, text: &str) -> Vec<&CompiledKeyword> {
        let mut working = fold(text);
        let mut hits = Vec::new();

        for kw in &self.keywords {
            let spans: Vec<(usize, usize)> = match &kw.pattern {
                Pattern::Phrase => working
                    .match_indices(kw.keyword.as_str())
                    .map(|(start, m)| (start, start + m.len()))
                    .collect(),
                Pattern::Word(re) => re.find_iter(&working).map(|m| (m.start(), m.end())).collect(),
            };
            if spans.is_empty() {
                continue;
            }
            // blank out what was matched so contained shorter keywords
            // are not counted a second time
            for &(start, end) in &spans {
                working.replace_range(start..end, &" ".repeat(end - start));
            }
            hits.extend(std::iter::repeat(kw).take(spans.len()));
        }
        hits
    }

    /// Matched keyword occurrences in scan order (longest keyword first).
    pub fn find(&self, text: &str) -> Vec<String> {
        self.scan(text).into_iter().map(|k| k.keyword.clone()).collect()
    }

    pub fn score_text(&self, text: &str, rule: &ScoreRule) -> KeywordMatches {
        let hits = self.scan(text);
        let score = match rule {
            ScoreRule::Mean => {
                if hits.is_empty() {
                    0.0
                } else {
                    hits.iter().map(|k| k.score).sum::<f64>() / hits.len() as f64
                }
            }
            ScoreRule::Ratio { numerator, denominator } => {
                let num = hits.iter().filter(|k| &k.category == numerator).count();
                let den = hits.iter().filter(|k| &k.category == denominator).count();
                if num + den == 0 {
                    0.5
                } else {
                    num as f64 / (num + den) as f64
                }
            }
        };
        KeywordMatches {
            occurrences: hits.into_iter().map(|k| k.keyword.clone()).collect(),
            score,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreSummary {
    pub total: usize,
    pub matched: usize,
    pub kept: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// Score every unit in place. With `only_matched`, units without a single
/// keyword hit are dropped from the output.
pub fn score_units(
    units: Vec<TextUnit>,
    matcher: &KeywordMatcher,
    rule: &ScoreRule,
    only_matched: bool,
) -> (Vec<TextUnit>, ScoreSummary) {
    let total = units.len();
    let mut out = Vec::with_capacity(total);
    let mut matched = 0usize;

    for (i, mut unit) in units.into_iter().enumerate() {
        if i % 1000 == 0 && i > 0 {
            debug!("Scoring progress - processed={}/{}", i, total);
        }
        let m = matcher.score_text(unit.text(), rule);
        let hit = !m.occurrences.is_empty();
        if hit {
            matched += 1;
        }
        if only_matched && !hit {
            continue;
        }
        unit.keywords = Some(m.occurrences);
        unit.embedded_speculative = Some(m.score);
        out.push(unit);
    }

    let scores: Vec<f64> = out.iter().filter_map(|u| u.embedded_speculative).collect();
    let mut summary = ScoreSummary {
        total,
        matched,
        kept: out.len(),
        ..ScoreSummary::default()
    };
    if !scores.is_empty() {
        summary.mean = scores.iter().sum::<f64>() / scores.len() as f64;
        summary.min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        summary.max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    }
    info!(
        "Scoring completed - total={}, matched={}, kept={}",
        summary.total, summary.matched, summary.kept
    );
    (out, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::ConflictPolicy;
    use serde_json::json;

    fn taxonomy(doc: serde_json::Value) -> KeywordTaxonomy {
        KeywordTaxonomy::from_value(&doc, ConflictPolicy::FirstWins).unwrap()
    }

    #[test]
    fn maybe_the_future_scans_longest_first() {
        let t = taxonomy(json!({"speculative_keywords": {"maybe": ["maybe"], "future": ["future"]}}));
        let m = KeywordMatcher::compile(&t);
        let hits = m.score_text("maybe the future", &ScoreRule::Mean);
        assert_eq!(hits.occurrences, vec!["future", "maybe"]);
        assert_eq!(hits.occurrences.len(), 2);
        assert!((hits.score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn phrase_wins_over_contained_word() {
        let t = taxonomy(json!({
            "embedded_keywords": {"applied art": ["applied art"], "art": ["art"]}
        }));
        let m = KeywordMatcher::compile(&t);
        assert_eq!(m.find("Applied art and art history"), vec!["applied art", "art"]);
    }

    #[test]
    fn single_words_respect_word_boundaries() {
        let t = taxonomy(json!({"critique_keywords": {"art": ["art"]}}));
        let m = KeywordMatcher::compile(&t);
        assert!(m.find("the party started").is_empty());
        assert_eq!(m.find("Art, art and ART."), vec!["art", "art", "art"]);
    }

    #[test]
    fn score_ignores_case_of_text_and_taxonomy() {
        let lower = taxonomy(json!({"speculative_keywords": {"future": ["future"]}, "embedded_keywords": {"place": ["place"]}}));
        let upper = taxonomy(json!({"speculative_keywords": {"FUTURE": ["FuTuRe"]}, "embedded_keywords": {"Place": ["PLACE"]}}));
        let rule = ScoreRule::speculation_ratio();
        let a = KeywordMatcher::compile(&lower).score_text("The Future of this place", &rule);
        let b = KeywordMatcher::compile(&upper).score_text("the future OF THIS PLACE", &rule);
        assert_eq!(a, b);
        assert!((a.score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn ratio_defaults_to_half_and_mean_to_zero() {
        let t = taxonomy(json!({"speculative_keywords": {"future": ["future"]}}));
        let m = KeywordMatcher::compile(&t);
        assert_eq!(m.score_text("nothing here", &ScoreRule::speculation_ratio()).score, 0.5);
        assert_eq!(m.score_text("nothing here", &ScoreRule::Mean).score, 0.0);
        assert_eq!(m.score_text("future future", &ScoreRule::speculation_ratio()).score, 1.0);
    }

    #[test]
    fn zero_score_keyword_still_counts_as_a_match() {
        let t = taxonomy(json!({"critique_keywords": {"critical": ["critical"]}}));
        let m = KeywordMatcher::compile(&t);
        let hits = m.score_text("critical and critical", &ScoreRule::Mean);
        assert_eq!(hits.occurrences.len(), 2);
        assert_eq!(hits.score, 0.0);
    }

    #[test]
    fn only_matched_drops_units_without_hits() {
        let t = taxonomy(json!({"speculative_keywords": {"future": ["future"]}}));
        let m = KeywordMatcher::compile(&t);
        let units = vec![
            TextUnit::new("a", "a future"),
            TextUnit::new("b", "nothing"),
        ];
        let (kept, summary) = score_units(units.clone(), &m, &ScoreRule::Mean, true);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].url, "a");
        assert_eq!(summary.matched, 1);

        let (all, _) = score_units(units, &m, &ScoreRule::Mean, false);
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].keywords, Some(vec![]));
    }
}
