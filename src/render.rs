// src/render.rs
use itertools::Itertools;

use crate::color::PaintReport;
use crate::models::TextUnit;
use crate::postprocess::LemmatizeReport;
use crate::scorer::ScoreSummary;

const SAMPLE_CHARS: usize = 200;

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

pub fn render_score_summary(s: &ScoreSummary) -> String {
    let pct = if s.total == 0 { 0.0 } else { s.matched as f64 / s.total as f64 * 100.0 };
    let mut out = String::new();
    out.push_str(&format!("Units scored: {}\n", s.total));
    out.push_str(&format!("With keyword matches: {} ({:.1}%)\n", s.matched, pct));
    out.push_str(&format!("Kept: {}\n", s.kept));
    if s.kept > 0 {
        out.push_str(&format!("Score mean={:.3} min={:.3} max={:.3}\n", s.mean, s.min, s.max));
    }
    out
}

pub fn render_paint_report(r: &PaintReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Color added: {}\n", r.painted));
    out.push_str(&format!("Not found: {}\n", r.not_found));
    out.push_str(&format!("Unique colors used: {}\n", r.colors_used.len()));
    for kw in &r.colors_used {
        out.push_str(&format!("  {}\n", kw));
    }
    out
}

pub fn render_lemmatize_report(r: &LemmatizeReport, top: usize) -> String {
    let mut out = format!("Updated {} keyword instances\n", r.replaced);
    if !r.changes.is_empty() {
        out.push_str("Top changes:\n");
        for ((from, to), n) in r.top_changes(top) {
            out.push_str(&format!("  {} -> {}: {} times\n", from, to, n));
        }
    }
    out
}

/// The first `n` units that carry keywords, with a shortened sentence.
pub fn render_samples(units: &[TextUnit], n: usize) -> String {
    let with_kw: Vec<&TextUnit> = units.iter().filter(|u| !u.occurrences().is_empty()).collect();
    let mut out = format!("{} units with keywords\n", with_kw.len());
    for (i, u) in with_kw.iter().take(n).enumerate() {
        out.push_str(&format!("\n[{}] {}\n", i + 1, u.url));
        out.push_str(&format!("Keywords: {}\n", u.occurrences().iter().join(", ")));
        if let Some(s) = u.sentence.as_deref() {
            out.push_str(&format!("Sample: {}\n", truncate(s, SAMPLE_CHARS)));
        }
        if let Some(score) = u.embedded_speculative {
            out.push_str(&format!("Score: {:.3}\n", score));
        }
    }
    out
}

/// Keyword frequency table, most frequent first.
pub fn render_keyword_counts(units: &[TextUnit], top: usize) -> String {
    let counts = units
        .iter()
        .flat_map(|u| u.occurrences())
        .counts()
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
        .collect::<Vec<_>>();
    let total: usize = counts.iter().map(|(_, c)| c).sum();
    let mut out = format!("{:<45} {:<8}\n", "Keyword", "Count");
    for (kw, c) in counts.iter().take(top) {
        out.push_str(&format!("{:<45} {:<8}\n", kw, c));
    }
    out.push_str(&format!("Total unique keywords: {}\n", counts.len()));
    out.push_str(&format!("Total keyword occurrences: {}\n", total));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(url: &str, sentence: &str, kws: &[&str]) -> TextUnit {
        TextUnit {
            keywords: Some(kws.iter().map(|s| s.to_string()).collect()),
            ..TextUnit::new(url, sentence)
        }
    }

    #[test]
    fn samples_skip_units_without_keywords_and_truncate() {
        let long = "x".repeat(300);
        let units = vec![unit("a", "short", &[]), unit("b", &long, &["future"])];
        let text = render_samples(&units, 5);
        assert!(text.starts_with("1 units with keywords"));
        assert!(text.contains("[1] b"));
        assert!(!text.contains("[2]"));
        assert!(text.contains(&format!("{}...", "x".repeat(200))));
    }

    #[test]
    fn keyword_counts_sorted_by_frequency() {
        let units = vec![unit("a", "", &["b", "a", "b"]), unit("c", "", &["a", "c"])];
        let text = render_keyword_counts(&units, 10);
        let a = text.find("\na ").unwrap();
        let b = text.find("\nb ").unwrap();
        let c = text.find("\nc ").unwrap();
        assert!(a < b && b < c);
        assert!(text.contains("Total keyword occurrences: 5"));
    }

    #[test]
    fn score_summary_percentages() {
        let s = ScoreSummary { total: 4, matched: 1, kept: 4, mean: 0.25, min: 0.0, max: 1.0 };
        let text = render_score_summary(&s);
        assert!(text.contains("With keyword matches: 1 (25.0%)"));
        assert!(text.contains("mean=0.250"));
    }
}
