use clap::ValueEnum;
use std::collections::BTreeMap;
use tracing::info;

use crate::models::TextUnit;
use crate::taxonomy::{fold, KeywordTaxonomy};

/* ---------------------------- Lemmatize ---------------------------- */

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LemmatizeReport {
    pub replaced: usize,
    /// (surface form, base keyword) -> count
    pub changes: BTreeMap<(String, String), usize>,
}

impl LemmatizeReport {
    /// Most frequent rewrites first.
    pub fn top_changes(&self, n: usize) -> Vec<(&(String, String), usize)> {
        let mut all: Vec<_> = self.changes.iter().map(|(k, c)| (k, *c)).collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        all.truncate(n);
        all
    }
}

/// Replace every occurrence with its base keyword. Unknown keywords stay.
pub fn lemmatize(units: &mut [TextUnit], taxonomy: &KeywordTaxonomy) -> LemmatizeReport {
    let mut report = LemmatizeReport::default();
    for unit in units.iter_mut() {
        let Some(keywords) = unit.keywords.as_mut() else { continue };
        for kw in keywords.iter_mut() {
            let Some(base) = taxonomy.base_of(kw) else { continue };
            if base != kw.as_str() {
                *report.changes.entry((kw.clone(), base.to_string())).or_default() += 1;
            }
            report.replaced += 1;
            *kw = base.to_string();
        }
    }
    info!(
        "Lemmatization completed - replaced={}, distinct_changes={}",
        report.replaced,
        report.changes.len()
    );
    report
}

/* ---------------------------- Neutralize ---------------------------- */

/// Force a zero score on every unit that contains one of `keywords`.
/// Returns the number of units changed.
pub fn neutralize<S: AsRef<str>>(units: &mut [TextUnit], keywords: &[S]) -> usize {
    let mut updated = 0;
    for unit in units.iter_mut() {
        let hit = unit
            .keywords
            .as_ref()
            .is_some_and(|kws| kws.iter().any(|k| keywords.iter().any(|n| n.as_ref() == k)));
        if hit {
            unit.embedded_speculative = Some(0.0);
            updated += 1;
        }
    }
    info!("Neutralization completed - updated={}", updated);
    updated
}

/* ---------------------------- Occurrences ---------------------------- */

/// Case-insensitive count of `keyword` in the unit's occurrence list.
pub fn occurrence_count(unit: &TextUnit, keyword: &str) -> usize {
    let target = fold(keyword);
    unit.occurrences().iter().filter(|k| fold(k) == target).count()
}

/// Units in which `keyword` occurs exactly `n` times.
pub fn filter_by_occurrence<'a>(units: &'a [TextUnit], keyword: &str, n: usize) -> Vec<&'a TextUnit> {
    units.iter().filter(|u| occurrence_count(u, keyword) == n).collect()
}

/* ---------------------------- Axis flip ---------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Axis {
    #[value(name = "umap_x")]
    UmapX,
    #[value(name = "umap_y")]
    UmapY,
    X,
    Y,
    Z,
}

/// Negate one coordinate field on every unit that has it.
pub fn flip_axis(units: &mut [TextUnit], axis: Axis) -> usize {
    let mut flipped = 0;
    for u in units.iter_mut() {
        let slot = match axis {
            Axis::UmapX => &mut u.umap_x,
            Axis::UmapY => &mut u.umap_y,
            Axis::X => &mut u.x,
            Axis::Y => &mut u.y,
            Axis::Z => &mut u.z,
        };
        if let Some(v) = slot.as_mut() {
            *v = -*v;
            flipped += 1;
        }
    }
    info!("Axis flipped - axis={:?}, flipped={}", axis, flipped);
    flipped
}
