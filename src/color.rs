use anyhow::{Context, Result};
use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info};

use crate::models::{Color, TextUnit};
use crate::taxonomy::{fold, KeywordTaxonomy};

pub type Rgb = [u8; 3];

/// 32-bit string hash, `h = h * 31 + code_point` with wrap-around.
pub fn keyword_hash(s: &str) -> u32 {
    s.chars()
        .fold(0u32, |h, c| (h << 5).wrapping_sub(h).wrapping_add(c as u32))
}

/// (hue, saturation %, lightness %)
pub fn keyword_hsl(s: &str) -> (u32, u32, u32) {
    let h = keyword_hash(s);
    (h % 360, 70 + h % 30, 50 + h % 20)
}

fn hue_to_channel(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 0.5 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Hue in degrees, saturation and lightness in percent. Channels truncate.
pub fn hsl_to_rgb(h: f64, s: f64, l: f64) -> Rgb {
    let (s, l) = (s / 100.0, l / 100.0);
    let to_byte = |v: f64| (v * 255.0).clamp(0.0, 255.0) as u8;
    if s == 0.0 {
        let v = to_byte(l);
        return [v, v, v];
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    let h = h / 360.0;
    [
        to_byte(hue_to_channel(p, q, h + 1.0 / 3.0)),
        to_byte(hue_to_channel(p, q, h)),
        to_byte(hue_to_channel(p, q, h - 1.0 / 3.0)),
    ]
}

pub fn keyword_rgb(s: &str) -> Rgb {
    let (h, sat, l) = keyword_hsl(s);
    hsl_to_rgb(h as f64, sat as f64, l as f64)
}

pub fn to_hex(rgb: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/* ---------------------------- Color table ---------------------------- */

/// Keyword -> RGB, keyed by the keyword as written in the taxonomy.
/// Serialized as a plain `{keyword: [r, g, b]}` object in keyword order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColorTable {
    colors: BTreeMap<String, Rgb>,
    by_folded: HashMap<String, String>,
}

impl ColorTable {
    pub fn from_colors(colors: BTreeMap<String, Rgb>) -> Self {
        let mut by_folded = HashMap::with_capacity(colors.len());
        for k in colors.keys() {
            // exact spellings win over later case variants
            by_folded.entry(fold(k)).or_insert_with(|| k.clone());
        }
        Self { colors, by_folded }
    }

    pub fn generate<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let colors = keywords
            .into_iter()
            .map(|k| {
                let k = k.as_ref();
                (k.to_string(), keyword_rgb(k))
            })
            .collect();
        Self::from_colors(colors)
    }

    /// Every contextual key and every variant of every category.
    pub fn from_taxonomy(taxonomy: &KeywordTaxonomy) -> Self {
        Self::generate(taxonomy.color_keywords())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read color table {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse color table {}", path.display()))
    }

    /// Exact lookup, then case-insensitive.
    pub fn get(&self, keyword: &str) -> Option<Rgb> {
        if let Some(c) = self.colors.get(keyword) {
            return Some(*c);
        }
        self.by_folded
            .get(&fold(keyword))
            .and_then(|k| self.colors.get(k))
            .copied()
    }

    /// Lookup that also tries space / underscore / hyphen spellings.
    pub fn get_spelling(&self, keyword: &str) -> Option<Rgb> {
        let lower = keyword.trim().to_lowercase();
        [
            keyword.to_string(),
            lower.replace([' ', '-'], "_"),
            lower.replace('_', "-"),
            lower.replace('_', " "),
        ]
        .iter()
        .find_map(|k| self.get(k))
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Rgb)> {
        self.colors.iter()
    }
}

impl Serialize for ColorTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.colors.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ColorTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, Rgb>::deserialize(deserializer).map(Self::from_colors)
    }
}

/* ---------------------------- Painting ---------------------------- */

/// Most frequent occurrence; ties go to the lexicographically smallest.
pub fn dominant_keyword(occurrences: &[String]) -> Option<&str> {
    occurrences
        .iter()
        .counts_by(|s| s.as_str())
        .into_iter()
        .max_by(|(ka, ca), (kb, cb)| ca.cmp(cb).then_with(|| kb.cmp(ka)))
        .map(|(k, _)| k)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaintReport {
    pub painted: usize,
    pub not_found: usize,
    /// Units without any occurrence, left untouched.
    pub skipped: usize,
    pub colors_used: BTreeSet<String>,
}

/// Color every unit by its dominant keyword's base keyword.
pub fn assign_colors(units: &mut [TextUnit], taxonomy: &KeywordTaxonomy, table: &ColorTable) -> PaintReport {
    let mut report = PaintReport::default();
    for unit in units.iter_mut() {
        let occurrences = unit.occurrences();
        let Some(dominant) = dominant_keyword(&occurrences) else {
            report.skipped += 1;
            continue;
        };
        let Some(base) = taxonomy.base_of(dominant) else {
            report.not_found += 1;
            continue;
        };
        match table.get(base) {
            Some(rgb) => {
                unit.color = Some(Color::Rgb(rgb));
                report.painted += 1;
                report.colors_used.insert(base.to_string());
            }
            None => report.not_found += 1,
        }
    }
    info!(
        "Painting completed - painted={}, not_found={}, skipped={}, distinct_colors={}",
        report.painted,
        report.not_found,
        report.skipped,
        report.colors_used.len()
    );
    report
}

/// Lowercased keyword -> `#rrggbb` for every base keyword and variant.
/// Data keywords take the color of the first colored base keyword of their
/// category.
pub fn hex_keyword_map(taxonomy: &KeywordTaxonomy, table: &ColorTable) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut missing = 0usize;
    for group in taxonomy.groups() {
        let Some(rgb) = table.get_spelling(&group.base) else {
            missing += 1;
            continue;
        };
        let hex = to_hex(rgb);
        out.insert(group.base.trim().to_lowercase(), hex.clone());
        for v in &group.variants {
            out.insert(v.trim().to_lowercase(), hex.clone());
        }
    }

    for (kw, category) in taxonomy.data_categories() {
        let key = kw.trim().to_lowercase();
        if out.contains_key(&key) {
            continue;
        }
        let inherited = taxonomy
            .groups()
            .iter()
            .filter(|g| &g.category == category)
            .find_map(|g| table.get_spelling(&g.base));
        if let Some(rgb) = inherited {
            out.insert(key, to_hex(rgb));
        }
    }
    debug!("Hex keyword map built - entries={}, uncolored_bases={}", out.len(), missing);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::ConflictPolicy;
    use serde_json::json;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hash_and_hsl_known_values() {
        assert_eq!(keyword_hash(""), 0);
        assert_eq!(keyword_hash("a"), 97);
        assert_eq!(keyword_hash("ab"), 97 * 31 + 98);
        assert_eq!(keyword_hsl("a"), (97, 77, 67));
        // long inputs wrap instead of overflowing
        let long = "speculative design ".repeat(50);
        assert_eq!(keyword_hash(&long), keyword_hash(&long));
    }

    #[test]
    fn hsl_conversion_truncates() {
        assert_eq!(hsl_to_rgb(97.0, 77.0, 67.0), [155, 235, 106]);
        assert_eq!(hsl_to_rgb(0.0, 0.0, 50.0), [127, 127, 127]);
        assert_eq!(keyword_rgb("a"), [155, 235, 106]);
        assert_eq!(to_hex([155, 235, 106]), "#9beb6a");
    }

    #[test]
    fn table_is_deterministic_and_sorted() {
        let a = ColorTable::generate(["zeta", "alpha", "Mid"]);
        let b = ColorTable::generate(["Mid", "zeta", "alpha"]);
        assert_eq!(a, b);
        let text = serde_json::to_string(&a).unwrap();
        assert!(text.find("Mid").unwrap() < text.find("alpha").unwrap());
        assert!(text.find("alpha").unwrap() < text.find("zeta").unwrap());
        assert_eq!(a.get("mid"), a.get("Mid"));

        let back: ColorTable = serde_json::from_str(&text).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn dominant_keyword_breaks_ties_lexicographically() {
        assert_eq!(dominant_keyword(&strings(&["b", "a", "b", "a"])), Some("a"));
        assert_eq!(dominant_keyword(&strings(&["b", "a", "b"])), Some("b"));
        assert_eq!(dominant_keyword(&[]), None);
    }

    #[test]
    fn paint_maps_variants_to_base_colors() {
        let t = KeywordTaxonomy::from_value(
            &json!({"speculative_keywords": {"future": ["future", "futures"]}}),
            ConflictPolicy::FirstWins,
        )
        .unwrap();
        let table = ColorTable::from_taxonomy(&t);
        let mut units = vec![
            TextUnit { keywords: Some(strings(&["futures", "futures", "unknown"])), ..TextUnit::default() },
            TextUnit { keywords: Some(strings(&["unknown"])), ..TextUnit::default() },
            TextUnit::default(),
        ];
        let report = assign_colors(&mut units, &t, &table);
        assert_eq!(report.painted, 1);
        assert_eq!(report.not_found, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(units[0].color, Some(Color::Rgb(keyword_rgb("future"))));
        assert_eq!(units[1].color, None);
    }

    #[test]
    fn hex_map_covers_variants_and_data_categories() {
        let t = KeywordTaxonomy::from_value(
            &json!({
                "critique_keywords": {"power_structures": ["Power Structures"]},
                "data_keyword_categories": {"Dataset": "critique"}
            }),
            ConflictPolicy::FirstWins,
        )
        .unwrap();
        // only the spaced spelling has a color, the base must fall back to it
        let table = ColorTable::generate(["power structures"]);
        let map = hex_keyword_map(&t, &table);
        let hex = to_hex(keyword_rgb("power structures"));
        assert_eq!(map.get("power_structures"), Some(&hex));
        assert_eq!(map.get("power structures"), Some(&hex));
        assert_eq!(map.get("dataset"), Some(&hex));
    }
}
