//! Per-relation cardinality statistics.
//!
//! The statistics file is a JSON object carrying
//! `"Aggregation Stats"."relationSizes"`, a map from stats key to the
//! relation's row count after local filters. Keys embed the query identifier
//! and the physical table name, sometimes with a trailing numeric suffix
//! matching the alias (e.g. `q20a_comp_cast_type1`).

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct StatsFile {
    #[serde(rename = "Aggregation Stats")]
    aggregation: AggregationStats,
}

#[derive(Debug, Deserialize)]
struct AggregationStats {
    #[serde(rename = "relationSizes")]
    relation_sizes: BTreeMap<String, u64>,
}

/// Post-filter relation sizes for one query, keyed by stats key.
///
/// Keys are held sorted so resolution is deterministic regardless of the
/// order in the source file.
#[derive(Debug, Clone)]
pub struct Statistics {
    sizes: BTreeMap<String, u64>,
}

impl Statistics {
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        let file: StatsFile = serde_json::from_str(text)?;
        Ok(Self {
            sizes: file.aggregation.relation_sizes,
        })
    }

    pub fn from_sizes(sizes: BTreeMap<String, u64>) -> Self {
        Self { sizes }
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Resolve the size for a table reference.
    ///
    /// Preference order:
    /// 1. a query-scoped key `q<digits><letter>_<table><suffix>` whose tail
    ///    matches the alias's trailing digits (empty suffix when the alias
    ///    has none);
    /// 2. the longest key containing the table name. Longest-match avoids
    ///    collisions between similarly named tables (`info_type` vs
    ///    `movie_info_type`); ties go to the lexicographically smallest key.
    pub fn resolve(&self, table: &str, alias: &str) -> Option<u64> {
        static SCOPED_KEY: OnceLock<Regex> = OnceLock::new();
        let scoped = SCOPED_KEY
            .get_or_init(|| Regex::new(r"^q\d+[a-z]_(.+)$").expect("invalid stats key pattern"));

        let suffix = alias_numeric_suffix(alias);
        let scoped_tail = format!("{table}{suffix}");
        for (key, &size) in &self.sizes {
            if let Some(caps) = scoped.captures(key) {
                if &caps[1] == scoped_tail.as_str() {
                    return Some(size);
                }
            }
        }

        let mut best: Option<(&str, u64)> = None;
        for (key, &size) in &self.sizes {
            if !key.contains(table) {
                continue;
            }
            match best {
                Some((best_key, _)) if key.len() <= best_key.len() => {}
                _ => best = Some((key, size)),
            }
        }
        best.map(|(_, size)| size)
    }
}

/// Trailing digits of an alias (`cct1` -> `"1"`, `mk` -> `""`).
fn alias_numeric_suffix(alias: &str) -> &str {
    let split = alias
        .rfind(|c: char| !c.is_ascii_digit())
        .map_or(0, |i| i + 1);
    &alias[split..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn stats(entries: &[(&str, u64)]) -> Statistics {
        Statistics::from_sizes(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        )
    }

    #[test]
    fn parses_the_aggregation_stats_shape() {
        let text = r#"{
            "Aggregation Stats": {
                "relationSizes": {"q1a_title": 100, "q1a_kind_type": 1}
            }
        }"#;
        let stats = Statistics::from_json_str(text).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats.resolve("title", "t"), Some(100));
    }

    #[test]
    fn scoped_key_beats_longest_match() {
        let stats = stats(&[
            ("q2a_movie_info_type", 500),
            ("q2a_info_type", 7),
        ]);
        // Without scoping, longest-match would pick movie_info_type.
        assert_eq!(stats.resolve("info_type", "it"), Some(7));
    }

    #[test]
    fn alias_suffix_selects_the_scoped_occurrence() {
        let stats = stats(&[
            ("q20a_comp_cast_type1", 1),
            ("q20a_comp_cast_type2", 2),
        ]);
        assert_eq!(stats.resolve("comp_cast_type", "cct1"), Some(1));
        assert_eq!(stats.resolve("comp_cast_type", "cct2"), Some(2));
    }

    #[test]
    fn falls_back_to_longest_containing_key() {
        let stats = stats(&[
            ("SomeStageQuery1a.title.final", 33),
            ("title", 11),
        ]);
        assert_eq!(stats.resolve("title", "t"), Some(33));
    }

    #[test]
    fn unresolvable_table_is_none() {
        let stats = stats(&[("q1a_title", 100)]);
        assert_eq!(stats.resolve("keyword", "k"), None);
    }

    #[rstest]
    #[case("cct1", "1")]
    #[case("mi_idx2", "2")]
    #[case("mk", "")]
    #[case("t12", "12")]
    fn suffix_extraction(#[case] alias: &str, #[case] suffix: &str) {
        assert_eq!(alias_numeric_suffix(alias), suffix);
    }
}
