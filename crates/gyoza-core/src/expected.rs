//! Expected-result catalog.
//!
//! A JSON map from query name to the expected result cells (or null for
//! queries whose result set is empty). When an entry exists, the emitter
//! embeds a self-check test into the generated file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One result cell: a numeric or string literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
}

pub type ExpectedResults = BTreeMap<String, Option<Vec<Cell>>>;

pub fn parse_expected(text: &str) -> serde_json::Result<ExpectedResults> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_cells_and_nulls() {
        let text = r#"{
            "1a": ["Shrek", 2001],
            "2b": null,
            "3c": ["x"]
        }"#;
        let expected = parse_expected(text).unwrap();
        assert_eq!(
            expected["1a"],
            Some(vec![Cell::Text("Shrek".to_string()), Cell::Int(2001)])
        );
        assert_eq!(expected["2b"], None);
        assert_eq!(expected["3c"], Some(vec![Cell::Text("x".to_string())]));
    }
}
