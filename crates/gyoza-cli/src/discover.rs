//! Locating a query's statistics file by filename convention.
//!
//! Stats files are named like
//! `SomeRunQuery1aOptJoinTreeOptOrdering.<qualifier>.json`: the
//! second-to-last dot-token carries the query identifier between the last
//! `Query` marker and the `OptJoinTreeOptOrdering` sentinel.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const SENTINEL: &str = "OptJoinTreeOptOrdering";
const QUERY_MARKER: &str = "Query";

/// Find the stats file for `query_name` in `dir`, scanning filenames in
/// sorted order. Files that do not match the convention are ignored.
pub fn find_stats_file(dir: &Path, query_name: &str) -> Result<Option<PathBuf>> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list stats directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();

    for name in names {
        if let Some(found) = query_name_of(&name) {
            if found.eq_ignore_ascii_case(query_name) {
                return Ok(Some(dir.join(name)));
            }
        }
    }
    Ok(None)
}

/// Extract the query identifier encoded in a stats filename, if any.
fn query_name_of(file_name: &str) -> Option<&str> {
    let tokens: Vec<&str> = file_name.split('.').collect();
    if tokens.len() < 3 {
        return None;
    }
    let token = tokens[tokens.len() - 2];
    let sentinel_at = token.find(SENTINEL)?;
    let query_part = &token[..sentinel_at];
    let marker_at = query_part.rfind(QUERY_MARKER)?;
    Some(&query_part[marker_at + QUERY_MARKER.len()..])
}
