//! Per-alias IR records, as persisted in the intermediate JSON.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::FilterNode;

/// Primary- or foreign-key annotation on a join column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    #[serde(rename = "PK")]
    Pk,
    #[serde(rename = "FK")]
    Fk,
}

/// Coarse column typing as seen by the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    #[serde(rename = "type")]
    pub ty: ColumnType,
    pub nullable: bool,
}

/// The far side of a join edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignRef {
    pub alias: String,
    pub column: String,
    pub key: Option<KeyKind>,
}

/// One equi-join edge recorded on the local side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCond {
    pub local_column: String,
    pub key: Option<KeyKind>,
    pub foreign: ForeignRef,
}

/// Everything the planner and emitter need to know about one aliased table
/// reference: post-filter cardinality, local filters, join edges, selected
/// aggregate columns, and the referenced columns' physical metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub relation_name: String,
    pub alias: String,
    pub size_after_filters: u64,
    pub filters: Option<FilterNode>,
    pub join_cond: Vec<JoinCond>,
    pub min_select: Vec<String>,
    pub columns: BTreeMap<String, ColumnMeta>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.get(name)
    }

    /// Join edge toward the given alias, if any.
    pub fn join_to(&self, alias: &str) -> Option<&JoinCond> {
        self.join_cond.iter().find(|jc| jc.foreign.alias == alias)
    }
}

/// One aggregated projection cell, in query order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedColumn {
    pub alias: String,
    pub column: String,
}

/// The full IR for one query: alias records in FROM-clause order, plus the
/// projection order of the aggregated columns.
///
/// Only the alias map is persisted ([`QueryIr::to_json`]); the projection
/// order drives the emitted result tuple and the self-check assertion.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryIr {
    pub tables: IndexMap<String, TableInfo>,
    pub select_order: Vec<SelectedColumn>,
}

impl QueryIr {
    pub fn table(&self, alias: &str) -> Option<&TableInfo> {
        self.tables.get(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Serialize the persisted part of the IR (alias -> record) as pretty
    /// JSON. Alias order follows the FROM clause; column maps are sorted by
    /// name, so two compilations of the same query produce identical bytes.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.tables)
    }
}
