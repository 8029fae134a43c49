//! Hypergraph vertices and edges.

use super::TableInfo;

/// One occurrence of a join column on one relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attribute {
    pub column: String,
    pub alias: String,
}

impl Attribute {
    pub fn new(column: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            alias: alias.into(),
        }
    }
}

/// A hyperedge: one aliased table reference together with its join columns
/// (only the columns that participate in some join edge) and its post-filter
/// cardinality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relation {
    pub alias: String,
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub size: u64,
}

impl Relation {
    /// Build the hyperedge for an IR record. Join columns are deduplicated
    /// but keep their first-seen order.
    pub fn from_table(info: &TableInfo) -> Self {
        let mut attributes: Vec<Attribute> = Vec::new();
        for jc in &info.join_cond {
            if !attributes.iter().any(|a| a.column == jc.local_column) {
                attributes.push(Attribute::new(jc.local_column.clone(), info.alias.clone()));
            }
        }
        Self {
            alias: info.alias.clone(),
            name: info.relation_name.clone(),
            attributes,
            size: info.size_after_filters,
        }
    }

    pub fn carries(&self, column: &str) -> bool {
        self.attributes.iter().any(|a| a.column == column)
    }
}
