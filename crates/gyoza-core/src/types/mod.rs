//! Core data model: filter trees, per-alias IR records, hyperedges.

mod filter;
mod relation;
mod table;

pub use filter::{FilterNode, FilterRhs};
pub use relation::{Attribute, Relation};
pub use table::{
    ColumnMeta, ColumnType, ForeignRef, JoinCond, KeyKind, QueryIr, SelectedColumn, TableInfo,
};
