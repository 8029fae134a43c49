//! Error types for query compilation.
//!
//! Every failure carries a precise kind plus the context an operator needs to
//! diagnose the offending query (alias, table, filter subtree). Within a
//! batch, a failed query aborts only itself; the driver keeps going and
//! reports a tally at the end.

use thiserror::Error;

/// Fatal error raised while compiling a single query.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    /// The SQL text could not be parsed, or the statement shape is not a
    /// plain aggregate SELECT over a flat table list.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// No statistics key resolves for a table reference.
    #[error("no statistics entry resolves for table '{table}' (alias '{alias}')")]
    MissingStatistic { table: String, alias: String },

    /// The schema catalog has no entry for a referenced table or column.
    #[error("schema catalog lookup failed for '{item}' (alias '{alias}')")]
    SchemaLookup { alias: String, item: String },

    /// Ear removal accepted a pair with no equated attribute between them.
    /// This is a planner sanity violation, not a user error.
    #[error("ear '{ear}' accepted under parent '{parent}' but no attribute pair joins them")]
    UnjoinableEar { ear: String, parent: String },

    /// The hypergraph never reduced to a single component, or the finished
    /// program does not cover every alias of the query.
    #[error("query is not acyclic: {reason}")]
    NonAcyclicQuery { reason: String },

    /// A filter subtree uses an operator outside the supported set.
    #[error("unsupported filter operator '{operator}' in {subtree}")]
    UnsupportedFilter { operator: String, subtree: String },

    /// The emitter could not find a physical path from the root to a
    /// selected column on a distant ear.
    #[error("cannot reach selected column '{column}' on alias '{alias}' from the root")]
    UnsupportedShape { alias: String, column: String },
}

impl CompileError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

impl From<sqlparser::parser::ParserError> for CompileError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        Self::Parse {
            message: err.to_string(),
        }
    }
}
