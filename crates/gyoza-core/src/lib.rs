//! gyoza-core: a query-to-code compiler for acyclic conjunctive join
//! queries over the Join Order Benchmark schema.
//!
//! The pipeline is `SQL text -> AST -> IR per alias -> hypergraph ->
//! planner -> semi-join program -> program context -> emitter -> source
//! text`. Each stage is usable on its own; [`compile_query`] wires them
//! together the way the CLI driver does.

pub mod catalog;
pub mod context;
pub mod emitter;
pub mod error;
pub mod expected;
pub mod ir;
pub mod parser;
pub mod planner;
pub mod program;
pub mod stats;
pub mod types;
pub mod union_find;

// Re-export the main types and entry points.
pub use catalog::Catalog;
pub use context::{Field, PhysicalJoin, ProgramContext};
pub use emitter::{emit_query, Shape};
pub use error::CompileError;
pub use expected::{parse_expected, Cell, ExpectedResults};
pub use ir::build_query_ir;
pub use parser::parse_sql;
pub use planner::{decide_join_tree, Plan};
pub use program::{Level, MergedSemiJoin, ParentChildColumns, SemiJoin, SemiJoinProgram};
pub use stats::Statistics;
pub use types::{
    Attribute, ColumnMeta, ColumnType, FilterNode, ForeignRef, JoinCond, KeyKind, QueryIr,
    Relation, SelectedColumn, TableInfo,
};
pub use union_find::UnionFind;

use tracing::info;

/// The artifacts of one successful compilation.
#[derive(Debug, Clone)]
pub struct Compiled {
    /// Per-alias IR, serializable to the persisted JSON format.
    pub ir: QueryIr,
    /// The decided join tree.
    pub plan: Plan,
    /// The emitted standalone source file.
    pub source: String,
}

/// Compile one query end to end.
///
/// `expected` is the whole expected-results catalog; the entry matching
/// `name`, when present, is embedded as a self-check test in the emitted
/// file.
pub fn compile_query(
    name: &str,
    sql: &str,
    stats: &Statistics,
    catalog: &Catalog,
    expected: Option<&ExpectedResults>,
) -> Result<Compiled, CompileError> {
    let statements = parse_sql(sql)?;
    let ir = build_query_ir(&statements, stats, catalog)?;
    let plan = decide_join_tree(&ir)?;
    let ctx = ProgramContext::build(&ir, &plan)?;
    let expected_cells = expected.and_then(|catalog| catalog.get(name));
    let source = emit_query(name, &ir, &plan, &ctx, expected_cells)?;
    info!(
        query = name,
        relations = ir.tables.len(),
        root = %plan.root.alias,
        "query compiled"
    );
    Ok(Compiled { ir, plan, source })
}

#[cfg(test)]
pub mod test_utils;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{job_catalog, job_stats};

    #[test]
    fn compile_query_produces_ir_and_source() {
        let compiled = compile_query(
            "1a",
            "SELECT MIN(t.title) FROM title t, kind_type kt \
             WHERE t.kind_id = kt.id AND kt.kind = 'movie'",
            &job_stats(&[("q1a_title", 50), ("q1a_kind_type", 1)]),
            &job_catalog(),
            None,
        )
        .unwrap();
        assert_eq!(compiled.ir.tables.len(), 2);
        assert_eq!(compiled.plan.root.alias, "t");
        assert!(compiled.source.contains("pub fn q1a"));
        let json = compiled.ir.to_json().unwrap();
        assert!(json.contains("\"relation_name\": \"kind_type\""));
    }

    #[test]
    fn failures_carry_their_kind() {
        let err = compile_query(
            "2z",
            "SELECT MIN(t.title) FROM title t",
            &job_stats(&[]),
            &job_catalog(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::MissingStatistic { .. }));
    }
}
