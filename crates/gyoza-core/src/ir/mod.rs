//! IR builder: parsed SQL + statistics + schema catalog -> per-alias
//! [`TableInfo`] records.
//!
//! The builder walks one aggregate SELECT over a flat table list, splits the
//! WHERE conjunction into per-alias filters and annotated join edges, and
//! resolves each table's post-filter cardinality from the statistics.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, JoinConstraint,
    JoinOperator, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
    UnaryOperator,
};
use tracing::{debug, trace};

use crate::catalog::Catalog;
use crate::error::CompileError;
use crate::stats::Statistics;
use crate::types::{
    ColumnMeta, FilterNode, ForeignRef, JoinCond, KeyKind, QueryIr, SelectedColumn, TableInfo,
};

/// Build the IR for the first statement in `statements`.
pub fn build_query_ir(
    statements: &[Statement],
    stats: &Statistics,
    catalog: &Catalog,
) -> Result<QueryIr, CompileError> {
    IrBuilder::new(stats, catalog).build(statements)
}

struct IrBuilder<'a> {
    stats: &'a Statistics,
    catalog: &'a Catalog,
    /// alias -> physical table name, in FROM-clause order
    tables: IndexMap<String, String>,
}

impl<'a> IrBuilder<'a> {
    fn new(stats: &'a Statistics, catalog: &'a Catalog) -> Self {
        Self {
            stats,
            catalog,
            tables: IndexMap::new(),
        }
    }

    fn build(mut self, statements: &[Statement]) -> Result<QueryIr, CompileError> {
        let select = select_of(statements)?;

        let mut join_on_conditions: Vec<Expr> = Vec::new();
        for table_with_joins in &select.from {
            self.collect_tables(table_with_joins, &mut join_on_conditions)?;
        }
        if self.tables.is_empty() {
            return Err(CompileError::parse("query references no tables"));
        }
        for (alias, table) in &self.tables {
            if !self.catalog.has_table(table) {
                return Err(CompileError::SchemaLookup {
                    alias: alias.clone(),
                    item: table.clone(),
                });
            }
        }

        let select_order = self.collect_projections(select)?;

        let mut conditions: Vec<(Expr, BTreeSet<String>)> = Vec::new();
        let mut atoms: Vec<Expr> = join_on_conditions;
        if let Some(where_clause) = &select.selection {
            flatten_conjuncts(where_clause, &mut atoms);
        }
        for atom in atoms {
            let aliases = self.condition_aliases(&atom)?;
            conditions.push((atom, aliases));
        }
        debug!(
            tables = self.tables.len(),
            conditions = conditions.len(),
            "collected query shape"
        );

        let mut tables: IndexMap<String, TableInfo> = IndexMap::new();
        for (alias, table) in self.tables.clone() {
            let info =
                self.build_table_info(&alias, &table, &conditions, &select_order)?;
            tables.insert(alias, info);
        }

        Ok(QueryIr {
            tables,
            select_order,
        })
    }

    fn collect_tables(
        &mut self,
        table_with_joins: &TableWithJoins,
        join_on_conditions: &mut Vec<Expr>,
    ) -> Result<(), CompileError> {
        self.register_table(&table_with_joins.relation)?;
        for join in &table_with_joins.joins {
            self.register_table(&join.relation)?;
            // Explicit INNER JOIN ... ON conditions are treated exactly like
            // WHERE conjuncts; JOB queries use the comma-list style but the
            // two spellings are equivalent here.
            if let JoinOperator::Join(JoinConstraint::On(expr))
            | JoinOperator::Inner(JoinConstraint::On(expr)) = &join.join_operator
            {
                flatten_conjuncts(expr, join_on_conditions);
            }
        }
        Ok(())
    }

    fn register_table(&mut self, factor: &TableFactor) -> Result<(), CompileError> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let table = table_simple_name(&name.to_string());
                let alias = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| table.clone());
                self.tables.insert(alias, table);
                Ok(())
            }
            other => Err(CompileError::parse(format!(
                "unsupported table factor: {other}"
            ))),
        }
    }

    /// Record every `AGG(alias.col)` projection, deduplicated, in query
    /// order. `COUNT(*)` contributes no selected column.
    fn collect_projections(
        &self,
        select: &Select,
    ) -> Result<Vec<SelectedColumn>, CompileError> {
        let mut order: Vec<SelectedColumn> = Vec::new();
        for item in &select.projection {
            let expr = match item {
                SelectItem::UnnamedExpr(expr) => expr,
                SelectItem::ExprWithAlias { expr, .. } => expr,
                other => {
                    return Err(CompileError::parse(format!(
                        "unsupported projection item: {other}"
                    )))
                }
            };
            if let Some((alias, column)) = self.parse_aggregate(expr)? {
                let selected = SelectedColumn { alias, column };
                if !order.contains(&selected) {
                    order.push(selected);
                }
            }
        }
        Ok(order)
    }

    fn parse_aggregate(&self, expr: &Expr) -> Result<Option<(String, String)>, CompileError> {
        let Expr::Function(function) = expr else {
            return Err(CompileError::parse(format!(
                "unsupported projection expression: {expr}"
            )));
        };
        let name = function.name.to_string().to_uppercase();
        if !matches!(name.as_str(), "MIN" | "MAX" | "COUNT" | "SUM" | "AVG") {
            return Err(CompileError::parse(format!(
                "unsupported aggregate function: {name}"
            )));
        }
        let FunctionArguments::List(arg_list) = &function.args else {
            return Err(CompileError::parse(format!(
                "aggregate {name} has no argument list"
            )));
        };
        match arg_list.args.first() {
            Some(FunctionArg::Unnamed(FunctionArgExpr::Expr(arg))) => {
                let (qualifier, column) = column_parts(arg).ok_or_else(|| {
                    CompileError::parse(format!("aggregate argument is not a column: {arg}"))
                })?;
                let alias = self.resolve_alias(qualifier.as_deref(), &column)?;
                Ok(Some((alias, column)))
            }
            Some(FunctionArg::Unnamed(FunctionArgExpr::Wildcard)) => Ok(None),
            _ => Err(CompileError::parse(format!(
                "unsupported aggregate argument in {name}"
            ))),
        }
    }

    /// Aliases referenced by a condition's column occurrences.
    fn condition_aliases(&self, expr: &Expr) -> Result<BTreeSet<String>, CompileError> {
        let mut refs = Vec::new();
        collect_column_refs(expr, &mut refs);
        let mut aliases = BTreeSet::new();
        for (qualifier, column) in refs {
            aliases.insert(self.resolve_alias(qualifier.as_deref(), &column)?);
        }
        Ok(aliases)
    }

    /// Resolve a column qualifier to a query alias. Unqualified columns are
    /// accepted only when ownership is unambiguous.
    fn resolve_alias(
        &self,
        qualifier: Option<&str>,
        column: &str,
    ) -> Result<String, CompileError> {
        if let Some(qualifier) = qualifier {
            if self.tables.contains_key(qualifier) {
                return Ok(qualifier.to_string());
            }
            return Err(CompileError::parse(format!(
                "unknown alias '{qualifier}' in column reference {qualifier}.{column}"
            )));
        }
        let owners: Vec<&String> = self
            .tables
            .iter()
            .filter(|(_, table)| self.catalog.column(table, column).is_some())
            .map(|(alias, _)| alias)
            .collect();
        match owners.as_slice() {
            [alias] => Ok((*alias).clone()),
            [] => Err(CompileError::parse(format!(
                "column '{column}' does not belong to any table in the query"
            ))),
            _ => Err(CompileError::parse(format!(
                "ambiguous unqualified column '{column}'"
            ))),
        }
    }

    fn build_table_info(
        &self,
        alias: &str,
        table: &str,
        conditions: &[(Expr, BTreeSet<String>)],
        select_order: &[SelectedColumn],
    ) -> Result<TableInfo, CompileError> {
        let size_after_filters = self.stats.resolve(table, alias).ok_or_else(|| {
            CompileError::MissingStatistic {
                table: table.to_string(),
                alias: alias.to_string(),
            }
        })?;

        let mut filters: Vec<FilterNode> = Vec::new();
        let mut join_cond: Vec<JoinCond> = Vec::new();
        for (expr, aliases) in conditions {
            if aliases.len() == 1 && aliases.contains(alias) {
                filters.push(expr_to_filter_node(expr)?);
            } else if aliases.len() > 1 && aliases.contains(alias) {
                if let Some(jc) = self.join_edge_for(alias, expr)? {
                    join_cond.push(jc);
                } else {
                    trace!(%expr, alias, "ignoring non-equality multi-alias condition");
                }
            }
        }

        let min_select: Vec<String> = select_order
            .iter()
            .filter(|s| s.alias == alias)
            .map(|s| s.column.clone())
            .collect();

        let mut referenced: Vec<String> = Vec::new();
        let mut filter_refs = Vec::new();
        for (expr, aliases) in conditions {
            if aliases.len() == 1 && aliases.contains(alias) {
                collect_column_refs(expr, &mut filter_refs);
            }
        }
        for (_, column) in &filter_refs {
            referenced.push(column.clone());
        }
        for jc in &join_cond {
            referenced.push(jc.local_column.clone());
        }
        referenced.extend(min_select.iter().cloned());

        let mut columns: BTreeMap<String, ColumnMeta> = BTreeMap::new();
        for column in referenced {
            let meta = self.catalog.column(table, &column).ok_or_else(|| {
                CompileError::SchemaLookup {
                    alias: alias.to_string(),
                    item: format!("{table}.{column}"),
                }
            })?;
            columns.insert(column, *meta);
        }

        Ok(TableInfo {
            relation_name: table.to_string(),
            alias: alias.to_string(),
            size_after_filters,
            filters: FilterNode::and_chain(filters),
            join_cond,
            min_select,
            columns,
        })
    }

    /// Interpret an equality between columns of two aliases as a join edge
    /// seen from `alias`, with PK/FK annotations from the catalog.
    fn join_edge_for(
        &self,
        alias: &str,
        expr: &Expr,
    ) -> Result<Option<JoinCond>, CompileError> {
        let Expr::BinaryOp { left, op, right } = expr else {
            return Ok(None);
        };
        if *op != BinaryOperator::Eq {
            return Ok(None);
        }
        let (Some((lq, lcol)), Some((rq, rcol))) = (column_parts(left), column_parts(right))
        else {
            return Ok(None);
        };
        let left_alias = self.resolve_alias(lq.as_deref(), &lcol)?;
        let right_alias = self.resolve_alias(rq.as_deref(), &rcol)?;
        let (local_column, foreign_alias, foreign_column) = if left_alias == alias {
            (lcol, right_alias, rcol)
        } else if right_alias == alias {
            (rcol, left_alias, lcol)
        } else {
            return Ok(None);
        };

        let local_table = &self.tables[alias];
        let foreign_table = &self.tables[&foreign_alias];
        Ok(Some(JoinCond {
            key: self.key_of(local_table, &local_column),
            local_column,
            foreign: ForeignRef {
                key: self.key_of(foreign_table, &foreign_column),
                alias: foreign_alias,
                column: foreign_column,
            },
        }))
    }

    fn key_of(&self, table: &str, column: &str) -> Option<KeyKind> {
        if self.catalog.primary_key(table) == Some(column) {
            Some(KeyKind::Pk)
        } else if self.catalog.foreign_key(table, column).is_some() {
            Some(KeyKind::Fk)
        } else {
            None
        }
    }
}

fn select_of(statements: &[Statement]) -> Result<&Select, CompileError> {
    let Some(Statement::Query(query)) = statements.first() else {
        return Err(CompileError::parse("expected a SELECT statement"));
    };
    match &*query.body {
        SetExpr::Select(select) => Ok(select),
        other => Err(CompileError::parse(format!(
            "unsupported query body: {other}"
        ))),
    }
}

/// Break a chain of ANDs (possibly parenthesized) into atomic conjuncts.
fn flatten_conjuncts(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            flatten_conjuncts(left, out);
            flatten_conjuncts(right, out);
        }
        Expr::Nested(inner) => flatten_conjuncts(inner, out),
        other => out.push(other.clone()),
    }
}

/// `(qualifier, column)` when the expression is a plain column reference.
fn column_parts(expr: &Expr) -> Option<(Option<String>, String)> {
    match expr {
        Expr::Identifier(ident) => Some((None, ident.value.clone())),
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
            let column = parts.last()?.value.clone();
            let qualifier = parts[..parts.len() - 1]
                .iter()
                .map(|i| i.value.as_str())
                .collect::<Vec<_>>()
                .join(".");
            Some((Some(qualifier), column))
        }
        Expr::Nested(inner) => column_parts(inner),
        _ => None,
    }
}

fn collect_column_refs(expr: &Expr, refs: &mut Vec<(Option<String>, String)>) {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
            if let Some(parts) = column_parts(expr) {
                refs.push(parts);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_column_refs(left, refs);
            collect_column_refs(right, refs);
        }
        Expr::UnaryOp { expr, .. } => collect_column_refs(expr, refs),
        Expr::Nested(inner) => collect_column_refs(inner, refs),
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            collect_column_refs(expr, refs);
            collect_column_refs(pattern, refs);
        }
        Expr::InList { expr, list, .. } => {
            collect_column_refs(expr, refs);
            for item in list {
                collect_column_refs(item, refs);
            }
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            collect_column_refs(expr, refs);
            collect_column_refs(low, refs);
            collect_column_refs(high, refs);
        }
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => collect_column_refs(inner, refs),
        _ => {}
    }
}

/// Lower one atomic condition into the generic filter-tree shape.
///
/// `NOT` absorbs an immediate binary child into a `NOT <OP>` operator;
/// `BETWEEN` expands into two comparison atoms; everything else keeps its
/// operator token and renders leaves as their SQL text.
pub fn expr_to_filter_node(expr: &Expr) -> Result<FilterNode, CompileError> {
    match expr {
        Expr::Nested(inner) => expr_to_filter_node(inner),
        Expr::BinaryOp { left, op, right } => Ok(FilterNode::binary(
            binary_operator_token(op),
            expr_to_filter_node(left)?,
            expr_to_filter_node(right)?,
        )),
        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => Ok(FilterNode::binary(
            if *negated { "NOT LIKE" } else { "LIKE" },
            expr_to_filter_node(expr)?,
            expr_to_filter_node(pattern)?,
        )),
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let items = list
                .iter()
                .map(expr_to_filter_node)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FilterNode::in_list(
                expr_to_filter_node(expr)?,
                items,
                *negated,
            ))
        }
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => {
            let column = expr_to_filter_node(expr)?;
            let low = expr_to_filter_node(low)?;
            let high = expr_to_filter_node(high)?;
            if *negated {
                Ok(FilterNode::binary(
                    "OR",
                    FilterNode::binary("LT", column.clone(), low),
                    FilterNode::binary("GT", column, high),
                ))
            } else {
                Ok(FilterNode::binary(
                    "AND",
                    FilterNode::binary("GTE", column.clone(), low),
                    FilterNode::binary("LTE", column, high),
                ))
            }
        }
        Expr::IsNull(inner) => Ok(FilterNode::unary("IS NULL", expr_to_filter_node(inner)?)),
        Expr::IsNotNull(inner) => Ok(FilterNode::unary(
            "IS NOT NULL",
            expr_to_filter_node(inner)?,
        )),
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr,
        } => {
            let child = expr_to_filter_node(expr)?;
            match child {
                FilterNode::Branch {
                    operator,
                    left,
                    right: Some(right),
                } if is_binary_operator(&operator) => Ok(FilterNode::Branch {
                    operator: format!("NOT {operator}"),
                    left,
                    right: Some(right),
                }),
                other => Ok(FilterNode::unary("NOT", other)),
            }
        }
        leaf => Ok(FilterNode::leaf(leaf.to_string())),
    }
}

fn is_binary_operator(operator: &str) -> bool {
    matches!(
        operator,
        "EQ" | "NEQ" | "GT" | "LT" | "GTE" | "LTE" | "LIKE" | "IN"
    )
}

fn binary_operator_token(op: &BinaryOperator) -> String {
    match op {
        BinaryOperator::And => "AND".to_string(),
        BinaryOperator::Or => "OR".to_string(),
        BinaryOperator::Eq => "EQ".to_string(),
        BinaryOperator::NotEq => "NEQ".to_string(),
        BinaryOperator::Gt => "GT".to_string(),
        BinaryOperator::Lt => "LT".to_string(),
        BinaryOperator::GtEq => "GTE".to_string(),
        BinaryOperator::LtEq => "LTE".to_string(),
        other => format!("{other:?}").to_uppercase(),
    }
}

/// Last component of a possibly qualified table name, lowercased.
fn table_simple_name(name: &str) -> String {
    name.rsplit('.')
        .next()
        .unwrap_or(name)
        .trim_matches('"')
        .to_lowercase()
}
