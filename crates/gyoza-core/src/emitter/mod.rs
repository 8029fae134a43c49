//! Code emitter: walk the semi-join program bottom-up and render one Rust
//! source file that evaluates the query against the columnar runtime.
//!
//! Each non-root relation materializes as one variable shape — a scalar
//! join key, a set of keys, or a map from key to selected value(s) — and
//! the root drives a final minimizing loop. Substring searchers for LIKE
//! literals are hoisted, deduplicated, and declared before the wall-clock
//! start marker; the first loop begins after it.

mod filter;

pub use filter::{
    like_checks, parse_leaf, translate, Binding, Bindings, ColumnRef, Filter, LikeCheck, Literal,
    Operand,
};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::context::ProgramContext;
use crate::error::CompileError;
use crate::expected::Cell;
use crate::planner::Plan;
use crate::types::{Attribute, ColumnType, KeyKind, QueryIr, Relation, TableInfo};

use self::filter::rust_str_lit;

/// Runtime representation chosen for a relation's post-filter projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Post-filter cardinality 1: a scalar join key.
    Numeric,
    /// No selected aggregate: a set of join keys.
    Set,
    /// Selected aggregate behind a PK join column: key -> value.
    Map,
    /// Selected aggregate behind an FK join column: key -> values.
    MapVec,
    /// The root; nothing is materialized.
    NotNeed,
}

/// Mutable emitter context threaded through lowering: hoisted substring
/// searchers and import tracking.
#[derive(Debug, Default)]
pub struct EmitterState {
    finders: IndexMap<String, String>,
    uses_hashmap: bool,
    uses_hashset: bool,
}

impl EmitterState {
    /// Variable for the searcher over `literal`, allocating it on first use.
    pub fn finder(&mut self, literal: &str) -> String {
        if let Some(var) = self.finders.get(literal) {
            return var.clone();
        }
        let var = format!("finder{}", self.finders.len() + 1);
        self.finders.insert(literal.to_string(), var.clone());
        var
    }

    pub fn finders(&self) -> &IndexMap<String, String> {
        &self.finders
    }
}

/// Emit the standalone source file for one compiled query.
pub fn emit_query(
    name: &str,
    ir: &QueryIr,
    plan: &Plan,
    ctx: &ProgramContext,
    expected: Option<&Option<Vec<Cell>>>,
) -> Result<String, CompileError> {
    Emitter {
        name,
        ir,
        plan,
        ctx,
        expected,
        state: EmitterState::default(),
        shapes: IndexMap::new(),
    }
    .emit()
}

/// How early-exit is spelled in the surrounding construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Inside a `filter_map` closure: `?` and `return None`.
    Closure,
    /// Inside a `for` loop: `let .. else { continue; }` and `continue`.
    Loop,
}

struct ColumnBinding {
    column: String,
    var: String,
    ty: ColumnType,
    nullable: bool,
    required: bool,
}

struct Emitter<'a> {
    name: &'a str,
    ir: &'a QueryIr,
    plan: &'a Plan,
    ctx: &'a ProgramContext,
    expected: Option<&'a Option<Vec<Cell>>>,
    state: EmitterState,
    shapes: IndexMap<String, Shape>,
}

impl<'a> Emitter<'a> {
    fn emit(mut self) -> Result<String, CompileError> {
        if self.ctx.selected_fields.is_empty() {
            return Err(CompileError::parse("no aggregated columns to emit"));
        }
        self.decide_shapes();
        debug!(query = self.name, shapes = ?self.shapes, "emitting program");

        // Render the loops first: lowering discovers the substring
        // searchers that must be declared ahead of them.
        let mut body = String::new();
        let ears: Vec<Relation> = self
            .plan
            .program
            .ears()
            .into_iter()
            .cloned()
            .collect();
        for ear in &ears {
            body.push_str(&self.ear_block(ear)?);
            body.push('\n');
        }
        body.push_str(&self.root_block()?);

        let fn_name = fn_name(self.name);
        let tuple_ty = self.result_tuple_type();

        let mut out = String::new();
        out.push_str(&format!(
            "//! Generated by gyoza for query {}. Do not edit.\n\n",
            self.name
        ));
        let mut std_imports: Vec<&str> = Vec::new();
        if self.state.uses_hashmap {
            std_imports.push("HashMap");
        }
        if self.state.uses_hashset {
            std_imports.push("HashSet");
        }
        if !std_imports.is_empty() {
            out.push_str(&format!(
                "use std::collections::{{{}}};\n",
                std_imports.join(", ")
            ));
        }
        out.push_str("use std::time::Instant;\n\n");
        if !self.state.finders().is_empty() {
            out.push_str("use memchr::memmem::Finder;\n\n");
        }
        out.push_str("use crate::db::Db;\n\n");
        out.push_str(&format!(
            "pub fn {fn_name}(db: &Db) -> Option<{tuple_ty}> {{\n"
        ));
        for (literal, var) in self.state.finders() {
            out.push_str(&format!(
                "    let {var} = Finder::new({});\n",
                rust_str_lit(literal)
            ));
        }
        if !self.state.finders().is_empty() {
            out.push('\n');
        }
        out.push_str("    let started = Instant::now();\n\n");
        out.push_str(&body);
        out.push('\n');
        out.push_str(&format!(
            "    eprintln!(\"{fn_name} evaluated in {{:?}}\", started.elapsed());\n"
        ));
        out.push_str(&format!("    {}\n", self.result_expr()));
        out.push_str("}\n");

        if let Some(test) = self.self_check_test(&fn_name) {
            out.push('\n');
            out.push_str(&test);
        }
        Ok(out)
    }

    fn info(&self, alias: &str) -> &TableInfo {
        &self.ir.tables[alias]
    }

    fn decide_shapes(&mut self) {
        for entry in self.plan.program.entries() {
            for ear in &entry.ears {
                let info = self.info(&ear.alias);
                let shape = if info.min_select.is_empty() {
                    if info.size_after_filters == 1 {
                        Shape::Numeric
                    } else {
                        Shape::Set
                    }
                } else {
                    // The scalar shortcut would drop the aggregated column,
                    // so selected relations always materialize as maps.
                    match self.key_kind(&ear.alias) {
                        Some(KeyKind::Pk) => Shape::Map,
                        _ => Shape::MapVec,
                    }
                };
                self.shapes.insert(ear.alias.clone(), shape);
            }
        }
        self.shapes
            .insert(self.plan.root.alias.clone(), Shape::NotNeed);
    }

    /// Key annotation of an ear's join column toward its parent.
    fn key_kind(&self, alias: &str) -> Option<KeyKind> {
        let pair = self.plan.child_join_pair(alias)?;
        self.info(alias)
            .join_cond
            .iter()
            .find(|jc| jc.local_column == pair.child_column)
            .and_then(|jc| jc.key)
    }

    /// The variable an ear materializes into.
    fn var_name(&self, alias: &str) -> String {
        match self.shapes.get(alias) {
            Some(Shape::Numeric) => {
                let key = self
                    .plan
                    .child_join_pair(alias)
                    .map(|pair| pair.child_column.clone())
                    .unwrap_or_else(|| "id".to_string());
                format!("{alias}_{key}")
            }
            Some(Shape::Map) => format!("{alias}_m"),
            Some(Shape::MapVec) => format!("{alias}_mv"),
            _ => format!("{alias}_s"),
        }
    }

    /// Children of a relation in the join tree, in entry order.
    fn children_of(&self, alias: &str) -> Vec<&Relation> {
        self.plan
            .program
            .entries()
            .iter()
            .filter(|entry| entry.parent.alias == alias)
            .flat_map(|entry| entry.ears.iter())
            .collect()
    }

    /// Positive join predicate probing a materialized child from one of its
    /// parent's rows.
    fn child_predicate(
        &self,
        child: &str,
        probe: &ColumnBinding,
    ) -> Result<String, CompileError> {
        let var = self.var_name(child);
        let key = key_ref(&probe.var, probe.ty);
        Ok(match self.shapes.get(child) {
            Some(Shape::Numeric) => format!("{} == {var}", probe.var),
            Some(Shape::Set) => format!("{var}.contains({key})"),
            Some(Shape::Map) | Some(Shape::MapVec) => format!("{var}.contains_key({key})"),
            _ => {
                return Err(CompileError::UnsupportedShape {
                    alias: child.to_string(),
                    column: probe.column.clone(),
                })
            }
        })
    }

    /// Root column to probe a selected ear's map with: the physical parent
    /// column for direct children, otherwise any root join column equated
    /// with the ear's key by the attribute union-find.
    fn root_probe_column(&self, alias: &str) -> Result<String, CompileError> {
        let root = &self.plan.root.alias;
        if let Some(pair) = self
            .plan
            .parent_child_columns
            .iter()
            .find(|pc| &pc.parent_alias == root && pc.child_alias == alias)
        {
            return Ok(pair.parent_column.clone());
        }
        let key_pair = self.plan.child_join_pair(alias).ok_or_else(|| {
            CompileError::UnsupportedShape {
                alias: alias.to_string(),
                column: "<join key>".to_string(),
            }
        })?;
        let key_attr = Attribute::new(key_pair.child_column.clone(), alias.to_string());
        for attr in &self.plan.root.attributes {
            if self.plan.classes.connected(attr, &key_attr) {
                return Ok(attr.column.clone());
            }
        }
        let column = self
            .info(alias)
            .min_select
            .first()
            .cloned()
            .unwrap_or_else(|| key_pair.child_column.clone());
        Err(CompileError::UnsupportedShape {
            alias: alias.to_string(),
            column,
        })
    }

    /// Assemble the ordered, deduplicated column bindings for one relation's
    /// loop. Requiredness wins over filter-only use.
    fn bindings_for(
        &self,
        alias: &str,
        wanted: Vec<(String, bool)>,
    ) -> Result<Vec<ColumnBinding>, CompileError> {
        let info = self.info(alias);
        let mut bindings: Vec<ColumnBinding> = Vec::new();
        for (column, required) in wanted {
            if let Some(existing) = bindings.iter_mut().find(|b| b.column == column) {
                existing.required |= required;
                continue;
            }
            let meta = info
                .column(&column)
                .ok_or_else(|| CompileError::SchemaLookup {
                    alias: alias.to_string(),
                    item: format!("{}.{column}", info.relation_name),
                })?;
            bindings.push(ColumnBinding {
                var: column.clone(),
                column,
                ty: meta.ty,
                nullable: meta.nullable,
                required,
            });
        }
        Ok(bindings)
    }

    /// Columns referenced by the relation's filter tree, in first-use order.
    fn filter_columns(&self, info: &TableInfo) -> Vec<String> {
        let mut columns = Vec::new();
        if let Some(tree) = &info.filters {
            collect_filter_columns(tree, &mut columns);
        }
        columns
    }

    /// Lower the relation's filter tree against the given bindings.
    fn lowered_filter(
        &mut self,
        info: &TableInfo,
        bindings: &[ColumnBinding],
    ) -> Result<Option<String>, CompileError> {
        let Some(tree) = &info.filters else {
            return Ok(None);
        };
        let typed = translate(tree)?;
        let map: Bindings = bindings
            .iter()
            .map(|b| {
                (
                    b.column.clone(),
                    Binding {
                        var: b.var.clone(),
                        ty: b.ty,
                        optional: b.nullable && !b.required,
                    },
                )
            })
            .collect();
        filter::lower(&typed, &map, &mut self.state).map(Some)
    }

    /// All guard conditions of one relation's loop: local filters first,
    /// then one membership probe per materialized child.
    fn block_conditions(
        &mut self,
        alias: &str,
        bindings: &[ColumnBinding],
    ) -> Result<Vec<String>, CompileError> {
        let info = self.info(alias).clone();
        let mut conditions = Vec::new();
        if let Some(filter) = self.lowered_filter(&info, bindings)? {
            conditions.push(filter);
        }
        for child in self.children_of(alias).into_iter().cloned().collect::<Vec<_>>() {
            let pair = self
                .plan
                .columns_between(alias, &child.alias)
                .first()
                .map(|pc| pc.parent_column.clone())
                .ok_or_else(|| CompileError::UnjoinableEar {
                    ear: child.alias.clone(),
                    parent: alias.to_string(),
                })?;
            let probe = bindings
                .iter()
                .find(|b| b.column == pair)
                .ok_or_else(|| CompileError::SchemaLookup {
                    alias: alias.to_string(),
                    item: pair.clone(),
                })?;
            conditions.push(self.child_predicate(&child.alias, probe)?);
        }
        Ok(conditions)
    }

    /// The columns one relation's loop needs: its own join key (ears only),
    /// selected values, probes for its children, then filter columns.
    fn block_columns(&self, alias: &str, key: Option<&str>) -> Vec<(String, bool)> {
        let info = self.info(alias);
        let mut wanted: Vec<(String, bool)> = Vec::new();
        if let Some(key) = key {
            wanted.push((key.to_string(), true));
        }
        for column in &info.min_select {
            wanted.push((column.clone(), true));
        }
        for child in self.children_of(alias) {
            if let Some(pair) = self.plan.columns_between(alias, &child.alias).first() {
                wanted.push((pair.parent_column.clone(), true));
            }
        }
        for column in self.filter_columns(info) {
            wanted.push((column, false));
        }
        wanted
    }

    fn ear_block(&mut self, ear: &Relation) -> Result<String, CompileError> {
        let alias = ear.alias.clone();
        let shape = *self.shapes.get(&alias).unwrap_or(&Shape::Set);
        let key_column = self
            .plan
            .child_join_pair(&alias)
            .map(|pair| pair.child_column.clone())
            .ok_or_else(|| CompileError::UnjoinableEar {
                ear: alias.clone(),
                parent: self
                    .plan
                    .program
                    .parent_of(&alias)
                    .map(|p| p.alias.clone())
                    .unwrap_or_default(),
            })?;

        let wanted = self.block_columns(&alias, Some(&key_column));
        let bindings = self.bindings_for(&alias, wanted)?;
        let conditions = self.block_conditions(&alias, &bindings)?;

        match shape {
            Shape::Numeric => self.numeric_block(&alias, &key_column, &bindings, &conditions),
            Shape::Set => self.set_block(&alias, &key_column, &bindings, &conditions),
            Shape::Map => self.map_block(&alias, &key_column, &bindings, &conditions),
            Shape::MapVec => self.map_vec_block(&alias, &key_column, &bindings, &conditions),
            Shape::NotNeed => unreachable!("the root is never an ear"),
        }
    }

    /// Multi-line zip chain over the relation's columns.
    fn zip_chain(&self, alias: &str, bindings: &[ColumnBinding], indent: &str) -> String {
        let table = &self.info(alias).relation_name;
        let mut out = format!("db.{table}\n");
        out.push_str(&format!("{indent}.{}\n", bindings[0].column));
        out.push_str(&format!("{indent}.iter()\n"));
        for binding in &bindings[1..] {
            out.push_str(&format!(
                "{indent}.zip(db.{table}.{}.iter())\n",
                binding.column
            ));
        }
        out
    }

    fn closure_pattern(bindings: &[ColumnBinding]) -> String {
        bindings[1..]
            .iter()
            .fold(bindings[0].var.clone(), |acc, b| {
                format!("({acc}, {})", b.var)
            })
    }

    /// Normalization lines: deref numerics, borrow strings, unwrap required
    /// nullable columns via the flow's early exit.
    fn normalization_lines(bindings: &[ColumnBinding], flow: Flow, indent: &str) -> String {
        let mut out = String::new();
        for b in bindings {
            let line = match (b.ty, b.nullable, b.required) {
                (ColumnType::Numeric, false, _) => format!("let {v} = *{v};", v = b.var),
                (ColumnType::Numeric, true, true) => match flow {
                    Flow::Closure => format!("let {v} = (*{v})?;", v = b.var),
                    Flow::Loop => format!(
                        "let Some({v}) = *{v} else {{\n{indent}    continue;\n{indent}}};",
                        v = b.var
                    ),
                },
                (ColumnType::Numeric, true, false) => format!("let {v} = *{v};", v = b.var),
                (ColumnType::String, false, _) => {
                    format!("let {v} = {v}.as_str();", v = b.var)
                }
                (ColumnType::String, true, true) => match flow {
                    Flow::Closure => format!("let {v} = {v}.as_deref()?;", v = b.var),
                    Flow::Loop => format!(
                        "let Some({v}) = {v}.as_deref() else {{\n{indent}    continue;\n{indent}}};",
                        v = b.var
                    ),
                },
                (ColumnType::String, true, false) => {
                    format!("let {v} = {v}.as_deref();", v = b.var)
                }
            };
            out.push_str(indent);
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    fn guard_lines(conditions: &[String], flow: Flow, indent: &str) -> String {
        let exit = match flow {
            Flow::Closure => "return None;",
            Flow::Loop => "continue;",
        };
        let mut out = String::new();
        for condition in conditions {
            out.push_str(&format!(
                "{indent}if !({condition}) {{\n{indent}    {exit}\n{indent}}}\n"
            ));
        }
        out
    }

    fn numeric_block(
        &mut self,
        alias: &str,
        key: &str,
        bindings: &[ColumnBinding],
        conditions: &[String],
    ) -> Result<String, CompileError> {
        let var = self.var_name(alias);
        let info = self.info(alias);
        let key_meta = info.column(key);
        // A bare single-row relation with no guards collapses to a first().
        if conditions.is_empty()
            && bindings.len() == 1
            && key_meta.is_some_and(|m| !m.nullable)
        {
            return Ok(format!(
                "    let {var} = *db.{}.{key}.first()?;\n",
                info.relation_name
            ));
        }
        let mut out = format!("    let {var} = {}", self.zip_chain(alias, bindings, "        "));
        out.push_str(&format!(
            "        .find_map(|{}| {{\n",
            Self::closure_pattern(bindings)
        ));
        out.push_str(&Self::normalization_lines(bindings, Flow::Closure, "            "));
        out.push_str(&Self::guard_lines(conditions, Flow::Closure, "            "));
        out.push_str(&format!("            Some({key})\n"));
        out.push_str("        })?;\n");
        Ok(out)
    }

    fn set_block(
        &mut self,
        alias: &str,
        key: &str,
        bindings: &[ColumnBinding],
        conditions: &[String],
    ) -> Result<String, CompileError> {
        self.state.uses_hashset = true;
        let var = self.var_name(alias);
        let key_ty = rust_type(self.binding_ty(bindings, key));
        let mut out = format!(
            "    let {var}: HashSet<{key_ty}> = {}",
            self.zip_chain(alias, bindings, "        ")
        );
        out.push_str(&format!(
            "        .filter_map(|{}| {{\n",
            Self::closure_pattern(bindings)
        ));
        out.push_str(&Self::normalization_lines(bindings, Flow::Closure, "            "));
        out.push_str(&Self::guard_lines(conditions, Flow::Closure, "            "));
        out.push_str(&format!("            Some({key})\n"));
        out.push_str("        })\n");
        out.push_str("        .collect();\n");
        Ok(out)
    }

    fn map_block(
        &mut self,
        alias: &str,
        key: &str,
        bindings: &[ColumnBinding],
        conditions: &[String],
    ) -> Result<String, CompileError> {
        self.state.uses_hashmap = true;
        let var = self.var_name(alias);
        let info = self.info(alias).clone();
        let key_ty = rust_type(self.binding_ty(bindings, key));
        let value_ty = self.value_tuple_type(&info);
        let value_expr = value_tuple_expr(&info.min_select);
        let mut out = format!(
            "    let {var}: HashMap<{key_ty}, {value_ty}> = {}",
            self.zip_chain(alias, bindings, "        ")
        );
        out.push_str(&format!(
            "        .filter_map(|{}| {{\n",
            Self::closure_pattern(bindings)
        ));
        out.push_str(&Self::normalization_lines(bindings, Flow::Closure, "            "));
        out.push_str(&Self::guard_lines(conditions, Flow::Closure, "            "));
        out.push_str(&format!("            Some(({key}, {value_expr}))\n"));
        out.push_str("        })\n");
        out.push_str("        .collect();\n");
        Ok(out)
    }

    fn map_vec_block(
        &mut self,
        alias: &str,
        key: &str,
        bindings: &[ColumnBinding],
        conditions: &[String],
    ) -> Result<String, CompileError> {
        self.state.uses_hashmap = true;
        let var = self.var_name(alias);
        let info = self.info(alias).clone();
        let key_ty = rust_type(self.binding_ty(bindings, key));
        let value_ty = self.value_tuple_type(&info);
        let value_expr = value_tuple_expr(&info.min_select);
        let mut out = format!(
            "    let mut {var}: HashMap<{key_ty}, Vec<{value_ty}>> = HashMap::new();\n"
        );
        out.push_str(&format!(
            "    for {} in {}",
            Self::closure_pattern(bindings),
            self.zip_chain(alias, bindings, "        ")
        ));
        out.push_str("    {\n");
        out.push_str(&Self::normalization_lines(bindings, Flow::Loop, "        "));
        out.push_str(&Self::guard_lines(conditions, Flow::Loop, "        "));
        out.push_str(&format!(
            "        {var}.entry({key}).or_default().push({value_expr});\n"
        ));
        out.push_str("    }\n");
        Ok(out)
    }

    fn binding_ty(&self, bindings: &[ColumnBinding], column: &str) -> ColumnType {
        bindings
            .iter()
            .find(|b| b.column == column)
            .map(|b| b.ty)
            .unwrap_or(ColumnType::Numeric)
    }

    /// Value type stored for a selected relation: one value per selected
    /// column, tupled when there is more than one.
    fn value_tuple_type(&self, info: &TableInfo) -> String {
        let types: Vec<String> = info
            .min_select
            .iter()
            .map(|column| {
                rust_type(
                    info.column(column)
                        .map(|m| m.ty)
                        .unwrap_or(ColumnType::String),
                )
                .to_string()
            })
            .collect();
        if types.len() == 1 {
            types.into_iter().next().unwrap()
        } else {
            format!("({})", types.join(", "))
        }
    }

    fn root_block(&mut self) -> Result<String, CompileError> {
        let root = self.plan.root.clone();
        let info = self.info(&root.alias).clone();

        // Selected aliases other than the root, in first-projection order.
        let mut fetched_aliases: Vec<String> = Vec::new();
        for field in &self.ctx.selected_fields {
            if field.alias != root.alias && !fetched_aliases.contains(&field.alias) {
                fetched_aliases.push(field.alias.clone());
            }
        }

        // Direct children that are not fetched by value still need a
        // membership probe in the root loop.
        let direct_children: Vec<String> = self
            .children_of(&root.alias)
            .into_iter()
            .map(|c| c.alias.clone())
            .filter(|c| !fetched_aliases.contains(c))
            .collect();

        let mut wanted: Vec<(String, bool)> = Vec::new();
        for field in self.ctx.selected_on(&root.alias) {
            wanted.push((field.column.clone(), true));
        }
        for child in &direct_children {
            if let Some(pair) = self.plan.columns_between(&root.alias, child).first() {
                wanted.push((pair.parent_column.clone(), true));
            }
        }
        let mut probe_columns: IndexMap<String, String> = IndexMap::new();
        for alias in &fetched_aliases {
            let probe = self.root_probe_column(alias)?;
            wanted.push((probe.clone(), true));
            probe_columns.insert(alias.clone(), probe);
        }
        for column in self.filter_columns(&info) {
            wanted.push((column, false));
        }

        let bindings = self.bindings_for(&root.alias, wanted)?;
        let mut conditions = Vec::new();
        if let Some(filter) = self.lowered_filter(&info, &bindings)? {
            conditions.push(filter);
        }
        for child in &direct_children {
            let pair = self
                .plan
                .columns_between(&root.alias, child)
                .first()
                .map(|pc| pc.parent_column.clone())
                .expect("direct child has a physical join pair");
            let probe = bindings
                .iter()
                .find(|b| b.column == pair)
                .expect("probe column is bound");
            conditions.push(self.child_predicate(child, probe)?);
        }

        let single = self.ctx.selected_fields.len() == 1;
        let flow = if single { Flow::Closure } else { Flow::Loop };
        let fetches = self.fetch_lines(&fetched_aliases, &probe_columns, &bindings, flow)?;

        // Candidate value expression per selected field, in order.
        let values: Vec<String> = self
            .ctx
            .selected_fields
            .iter()
            .map(|field| {
                if field.alias == root.alias {
                    field.column.clone()
                } else {
                    format!("{}_{}", field.alias, field.column)
                }
            })
            .collect();

        if single {
            let mut out = format!("    let res = {}", self.zip_chain(&root.alias, &bindings, "        "));
            out.push_str(&format!(
                "        .filter_map(|{}| {{\n",
                Self::closure_pattern(&bindings)
            ));
            out.push_str(&Self::normalization_lines(&bindings, Flow::Closure, "            "));
            out.push_str(&Self::guard_lines(&conditions, Flow::Closure, "            "));
            out.push_str(&fetches);
            out.push_str(&format!("            Some({})\n", values[0]));
            out.push_str("        })\n");
            out.push_str("        .min();\n");
            Ok(out)
        } else {
            let best_ty: Vec<&str> = self
                .ctx
                .selected_fields
                .iter()
                .map(|f| rust_type(f.ty))
                .collect();
            let mut out = format!(
                "    let mut best: Option<({})> = None;\n",
                best_ty.join(", ")
            );
            out.push_str(&format!(
                "    for {} in {}",
                Self::closure_pattern(&bindings),
                self.zip_chain(&root.alias, &bindings, "        ")
            ));
            out.push_str("    {\n");
            out.push_str(&Self::normalization_lines(&bindings, Flow::Loop, "        "));
            out.push_str(&Self::guard_lines(&conditions, Flow::Loop, "        "));
            out.push_str(&fetches);
            let fresh = values.join(", ");
            let prev: Vec<String> = (0..values.len()).map(|i| format!("best{i}")).collect();
            let folded: Vec<String> = values
                .iter()
                .enumerate()
                .map(|(i, value)| format!("best{i}.min({value})"))
                .collect();
            out.push_str("        best = Some(match best {\n");
            out.push_str(&format!("            None => ({fresh}),\n"));
            out.push_str(&format!(
                "            Some(({})) => ({}),\n",
                prev.join(", "),
                folded.join(", ")
            ));
            out.push_str("        });\n");
            out.push_str("    }\n");
            Ok(out)
        }
    }

    /// Lines fetching selected values from materialized ears, including
    /// distant ones probed through an equated root column.
    fn fetch_lines(
        &mut self,
        fetched_aliases: &[String],
        probe_columns: &IndexMap<String, String>,
        bindings: &[ColumnBinding],
        flow: Flow,
    ) -> Result<String, CompileError> {
        let indent = match flow {
            Flow::Closure => "            ",
            Flow::Loop => "        ",
        };
        let mut out = String::new();
        for alias in fetched_aliases {
            let info = self.info(alias).clone();
            let shape = *self.shapes.get(alias).ok_or_else(|| {
                CompileError::UnsupportedShape {
                    alias: alias.clone(),
                    column: info.min_select.first().cloned().unwrap_or_default(),
                }
            })?;
            let var = self.var_name(alias);
            let probe_column = &probe_columns[alias];
            let probe = bindings
                .iter()
                .find(|b| b.column == *probe_column)
                .expect("probe column is bound");
            let key = key_ref(&probe.var, probe.ty);
            let value_vars: Vec<String> = info
                .min_select
                .iter()
                .map(|column| format!("{alias}_{column}"))
                .collect();
            let value_pattern = if value_vars.len() == 1 {
                value_vars[0].clone()
            } else {
                format!("({})", value_vars.join(", "))
            };

            match (shape, flow) {
                (Shape::Map, Flow::Closure) => {
                    out.push_str(&format!(
                        "{indent}let {value_pattern} = *{var}.get({key})?;\n"
                    ));
                }
                (Shape::Map, Flow::Loop) => {
                    out.push_str(&format!(
                        "{indent}let Some(&{value_pattern}) = {var}.get({key}) else {{\n{indent}    continue;\n{indent}}};\n"
                    ));
                }
                (Shape::MapVec, Flow::Closure) => {
                    if value_vars.len() == 1 {
                        out.push_str(&format!(
                            "{indent}let {value_pattern} = *{var}.get({key})?.iter().min()?;\n"
                        ));
                    } else {
                        out.push_str(&format!(
                            "{indent}let {alias}_values = {var}.get({key})?;\n"
                        ));
                        for (i, value_var) in value_vars.iter().enumerate() {
                            out.push_str(&format!(
                                "{indent}let {value_var} = {alias}_values.iter().map(|v| v.{i}).min()?;\n"
                            ));
                        }
                    }
                }
                (Shape::MapVec, Flow::Loop) => {
                    out.push_str(&format!(
                        "{indent}let Some({alias}_values) = {var}.get({key}) else {{\n{indent}    continue;\n{indent}}};\n"
                    ));
                    if value_vars.len() == 1 {
                        out.push_str(&format!(
                            "{indent}let Some(&{value_pattern}) = {alias}_values.iter().min() else {{\n{indent}    continue;\n{indent}}};\n"
                        ));
                    } else {
                        for (i, value_var) in value_vars.iter().enumerate() {
                            out.push_str(&format!(
                                "{indent}let Some({value_var}) = {alias}_values.iter().map(|v| v.{i}).min() else {{\n{indent}    continue;\n{indent}}};\n"
                            ));
                        }
                    }
                }
                (other, _) => {
                    // A selected relation that ended up scalar- or
                    // set-shaped cannot yield its value at the root.
                    warn!(alias = %alias, shape = ?other, "selected ear has no value shape");
                    return Err(CompileError::UnsupportedShape {
                        alias: alias.clone(),
                        column: info.min_select.first().cloned().unwrap_or_default(),
                    });
                }
            }
        }
        Ok(out)
    }

    fn result_tuple_type(&self) -> String {
        let types: Vec<String> = self
            .ctx
            .selected_fields
            .iter()
            .map(|f| {
                match f.ty {
                    ColumnType::Numeric => "i32",
                    ColumnType::String => "String",
                }
                .to_string()
            })
            .collect();
        if types.len() == 1 {
            format!("({},)", types[0])
        } else {
            format!("({})", types.join(", "))
        }
    }

    fn result_expr(&self) -> String {
        let n = self.ctx.selected_fields.len();
        let vars: Vec<String> = (0..n).map(|i| format!("v{i}")).collect();
        let converted: Vec<String> = self
            .ctx
            .selected_fields
            .iter()
            .zip(&vars)
            .map(|(field, var)| match field.ty {
                ColumnType::Numeric => var.clone(),
                ColumnType::String => format!("{var}.to_string()"),
            })
            .collect();
        if n == 1 {
            format!("res.map(|{}| ({},))", vars[0], converted[0])
        } else {
            format!(
                "best.map(|({})| ({}))",
                vars.join(", "),
                converted.join(", ")
            )
        }
    }

    /// The embedded self-check against the expected-results catalog.
    fn self_check_test(&self, fn_name: &str) -> Option<String> {
        let expected = self.expected?;
        let assertion = match expected {
            None => format!("assert_eq!({fn_name}(&db), None);"),
            Some(cells) => {
                if cells.len() != self.ctx.selected_fields.len() {
                    warn!(
                        query = self.name,
                        cells = cells.len(),
                        fields = self.ctx.selected_fields.len(),
                        "expected-result arity mismatch, skipping self-check"
                    );
                    return None;
                }
                let literals: Vec<String> = cells
                    .iter()
                    .map(|cell| match cell {
                        Cell::Int(i) => i.to_string(),
                        Cell::Float(f) => format!("{f:?}"),
                        Cell::Text(s) => format!("{}.to_string()", rust_str_lit(s)),
                    })
                    .collect();
                if literals.len() == 1 {
                    format!("assert_eq!({fn_name}(&db), Some(({},)));", literals[0])
                } else {
                    format!(
                        "assert_eq!({fn_name}(&db), Some(({})));",
                        literals.join(", ")
                    )
                }
            }
        };
        let mut out = String::new();
        out.push_str("#[cfg(test)]\n");
        out.push_str("mod tests {\n");
        out.push_str("    use super::*;\n\n");
        out.push_str("    #[test]\n");
        out.push_str(&format!("    fn test_{fn_name}() {{\n"));
        out.push_str("        let db = Db::load();\n");
        out.push_str(&format!("        {assertion}\n"));
        out.push_str("    }\n");
        out.push_str("}\n");
        Some(out)
    }
}

/// Borrow expression for probing a keyed container.
fn key_ref(var: &str, ty: ColumnType) -> String {
    match ty {
        ColumnType::Numeric => format!("&{var}"),
        ColumnType::String => var.to_string(),
    }
}

fn rust_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Numeric => "i32",
        ColumnType::String => "&str",
    }
}

fn value_tuple_expr(min_select: &[String]) -> String {
    if min_select.len() == 1 {
        min_select[0].clone()
    } else {
        format!("({})", min_select.join(", "))
    }
}

/// `1a` -> `q1a`; anything outside `[a-zA-Z0-9_]` is folded to `_`.
fn fn_name(query: &str) -> String {
    let safe: String = query
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("q{safe}")
}

fn collect_filter_columns(node: &crate::types::FilterNode, out: &mut Vec<String>) {
    use crate::types::{FilterNode, FilterRhs};
    match node {
        FilterNode::Leaf(token) => {
            if let Operand::Column(column) = parse_leaf(token) {
                if !out.contains(&column.column) {
                    out.push(column.column);
                }
            }
        }
        FilterNode::Branch { left, right, .. } => {
            collect_filter_columns(left, out);
            match right {
                Some(FilterRhs::Node(node)) => collect_filter_columns(node, out),
                Some(FilterRhs::List(items)) => {
                    for item in items {
                        collect_filter_columns(item, out);
                    }
                }
                None => {}
            }
        }
    }
}
