//! Derived bundle consumed by the emitter: typed fields for every selected
//! column, per-alias field maps, and the plan's join column pairs
//! materialized into physical fields.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::CompileError;
use crate::planner::Plan;
use crate::types::{ColumnType, QueryIr};

/// One physical column occurrence with its type metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub alias: String,
    pub column: String,
    pub ty: ColumnType,
    pub nullable: bool,
}

/// A join edge as a pair of physical fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalJoin {
    pub parent: Field,
    pub child: Field,
}

#[derive(Debug, Clone, Default)]
pub struct ProgramContext {
    /// Every column mentioned in any `min_select`, in projection order.
    pub selected_fields: Vec<Field>,
    /// alias -> column -> field, covering every referenced column.
    pub alias_fields: HashMap<String, IndexMap<String, Field>>,
    /// The plan's parent/child column pairs as physical fields.
    pub parent_child: Vec<PhysicalJoin>,
    /// child alias -> its join edges toward the parent, for walking from an
    /// ear up the tree.
    pub child_parent: HashMap<String, Vec<PhysicalJoin>>,
}

impl ProgramContext {
    pub fn build(ir: &QueryIr, plan: &Plan) -> Result<Self, CompileError> {
        let mut alias_fields: HashMap<String, IndexMap<String, Field>> = HashMap::new();
        for info in ir.tables.values() {
            let mut fields = IndexMap::new();
            for (column, meta) in &info.columns {
                fields.insert(
                    column.clone(),
                    Field {
                        alias: info.alias.clone(),
                        column: column.clone(),
                        ty: meta.ty,
                        nullable: meta.nullable,
                    },
                );
            }
            alias_fields.insert(info.alias.clone(), fields);
        }

        let field_of = |alias: &str, column: &str| -> Result<Field, CompileError> {
            alias_fields
                .get(alias)
                .and_then(|fields| fields.get(column))
                .cloned()
                .ok_or_else(|| CompileError::SchemaLookup {
                    alias: alias.to_string(),
                    item: column.to_string(),
                })
        };

        let mut selected_fields = Vec::new();
        for selected in &ir.select_order {
            selected_fields.push(field_of(&selected.alias, &selected.column)?);
        }

        let mut parent_child = Vec::new();
        let mut child_parent: HashMap<String, Vec<PhysicalJoin>> = HashMap::new();
        for pc in &plan.parent_child_columns {
            let join = PhysicalJoin {
                parent: field_of(&pc.parent_alias, &pc.parent_column)?,
                child: field_of(&pc.child_alias, &pc.child_column)?,
            };
            child_parent
                .entry(pc.child_alias.clone())
                .or_default()
                .push(join.clone());
            parent_child.push(join);
        }

        Ok(Self {
            selected_fields,
            alias_fields,
            parent_child,
            child_parent,
        })
    }

    pub fn field(&self, alias: &str, column: &str) -> Option<&Field> {
        self.alias_fields.get(alias).and_then(|f| f.get(column))
    }

    /// Selected fields living on the given alias, in projection order.
    pub fn selected_on(&self, alias: &str) -> Vec<&Field> {
        self.selected_fields
            .iter()
            .filter(|f| f.alias == alias)
            .collect()
    }
}
