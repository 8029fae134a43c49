//! Schema catalog built from CREATE TABLE DDL text.
//!
//! The catalog answers three questions per table: which column is the
//! primary key, which columns are foreign keys (and where they point), and
//! what the physical type/nullability of each column is. Primary-key columns
//! and columns declared `NOT NULL` are non-nullable; everything else
//! defaults to nullable.

use std::collections::HashMap;

use indexmap::IndexMap;
use sqlparser::ast::{ColumnDef, ColumnOption, Statement, TableConstraint};

use crate::error::CompileError;
use crate::parser::parse_sql;
use crate::types::{ColumnMeta, ColumnType};

/// Everything known about one physical table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub primary_key: Option<String>,
    /// local column -> (referenced table, referenced column)
    pub foreign_keys: HashMap<String, (String, String)>,
    pub columns: IndexMap<String, ColumnMeta>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: HashMap<String, TableSchema>,
}

impl Catalog {
    /// Parse DDL text into a catalog. Statements other than CREATE TABLE are
    /// ignored.
    pub fn from_ddl(ddl: &str) -> Result<Self, CompileError> {
        let statements = parse_sql(ddl)?;
        let mut tables = HashMap::new();
        for statement in &statements {
            if let Statement::CreateTable(create) = statement {
                let name = object_simple_name(&create.name.to_string());
                let schema = build_table_schema(&name, &create.columns, &create.constraints);
                tables.insert(name, schema);
            }
        }
        Ok(Self { tables })
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Primary-key column of a table, if declared.
    pub fn primary_key(&self, table: &str) -> Option<&str> {
        self.tables
            .get(table)
            .and_then(|t| t.primary_key.as_deref())
    }

    /// Foreign-key target of `table.column`, if declared.
    pub fn foreign_key(&self, table: &str, column: &str) -> Option<&(String, String)> {
        self.tables.get(table).and_then(|t| t.foreign_keys.get(column))
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnMeta> {
        self.tables.get(table).and_then(|t| t.columns.get(column))
    }
}

fn build_table_schema(
    name: &str,
    columns: &[ColumnDef],
    constraints: &[TableConstraint],
) -> TableSchema {
    let mut primary_key: Option<String> = None;
    let mut foreign_keys: HashMap<String, (String, String)> = HashMap::new();
    let mut metas: IndexMap<String, ColumnMeta> = IndexMap::new();

    for column in columns {
        let column_name = column.name.value.clone();
        let mut nullable = true;
        for opt in &column.options {
            match &opt.option {
                ColumnOption::NotNull => nullable = false,
                ColumnOption::Unique { is_primary, .. } if *is_primary => {
                    nullable = false;
                    primary_key.get_or_insert_with(|| column_name.clone());
                }
                ColumnOption::ForeignKey {
                    foreign_table,
                    referred_columns,
                    ..
                } => {
                    // `REFERENCES orders` without a column list cannot be
                    // resolved to a target column, so it is skipped.
                    if let Some(referred) = referred_columns.first() {
                        foreign_keys.insert(
                            column_name.clone(),
                            (
                                object_simple_name(&foreign_table.to_string()),
                                referred.value.clone(),
                            ),
                        );
                    }
                }
                _ => {}
            }
        }
        metas.insert(
            column_name,
            ColumnMeta {
                ty: classify_type(&column.data_type.to_string()),
                nullable,
            },
        );
    }

    for constraint in constraints {
        match constraint {
            TableConstraint::PrimaryKey { columns, .. } => {
                for index_column in columns {
                    let column_name = index_column.column.expr.to_string();
                    primary_key.get_or_insert_with(|| column_name.clone());
                    if let Some(meta) = metas.get_mut(&column_name) {
                        meta.nullable = false;
                    }
                }
            }
            TableConstraint::ForeignKey {
                columns,
                foreign_table,
                referred_columns,
                ..
            } => {
                for (local, referred) in columns.iter().zip(referred_columns.iter()) {
                    foreign_keys.insert(
                        local.value.clone(),
                        (
                            object_simple_name(&foreign_table.to_string()),
                            referred.value.clone(),
                        ),
                    );
                }
            }
            _ => {}
        }
    }

    TableSchema {
        name: name.to_string(),
        primary_key,
        foreign_keys,
        columns: metas,
    }
}

/// Last component of a possibly schema-qualified name, unquoted and
/// lowercased.
fn object_simple_name(name: &str) -> String {
    name.rsplit('.')
        .next()
        .unwrap_or(name)
        .trim_matches('"')
        .to_lowercase()
}

fn classify_type(data_type: &str) -> ColumnType {
    let lower = data_type.to_lowercase();
    let numeric = ["int", "serial", "decimal", "numeric", "real", "double", "float"]
        .iter()
        .any(|t| lower.contains(t));
    if numeric {
        ColumnType::Numeric
    } else {
        ColumnType::String
    }
}
