//! Typed filter trees and their lowering to Rust boolean expressions.
//!
//! The generic `{operator, left, right}` tree from the IR is translated once
//! into [`Filter`] and then rendered against the bindings of the current
//! loop. Nullable columns stay `Option`-typed in the bindings and every atom
//! unwraps explicitly (`map_or(false, ..)`), which collapses SQL's
//! three-valued logic to row selection correctly; `IS [NOT] NULL` inspects
//! the option itself.

use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;

use super::EmitterState;
use crate::error::CompileError;
use crate::types::{ColumnType, FilterNode, FilterRhs};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
    Cmp {
        op: CmpOp,
        left: Operand,
        right: Operand,
    },
    In {
        column: Operand,
        list: Vec<Literal>,
        negated: bool,
    },
    Like {
        column: Operand,
        pattern: String,
        negated: bool,
    },
    Null {
        column: Operand,
        negated: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl CmpOp {
    fn token(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
        }
    }

    /// Mirror the comparison when the operands swap sides.
    fn flipped(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Neq => Self::Neq,
            Self::Gt => Self::Lt,
            Self::Lt => Self::Gt,
            Self::Gte => Self::Lte,
            Self::Lte => Self::Gte,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(ColumnRef),
    Lit(Literal),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Numeric literal, kept as source text.
    Num(String),
    /// String literal, unquoted.
    Str(String),
}

impl Literal {
    fn render(&self) -> String {
        match self {
            Self::Num(text) => text.clone(),
            Self::Str(text) => rust_str_lit(text),
        }
    }
}

/// How a column is bound inside the current loop body.
#[derive(Debug, Clone)]
pub struct Binding {
    pub var: String,
    pub ty: ColumnType,
    /// Still `Option`-typed after normalization (nullable and not required
    /// by a join key or selected value).
    pub optional: bool,
}

pub type Bindings = IndexMap<String, Binding>;

/// Translate the generic IR tree into the typed shape.
pub fn translate(node: &FilterNode) -> Result<Filter, CompileError> {
    let FilterNode::Branch {
        operator,
        left,
        right,
    } = node
    else {
        return Err(unsupported(node, "<leaf>"));
    };

    match operator.as_str() {
        "AND" | "OR" => {
            let right = right_node(node, right)?;
            let l = Box::new(translate(left)?);
            let r = Box::new(translate(right)?);
            Ok(if operator == "AND" {
                Filter::And(l, r)
            } else {
                Filter::Or(l, r)
            })
        }
        "NOT" => Ok(Filter::Not(Box::new(translate(left)?))),
        "EQ" | "NEQ" | "GT" | "LT" | "GTE" | "LTE" | "NOT EQ" | "NOT NEQ" | "NOT GT"
        | "NOT LT" | "NOT GTE" | "NOT LTE" => {
            let op = comparison_op(operator);
            let right = right_node(node, right)?;
            Ok(Filter::Cmp {
                op,
                left: parse_operand(left, node)?,
                right: parse_operand(right, node)?,
            })
        }
        "LIKE" | "NOT LIKE" => {
            let right = right_node(node, right)?;
            let Operand::Lit(Literal::Str(pattern)) = parse_operand(right, node)? else {
                return Err(unsupported(node, operator));
            };
            Ok(Filter::Like {
                column: parse_operand(left, node)?,
                pattern,
                negated: operator == "NOT LIKE",
            })
        }
        "IN" | "NOT IN" => {
            let Some(FilterRhs::List(items)) = right else {
                return Err(unsupported(node, operator));
            };
            let mut list = Vec::new();
            for item in items {
                match parse_operand(item, node)? {
                    Operand::Lit(lit) => list.push(lit),
                    Operand::Column(_) => return Err(unsupported(node, operator)),
                }
            }
            Ok(Filter::In {
                column: parse_operand(left, node)?,
                list,
                negated: operator == "NOT IN",
            })
        }
        "IS NULL" | "IS NOT NULL" => Ok(Filter::Null {
            column: parse_operand(left, node)?,
            negated: operator == "IS NOT NULL",
        }),
        other => Err(unsupported(node, other)),
    }
}

fn comparison_op(operator: &str) -> CmpOp {
    match operator {
        "EQ" | "NOT NEQ" => CmpOp::Eq,
        "NEQ" | "NOT EQ" => CmpOp::Neq,
        "GT" | "NOT LTE" => CmpOp::Gt,
        "LT" | "NOT GTE" => CmpOp::Lt,
        "GTE" | "NOT LT" => CmpOp::Gte,
        _ => CmpOp::Lte,
    }
}

fn right_node<'a>(
    node: &FilterNode,
    right: &'a Option<FilterRhs>,
) -> Result<&'a FilterNode, CompileError> {
    match right {
        Some(FilterRhs::Node(inner)) => Ok(inner),
        _ => Err(unsupported(
            node,
            node.operator().unwrap_or("<missing right>"),
        )),
    }
}

fn unsupported(node: &FilterNode, operator: &str) -> CompileError {
    CompileError::UnsupportedFilter {
        operator: operator.to_string(),
        subtree: node.describe(),
    }
}

fn parse_operand(node: &FilterNode, parent: &FilterNode) -> Result<Operand, CompileError> {
    let FilterNode::Leaf(token) = node else {
        return Err(unsupported(
            parent,
            node.operator().unwrap_or("<non-leaf operand>"),
        ));
    };
    Ok(parse_leaf(token))
}

/// Classify a leaf token: quoted string, numeric literal, or column
/// reference (optionally alias-qualified).
pub fn parse_leaf(token: &str) -> Operand {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let number =
        NUMBER.get_or_init(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("invalid number pattern"));

    let trimmed = token.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        let inner = &trimmed[1..trimmed.len() - 1];
        return Operand::Lit(Literal::Str(inner.replace("''", "'")));
    }
    if number.is_match(trimmed) {
        return Operand::Lit(Literal::Num(trimmed.to_string()));
    }
    match trimmed.rsplit_once('.') {
        Some((qualifier, column)) => Operand::Column(ColumnRef {
            qualifier: Some(qualifier.to_string()),
            column: column.to_string(),
        }),
        None => Operand::Column(ColumnRef {
            qualifier: None,
            column: trimmed.to_string(),
        }),
    }
}

/// Lower a typed filter into a boolean expression over the given bindings.
pub fn lower(
    filter: &Filter,
    bindings: &Bindings,
    state: &mut EmitterState,
) -> Result<String, CompileError> {
    match filter {
        Filter::And(l, r) => Ok(format!(
            "({} && {})",
            lower(l, bindings, state)?,
            lower(r, bindings, state)?
        )),
        Filter::Or(l, r) => Ok(format!(
            "({} || {})",
            lower(l, bindings, state)?,
            lower(r, bindings, state)?
        )),
        Filter::Not(inner) => Ok(format!("!({})", lower(inner, bindings, state)?)),
        Filter::Cmp { op, left, right } => lower_cmp(*op, left, right, bindings),
        Filter::In {
            column,
            list,
            negated,
        } => lower_in(column, list, *negated, bindings),
        Filter::Like {
            column,
            pattern,
            negated,
        } => lower_like(column, pattern, *negated, bindings, state),
        Filter::Null { column, negated } => lower_null(column, *negated, bindings),
    }
}

fn binding_for<'a>(
    column: &ColumnRef,
    bindings: &'a Bindings,
) -> Result<&'a Binding, CompileError> {
    bindings
        .get(&column.column)
        .ok_or_else(|| CompileError::SchemaLookup {
            alias: column.qualifier.clone().unwrap_or_default(),
            item: column.column.clone(),
        })
}

fn lower_cmp(
    op: CmpOp,
    left: &Operand,
    right: &Operand,
    bindings: &Bindings,
) -> Result<String, CompileError> {
    match (left, right) {
        (Operand::Column(col), Operand::Lit(lit)) => {
            let binding = binding_for(col, bindings)?;
            Ok(compare_to_literal(binding, op, lit))
        }
        (Operand::Lit(lit), Operand::Column(col)) => {
            let binding = binding_for(col, bindings)?;
            Ok(compare_to_literal(binding, op.flipped(), lit))
        }
        (Operand::Column(l), Operand::Column(r)) => {
            let lb = binding_for(l, bindings)?;
            let rb = binding_for(r, bindings)?;
            Ok(match (lb.optional, rb.optional) {
                (false, false) => format!("{} {} {}", lb.var, op.token(), rb.var),
                (true, false) => format!(
                    "{}.map_or(false, |v| v {} {})",
                    lb.var,
                    op.token(),
                    rb.var
                ),
                (false, true) => format!(
                    "{}.map_or(false, |v| {} {} v)",
                    rb.var,
                    lb.var,
                    op.token()
                ),
                (true, true) => format!(
                    "{}.zip({}).map_or(false, |(l, r)| l {} r)",
                    lb.var,
                    rb.var,
                    op.token()
                ),
            })
        }
        (Operand::Lit(l), Operand::Lit(r)) => {
            Ok(format!("{} {} {}", l.render(), op.token(), r.render()))
        }
    }
}

fn compare_to_literal(binding: &Binding, op: CmpOp, lit: &Literal) -> String {
    if binding.optional {
        format!(
            "{}.map_or(false, |v| v {} {})",
            binding.var,
            op.token(),
            lit.render()
        )
    } else {
        format!("{} {} {}", binding.var, op.token(), lit.render())
    }
}

fn lower_in(
    column: &Operand,
    list: &[Literal],
    negated: bool,
    bindings: &Bindings,
) -> Result<String, CompileError> {
    let Operand::Column(col) = column else {
        return Err(CompileError::UnsupportedFilter {
            operator: "IN".to_string(),
            subtree: "non-column IN subject".to_string(),
        });
    };
    let binding = binding_for(col, bindings)?;

    // A one-element list is a plain equality.
    if let [only] = list {
        let op = if negated { CmpOp::Neq } else { CmpOp::Eq };
        return Ok(compare_to_literal(binding, op, only));
    }

    let patterns = list
        .iter()
        .map(Literal::render)
        .collect::<Vec<_>>()
        .join(" | ");
    let test = |var: &str| format!("matches!({var}, {patterns})");
    Ok(if binding.optional {
        let inner = test("v");
        let polarity = if negated { "!" } else { "" };
        format!("{}.map_or(false, |v| {polarity}{inner})", binding.var)
    } else {
        let inner = test(&binding.var);
        if negated {
            format!("!{inner}")
        } else {
            inner
        }
    })
}

/// One positive check derived from a LIKE pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeCheck {
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    Exact(String),
}

/// Split a LIKE pattern on `%` into anchored and floating checks. A leading
/// `%` relaxes the start anchor, a trailing `%` the end anchor; `_` is not
/// treated as a wildcard.
pub fn like_checks(pattern: &str) -> Vec<LikeCheck> {
    let anchored_start = !pattern.starts_with('%');
    let anchored_end = !pattern.ends_with('%');
    let segments: Vec<&str> = pattern.split('%').filter(|s| !s.is_empty()).collect();

    if segments.is_empty() {
        return Vec::new();
    }
    if let [only] = segments.as_slice() {
        let segment = (*only).to_string();
        return vec![match (anchored_start, anchored_end) {
            (true, true) => LikeCheck::Exact(segment),
            (true, false) => LikeCheck::StartsWith(segment),
            (false, true) => LikeCheck::EndsWith(segment),
            (false, false) => LikeCheck::Contains(segment),
        }];
    }

    let last = segments.len() - 1;
    segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            let segment = (*segment).to_string();
            if i == 0 && anchored_start {
                LikeCheck::StartsWith(segment)
            } else if i == last && anchored_end {
                LikeCheck::EndsWith(segment)
            } else {
                LikeCheck::Contains(segment)
            }
        })
        .collect()
}

fn lower_like(
    column: &Operand,
    pattern: &str,
    negated: bool,
    bindings: &Bindings,
    state: &mut EmitterState,
) -> Result<String, CompileError> {
    let Operand::Column(col) = column else {
        return Err(CompileError::UnsupportedFilter {
            operator: "LIKE".to_string(),
            subtree: "non-column LIKE subject".to_string(),
        });
    };
    let binding = binding_for(col, bindings)?;
    let checks = like_checks(pattern);
    if checks.is_empty() {
        // Pattern is all wildcards.
        return Ok(if negated { "false" } else { "true" }.to_string());
    }

    let render = |var: &str, state: &mut EmitterState| -> Vec<String> {
        checks
            .iter()
            .map(|check| match check {
                LikeCheck::StartsWith(s) => {
                    format!("{var}.starts_with({})", rust_str_lit(s))
                }
                LikeCheck::EndsWith(s) => format!("{var}.ends_with({})", rust_str_lit(s)),
                LikeCheck::Exact(s) => format!("{var} == {}", rust_str_lit(s)),
                LikeCheck::Contains(s) => {
                    let finder = state.finder(s);
                    format!("{finder}.find({var}.as_bytes()).is_some()")
                }
            })
            .collect()
    };

    let combine = |parts: Vec<String>| -> String {
        if negated {
            // NOT LIKE is the disjunction of the negated checks.
            let negs: Vec<String> = parts.into_iter().map(|p| format!("!{p}")).collect();
            if negs.len() == 1 {
                negs.into_iter().next().unwrap()
            } else {
                format!("({})", negs.join(" || "))
            }
        } else if parts.len() == 1 {
            parts.into_iter().next().unwrap()
        } else {
            format!("({})", parts.join(" && "))
        }
    };

    Ok(if binding.optional {
        let parts = render("v", state);
        format!("{}.map_or(false, |v| {})", binding.var, combine(parts))
    } else {
        let parts = render(&binding.var, state);
        combine(parts)
    })
}

fn lower_null(
    column: &Operand,
    negated: bool,
    bindings: &Bindings,
) -> Result<String, CompileError> {
    let Operand::Column(col) = column else {
        return Err(CompileError::UnsupportedFilter {
            operator: "IS NULL".to_string(),
            subtree: "non-column IS NULL subject".to_string(),
        });
    };
    let binding = binding_for(col, bindings)?;
    Ok(if binding.optional {
        if negated {
            format!("{}.is_some()", binding.var)
        } else {
            format!("{}.is_none()", binding.var)
        }
    } else {
        // The binding is already unwrapped (or the column is NOT NULL).
        if negated { "true" } else { "false" }.to_string()
    })
}

/// Escaped Rust string literal, quotes included.
pub fn rust_str_lit(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
