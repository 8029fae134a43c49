//! Generic filter trees, persisted verbatim in the IR JSON.
//!
//! A tree is either a leaf token (a column reference, a quoted string, or a
//! number, kept as its SQL text) or a `{operator, left, right}` node. The
//! `right` side may be another node, a list of nodes (`IN`), or absent
//! (`NOT` over a non-binary child). The emitter translates this generic
//! shape into a typed [`Filter`] exactly once before lowering.
//!
//! [`Filter`]: crate::emitter::Filter

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    Branch {
        operator: String,
        left: Box<FilterNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        right: Option<FilterRhs>,
    },
    Leaf(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterRhs {
    Node(Box<FilterNode>),
    List(Vec<FilterNode>),
}

impl FilterNode {
    pub fn leaf(token: impl Into<String>) -> Self {
        Self::Leaf(token.into())
    }

    pub fn binary(operator: impl Into<String>, left: FilterNode, right: FilterNode) -> Self {
        Self::Branch {
            operator: operator.into(),
            left: Box::new(left),
            right: Some(FilterRhs::Node(Box::new(right))),
        }
    }

    pub fn unary(operator: impl Into<String>, left: FilterNode) -> Self {
        Self::Branch {
            operator: operator.into(),
            left: Box::new(left),
            right: None,
        }
    }

    pub fn in_list(left: FilterNode, list: Vec<FilterNode>, negated: bool) -> Self {
        Self::Branch {
            operator: if negated { "NOT IN" } else { "IN" }.to_string(),
            left: Box::new(left),
            right: Some(FilterRhs::List(list)),
        }
    }

    /// Fold a conjunction into a right-deep AND chain:
    /// `[a, b, c]` becomes `AND(a, AND(b, c))`.
    pub fn and_chain(nodes: Vec<FilterNode>) -> Option<FilterNode> {
        nodes
            .into_iter()
            .rev()
            .reduce(|acc, node| FilterNode::binary("AND", node, acc))
    }

    pub fn operator(&self) -> Option<&str> {
        match self {
            Self::Branch { operator, .. } => Some(operator),
            Self::Leaf(_) => None,
        }
    }

    /// Render the subtree as compact JSON, for error messages.
    pub fn describe(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "<filter>".to_string())
    }
}
