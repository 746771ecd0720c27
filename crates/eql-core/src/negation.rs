//! # Negation Pushdown
//!
//! Rewrites `not C` into an equivalent tree without the negation, so the
//! engine never has to complement an enumeration.
//!
//! | node                | negation                                 |
//! |---------------------|------------------------------------------|
//! | `a == b`            | `a != b` (and every other operator pair) |
//! | `and(c1, .., cn)`   | `or(not c1, .., not cn)`, re-classified  |
//! | `or(l, r)`          | `and(not l, not r)`                      |
//! | `not c`             | `c`                                      |
//! | `for_all(x, c)`     | `exists(x, not c)`                       |
//! | `exists(x, c)`      | `for_all(x, not c)`                      |
//! | `p(args)`           | `p(args)` with `inverted` toggled        |
//! | selector `where c`  | selector `where not c`                   |
//! | `true` / `false`    | `false` / `true`                         |

use crate::expr::{Node, QuantifierKind, Selector, and, or};
use std::sync::Arc;

/// Negate a node.
///
/// The result contains no `Not` at its root. Deeper `Not` nodes are left
/// for the engine to rewrite when it reaches them.
#[must_use]
pub fn negate(node: &Node) -> Node {
    match node {
        Node::Constant(b) => Node::Constant(!b),
        Node::And(children) => or(children.iter().map(|c| negate(c))),
        Node::Or { left, right, .. } => and([negate(left), negate(right)]),
        Node::Not(child) => (**child).clone(),
        Node::Compare { left, op, right } => Node::Compare {
            left: left.clone(),
            op: op.negate(),
            right: right.clone(),
        },
        Node::Predicate(p) => Node::Predicate(p.inverted()),
        Node::Quantifier {
            kind,
            binder,
            domain,
            condition,
        } => Node::Quantifier {
            kind: match kind {
                QuantifierKind::ForAll => QuantifierKind::Exists,
                QuantifierKind::Exists => QuantifierKind::ForAll,
            },
            binder: binder.clone(),
            domain: domain.clone(),
            condition: Arc::new(negate(condition)),
        },
        Node::Select(selector) => Node::Select(Selector {
            kind: selector.kind,
            projection: selector.projection.clone(),
            conditions: Some(Arc::new(match &selector.conditions {
                Some(conditions) => negate(conditions),
                None => Node::Constant(false),
            })),
        }),
    }
}

// =============================================================================
// TESTS
// =============================================================================
