//! # Binding Context
//!
//! Append-only, path-scoped assignment of variables to values.
//!
//! A context is a linked list of frames shared through `Arc`. Binding a
//! variable never mutates the receiver: it returns a child scope whose
//! parent link is the receiver. Sibling branches of the search therefore
//! share their common prefix and can never observe each other's bindings.

use crate::{Value, VarId, Variable};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
struct Frame {
    variable: Variable,
    value: Value,
    parent: Option<Arc<Frame>>,
}

/// An immutable set of variable bindings for one search path.
#[derive(Clone, Default)]
pub struct BindingContext {
    head: Option<Arc<Frame>>,
}

impl BindingContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a child scope with `variable` bound to `value`.
    ///
    /// A later binding of the same variable shadows the earlier one.
    #[must_use]
    pub fn bind(&self, variable: &Variable, value: Value) -> Self {
        Self {
            head: Some(Arc::new(Frame {
                variable: variable.clone(),
                value,
                parent: self.head.clone(),
            })),
        }
    }

    /// Look up the value bound to a variable.
    #[must_use]
    pub fn get(&self, variable: &Variable) -> Option<&Value> {
        let mut current = self.head.as_deref();
        while let Some(frame) = current {
            if frame.variable.id() == variable.id() {
                return Some(&frame.value);
            }
            current = frame.parent.as_deref();
        }
        None
    }

    /// Check whether a variable is bound on this path.
    #[must_use]
    pub fn is_bound(&self, variable: &Variable) -> bool {
        self.get(variable).is_some()
    }

    /// Number of frames on this path, shadowed ones included.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.head.as_deref();
        while let Some(frame) = current {
            depth += 1;
            current = frame.parent.as_deref();
        }
        depth
    }

    /// Check if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Visible bindings, oldest first.
    #[must_use]
    pub fn bindings(&self) -> Vec<(Variable, Value)> {
        let mut seen = BTreeSet::new();
        let mut current = self.head.as_deref();
        let mut newest_first = Vec::new();
        while let Some(frame) = current {
            if seen.insert(frame.variable.id()) {
                newest_first.push((frame.variable.clone(), frame.value.clone()));
            }
            current = frame.parent.as_deref();
        }
        newest_first.reverse();
        newest_first
    }

    /// Visible bindings keyed by variable identity.
    #[must_use]
    pub fn assignment(&self) -> BTreeMap<VarId, Value> {
        self.bindings()
            .into_iter()
            .map(|(var, value)| (var.id(), value))
            .collect()
    }
}

impl PartialEq for BindingContext {
    fn eq(&self, other: &Self) -> bool {
        self.assignment() == other.assignment()
    }
}

impl fmt::Debug for BindingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.bindings()
                    .iter()
                    .map(|(var, value)| (var.name().to_string(), value.to_string())),
            )
            .finish()
    }
}

impl fmt::Display for BindingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (var, value)) in self.bindings().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", var, value)?;
        }
        f.write_str("}")
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstanceCache, Registry};

    #[test]
    fn siblings_do_not_see_each_other() {
        let mut registry = Registry::new(InstanceCache::shared());
        let x = registry.declare_free("x");
        let y = registry.declare_free("y");

        let root = BindingContext::new().bind(&x, Value::Int(1));
        let left = root.bind(&y, Value::Int(2));
        let right = root.bind(&y, Value::Int(3));

        assert_eq!(left.get(&y), Some(&Value::Int(2)));
        assert_eq!(right.get(&y), Some(&Value::Int(3)));
        assert!(!root.is_bound(&y));
        assert_eq!(left.get(&x), right.get(&x));
    }

    #[test]
    fn shadowing_keeps_latest_binding() {
        let mut registry = Registry::new(InstanceCache::shared());
        let x = registry.declare_free("x");

        let ctx = BindingContext::new()
            .bind(&x, Value::Int(1))
            .bind(&x, Value::Int(2));
        assert_eq!(ctx.get(&x), Some(&Value::Int(2)));
        assert_eq!(ctx.depth(), 2);
        assert_eq!(ctx.bindings().len(), 1);
        assert_eq!(ctx.to_string(), "{x: 2}");
    }

    #[test]
    fn equality_ignores_binding_order() {
        let mut registry = Registry::new(InstanceCache::shared());
        let x = registry.declare_free("x");
        let y = registry.declare_free("y");

        let a = BindingContext::new()
            .bind(&x, Value::Int(1))
            .bind(&y, Value::Int(2));
        let b = BindingContext::new()
            .bind(&y, Value::Int(2))
            .bind(&x, Value::Int(1));
        assert_eq!(a, b);
        assert!(BindingContext::new().is_empty());
    }
}
