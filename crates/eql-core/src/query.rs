//! # Query Module
//!
//! Top-level entity and set-of queries over a registry.
//!
//! - Built once from the node-builder API, immutable afterwards
//! - Validated against the registry before every run
//! - Evaluated lazily: each `evaluate` call starts a fresh, independent run

use crate::engine::{BindingStream, Engine};
use crate::expr::{self, Node, NodeRef, Selector, Term};
use crate::negation::negate;
use crate::{BindingContext, EngineConfig, EqlError, Registry, Value, Variable};
use std::sync::Arc;
use tracing::debug;

/// Check that every variable in `vars` is declared in `registry`.
pub(crate) fn check_declared<'v>(
    registry: &Registry,
    vars: impl IntoIterator<Item = &'v Variable>,
    location: &dyn std::fmt::Display,
) -> Result<(), EqlError> {
    for var in vars {
        if !registry.is_declared(var) {
            return Err(EqlError::UnboundVariable {
                variable: var.name().to_string(),
                node: location.to_string(),
            });
        }
    }
    Ok(())
}

// =============================================================================
// QUERY
// =============================================================================

/// An entity or set-of query.
#[derive(Debug, Clone)]
pub struct Query {
    root: NodeRef,
    projection: Vec<Term>,
}

impl Query {
    /// Query projecting a single term.
    #[must_use]
    pub fn entity(projection: impl Into<Term>, conditions: impl IntoIterator<Item = Node>) -> Self {
        Self::from_node(expr::entity(projection, conditions))
    }

    /// Query projecting a tuple of terms.
    #[must_use]
    pub fn set_of<T: Into<Term>>(
        projection: impl IntoIterator<Item = T>,
        conditions: impl IntoIterator<Item = Node>,
    ) -> Self {
        Self::from_node(expr::set_of(projection, conditions))
    }

    /// Wrap a selector node. Any other node is treated as the conditions of
    /// a selector with an empty projection.
    #[must_use]
    pub fn from_node(node: Node) -> Self {
        match node {
            Node::Select(selector) => Self::from_selector(selector),
            other => Self::from_selector(Selector {
                kind: expr::SelectorKind::SetOf,
                projection: Vec::new(),
                conditions: Some(Arc::new(other)),
            }),
        }
    }

    fn from_selector(selector: Selector) -> Self {
        let projection = selector.projection.clone();
        Self {
            root: Arc::new(Node::Select(selector)),
            projection,
        }
    }

    /// The selector node of this query.
    #[must_use]
    pub fn node(&self) -> &NodeRef {
        &self.root
    }

    /// The projected terms.
    #[must_use]
    pub fn projection(&self) -> &[Term] {
        &self.projection
    }

    /// The same projection over the negated conditions.
    #[must_use]
    pub fn negated(&self) -> Self {
        Self::from_node(negate(&self.root))
    }

    /// Check that every referenced variable is declared in `registry`.
    pub fn validate(&self, registry: &Registry) -> Result<(), EqlError> {
        check_declared(registry, &self.root.ordered_variables(), &self.root)?;
        check_declared(registry, &self.root.binders(), &self.root)
    }

    /// Evaluate with the default configuration.
    pub fn evaluate<'a>(&'a self, registry: &'a Registry) -> Solutions<'a> {
        self.evaluate_with(registry, &EngineConfig::default())
    }

    /// Evaluate with an explicit configuration.
    pub fn evaluate_with<'a>(&'a self, registry: &'a Registry, config: &EngineConfig) -> Solutions<'a> {
        let engine = Engine::new(registry, *config);
        debug!(query = %self.root, "query evaluation started");
        let stream: BindingStream<'a> = match self.validate(registry) {
            Ok(()) => engine.resolve(&self.root, BindingContext::new()),
            Err(e) => Box::new(std::iter::once(Err(e))),
        };
        Solutions {
            engine,
            stream,
            query: self,
            yielded: 0,
            done: false,
        }
    }
}

// =============================================================================
// SOLUTIONS
// =============================================================================

/// One result of a query: the projected values plus the bindings that
/// produced them.
#[derive(Debug, Clone)]
pub struct Solution {
    values: Vec<Value>,
    bindings: BindingContext,
}

impl Solution {
    /// The first projected value.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.values.first()
    }

    /// All projected values, in projection order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The value bound to a variable on the path that produced this result.
    #[must_use]
    pub fn get(&self, var: &Variable) -> Option<&Value> {
        self.bindings.get(var)
    }

    /// The full binding context.
    #[must_use]
    pub fn bindings(&self) -> &BindingContext {
        &self.bindings
    }
}

/// Lazy stream of query results.
///
/// Fuses after the first error.
pub struct Solutions<'a> {
    engine: Engine<'a>,
    stream: BindingStream<'a>,
    query: &'a Query,
    yielded: usize,
    done: bool,
}

impl Iterator for Solutions<'_> {
    type Item = Result<Solution, EqlError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.stream.next() {
            Some(Ok(bindings)) => {
                let values = self
                    .query
                    .projection
                    .iter()
                    .map(|term| self.engine.eval(term, &bindings, &self.query.root))
                    .collect::<Result<Vec<_>, _>>();
                match values {
                    Ok(values) => {
                        self.yielded += 1;
                        Some(Ok(Solution { values, bindings }))
                    }
                    Err(e) => {
                        self.done = true;
                        Some(Err(e))
                    }
                }
            }
            Some(Err(e)) => {
                self.done = true;
                debug!(error = %e, solutions = self.yielded, "query evaluation failed");
                Some(Err(e))
            }
            None => {
                self.done = true;
                debug!(solutions = self.yielded, "query evaluation finished");
                None
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{eq, gt, var};
    use crate::{InstanceCache, quantify};

    fn world() -> (Registry, Variable, Variable) {
        let cache = InstanceCache::shared();
        cache.declare_type("Handle", ["Body"]);
        let h1 = cache.create("Handle", [("name", Value::from("Handle1"))]);
        let h2 = cache.create("Handle", [("name", Value::from("Handle2"))]);
        cache.create("Body", [("name", Value::from("Body1")), ("size", Value::Int(2))]);
        cache.create("Fixed", [("child", Value::Entity(h1))]);
        cache.create("Fixed", [("child", Value::Entity(h2))]);
        let mut registry = Registry::new(cache);
        let handle = registry.declare_typed("handle", "Handle");
        let fixed = registry.declare_typed("fixed", "Fixed");
        (registry, handle, fixed)
    }

    #[test]
    fn entity_query_projects_value() {
        let (registry, handle, fixed) = world();
        let query = Query::entity(&handle, [eq(&handle, var(&fixed).attr("child"))]);
        let names: Vec<String> = query
            .evaluate(&registry)
            .map(|s| {
                s.expect("solution")
                    .value()
                    .and_then(Value::as_entity)
                    .and_then(|e| e.name().map(str::to_string))
                    .expect("named")
            })
            .collect();
        assert_eq!(names, vec!["Handle1", "Handle2"]);
    }

    #[test]
    fn set_of_projects_tuple_and_exposes_bindings() {
        let (registry, handle, fixed) = world();
        let query = Query::set_of(
            [var(&handle), var(&handle).attr("name")],
            [eq(&handle, var(&fixed).attr("child"))],
        );
        let first = query
            .evaluate(&registry)
            .next()
            .expect("one result")
            .expect("solution");
        assert_eq!(first.values().len(), 2);
        assert_eq!(first.values()[1], Value::from("Handle1"));
        assert!(first.get(&fixed).is_some());
    }

    #[test]
    fn evaluation_is_restartable() {
        let (registry, handle, _fixed) = world();
        let query = Query::entity(&handle, []);
        assert_eq!(query.evaluate(&registry).count(), 2);
        assert_eq!(query.evaluate(&registry).count(), 2);
    }

    #[test]
    fn undeclared_variable_fails_validation() {
        let (registry, handle, _fixed) = world();
        let mut elsewhere = Registry::new(InstanceCache::shared());
        let _ = elsewhere.declare_free("a");
        let _ = elsewhere.declare_free("b");
        let _ = elsewhere.declare_free("c");
        let stranger = elsewhere.declare_free("stranger");

        let query = Query::entity(&handle, [eq(&handle, &stranger)]);
        assert!(query.validate(&registry).is_err());
        let mut solutions = query.evaluate(&registry);
        assert!(matches!(
            solutions.next(),
            Some(Err(EqlError::UnboundVariable { .. }))
        ));
        assert!(solutions.next().is_none());
    }

    #[test]
    fn negated_query_complements_within_domain() {
        let (registry, handle, _fixed) = world();
        let query = Query::entity(&handle, [eq(var(&handle).attr("name"), "Handle1")]);
        let negated = query.negated();
        let solution = quantify::the(negated.evaluate(&registry)).expect("one result");
        assert_eq!(
            solution.value().and_then(Value::as_entity).and_then(|e| e.name()),
            Some("Handle2")
        );
    }

    #[test]
    fn projection_errors_surface() {
        let (registry, handle, _fixed) = world();
        let query = Query::entity(var(&handle).attr("size"), [gt(1_i64, 0_i64)]);
        let mut solutions = query.evaluate(&registry);
        assert!(matches!(
            solutions.next(),
            Some(Err(EqlError::EvaluationType { .. }))
        ));
    }
}
