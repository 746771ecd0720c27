//! # Resolution Engine
//!
//! Walks an expression tree against a [`Registry`] and lazily yields every
//! satisfying [`BindingContext`].
//!
//! ## Resolution Rules
//!
//! - Conjunction: backtracking join; a child yielding nothing prunes the path
//! - Equality: implicit join when one side is a bare unbound variable and
//!   the other side is resolved (enumerating the other side first if needed)
//! - Membership: a free item variable is bound to each element of the
//!   resolved container (flatten)
//! - Other comparators and predicates: enumerate unbound operands, then filter
//! - Negation: rewritten by [`negate`] before evaluation
//! - ElseIf: shared variables bound first, right side only when left fails
//! - Union: left stream followed by right stream, no deduplication
//! - Quantifiers: yield the outer binding; the binder is never exported
//!
//! ## Laziness
//!
//! Streams are pull-based: nothing past the current result is evaluated
//! until the caller asks for it. Dropping a stream cancels the search.
//! Errors are yielded in-stream and end the path that raised them.

use crate::expr::{CompareOp, DisjunctionMode, Node, NodeRef, QuantifierKind, Selector, Term};
use crate::negation::negate;
use crate::predicate::{Predicate, PredicateBody};
use crate::{BindingContext, Domain, EngineConfig, EqlError, Registry, Value, Variable};
use std::cell::Cell;
use std::sync::Arc;
use tracing::{trace, warn};

/// Lazy sequence of satisfying bindings.
pub type BindingStream<'a> = Box<dyn Iterator<Item = Result<BindingContext, EqlError>> + 'a>;

// =============================================================================
// STREAM HELPERS
// =============================================================================

fn single<'a>(ctx: BindingContext) -> BindingStream<'a> {
    Box::new(std::iter::once(Ok(ctx)))
}

fn nothing<'a>() -> BindingStream<'a> {
    Box::new(std::iter::empty())
}

fn failed<'a>(error: EqlError) -> BindingStream<'a> {
    Box::new(std::iter::once(Err(error)))
}

fn keep_if<'a>(holds: Result<bool, EqlError>, ctx: BindingContext) -> BindingStream<'a> {
    match holds {
        Ok(true) => single(ctx),
        Ok(false) => nothing(),
        Err(e) => failed(e),
    }
}

/// Build the stream only when it is first pulled.
fn deferred<'a, F>(build: F) -> BindingStream<'a>
where
    F: FnOnce() -> BindingStream<'a> + 'a,
{
    Box::new(std::iter::once_with(build).flatten())
}

/// Feed every binding of `stream` into `step`, passing errors through.
fn extend<'a, F>(stream: BindingStream<'a>, step: F) -> BindingStream<'a>
where
    F: Fn(BindingContext) -> BindingStream<'a> + 'a,
{
    Box::new(stream.flat_map(move |item| match item {
        Ok(ctx) => step(ctx),
        Err(e) => failed(e),
    }))
}

fn unbound(var: &Variable, node: &Node) -> EqlError {
    EqlError::UnboundVariable {
        variable: var.name().to_string(),
        node: node.to_string(),
    }
}

fn unbound_in(vars: Vec<Variable>, ctx: &BindingContext) -> Vec<Variable> {
    vars.into_iter().filter(|v| !ctx.is_bound(v)).collect()
}

/// How an implicit join binds its target variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Join {
    /// To the value of the other side (`v == term`).
    Value,
    /// To each element of the other side (`v in term`).
    Element,
}

/// One-shot cartesian product check for a selector resolution.
#[derive(Debug, Default)]
struct CartesianCheck {
    done: Cell<bool>,
}

impl CartesianCheck {
    /// Find the first open variable whose domain holds more than
    /// `threshold` values. Only the first call with open variables
    /// inspects domains.
    fn run(&self, registry: &Registry, open: &[Variable], threshold: usize) -> Option<(Variable, usize)> {
        if open.is_empty() || self.done.replace(true) {
            return None;
        }
        open.iter().find_map(|var| match registry.domain_values(var) {
            Ok(Some(values)) if values.len() > threshold => Some((var.clone(), values.len())),
            _ => None,
        })
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// The resolution engine: a registry plus configuration.
///
/// `Copy`, so streams capture it by value.
#[derive(Debug, Clone, Copy)]
pub struct Engine<'a> {
    registry: &'a Registry,
    config: EngineConfig,
}

impl<'a> Engine<'a> {
    /// Create an engine over a registry.
    #[must_use]
    pub fn new(registry: &'a Registry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// The registry this engine resolves against.
    #[must_use]
    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    /// The configuration of this engine.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve `node` under `ctx`.
    ///
    /// Each call starts a fresh run; nothing is memoized across calls.
    pub fn resolve(self, node: &NodeRef, ctx: BindingContext) -> BindingStream<'a> {
        trace!(node = %node, depth = ctx.depth(), "resolve");
        match &**node {
            Node::Constant(true) => single(ctx),
            Node::Constant(false) => nothing(),
            Node::And(children) => self.resolve_and(children.clone(), ctx),
            Node::Or {
                left,
                right,
                mode: DisjunctionMode::Union,
            } => self.resolve_union(Arc::clone(left), Arc::clone(right), ctx),
            Node::Or {
                left,
                right,
                mode: DisjunctionMode::ElseIf,
            } => self.resolve_else_if(node, Arc::clone(left), Arc::clone(right), ctx),
            Node::Not(child) => {
                let rewritten = Arc::new(negate(child));
                self.resolve(&rewritten, ctx)
            }
            Node::Compare { left, op, right } => self.resolve_compare(node, left, *op, right, ctx),
            Node::Predicate(predicate) => self.resolve_predicate(node, predicate, ctx),
            Node::Quantifier {
                kind,
                binder,
                domain,
                condition,
            } => self.resolve_quantifier(node, *kind, binder, domain.as_ref(), condition, ctx),
            Node::Select(selector) => self.resolve_select(node, selector, ctx),
        }
    }

    /// Evaluate a term under `ctx`, tagging failures with `node`.
    pub fn eval(&self, term: &Term, ctx: &BindingContext, node: &Node) -> Result<Value, EqlError> {
        term.eval(ctx, self.registry).map_err(|e| e.at(node))
    }

    fn is_enumerable(&self, var: &Variable) -> bool {
        matches!(
            self.registry.domain(var),
            Ok(Domain::Explicit(_) | Domain::Instances(_))
        )
    }

    // -------------------------------------------------------------------------
    // Enumeration
    // -------------------------------------------------------------------------

    /// Bind each of `vars` in turn to every value of its domain.
    fn enumerate(self, vars: Vec<Variable>, ctx: BindingContext, node: &NodeRef) -> BindingStream<'a> {
        let mut stream = single(ctx);
        for var in vars {
            let node = Arc::clone(node);
            stream = extend(stream, move |ctx| self.enumerate_one(&var, ctx, &node));
        }
        stream
    }

    fn enumerate_one(self, var: &Variable, ctx: BindingContext, node: &Node) -> BindingStream<'a> {
        if ctx.is_bound(var) {
            return single(ctx);
        }
        match self.registry.domain_values(var) {
            Ok(Some(values)) => {
                trace!(var = %var, candidates = values.len(), "enumerate");
                let var = var.clone();
                Box::new(
                    values
                        .into_iter()
                        .map(move |value| Ok(ctx.bind(&var, value))),
                )
            }
            Ok(None) | Err(_) => failed(unbound(var, node)),
        }
    }

    // -------------------------------------------------------------------------
    // Connectives
    // -------------------------------------------------------------------------

    fn resolve_and(self, children: Vec<NodeRef>, ctx: BindingContext) -> BindingStream<'a> {
        let mut stream = single(ctx);
        for child in children {
            stream = extend(stream, move |ctx| self.resolve(&child, ctx));
        }
        stream
    }

    fn resolve_union(self, left: NodeRef, right: NodeRef, ctx: BindingContext) -> BindingStream<'a> {
        let right_ctx = ctx.clone();
        Box::new(
            self.resolve(&left, ctx)
                .chain(deferred(move || self.resolve(&right, right_ctx))),
        )
    }

    fn resolve_else_if(
        self,
        node: &NodeRef,
        left: NodeRef,
        right: NodeRef,
        ctx: BindingContext,
    ) -> BindingStream<'a> {
        let right_vars = right.variables();
        let shared: Vec<Variable> = left
            .ordered_variables()
            .into_iter()
            .filter(|v| right_vars.contains(v) && !ctx.is_bound(v) && self.is_enumerable(v))
            .collect();
        extend(self.enumerate(shared, ctx, node), move |ctx| {
            let mut first = self.resolve(&left, ctx.clone()).peekable();
            let stream: BindingStream<'a> = if first.peek().is_some() {
                Box::new(first)
            } else {
                self.resolve(&right, ctx)
            };
            stream
        })
    }

    // -------------------------------------------------------------------------
    // Comparators
    // -------------------------------------------------------------------------

    fn resolve_compare(
        self,
        node: &NodeRef,
        left: &Term,
        op: CompareOp,
        right: &Term,
        ctx: BindingContext,
    ) -> BindingStream<'a> {
        let left_free = unbound_in(left.variables(), &ctx);
        let right_free = unbound_in(right.variables(), &ctx);

        let joined = match op {
            CompareOp::Eq => self
                .try_join(Join::Value, node, left, right, &right_free, &ctx)
                .or_else(|| self.try_join(Join::Value, node, right, left, &left_free, &ctx)),
            CompareOp::In => self.try_join(Join::Element, node, left, right, &right_free, &ctx),
            CompareOp::Contains => {
                self.try_join(Join::Element, node, right, left, &left_free, &ctx)
            }
            _ => None,
        };
        if let Some(stream) = joined {
            return stream;
        }

        let mut vars = left_free;
        for v in right_free {
            if !vars.contains(&v) {
                vars.push(v);
            }
        }
        let (filter_node, left, right) = (Arc::clone(node), left.clone(), right.clone());
        extend(self.enumerate(vars, ctx, node), move |ctx| {
            let holds = self.compare(&filter_node, &left, op, &right, &ctx);
            keep_if(holds, ctx)
        })
    }

    /// Implicit join: bind `target` (a bare unbound variable) from `other`,
    /// enumerating `other`'s variables first when needed.
    ///
    /// Element joins only apply to variables without an enumerable domain;
    /// membership over a domain stays a filter.
    fn try_join(
        self,
        join: Join,
        node: &NodeRef,
        target: &Term,
        other: &Term,
        other_free: &[Variable],
        ctx: &BindingContext,
    ) -> Option<BindingStream<'a>> {
        let Term::Var(var) = target else {
            return None;
        };
        if ctx.is_bound(var) || other_free.contains(var) {
            return None;
        }
        if join == Join::Element && self.is_enumerable(var) {
            return None;
        }
        if !other_free.iter().all(|v| self.is_enumerable(v)) {
            return None;
        }
        let (join_node, var, other) = (Arc::clone(node), var.clone(), other.clone());
        Some(extend(
            self.enumerate(other_free.to_vec(), ctx.clone(), node),
            move |ctx| match join {
                Join::Value => self.join(&join_node, &var, &other, ctx),
                Join::Element => self.join_elements(&join_node, &var, &other, ctx),
            },
        ))
    }

    fn join(self, node: &Node, var: &Variable, other: &Term, ctx: BindingContext) -> BindingStream<'a> {
        let value = match self.eval(other, &ctx, node) {
            Ok(value) => value,
            Err(e) => return failed(e),
        };
        match self.registry.admits(var, &value) {
            Ok(true) => {
                trace!(var = %var, value = %value, "implicit join");
                single(ctx.bind(var, value))
            }
            Ok(false) => nothing(),
            Err(_) => failed(unbound(var, node)),
        }
    }

    fn join_elements(
        self,
        node: &Node,
        var: &Variable,
        container: &Term,
        ctx: BindingContext,
    ) -> BindingStream<'a> {
        let items = match self.eval(container, &ctx, node) {
            Ok(Value::List(items)) => items,
            Ok(other) => {
                return failed(EqlError::EvaluationType {
                    node: node.to_string(),
                    message: format!("cannot bind elements of {}", other.kind()),
                });
            }
            Err(e) => return failed(e),
        };
        trace!(var = %var, elements = items.len(), "element join");
        let (registry, var, node) = (self.registry, var.clone(), node.to_string());
        Box::new(items.into_iter().filter_map(move |item| {
            match registry.admits(&var, &item) {
                Ok(true) => Some(Ok(ctx.bind(&var, item))),
                Ok(false) => None,
                Err(_) => Some(Err(EqlError::UnboundVariable {
                    variable: var.name().to_string(),
                    node: node.clone(),
                })),
            }
        }))
    }

    fn compare(
        &self,
        node: &Node,
        left: &Term,
        op: CompareOp,
        right: &Term,
        ctx: &BindingContext,
    ) -> Result<bool, EqlError> {
        let l = self.eval(left, ctx, node)?;
        let r = self.eval(right, ctx, node)?;
        op.apply(&l, &r).map_err(|message| EqlError::EvaluationType {
            node: node.to_string(),
            message,
        })
    }

    // -------------------------------------------------------------------------
    // Predicates
    // -------------------------------------------------------------------------

    fn resolve_predicate(
        self,
        node: &NodeRef,
        predicate: &Predicate,
        ctx: BindingContext,
    ) -> BindingStream<'a> {
        let mut vars: Vec<Variable> = Vec::new();
        for arg in predicate.args() {
            for v in arg.variables() {
                if !ctx.is_bound(&v) && !vars.contains(&v) {
                    vars.push(v);
                }
            }
        }
        let (test_node, predicate) = (Arc::clone(node), predicate.clone());
        extend(self.enumerate(vars, ctx, node), move |ctx| {
            let holds = self.test_predicate(&test_node, &predicate, &ctx);
            keep_if(holds, ctx)
        })
    }

    fn test_predicate(
        self,
        node: &Node,
        predicate: &Predicate,
        ctx: &BindingContext,
    ) -> Result<bool, EqlError> {
        let args = predicate
            .args()
            .iter()
            .map(|term| self.eval(term, ctx, node))
            .collect::<Result<Vec<_>, _>>()?;

        let holds = match predicate.body() {
            PredicateBody::Native(f) => {
                (**f)(&args).map_err(|source| EqlError::Predicate {
                    predicate: predicate.name().to_string(),
                    node: node.to_string(),
                    source,
                })?
            }
            PredicateBody::HasType(type_name) => args
                .first()
                .and_then(Value::as_entity)
                .is_some_and(|e| self.registry.cache().is_subtype(e.type_name(), type_name)),
            PredicateBody::Expression { params, node: body } => {
                if params.len() != args.len() {
                    return Err(EqlError::EvaluationType {
                        node: node.to_string(),
                        message: format!(
                            "{} expects {} arguments, got {}",
                            predicate.name(),
                            params.len(),
                            args.len()
                        ),
                    });
                }
                let mut scope = BindingContext::new();
                for (param, value) in params.iter().zip(args) {
                    scope = scope.bind(param, value);
                }
                self.resolve(body, scope).next().transpose()?.is_some()
            }
        };
        Ok(holds != predicate.is_inverted())
    }

    // -------------------------------------------------------------------------
    // Quantifiers
    // -------------------------------------------------------------------------

    fn resolve_quantifier(
        self,
        node: &NodeRef,
        kind: QuantifierKind,
        binder: &Variable,
        domain: Option<&Term>,
        condition: &NodeRef,
        ctx: BindingContext,
    ) -> BindingStream<'a> {
        // Outer variables are fixed before the binder is iterated.
        let mut outer = unbound_in(domain.map(Term::variables).unwrap_or_default(), &ctx);
        for v in condition.ordered_variables() {
            if &v != binder && !ctx.is_bound(&v) && !outer.contains(&v) && self.is_enumerable(&v) {
                outer.push(v);
            }
        }
        let test_node = Arc::clone(node);
        let binder = binder.clone();
        let domain = domain.cloned();
        let condition = Arc::clone(condition);
        extend(self.enumerate(outer, ctx, node), move |ctx| {
            let holds =
                self.test_quantifier(&test_node, kind, &binder, domain.as_ref(), &condition, &ctx);
            keep_if(holds, ctx)
        })
    }

    fn test_quantifier(
        self,
        node: &Node,
        kind: QuantifierKind,
        binder: &Variable,
        domain: Option<&Term>,
        condition: &NodeRef,
        ctx: &BindingContext,
    ) -> Result<bool, EqlError> {
        let candidates = match domain {
            None => self
                .registry
                .domain_values(binder)
                .ok()
                .flatten()
                .ok_or_else(|| unbound(binder, node))?,
            Some(term) => match self.eval(term, ctx, node)? {
                Value::List(items) => items,
                other => {
                    return Err(EqlError::EvaluationType {
                        node: node.to_string(),
                        message: format!("quantifier domain must be a list, got {}", other.kind()),
                    });
                }
            },
        };

        for candidate in candidates {
            let satisfied = self
                .resolve(condition, ctx.bind(binder, candidate))
                .next()
                .transpose()?
                .is_some();
            match kind {
                QuantifierKind::ForAll if !satisfied => return Ok(false),
                QuantifierKind::Exists if satisfied => return Ok(true),
                _ => {}
            }
        }
        Ok(kind == QuantifierKind::ForAll)
    }

    // -------------------------------------------------------------------------
    // Selectors
    // -------------------------------------------------------------------------

    fn resolve_select(self, node: &NodeRef, selector: &Selector, ctx: BindingContext) -> BindingStream<'a> {
        let resolved = match &selector.conditions {
            Some(conditions) => self.resolve(conditions, ctx),
            None => single(ctx),
        };
        let projected = selector.projection_variables();
        let check = CartesianCheck::default();
        let select_node = Arc::clone(node);
        extend(resolved, move |ctx| {
            let open: Vec<Variable> = projected
                .iter()
                .filter(|v| !ctx.is_bound(v))
                .cloned()
                .collect();
            let threshold = self.config.cartesian_warning_threshold;
            if let Some((var, domain_size)) = check.run(self.registry, &open, threshold) {
                warn!(
                    var = %var,
                    domain_size,
                    threshold,
                    selector = %select_node,
                    "unconstrained projected variable produces a cartesian product"
                );
            }
            self.enumerate(open, ctx, &select_node)
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::expr::{
        and, concatenate, entity, eq, exists, exists_in, flatten, for_all, gt, has_type, is_in,
        lit, ne, not, or, predicate, set_of, var,
    };
    use crate::{InstanceCache, TypeName};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn named_bodies(names: &[&str]) -> (Registry, Variable) {
        let cache = InstanceCache::shared();
        let bodies: Vec<Value> = names
            .iter()
            .map(|n| Value::Entity(cache.create("Body", [("name", Value::from(*n))])))
            .collect();
        let mut registry = Registry::new(cache);
        let body = registry.declare_over("body", bodies);
        (registry, body)
    }

    fn names(stream: BindingStream<'_>, var: &Variable) -> Vec<String> {
        stream
            .map(|r| {
                r.expect("resolves")
                    .get(var)
                    .and_then(Value::as_entity)
                    .and_then(|e| e.name().map(str::to_string))
                    .expect("named entity")
            })
            .collect()
    }

    fn run<'a>(registry: &'a Registry, node: Node) -> BindingStream<'a> {
        Engine::new(registry, EngineConfig::default()).resolve(&Arc::new(node), BindingContext::new())
    }

    #[test]
    fn else_if_chains_over_shared_variable() {
        let (registry, body) = named_bodies(&["Container1", "Container2", "Handle1", "Handle2"]);
        let name = || var(&body).attr("name");
        let query = and([
            or([
                predicate(Predicate::starts_with(name(), "C")),
                predicate(Predicate::ends_with(name(), "1")),
            ]),
            or([
                predicate(Predicate::starts_with(name(), "H")),
                predicate(Predicate::ends_with(name(), "1")),
            ]),
        ]);
        assert_eq!(
            names(run(&registry, query.clone()), &body),
            vec!["Container1", "Handle1"]
        );
        assert_eq!(
            names(run(&registry, not(query)), &body),
            vec!["Container2", "Handle2"]
        );
    }

    #[test]
    fn implicit_join_binds_without_scanning() {
        let cache = InstanceCache::shared();
        let a = cache.create("Body", [("name", Value::from("A"))]);
        let b = cache.create("Body", [("name", Value::from("B"))]);
        let c = cache.create("Body", [("name", Value::from("C"))]);
        cache.create(
            "Prismatic",
            [("parent", Value::Entity(a)), ("child", Value::Entity(Arc::clone(&b)))],
        );
        cache.create(
            "Fixed",
            [("parent", Value::Entity(b)), ("child", Value::Entity(c))],
        );
        let mut registry = Registry::new(cache);
        let prismatic = registry.declare_typed("prismatic", "Prismatic");
        let fixed = registry.declare_typed("fixed", "Fixed");
        let body = registry.declare_typed("body", "Body");

        let node = and([
            eq(&body, var(&prismatic).attr("child")),
            eq(var(&fixed).attr("parent"), &body),
        ]);
        let results: Vec<BindingContext> = run(&registry, node)
            .collect::<Result<_, _>>()
            .expect("resolves");
        assert_eq!(results.len(), 1);
        let bound_body = results[0].get(&body).and_then(Value::as_entity).expect("bound");
        assert_eq!(bound_body.name(), Some("B"));
    }

    #[test]
    fn free_variable_joins_or_fails() {
        let (mut registry, body) = named_bodies(&["Handle1"]);
        let name = registry.declare_free("name");

        let joined: Vec<_> = run(&registry, eq(&name, var(&body).attr("name")))
            .collect::<Result<_, _>>()
            .expect("free variable joined");
        assert_eq!(joined[0].get(&name), Some(&Value::from("Handle1")));

        let mut stream = run(&registry, ne(&name, "x"));
        assert!(matches!(
            stream.next(),
            Some(Err(EqlError::UnboundVariable { .. }))
        ));
    }

    #[test]
    fn type_mismatch_is_tagged_with_node() {
        let (registry, body) = named_bodies(&["Handle1"]);
        let mut stream = run(&registry, gt(var(&body).attr("name"), 3_i64));
        match stream.next() {
            Some(Err(EqlError::EvaluationType { node, .. })) => {
                assert_eq!(node, "body.name > 3");
            }
            other => panic!("expected type error, got {:?}", other.map(|r| r.is_ok())),
        }
    }

    #[test]
    fn predicate_failure_propagates_with_context() {
        let (registry, body) = named_bodies(&["Handle1"]);
        let failing = Predicate::native("explode", vec![var(&body)], |_| {
            Err("boom".into())
        });
        let mut stream = run(&registry, predicate(failing));
        match stream.next() {
            Some(Err(EqlError::Predicate { predicate, source, .. })) => {
                assert_eq!(predicate, "explode");
                assert_eq!(source.to_string(), "boom");
            }
            _ => panic!("expected predicate failure"),
        }
    }

    #[test]
    fn exists_stops_at_first_witness() {
        let (registry, body) = named_bodies(&["A", "B", "C", "D"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let is_b = Predicate::native("is_b", vec![var(&body).attr("name")], move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(args.first() == Some(&Value::from("B")))
        });

        let results: Vec<_> = run(&registry, exists(&body, predicate(is_b))).collect();
        assert_eq!(results.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn for_all_over_empty_domain_holds() {
        let (mut registry, _body) = named_bodies(&[]);
        let x = registry.declare_over("x", Vec::new());
        let results: Vec<_> = run(&registry, for_all(&x, Node::Constant(false))).collect();
        assert_eq!(results.len(), 1);

        let results: Vec<_> = run(&registry, exists(&x, Node::Constant(true))).collect();
        assert!(results.is_empty());
    }

    #[test]
    fn quantifier_does_not_export_binder() {
        let (mut registry, body) = named_bodies(&["A", "B"]);
        let tag = registry.declare_free("tag");
        let node = exists_in(
            &tag,
            lit(Value::List(vec![Value::from("A"), Value::from("Z")])),
            eq(var(&body).attr("name"), &tag),
        );
        let results: Vec<BindingContext> = run(&registry, node)
            .collect::<Result<_, _>>()
            .expect("resolves");
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_bound(&tag));
        assert!(results[0].is_bound(&body));
    }

    #[test]
    fn union_yields_both_sides_without_dedup() {
        let cache = InstanceCache::shared();
        cache.declare_type("Handle", ["Body"]);
        cache.create("Handle", [("name", Value::from("Handle1"))]);
        cache.create("Body", [("name", Value::from("Body1"))]);
        let mut registry = Registry::new(cache);
        let body = registry.declare_typed("body", "Body");
        let handle = registry.declare_typed("handle", "Handle");

        let node = or([has_type(&body, "Body"), has_type(&handle, "Handle")]);
        assert!(matches!(
            node,
            Node::Or {
                mode: DisjunctionMode::Union,
                ..
            }
        ));
        assert_eq!(run(&registry, node).count(), 3);
    }

    #[test]
    fn selector_enumerates_unconstrained_projection() {
        let cache = InstanceCache::shared();
        for i in 0..3 {
            cache.create("Handle", [("size", Value::Int(i))]);
        }
        let mut registry = Registry::new(cache);
        let handle = registry.declare_typed("handle", "Handle");
        let other = registry.declare_typed("other", "Handle");

        let node = entity(&other, [gt(var(&handle).attr("size"), 1_i64)]);
        let engine = Engine::new(
            &registry,
            EngineConfig::default().with_cartesian_warning_threshold(1),
        );
        let results = engine.resolve(&Arc::new(node), BindingContext::new()).count();
        assert_eq!(results, 3);
    }

    #[test]
    fn restartable_runs_are_independent() {
        let (registry, body) = named_bodies(&["A", "B"]);
        let node = Arc::new(has_type(&body, "Body"));
        let engine = Engine::new(&registry, EngineConfig::default());
        let first = engine.resolve(&node, BindingContext::new()).count();
        let second = engine.resolve(&node, BindingContext::new()).count();
        assert_eq!(first, 2);
        assert_eq!(first, second);
    }

    #[test]
    fn else_if_skips_right_side_when_left_holds() {
        let (registry, body) = named_bodies(&["A", "B"]);
        let right_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&right_calls);
        let is_a = Predicate::native("is_a", vec![var(&body).attr("name")], |args| {
            Ok(args.first() == Some(&Value::from("A")))
        });
        let anything = Predicate::native("anything", vec![var(&body)], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });

        let node = or([predicate(is_a), predicate(anything)]);
        assert!(matches!(
            node,
            Node::Or {
                mode: DisjunctionMode::ElseIf,
                ..
            }
        ));
        assert_eq!(names(run(&registry, node), &body), vec!["A", "B"]);
        assert_eq!(right_calls.load(Ordering::SeqCst), 1);
    }

    /// Cabinets holding drawers, each drawer with a named handle.
    struct Cabinets {
        registry: Registry,
        cabinet: Variable,
        drawer: Variable,
        handle1_drawer: Variable,
    }

    fn cabinets() -> Cabinets {
        let cache = InstanceCache::shared();
        let drawer = |name: &str| {
            let handle = cache.create("Handle", [("name", Value::from(name))]);
            Value::Entity(cache.create("Drawer", [("handle", Value::Entity(handle))]))
        };
        let (d1, d2, d3) = (drawer("Handle1"), drawer("Handle2"), drawer("Handle3"));
        let stray = Value::Entity(cache.create("Handle", [("name", Value::from("Loose"))]));
        cache.create("Cabinet", [("drawers", Value::List(vec![d1, d2, stray]))]);
        cache.create("Cabinet", [("drawers", Value::List(vec![d3]))]);

        let mut registry = Registry::new(cache);
        let cabinet = registry.declare_typed("cabinet", "Cabinet");
        let drawer = registry.declare("drawer", Some(TypeName::new("Drawer")), Domain::Free);
        let handle1_drawer = registry.declare_typed("d", "Drawer");
        Cabinets {
            registry,
            cabinet,
            drawer,
            handle1_drawer,
        }
    }

    fn handle_names(stream: BindingStream<'_>, var: &Variable) -> Vec<String> {
        stream
            .map(|r| {
                r.expect("resolves")
                    .get(var)
                    .and_then(Value::as_entity)
                    .and_then(|d| d.attribute("handle"))
                    .and_then(Value::as_entity)
                    .and_then(|h| h.name().map(str::to_string))
                    .expect("drawer with named handle")
            })
            .collect()
    }

    #[test]
    fn flatten_binds_each_element_of_a_list_attribute() {
        let w = cabinets();
        let node = entity(&w.drawer, [flatten(&w.drawer, var(&w.cabinet).attr("drawers"))]);
        assert_eq!(
            handle_names(run(&w.registry, node), &w.drawer),
            vec!["Handle1", "Handle2", "Handle3"]
        );
    }

    #[test]
    fn flattened_elements_join_with_other_conditions() {
        let w = cabinets();
        let node = entity(
            &w.drawer,
            [
                eq(
                    var(&w.handle1_drawer).attr("handle").attr("name"),
                    "Handle1",
                ),
                flatten(&w.drawer, var(&w.cabinet).attr("drawers")),
                ne(&w.drawer, &w.handle1_drawer),
            ],
        );
        assert_eq!(
            handle_names(run(&w.registry, node), &w.drawer),
            vec!["Handle2", "Handle3"]
        );
    }

    #[test]
    fn membership_binds_free_item_variable() {
        let cache = InstanceCache::shared();
        let tags = Value::List(vec![Value::from("a"), Value::from("b")]);
        cache.create("Shelf", [("tags", tags)]);
        let mut registry = Registry::new(cache);
        let shelf = registry.declare_typed("shelf", "Shelf");
        let tag = registry.declare_free("tag");

        let node = set_of([var(&shelf), var(&tag)], [is_in(&tag, var(&shelf).attr("tags"))]);
        let rows: Vec<BindingContext> = run(&registry, node)
            .collect::<Result<_, _>>()
            .expect("resolves");
        let tags: Vec<&Value> = rows.iter().filter_map(|r| r.get(&tag)).collect();
        assert_eq!(tags, vec![&Value::from("a"), &Value::from("b")]);

        let mut scalar = run(&registry, is_in(&tag, lit(3_i64)));
        assert!(matches!(
            scalar.next(),
            Some(Err(EqlError::EvaluationType { .. }))
        ));
    }

    #[test]
    fn concatenate_tests_membership_across_all_lists() {
        let w = cabinets();
        let is_handle1 = || {
            eq(
                var(&w.handle1_drawer).attr("handle").attr("name"),
                "Handle1",
            )
        };
        let all_drawers = || concatenate(var(&w.cabinet).attr("drawers"));

        let outside = entity(
            &w.handle1_drawer,
            [is_handle1(), not(is_in(&w.handle1_drawer, all_drawers()))],
        );
        assert_eq!(run(&w.registry, outside).count(), 0);

        let inside = entity(
            &w.handle1_drawer,
            [is_handle1(), is_in(&w.handle1_drawer, all_drawers())],
        );
        assert_eq!(
            handle_names(run(&w.registry, inside), &w.handle1_drawer),
            vec!["Handle1"]
        );
    }

    #[test]
    fn cartesian_check_inspects_domains_once() {
        let cache = InstanceCache::shared();
        for i in 0..3 {
            cache.create("Handle", [("size", Value::Int(i))]);
        }
        let mut registry = Registry::new(cache);
        let handle = registry.declare_typed("handle", "Handle");
        let small = registry.declare_over("small", vec![Value::Int(1)]);

        let check = CartesianCheck::default();
        assert!(check.run(&registry, &[], 1).is_none());
        let found = check.run(&registry, &[small.clone(), handle.clone()], 1);
        assert_eq!(found, Some((handle.clone(), 3)));
        assert!(check.run(&registry, &[handle.clone()], 1).is_none());

        let below_first = CartesianCheck::default();
        assert!(below_first.run(&registry, &[small], 1).is_none());
        assert!(below_first.run(&registry, &[handle], 1).is_none());
    }
}
