//! # Rule Trees
//!
//! Derive new entities from matched patterns.
//!
//! A [`Rule`] pairs query conditions with a tree of [`RuleNode`]s. The tree
//! is walked once per top-level binding of the conditions:
//!
//! - The root's conclusions are prepared for the binding
//! - The first `Refinement` child whose condition holds fires and overrides
//!   the parent's conclusions
//! - With no refinement firing, `Alternative` children are tested in order
//!   (first match, or all matching per [`AlternativePolicy`]) and override
//!   the parent the same way
//! - With nothing firing, the parent's conclusions stand
//! - `Next` children fire independently whenever their condition holds
//!
//! `Add` conclusions accumulate into one combined result; `Set` conclusions
//! bind their target for later conclusions and for the children.

use crate::engine::{BindingStream, Engine};
use crate::expr::{Node, NodeRef, Term, and};
use crate::query::check_declared;
use crate::{AlternativePolicy, BindingContext, EngineConfig, EqlError, Registry, Value, Variable};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

// =============================================================================
// RULE NODES
// =============================================================================

/// Role of a node within its parent's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Base,
    Refinement,
    Alternative,
    Next,
}

/// A conclusion attached to a rule node.
#[derive(Debug, Clone)]
pub enum Conclusion {
    /// Append the value to the target's results.
    Add { target: Variable, value: Term },
    /// Bind the target to the value for the rest of the branch.
    Set { target: Variable, value: Term },
}

impl Conclusion {
    fn value(&self) -> &Term {
        match self {
            Conclusion::Add { value, .. } | Conclusion::Set { value, .. } => value,
        }
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conclusion::Add { target, value } => write!(f, "add({}, {})", target, value),
            Conclusion::Set { target, value } => write!(f, "set({}, {})", target, value),
        }
    }
}

/// A node of a rule tree.
#[derive(Debug, Clone)]
pub struct RuleNode {
    kind: RuleKind,
    condition: Option<NodeRef>,
    conclusions: Vec<Conclusion>,
    children: Vec<RuleNode>,
}

impl RuleNode {
    fn new(kind: RuleKind, conditions: Vec<Node>) -> Self {
        let condition = if conditions.is_empty() {
            None
        } else {
            Some(Arc::new(and(conditions)))
        };
        Self {
            kind,
            condition,
            conclusions: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Root of a rule tree: fires for every top-level binding.
    #[must_use]
    pub fn base() -> Self {
        Self::new(RuleKind::Base, Vec::new())
    }

    /// Refinement of the parent: overrides it when `conditions` hold.
    #[must_use]
    pub fn refinement(conditions: impl IntoIterator<Item = Node>) -> Self {
        Self::new(RuleKind::Refinement, conditions.into_iter().collect())
    }

    /// Alternative to the parent's refinements.
    #[must_use]
    pub fn alternative(conditions: impl IntoIterator<Item = Node>) -> Self {
        Self::new(RuleKind::Alternative, conditions.into_iter().collect())
    }

    /// Independent branch ("also if").
    #[must_use]
    pub fn next(conditions: impl IntoIterator<Item = Node>) -> Self {
        Self::new(RuleKind::Next, conditions.into_iter().collect())
    }

    /// Add `value` to the results of `target`.
    #[must_use]
    pub fn add(mut self, target: &Variable, value: impl Into<Term>) -> Self {
        self.conclusions.push(Conclusion::Add {
            target: target.clone(),
            value: value.into(),
        });
        self
    }

    /// Bind `target` to `value` for the rest of this branch.
    #[must_use]
    pub fn set(mut self, target: &Variable, value: impl Into<Term>) -> Self {
        self.conclusions.push(Conclusion::Set {
            target: target.clone(),
            value: value.into(),
        });
        self
    }

    /// Append a child node.
    #[must_use]
    pub fn child(mut self, node: RuleNode) -> Self {
        self.children.push(node);
        self
    }

    /// Role of this node.
    #[must_use]
    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Extra condition of this node.
    #[must_use]
    pub fn condition(&self) -> Option<&NodeRef> {
        self.condition.as_ref()
    }

    /// Conclusions, in declaration order.
    #[must_use]
    pub fn conclusions(&self) -> &[Conclusion] {
        &self.conclusions
    }

    /// Children, in declaration order.
    #[must_use]
    pub fn children(&self) -> &[RuleNode] {
        &self.children
    }

    /// Number of nodes in this subtree.
    fn size(&self) -> usize {
        1 + self.children.iter().map(RuleNode::size).sum::<usize>()
    }

    /// Variables whose values identify one firing of this node's
    /// conclusions. Targets set by the node itself are excluded.
    fn dedup_variables(&self) -> Vec<Variable> {
        let set_here: Vec<&Variable> = self
            .conclusions
            .iter()
            .filter_map(|c| match c {
                Conclusion::Set { target, .. } => Some(target),
                Conclusion::Add { .. } => None,
            })
            .collect();
        let mut out: Vec<Variable> = Vec::new();
        for conclusion in &self.conclusions {
            for v in conclusion.value().variables() {
                if !set_here.contains(&&v) && !out.contains(&v) {
                    out.push(v);
                }
            }
        }
        out
    }

    fn collect_variables(&self, out: &mut Vec<Variable>) {
        if let Some(condition) = &self.condition {
            out.extend(condition.ordered_variables());
            out.extend(condition.binders());
        }
        for conclusion in &self.conclusions {
            match conclusion {
                Conclusion::Add { target, value } | Conclusion::Set { target, value } => {
                    out.push(target.clone());
                    out.extend(value.variables());
                }
            }
        }
        for child in &self.children {
            child.collect_variables(out);
        }
    }

    fn render(&self, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = "  ".repeat(depth);
        let label = match self.kind {
            RuleKind::Base => "base",
            RuleKind::Refinement => "refinement",
            RuleKind::Alternative => "alternative",
            RuleKind::Next => "next",
        };
        match &self.condition {
            Some(condition) => writeln!(f, "{}{} {}", indent, label, condition)?,
            None => writeln!(f, "{}{}", indent, label)?,
        }
        for conclusion in &self.conclusions {
            writeln!(f, "{}  {}", indent, conclusion)?;
        }
        for child in &self.children {
            child.render(depth + 1, f)?;
        }
        Ok(())
    }
}

impl fmt::Display for RuleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(0, f)
    }
}

// =============================================================================
// RULE
// =============================================================================

/// A value derived by an `Add` conclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derived {
    pub target: Variable,
    pub value: Value,
}

/// Query conditions plus the rule tree walked for each of their bindings.
#[derive(Debug, Clone)]
pub struct Rule {
    conditions: NodeRef,
    root: RuleNode,
}

impl Rule {
    /// Create a rule from its query conditions and root node.
    #[must_use]
    pub fn new(conditions: impl IntoIterator<Item = Node>, root: RuleNode) -> Self {
        Self {
            conditions: Arc::new(and(conditions)),
            root,
        }
    }

    /// The query conditions.
    #[must_use]
    pub fn conditions(&self) -> &NodeRef {
        &self.conditions
    }

    /// The root of the rule tree.
    #[must_use]
    pub fn root(&self) -> &RuleNode {
        &self.root
    }

    /// Check that every referenced variable is declared in `registry`.
    pub fn validate(&self, registry: &Registry) -> Result<(), EqlError> {
        let mut vars = self.conditions.ordered_variables();
        vars.extend(self.conditions.binders());
        self.root.collect_variables(&mut vars);
        check_declared(registry, &vars, &self.conditions)
    }

    /// Lazily derive conclusions with the default configuration.
    pub fn evaluate<'a>(&'a self, registry: &'a Registry) -> Conclusions<'a> {
        self.evaluate_with(registry, &EngineConfig::default())
    }

    /// Lazily derive conclusions with an explicit configuration.
    pub fn evaluate_with<'a>(&'a self, registry: &'a Registry, config: &EngineConfig) -> Conclusions<'a> {
        let engine = Engine::new(registry, *config);
        debug!(conditions = %self.conditions, "rule evaluation started");
        let bindings: BindingStream<'a> = match self.validate(registry) {
            Ok(()) => engine.resolve(&self.conditions, BindingContext::new()),
            Err(e) => Box::new(std::iter::once(Err(e))),
        };
        Conclusions {
            engine,
            root: &self.root,
            bindings,
            pending: VecDeque::new(),
            seen: BTreeMap::new(),
            done: false,
        }
    }

    /// Collect every conclusion into a [`ConclusionSet`].
    pub fn conclusions(&self, registry: &Registry) -> Result<ConclusionSet, EqlError> {
        let derived = self.evaluate(registry).collect::<Result<Vec<_>, _>>()?;
        Ok(ConclusionSet { derived })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "when {}", self.conditions)?;
        self.root.render(1, f)
    }
}

// =============================================================================
// CONCLUSIONS
// =============================================================================

/// Lazy stream of derived values.
///
/// The rule tree is walked for one top-level binding at a time. Fuses after
/// the first error.
pub struct Conclusions<'a> {
    engine: Engine<'a>,
    root: &'a RuleNode,
    bindings: BindingStream<'a>,
    pending: VecDeque<Derived>,
    /// Assignments already concluded, per node (pre-order index).
    seen: BTreeMap<usize, BTreeSet<Vec<Value>>>,
    done: bool,
}

impl<'a> Conclusions<'a> {
    /// Walk a node whose condition already holds under `ctx`.
    fn fire(&mut self, node: &'a RuleNode, id: usize, ctx: BindingContext) -> Result<Vec<Derived>, EqlError> {
        let key: Vec<Value> = node
            .dedup_variables()
            .iter()
            .map(|v| ctx.get(v).cloned().unwrap_or(Value::Null))
            .collect();
        let fresh = self.seen.entry(id).or_default().insert(key);
        trace!(node = id, fresh, "rule branch fired");

        let registry = self.engine.registry();
        let mut scope = ctx;
        let mut own = Vec::new();
        for conclusion in &node.conclusions {
            match conclusion {
                Conclusion::Set { target, value } => {
                    let value = value.eval(&scope, registry).map_err(|e| e.at(conclusion))?;
                    scope = scope.bind(target, value);
                }
                Conclusion::Add { target, value } if fresh => {
                    let value = value.eval(&scope, registry).map_err(|e| e.at(conclusion))?;
                    own.push(Derived {
                        target: target.clone(),
                        value,
                    });
                }
                Conclusion::Add { .. } => {}
            }
        }

        let mut ids = Vec::with_capacity(node.children.len());
        let mut next_id = id + 1;
        for child in &node.children {
            ids.push(next_id);
            next_id += child.size();
        }
        let children: Vec<(&'a RuleNode, usize)> = node.children.iter().zip(ids).collect();

        let mut exclusive: Option<Vec<Derived>> = None;
        for &(child, child_id) in &children {
            if child.kind != RuleKind::Refinement {
                continue;
            }
            if let Some(out) = self.try_branch(child, child_id, &scope)? {
                exclusive = Some(out);
                break;
            }
        }
        if exclusive.is_none() {
            for &(child, child_id) in &children {
                if child.kind != RuleKind::Alternative {
                    continue;
                }
                if let Some(out) = self.try_branch(child, child_id, &scope)? {
                    exclusive.get_or_insert_with(Vec::new).extend(out);
                    if self.engine.config().alternative_policy == AlternativePolicy::FirstMatch {
                        break;
                    }
                }
            }
        }

        let mut result = exclusive.unwrap_or(own);
        for &(child, child_id) in &children {
            if matches!(child.kind, RuleKind::Next | RuleKind::Base) {
                if let Some(out) = self.try_branch(child, child_id, &scope)? {
                    result.extend(out);
                }
            }
        }
        Ok(result)
    }

    /// Fire `node` for every binding of its condition under `ctx`.
    /// Returns `None` when the condition does not hold.
    fn try_branch(
        &mut self,
        node: &'a RuleNode,
        id: usize,
        ctx: &BindingContext,
    ) -> Result<Option<Vec<Derived>>, EqlError> {
        let bindings: BindingStream<'a> = match &node.condition {
            Some(condition) => self.engine.resolve(condition, ctx.clone()),
            None => Box::new(std::iter::once(Ok(ctx.clone()))),
        };
        let mut fired = false;
        let mut out = Vec::new();
        for binding in bindings {
            let binding = binding?;
            fired = true;
            out.extend(self.fire(node, id, binding)?);
        }
        Ok(fired.then_some(out))
    }

    fn walk(&mut self, ctx: BindingContext) -> Result<Vec<Derived>, EqlError> {
        let root = self.root;
        self.try_branch(root, 0, &ctx).map(Option::unwrap_or_default)
    }
}

impl Iterator for Conclusions<'_> {
    type Item = Result<Derived, EqlError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(derived) = self.pending.pop_front() {
                return Some(Ok(derived));
            }
            if self.done {
                return None;
            }
            match self.bindings.next() {
                Some(Ok(ctx)) => match self.walk(ctx) {
                    Ok(derived) => self.pending.extend(derived),
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    debug!(branches = self.seen.len(), "rule evaluation finished");
                    return None;
                }
            }
        }
    }
}

/// Every value derived by a rule, in firing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConclusionSet {
    derived: Vec<Derived>,
}

impl ConclusionSet {
    /// Values added to `target`, in firing order.
    pub fn get<'s>(&'s self, target: &'s Variable) -> impl Iterator<Item = &'s Value> + 's {
        self.derived
            .iter()
            .filter(move |d| &d.target == target)
            .map(|d| &d.value)
    }

    /// Every derived value, in firing order.
    pub fn iter(&self) -> impl Iterator<Item = &Derived> {
        self.derived.iter()
    }

    /// Targets that received at least one value.
    #[must_use]
    pub fn targets(&self) -> BTreeSet<Variable> {
        self.derived.iter().map(|d| d.target.clone()).collect()
    }

    /// Number of derived values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.derived.len()
    }

    /// Check if nothing was derived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.derived.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
