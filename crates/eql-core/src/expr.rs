//! # Expression Tree
//!
//! Immutable node graph describing relational conditions, plus the
//! node-builder API used to capture them.
//!
//! ## Node Kinds
//!
//! - `And`: conjunction, resolved as a backtracking join
//! - `Or`: disjunction, classified at construction as `ElseIf` (both sides
//!   reference the same variables) or `Union`
//! - `Not`: negation, rewritten away before evaluation (see [`crate::negation`])
//! - `Compare`: comparator between two terms
//! - `Predicate`: boolean test over argument terms
//! - `Quantifier`: `ForAll` / `Exists` over a binder variable
//! - `Select`: entity or set-of selector projecting terms
//!
//! ## Element Access
//!
//! - [`flatten`] binds a free variable to each element of a list term,
//!   keeping every other binding (one result per element)
//! - [`concatenate`] gathers a list term over every value of its unbound
//!   variables into a single list value
//!
//! Children are shared through [`NodeRef`] so rewritten trees reuse the
//! untouched parts of the original.

use crate::{BindingContext, Entity, EqlError, Predicate, Registry, TypeName, Value, Variable};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Shared handle to an expression node.
pub type NodeRef = Arc<Node>;

// =============================================================================
// TERMS
// =============================================================================

/// A value-producing expression: the operands of comparators, predicates,
/// projections and conclusions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// A declared variable.
    Var(Variable),
    /// A constant.
    Literal(Value),
    /// Attribute access on an entity.
    Attr(Box<Term>, String),
    /// Element access on a list.
    Index(Box<Term>, usize),
    /// Length of a list or text.
    Len(Box<Term>),
    /// Construction of a derived entity (used by rule conclusions).
    Construct {
        type_name: TypeName,
        fields: Vec<(String, Term)>,
    },
    /// All elements of the inner term, gathered over every value of the
    /// variables it leaves unbound. Non-list values count as one element.
    Concat(Box<Term>),
}

/// Failure while evaluating a term, before node context is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermError {
    /// The term references a variable that is not bound.
    Unbound(Variable),
    /// The term was applied to a value of the wrong kind.
    Type(String),
}

impl TermError {
    /// Attach the offending node and turn the failure into an engine error.
    pub fn at(self, node: &dyn fmt::Display) -> EqlError {
        match self {
            TermError::Unbound(var) => EqlError::UnboundVariable {
                variable: var.name().to_string(),
                node: node.to_string(),
            },
            TermError::Type(message) => EqlError::EvaluationType {
                node: node.to_string(),
                message,
            },
        }
    }
}

impl Term {
    /// Attribute access: `self.name`.
    #[must_use]
    pub fn attr(self, name: impl Into<String>) -> Term {
        Term::Attr(Box::new(self), name.into())
    }

    /// Element access: `self[index]`.
    #[must_use]
    pub fn index(self, index: usize) -> Term {
        Term::Index(Box::new(self), index)
    }

    /// Length of a list or text: `len(self)`.
    #[must_use]
    pub fn length(self) -> Term {
        Term::Len(Box::new(self))
    }

    /// Construct a derived entity of `type_name` from named field terms.
    #[must_use]
    pub fn construct<I, K>(type_name: impl Into<TypeName>, fields: I) -> Term
    where
        I: IntoIterator<Item = (K, Term)>,
        K: Into<String>,
    {
        Term::Construct {
            type_name: type_name.into(),
            fields: fields.into_iter().map(|(k, t)| (k.into(), t)).collect(),
        }
    }

    /// Variables referenced by this term, in order of first appearance.
    ///
    /// Variables under `Concat` are gathered inside the term and are not
    /// reported.
    #[must_use]
    pub fn variables(&self) -> Vec<Variable> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut Vec<Variable>) {
        match self {
            Term::Var(v) => push_unique(out, v),
            Term::Literal(_) => {}
            Term::Attr(inner, _) | Term::Index(inner, _) | Term::Len(inner) => {
                inner.collect_variables(out);
            }
            Term::Construct { fields, .. } => {
                for (_, term) in fields {
                    term.collect_variables(out);
                }
            }
            Term::Concat(_) => {}
        }
    }

    /// Evaluate this term under the given bindings.
    ///
    /// `Construct` allocates a fresh identity from the cache without
    /// registering the derived entity. `Concat` enumerates the domains of
    /// its unbound variables from `registry`.
    pub fn eval(&self, ctx: &BindingContext, registry: &Registry) -> Result<Value, TermError> {
        match self {
            Term::Var(v) => ctx.get(v).cloned().ok_or_else(|| TermError::Unbound(v.clone())),
            Term::Literal(value) => Ok(value.clone()),
            Term::Attr(inner, name) => match inner.eval(ctx, registry)? {
                Value::Entity(entity) => entity.attribute(name).cloned().ok_or_else(|| {
                    TermError::Type(format!("{} has no attribute `{}`", entity, name))
                }),
                other => Err(TermError::Type(format!(
                    "cannot read attribute `{}` of {}",
                    name,
                    other.kind()
                ))),
            },
            Term::Index(inner, index) => match inner.eval(ctx, registry)? {
                Value::List(items) => items.get(*index).cloned().ok_or_else(|| {
                    TermError::Type(format!(
                        "index {} out of range for list of length {}",
                        index,
                        items.len()
                    ))
                }),
                other => Err(TermError::Type(format!("cannot index into {}", other.kind()))),
            },
            Term::Len(inner) => match inner.eval(ctx, registry)? {
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                Value::Text(text) => Ok(Value::Int(text.chars().count() as i64)),
                other => Err(TermError::Type(format!(
                    "{} has no length",
                    other.kind()
                ))),
            },
            Term::Construct { type_name, fields } => {
                let mut attributes = BTreeMap::new();
                for (name, term) in fields {
                    attributes.insert(name.clone(), term.eval(ctx, registry)?);
                }
                let id = registry.cache().allocate_id();
                let entity = Entity::new(id, type_name.clone(), attributes);
                Ok(Value::Entity(Arc::new(entity)))
            }
            Term::Concat(inner) => {
                let mut open = Vec::new();
                inner.collect_variables(&mut open);
                open.retain(|v| !ctx.is_bound(v));
                let mut items = Vec::new();
                inner.gather(&open, ctx.clone(), registry, &mut items)?;
                Ok(Value::List(items))
            }
        }
    }

    /// Append the elements of this term for every assignment of `open`.
    fn gather(
        &self,
        open: &[Variable],
        ctx: BindingContext,
        registry: &Registry,
        out: &mut Vec<Value>,
    ) -> Result<(), TermError> {
        let Some((first, rest)) = open.split_first() else {
            match self.eval(&ctx, registry)? {
                Value::List(items) => out.extend(items),
                other => out.push(other),
            }
            return Ok(());
        };
        let values = registry
            .domain_values(first)
            .ok()
            .flatten()
            .ok_or_else(|| TermError::Unbound(first.clone()))?;
        for value in values {
            self.gather(rest, ctx.bind(first, value), registry, out)?;
        }
        Ok(())
    }
}

fn push_unique(out: &mut Vec<Variable>, var: &Variable) {
    if !out.contains(var) {
        out.push(var.clone());
    }
}

impl From<&Variable> for Term {
    fn from(v: &Variable) -> Self {
        Term::Var(v.clone())
    }
}

impl From<Variable> for Term {
    fn from(v: Variable) -> Self {
        Term::Var(v)
    }
}

impl From<Value> for Term {
    fn from(v: Value) -> Self {
        Term::Literal(v)
    }
}

impl From<i64> for Term {
    fn from(i: i64) -> Self {
        Term::Literal(Value::Int(i))
    }
}

impl From<bool> for Term {
    fn from(b: bool) -> Self {
        Term::Literal(Value::Bool(b))
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term::Literal(Value::from(s))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(v) => write!(f, "{}", v),
            Term::Literal(value) => write!(f, "{}", value),
            Term::Attr(inner, name) => write!(f, "{}.{}", inner, name),
            Term::Index(inner, index) => write!(f, "{}[{}]", inner, index),
            Term::Len(inner) => write!(f, "len({})", inner),
            Term::Construct { type_name, fields } => {
                write!(f, "{}(", type_name)?;
                for (i, (name, term)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", name, term)?;
                }
                f.write_str(")")
            }
            Term::Concat(inner) => write!(f, "concatenate({})", inner),
        }
    }
}

/// Term referencing a variable.
#[must_use]
pub fn var(v: &Variable) -> Term {
    Term::Var(v.clone())
}

/// Literal term.
#[must_use]
pub fn lit(value: impl Into<Value>) -> Term {
    Term::Literal(value.into())
}

/// One list holding the elements of `term` for every value of its unbound
/// variables.
#[must_use]
pub fn concatenate(term: impl Into<Term>) -> Term {
    Term::Concat(Box::new(term.into()))
}

// =============================================================================
// OPERATORS
// =============================================================================

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `left in right`
    In,
    /// `left not in right`
    NotIn,
    /// `left contains right`
    Contains,
    /// `left not contains right`
    NotContains,
}

impl CompareOp {
    /// The operator that holds exactly when `self` does not.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Ge => CompareOp::Lt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::In => CompareOp::NotIn,
            CompareOp::NotIn => CompareOp::In,
            CompareOp::Contains => CompareOp::NotContains,
            CompareOp::NotContains => CompareOp::Contains,
        }
    }

    /// Operator symbol as rendered in expressions.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
            CompareOp::Contains => "contains",
            CompareOp::NotContains => "not contains",
        }
    }

    /// Apply the operator to two resolved values.
    ///
    /// Equality never fails; ordering and membership fail on kinds that
    /// do not support them.
    pub fn apply(self, left: &Value, right: &Value) -> Result<bool, String> {
        match self {
            CompareOp::Eq => Ok(left == right),
            CompareOp::Ne => Ok(left != right),
            CompareOp::Lt => left.compare(right).map(|o| o.is_lt()),
            CompareOp::Le => left.compare(right).map(|o| o.is_le()),
            CompareOp::Gt => left.compare(right).map(|o| o.is_gt()),
            CompareOp::Ge => left.compare(right).map(|o| o.is_ge()),
            CompareOp::In => right.contains(left),
            CompareOp::NotIn => right.contains(left).map(|b| !b),
            CompareOp::Contains => left.contains(right),
            CompareOp::NotContains => left.contains(right).map(|b| !b),
        }
    }
}

/// How a disjunction combines its sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisjunctionMode {
    /// Exclusive: right is resolved only when left yields nothing.
    ElseIf,
    /// Inclusive: left results followed by right results.
    Union,
}

/// Quantifier kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierKind {
    ForAll,
    Exists,
}

/// Selector kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    /// Projects a single term.
    Entity,
    /// Projects a tuple of terms.
    SetOf,
}

// =============================================================================
// NODES
// =============================================================================

/// A projection over the bindings produced by its conditions.
#[derive(Debug, Clone)]
pub struct Selector {
    pub kind: SelectorKind,
    pub projection: Vec<Term>,
    pub conditions: Option<NodeRef>,
}

impl Selector {
    /// Variables referenced by the projection, in order of appearance.
    #[must_use]
    pub fn projection_variables(&self) -> Vec<Variable> {
        let mut out = Vec::new();
        for term in &self.projection {
            term.collect_variables(&mut out);
        }
        out
    }
}

/// An expression node.
#[derive(Debug, Clone)]
pub enum Node {
    /// Constant truth value.
    Constant(bool),
    /// Conjunction.
    And(Vec<NodeRef>),
    /// Disjunction.
    Or {
        left: NodeRef,
        right: NodeRef,
        mode: DisjunctionMode,
    },
    /// Negation.
    Not(NodeRef),
    /// Comparator.
    Compare { left: Term, op: CompareOp, right: Term },
    /// Predicate test.
    Predicate(Predicate),
    /// Quantifier over `binder`. Without an explicit domain term the
    /// binder's declared domain is used.
    Quantifier {
        kind: QuantifierKind,
        binder: Variable,
        domain: Option<Term>,
        condition: NodeRef,
    },
    /// Entity or set-of selector.
    Select(Selector),
}

impl Node {
    /// Variables referenced by this node. Quantifier binders are local to
    /// their quantifier and are not reported.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<Variable> {
        self.ordered_variables().into_iter().collect()
    }

    /// Variables referenced by this node, in order of first appearance.
    #[must_use]
    pub fn ordered_variables(&self) -> Vec<Variable> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    /// Quantifier binders introduced anywhere in this node.
    #[must_use]
    pub fn binders(&self) -> Vec<Variable> {
        let mut out = Vec::new();
        self.collect_binders(&mut out);
        out
    }

    fn collect_binders(&self, out: &mut Vec<Variable>) {
        match self {
            Node::And(children) => {
                for child in children {
                    child.collect_binders(out);
                }
            }
            Node::Or { left, right, .. } => {
                left.collect_binders(out);
                right.collect_binders(out);
            }
            Node::Not(child) => child.collect_binders(out),
            Node::Quantifier {
                binder, condition, ..
            } => {
                push_unique(out, binder);
                condition.collect_binders(out);
            }
            Node::Select(selector) => {
                if let Some(conditions) = &selector.conditions {
                    conditions.collect_binders(out);
                }
            }
            Node::Constant(_) | Node::Compare { .. } | Node::Predicate(_) => {}
        }
    }

    fn collect_variables(&self, out: &mut Vec<Variable>) {
        match self {
            Node::Constant(_) => {}
            Node::And(children) => {
                for child in children {
                    child.collect_variables(out);
                }
            }
            Node::Or { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Node::Not(child) => child.collect_variables(out),
            Node::Compare { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Node::Predicate(p) => {
                for arg in p.args() {
                    arg.collect_variables(out);
                }
            }
            Node::Quantifier {
                binder,
                domain,
                condition,
                ..
            } => {
                if let Some(term) = domain {
                    term.collect_variables(out);
                }
                for v in condition.ordered_variables() {
                    if &v != binder {
                        push_unique(out, &v);
                    }
                }
            }
            Node::Select(selector) => {
                for term in &selector.projection {
                    term.collect_variables(out);
                }
                if let Some(conditions) = &selector.conditions {
                    conditions.collect_variables(out);
                }
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Constant(b) => write!(f, "{}", b),
            Node::And(children) => {
                f.write_str("(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    write!(f, "{}", child)?;
                }
                f.write_str(")")
            }
            Node::Or { left, right, mode } => match mode {
                DisjunctionMode::ElseIf => write!(f, "({} or {})", left, right),
                DisjunctionMode::Union => write!(f, "({} union {})", left, right),
            },
            Node::Not(child) => write!(f, "not {}", child),
            Node::Compare { left, op, right } => write!(f, "{} {} {}", left, op.symbol(), right),
            Node::Predicate(p) => write!(f, "{}", p),
            Node::Quantifier {
                kind,
                binder,
                domain,
                condition,
            } => {
                let name = match kind {
                    QuantifierKind::ForAll => "for_all",
                    QuantifierKind::Exists => "exists",
                };
                match domain {
                    Some(term) => write!(f, "{}({} in {}, {})", name, binder, term, condition),
                    None => write!(f, "{}({}, {})", name, binder, condition),
                }
            }
            Node::Select(selector) => {
                match selector.kind {
                    SelectorKind::Entity => f.write_str("entity(")?,
                    SelectorKind::SetOf => f.write_str("set_of(")?,
                }
                for (i, term) in selector.projection.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", term)?;
                }
                if let Some(conditions) = &selector.conditions {
                    write!(f, " where {}", conditions)?;
                }
                f.write_str(")")
            }
        }
    }
}

// =============================================================================
// BUILDER API
// =============================================================================

/// Conjunction of all `nodes`. A single node is returned unchanged and an
/// empty conjunction is `true`.
#[must_use]
pub fn and(nodes: impl IntoIterator<Item = Node>) -> Node {
    let mut children: Vec<Node> = nodes.into_iter().collect();
    if children.len() > 1 {
        return Node::And(children.into_iter().map(Arc::new).collect());
    }
    children.pop().unwrap_or(Node::Constant(true))
}

/// Disjunction of all `nodes`, chained left-associatively. An empty
/// disjunction is `false`.
#[must_use]
pub fn or(nodes: impl IntoIterator<Item = Node>) -> Node {
    nodes
        .into_iter()
        .reduce(disjunction)
        .unwrap_or(Node::Constant(false))
}

/// Two-sided disjunction, classified as `ElseIf` when both sides reference
/// the identical set of variables and as `Union` otherwise.
#[must_use]
pub fn disjunction(left: Node, right: Node) -> Node {
    let mode = if left.variables() == right.variables() {
        DisjunctionMode::ElseIf
    } else {
        DisjunctionMode::Union
    };
    Node::Or {
        left: Arc::new(left),
        right: Arc::new(right),
        mode,
    }
}

/// Negation of `node`.
#[must_use]
pub fn not(node: Node) -> Node {
    Node::Not(Arc::new(node))
}

/// Comparator node.
#[must_use]
pub fn compare(left: impl Into<Term>, op: CompareOp, right: impl Into<Term>) -> Node {
    Node::Compare {
        left: left.into(),
        op,
        right: right.into(),
    }
}

/// `left == right`
#[must_use]
pub fn eq(left: impl Into<Term>, right: impl Into<Term>) -> Node {
    compare(left, CompareOp::Eq, right)
}

/// `left != right`
#[must_use]
pub fn ne(left: impl Into<Term>, right: impl Into<Term>) -> Node {
    compare(left, CompareOp::Ne, right)
}

/// `left < right`
#[must_use]
pub fn lt(left: impl Into<Term>, right: impl Into<Term>) -> Node {
    compare(left, CompareOp::Lt, right)
}

/// `left <= right`
#[must_use]
pub fn le(left: impl Into<Term>, right: impl Into<Term>) -> Node {
    compare(left, CompareOp::Le, right)
}

/// `left > right`
#[must_use]
pub fn gt(left: impl Into<Term>, right: impl Into<Term>) -> Node {
    compare(left, CompareOp::Gt, right)
}

/// `left >= right`
#[must_use]
pub fn ge(left: impl Into<Term>, right: impl Into<Term>) -> Node {
    compare(left, CompareOp::Ge, right)
}

/// `item in container`
#[must_use]
pub fn is_in(item: impl Into<Term>, container: impl Into<Term>) -> Node {
    compare(item, CompareOp::In, container)
}

/// `container contains item`
#[must_use]
pub fn contains(container: impl Into<Term>, item: impl Into<Term>) -> Node {
    compare(container, CompareOp::Contains, item)
}

/// Bind `item` to each element of the list `iterable` evaluates to.
///
/// The other bindings are kept, so a query over `flatten(&drawer,
/// cabinet.drawers)` yields one result per drawer of every cabinet. `item`
/// must be declared without an enumerable domain; otherwise this is a
/// plain membership filter over `item`'s domain.
#[must_use]
pub fn flatten(item: &Variable, iterable: impl Into<Term>) -> Node {
    is_in(item, iterable)
}

/// Universal quantifier over the binder's declared domain.
#[must_use]
pub fn for_all(binder: &Variable, condition: Node) -> Node {
    quantifier(QuantifierKind::ForAll, binder, None, condition)
}

/// Universal quantifier over the list a term evaluates to.
#[must_use]
pub fn for_all_in(binder: &Variable, domain: impl Into<Term>, condition: Node) -> Node {
    quantifier(QuantifierKind::ForAll, binder, Some(domain.into()), condition)
}

/// Existential quantifier over the binder's declared domain.
#[must_use]
pub fn exists(binder: &Variable, condition: Node) -> Node {
    quantifier(QuantifierKind::Exists, binder, None, condition)
}

/// Existential quantifier over the list a term evaluates to.
#[must_use]
pub fn exists_in(binder: &Variable, domain: impl Into<Term>, condition: Node) -> Node {
    quantifier(QuantifierKind::Exists, binder, Some(domain.into()), condition)
}

fn quantifier(kind: QuantifierKind, binder: &Variable, domain: Option<Term>, condition: Node) -> Node {
    Node::Quantifier {
        kind,
        binder: binder.clone(),
        domain,
        condition: Arc::new(condition),
    }
}

/// Predicate node.
#[must_use]
pub fn predicate(p: Predicate) -> Node {
    Node::Predicate(p)
}

/// Type test: holds when `term` evaluates to an entity of `type_name` or
/// one of its subtypes.
#[must_use]
pub fn has_type(term: impl Into<Term>, type_name: impl Into<TypeName>) -> Node {
    Node::Predicate(Predicate::has_type(term, type_name))
}

/// Entity selector projecting a single term.
#[must_use]
pub fn entity(projection: impl Into<Term>, conditions: impl IntoIterator<Item = Node>) -> Node {
    select(SelectorKind::Entity, vec![projection.into()], conditions)
}

/// Set selector projecting a tuple of terms.
#[must_use]
pub fn set_of<T: Into<Term>>(
    projection: impl IntoIterator<Item = T>,
    conditions: impl IntoIterator<Item = Node>,
) -> Node {
    let projection = projection.into_iter().map(Into::into).collect();
    select(SelectorKind::SetOf, projection, conditions)
}

fn select(kind: SelectorKind, projection: Vec<Term>, conditions: impl IntoIterator<Item = Node>) -> Node {
    let conditions: Vec<Node> = conditions.into_iter().collect();
    let conditions = if conditions.is_empty() {
        None
    } else {
        Some(Arc::new(and(conditions)))
    };
    Node::Select(Selector {
        kind,
        projection,
        conditions,
    })
}

// =============================================================================
// TESTS
// =============================================================================
