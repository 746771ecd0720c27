//! # Predicates
//!
//! Named boolean tests over argument terms.
//!
//! A predicate body is either native code or a nested expression tree. The
//! engine resolves every argument to a value before calling the body, so a
//! body only ever sees ground values.
//!
//! Predicate bodies must be pure: the engine may call them any number of
//! times, in any order compatible with the search.

use crate::{EqlError, NodeRef, PredicateFailure, Term, TypeName, Value, Variable};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Native predicate implementation.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<bool, PredicateFailure> + Send + Sync>;

/// The implementation behind a predicate.
#[derive(Clone)]
pub enum PredicateBody {
    /// Native code.
    Native(NativeFn),
    /// A nested expression tree. Holds iff resolving `node` with each
    /// parameter bound to its argument yields at least one binding.
    Expression { params: Vec<Variable>, node: NodeRef },
    /// Type test against the instance cache hierarchy.
    HasType(TypeName),
}

impl fmt::Debug for PredicateBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredicateBody::Native(_) => f.write_str("Native(..)"),
            PredicateBody::Expression { params, node } => f
                .debug_struct("Expression")
                .field("params", params)
                .field("node", &node.to_string())
                .finish(),
            PredicateBody::HasType(t) => f.debug_tuple("HasType").field(t).finish(),
        }
    }
}

/// A predicate applied to argument terms.
#[derive(Debug, Clone)]
pub struct Predicate {
    name: Arc<str>,
    body: PredicateBody,
    args: Vec<Term>,
    inverted: bool,
}

impl Predicate {
    /// Predicate backed by native code.
    pub fn native<F>(name: impl Into<String>, args: Vec<Term>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<bool, PredicateFailure> + Send + Sync + 'static,
    {
        Self::with_body(name, PredicateBody::Native(Arc::new(f)), args)
    }

    /// Predicate backed by a nested expression tree over `params`.
    pub fn expression(
        name: impl Into<String>,
        params: Vec<Variable>,
        node: NodeRef,
        args: Vec<Term>,
    ) -> Self {
        Self::with_body(name, PredicateBody::Expression { params, node }, args)
    }

    /// Type test: `term` is an entity of `type_name` or one of its subtypes.
    pub fn has_type(term: impl Into<Term>, type_name: impl Into<TypeName>) -> Self {
        Self::with_body(
            "has_type",
            PredicateBody::HasType(type_name.into()),
            vec![term.into()],
        )
    }

    /// Text prefix test.
    pub fn starts_with(term: impl Into<Term>, prefix: impl Into<Term>) -> Self {
        Self::with_body(
            "starts_with",
            PredicateBody::Native(Arc::new(starts_with)),
            vec![term.into(), prefix.into()],
        )
    }

    /// Text suffix test.
    pub fn ends_with(term: impl Into<Term>, suffix: impl Into<Term>) -> Self {
        Self::with_body(
            "ends_with",
            PredicateBody::Native(Arc::new(ends_with)),
            vec![term.into(), suffix.into()],
        )
    }

    fn with_body(name: impl Into<String>, body: PredicateBody, args: Vec<Term>) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name.as_str()),
            body,
            args,
            inverted: false,
        }
    }

    /// The same predicate with its result negated.
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            inverted: !self.inverted,
            ..self.clone()
        }
    }

    /// Predicate name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Predicate implementation.
    #[must_use]
    pub fn body(&self) -> &PredicateBody {
        &self.body
    }

    /// Argument terms.
    #[must_use]
    pub fn args(&self) -> &[Term] {
        &self.args
    }

    /// Whether the result is negated.
    #[must_use]
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inverted {
            f.write_str("not ")?;
        }
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", arg)?;
        }
        if let PredicateBody::HasType(t) = &self.body {
            write!(f, ", {}", t)?;
        }
        f.write_str(")")
    }
}

// =============================================================================
// BUILT-INS
// =============================================================================

fn text_pair<'v>(name: &str, args: &'v [Value]) -> Result<(&'v str, &'v str), PredicateFailure> {
    match args {
        [Value::Text(subject), Value::Text(affix)] => Ok((subject.as_str(), affix.as_str())),
        _ => Err(format!(
            "{} expects (text, text), got ({})",
            name,
            args.iter().map(Value::kind).collect::<Vec<_>>().join(", ")
        )
        .into()),
    }
}

fn starts_with(args: &[Value]) -> Result<bool, PredicateFailure> {
    let (subject, prefix) = text_pair("starts_with", args)?;
    Ok(subject.starts_with(prefix))
}

fn ends_with(args: &[Value]) -> Result<bool, PredicateFailure> {
    let (subject, suffix) = text_pair("ends_with", args)?;
    Ok(subject.ends_with(suffix))
}

// =============================================================================
// PREDICATE LIBRARY
// =============================================================================

/// Name-indexed predicates available to query documents.
///
/// Starts with the built-ins `has_type`, `starts_with` and `ends_with`;
/// callers may register native predicates under new names.
#[derive(Clone)]
pub struct PredicateLibrary {
    natives: BTreeMap<String, NativeFn>,
}

impl Default for PredicateLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for PredicateLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateLibrary")
            .field("names", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl PredicateLibrary {
    /// Library holding the built-in predicates.
    #[must_use]
    pub fn builtin() -> Self {
        let mut natives: BTreeMap<String, NativeFn> = BTreeMap::new();
        natives.insert("starts_with".to_string(), Arc::new(starts_with));
        natives.insert("ends_with".to_string(), Arc::new(ends_with));
        Self { natives }
    }

    /// Register a native predicate. An existing entry with the same name is
    /// replaced.
    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<bool, PredicateFailure> + Send + Sync + 'static,
    {
        self.natives.insert(name.into(), Arc::new(f));
    }

    /// Names of every available predicate, `has_type` included.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once("has_type").chain(self.natives.keys().map(String::as_str))
    }

    /// Build a predicate by name.
    ///
    /// `has_type` takes a term and a literal type name; every other
    /// predicate receives its arguments unchanged.
    pub fn build(&self, name: &str, mut args: Vec<Term>) -> Result<Predicate, EqlError> {
        if name == "has_type" {
            let type_name = match args.pop() {
                Some(Term::Literal(Value::Text(t))) if args.len() == 1 => t,
                _ => {
                    return Err(EqlError::InvalidDocument(
                        "has_type expects a term and a type name".to_string(),
                    ));
                }
            };
            let subject = args.pop().ok_or_else(|| {
                EqlError::InvalidDocument("has_type expects a term".to_string())
            })?;
            return Ok(Predicate::has_type(subject, type_name.as_str()));
        }
        let native = self
            .natives
            .get(name)
            .ok_or_else(|| EqlError::InvalidDocument(format!("unknown predicate `{}`", name)))?;
        Ok(Predicate::with_body(
            name,
            PredicateBody::Native(Arc::clone(native)),
            args,
        ))
    }
}

// =============================================================================
// TESTS
// =============================================================================
