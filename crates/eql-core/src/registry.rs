//! # Variable & Domain Registry
//!
//! Declares placeholder variables and resolves where their candidate values
//! come from.
//!
//! - `Domain::Explicit`: an ordered sequence supplied by the caller
//! - `Domain::Instances`: deferred lookup in the injected [`InstanceCache`]
//! - `Domain::Free`: no enumerable domain; the variable can only be bound
//!   by an implicit join (`v == <resolved term>`)
//!
//! Absent or empty domains are not errors: they contribute zero bindings.

use crate::{EqlError, InstanceCache, TypeName, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of per-registry identities.
static NEXT_REGISTRY: AtomicU64 = AtomicU64::new(0);

// =============================================================================
// VARIABLE
// =============================================================================

/// Identity of a declared variable within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u32);

/// A placeholder for values, declared in a [`Registry`].
///
/// Cheap to clone. Equality and ordering use the declaring registry and the
/// identity only.
#[derive(Debug, Clone)]
pub struct Variable {
    id: VarId,
    registry: u64,
    name: Arc<str>,
}

impl Variable {
    /// The identity of this variable.
    #[must_use]
    pub fn id(&self) -> VarId {
        self.id
    }

    /// The declared name of this variable.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.registry == other.registry && self.id == other.id
    }
}

impl Eq for Variable {}

impl PartialOrd for Variable {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Variable {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.registry, self.id).cmp(&(other.registry, other.id))
    }
}

impl std::hash::Hash for Variable {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.registry.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// =============================================================================
// DOMAIN
// =============================================================================

/// Source of candidate values for a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Domain {
    /// An explicit ordered sequence.
    Explicit(Vec<Value>),
    /// All instances of a type (and its subtypes) from the instance cache.
    Instances(TypeName),
    /// No enumerable domain.
    Free,
}

#[derive(Debug)]
struct Declaration {
    variable: Variable,
    type_constraint: Option<TypeName>,
    domain: Domain,
    /// Membership index for explicit domains.
    members: BTreeSet<Value>,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Registry of declared variables and their domains.
#[derive(Debug)]
pub struct Registry {
    id: u64,
    cache: Arc<InstanceCache>,
    declarations: Vec<Declaration>,
}

impl Registry {
    /// Create a registry backed by the given instance cache.
    #[must_use]
    pub fn new(cache: Arc<InstanceCache>) -> Self {
        Self {
            id: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            cache,
            declarations: Vec::new(),
        }
    }

    /// The instance cache backing this registry.
    #[must_use]
    pub fn cache(&self) -> &Arc<InstanceCache> {
        &self.cache
    }

    /// Declare a variable.
    ///
    /// With a type constraint, only entities of that type (or a subtype) are
    /// admitted, and explicit domains are filtered accordingly.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        type_constraint: Option<TypeName>,
        domain: Domain,
    ) -> Variable {
        let name: String = name.into();
        let variable = Variable {
            id: VarId(self.declarations.len() as u32),
            registry: self.id,
            name: Arc::from(name.as_str()),
        };
        let members = match &domain {
            Domain::Explicit(values) => values.iter().cloned().collect(),
            Domain::Instances(_) | Domain::Free => BTreeSet::new(),
        };
        tracing::trace!(var = %variable, ?type_constraint, "variable declared");
        self.declarations.push(Declaration {
            variable: variable.clone(),
            type_constraint,
            domain,
            members,
        });
        variable
    }

    /// Declare a variable ranging over every instance of `type_name`.
    pub fn declare_typed(
        &mut self,
        name: impl Into<String>,
        type_name: impl Into<TypeName>,
    ) -> Variable {
        let type_name = type_name.into();
        self.declare(
            name,
            Some(type_name.clone()),
            Domain::Instances(type_name),
        )
    }

    /// Declare a variable over an explicit sequence of values.
    pub fn declare_over(
        &mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = Value>,
    ) -> Variable {
        self.declare(name, None, Domain::Explicit(values.into_iter().collect()))
    }

    /// Declare a variable with no enumerable domain.
    pub fn declare_free(&mut self, name: impl Into<String>) -> Variable {
        self.declare(name, None, Domain::Free)
    }

    fn declaration(&self, var: &Variable) -> Result<&Declaration, EqlError> {
        self.declarations
            .get(var.id.0 as usize)
            .filter(|_| var.registry == self.id)
            .ok_or_else(|| EqlError::UnboundVariable {
                variable: var.name().to_string(),
                node: "<registry>".to_string(),
            })
    }

    /// Check whether a variable was declared in this registry.
    #[must_use]
    pub fn is_declared(&self, var: &Variable) -> bool {
        self.declaration(var).is_ok()
    }

    /// Find a declared variable by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Variable> {
        self.declarations
            .iter()
            .find(|d| &*d.variable.name == name)
            .map(|d| d.variable.clone())
    }

    /// The declared domain of a variable.
    pub fn domain(&self, var: &Variable) -> Result<&Domain, EqlError> {
        self.declaration(var).map(|d| &d.domain)
    }

    /// The type constraint of a variable, if any.
    pub fn type_constraint(&self, var: &Variable) -> Result<Option<&TypeName>, EqlError> {
        self.declaration(var).map(|d| d.type_constraint.as_ref())
    }

    /// Snapshot of the candidate values of a variable.
    ///
    /// Returns `None` for free variables. Instance domains are enumerated
    /// from the cache at the time of the call.
    pub fn domain_values(&self, var: &Variable) -> Result<Option<Vec<Value>>, EqlError> {
        let decl = self.declaration(var)?;
        let values = match &decl.domain {
            Domain::Free => return Ok(None),
            Domain::Instances(type_name) => self.cache.enumerate_instances(type_name),
            Domain::Explicit(values) => values
                .iter()
                .filter(|v| self.satisfies_type(decl, v))
                .cloned()
                .collect(),
        };
        Ok(Some(values))
    }

    /// Check whether `value` may be bound to `var`: domain membership plus
    /// the type constraint.
    pub fn admits(&self, var: &Variable, value: &Value) -> Result<bool, EqlError> {
        let decl = self.declaration(var)?;
        let in_domain = match &decl.domain {
            Domain::Explicit(_) => decl.members.contains(value),
            Domain::Instances(type_name) => self.cache.contains(type_name, value),
            Domain::Free => true,
        };
        Ok(in_domain && self.satisfies_type(decl, value))
    }

    fn satisfies_type(&self, decl: &Declaration, value: &Value) -> bool {
        match (&decl.type_constraint, value) {
            (None, _) => true,
            (Some(expected), Value::Entity(e)) => self.cache.is_subtype(e.type_name(), expected),
            (Some(_), _) => false,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> Arc<InstanceCache> {
        let cache = InstanceCache::shared();
        cache.declare_type("Handle", ["Body"]);
        cache.declare_type("Container", ["Body"]);
        cache.create("Handle", [("name", Value::from("Handle1"))]);
        cache.create("Container", [("name", Value::from("Container1"))]);
        cache
    }

    #[test]
    fn typed_domain_is_deferred_to_the_cache() {
        let cache = world();
        let mut registry = Registry::new(Arc::clone(&cache));
        let body = registry.declare_typed("body", "Body");

        let before = registry
            .domain_values(&body)
            .expect("declared")
            .expect("enumerable");
        assert_eq!(before.len(), 2);

        cache.create("Handle", [("name", Value::from("Handle2"))]);
        let after = registry
            .domain_values(&body)
            .expect("declared")
            .expect("enumerable");
        assert_eq!(after.len(), 3);
    }

    #[test]
    fn explicit_domain_filtered_by_type_constraint() {
        let cache = world();
        let mut registry = Registry::new(Arc::clone(&cache));
        let everything = cache.enumerate_instances(&TypeName::new("Body"));
        let handle = registry.declare(
            "handle",
            Some(TypeName::new("Handle")),
            Domain::Explicit(everything.clone()),
        );

        let values = registry
            .domain_values(&handle)
            .expect("declared")
            .expect("enumerable");
        assert_eq!(values.len(), 1);
        assert!(registry.admits(&handle, &everything[0]).expect("declared"));
        assert!(!registry.admits(&handle, &everything[1]).expect("declared"));
    }

    #[test]
    fn free_variables_have_no_domain_but_admit_values() {
        let mut registry = Registry::new(InstanceCache::shared());
        let x = registry.declare_free("x");
        assert_eq!(registry.domain_values(&x).expect("declared"), None);
        assert!(registry.admits(&x, &Value::Int(3)).expect("declared"));
    }

    #[test]
    fn empty_domain_is_not_an_error() {
        let mut registry = Registry::new(InstanceCache::shared());
        let none = registry.declare_over("none", Vec::new());
        let door = registry.declare_typed("door", "Door");
        assert_eq!(registry.domain_values(&none).expect("declared"), Some(vec![]));
        assert_eq!(registry.domain_values(&door).expect("declared"), Some(vec![]));
    }

    #[test]
    fn foreign_variables_are_rejected() {
        let mut other = Registry::new(InstanceCache::shared());
        let _ = other.declare_free("a");
        let stranger = other.declare_free("b");

        let mut registry = Registry::new(InstanceCache::shared());
        let _ = registry.declare_free("a");
        let twin = registry.declare_free("b");
        assert_eq!(twin.id(), stranger.id());
        assert_ne!(twin, stranger);
        assert!(!registry.is_declared(&stranger));
        assert!(matches!(
            registry.domain_values(&stranger),
            Err(EqlError::UnboundVariable { .. })
        ));
        assert_eq!(registry.lookup("a").map(|v| v.name().to_string()), Some("a".into()));
    }
}
