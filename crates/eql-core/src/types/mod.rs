//! # Core Type Definitions
//!
//! This module contains the value model shared by every part of the engine:
//! - Identifiers (`EntityId`, `TypeName`)
//! - Domain objects (`Entity`, `EntityRef`)
//! - Runtime values (`Value`)
//! - Error types (`EqlError`, `PredicateFailure`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Compare entities by identity, never by attribute contents

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique identifier for a domain object.
/// Allocated by the instance cache in construction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Name of a domain type (e.g. `Handle`, `FixedConnection`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeName(pub String);

impl TypeName {
    /// Create a new type name.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the type name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// ENTITY
// =============================================================================

/// A domain object: an identity, a type and named attributes.
///
/// Relationships between objects are plain attribute values holding
/// another entity, there are no foreign keys.
#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    type_name: TypeName,
    attributes: BTreeMap<String, Value>,
}

/// Shared handle to an entity. Entities are immutable once constructed.
pub type EntityRef = Arc<Entity>;

impl Entity {
    /// Create a new entity. Use `InstanceCache::create` to also register it.
    #[must_use]
    pub fn new(id: EntityId, type_name: TypeName, attributes: BTreeMap<String, Value>) -> Self {
        Self {
            id,
            type_name,
            attributes,
        }
    }

    /// The identity of this entity.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The concrete type of this entity.
    #[must_use]
    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    /// Look up an attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// All attributes in name order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The `name` attribute, if it is text.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self.attributes.get("name") {
            Some(Value::Text(s)) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

impl PartialOrd for Entity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", self.type_name, name),
            None => write!(f, "{}#{}", self.type_name, self.id.0),
        }
    }
}

// =============================================================================
// VALUE
// =============================================================================

/// A runtime value bound to a variable or produced by a term.
///
/// The derived order is only used for deterministic collections.
/// Comparison operators go through [`Value::compare`], which rejects
/// mismatched kinds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Text.
    Text(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Reference to a domain object.
    Entity(EntityRef),
}

impl Value {
    /// Short label of the value kind, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Entity(_) => "entity",
        }
    }

    /// Borrow the entity, if this value is one.
    #[must_use]
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the text, if this value is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the integer, if this value is one.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Order two values of the same kind.
    ///
    /// Returns a message describing the mismatch when the kinds cannot be
    /// ordered against each other.
    pub fn compare(&self, other: &Value) -> Result<Ordering, String> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => {}
                        other => return Ok(other),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => Err(format!(
                "cannot order {} against {}",
                self.kind(),
                other.kind()
            )),
        }
    }

    /// Membership test: does `self` (the container) contain `item`?
    ///
    /// Lists test element equality, text tests substrings.
    pub fn contains(&self, item: &Value) -> Result<bool, String> {
        match (self, item) {
            (Value::List(items), _) => Ok(items.iter().any(|v| v == item)),
            (Value::Text(haystack), Value::Text(needle)) => Ok(haystack.contains(needle.as_str())),
            (Value::Text(_), _) => Err(format!(
                "text can only contain text, not {}",
                item.kind()
            )),
            _ => Err(format!("{} is not a container", self.kind())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("]")
            }
            Value::Entity(e) => write!(f, "{}", e),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<EntityRef> for Value {
    fn from(e: EntityRef) -> Self {
        Value::Entity(e)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Error raised by a user-supplied predicate.
///
/// Propagated unchanged inside [`EqlError::Predicate`].
pub type PredicateFailure = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while building or resolving a query.
///
/// - No silent failures
/// - Use `Result<T, EqlError>` for fallible operations
/// - Resolution never panics; an error ends the path that raised it
#[derive(Debug, Error)]
pub enum EqlError {
    /// A condition references a variable that no binder can resolve.
    #[error("Unbound variable `{variable}` in `{node}`")]
    UnboundVariable { variable: String, node: String },

    /// An operator was applied to runtime-incompatible values.
    #[error("Evaluation type error at `{node}`: {message}")]
    EvaluationType { node: String, message: String },

    /// A user-supplied predicate failed.
    #[error("Predicate `{predicate}` failed at `{node}`: {source}")]
    Predicate {
        predicate: String,
        node: String,
        #[source]
        source: PredicateFailure,
    },

    /// A single-result query produced a second result.
    #[error("Multiple solutions found where exactly one was expected")]
    MultipleSolutionsFound,

    /// A single-result query produced no result.
    #[error("No solution found where exactly one was expected")]
    NoSolutionFound,

    /// The result stream ended below the expected minimum.
    #[error("Found {found} solutions which is less than the expected {expected}")]
    LessThanExpectedSolutions { expected: usize, found: usize },

    /// The result stream exceeded the expected maximum.
    #[error("More than {expected} solutions found")]
    GreaterThanExpectedSolutions { expected: usize },

    /// A cardinality constraint is inconsistent.
    #[error("Invalid cardinality constraint: {0}")]
    InvalidCardinality(String),

    /// A world or query document could not be built.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// A configuration file could not be parsed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An I/O error occurred at the application boundary.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================
