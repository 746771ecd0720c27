//! # eql-core
//!
//! The entity query engine for EQL - THE LOGIC.
//!
//! Conditions over in-memory objects are captured as an immutable
//! expression tree and resolved lazily into a stream of variable bindings.
//! Joins are implicit: equality between a variable and an attribute path
//! binds the variable instead of enumerating it.
//!
//! ## Layers
//!
//! - `types`, `cache`, `registry`: values, the object world, variables
//! - `expr`, `negation`, `predicate`: the condition tree and its rewrites
//! - `engine`: the resolver producing lazy binding streams
//! - `query`, `quantify`, `rule`: what callers run on top of the engine
//! - `formats`: serde documents for the application boundary
//!
//! ## Architectural Constraints
//!
//! - Synchronous and single-threaded per evaluation; no async, no I/O
//! - Deterministic: BTreeMap ordering, no randomness
//! - The world is read, never mutated, during resolution

// =============================================================================
// MODULES
// =============================================================================

pub mod binding;
pub mod cache;
pub mod config;
pub mod engine;
pub mod expr;
pub mod formats;
pub mod negation;
pub mod predicate;
pub mod primitives;
pub mod quantify;
pub mod query;
pub mod registry;
pub mod rule;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Entity, EntityId, EntityRef, EqlError, PredicateFailure, TypeName, Value};

// =============================================================================
// RE-EXPORTS: World & Variables
// =============================================================================

pub use binding::BindingContext;
pub use cache::InstanceCache;
pub use registry::{Domain, Registry, VarId, Variable};

// =============================================================================
// RE-EXPORTS: Expressions
// =============================================================================

pub use expr::{
    CompareOp, DisjunctionMode, Node, NodeRef, QuantifierKind, Selector, SelectorKind, Term,
    TermError,
};
pub use negation::negate;
pub use predicate::{NativeFn, Predicate, PredicateBody, PredicateLibrary};

// =============================================================================
// RE-EXPORTS: Evaluation
// =============================================================================

pub use config::{AlternativePolicy, EngineConfig};
pub use engine::{BindingStream, Engine};
pub use quantify::{Quantified, ResultQuantificationConstraint, an, an_with, the};
pub use query::{Query, Solution, Solutions};
pub use rule::{Conclusion, ConclusionSet, Conclusions, Derived, Rule, RuleKind, RuleNode};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{PreparedQuery, QueryDocument, World, WorldDocument};
