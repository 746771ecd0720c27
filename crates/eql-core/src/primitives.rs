//! # Innate Primitives
//!
//! Hardcoded runtime constants for the EQL engine.
//!
//! These values are compiled into the binary. The ones that tune engine
//! behaviour are only defaults: `EngineConfig` may override them at runtime.

/// Domain size above which an unconstrained projected variable is reported.
///
/// - A selector that has to enumerate a projected variable its conditions
///   left unbound produces a cartesian product with the rest of the query.
/// - When that domain holds more than `CARTESIAN_WARNING_THRESHOLD` values
///   the engine emits a `warn!` once per selector resolution.
pub const CARTESIAN_WARNING_THRESHOLD: usize = 20;

// =============================================================================
// DOCUMENT LIMITS
// =============================================================================

/// Maximum nesting depth of a condition document.
///
/// Query documents deeper than this are rejected before any node is built.
pub const MAX_CONDITION_DEPTH: usize = 64;

/// Maximum number of entities a single world document may declare.
pub const MAX_WORLD_ENTITIES: usize = 100_000;

/// Maximum number of variables a single query document may declare.
pub const MAX_QUERY_VARIABLES: usize = 256;
