//! # Instance Cache
//!
//! The type-indexed registry of constructed domain objects.
//!
//! Variables declared without an explicit domain enumerate the instances of
//! their type (and its subtypes) from this cache, in registration order.
//!
//! ## Concurrency
//!
//! The cache is the only shared mutable resource of the engine. It is
//! read-mostly and guarded by a `RwLock`. Every domain enumeration takes a
//! snapshot under the read lock, so a resolution running while another
//! thread registers instances sees whatever was registered at the moment
//! the domain was enumerated.

use crate::{Entity, EntityId, EntityRef, TypeName, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// =============================================================================
// CACHE STATE
// =============================================================================

#[derive(Debug, Default)]
struct CacheState {
    /// Declared types and their direct supertypes.
    supertypes: BTreeMap<TypeName, Vec<TypeName>>,

    /// Registered instances, in registration order.
    instances: Vec<EntityRef>,

    /// Identity index over `instances`.
    by_id: BTreeMap<EntityId, usize>,

    /// Next identifier handed out by `allocate_id`.
    next_id: u64,
}

impl CacheState {
    fn is_subtype(&self, sub: &TypeName, sup: &TypeName) -> bool {
        if sub == sup {
            return true;
        }
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([sub]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            for parent in self.supertypes.get(current).into_iter().flatten() {
                if parent == sup {
                    return true;
                }
                queue.push_back(parent);
            }
        }
        false
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        id
    }
}

// =============================================================================
// INSTANCE CACHE
// =============================================================================

/// Type-indexed cache of domain objects.
///
/// Shared between registries through `Arc<InstanceCache>`.
#[derive(Debug, Default)]
pub struct InstanceCache {
    state: RwLock<CacheState>,
}

impl InstanceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache behind an `Arc`, ready to inject into a registry.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declare a type with its direct supertypes.
    ///
    /// Re-declaring a type merges the new supertypes into the existing ones.
    pub fn declare_type<I, S>(&self, name: impl Into<TypeName>, supertypes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<TypeName>,
    {
        let name = name.into();
        let mut state = self.write();
        let mut added = Vec::new();
        for sup in supertypes {
            let sup = sup.into();
            state.supertypes.entry(sup.clone()).or_default();
            added.push(sup);
        }
        let entry = state.supertypes.entry(name).or_default();
        for sup in added {
            if !entry.contains(&sup) {
                entry.push(sup);
            }
        }
    }

    /// Check whether `sub` is `sup` or one of its (transitive) subtypes.
    #[must_use]
    pub fn is_subtype(&self, sub: &TypeName, sup: &TypeName) -> bool {
        self.read().is_subtype(sub, sup)
    }

    /// Check whether a type has been declared, explicitly or by creation.
    #[must_use]
    pub fn has_type(&self, name: &TypeName) -> bool {
        self.read().supertypes.contains_key(name)
    }

    /// Reserve a fresh identifier without registering anything.
    ///
    /// Used for derived entities built by rule conclusions.
    pub fn allocate_id(&self) -> EntityId {
        self.write().allocate_id()
    }

    /// Construct an entity and register it synchronously.
    ///
    /// Undeclared types are declared implicitly with no supertypes.
    pub fn create<I, K>(&self, type_name: impl Into<TypeName>, attributes: I) -> EntityRef
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let type_name = type_name.into();
        let attributes: BTreeMap<String, Value> =
            attributes.into_iter().map(|(k, v)| (k.into(), v)).collect();

        let mut state = self.write();
        state.supertypes.entry(type_name.clone()).or_default();
        let id = state.allocate_id();
        let entity = Arc::new(Entity::new(id, type_name, attributes));
        let index = state.instances.len();
        state.instances.push(Arc::clone(&entity));
        state.by_id.insert(id, index);
        tracing::trace!(id = id.0, ty = %entity.type_name(), "instance registered");
        entity
    }

    /// Register an entity constructed elsewhere.
    ///
    /// Returns `false` if an entity with the same identity is already
    /// registered (the cache is left unchanged).
    pub fn register(&self, entity: EntityRef) -> bool {
        let mut state = self.write();
        if state.by_id.contains_key(&entity.id()) {
            return false;
        }
        state
            .supertypes
            .entry(entity.type_name().clone())
            .or_default();
        if entity.id().0 >= state.next_id {
            state.next_id = entity.id().0.saturating_add(1);
        }
        let index = state.instances.len();
        state.by_id.insert(entity.id(), index);
        state.instances.push(entity);
        true
    }

    /// Enumerate every registered instance of `type_name` or its subtypes,
    /// in registration order.
    #[must_use]
    pub fn enumerate_instances(&self, type_name: &TypeName) -> Vec<Value> {
        let state = self.read();
        state
            .instances
            .iter()
            .filter(|e| state.is_subtype(e.type_name(), type_name))
            .map(|e| Value::Entity(Arc::clone(e)))
            .collect()
    }

    /// Check whether `value` is a registered instance of `type_name`
    /// (or of one of its subtypes).
    #[must_use]
    pub fn contains(&self, type_name: &TypeName, value: &Value) -> bool {
        let Some(entity) = value.as_entity() else {
            return false;
        };
        let state = self.read();
        state.by_id.contains_key(&entity.id()) && state.is_subtype(entity.type_name(), type_name)
    }

    /// Look up a registered entity by identity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<EntityRef> {
        let state = self.read();
        state
            .by_id
            .get(&id)
            .and_then(|&index| state.instances.get(index))
            .cloned()
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().instances.len()
    }

    /// Check if no instance is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().instances.is_empty()
    }

    /// Drop every registered instance. Type declarations are kept and
    /// identifiers keep increasing.
    pub fn clear(&self) {
        let mut state = self.write();
        state.instances.clear();
        state.by_id.clear();
    }

    /// Return the cache to its freshly-constructed state.
    pub fn reset(&self) {
        *self.write() = CacheState::default();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> [(&'static str, Value); 1] {
        [("name", Value::from(name))]
    }

    #[test]
    fn subtypes_are_transitive_and_reflexive() {
        let cache = InstanceCache::new();
        cache.declare_type("Body", Vec::<TypeName>::new());
        cache.declare_type("Container", ["Body"]);
        cache.declare_type("Cabinet", ["Container"]);

        let body = TypeName::new("Body");
        let cabinet = TypeName::new("Cabinet");
        assert!(cache.is_subtype(&cabinet, &body));
        assert!(cache.is_subtype(&body, &body));
        assert!(!cache.is_subtype(&body, &cabinet));
    }

    #[test]
    fn enumeration_follows_registration_order_and_includes_subtypes() {
        let cache = InstanceCache::new();
        cache.declare_type("Handle", ["Body"]);
        cache.declare_type("Container", ["Body"]);

        cache.create("Handle", named("Handle1"));
        cache.create("Container", named("Container1"));
        cache.create("Connection", named("Fixed"));
        cache.create("Handle", named("Handle2"));

        let names: Vec<String> = cache
            .enumerate_instances(&TypeName::new("Body"))
            .iter()
            .filter_map(|v| v.as_entity().and_then(|e| e.name().map(str::to_string)))
            .collect();
        assert_eq!(names, vec!["Handle1", "Container1", "Handle2"]);
    }

    #[test]
    fn unknown_type_enumerates_nothing() {
        let cache = InstanceCache::new();
        cache.create("Handle", named("Handle1"));
        assert!(cache.enumerate_instances(&TypeName::new("Door")).is_empty());
    }

    #[test]
    fn register_is_idempotent_and_advances_ids() {
        let cache = InstanceCache::new();
        let external = Arc::new(Entity::new(
            EntityId(41),
            TypeName::new("Handle"),
            BTreeMap::new(),
        ));
        assert!(cache.register(Arc::clone(&external)));
        assert!(!cache.register(external));
        assert_eq!(cache.len(), 1);

        let next = cache.create("Handle", named("Handle2"));
        assert_eq!(next.id(), EntityId(42));
        assert!(cache.get(EntityId(41)).is_some());
    }

    #[test]
    fn contains_checks_registration_and_type() {
        let cache = InstanceCache::new();
        cache.declare_type("Handle", ["Body"]);
        let handle = Value::Entity(cache.create("Handle", named("Handle1")));
        let derived = Value::Entity(Arc::new(Entity::new(
            cache.allocate_id(),
            TypeName::new("Handle"),
            BTreeMap::new(),
        )));

        assert!(cache.contains(&TypeName::new("Body"), &handle));
        assert!(!cache.contains(&TypeName::new("Container"), &handle));
        assert!(!cache.contains(&TypeName::new("Handle"), &derived));
        assert!(!cache.contains(&TypeName::new("Handle"), &Value::Int(1)));
    }

    #[test]
    fn clear_and_reset_lifecycle() {
        let cache = InstanceCache::new();
        cache.declare_type("Handle", ["Body"]);
        cache.create("Handle", named("Handle1"));

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.has_type(&TypeName::new("Handle")));
        assert_eq!(cache.create("Handle", named("Handle2")).id(), EntityId(1));

        cache.reset();
        assert!(cache.is_empty());
        assert!(!cache.has_type(&TypeName::new("Handle")));
        assert_eq!(cache.create("Handle", named("Handle3")).id(), EntityId(0));
    }
}
