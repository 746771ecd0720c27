//! # Document Format
//!
//! World and query documents exchanged with the application layer.
//!
//! ## World documents
//!
//! - `types`: declared types with their direct supertypes
//! - `entities`: instances registered in document order; an attribute may
//!   reference an entity declared earlier with `{"ref": key}`
//!
//! ## Query documents
//!
//! - `variables`: declarations (type, optional explicit domain)
//! - `select`: projected terms; one term makes an entity query
//! - `quantifier` / `constraint`: result cardinality
//! - `where`: a [`ConditionDocument`] tree
//!
//! Terms are written as paths (`"fixed.child.name"`; numeric segments
//! index lists), bare integers or booleans, `{"value": ...}` literals, or
//! `{"concatenate": term}` to gather a list term over every binding.
//!
//! Size limits from [`crate::primitives`] are checked before anything is
//! registered or declared.

use crate::expr::{self, CompareOp, Node, Term};
use crate::primitives::{MAX_CONDITION_DEPTH, MAX_QUERY_VARIABLES, MAX_WORLD_ENTITIES};
use crate::quantify::{self, ResultQuantificationConstraint};
use crate::{
    Domain, EngineConfig, EntityRef, EqlError, InstanceCache, PredicateLibrary, Query, Registry,
    Solution, TypeName, Value, Variable,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn invalid(message: impl Into<String>) -> EqlError {
    EqlError::InvalidDocument(message.into())
}

// =============================================================================
// WORLD DOCUMENT
// =============================================================================

/// A declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeDocument {
    pub name: String,
    #[serde(default)]
    pub supertypes: Vec<String>,
}

/// An attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeDocument {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<AttributeDocument>),
    Ref {
        #[serde(rename = "ref")]
        key: String,
    },
}

impl AttributeDocument {
    fn to_value(&self, world: &World) -> Result<Value, EqlError> {
        Ok(match self {
            AttributeDocument::Null => Value::Null,
            AttributeDocument::Bool(b) => Value::Bool(*b),
            AttributeDocument::Int(i) => Value::Int(*i),
            AttributeDocument::Text(s) => Value::Text(s.clone()),
            AttributeDocument::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| item.to_value(world))
                    .collect::<Result<_, _>>()?,
            ),
            AttributeDocument::Ref { key } => Value::Entity(world.resolve(key)?),
        })
    }
}

/// An entity instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityDocument {
    /// Key other entities and query literals use to reference this one.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeDocument>,
}

/// A complete world: types plus instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorldDocument {
    #[serde(default)]
    pub types: Vec<TypeDocument>,
    #[serde(default)]
    pub entities: Vec<EntityDocument>,
}

/// Keyed entities registered from a [`WorldDocument`].
#[derive(Debug, Clone, Default)]
pub struct World {
    keyed: BTreeMap<String, EntityRef>,
    registered: usize,
}

impl World {
    /// Entity registered under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&EntityRef> {
        self.keyed.get(key)
    }

    fn resolve(&self, key: &str) -> Result<EntityRef, EqlError> {
        self.keyed
            .get(key)
            .cloned()
            .ok_or_else(|| invalid(format!("unknown entity reference `{}`", key)))
    }

    /// Number of entities registered from the document.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registered
    }

    /// Check if the document registered nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registered == 0
    }
}

impl WorldDocument {
    /// Declare the types and register the entities into `cache`.
    ///
    /// References resolve against entities declared earlier in the
    /// document.
    pub fn load_into(&self, cache: &InstanceCache) -> Result<World, EqlError> {
        if self.entities.len() > MAX_WORLD_ENTITIES {
            return Err(invalid(format!(
                "world declares {} entities (maximum {})",
                self.entities.len(),
                MAX_WORLD_ENTITIES
            )));
        }
        for ty in &self.types {
            cache.declare_type(ty.name.as_str(), ty.supertypes.iter().map(String::as_str));
        }

        let mut world = World::default();
        for entity in &self.entities {
            let attributes = entity
                .attributes
                .iter()
                .map(|(name, value)| value.to_value(&world).map(|v| (name.as_str(), v)))
                .collect::<Result<Vec<_>, _>>()?;
            let created = cache.create(entity.type_name.as_str(), attributes);
            world.registered += 1;
            if let Some(key) = &entity.key {
                if world.keyed.insert(key.clone(), created).is_some() {
                    return Err(invalid(format!("duplicate entity key `{}`", key)));
                }
            }
        }
        tracing::debug!(
            types = self.types.len(),
            entities = world.registered,
            "world loaded"
        );
        Ok(world)
    }
}

// =============================================================================
// QUERY DOCUMENT
// =============================================================================

/// A declared query variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableDocument {
    pub name: String,
    /// Type constraint; without an explicit domain the variable ranges over
    /// every instance of this type.
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    /// Explicit domain values.
    #[serde(default)]
    pub domain: Option<Vec<AttributeDocument>>,
}

/// A term: a variable path, a bare scalar, a `{"value": ...}` literal, or a
/// `{"concatenate": term}` aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TermDocument {
    Path(String),
    Int(i64),
    Bool(bool),
    Literal { value: AttributeDocument },
    Concatenate { concatenate: Box<TermDocument> },
}

/// A condition tree, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConditionDocument {
    Eq { left: TermDocument, right: TermDocument },
    Ne { left: TermDocument, right: TermDocument },
    Lt { left: TermDocument, right: TermDocument },
    Le { left: TermDocument, right: TermDocument },
    Gt { left: TermDocument, right: TermDocument },
    Ge { left: TermDocument, right: TermDocument },
    In { item: TermDocument, container: TermDocument },
    Contains { container: TermDocument, item: TermDocument },
    /// Bind a free variable to each element of a list term.
    Flatten {
        var: String,
        #[serde(rename = "in")]
        iterable: TermDocument,
    },
    And { all: Vec<ConditionDocument> },
    Or { any: Vec<ConditionDocument> },
    Not { condition: Box<ConditionDocument> },
    ForAll {
        var: String,
        #[serde(default, rename = "in")]
        domain: Option<TermDocument>,
        condition: Box<ConditionDocument>,
    },
    Exists {
        var: String,
        #[serde(default, rename = "in")]
        domain: Option<TermDocument>,
        condition: Box<ConditionDocument>,
    },
    Predicate {
        name: String,
        #[serde(default)]
        args: Vec<TermDocument>,
    },
}

impl ConditionDocument {
    /// Nesting depth of this tree (a leaf is 1).
    #[must_use]
    pub fn depth(&self) -> usize {
        let nested = match self {
            ConditionDocument::And { all: children } | ConditionDocument::Or { any: children } => {
                children.iter().map(ConditionDocument::depth).max().unwrap_or(0)
            }
            ConditionDocument::Not { condition }
            | ConditionDocument::ForAll { condition, .. }
            | ConditionDocument::Exists { condition, .. } => condition.depth(),
            _ => 0,
        };
        nested + 1
    }
}

/// How many results the query expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantifierDocument {
    /// Any number of results (optionally constrained).
    #[default]
    An,
    /// Exactly one result.
    The,
}

/// Cardinality bounds for an `an` query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintDocument {
    #[serde(default)]
    pub at_least: Option<usize>,
    #[serde(default)]
    pub at_most: Option<usize>,
}

/// A complete query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryDocument {
    #[serde(default)]
    pub variables: Vec<VariableDocument>,
    pub select: Vec<TermDocument>,
    #[serde(default)]
    pub quantifier: QuantifierDocument,
    #[serde(default)]
    pub constraint: Option<ConstraintDocument>,
    #[serde(default, rename = "where")]
    pub condition: Option<ConditionDocument>,
}

/// Names in scope while building a query.
struct Scope<'w> {
    variables: BTreeMap<String, Variable>,
    world: &'w World,
    library: &'w PredicateLibrary,
}

impl Scope<'_> {
    fn variable(&self, name: &str) -> Result<&Variable, EqlError> {
        self.variables
            .get(name)
            .ok_or_else(|| invalid(format!("undeclared variable `{}`", name)))
    }

    fn term(&self, doc: &TermDocument) -> Result<Term, EqlError> {
        match doc {
            TermDocument::Path(path) => {
                let mut segments = path.split('.');
                let head = segments.next().unwrap_or_default();
                let mut term = expr::var(self.variable(head)?);
                for segment in segments {
                    if segment.is_empty() {
                        return Err(invalid(format!("malformed path `{}`", path)));
                    }
                    term = match segment.parse::<usize>() {
                        Ok(index) => term.index(index),
                        Err(_) => term.attr(segment),
                    };
                }
                Ok(term)
            }
            TermDocument::Int(i) => Ok(expr::lit(*i)),
            TermDocument::Bool(b) => Ok(expr::lit(*b)),
            TermDocument::Literal { value } => Ok(expr::lit(value.to_value(self.world)?)),
            TermDocument::Concatenate { concatenate } => {
                Ok(expr::concatenate(self.term(concatenate)?))
            }
        }
    }

    fn compare(&self, left: &TermDocument, op: CompareOp, right: &TermDocument) -> Result<Node, EqlError> {
        Ok(expr::compare(self.term(left)?, op, self.term(right)?))
    }

    fn condition(&self, doc: &ConditionDocument) -> Result<Node, EqlError> {
        match doc {
            ConditionDocument::Eq { left, right } => self.compare(left, CompareOp::Eq, right),
            ConditionDocument::Ne { left, right } => self.compare(left, CompareOp::Ne, right),
            ConditionDocument::Lt { left, right } => self.compare(left, CompareOp::Lt, right),
            ConditionDocument::Le { left, right } => self.compare(left, CompareOp::Le, right),
            ConditionDocument::Gt { left, right } => self.compare(left, CompareOp::Gt, right),
            ConditionDocument::Ge { left, right } => self.compare(left, CompareOp::Ge, right),
            ConditionDocument::In { item, container } => self.compare(item, CompareOp::In, container),
            ConditionDocument::Contains { container, item } => {
                self.compare(container, CompareOp::Contains, item)
            }
            ConditionDocument::Flatten { var, iterable } => {
                Ok(expr::flatten(self.variable(var)?, self.term(iterable)?))
            }
            ConditionDocument::And { all } => Ok(expr::and(
                all.iter()
                    .map(|c| self.condition(c))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            ConditionDocument::Or { any } => Ok(expr::or(
                any.iter()
                    .map(|c| self.condition(c))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            ConditionDocument::Not { condition } => Ok(expr::not(self.condition(condition)?)),
            ConditionDocument::ForAll {
                var,
                domain,
                condition,
            } => {
                let binder = self.variable(var)?;
                let condition = self.condition(condition)?;
                Ok(match domain {
                    Some(domain) => expr::for_all_in(binder, self.term(domain)?, condition),
                    None => expr::for_all(binder, condition),
                })
            }
            ConditionDocument::Exists {
                var,
                domain,
                condition,
            } => {
                let binder = self.variable(var)?;
                let condition = self.condition(condition)?;
                Ok(match domain {
                    Some(domain) => expr::exists_in(binder, self.term(domain)?, condition),
                    None => expr::exists(binder, condition),
                })
            }
            ConditionDocument::Predicate { name, args } => {
                let args = args
                    .iter()
                    .map(|a| self.term(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(expr::predicate(self.library.build(name, args)?))
            }
        }
    }
}

impl QueryDocument {
    /// Declare the variables into `registry` and build the query.
    pub fn build(
        &self,
        registry: &mut Registry,
        world: &World,
        library: &PredicateLibrary,
    ) -> Result<PreparedQuery, EqlError> {
        if self.variables.len() > MAX_QUERY_VARIABLES {
            return Err(invalid(format!(
                "query declares {} variables (maximum {})",
                self.variables.len(),
                MAX_QUERY_VARIABLES
            )));
        }
        if let Some(condition) = &self.condition {
            let depth = condition.depth();
            if depth > MAX_CONDITION_DEPTH {
                return Err(invalid(format!(
                    "condition nesting depth {} exceeds {}",
                    depth, MAX_CONDITION_DEPTH
                )));
            }
        }
        if self.select.is_empty() {
            return Err(invalid("select must name at least one term"));
        }
        let constraint = match (self.quantifier, self.constraint) {
            (QuantifierDocument::The, Some(_)) => {
                return Err(invalid("`the` queries take no cardinality constraint"));
            }
            (_, Some(bounds)) => {
                ResultQuantificationConstraint::from_bounds(bounds.at_least, bounds.at_most)?
            }
            (_, None) => None,
        };

        let mut scope = Scope {
            variables: BTreeMap::new(),
            world,
            library,
        };
        let mut declared = Vec::with_capacity(self.variables.len());
        for doc in &self.variables {
            if scope.variables.contains_key(&doc.name) {
                return Err(invalid(format!("variable `{}` declared twice", doc.name)));
            }
            let type_name = doc.type_name.as_deref().map(TypeName::new);
            let domain = match (&doc.domain, &type_name) {
                (Some(values), _) => Domain::Explicit(
                    values
                        .iter()
                        .map(|v| v.to_value(world))
                        .collect::<Result<_, _>>()?,
                ),
                (None, Some(ty)) => Domain::Instances(ty.clone()),
                (None, None) => Domain::Free,
            };
            let variable = registry.declare(doc.name.as_str(), type_name, domain);
            scope.variables.insert(doc.name.clone(), variable.clone());
            declared.push(variable);
        }

        let projection = self
            .select
            .iter()
            .map(|t| scope.term(t))
            .collect::<Result<Vec<_>, _>>()?;
        let conditions = match &self.condition {
            Some(condition) => vec![scope.condition(condition)?],
            None => Vec::new(),
        };
        let query = if projection.len() == 1 {
            let mut projection = projection;
            let single = projection.pop().ok_or_else(|| invalid("empty projection"))?;
            Query::entity(single, conditions)
        } else {
            Query::set_of(projection, conditions)
        };
        query.validate(registry)?;

        Ok(PreparedQuery {
            query,
            quantifier: self.quantifier,
            constraint,
            variables: declared,
        })
    }
}

// =============================================================================
// PREPARED QUERY
// =============================================================================

/// A query built from a document, ready to run.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    query: Query,
    quantifier: QuantifierDocument,
    constraint: Option<ResultQuantificationConstraint>,
    variables: Vec<Variable>,
}

impl PreparedQuery {
    /// The built query.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// The requested result quantifier.
    #[must_use]
    pub fn quantifier(&self) -> QuantifierDocument {
        self.quantifier
    }

    /// The cardinality constraint, if any.
    #[must_use]
    pub fn constraint(&self) -> Option<ResultQuantificationConstraint> {
        self.constraint
    }

    /// Variables declared by the document, in declaration order.
    #[must_use]
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Replace the cardinality constraint.
    ///
    /// Ignored by `the` queries, which always expect exactly one result.
    #[must_use]
    pub fn with_constraint(mut self, constraint: Option<ResultQuantificationConstraint>) -> Self {
        self.constraint = constraint;
        self
    }

    /// Switch to a single-result query.
    #[must_use]
    pub fn expect_one(mut self) -> Self {
        self.quantifier = QuantifierDocument::The;
        self
    }

    /// Run the query and collect its results under the requested quantifier.
    pub fn run(&self, registry: &Registry, config: &EngineConfig) -> Result<Vec<Solution>, EqlError> {
        let solutions = self.query.evaluate_with(registry, config);
        match (self.quantifier, self.constraint) {
            (QuantifierDocument::The, _) => Ok(vec![quantify::the(solutions)?]),
            (QuantifierDocument::An, Some(constraint)) => {
                quantify::an_with(solutions, constraint)?.collect()
            }
            (QuantifierDocument::An, None) => quantify::an(solutions).collect(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WORLD: &str = r#"{
        "types": [
            {"name": "Handle", "supertypes": ["Body"]},
            {"name": "Container", "supertypes": ["Body"]}
        ],
        "entities": [
            {"key": "H1", "type": "Handle", "attributes": {"name": "Handle1"}},
            {"key": "H2", "type": "Handle", "attributes": {"name": "Handle2"}},
            {"key": "C1", "type": "Container", "attributes": {"name": "Container1", "size": 3}},
            {"type": "Fixed", "attributes": {"parent": {"ref": "C1"}, "child": {"ref": "H1"}}},
            {"key": "shelf", "type": "Shelf", "attributes": {"items": [{"ref": "H1"}, {"ref": "H2"}]}}
        ]
    }"#;

    fn load() -> (Arc<InstanceCache>, World) {
        let doc: WorldDocument = serde_json::from_str(WORLD).expect("valid world");
        let cache = InstanceCache::shared();
        let world = doc.load_into(&cache).expect("world loads");
        (cache, world)
    }

    fn prepare(query: &str) -> Result<(Registry, PreparedQuery), EqlError> {
        let (cache, world) = load();
        let doc: QueryDocument = serde_json::from_str(query).expect("valid query json");
        let mut registry = Registry::new(cache);
        let prepared = doc.build(&mut registry, &world, &PredicateLibrary::builtin())?;
        Ok((registry, prepared))
    }

    fn names(solutions: &[Solution]) -> Vec<String> {
        solutions
            .iter()
            .filter_map(|s| s.value())
            .filter_map(|v| v.as_text().map(str::to_string))
            .collect()
    }

    #[test]
    fn world_registers_entities_and_resolves_refs() {
        let (cache, world) = load();
        assert_eq!(world.len(), 5);
        assert_eq!(cache.len(), 5);
        assert!(cache.is_subtype(&TypeName::new("Container"), &TypeName::new("Body")));
        let shelf = world.get("shelf").expect("keyed");
        match shelf.attribute("items") {
            Some(Value::List(items)) => assert_eq!(items.len(), 2),
            other => panic!("unexpected items: {:?}", other),
        }
    }

    #[test]
    fn forward_reference_is_rejected() {
        let doc: WorldDocument = serde_json::from_str(
            r#"{"entities": [
                {"key": "a", "type": "Fixed", "attributes": {"child": {"ref": "b"}}},
                {"key": "b", "type": "Handle"}
            ]}"#,
        )
        .expect("valid json");
        let cache = InstanceCache::new();
        assert!(matches!(
            doc.load_into(&cache),
            Err(EqlError::InvalidDocument(_))
        ));
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let doc: WorldDocument = serde_json::from_str(
            r#"{"entities": [{"key": "a", "type": "T"}, {"key": "a", "type": "T"}]}"#,
        )
        .expect("valid json");
        assert!(doc.load_into(&InstanceCache::new()).is_err());
    }

    #[test]
    fn flatten_and_concatenate_documents() {
        let (registry, prepared) = prepare(
            r#"{
                "variables": [
                    {"name": "shelf", "type": "Shelf"},
                    {"name": "item"}
                ],
                "select": ["item.name"],
                "where": {"op": "flatten", "var": "item", "in": "shelf.items"}
            }"#,
        )
        .expect("builds");
        let solutions = prepared
            .run(&registry, &EngineConfig::default())
            .expect("runs");
        assert_eq!(names(&solutions), vec!["Handle1", "Handle2"]);

        let (registry, prepared) = prepare(
            r#"{
                "variables": [
                    {"name": "shelf", "type": "Shelf"},
                    {"name": "body", "type": "Body"}
                ],
                "select": ["body.name"],
                "where": {"op": "not", "condition": {
                    "op": "in", "item": "body", "container": {"concatenate": "shelf.items"}
                }}
            }"#,
        )
        .expect("builds");
        let solutions = prepared
            .run(&registry, &EngineConfig::default())
            .expect("runs");
        assert_eq!(names(&solutions), vec!["Container1"]);
    }

    #[test]
    fn query_document_joins_through_paths() {
        let (registry, prepared) = prepare(
            r#"{
                "variables": [
                    {"name": "handle", "type": "Handle"},
                    {"name": "fixed", "type": "Fixed"}
                ],
                "select": ["handle.name"],
                "where": {"op": "eq", "left": "handle", "right": "fixed.child"}
            }"#,
        )
        .expect("query builds");
        let solutions = prepared
            .run(&registry, &EngineConfig::default())
            .expect("query runs");
        assert_eq!(names(&solutions), vec!["Handle1"]);
    }

    #[test]
    fn nested_conditions_and_predicates() {
        let (registry, prepared) = prepare(
            r#"{
                "variables": [{"name": "body", "type": "Body"}],
                "select": ["body.name"],
                "where": {"op": "or", "any": [
                    {"op": "predicate", "name": "starts_with", "args": ["body.name", {"value": "Container"}]},
                    {"op": "not", "condition": {"op": "predicate", "name": "has_type", "args": ["body", {"value": "Container"}]}}
                ]}
            }"#,
        )
        .expect("query builds");
        let solutions = prepared
            .run(&registry, &EngineConfig::default())
            .expect("query runs");
        assert_eq!(names(&solutions), vec!["Handle1", "Handle2", "Container1"]);
    }

    #[test]
    fn quantifier_over_list_attribute() {
        let (registry, prepared) = prepare(
            r#"{
                "variables": [
                    {"name": "shelf", "type": "Shelf"},
                    {"name": "item", "type": "Handle"}
                ],
                "select": ["shelf"],
                "quantifier": "the",
                "where": {"op": "for_all", "var": "item", "in": "shelf.items",
                          "condition": {"op": "predicate", "name": "starts_with", "args": ["item.name", {"value": "Handle"}]}}
            }"#,
        )
        .expect("query builds");
        let solutions = prepared
            .run(&registry, &EngineConfig::default())
            .expect("exactly one shelf");
        assert_eq!(solutions.len(), 1);
    }

    #[test]
    fn constraint_is_enforced() {
        let (registry, prepared) = prepare(
            r#"{
                "variables": [{"name": "handle", "type": "Handle"}],
                "select": ["handle.name"],
                "constraint": {"at_most": 1}
            }"#,
        )
        .expect("query builds");
        assert!(matches!(
            prepared.run(&registry, &EngineConfig::default()),
            Err(EqlError::GreaterThanExpectedSolutions { expected: 1 })
        ));
        let relaxed = prepared.with_constraint(None);
        assert_eq!(
            relaxed
                .run(&registry, &EngineConfig::default())
                .expect("unconstrained")
                .len(),
            2
        );
    }

    #[test]
    fn explicit_domain_and_literal_refs() {
        let (registry, prepared) = prepare(
            r#"{
                "variables": [{"name": "pick", "domain": [{"ref": "H2"}, {"ref": "C1"}]}],
                "select": ["pick.name", "pick"],
                "where": {"op": "ne", "left": "pick", "right": {"value": {"ref": "C1"}}}
            }"#,
        )
        .expect("query builds");
        let solutions = prepared
            .run(&registry, &EngineConfig::default())
            .expect("query runs");
        assert_eq!(names(&solutions), vec!["Handle2"]);
        assert_eq!(solutions[0].values().len(), 2);
    }

    #[test]
    fn malformed_queries_are_rejected() {
        let undeclared = prepare(r#"{"select": ["ghost"]}"#);
        assert!(matches!(undeclared, Err(EqlError::InvalidDocument(_))));

        let the_with_bounds = prepare(
            r#"{"variables": [{"name": "h", "type": "Handle"}], "select": ["h"],
                "quantifier": "the", "constraint": {"at_least": 1}}"#,
        );
        assert!(the_with_bounds.is_err());

        let bad_range = prepare(
            r#"{"variables": [{"name": "h", "type": "Handle"}], "select": ["h"],
                "constraint": {"at_least": 3, "at_most": 1}}"#,
        );
        assert!(matches!(bad_range, Err(EqlError::InvalidCardinality(_))));

        let unknown_predicate = prepare(
            r#"{"variables": [{"name": "h", "type": "Handle"}], "select": ["h"],
                "where": {"op": "predicate", "name": "glows", "args": ["h"]}}"#,
        );
        assert!(unknown_predicate.is_err());
    }

    #[test]
    fn depth_limit_is_checked_before_building() {
        let mut condition = ConditionDocument::Eq {
            left: TermDocument::Int(1),
            right: TermDocument::Int(1),
        };
        for _ in 0..MAX_CONDITION_DEPTH {
            condition = ConditionDocument::Not {
                condition: Box::new(condition),
            };
        }
        assert_eq!(condition.depth(), MAX_CONDITION_DEPTH + 1);
        let doc = QueryDocument {
            variables: Vec::new(),
            select: vec![TermDocument::Int(1)],
            quantifier: QuantifierDocument::An,
            constraint: None,
            condition: Some(condition),
        };
        let mut registry = Registry::new(InstanceCache::shared());
        let err = doc
            .build(&mut registry, &World::default(), &PredicateLibrary::builtin())
            .expect_err("too deep");
        assert!(err.to_string().contains("depth"));
    }
}
