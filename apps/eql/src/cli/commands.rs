//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//! Each command returns the text to print so it can be tested without
//! capturing stdout.

use super::{DocumentArgs, OutputMode};
use crate::Settings;
use eql_core::formats::QuantifierDocument;
use eql_core::{
    EqlError, InstanceCache, PredicateLibrary, PreparedQuery, QueryDocument, Registry,
    ResultQuantificationConstraint, Solution, Value, World, WorldDocument,
};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for a world document (100 MB).
///
/// This prevents memory exhaustion from malicious or accidental large files.
const MAX_WORLD_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum file size for a query document (1 MB).
const MAX_QUERY_FILE_SIZE: u64 = 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), EqlError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| EqlError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(EqlError::InvalidDocument(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Validate file path.
///
/// Canonicalizes the path (resolving symlinks and "..") and ensures it
/// names an existing regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, EqlError> {
    let canonical = path.canonicalize().map_err(|e| {
        EqlError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(EqlError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Read and deserialize a JSON document.
fn read_document<T: DeserializeOwned>(path: &Path, max_size: u64) -> Result<T, EqlError> {
    let canonical = validate_file_path(path)?;
    validate_file_size(&canonical, max_size)?;
    let text = std::fs::read_to_string(&canonical)
        .map_err(|e| EqlError::IoError(format!("Cannot read '{}': {}", path.display(), e)))?;
    serde_json::from_str(&text)
        .map_err(|e| EqlError::InvalidDocument(format!("{}: {}", path.display(), e)))
}

// =============================================================================
// DOCUMENT LOADING
// =============================================================================

/// A world and a query built against it.
#[derive(Debug)]
pub struct Loaded {
    pub world: World,
    pub registry: Registry,
    pub prepared: PreparedQuery,
}

/// Load the world into a fresh cache and build the query over it.
pub fn load_documents(documents: &DocumentArgs) -> Result<Loaded, EqlError> {
    let world_doc: WorldDocument = read_document(&documents.world, MAX_WORLD_FILE_SIZE)?;
    let query_doc: QueryDocument = read_document(&documents.query, MAX_QUERY_FILE_SIZE)?;

    let cache = InstanceCache::shared();
    let world = world_doc.load_into(&cache)?;
    let mut registry = Registry::new(cache);
    let prepared = query_doc.build(&mut registry, &world, &PredicateLibrary::builtin())?;
    tracing::info!(
        entities = world.len(),
        variables = prepared.variables().len(),
        "documents loaded"
    );
    Ok(Loaded {
        world,
        registry,
        prepared,
    })
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Cardinality overrides given on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunRequest {
    pub the: bool,
    pub at_least: Option<usize>,
    pub at_most: Option<usize>,
}

/// Evaluate the query and render its solutions.
pub fn cmd_run(
    documents: &DocumentArgs,
    settings: &Settings,
    request: RunRequest,
    mode: OutputMode,
) -> Result<String, EqlError> {
    let Loaded {
        registry,
        mut prepared,
        ..
    } = load_documents(documents)?;

    if request.the {
        prepared = prepared.expect_one();
    } else if let Some(constraint) =
        ResultQuantificationConstraint::from_bounds(request.at_least, request.at_most)?
    {
        prepared = prepared.with_constraint(Some(constraint));
    }

    let solutions = prepared.run(&registry, &settings.engine)?;
    tracing::info!(solutions = solutions.len(), "query finished");

    if mode.json {
        let rendered: Vec<serde_json::Value> = solutions
            .iter()
            .map(|s| solution_to_json(s, mode.verbose))
            .collect();
        let output = serde_json::json!({
            "query": prepared.query().node().to_string(),
            "count": solutions.len(),
            "solutions": rendered,
        });
        return Ok(serde_json::to_string_pretty(&output).unwrap_or_default());
    }

    let mut lines: Vec<String> = Vec::with_capacity(solutions.len() + 1);
    for solution in &solutions {
        let values: Vec<String> = solution.values().iter().map(display_value).collect();
        if mode.verbose {
            lines.push(format!("{}    {}", values.join(", "), solution.bindings()));
        } else {
            lines.push(values.join(", "));
        }
    }
    if !mode.quiet {
        lines.push(format!("{} solution(s)", solutions.len()));
    }
    Ok(lines.join("\n"))
}

/// Text values print unquoted; everything else uses its `Display`.
fn display_value(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// CHECK COMMAND
// =============================================================================

/// Build and validate the query, then describe it.
pub fn cmd_check(documents: &DocumentArgs, mode: OutputMode) -> Result<String, EqlError> {
    let loaded = load_documents(documents)?;
    let prepared = &loaded.prepared;

    let mut variables = Vec::with_capacity(prepared.variables().len());
    for var in prepared.variables() {
        let ty = loaded
            .registry
            .type_constraint(var)?
            .map(|t| t.as_str().to_string());
        variables.push((var.name().to_string(), ty));
    }
    let quantifier = match prepared.quantifier() {
        QuantifierDocument::An => "an",
        QuantifierDocument::The => "the",
    };
    let constraint = prepared.constraint();

    if mode.json {
        let vars: Vec<serde_json::Value> = variables
            .iter()
            .map(|(name, ty)| serde_json::json!({ "name": name, "type": ty }))
            .collect();
        let output = serde_json::json!({
            "valid": true,
            "expression": prepared.query().node().to_string(),
            "variables": vars,
            "quantifier": quantifier,
            "at_least": constraint.and_then(|c| c.at_least()),
            "at_most": constraint.and_then(|c| c.at_most()),
            "entities": loaded.world.len(),
        });
        return Ok(serde_json::to_string_pretty(&output).unwrap_or_default());
    }

    let mut lines = Vec::new();
    if !mode.quiet {
        lines.push("Query OK".to_string());
        lines.push("========".to_string());
    }
    lines.push(format!("Expression: {}", prepared.query().node()));
    let rendered: Vec<String> = variables
        .iter()
        .map(|(name, ty)| match ty {
            Some(ty) => format!("{}: {}", name, ty),
            None => name.clone(),
        })
        .collect();
    lines.push(format!("Variables:  {}", rendered.join(", ")));
    match constraint {
        Some(c) => lines.push(format!("Quantifier: {} {:?}", quantifier, c)),
        None => lines.push(format!("Quantifier: {}", quantifier)),
    }
    if mode.verbose {
        lines.push(format!("Entities:   {}", loaded.world.len()));
    }
    Ok(lines.join("\n"))
}

// =============================================================================
// EXPLAIN COMMAND
// =============================================================================

/// Render the expression tree, optionally negated.
pub fn cmd_explain(documents: &DocumentArgs, negate: bool, mode: OutputMode) -> Result<String, EqlError> {
    let loaded = load_documents(documents)?;
    let query = if negate {
        loaded.prepared.query().negated()
    } else {
        loaded.prepared.query().clone()
    };
    let expression = query.node().to_string();

    if mode.json {
        let output = serde_json::json!({
            "expression": expression,
            "negated": negate,
        });
        return Ok(serde_json::to_string_pretty(&output).unwrap_or_default());
    }
    Ok(expression)
}

// =============================================================================
// JSON RENDERING
// =============================================================================

fn solution_to_json(solution: &Solution, with_bindings: bool) -> serde_json::Value {
    let values: Vec<serde_json::Value> = solution
        .values()
        .iter()
        .map(|v| value_to_json(v, true))
        .collect();
    if !with_bindings {
        return serde_json::Value::Array(values);
    }
    let bindings: serde_json::Map<String, serde_json::Value> = solution
        .bindings()
        .bindings()
        .into_iter()
        .map(|(var, value)| (var.name().to_string(), value_to_json(&value, false)))
        .collect();
    serde_json::json!({ "values": values, "bindings": bindings })
}

/// Convert a value to JSON. Entities expand their attributes one level
/// deep; nested entities render as `{"id", "type"}` references.
pub fn value_to_json(value: &Value, expand: bool) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => {
            serde_json::Value::Array(items.iter().map(|v| value_to_json(v, expand)).collect())
        }
        Value::Entity(entity) => {
            let mut object = serde_json::Map::new();
            object.insert("id".to_string(), serde_json::Value::from(entity.id().0));
            object.insert(
                "type".to_string(),
                serde_json::Value::String(entity.type_name().as_str().to_string()),
            );
            if expand {
                let attributes: serde_json::Map<String, serde_json::Value> = entity
                    .attributes()
                    .map(|(name, v)| (name.to_string(), value_to_json(v, false)))
                    .collect();
                object.insert(
                    "attributes".to_string(),
                    serde_json::Value::Object(attributes),
                );
            } else if let Some(name) = entity.name() {
                object.insert("name".to_string(), serde_json::Value::String(name.to_string()));
            }
            serde_json::Value::Object(object)
        }
    }
}
