//! # Formats Module
//!
//! Serde documents describing worlds and queries at the application
//! boundary.
//!
//! The core never touches the filesystem: the application reads the files,
//! deserializes them into these types and hands them over.

pub mod document;

pub use document::{
    AttributeDocument, ConditionDocument, ConstraintDocument, EntityDocument, PreparedQuery,
    QuantifierDocument, QueryDocument, TermDocument, TypeDocument, VariableDocument, World,
    WorldDocument,
};
