use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::graph::TypeRef;

/// Where in the input a node (or a failing fragment) came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaLocation {
    pub document: String,
    /// JSON pointer inside `document`.
    pub pointer: String,
}

impl SchemaLocation {
    pub fn new(document: impl Into<String>, pointer: impl Into<String>) -> Self {
        Self { document: document.into(), pointer: pointer.into() }
    }

    pub fn unknown() -> Self {
        Self { document: "<unknown>".to_string(), pointer: String::new() }
    }
}

impl fmt::Display for SchemaLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document, self.pointer)
    }
}

/// Terminal failure of a pipeline run. Every variant carries the schema
/// location of the node that triggered it.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{location}: schema fragment has no representable shape: {reason}")]
    SchemaShapeError { location: SchemaLocation, reason: String },

    #[error("{location}: qualified name `{name}` is also claimed by {other}")]
    UnresolvableNameCollision { location: SchemaLocation, name: String, other: SchemaLocation },

    #[error("{location}: `{generic}` declares {expected} type parameter(s) but is applied with {found}")]
    InconsistentGenericArity { location: SchemaLocation, generic: String, expected: usize, found: usize },

    #[error("{location}: union `{union}` has structurally identical candidates `{first}` and `{second}`")]
    IllegalUnionCandidateOverlap { location: SchemaLocation, union: String, first: String, second: String },

    #[error("{location}: cannot merge `{member}` into `{survivor}`: {reason}")]
    CompressionPolicyConflict { location: SchemaLocation, survivor: String, member: String, reason: String },

    #[error("{location}: reference {reference} does not resolve to a live type")]
    DanglingReference { location: SchemaLocation, reference: TypeRef },

    #[error("{location}: invariant `{invariant}` violated: {detail}")]
    InvariantViolation { location: SchemaLocation, invariant: &'static str, detail: String },
}

impl ModelError {
    pub fn location(&self) -> &SchemaLocation {
        match self {
            ModelError::SchemaShapeError { location, .. }
            | ModelError::UnresolvableNameCollision { location, .. }
            | ModelError::InconsistentGenericArity { location, .. }
            | ModelError::IllegalUnionCandidateOverlap { location, .. }
            | ModelError::CompressionPolicyConflict { location, .. }
            | ModelError::DanglingReference { location, .. }
            | ModelError::InvariantViolation { location, .. } => location,
        }
    }

    pub(crate) fn shape(location: SchemaLocation, reason: impl Into<String>) -> Self {
        ModelError::SchemaShapeError { location, reason: reason.into() }
    }
}
