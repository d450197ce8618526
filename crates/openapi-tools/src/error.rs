//! Error types for `jules-openapi-tools`.

use thiserror::Error;

/// Malformed or ambiguous `OpenAPI` document.
///
/// Always fatal at startup: a registry is never built from a document that produced one.
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("failed to read OpenAPI document '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse OpenAPI document from '{location}': {source}")]
    Parse {
        location: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unsupported OpenAPI version '{version}' in '{location}' (expected 3.x)")]
    UnsupportedVersion { location: String, version: String },

    #[error("OpenAPI document hash mismatch for '{location}': expected {expected}, got {actual}")]
    HashMismatch {
        location: String,
        expected: String,
        actual: String,
    },

    #[error("unresolved $ref '{reference}'")]
    UnresolvedRef { reference: String },

    #[error("cyclic $ref detected while resolving '{reference}'")]
    CyclicRef { reference: String },

    #[error("external $ref '{reference}' is not supported (only local '#/...' pointers)")]
    ExternalRef { reference: String },

    #[error("$ref '{reference}' does not point at a valid {expected}: {message}")]
    InvalidRefTarget {
        reference: String,
        expected: &'static str,
        message: String,
    },

    #[error("duplicate tool name '{name}' (derived from {first} and {second})")]
    DuplicateToolName {
        name: String,
        first: String,
        second: String,
    },

    #[error("invalid operation {method} {path}: {message}")]
    InvalidOperation {
        method: String,
        path: String,
        message: String,
    },
}

/// Invalid client configuration (base URL, identity header, client construction).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid base URL '{url}': {message}")]
    InvalidBaseUrl { url: String, message: String },

    #[error("invalid header '{name}': {message}")]
    InvalidHeader { name: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Per-call failure raised by the request-building or execution stage.
///
/// These never escape [`crate::registry::ToolRegistry::invoke`]; they are folded into a
/// failure [`crate::response::InvocationResult`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("{message}")]
    Validation {
        field: Option<String>,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),
}

impl InvocationError {
    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Validation {
            field: None,
            message: message.into(),
        }
    }
}

/// Result type alias for document loading and indexing.
pub type Result<T> = std::result::Result<T, SpecError>;
