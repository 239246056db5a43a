//! Error types for schema access and dependency inference.
//!
//! Every failure here is recoverable from the caller's point of view: the
//! analyzer catches these at the operation boundary and simply leaves the
//! offending operation out of the dependency graph.

use thiserror::Error;

/// Errors produced while reading an API schema document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The document is not shaped like an OpenAPI / Swagger document.
    #[error("invalid schema document: {reason}")]
    InvalidDocument { reason: String },

    /// A `$ref` points outside the document or at a missing location.
    #[error("unresolvable reference: '{reference}'")]
    UnresolvableReference { reference: String },

    /// A chain of `$ref`s loops back onto itself.
    #[error("recursive reference: '{reference}'")]
    RecursiveReference { reference: String },

    /// An operation definition could not be interpreted.
    #[error("invalid operation {label}: {reason}")]
    InvalidOperation { label: String, reason: String },
}
