//! Error types for the stateful runtime.
//!
//! None of these reach the end user: invalid links are logged and skipped,
//! and failed expressions are carried inside the extracted value so the
//! driver can decide whether to regenerate the parameter.

use thiserror::Error;

/// A declared or inferred link that cannot be turned into a transition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    /// The link's `operationId` or `operationRef` does not match any operation.
    #[error("operation '{reference}' not found")]
    OperationNotFound { reference: String },

    /// A bare parameter name that the target operation does not declare, or
    /// a `$request` expression naming a parameter the source lacks.
    #[error("parameter `{name}` is not defined in API operation `{target}`")]
    UnknownParameter { name: String, target: String },

    /// A location prefix that link parameters cannot address.
    #[error("link parameters cannot target location '{location}'")]
    InvalidLocation { location: String },

    /// The link names neither `operationId` nor `operationRef`.
    #[error("link '{name}' has no target operation")]
    MissingTarget { name: String },

    /// A parameter expression that does not parse.
    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

/// Runtime expression failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    /// Syntax outside the supported runtime expression grammar.
    #[error("invalid expression `{expression}`: {reason}")]
    Unsupported { expression: String, reason: String },

    /// The expression is valid but the step output has no value for it.
    #[error("expression `{expression}` cannot be resolved")]
    Unresolved { expression: String },
}

/// Invalid run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("configuration is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}
