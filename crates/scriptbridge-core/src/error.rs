//! Error types for the call bridge.

use thiserror::Error;

use crate::codec::ParamKind;

/// Errors raised while decoding or routing a bridge call.
///
/// None of these ever reach a host function: they are detected before
/// invocation and surface to the script as an error response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// The request payload is not a valid `{m, f, a}` JSON object.
    #[error("decode failure: {0}")]
    Decode(String),

    /// The argument count does not match the function's declared parameters.
    #[error("arity mismatch: expected {expected} argument(s), got {actual}")]
    Arity { expected: usize, actual: usize },

    /// No module with this name is registered.
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// The module exists but exposes no function with this name.
    #[error("unknown function: {module}.{function}")]
    UnknownFunction { module: String, function: String },

    /// `null` was passed for a parameter that is not nullable.
    #[error("decode failure: argument {index} ({name}) must not be null")]
    NullArgument { index: usize, name: &'static str },

    /// The wire value cannot be decoded into the parameter's kind.
    #[error("decode failure: argument {index} ({name}) expected {expected}, got {found}")]
    ArgumentType {
        index: usize,
        name: &'static str,
        expected: ParamKind,
        found: String,
    },
}

/// Result type for bridge decoding and lookup.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Failure reported by a host function body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The function ran and failed.
    #[error("{0}")]
    Failed(String),

    /// The work was cancelled before it produced a value.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl HostError {
    /// Wrap any displayable error as a failure, keeping its source chain when
    /// it is rendered with the alternate formatter.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        HostError::Failed(format!("{err:#}"))
    }
}
