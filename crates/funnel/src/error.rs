//! Error types for registration, schema synthesis and dispatch.
//!
//! Load-time and precondition failures are `Err` values. Failures that belong
//! to a single dispatch (unknown operation, bad arguments, operation failed)
//! never surface as `Err`; they are folded into [`crate::Outcome::Error`] with
//! a [`FailureKind`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schema synthesis errors (author errors, fatal for that operation's load)
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Operation {operation}: field '{field}' has no resolvable parameter type ({detail})")]
    UnresolvableParameterType {
        operation: String,
        field: String,
        detail: String,
    },

    #[error("Operation {operation}: input contract is not an object schema")]
    NotAnObject { operation: String },
}

/// Registry construction errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No operations found")]
    NoOperationsFound,

    #[error("Operation source {path} does not export an operation{}", .symbol.as_ref().map(|s| format!(" named '{}'", s)).unwrap_or_default())]
    MissingOperationExport {
        path: PathBuf,
        symbol: Option<String>,
    },

    #[error("Duplicate operation name: {0}")]
    DuplicateOperation(String),

    #[error("Invalid operation manifest {path}: {message}")]
    InvalidManifest { path: PathBuf, message: String },

    #[error("Operation source root is not a directory: {0}")]
    SourceRootNotDirectory(PathBuf),

    #[error("Failed to walk operation sources: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Dispatch errors raised before any operation is chosen
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No model provided")]
    NoModelProvided,

    #[error("No messages provided")]
    NoMessagesProvided,

    #[error("No user message found")]
    NoUserMessage,

    #[error("No top n provided")]
    NoTopNProvided,

    #[error("Retriever failed: {0:#}")]
    Retriever(#[source] anyhow::Error),

    #[error("Chat service failed: {0:#}")]
    Chat(#[source] anyhow::Error),
}

/// Per-dispatch failure categories reported inside an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    OperationNotFound,
    ArgumentValidationError,
    OperationExecutionError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::OperationNotFound => "OperationNotFound",
            FailureKind::ArgumentValidationError => "ArgumentValidationError",
            FailureKind::OperationExecutionError => "OperationExecutionError",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recoverable failure from the validate or invoke stage
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct OperationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl OperationFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(name: &str) -> Self {
        Self::new(
            FailureKind::OperationNotFound,
            format!("Operation not found: {}", name),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ArgumentValidationError, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(FailureKind::OperationExecutionError, message)
    }
}
