//! Error types for the job engine.
//!
//! Every public operation returns [`JobError`]. The variants map one-to-one
//! onto the outcomes a caller has to tell apart: bad input, not allowed,
//! something else is already running, no such thing, a file could not be
//! transformed, or state could not be written.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

use crate::gate::Denial;
use crate::transform::TransformError;

/// Context for persistence failures, providing debugging information.
#[derive(Debug, Clone, Default)]
pub struct StoreContext {
    /// The record or lock file involved
    pub path: Option<PathBuf>,
    /// What the store was doing (`read`, `write`, `lock`, ...)
    pub operation: Option<&'static str>,
}

impl StoreContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }
}

impl fmt::Display for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.operation, &self.path) {
            (Some(op), Some(path)) => write!(f, "{op} {}", path.display()),
            (Some(op), None) => write!(f, "{op}"),
            (None, Some(path)) => write!(f, "{}", path.display()),
            (None, None) => write!(f, "(no context)"),
        }
    }
}

#[derive(Error, Debug)]
pub enum JobError {
    /// Malformed folder, mode or job id.
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// The capability check failed.
    #[error("Forbidden: {0}")]
    Authorization(#[from] Denial),

    /// A job is already active on the folder or one of its ancestors.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unknown job or folder.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// A specific file could not be encrypted or decrypted.
    #[error("Transform failed: {0}")]
    Transform(#[from] TransformError),

    /// A job record, lock or folder record could not be read or written.
    #[error("Persistence error ({context}): {source}")]
    Persistence {
        #[source]
        source: io::Error,
        context: StoreContext,
    },
}

impl JobError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        JobError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(what: &'static str, id: impl fmt::Display) -> Self {
        JobError::NotFound {
            what,
            id: id.to_string(),
        }
    }

    /// Create a persistence error with context
    #[must_use]
    pub fn persistence(source: io::Error, context: StoreContext) -> Self {
        JobError::Persistence { source, context }
    }

    /// Short machine-readable kind, used by front-ends for status mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Validation { .. } => "validation",
            JobError::Authorization(_) => "forbidden",
            JobError::Conflict(_) => "conflict",
            JobError::NotFound { .. } => "not_found",
            JobError::Transform(_) => "transform",
            JobError::Persistence { .. } => "persistence",
        }
    }
}
