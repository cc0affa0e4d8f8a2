//! Canonical error taxonomy for the transaction engine
//!
//! Every error carries the context a management-plane client needs to act on
//! it (the offending path, the lock holder, a human-readable message). Each
//! variant maps to a stable error code via [`TrellisError::code`] for
//! programmatic handling, testing, and external API responses.
//!
//! A walk yield is not an error: it is reported through
//! [`crate::walk::WalkStatus::Yielded`].

use thiserror::Error;

/// Result type alias using TrellisError
pub type Result<T> = std::result::Result<T, TrellisError>;

/// Canonical structured error type
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrellisError {
    /// The candidate is identical to the running configuration
    #[error("no changes between candidate and running configuration")]
    NoChanges,

    /// A referenced data or schema node does not exist
    #[error("node not found: {path}")]
    NotFound { path: String },

    /// An exclusive-create targeted an existing node
    #[error("node already exists: {path}")]
    AlreadyExists { path: String },

    /// The configuration is locked, or a transaction is already in progress
    #[error("configuration locked: {message}")]
    Locked { message: String },

    /// A callback or the engine rejected the change as invalid
    #[error("validation error at {path}: {message}")]
    Validation { path: String, message: String },

    /// A prepare callback failed to allocate a required resource
    #[error("resource error at {path}: {message}")]
    Resource { path: String, message: String },

    /// An internal invariant was violated; the transaction is unrecoverable
    #[error("inconsistency at {path}: {message}")]
    Inconsistency { path: String, message: String },

    /// A path string failed to parse
    #[error("invalid path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    /// The edit operation is not applicable to the target schema node
    #[error("operation {operation} not allowed on {path}")]
    OperationNotAllowed { operation: String, path: String },

    /// Generic internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl TrellisError {
    /// Get the stable error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            TrellisError::NoChanges => "ERR_NO_CHANGES",
            TrellisError::NotFound { .. } => "ERR_NOT_FOUND",
            TrellisError::AlreadyExists { .. } => "ERR_ALREADY_EXISTS",
            TrellisError::Locked { .. } => "ERR_LOCKED",
            TrellisError::Validation { .. } => "ERR_VALIDATION",
            TrellisError::Resource { .. } => "ERR_RESOURCE",
            TrellisError::Inconsistency { .. } => "ERR_INCONSISTENCY",
            TrellisError::InvalidPath { .. } => "ERR_INVALID_PATH",
            TrellisError::OperationNotAllowed { .. } => "ERR_OPERATION_NOT_ALLOWED",
            TrellisError::Internal { .. } => "ERR_INTERNAL",
        }
    }

    /// Whether the error is recoverable for the submitting client
    ///
    /// Validation, resource, lock and caller-facing lookup errors leave the
    /// running configuration untouched; the client may fix the request and
    /// retry. Inconsistency errors are terminal for the transaction.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            TrellisError::Inconsistency { .. } | TrellisError::Internal { .. }
        )
    }
}
