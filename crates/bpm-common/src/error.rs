//! Common error types for the BPM ecosystem.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`BpmError`].
pub type BpmResult<T> = Result<T, BpmError>;

/// Common errors across the BPM crates.
#[derive(Error, Diagnostic, Debug)]
pub enum BpmError {
    /// Invalid container ID format.
    #[error("Invalid container ID: {id}")]
    #[diagnostic(
        code(bpm::container::invalid_id),
        help("Container IDs are formed from the job and process names, which must be alphanumeric with hyphens, underscores, and dots")
    )]
    InvalidContainerId {
        /// The invalid container ID.
        id: String,
    },

    /// Invalid byte quantity format.
    #[error("Invalid byte quantity: {value}")]
    #[diagnostic(
        code(bpm::quantity::invalid),
        help("Use a positive integer followed by a unit, like '100G', '10M', or '64K'")
    )]
    InvalidByteQuantity {
        /// The invalid value.
        value: String,
    },

    /// The named user does not exist in the system user database.
    #[error("Unknown user: {name}")]
    #[diagnostic(code(bpm::user::unknown))]
    UnknownUser {
        /// The user name that was not found.
        name: String,
    },

    /// Reading the system user database failed.
    #[error("User lookup failed for {name}: {reason}")]
    #[diagnostic(code(bpm::user::lookup))]
    UserLookupFailed {
        /// The user name being resolved.
        name: String,
        /// The underlying failure.
        reason: String,
    },

    /// A filesystem operation on a specific path failed.
    #[error("Failed to {operation} {}: {source}", path.display())]
    #[diagnostic(code(bpm::fs))]
    Filesystem {
        /// What was being attempted.
        operation: String,
        /// The path the operation failed on.
        path: std::path::PathBuf,
        /// The underlying I/O failure.
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(bpm::io))]
    Io(#[from] std::io::Error),
}

impl BpmError {
    /// Build a [`BpmError::Filesystem`] for a failed operation on a path.
    pub fn filesystem(
        operation: impl Into<String>,
        path: impl Into<std::path::PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Filesystem {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }
}
