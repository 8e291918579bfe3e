//! # Searchkeep
//!
//! Persistent storage for web search results.
//!
//! Searchkeep stores the payload returned by a search provider under an
//! identifier derived from the query text and the time of the search, and
//! lets callers fetch, enumerate, evict, and migrate those records.
//!
//! ## Features
//!
//! - Human-legible, sortable identifiers (`20240101-000000_rust-ownership`)
//! - Two interchangeable backends: a directory of JSON files and Redis
//! - In-memory substitute when Redis is unreachable
//! - Age-based cleanup that never leaves dangling index entries
//! - Idempotent migration between backends
//!
//! ## Example
//!
//! ```rust,ignore
//! use searchkeep::config::StorageSettings;
//! use searchkeep::storage::{ResultStorage, resolve};
//!
//! let resolved = resolve(&StorageSettings::load_default())?;
//! let id = resolved.backend.save("rust ownership", &serde_json::json!({"n": 1}))?;
//! let record = resolved.backend.get(&id)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod storage;

pub use config::{BackendKind, StorageSettings};
pub use models::{Identifier, Record, RecordSummary};
pub use storage::{
    FileBackend, ImportOutcome, KvBackend, MemoryStore, MigrationOptions, MigrationReport,
    ResultStorage, StorageBackend, migrate, resolve,
};

/// Error type for searchkeep operations.
///
/// A missing record is never an error: lookups return `Option` and deletes
/// return `bool`.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed configuration values, unreadable payloads |
/// | `InvalidIdentifier` | An externally supplied identifier does not parse |
/// | `DuplicateIdentifier` | No free identifier could be reserved, or an import collides with a different record |
/// | `BackendUnavailable` | Redis connection, transport, or timeout failures |
/// | `PartialWrite` | A record and its index entries diverged and could not be rolled back |
/// | `OperationFailed` | Filesystem I/O and serialization failures |
/// | `FeatureNotEnabled` | Using a backend that requires a compile-time flag |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A configuration file contains an unknown backend kind
    /// - A payload cannot be parsed as JSON
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An identifier supplied by a caller is malformed.
    ///
    /// Raised by `Identifier::parse`, so backends only ever see identifiers
    /// that are safe file names and key segments. Queries whose slug would be
    /// empty never raise it.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// An identifier is already taken.
    ///
    /// Raised when:
    /// - Every disambiguating suffix for a save was already in use
    /// - An import targets an identifier holding a different record
    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    /// The storage substrate could not be reached.
    ///
    /// At resolution time this triggers the in-memory fallback. After
    /// resolution it surfaces unchanged to the caller.
    #[error("backend '{backend}' unavailable: {cause}")]
    BackendUnavailable {
        /// The backend that failed.
        backend: String,
        /// The underlying cause.
        cause: String,
    },

    /// A record write and its index writes diverged.
    ///
    /// Callers should run `ResultStorage::reconcile` before relying on
    /// listings for this backend.
    #[error("partial write for '{identifier}': {cause}")]
    PartialWrite {
        /// The identifier whose write diverged.
        identifier: String,
        /// The underlying cause.
        cause: String,
    },

    /// An operation failed.
    ///
    /// Raised when:
    /// - Filesystem I/O errors occur
    /// - Records fail to serialize or deserialize
    /// - Non-transport Redis errors occur
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),
}

impl Error {
    /// Returns true when the error came from an unreachable substrate.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

/// Result type alias for searchkeep operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::OperationFailed {
            operation: "test".to_string(),
            cause: "failed".to_string(),
        };
        assert_eq!(err.to_string(), "operation 'test' failed: failed");

        let err = Error::BackendUnavailable {
            backend: "redis".to_string(),
            cause: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "backend 'redis' unavailable: connection refused"
        );
        assert!(err.is_unavailable());

        let err = Error::PartialWrite {
            identifier: "20240101-000000_x".to_string(),
            cause: "index".to_string(),
        };
        assert_eq!(err.to_string(), "partial write for '20240101-000000_x': index");
        assert!(!err.is_unavailable());
    }
}
