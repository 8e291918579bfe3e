//! Result storage trait definition.

use crate::Result;
use crate::models::{Identifier, Record, RecordSummary};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// Outcome of writing a record under an existing identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The record was written.
    Imported,
    /// An identical record already existed; nothing was written.
    AlreadyPresent,
}

/// Capability set every storage backend implements.
///
/// Identifier uniqueness, index/record consistency, and all-or-nothing saves
/// are the implementor's responsibility. A missing record is a normal
/// outcome (`None` / `false`), never an error.
pub trait ResultStorage: Send + Sync {
    /// Short backend name for logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Saves a search result as if the search ran at `now`.
    ///
    /// If the base identifier is taken, a `_<n>` suffix is appended.
    ///
    /// # Returns
    ///
    /// The identifier the record was stored under.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateIdentifier` if no free identifier could be reserved,
    /// `PartialWrite` if the record and its index entries diverged, or a
    /// backend error if the write failed cleanly.
    fn save_at(&self, query: &str, payload: &Value, now: DateTime<Utc>) -> Result<Identifier>;

    /// Saves a search result stamped with the current time.
    ///
    /// # Errors
    ///
    /// See [`ResultStorage::save_at`].
    fn save(&self, query: &str, payload: &Value) -> Result<Identifier> {
        self.save_at(query, payload, Utc::now())
    }

    /// Writes a record under its existing identifier.
    ///
    /// # Returns
    ///
    /// `AlreadyPresent` if an identical record is stored under that
    /// identifier, `Imported` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateIdentifier` if the identifier holds a different
    /// record.
    fn import(&self, record: &Record) -> Result<ImportOutcome>;

    /// Gets a record by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be accessed.
    fn get(&self, identifier: &Identifier) -> Result<Option<Record>>;

    /// Lists records, most recent first, ties by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be accessed.
    fn list(&self, limit: usize, offset: usize) -> Result<Vec<RecordSummary>>;

    /// Lists every record saved for exactly this query text, same order as
    /// [`ResultStorage::list`].
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be accessed.
    fn list_by_query(&self, query: &str) -> Result<Vec<RecordSummary>>;

    /// Deletes a record and its index entries.
    ///
    /// # Returns
    ///
    /// True if a record existed, false otherwise. Deleting twice is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be accessed.
    fn delete(&self, identifier: &Identifier) -> Result<bool>;

    /// Removes every record created before `now - max_age`.
    ///
    /// Only `created_at` is consulted, never access or modification time.
    ///
    /// # Returns
    ///
    /// The number of records removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be accessed.
    fn cleanup_at(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize>;

    /// Removes every record older than `max_age`, measured from now.
    ///
    /// # Errors
    ///
    /// See [`ResultStorage::cleanup_at`].
    fn cleanup(&self, max_age: Duration) -> Result<usize> {
        self.cleanup_at(max_age, Utc::now())
    }

    /// Repairs inconsistencies left by interrupted writes.
    ///
    /// # Returns
    ///
    /// The number of repairs performed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be accessed.
    fn reconcile(&self) -> Result<usize>;

    /// Returns the number of live records.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be accessed.
    fn count(&self) -> Result<usize> {
        Ok(self.list(usize::MAX, 0)?.len())
    }

    /// Checks whether a record exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be accessed.
    fn exists(&self, identifier: &Identifier) -> Result<bool> {
        Ok(self.get(identifier)?.is_some())
    }
}
