//! Storage layer.
//!
//! Two backends implement [`ResultStorage`]:
//!
//! - [`FileBackend`]: one JSON file per record in a directory.
//! - [`KvBackend`]: records plus sorted-set indexes in a key-value store,
//!   either Redis ([`RedisStore`]) or the in-process [`MemoryStore`].
//!
//! # Index asymmetry
//!
//! The file backend has no persisted index: a directory scan is the index,
//! and the file name encodes both the creation second and the query slug.
//! Nothing can drift, but every listing reads the directory.
//!
//! The KV backend keeps explicit indexes (`index:all` and one
//! `index:query:<slug>` set per query) updated atomically with the record.
//! Listings are index reads, but native TTL expiry can leave index entries
//! behind, so reads skip them and `cleanup`/`reconcile` remove them.
//!
//! Callers pick a backend through [`resolve`], which returns the closed
//! [`StorageBackend`] enum.

mod filesystem;
mod kv;
mod migration;
mod resolver;
mod traits;

pub use filesystem::FileBackend;
pub use kv::{
    BatchOutcome, DEFAULT_PREFIX, DEFAULT_TTL_DAYS, KvBackend, KvOp, KvStore, MemoryStore,
    RedisStore, WriteBatch,
};
pub use migration::{
    DEFAULT_BATCH_SIZE, MigrationFailure, MigrationOptions, MigrationReport, migrate,
};
pub use resolver::{Resolved, resolve};
pub use traits::{ImportOutcome, ResultStorage};

use crate::Result;
use crate::models::{Identifier, Record, RecordSummary};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// Counts an operation outcome in `searchkeep_storage_operations_total`.
pub(crate) fn record_outcome<T>(
    backend: &'static str,
    operation: &'static str,
    result: &Result<T>,
) {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::counter!(
        "searchkeep_storage_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// A concrete storage backend chosen at startup.
#[derive(Debug)]
pub enum StorageBackend {
    /// Directory of JSON files.
    File(FileBackend),
    /// Redis.
    Kv(KvBackend<RedisStore>),
    /// In-process store; contents are lost on exit.
    Memory(KvBackend<MemoryStore>),
}

impl StorageBackend {
    /// Returns the backend as a trait object.
    #[must_use]
    pub fn as_storage(&self) -> &dyn ResultStorage {
        match self {
            Self::File(b) => b,
            Self::Kv(b) => b,
            Self::Memory(b) => b,
        }
    }

    /// Returns true for the in-memory backend.
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }
}

impl ResultStorage for StorageBackend {
    fn backend_name(&self) -> &'static str {
        self.as_storage().backend_name()
    }

    fn save_at(&self, query: &str, payload: &Value, now: DateTime<Utc>) -> Result<Identifier> {
        self.as_storage().save_at(query, payload, now)
    }

    fn import(&self, record: &Record) -> Result<ImportOutcome> {
        self.as_storage().import(record)
    }

    fn get(&self, identifier: &Identifier) -> Result<Option<Record>> {
        self.as_storage().get(identifier)
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<RecordSummary>> {
        self.as_storage().list(limit, offset)
    }

    fn list_by_query(&self, query: &str) -> Result<Vec<RecordSummary>> {
        self.as_storage().list_by_query(query)
    }

    fn delete(&self, identifier: &Identifier) -> Result<bool> {
        self.as_storage().delete(identifier)
    }

    fn cleanup_at(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize> {
        self.as_storage().cleanup_at(max_age, now)
    }

    fn reconcile(&self) -> Result<usize> {
        self.as_storage().reconcile()
    }

    fn count(&self) -> Result<usize> {
        self.as_storage().count()
    }

    fn exists(&self, identifier: &Identifier) -> Result<bool> {
        self.as_storage().exists(identifier)
    }
}
