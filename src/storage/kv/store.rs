//! Key-value substrate abstraction.
//!
//! The KV backend only needs strings with an optional TTL, sorted sets scored
//! by creation time, and atomic multi-key batches. Redis provides all three;
//! [`super::MemoryStore`] emulates them in-process.

use crate::Result;
use std::time::Duration;

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum KvOp {
    /// Sets a string key, optionally expiring after `ttl`.
    Set {
        /// Key to write.
        key: String,
        /// Serialized value.
        value: String,
        /// Expiry, `None` for a persistent key.
        ttl: Option<Duration>,
    },
    /// Deletes a key of any type.
    Del {
        /// Key to delete.
        key: String,
    },
    /// Adds or re-scores a sorted-set member.
    ZAdd {
        /// Sorted-set key.
        key: String,
        /// Member to add.
        member: String,
        /// Member score.
        score: f64,
    },
    /// Removes a sorted-set member.
    ZRem {
        /// Sorted-set key.
        key: String,
        /// Member to remove.
        member: String,
    },
}

/// Writes applied all-or-nothing.
///
/// With a guard key set, the batch is applied only if that key does not exist
/// at apply time; the check and the writes form one atomic step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    /// Key that must be absent for the batch to apply.
    pub guard: Option<String>,
    /// Writes in application order.
    pub ops: Vec<KvOp>,
}

impl WriteBatch {
    /// Creates an empty, unguarded batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty batch that only applies while `key` is absent.
    #[must_use]
    pub fn guarded(key: impl Into<String>) -> Self {
        Self {
            guard: Some(key.into()),
            ops: Vec::new(),
        }
    }

    /// Appends a string write.
    #[must_use]
    pub fn set(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Self {
        self.ops.push(KvOp::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    /// Appends a delete.
    #[must_use]
    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.ops.push(KvOp::Del { key: key.into() });
        self
    }

    /// Appends a sorted-set insert.
    #[must_use]
    pub fn zadd(mut self, key: impl Into<String>, member: impl Into<String>, score: f64) -> Self {
        self.ops.push(KvOp::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }

    /// Appends a sorted-set removal.
    #[must_use]
    pub fn zrem(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(KvOp::ZRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    /// Returns true when the batch holds no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Result of applying a [`WriteBatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every write was applied.
    Applied {
        /// Number of keys removed by `Del` operations.
        removed: u64,
    },
    /// The guard key existed; nothing was written.
    GuardExists,
}

/// Minimal key-value substrate used by [`super::KvBackend`].
///
/// # Implementor Notes
///
/// * A missing key is `Ok(None)`, never an error.
/// * Transport failures map to `Error::BackendUnavailable`.
/// * `apply` must be atomic: either every op lands or none does.
pub trait KvStore: Send + Sync {
    /// Short name of the substrate for logs and metrics.
    fn name(&self) -> &'static str;

    /// Verifies the substrate is reachable.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if it is not.
    fn ping(&self) -> Result<()>;

    /// Reads a string key.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate cannot be accessed.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Reads several string keys, preserving order; missing keys are `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate cannot be accessed.
    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Checks whether a key exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate cannot be accessed.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Checks several keys in one round trip, preserving order.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate cannot be accessed.
    fn exists_many(&self, keys: &[String]) -> Result<Vec<bool>>;

    /// Applies a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate cannot be accessed; in that case no
    /// write from the batch is visible.
    fn apply(&self, batch: &WriteBatch) -> Result<BatchOutcome>;

    /// Returns sorted-set members with their scores, ascending by score.
    ///
    /// With `max_exclusive` set, only members scored strictly below it are
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate cannot be accessed.
    fn range_by_score(&self, key: &str, max_exclusive: Option<f64>) -> Result<Vec<(String, f64)>>;
}
