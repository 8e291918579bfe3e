//! In-process key-value store.
//!
//! Stands in for Redis when the configured server is unreachable, and backs
//! the KV tests. Contents vanish with the process.

use super::store::{BatchOutcome, KvOp, KvStore, WriteBatch};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

#[derive(Debug, Default)]
struct Inner {
    strings: HashMap<String, (String, Option<Instant>)>,
    sorted_sets: HashMap<String, HashMap<String, f64>>,
}

impl Inner {
    /// Drops `key` if its TTL has passed.
    fn expire(&mut self, key: &str, now: Instant) {
        if self
            .strings
            .get(key)
            .is_some_and(|(_, expiry)| expiry.is_some_and(|at| at <= now))
        {
            self.strings.remove(key);
        }
    }

    fn get(&mut self, key: &str, now: Instant) -> Option<String> {
        self.expire(key, now);
        self.strings.get(key).map(|(value, _)| value.clone())
    }

    fn exists(&mut self, key: &str, now: Instant) -> bool {
        self.expire(key, now);
        self.strings.contains_key(key) || self.sorted_sets.contains_key(key)
    }

    fn apply_op(&mut self, op: &KvOp, now: Instant) -> u64 {
        match op {
            KvOp::Set { key, value, ttl } => {
                let expiry = ttl.map(|ttl| now + ttl);
                self.strings.insert(key.clone(), (value.clone(), expiry));
                0
            },
            KvOp::Del { key } => {
                self.expire(key, now);
                let removed_string = self.strings.remove(key).is_some();
                let removed_set = self.sorted_sets.remove(key).is_some();
                u64::from(removed_string || removed_set)
            },
            KvOp::ZAdd { key, member, score } => {
                self.sorted_sets
                    .entry(key.clone())
                    .or_default()
                    .insert(member.clone(), *score);
                0
            },
            KvOp::ZRem { key, member } => {
                if let Some(set) = self.sorted_sets.get_mut(key) {
                    set.remove(member);
                    if set.is_empty() {
                        self.sorted_sets.remove(key);
                    }
                }
                0
            },
        }
    }
}

/// In-memory [`KvStore`] with lazy TTL expiry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|e| Error::OperationFailed {
            operation: "memory_store_lock".to_string(),
            cause: e.to_string(),
        })
    }
}

impl KvStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key, Instant::now()))
    }

    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        Ok(keys.iter().map(|key| inner.get(key, now)).collect())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.exists(key, Instant::now()))
    }

    fn exists_many(&self, keys: &[String]) -> Result<Vec<bool>> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        Ok(keys.iter().map(|key| inner.exists(key, now)).collect())
    }

    fn apply(&self, batch: &WriteBatch) -> Result<BatchOutcome> {
        let now = Instant::now();
        let mut inner = self.lock()?;

        if batch.guard.as_deref().is_some_and(|guard| inner.exists(guard, now)) {
            return Ok(BatchOutcome::GuardExists);
        }

        let removed = batch.ops.iter().map(|op| inner.apply_op(op, now)).sum();
        Ok(BatchOutcome::Applied { removed })
    }

    fn range_by_score(&self, key: &str, max_exclusive: Option<f64>) -> Result<Vec<(String, f64)>> {
        let inner = self.lock()?;
        let Some(set) = inner.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };

        let mut members: Vec<(String, f64)> = set
            .iter()
            .filter(|(_, score)| max_exclusive.is_none_or(|max| **score < max))
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(members)
    }
}
