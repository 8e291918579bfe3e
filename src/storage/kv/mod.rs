//! Key-value result storage.
//!
//! Records live under a configurable prefix (default `web-search:`):
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `<prefix>result:<id>` | string | JSON record, optional TTL |
//! | `<prefix>index:all` | sorted set | every identifier, scored by creation second |
//! | `<prefix>index:query:<slug>` | sorted set | identifiers saved for that slug |
//!
//! Every mutation that touches a record also touches both index entries in
//! the same atomic batch. The query index key is derived from the
//! identifier's slug, so removing a record never needs to read it first.
//!
//! Native TTL expiry removes only the record key. Index entries left behind
//! are skipped by reads and removed by [`ResultStorage::cleanup`] and
//! [`ResultStorage::reconcile`].

mod memory;
mod redis;
mod store;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;
pub use store::{BatchOutcome, KvOp, KvStore, WriteBatch};

use super::{ImportOutcome, ResultStorage, record_outcome};
use crate::models::{
    Identifier, Record, RecordSummary, retention_cutoff, slugify, sort_by_recency,
};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "web-search:";

/// Default record TTL in days.
pub const DEFAULT_TTL_DAYS: u32 = 14;

/// Number of records fetched per `MGET`.
const FETCH_CHUNK: usize = 100;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Result storage over any [`KvStore`].
#[derive(Debug)]
pub struct KvBackend<S: KvStore> {
    store: S,
    prefix: String,
    ttl: Option<std::time::Duration>,
}

impl KvBackend<MemoryStore> {
    /// Creates a backend over a fresh in-memory store with default settings.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }
}

impl<S: KvStore> KvBackend<S> {
    /// Creates a backend with the default prefix and TTL.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            prefix: DEFAULT_PREFIX.to_string(),
            ttl: ttl_from_days(DEFAULT_TTL_DAYS),
        }
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the record TTL in days; 0 disables expiry.
    #[must_use]
    pub fn with_ttl_days(mut self, days: u32) -> Self {
        self.ttl = ttl_from_days(days);
        self
    }

    /// Returns the key prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the record TTL, if any.
    #[must_use]
    pub const fn ttl(&self) -> Option<std::time::Duration> {
        self.ttl
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    fn result_key(&self, identifier: &Identifier) -> String {
        format!("{}result:{identifier}", self.prefix)
    }

    fn global_index_key(&self) -> String {
        format!("{}index:all", self.prefix)
    }

    fn query_index_key(&self, slug: &str) -> String {
        format!("{}index:query:{slug}", self.prefix)
    }

    /// Builds the batch that writes a record and both index entries, guarded
    /// on the record key being free.
    fn insert_batch(&self, record: &Record, json: &str) -> WriteBatch {
        let key = self.result_key(&record.identifier);
        let member = record.identifier.as_str();
        WriteBatch::guarded(key.clone())
            .set(key, json, self.ttl)
            .zadd(self.global_index_key(), member, record.score())
            .zadd(
                self.query_index_key(record.identifier.slug()),
                member,
                record.score(),
            )
    }

    /// Builds the batch that drops both index entries for an identifier.
    fn unindex_batch(&self, identifier: &Identifier) -> WriteBatch {
        WriteBatch::new()
            .zrem(self.global_index_key(), identifier.as_str())
            .zrem(self.query_index_key(identifier.slug()), identifier.as_str())
    }

    /// Builds the batch that removes a record and both index entries.
    fn remove_batch(&self, identifier: &Identifier) -> WriteBatch {
        let mut batch = self.unindex_batch(identifier);
        batch.ops.insert(
            0,
            KvOp::Del {
                key: self.result_key(identifier),
            },
        );
        batch
    }

    fn parse_record(identifier: &Identifier, json: &str) -> Result<Record> {
        serde_json::from_str(json).map_err(|e| Error::OperationFailed {
            operation: "parse_record_json".to_string(),
            cause: format!("{identifier}: {e}"),
        })
    }

    fn load(&self, identifier: &Identifier) -> Result<Option<Record>> {
        self.store
            .get(&self.result_key(identifier))?
            .map(|json| Self::parse_record(identifier, &json))
            .transpose()
    }

    /// Writes `record` under its identifier unless the key is taken.
    ///
    /// Returns false when the key exists.
    fn insert(&self, record: &Record) -> Result<bool> {
        let json = serde_json::to_string(record).map_err(|e| Error::OperationFailed {
            operation: "serialize_record".to_string(),
            cause: e.to_string(),
        })?;

        match self.store.apply(&self.insert_batch(record, &json)) {
            Ok(BatchOutcome::Applied { .. }) => Ok(true),
            Ok(BatchOutcome::GuardExists) => Ok(false),
            Err(e) if e.is_unavailable() => Err(e),
            Err(e) => Err(self.roll_back_insert(record, &json, e)),
        }
    }

    /// Stores `record` under its base identifier or the first free suffix.
    fn claim(&self, mut record: Record) -> Result<Identifier> {
        let base = record.identifier.clone();
        for candidate in base.candidates() {
            record.identifier = candidate;
            if self.insert(&record)? {
                return Ok(record.identifier);
            }
            debug!(identifier = %record.identifier, "Identifier taken, trying next suffix");
        }
        Err(Error::DuplicateIdentifier(base.to_string()))
    }

    /// Undoes a batch that failed after some of its commands ran.
    ///
    /// Redis applies the commands of a failed transaction that did not
    /// themselves error, so the record may be visible without its index
    /// entries.
    fn roll_back_insert(&self, record: &Record, json: &str, cause: Error) -> Error {
        let key = self.result_key(&record.identifier);
        match self.store.get(&key) {
            Ok(Some(stored)) if stored == json => {},
            // Nothing of ours is visible.
            Ok(_) => return cause,
            Err(e) => {
                return Error::PartialWrite {
                    identifier: record.identifier.to_string(),
                    cause: format!("{cause}; state unknown: {e}"),
                };
            },
        }

        match self.store.apply(&self.remove_batch(&record.identifier)) {
            Ok(_) => {
                warn!(identifier = %record.identifier, error = %cause, "Rolled back failed save");
                cause
            },
            Err(e) => Error::PartialWrite {
                identifier: record.identifier.to_string(),
                cause: format!("{cause}; rollback failed: {e}"),
            },
        }
    }

    /// Returns indexed identifiers most recent first, ties by identifier.
    fn ordered_index(&self) -> Result<Vec<Identifier>> {
        let mut entries: Vec<(Identifier, f64)> = self
            .store
            .range_by_score(&self.global_index_key(), None)?
            .into_iter()
            .filter_map(|(member, score)| Identifier::parse(&member).ok().map(|id| (id, score)))
            .collect();

        entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(entries.into_iter().map(|(id, _)| id).collect())
    }

    /// Loads records for `ids` in order; expired and unparsable records are
    /// skipped.
    fn load_many(&self, ids: &[Identifier]) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(FETCH_CHUNK) {
            let values = self.store.get_many(&self.result_keys(chunk))?;

            for (id, value) in chunk.iter().zip(values) {
                let Some(json) = value else { continue };
                match Self::parse_record(id, &json) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(identifier = %id, error = %e, "Skipping unreadable record"),
                }
            }
        }
        Ok(records)
    }

    /// Returns the keys of `ids`' records, in order.
    fn result_keys(&self, ids: &[Identifier]) -> Vec<String> {
        ids.iter().map(|id| self.result_key(id)).collect()
    }

    fn list_live(&self, limit: usize, offset: usize) -> Result<Vec<RecordSummary>> {
        let ids = self.ordered_index()?;

        // Index entries may outlive expired records, so pages are counted in
        // live records rather than index positions. Records before the page
        // are only checked for existence.
        let mut rest: &[Identifier] = &ids;
        let mut skipped = 0;
        while skipped < offset && !rest.is_empty() {
            let chunk = &rest[..rest.len().min(FETCH_CHUNK)];
            let mut consumed = 0;
            for live in self.store.exists_many(&self.result_keys(chunk))? {
                if skipped == offset {
                    break;
                }
                consumed += 1;
                if live {
                    skipped += 1;
                }
            }
            rest = &rest[consumed..];
        }

        let mut page = Vec::new();
        while page.len() < limit && !rest.is_empty() {
            let wanted = (limit - page.len()).min(FETCH_CHUNK);
            let (chunk, tail) = rest.split_at(rest.len().min(wanted));
            page.extend(self.load_many(chunk)?.into_iter().map(RecordSummary::from));
            rest = tail;
        }

        sort_by_recency(&mut page);
        Ok(page)
    }
}

fn ttl_from_days(days: u32) -> Option<std::time::Duration> {
    (days > 0).then(|| std::time::Duration::from_secs(u64::from(days) * SECONDS_PER_DAY))
}

impl<S: KvStore> ResultStorage for KvBackend<S> {
    fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    #[instrument(
        name = "searchkeep.kv.save",
        skip(self, payload),
        fields(backend = self.store.name())
    )]
    fn save_at(&self, query: &str, payload: &Value, now: DateTime<Utc>) -> Result<Identifier> {
        let result = self.claim(Record::new(query, payload.clone(), now));

        if let Ok(id) = &result {
            info!(identifier = %id, key = %self.result_key(id), "Results saved");
        }
        record_outcome(self.backend_name(), "save", &result);
        result
    }

    fn import(&self, record: &Record) -> Result<ImportOutcome> {
        let result = if self.insert(record)? {
            Ok(ImportOutcome::Imported)
        } else {
            match self.load(&record.identifier)? {
                Some(existing) if existing.same_content(record) => {
                    Ok(ImportOutcome::AlreadyPresent)
                },
                // Expired between the insert attempt and the read.
                None if self.insert(record)? => Ok(ImportOutcome::Imported),
                _ => Err(Error::DuplicateIdentifier(record.identifier.to_string())),
            }
        };
        record_outcome(self.backend_name(), "import", &result);
        result
    }

    fn get(&self, identifier: &Identifier) -> Result<Option<Record>> {
        let result = self.load(identifier);
        record_outcome(self.backend_name(), "get", &result);
        result
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<RecordSummary>> {
        let result = self.list_live(limit, offset);
        record_outcome(self.backend_name(), "list", &result);
        result
    }

    fn list_by_query(&self, query: &str) -> Result<Vec<RecordSummary>> {
        let result = self
            .store
            .range_by_score(&self.query_index_key(&slugify(query)), None)
            .and_then(|members| {
                let ids: Vec<Identifier> = members
                    .into_iter()
                    .filter_map(|(member, _)| Identifier::parse(&member).ok())
                    .collect();
                self.load_many(&ids)
            })
            .map(|records| {
                let mut summaries: Vec<RecordSummary> = records
                    .into_iter()
                    .filter(|record| record.query == query)
                    .map(RecordSummary::from)
                    .collect();
                sort_by_recency(&mut summaries);
                summaries
            });
        record_outcome(self.backend_name(), "list_by_query", &result);
        result
    }

    fn delete(&self, identifier: &Identifier) -> Result<bool> {
        let result = self
            .store
            .apply(&self.remove_batch(identifier))
            .map(|outcome| matches!(outcome, BatchOutcome::Applied { removed } if removed > 0));
        record_outcome(self.backend_name(), "delete", &result);
        result
    }

    #[instrument(
        name = "searchkeep.kv.cleanup",
        skip(self),
        fields(backend = self.store.name(), max_age_days = max_age.num_days())
    )]
    fn cleanup_at(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize> {
        let Some(cutoff) = retention_cutoff(now, max_age) else {
            debug!("Retention reaches past the earliest timestamp, nothing to clean up");
            return Ok(0);
        };
        // Scores are whole seconds; round up so the partial second before the
        // cutoff is scanned, then `is_older_than` decides.
        let ceiling = cutoff.timestamp() + i64::from(cutoff.timestamp_subsec_nanos() > 0);
        #[allow(clippy::cast_precision_loss)]
        let cutoff_score = ceiling as f64;
        debug!(cutoff = %cutoff, "Cleaning up indexed results");

        let candidates = self
            .store
            .range_by_score(&self.global_index_key(), Some(cutoff_score))?;

        let mut removed = 0;
        let mut dangling = 0;
        for (member, _) in candidates {
            let Ok(id) = Identifier::parse(&member) else {
                self.store
                    .apply(&WriteBatch::new().zrem(self.global_index_key(), member))?;
                continue;
            };

            match self.load(&id) {
                Ok(Some(record)) if record.is_older_than(cutoff) => {
                    match self.store.apply(&self.remove_batch(&id))? {
                        BatchOutcome::Applied { removed: n } if n > 0 => {
                            removed += 1;
                            debug!(identifier = %id, "Deleted old result");
                        },
                        _ => {},
                    }
                },
                Ok(Some(_)) => {},
                Ok(None) => {
                    self.store.apply(&self.unindex_batch(&id))?;
                    dangling += 1;
                },
                Err(e) => {
                    warn!(identifier = %id, error = %e, "Skipping unreadable record during cleanup");
                },
            }
        }

        if removed > 0 || dangling > 0 {
            info!(removed, dangling, "Cleaned up old results");
        }
        metrics::counter!("searchkeep_records_evicted_total", "backend" => self.store.name())
            .increment(removed as u64);

        Ok(removed)
    }

    fn reconcile(&self) -> Result<usize> {
        let ids: Vec<Identifier> = self
            .store
            .range_by_score(&self.global_index_key(), None)?
            .into_iter()
            .filter_map(|(member, _)| Identifier::parse(&member).ok())
            .collect();

        let mut repaired = 0;
        for chunk in ids.chunks(FETCH_CHUNK) {
            let live = self.store.exists_many(&self.result_keys(chunk))?;

            for (id, live) in chunk.iter().zip(live) {
                if !live {
                    self.store.apply(&self.unindex_batch(id))?;
                    debug!(identifier = %id, "Removed dangling index entries");
                    repaired += 1;
                }
            }
        }

        if repaired > 0 {
            info!(repaired, "Reconciled index entries");
        }
        Ok(repaired)
    }

    fn count(&self) -> Result<usize> {
        let ids = self.ordered_index()?;
        let mut live = 0;
        for chunk in ids.chunks(FETCH_CHUNK) {
            live += self
                .store
                .exists_many(&self.result_keys(chunk))?
                .into_iter()
                .filter(|live| *live)
                .count();
        }
        Ok(live)
    }

    fn exists(&self, identifier: &Identifier) -> Result<bool> {
        self.store.exists(&self.result_key(identifier))
    }
}
