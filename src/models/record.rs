//! The stored record envelope.

use super::Identifier;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A persisted search result.
///
/// Serialized as `{"id", "query", "timestamp", "results"}`. The payload is
/// opaque to storage and round-trips structurally unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier within a backend.
    #[serde(rename = "id")]
    pub identifier: Identifier,
    /// The query text exactly as searched.
    pub query: String,
    /// Creation time, whole seconds, UTC.
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// The search provider's response.
    #[serde(rename = "results")]
    pub payload: Value,
}

impl Record {
    /// Creates a record for a search performed at `now`.
    ///
    /// `now` is truncated to whole seconds so the timestamp agrees with the
    /// identifier and with index scores.
    #[must_use]
    pub fn new(query: impl Into<String>, payload: Value, now: DateTime<Utc>) -> Self {
        let query = query.into();
        let created_at = now.trunc_subsecs(0);
        Self {
            identifier: Identifier::generate(&query, created_at),
            query,
            created_at,
            payload,
        }
    }

    /// Returns a copy of this record stored under `identifier`.
    #[must_use]
    pub fn with_identifier(mut self, identifier: Identifier) -> Self {
        self.identifier = identifier;
        self
    }

    /// Returns the listing view of this record.
    #[must_use]
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            identifier: self.identifier.clone(),
            query: self.query.clone(),
            created_at: self.created_at,
        }
    }

    /// Returns true when the record was created strictly before `cutoff`.
    #[must_use]
    pub fn is_older_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at < cutoff
    }

    /// Returns true when `other` carries the same query, time, and payload.
    ///
    /// The identifier is not compared; imports use this to recognize a
    /// record that was already copied.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.query == other.query
            && self.created_at == other.created_at
            && self.payload == other.payload
    }

    /// Returns the creation time as a sorted-set score.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self) -> f64 {
        self.created_at.timestamp() as f64
    }
}

/// Listing view of a record, without the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    /// Unique identifier within a backend.
    #[serde(rename = "id")]
    pub identifier: Identifier,
    /// The query text exactly as searched.
    pub query: String,
    /// Creation time, whole seconds, UTC.
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl From<&Record> for RecordSummary {
    fn from(record: &Record) -> Self {
        record.summary()
    }
}

impl From<Record> for RecordSummary {
    fn from(record: Record) -> Self {
        Self {
            identifier: record.identifier,
            query: record.query,
            created_at: record.created_at,
        }
    }
}

fn recency(a: &RecordSummary, b: &RecordSummary) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.identifier.cmp(&b.identifier))
}

/// Sorts summaries most recent first, ties by identifier in lexical order.
pub fn sort_by_recency(summaries: &mut [RecordSummary]) {
    summaries.sort_by(recency);
}

/// Returns the instant `max_age` before `now`.
///
/// `None` when that instant is out of range, in which case no record is old
/// enough to evict.
#[must_use]
pub fn retention_cutoff(now: DateTime<Utc>, max_age: Duration) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(max_age)
}

/// Applies `offset` and `limit` to an already ordered listing.
#[must_use]
pub fn paginate<T>(items: Vec<T>, limit: usize, offset: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}
