//! Data models for searchkeep.
//!
//! Identifiers and the record envelope shared by every storage backend.

mod identifier;
mod record;

pub use identifier::{
    Identifier, MAX_DISAMBIGUATION_ATTEMPTS, MAX_SLUG_LEN, SLUG_PLACEHOLDER, slugify,
};
pub use record::{Record, RecordSummary, paginate, retention_cutoff, sort_by_recency};
