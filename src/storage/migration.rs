//! Copying records between backends.
//!
//! Records keep their identifiers, so a second run over the same pair finds
//! everything already present and writes nothing.

use super::{ImportOutcome, ResultStorage};
use crate::Result;
use crate::models::Identifier;
use tracing::{debug, info, warn};

/// Default number of records listed per page.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Options for migration.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Records listed from the source per page.
    pub batch_size: usize,
    /// If true, report what would be copied without writing.
    pub dry_run: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationOptions {
    /// Creates options with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
        }
    }

    /// Sets the `dry_run` option.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets the page size; 0 is treated as 1.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = if batch_size == 0 { 1 } else { batch_size };
        self
    }
}

/// A record that could not be copied.
#[derive(Debug)]
pub struct MigrationFailure {
    /// Identifier of the record.
    pub identifier: Identifier,
    /// Why it failed.
    pub error: crate::Error,
}

/// Outcome of a migration run.
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Records written to the destination (or that would be, in a dry run).
    pub migrated: usize,
    /// Records already present in the destination.
    pub skipped: usize,
    /// Records that failed; the run continued past them.
    pub failed: Vec<MigrationFailure>,
}

impl MigrationReport {
    /// Total records examined.
    #[must_use]
    pub fn total(&self) -> usize {
        self.migrated + self.skipped + self.failed.len()
    }

    /// Returns true when no record failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Copies every record from `source` into `destination`.
///
/// # Arguments
///
/// * `source` - Backend to read from; never modified
/// * `destination` - Backend to write into
/// * `options` - Page size and dry-run flag
///
/// # Returns
///
/// Counts of migrated and skipped records plus per-record failures.
///
/// # Errors
///
/// Returns an error only if the source cannot be listed. Failures on
/// individual records are collected in the report.
pub fn migrate(
    source: &dyn ResultStorage,
    destination: &dyn ResultStorage,
    options: &MigrationOptions,
) -> Result<MigrationReport> {
    let batch_size = options.batch_size.max(1);
    let mut report = MigrationReport::default();
    let mut offset = 0;

    info!(
        from = source.backend_name(),
        to = destination.backend_name(),
        dry_run = options.dry_run,
        "Starting migration"
    );

    loop {
        let page = source.list(batch_size, offset)?;
        if page.is_empty() {
            break;
        }
        offset += page.len();

        for summary in page {
            let identifier = summary.identifier;
            match migrate_single(source, destination, &identifier, options.dry_run) {
                Ok(Some(ImportOutcome::Imported)) => report.migrated += 1,
                Ok(Some(ImportOutcome::AlreadyPresent)) => report.skipped += 1,
                // Removed from the source after it was listed.
                Ok(None) => debug!(identifier = %identifier, "Record vanished from source"),
                Err(error) => {
                    warn!(identifier = %identifier, error = %error, "Failed to migrate record");
                    report.failed.push(MigrationFailure { identifier, error });
                },
            }
        }
    }

    metrics::counter!("searchkeep_records_migrated_total", "dry_run" => options.dry_run.to_string())
        .increment(report.migrated as u64);
    info!(
        migrated = report.migrated,
        skipped = report.skipped,
        failed = report.failed.len(),
        "Migration finished"
    );

    Ok(report)
}

fn migrate_single(
    source: &dyn ResultStorage,
    destination: &dyn ResultStorage,
    identifier: &Identifier,
    dry_run: bool,
) -> Result<Option<ImportOutcome>> {
    let Some(record) = source.get(identifier)? else {
        return Ok(None);
    };

    if dry_run {
        let outcome = match destination.get(identifier)? {
            Some(existing) if existing.same_content(&record) => ImportOutcome::AlreadyPresent,
            Some(_) => {
                return Err(crate::Error::DuplicateIdentifier(identifier.to_string()));
            },
            None => ImportOutcome::Imported,
        };
        return Ok(Some(outcome));
    }

    destination.import(&record).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileBackend, KvBackend};
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn at(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
    }

    fn seed(backend: &dyn ResultStorage, n: i64) {
        for i in 0..n {
            let now = at("2024-01-01T00:00:00Z") + Duration::seconds(i);
            backend.save_at(&format!("query {i}"), &json!({"i": i}), now).unwrap();
        }
    }

    #[test]
    fn test_migrate_preserves_identifiers() {
        let dir = TempDir::new().unwrap();
        let source = FileBackend::new(dir.path()).unwrap();
        let destination = KvBackend::in_memory();
        seed(&source, 5);

        let report = migrate(
            &source,
            &destination,
            &MigrationOptions::new().with_batch_size(2),
        )
        .unwrap();

        assert_eq!(report.migrated, 5);
        assert_eq!(report.skipped, 0);
        assert!(report.is_clean());

        for summary in source.list(10, 0).unwrap() {
            let copied = destination.get(&summary.identifier).unwrap().unwrap();
            let original = source.get(&summary.identifier).unwrap().unwrap();
            assert_eq!(copied, original);
        }
    }

    #[test]
    fn test_migrate_twice_is_idempotent() {
        let source = KvBackend::in_memory();
        let destination = KvBackend::in_memory();
        seed(&source, 3);

        let first = migrate(&source, &destination, &MigrationOptions::new()).unwrap();
        let second = migrate(&source, &destination, &MigrationOptions::new()).unwrap();

        assert_eq!(first.migrated, 3);
        assert_eq!(second.migrated, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(destination.count().unwrap(), 3);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let source = KvBackend::in_memory();
        let destination = KvBackend::in_memory();
        seed(&source, 4);

        let report = migrate(
            &source,
            &destination,
            &MigrationOptions::new().with_dry_run(true),
        )
        .unwrap();

        assert_eq!(report.migrated, 4);
        assert_eq!(destination.count().unwrap(), 0);
    }

    #[test]
    fn test_conflicting_record_is_reported_and_run_continues() {
        let source = KvBackend::in_memory();
        let destination = KvBackend::in_memory();
        seed(&source, 3);

        // Same identifier, different payload.
        destination
            .save_at("query 1", &json!({"other": true}), at("2024-01-01T00:00:01Z"))
            .unwrap();

        let report = migrate(&source, &destination, &MigrationOptions::new()).unwrap();
        assert_eq!(report.migrated, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            report.failed[0].identifier.as_str(),
            "20240101-000001_query-1"
        );
        assert_eq!(report.total(), 3);
    }
}
