//! Filesystem-based result storage.
//!
//! Stores each record as a JSON file: `{base_path}/{identifier}.json`.
//!
//! There is no persisted index. A directory scan, parsing each file name back
//! into an [`Identifier`], provides both the global view (the timestamp
//! prefix orders it) and the per-query view (the slug segment groups it).
//!
//! # Atomic writes
//!
//! A record is written to a hidden temporary file in the same directory and
//! then published under its final name with a hard link, which fails instead
//! of overwriting when the name is taken. Readers and `cleanup` therefore
//! never see a partially written record, and two processes saving the same
//! query in the same second claim different identifiers.

use super::{ImportOutcome, ResultStorage, record_outcome};
use crate::models::{
    Identifier, Record, RecordSummary, paginate, retention_cutoff, slugify, sort_by_recency,
};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, instrument, warn};

/// Maximum size of a record file (16 MiB).
const MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Extension of published record files.
const RECORD_EXTENSION: &str = "json";

/// Extension of in-flight temporary files.
const TEMP_EXTENSION: &str = "tmp";

/// Temporary files older than this are considered abandoned by `reconcile`.
const STALE_TEMP_AGE: std::time::Duration = std::time::Duration::from_secs(60 * 60);

/// Filesystem-based result storage.
#[derive(Debug, Clone)]
pub struct FileBackend {
    /// Directory holding the record files.
    base_path: PathBuf,
}

impl FileBackend {
    /// Creates a file backend rooted at `base_path`, creating the directory
    /// if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the path is not
    /// a directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).map_err(|e| Error::OperationFailed {
            operation: "create_results_dir".to_string(),
            cause: format!("{}: {e}", base_path.display()),
        })?;

        if !base_path.is_dir() {
            return Err(Error::InvalidInput(format!(
                "results path is not a directory: {}",
                base_path.display()
            )));
        }

        Ok(Self { base_path })
    }

    /// Returns the default results directory.
    ///
    /// Returns `{data_dir}/searchkeep/results`.
    #[must_use]
    pub fn default_user_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|d| d.data_dir().join("searchkeep").join("results"))
    }

    /// Returns the base path.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Gets the file path for a record.
    fn record_path(&self, identifier: &Identifier) -> PathBuf {
        self.base_path.join(format!("{identifier}.{RECORD_EXTENSION}"))
    }

    /// Gets a fresh temporary path for a record.
    fn temp_path(&self, identifier: &Identifier) -> PathBuf {
        self.base_path.join(format!(
            ".{identifier}.{}.{TEMP_EXTENSION}",
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Reads the file for `identifier`. A file that vanished is `None`.
    ///
    /// A file whose embedded identifier differs from its name is an error.
    fn read_record_file(&self, identifier: &Identifier) -> Result<Option<Record>> {
        let path = self.record_path(identifier);
        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read_record_metadata", &path, &e)),
        };

        if metadata.len() > MAX_FILE_SIZE {
            return Err(Error::InvalidInput(format!(
                "record file exceeds maximum size of {MAX_FILE_SIZE} bytes: {}",
                path.display()
            )));
        }

        let content = match fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read_record_file", &path, &e)),
        };

        let record: Record =
            serde_json::from_slice(&content).map_err(|e| Error::OperationFailed {
                operation: "parse_record_json".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;

        if record.identifier != *identifier {
            return Err(Error::OperationFailed {
                operation: "read_record_file".to_string(),
                cause: format!(
                    "{} holds record {}, not {identifier}",
                    path.display(),
                    record.identifier
                ),
            });
        }

        Ok(Some(record))
    }

    /// Writes a record without ever exposing a partial file.
    ///
    /// Returns false, leaving the existing file untouched, when the record's
    /// identifier is already taken.
    fn publish(&self, record: &Record) -> Result<bool> {
        let content = serde_json::to_vec_pretty(record).map_err(|e| Error::OperationFailed {
            operation: "serialize_record".to_string(),
            cause: e.to_string(),
        })?;

        let temp = self.temp_path(&record.identifier);
        let target = self.record_path(&record.identifier);

        if let Err(e) = write_synced(&temp, &content) {
            let _ = fs::remove_file(&temp);
            return Err(io_error("write_temp_file", &temp, &e));
        }

        let published = match fs::hard_link(&temp, &target) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) if matches!(e.kind(), ErrorKind::Unsupported | ErrorKind::PermissionDenied) => {
                // No hard links on this filesystem; rename cannot refuse to
                // clobber, so check first and accept the narrow race.
                if target.exists() {
                    Ok(false)
                } else {
                    fs::rename(&temp, &target)
                        .map(|()| true)
                        .map_err(|e| io_error("publish_record_file", &target, &e))
                }
            },
            Err(e) => Err(io_error("publish_record_file", &target, &e)),
        };

        match fs::remove_file(&temp) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                warn!(path = %temp.display(), error = %e, "Failed to remove temporary file");
            },
            _ => {},
        }

        published
    }

    /// Stores `record` under its base identifier or the first free suffix.
    fn claim(&self, mut record: Record) -> Result<Identifier> {
        let base = record.identifier.clone();
        for candidate in base.candidates() {
            record.identifier = candidate;
            if self.publish(&record)? {
                return Ok(record.identifier);
            }
            debug!(identifier = %record.identifier, "Identifier taken, trying next suffix");
        }
        Err(Error::DuplicateIdentifier(base.to_string()))
    }

    /// Lists the identifiers of every published record.
    fn scan(&self) -> Result<Vec<Identifier>> {
        let entries = fs::read_dir(&self.base_path)
            .map_err(|e| io_error("read_results_dir", &self.base_path, &e))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error("read_dir_entry", &self.base_path, &e))?;
            if let Some(id) = extract_identifier_from_path(&entry.path()) {
                ids.push(id);
            }
        }

        Ok(ids)
    }

    /// Loads summaries for the given identifiers, skipping files that
    /// vanished or fail to parse.
    fn load_summaries(&self, ids: &[Identifier]) -> Vec<RecordSummary> {
        ids.iter()
            .filter_map(|id| match self.read_record_file(id) {
                Ok(Some(record)) => Some(RecordSummary::from(record)),
                Ok(None) => None,
                Err(e) => {
                    warn!(identifier = %id, error = %e, "Skipping unreadable record file");
                    None
                },
            })
            .collect()
    }
}

/// Writes `content` to a new file and flushes it to disk.
fn write_synced(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(content)?;
    file.sync_all()
}

fn io_error(operation: &str, path: &Path, e: &io::Error) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: format!("{}: {e}", path.display()),
    }
}

/// Extracts an identifier from a record file path.
fn extract_identifier_from_path(path: &Path) -> Option<Identifier> {
    if path.extension().is_none_or(|ext| ext != RECORD_EXTENSION) {
        return None;
    }

    let stem = path.file_stem()?.to_str()?;
    Identifier::parse(stem).ok()
}

/// Returns true for an abandoned temporary file.
fn is_stale_temp(path: &Path, now: SystemTime) -> bool {
    let is_temp = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
        && path.extension().is_some_and(|ext| ext == TEMP_EXTENSION);
    if !is_temp {
        return false;
    }

    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .is_some_and(|age| age > STALE_TEMP_AGE)
}

impl ResultStorage for FileBackend {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    #[instrument(name = "searchkeep.file.save", skip(self, payload))]
    fn save_at(&self, query: &str, payload: &Value, now: DateTime<Utc>) -> Result<Identifier> {
        let result = self.claim(Record::new(query, payload.clone(), now));

        if let Ok(id) = &result {
            info!(identifier = %id, path = %self.record_path(id).display(), "Results saved");
        }
        record_outcome(self.backend_name(), "save", &result);
        result
    }

    fn import(&self, record: &Record) -> Result<ImportOutcome> {
        let result = if self.publish(record)? {
            Ok(ImportOutcome::Imported)
        } else {
            match self.read_record_file(&record.identifier)? {
                Some(existing) if existing.same_content(record) => {
                    Ok(ImportOutcome::AlreadyPresent)
                },
                // Deleted between the publish attempt and the read.
                None if self.publish(record)? => Ok(ImportOutcome::Imported),
                _ => Err(Error::DuplicateIdentifier(record.identifier.to_string())),
            }
        };
        record_outcome(self.backend_name(), "import", &result);
        result
    }

    fn get(&self, identifier: &Identifier) -> Result<Option<Record>> {
        let result = self.read_record_file(identifier);
        record_outcome(self.backend_name(), "get", &result);
        result
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<RecordSummary>> {
        let result = self.scan().map(|mut ids| {
            // created_at equals the identifier's timestamp, so file names
            // alone order the listing; only the requested page is read.
            ids.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()).then_with(|| a.cmp(b)));
            let page = paginate(ids, limit, offset);

            let mut summaries = self.load_summaries(&page);
            sort_by_recency(&mut summaries);
            summaries
        });
        record_outcome(self.backend_name(), "list", &result);
        result
    }

    fn list_by_query(&self, query: &str) -> Result<Vec<RecordSummary>> {
        let slug = slugify(query);
        let result = self.scan().map(|ids| {
            let ids: Vec<Identifier> = ids.into_iter().filter(|id| id.slug() == slug).collect();
            let mut summaries: Vec<RecordSummary> = self
                .load_summaries(&ids)
                .into_iter()
                .filter(|s| s.query == query)
                .collect();
            sort_by_recency(&mut summaries);
            summaries
        });
        record_outcome(self.backend_name(), "list_by_query", &result);
        result
    }

    fn delete(&self, identifier: &Identifier) -> Result<bool> {
        let path = self.record_path(identifier);
        let result = match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error("delete_record_file", &path, &e)),
        };
        record_outcome(self.backend_name(), "delete", &result);
        result
    }

    #[instrument(
        name = "searchkeep.file.cleanup",
        skip(self),
        fields(max_age_days = max_age.num_days())
    )]
    fn cleanup_at(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize> {
        let Some(cutoff) = retention_cutoff(now, max_age) else {
            debug!("Retention reaches past the earliest timestamp, nothing to clean up");
            return Ok(0);
        };
        debug!(cutoff = %cutoff, "Cleaning up result files");

        let mut removed = 0;
        for id in self.scan()? {
            let path = self.record_path(&id);
            // The embedded timestamp decides, never the file's mtime.
            let record = match self.read_record_file(&id) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(identifier = %id, error = %e, "Skipping unreadable record during cleanup");
                    continue;
                },
            };

            if !record.is_older_than(cutoff) {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    debug!(identifier = %id, "Deleted old result file");
                },
                Err(e) if e.kind() == ErrorKind::NotFound => {},
                Err(e) => return Err(io_error("delete_record_file", &path, &e)),
            }
        }

        if removed > 0 {
            info!(removed, "Cleaned up old result file(s)");
        }
        metrics::counter!("searchkeep_records_evicted_total", "backend" => "file")
            .increment(removed as u64);

        Ok(removed)
    }

    fn reconcile(&self) -> Result<usize> {
        let entries = fs::read_dir(&self.base_path)
            .map_err(|e| io_error("read_results_dir", &self.base_path, &e))?;
        let now = SystemTime::now();

        let mut repaired = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if is_stale_temp(&path, now) && fs::remove_file(&path).is_ok() {
                debug!(path = %path.display(), "Removed abandoned temporary file");
                repaired += 1;
            }
        }

        Ok(repaired)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.scan()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn at(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
    }

    fn backend() -> (TempDir, FileBackend) {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");

        let backend = FileBackend::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(backend.base_path(), nested);
    }

    #[test]
    fn test_rejects_file_as_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();

        assert!(FileBackend::new(&file).is_err());
    }

    #[test]
    fn test_save_writes_envelope() {
        let (dir, backend) = backend();
        let id = backend
            .save_at("rust ownership", &json!({"n": 1}), at("2024-01-01T00:00:00Z"))
            .unwrap();

        let path = dir.path().join("20240101-000000_rust-ownership.json");
        assert_eq!(id.as_str(), "20240101-000000_rust-ownership");
        assert!(path.exists());

        let on_disk: Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert_eq!(on_disk["query"], "rust ownership");
        assert_eq!(on_disk["timestamp"], "2024-01-01T00:00:00Z");
        assert_eq!(on_disk["results"], json!({"n": 1}));
    }

    #[test]
    fn test_same_second_collision_gets_suffix() {
        let (_dir, backend) = backend();
        let now = at("2024-01-01T00:00:00Z");

        let first = backend.save_at("q", &json!(1), now).unwrap();
        let second = backend.save_at("q", &json!(2), now).unwrap();

        assert_eq!(first.as_str(), "20240101-000000_q");
        assert_eq!(second.as_str(), "20240101-000000_q_2");
        assert_eq!(backend.get(&first).unwrap().unwrap().payload, json!(1));
        assert_eq!(backend.get(&second).unwrap().unwrap().payload, json!(2));
    }

    #[test]
    fn test_renamed_file_is_not_served_under_new_name() {
        let (dir, backend) = backend();
        let id = backend
            .save_at("q", &json!(1), at("2024-01-01T00:00:00Z"))
            .unwrap();

        let copy = Identifier::parse("20240101-000001_other").unwrap();
        fs::copy(
            dir.path().join(format!("{id}.json")),
            dir.path().join(format!("{copy}.json")),
        )
        .unwrap();

        assert!(backend.get(&copy).is_err());
        assert_eq!(backend.get(&id).unwrap().unwrap().identifier, id);

        let listed = backend.list(10, 0).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].identifier, id);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let (dir, backend) = backend();
        backend.save("q", &json!(null)).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.path().extension().is_some_and(|x| x == TEMP_EXTENSION))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_scan_ignores_foreign_files() {
        let (dir, backend) = backend();
        backend.save("q", &json!(null)).unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("not-an-id.json"), b"{}").unwrap();
        fs::write(dir.path().join(".20240101-000000_q.abc.tmp"), b"{").unwrap();

        assert_eq!(backend.count().unwrap(), 1);
        assert_eq!(backend.list(10, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_list_skips_corrupt_file() {
        let (dir, backend) = backend();
        backend.save_at("good", &json!(1), at("2024-01-01T00:00:00Z")).unwrap();
        fs::write(dir.path().join("20240102-000000_bad.json"), b"{ not json").unwrap();

        let listed = backend.list(10, 0).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].query, "good");
    }

    #[test]
    fn test_cleanup_uses_embedded_timestamp_not_mtime() {
        let (_dir, backend) = backend();
        // Written just now, but created two days before `now`.
        let old = backend
            .save_at("old", &json!(1), at("2024-01-01T00:00:00Z"))
            .unwrap();
        let fresh = backend
            .save_at("fresh", &json!(2), at("2024-01-02T12:00:00Z"))
            .unwrap();

        let removed = backend
            .cleanup_at(Duration::days(1), at("2024-01-03T00:00:00Z"))
            .unwrap();

        assert_eq!(removed, 1);
        assert!(backend.get(&old).unwrap().is_none());
        assert!(backend.get(&fresh).unwrap().is_some());
    }

    #[test]
    fn test_import_is_idempotent() {
        let (_dir, backend) = backend();
        let record = Record::new("q", json!({"a": 1}), at("2024-01-01T00:00:00Z"));

        assert_eq!(backend.import(&record).unwrap(), ImportOutcome::Imported);
        assert_eq!(backend.import(&record).unwrap(), ImportOutcome::AlreadyPresent);

        let conflicting = Record::new("q", json!({"a": 2}), at("2024-01-01T00:00:00Z"));
        assert!(matches!(
            backend.import(&conflicting),
            Err(Error::DuplicateIdentifier(_))
        ));
    }

    #[test]
    fn test_reconcile_removes_only_stale_temp_files() {
        let (dir, backend) = backend();
        let fresh_temp = dir.path().join(".20240101-000000_q.fresh.tmp");
        fs::write(&fresh_temp, b"{").unwrap();

        assert_eq!(backend.reconcile().unwrap(), 0);
        assert!(fresh_temp.exists());

        let later = SystemTime::now() + STALE_TEMP_AGE + std::time::Duration::from_secs(60);
        assert!(is_stale_temp(&fresh_temp, later));
        assert!(!is_stale_temp(&dir.path().join("20240101-000000_q.json"), later));
    }

    #[test]
    fn test_extract_identifier_from_path() {
        let ok = extract_identifier_from_path(Path::new("/x/20240101-000000_q_3.json"));
        assert_eq!(ok.unwrap().as_str(), "20240101-000000_q_3");

        assert!(extract_identifier_from_path(Path::new("/x/20240101-000000_q.txt")).is_none());
        assert!(extract_identifier_from_path(Path::new("/x/../etc.json")).is_none());
    }
}
