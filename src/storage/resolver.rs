//! Backend selection.

use super::{FileBackend, KvBackend, RedisStore, StorageBackend};
use crate::config::{BackendKind, StorageSettings};
use crate::{Error, Result};
use tracing::{info, warn};

/// A resolved backend.
#[derive(Debug)]
pub struct Resolved {
    /// The backend to use.
    pub backend: StorageBackend,
    /// True when the configured backend was unreachable and the in-memory
    /// substitute was returned instead. Nothing saved will outlive the
    /// process.
    pub degraded: bool,
}

/// Constructs the backend named by `settings`.
///
/// | Kind | Behaviour |
/// |------|-----------|
/// | `file` | [`FileBackend`] at `settings.directory`; errors are returned |
/// | `kv` | Redis; if unreachable, a single warning and the memory substitute |
/// | `memory` | In-process store |
///
/// # Errors
///
/// Returns an error if the file backend cannot create its directory, or if
/// the Redis settings are malformed.
pub fn resolve(settings: &StorageSettings) -> Result<Resolved> {
    match settings.backend {
        BackendKind::File => {
            let backend = FileBackend::new(&settings.directory)?;
            info!(path = %backend.base_path().display(), "Using file storage");
            Ok(Resolved {
                backend: StorageBackend::File(backend),
                degraded: false,
            })
        },
        BackendKind::Kv => match RedisStore::connect(&settings.redis.connection_url()) {
            Ok(store) => {
                info!(address = %settings.redis.address(), "Using redis storage");
                Ok(Resolved {
                    backend: StorageBackend::Kv(
                        KvBackend::new(store)
                            .with_prefix(settings.redis.prefix.clone())
                            .with_ttl_days(settings.ttl_days),
                    ),
                    degraded: false,
                })
            },
            Err(e @ (Error::BackendUnavailable { .. } | Error::FeatureNotEnabled(_))) => {
                warn!(
                    address = %settings.redis.address(),
                    error = %e,
                    "Redis unavailable, falling back to in-memory storage; results will not persist"
                );
                metrics::counter!("searchkeep_backend_fallbacks_total", "backend" => "kv")
                    .increment(1);
                Ok(Resolved {
                    backend: StorageBackend::Memory(memory_backend(settings)),
                    degraded: true,
                })
            },
            Err(e) => Err(e),
        },
        BackendKind::Memory => Ok(Resolved {
            backend: StorageBackend::Memory(memory_backend(settings)),
            degraded: false,
        }),
    }
}

fn memory_backend(settings: &StorageSettings) -> KvBackend<super::MemoryStore> {
    KvBackend::in_memory()
        .with_prefix(settings.redis.prefix.clone())
        .with_ttl_days(settings.ttl_days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ResultStorage;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_file() {
        let dir = TempDir::new().unwrap();
        let settings = StorageSettings::default()
            .with_backend(BackendKind::File)
            .with_directory(dir.path().join("results"));

        let resolved = resolve(&settings).unwrap();
        assert!(!resolved.degraded);
        assert_eq!(resolved.backend.backend_name(), "file");
        assert!(dir.path().join("results").is_dir());
    }

    #[test]
    fn test_resolve_file_error_is_hard() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let settings = StorageSettings::default()
            .with_backend(BackendKind::File)
            .with_directory(blocker.join("results"));

        assert!(resolve(&settings).is_err());
    }

    #[test]
    fn test_resolve_memory() {
        let settings = StorageSettings::default().with_backend(BackendKind::Memory);
        let resolved = resolve(&settings).unwrap();

        assert!(!resolved.degraded);
        assert!(resolved.backend.is_memory());
    }

    #[test]
    fn test_resolve_unreachable_kv_degrades() {
        let mut settings = StorageSettings::default().with_backend(BackendKind::Kv);
        settings.redis.host = "127.0.0.1".to_string();
        settings.redis.port = 1;

        let resolved = resolve(&settings).unwrap();
        assert!(resolved.degraded);
        assert!(resolved.backend.is_memory());
    }
}
