//! Configuration management.
//!
//! Settings come from a TOML file (an explicit path or the platform config
//! directory), then environment variables override individual fields.
//!
//! ```toml
//! backend = "kv"
//! directory = "search_results"
//! ttl_days = 14
//! retention_days = 14
//!
//! [redis]
//! host = "localhost"
//! port = 16379
//! db = 0
//! prefix = "web-search:"
//! ssl = false
//! ```

use crate::storage::{DEFAULT_PREFIX, DEFAULT_TTL_DAYS};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default Redis port outside containers.
pub const DEFAULT_REDIS_PORT: u16 = 16379;

/// Redis port used when `IN_DOCKER` is set.
pub const DOCKER_REDIS_PORT: u16 = 6379;

/// Default results directory for the file backend.
pub const DEFAULT_DIRECTORY: &str = "search_results";

/// Default age, in days, past which `cleanup` removes records.
pub const DEFAULT_RETENTION_DAYS: u32 = 14;

/// Default page size for listings.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Which storage backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Directory of JSON files.
    #[default]
    File,
    /// Redis, falling back to memory when unreachable.
    Kv,
    /// In-process only.
    Memory,
}

impl BackendKind {
    /// Returns the configuration name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Kv => "kv",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" | "files" | "filesystem" => Ok(Self::File),
            "kv" | "redis" => Ok(Self::Kv),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(Error::InvalidInput(format!(
                "unknown backend '{other}' (expected file, kv, or memory)"
            ))),
        }
    }
}

/// Redis connection settings.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Optional password.
    pub password: Option<SecretString>,
    /// Database number.
    pub db: u32,
    /// Key prefix for every key the backend writes.
    pub prefix: String,
    /// Connect over TLS.
    pub ssl: bool,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_REDIS_PORT,
            password: None,
            db: 0,
            prefix: DEFAULT_PREFIX.to_string(),
            ssl: false,
        }
    }
}

impl RedisSettings {
    /// Builds the connection URL, including the password if set.
    ///
    /// The result carries the secret and must not be logged; use
    /// [`RedisSettings::address`] for diagnostics.
    #[must_use]
    pub fn connection_url(&self) -> String {
        let scheme = if self.ssl { "rediss" } else { "redis" };
        let auth = self.password.as_ref().map_or_else(String::new, |p| {
            format!(":{}@", urlencoding::encode(p.expose_secret()))
        });
        format!("{scheme}://{auth}{}:{}/{}", self.host, self.port, self.db)
    }

    /// Returns `host:port/db` without credentials.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Selected backend.
    pub backend: BackendKind,
    /// Results directory for the file backend.
    pub directory: PathBuf,
    /// Redis settings for the KV backend.
    pub redis: RedisSettings,
    /// Record TTL in days for the KV backend; 0 disables expiry.
    pub ttl_days: u32,
    /// Age in days past which `cleanup` removes records.
    pub retention_days: u32,
    /// Default page size for listings.
    pub page_size: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            redis: RedisSettings::default(),
            ttl_days: DEFAULT_TTL_DAYS,
            retention_days: DEFAULT_RETENTION_DAYS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Backend kind.
    pub backend: Option<String>,
    /// Results directory.
    pub directory: Option<String>,
    /// Record TTL in days.
    pub ttl_days: Option<u32>,
    /// Retention in days.
    pub retention_days: Option<u32>,
    /// Listing page size.
    pub page_size: Option<usize>,
    /// Redis section.
    pub redis: Option<ConfigFileRedis>,
}

/// Redis section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileRedis {
    /// Host.
    pub host: Option<String>,
    /// Port.
    pub port: Option<u16>,
    /// Password.
    pub password: Option<String>,
    /// Database number.
    pub db: Option<u32>,
    /// Key prefix.
    pub prefix: Option<String>,
    /// TLS.
    pub ssl: Option<bool>,
}

impl StorageSettings {
    /// Creates settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        Self::from_config_file(file)
    }

    /// Loads settings from the default location.
    ///
    /// Checks the platform config dir, then `~/.config/searchkeep/`. Returns
    /// defaults if no readable config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        Self::default_config_paths()
            .into_iter()
            .filter(|path| path.exists())
            .find_map(|path| match Self::load_from_file(&path) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                    None
                },
            })
            .unwrap_or_default()
    }

    /// Loads settings from `path` (or the default location) and applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file cannot be loaded or an
    /// environment variable holds an invalid value.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default(),
        };
        settings.with_env_overrides()
    }

    /// Candidate config file locations, in priority order.
    fn default_config_paths() -> Vec<PathBuf> {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Vec::new();
        };

        vec![
            base_dirs.config_dir().join("searchkeep").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("searchkeep")
                .join("config.toml"),
        ]
    }

    /// Converts a `ConfigFile` to `StorageSettings`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(backend) = file.backend {
            settings.backend = backend.parse()?;
        }
        if let Some(directory) = file.directory {
            settings.directory = PathBuf::from(directory);
        }
        if let Some(ttl_days) = file.ttl_days {
            settings.ttl_days = ttl_days;
        }
        if let Some(retention_days) = file.retention_days {
            settings.retention_days = retention_days;
        }
        if let Some(page_size) = file.page_size {
            settings.page_size = page_size;
        }
        if let Some(redis) = file.redis {
            if let Some(host) = redis.host {
                settings.redis.host = host;
            }
            if let Some(port) = redis.port {
                settings.redis.port = port;
            }
            if let Some(db) = redis.db {
                settings.redis.db = db;
            }
            if let Some(prefix) = redis.prefix {
                settings.redis.prefix = prefix;
            }
            if let Some(ssl) = redis.ssl {
                settings.redis.ssl = ssl;
            }
            if let Some(password) = redis.password.filter(|p| !p.is_empty()) {
                settings.redis.password = Some(SecretString::from(password));
            }
        }

        Ok(settings)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `SEARCHKEEP_BACKEND` | `backend` |
    /// | `SEARCHKEEP_DIR` | `directory` |
    /// | `SEARCHKEEP_PREFIX` | `redis.prefix` |
    /// | `SEARCHKEEP_TTL_DAYS` | `ttl_days` |
    /// | `SEARCHKEEP_RETENTION_DAYS` | `retention_days` |
    /// | `REDIS_HOST` / `REDIS_PORT` / `REDIS_PASSWORD` / `REDIS_DB` | `redis.*` |
    /// | `IN_DOCKER` | `redis.port` = 6379 unless `REDIS_PORT` is set |
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(backend) = lookup("SEARCHKEEP_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(dir) = lookup("SEARCHKEEP_DIR") {
            self.directory = PathBuf::from(dir);
        }
        if let Some(prefix) = lookup("SEARCHKEEP_PREFIX") {
            self.redis.prefix = prefix;
        }
        if let Some(days) = lookup("SEARCHKEEP_TTL_DAYS") {
            self.ttl_days = parse_var("SEARCHKEEP_TTL_DAYS", &days)?;
        }
        if let Some(days) = lookup("SEARCHKEEP_RETENTION_DAYS") {
            self.retention_days = parse_var("SEARCHKEEP_RETENTION_DAYS", &days)?;
        }
        if let Some(host) = lookup("REDIS_HOST") {
            self.redis.host = host;
        }
        if let Some(port) = lookup("REDIS_PORT") {
            self.redis.port = parse_var("REDIS_PORT", &port)?;
        } else if lookup("IN_DOCKER").is_some_and(|v| is_truthy(&v)) {
            self.redis.port = DOCKER_REDIS_PORT;
        }
        if let Some(password) = lookup("REDIS_PASSWORD").filter(|p| !p.is_empty()) {
            self.redis.password = Some(SecretString::from(password));
        }
        if let Some(db) = lookup("REDIS_DB") {
            self.redis.db = parse_var("REDIS_DB", &db)?;
        }

        Ok(self)
    }

    /// Sets the backend kind.
    #[must_use]
    pub const fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the results directory.
    #[must_use]
    pub fn with_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.directory = path.into();
        self
    }

    /// Returns the retention window for `cleanup`.
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::InvalidInput(format!("{name}={value}: {e}")))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use test_case::test_case;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = StorageSettings::default();
        assert_eq!(settings.backend, BackendKind::File);
        assert_eq!(settings.directory, PathBuf::from("search_results"));
        assert_eq!(settings.redis.host, "localhost");
        assert_eq!(settings.redis.port, 16379);
        assert_eq!(settings.redis.prefix, "web-search:");
        assert_eq!(settings.ttl_days, 14);
        assert_eq!(settings.retention_days, 14);
    }

    #[test_case("file", BackendKind::File ; "file")]
    #[test_case("KV", BackendKind::Kv ; "kv upper")]
    #[test_case("redis", BackendKind::Kv ; "redis alias")]
    #[test_case(" memory ", BackendKind::Memory ; "memory padded")]
    fn test_backend_kind_parse(input: &str, expected: BackendKind) {
        assert_eq!(input.parse::<BackendKind>().unwrap(), expected);
    }

    #[test]
    fn test_backend_kind_rejects_unknown() {
        assert!(matches!(
            "sqlite".parse::<BackendKind>(),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
backend = "kv"
directory = "/tmp/results"
ttl_days = 0

[redis]
host = "cache.internal"
port = 6380
password = "s3cret"
prefix = "test:"
"#,
        )
        .unwrap();

        let settings = StorageSettings::load_from_file(&path).unwrap();
        assert_eq!(settings.backend, BackendKind::Kv);
        assert_eq!(settings.directory, PathBuf::from("/tmp/results"));
        assert_eq!(settings.ttl_days, 0);
        assert_eq!(settings.retention_days, 14);
        assert_eq!(settings.redis.host, "cache.internal");
        assert_eq!(settings.redis.port, 6380);
        assert_eq!(settings.redis.prefix, "test:");
        assert_eq!(
            settings.redis.password.as_ref().map(|p| p.expose_secret().to_string()),
            Some("s3cret".to_string())
        );
    }

    #[test]
    fn test_load_from_file_rejects_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "bakend = \"kv\"\n").unwrap();

        assert!(StorageSettings::load_from_file(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let settings = StorageSettings::default()
            .with_overrides(env(&[
                ("SEARCHKEEP_BACKEND", "memory"),
                ("SEARCHKEEP_DIR", "out"),
                ("SEARCHKEEP_TTL_DAYS", "3"),
                ("REDIS_HOST", "redis"),
                ("REDIS_PASSWORD", "pw"),
                ("REDIS_DB", "2"),
            ]))
            .unwrap();

        assert_eq!(settings.backend, BackendKind::Memory);
        assert_eq!(settings.directory, PathBuf::from("out"));
        assert_eq!(settings.ttl_days, 3);
        assert_eq!(settings.redis.host, "redis");
        assert_eq!(settings.redis.db, 2);
        assert!(settings.redis.password.is_some());
    }

    #[test]
    fn test_in_docker_switches_port() {
        let docker = StorageSettings::default()
            .with_overrides(env(&[("IN_DOCKER", "true")]))
            .unwrap();
        assert_eq!(docker.redis.port, 6379);

        let explicit = StorageSettings::default()
            .with_overrides(env(&[("IN_DOCKER", "1"), ("REDIS_PORT", "7000")]))
            .unwrap();
        assert_eq!(explicit.redis.port, 7000);
    }

    #[test]
    fn test_invalid_env_value() {
        let result = StorageSettings::default().with_overrides(env(&[("REDIS_PORT", "abc")]));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_connection_url_encodes_password() {
        let redis = RedisSettings {
            password: Some(SecretString::from("p@ss/word".to_string())),
            db: 3,
            ..RedisSettings::default()
        };
        assert_eq!(
            redis.connection_url(),
            "redis://:p%40ss%2Fword@localhost:16379/3"
        );
        assert_eq!(redis.address(), "localhost:16379/3");

        let tls = RedisSettings {
            ssl: true,
            ..RedisSettings::default()
        };
        assert_eq!(tls.connection_url(), "rediss://localhost:16379/0");
    }
}
