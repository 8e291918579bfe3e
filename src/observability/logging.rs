//! Structured logging configuration.

use crate::{Error, Result};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, checked before `RUST_LOG`.
pub const LOG_FILTER_ENV: &str = "SEARCHKEEP_LOG";

/// Environment variable selecting the log format.
pub const LOG_FORMAT_ENV: &str = "SEARCHKEEP_LOG_FORMAT";

/// Environment variable naming a log file.
pub const LOG_FILE_ENV: &str = "SEARCHKEEP_LOG_FILE";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidInput(format!(
                "unknown log format '{other}' (expected pretty or json)"
            ))),
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Line format.
    pub format: LogFormat,
    /// Level filter.
    pub filter: EnvFilter,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds the configuration from the environment.
    ///
    /// The filter comes from `SEARCHKEEP_LOG`, then `RUST_LOG`, then
    /// `debug` when `verbose` is set or `info` otherwise. An explicit
    /// `format` wins over `SEARCHKEEP_LOG_FORMAT`.
    #[must_use]
    pub fn from_env(verbose: bool, format: Option<LogFormat>) -> Self {
        Self::from_lookup(verbose, format, |name| std::env::var(name).ok())
    }

    fn from_lookup(
        verbose: bool,
        format: Option<LogFormat>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let default_level = if verbose { "debug" } else { "info" };
        let directives = lookup(LOG_FILTER_ENV)
            .or_else(|| lookup("RUST_LOG"))
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| default_level.to_string());
        let filter =
            EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(default_level));

        let format = format
            .or_else(|| lookup(LOG_FORMAT_ENV).and_then(|f| f.parse().ok()))
            .unwrap_or_default();
        let file = lookup(LOG_FILE_ENV)
            .filter(|f| !f.is_empty())
            .map(PathBuf::from);

        Self {
            format,
            filter,
            file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_from_lookup_prefers_own_variables() {
        let config = LoggingConfig::from_lookup(false, None, |name| match name {
            LOG_FILTER_ENV => Some("searchkeep=trace".to_string()),
            "RUST_LOG" => Some("warn".to_string()),
            LOG_FORMAT_ENV => Some("json".to_string()),
            LOG_FILE_ENV => Some("/tmp/searchkeep.log".to_string()),
            _ => None,
        });

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter.to_string(), "searchkeep=trace");
        assert_eq!(config.file, Some(PathBuf::from("/tmp/searchkeep.log")));
    }

    #[test]
    fn test_explicit_format_and_verbose_default() {
        let config = LoggingConfig::from_lookup(true, Some(LogFormat::Pretty), |name| {
            (name == LOG_FORMAT_ENV).then(|| "json".to_string())
        });

        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.filter.to_string(), "debug");
        assert!(config.file.is_none());
    }
}
