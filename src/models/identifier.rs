//! Record identifiers.
//!
//! An identifier is `<YYYYMMDD-HHMMSS>_<slug>` in UTC, optionally followed by
//! `_<n>` when several searches for the same query land in the same second.
//! Slugs only contain `[a-z0-9-]`, so the suffix separator is unambiguous and
//! every identifier is a safe file name and Redis key segment.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Maximum slug length in characters.
pub const MAX_SLUG_LEN: usize = 60;

/// Slug used when a query normalizes to nothing (e.g. `"?!"`).
pub const SLUG_PLACEHOLDER: &str = "query";

/// Number of identifiers tried (base plus suffixes) before a save gives up.
pub const MAX_DISAMBIGUATION_ATTEMPTS: u32 = 100;

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const TIMESTAMP_LEN: usize = 15;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap_or_else(|_| unreachable!()));

static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{8}-\d{6})_([a-z0-9]+(?:-[a-z0-9]+)*)(?:_([1-9][0-9]*))?$")
        .unwrap_or_else(|_| unreachable!())
});

/// Converts query text into a key-safe slug.
///
/// Lower-cases, collapses every run of non-alphanumeric characters into a
/// single `-`, trims separators from both ends, and truncates to
/// [`MAX_SLUG_LEN`]. Returns [`SLUG_PLACEHOLDER`] when nothing is left.
#[must_use]
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let replaced = NON_ALPHANUMERIC.replace_all(&lowered, "-");
    let trimmed = replaced.trim_matches('-');

    // Only ASCII survives the replacement, so byte slicing is char-safe.
    let truncated = &trimmed[..trimmed.len().min(MAX_SLUG_LEN)];
    let slug = truncated.trim_end_matches('-');

    if slug.is_empty() {
        SLUG_PLACEHOLDER.to_string()
    } else {
        slug.to_string()
    }
}

/// Unique, sortable identifier for a stored search result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Derives the base identifier for a query searched at `now`.
    ///
    /// Pure: the same query in the same second always yields the same
    /// identifier; backends append a suffix on collision.
    #[must_use]
    pub fn generate(query: &str, now: DateTime<Utc>) -> Self {
        Self(format!(
            "{}_{}",
            now.format(TIMESTAMP_FORMAT),
            slugify(query)
        ))
    }

    /// Parses and validates an identifier supplied from outside the crate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] if the text is not a well-formed
    /// identifier.
    pub fn parse(text: &str) -> Result<Self> {
        let caps = IDENTIFIER_PATTERN
            .captures(text)
            .ok_or_else(|| Error::InvalidIdentifier(text.to_string()))?;

        let valid_time = caps
            .get(1)
            .is_some_and(|m| parse_timestamp(m.as_str()).is_some());
        let valid_slug = caps.get(2).is_some_and(|m| m.len() <= MAX_SLUG_LEN);
        let valid_suffix = caps
            .get(3)
            .is_none_or(|m| m.as_str().parse::<u32>().is_ok_and(|n| n >= 2));

        if valid_time && valid_slug && valid_suffix {
            Ok(Self(text.to_string()))
        } else {
            Err(Error::InvalidIdentifier(text.to_string()))
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the creation second encoded in the identifier.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        parse_timestamp(&self.0[..TIMESTAMP_LEN]).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Returns the slug segment, which names the query index entry.
    #[must_use]
    pub fn slug(&self) -> &str {
        let rest = &self.0[TIMESTAMP_LEN + 1..];
        rest.split_once('_').map_or(rest, |(slug, _)| slug)
    }

    /// Returns the disambiguation suffix, if any.
    #[must_use]
    pub fn suffix(&self) -> Option<u32> {
        let rest = &self.0[TIMESTAMP_LEN + 1..];
        rest.split_once('_').and_then(|(_, n)| n.parse().ok())
    }

    /// Returns this identifier with the suffix `_<n>` (replacing any existing
    /// suffix). `n < 2` yields the bare base identifier.
    #[must_use]
    pub fn with_suffix(&self, n: u32) -> Self {
        let base = format!("{}_{}", &self.0[..TIMESTAMP_LEN], self.slug());
        if n < 2 {
            Self(base)
        } else {
            Self(format!("{base}_{n}"))
        }
    }

    /// Iterates over the identifiers a save may claim, in order: the base,
    /// then `_2`, `_3`, ... up to [`MAX_DISAMBIGUATION_ATTEMPTS`] in total.
    pub fn candidates(&self) -> impl Iterator<Item = Self> + '_ {
        (1..=MAX_DISAMBIGUATION_ATTEMPTS).map(|n| self.with_suffix(n))
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn at(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
    }

    #[test_case("Hello, World!", "hello-world" ; "punctuation")]
    #[test_case("This is a TEST", "this-is-a-test" ; "case")]
    #[test_case("Multiple   spaces", "multiple-spaces" ; "whitespace runs")]
    #[test_case("special@#$%^chars", "special-chars" ; "symbol runs")]
    #[test_case("  --leading and trailing--  ", "leading-and-trailing" ; "trimmed")]
    #[test_case("?!...", "query" ; "placeholder")]
    #[test_case("", "query" ; "empty")]
    #[test_case("café au lait", "caf-au-lait" ; "non ascii")]
    fn test_slugify(input: &str, expected: &str) {
        assert_eq!(slugify(input), expected);
    }

    #[test]
    fn test_slugify_truncates() {
        let long = format!("very{}long", "-".repeat(100));
        assert_eq!(slugify(&long), "very-long");

        let words = "word ".repeat(40);
        let slug = slugify(&words);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn test_generate_scenario() {
        let id = Identifier::generate("rust ownership", at("2024-01-01T00:00:00Z"));
        assert_eq!(id.as_str(), "20240101-000000_rust-ownership");
        assert_eq!(id.slug(), "rust-ownership");
        assert_eq!(id.suffix(), None);
        assert_eq!(id.timestamp(), at("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_generate_distinct_seconds() {
        let a = Identifier::generate("q", at("2024-01-01T00:00:00Z"));
        let b = Identifier::generate("q", at("2024-01-01T00:00:01Z"));
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_generate_ignores_subsecond() {
        let a = Identifier::generate("q", at("2024-01-01T00:00:00.100Z"));
        let b = Identifier::generate("q", at("2024-01-01T00:00:00.900Z"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_suffixes() {
        let base = Identifier::generate("rust ownership", at("2024-01-01T00:00:00Z"));
        let second = base.with_suffix(2);
        assert_eq!(second.as_str(), "20240101-000000_rust-ownership_2");
        assert_eq!(second.slug(), "rust-ownership");
        assert_eq!(second.suffix(), Some(2));
        assert_eq!(second.with_suffix(1), base);

        let all: Vec<_> = base.candidates().collect();
        assert_eq!(all.len() as u32, MAX_DISAMBIGUATION_ATTEMPTS);
        assert_eq!(all[0], base);
        assert_eq!(all[1], second);
    }

    #[test_case("20240101-000000_rust-ownership" ; "base")]
    #[test_case("20240101-000000_rust-ownership_7" ; "suffixed")]
    #[test_case("20241231-235959_query" ; "placeholder")]
    fn test_parse_valid(text: &str) {
        assert_eq!(Identifier::parse(text).unwrap().as_str(), text);
    }

    #[test_case("" ; "empty")]
    #[test_case("../../etc/passwd" ; "traversal")]
    #[test_case("20240101-000000_Rust" ; "uppercase")]
    #[test_case("20240101-000000_rust_1" ; "suffix one")]
    #[test_case("20241301-000000_rust" ; "bad month")]
    #[test_case("20240101-000000_" ; "missing slug")]
    #[test_case("20240101-000000_-rust" ; "leading separator")]
    #[test_case("20240101-000000_rust.json" ; "extension")]
    fn test_parse_invalid(text: &str) {
        assert!(matches!(
            Identifier::parse(text),
            Err(Error::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_serde_validates() {
        let id: Identifier = serde_json::from_str("\"20240101-000000_abc\"").unwrap();
        assert_eq!(id.as_str(), "20240101-000000_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"20240101-000000_abc\"");

        let bad: std::result::Result<Identifier, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }
}
