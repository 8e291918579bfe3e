//! Redis Integration Tests
//!
//! Exercises the KV backend against a real Redis server:
//! - Key layout and TTL on saved records
//! - Guarded saves and same-second disambiguation
//! - Cleanup and reconcile after native expiry
//!
//! These tests require a running Redis server. Set the environment variable
//! `SEARCHKEEP_TEST_REDIS_URL` to enable them:
//!
//! ```bash
//! export SEARCHKEEP_TEST_REDIS_URL="redis://localhost:6379"
//! cargo test --features redis redis_integration
//! ```

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::doc_markdown
)]
#![cfg(feature = "redis")]

use chrono::{DateTime, Duration, Utc};
use searchkeep::storage::{KvBackend, KvStore, RedisStore, ResultStorage, WriteBatch};
use serde_json::json;
use std::env;

/// Environment variable for Redis test connection URL.
const REDIS_URL_ENV: &str = "SEARCHKEEP_TEST_REDIS_URL";

/// Returns the Redis connection URL if available, or None to skip tests.
fn get_redis_url() -> Option<String> {
    env::var(REDIS_URL_ENV).ok()
}

/// Macro to skip tests when Redis is not available.
macro_rules! require_redis {
    () => {
        match get_redis_url() {
            Some(url) => url,
            None => {
                eprintln!(
                    "Skipping test: {} not set. Set this environment variable to run Redis tests.",
                    REDIS_URL_ENV
                );
                return;
            },
        }
    };
}

fn at(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
}

/// Backend under a prefix unique to this test run.
fn backend(url: &str) -> KvBackend<RedisStore> {
    let store = RedisStore::connect(url).expect("connect to redis");
    let prefix = format!("searchkeep-test-{}:", uuid::Uuid::new_v4().simple());
    KvBackend::new(store).with_prefix(prefix)
}

/// Removes everything a test wrote.
fn purge(backend: &KvBackend<RedisStore>) {
    for summary in backend.list(usize::MAX, 0).unwrap() {
        backend.delete(&summary.identifier).unwrap();
    }
    backend.reconcile().unwrap();
}

#[test]
fn test_save_get_delete() {
    let url = require_redis!();
    let backend = backend(&url);

    let id = backend
        .save_at("rust ownership", &json!({"n": 1}), at("2024-01-01T00:00:00Z"))
        .unwrap();
    assert_eq!(id.as_str(), "20240101-000000_rust-ownership");

    let record = backend.get(&id).unwrap().unwrap();
    assert_eq!(record.query, "rust ownership");
    assert_eq!(record.payload, json!({"n": 1}));

    let by_query = backend.list_by_query("rust ownership").unwrap();
    assert_eq!(by_query.len(), 1);

    assert!(backend.delete(&id).unwrap());
    assert!(!backend.delete(&id).unwrap());
    assert!(backend.get(&id).unwrap().is_none());
    assert!(backend.list(10, 0).unwrap().is_empty());
}

#[test]
fn test_same_second_saves_are_disambiguated() {
    let url = require_redis!();
    let backend = backend(&url);
    let now = at("2024-01-01T00:00:00Z");

    let first = backend.save_at("q", &json!(1), now).unwrap();
    let second = backend.save_at("q", &json!(2), now).unwrap();

    assert_eq!(second.as_str(), "20240101-000000_q_2");
    assert_ne!(first, second);
    assert_eq!(backend.list_by_query("q").unwrap().len(), 2);

    purge(&backend);
}

#[test]
fn test_cleanup_scenario() {
    let url = require_redis!();
    let backend = backend(&url);

    let id = backend
        .save_at("rust ownership", &json!({}), at("2024-01-01T00:00:00Z"))
        .unwrap();
    let removed = backend
        .cleanup_at(Duration::days(1), at("2024-01-03T00:00:00Z"))
        .unwrap();

    assert_eq!(removed, 1);
    assert!(backend.get(&id).unwrap().is_none());
    assert!(backend.list_by_query("rust ownership").unwrap().is_empty());
}

#[test]
fn test_expired_record_leaves_no_dangling_entries() {
    let url = require_redis!();
    let backend = backend(&url);
    let id = backend.save("expiring", &json!(null)).unwrap();

    // Stand-in for native TTL expiry: drop only the record key.
    backend
        .store()
        .apply(&WriteBatch::new().del(format!("{}result:{id}", backend.prefix())))
        .unwrap();

    assert!(backend.list(10, 0).unwrap().is_empty());
    assert_eq!(backend.reconcile().unwrap(), 1);
    assert!(
        backend
            .store()
            .range_by_score(&format!("{}index:all", backend.prefix()), None)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_unreachable_server_is_unavailable() {
    let result = RedisStore::connect("redis://127.0.0.1:1/0");
    assert!(matches!(result, Err(e) if e.is_unavailable()));
}
