//! Redis key-value store.
//!
//! # Connection Management
//!
//! A single connection is cached per store and reused across operations. A
//! connection that fails a command is dropped and the next call opens a fresh
//! one.
//!
//! # Command Timeout
//!
//! Connects and commands use a 5-second timeout so an unresponsive server
//! surfaces as `BackendUnavailable` instead of blocking the caller.

#[cfg(feature = "redis")]
mod implementation {
    use crate::storage::kv::store::{BatchOutcome, KvOp, KvStore, WriteBatch};
    use crate::{Error, Result};
    use redis::{Client, Commands, Connection, Pipeline, RedisError};
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing::debug;

    /// Default timeout for Redis operations.
    const REDIS_TIMEOUT: Duration = Duration::from_secs(5);

    /// Redis-backed [`KvStore`].
    pub struct RedisStore {
        /// Redis client.
        client: Client,
        /// Cached connection for reuse.
        connection: Mutex<Option<Connection>>,
    }

    impl std::fmt::Debug for RedisStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            // The connection info carries the password.
            f.debug_struct("RedisStore").finish_non_exhaustive()
        }
    }

    impl RedisStore {
        /// Opens a store and verifies the server answers.
        ///
        /// # Errors
        ///
        /// Returns `InvalidInput` for a malformed URL and `BackendUnavailable`
        /// if the server cannot be reached within the timeout.
        pub fn connect(connection_url: &str) -> Result<Self> {
            let client = Client::open(connection_url).map_err(|e| Error::InvalidInput(format!(
                "invalid redis url: {e}"
            )))?;

            let store = Self {
                client,
                connection: Mutex::new(None),
            };
            store.ping()?;

            Ok(store)
        }

        /// Gets a connection, reusing the cached one if available.
        fn get_connection(&self) -> Result<Connection> {
            let mut guard = self.connection.lock().map_err(|e| Error::OperationFailed {
                operation: "redis_lock_connection".to_string(),
                cause: e.to_string(),
            })?;

            if let Some(conn) = guard.take() {
                return Ok(conn);
            }

            let conn = self
                .client
                .get_connection_with_timeout(REDIS_TIMEOUT)
                .map_err(|e| map_redis_error("redis_get_connection", &e))?;

            conn.set_read_timeout(Some(REDIS_TIMEOUT))
                .map_err(|e| map_redis_error("redis_set_read_timeout", &e))?;
            conn.set_write_timeout(Some(REDIS_TIMEOUT))
                .map_err(|e| map_redis_error("redis_set_write_timeout", &e))?;

            Ok(conn)
        }

        /// Returns a connection to the cache for reuse.
        fn return_connection(&self, conn: Connection) {
            if let Ok(mut guard) = self.connection.lock() {
                *guard = Some(conn);
            }
        }

        /// Runs `f` on a pooled connection, keeping the connection only when
        /// the command succeeded.
        fn with_connection<T>(
            &self,
            operation: &str,
            f: impl FnOnce(&mut Connection) -> redis::RedisResult<T>,
        ) -> Result<T> {
            let mut conn = self.get_connection()?;
            match f(&mut conn) {
                Ok(value) => {
                    self.return_connection(conn);
                    Ok(value)
                },
                Err(e) => {
                    debug!(operation, error = %e, "Dropping redis connection after error");
                    Err(map_redis_error(operation, &e))
                },
            }
        }
    }

    /// Maps transport failures to `BackendUnavailable`, the rest to
    /// `OperationFailed`.
    fn map_redis_error(operation: &str, e: &RedisError) -> Error {
        if e.is_io_error()
            || e.is_connection_refusal()
            || e.is_timeout()
            || e.is_connection_dropped()
        {
            Error::BackendUnavailable {
                backend: "redis".to_string(),
                cause: format!("{operation}: {e}"),
            }
        } else {
            Error::OperationFailed {
                operation: operation.to_string(),
                cause: e.to_string(),
            }
        }
    }

    /// Queues batch ops on a pipeline; only `DEL` replies are kept.
    fn queue_ops(pipe: &mut Pipeline, ops: &[KvOp]) {
        for op in ops {
            match op {
                KvOp::Set {
                    key,
                    value,
                    ttl: Some(ttl),
                } => {
                    pipe.set_ex(key, value, ttl.as_secs().max(1)).ignore();
                },
                KvOp::Set {
                    key,
                    value,
                    ttl: None,
                } => {
                    pipe.set(key, value).ignore();
                },
                KvOp::Del { key } => {
                    pipe.del(key);
                },
                KvOp::ZAdd { key, member, score } => {
                    pipe.zadd(key, member, *score).ignore();
                },
                KvOp::ZRem { key, member } => {
                    pipe.zrem(key, member).ignore();
                },
            }
        }
    }

    impl KvStore for RedisStore {
        fn name(&self) -> &'static str {
            "redis"
        }

        fn ping(&self) -> Result<()> {
            self.with_connection("redis_ping", |conn| {
                redis::cmd("PING").query::<String>(conn).map(|_| ())
            })
        }

        fn get(&self, key: &str) -> Result<Option<String>> {
            self.with_connection("redis_get", |conn| conn.get(key))
        }

        fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            self.with_connection("redis_mget", |conn| {
                redis::cmd("MGET").arg(keys).query(conn)
            })
        }

        fn exists(&self, key: &str) -> Result<bool> {
            self.with_connection("redis_exists", |conn| conn.exists(key))
        }

        fn exists_many(&self, keys: &[String]) -> Result<Vec<bool>> {
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            self.with_connection("redis_exists_many", |conn| {
                let mut pipe = redis::pipe();
                for key in keys {
                    pipe.exists(key);
                }
                pipe.query(conn)
            })
        }

        fn apply(&self, batch: &WriteBatch) -> Result<BatchOutcome> {
            if let Some(guard) = &batch.guard {
                // WATCH/MULTI/EXEC: the helper retries if the guard key
                // changes between the check and EXEC.
                return self.with_connection("redis_guarded_batch", |conn| {
                    redis::transaction(conn, &[guard.as_str()], |con, pipe| {
                        let taken: bool = con.exists(guard.as_str())?;
                        if taken {
                            return Ok(Some(BatchOutcome::GuardExists));
                        }
                        queue_ops(pipe, &batch.ops);
                        let replies: Option<Vec<u64>> = pipe.query(con)?;
                        Ok(replies.map(|r| BatchOutcome::Applied {
                            removed: r.iter().sum(),
                        }))
                    })
                });
            }

            if batch.is_empty() {
                return Ok(BatchOutcome::Applied { removed: 0 });
            }

            self.with_connection("redis_batch", |conn| {
                let mut pipe = redis::pipe();
                pipe.atomic();
                queue_ops(&mut pipe, &batch.ops);
                let replies: Vec<u64> = pipe.query(conn)?;
                Ok(BatchOutcome::Applied {
                    removed: replies.iter().sum(),
                })
            })
        }

        fn range_by_score(
            &self,
            key: &str,
            max_exclusive: Option<f64>,
        ) -> Result<Vec<(String, f64)>> {
            let max = max_exclusive.map_or_else(|| "+inf".to_string(), |max| format!("({max}"));
            self.with_connection("redis_zrangebyscore", |conn| {
                conn.zrangebyscore_withscores(key, "-inf", max)
            })
        }
    }
}

#[cfg(feature = "redis")]
pub use implementation::RedisStore;

#[cfg(not(feature = "redis"))]
mod stub {
    use crate::storage::kv::store::{BatchOutcome, KvStore, WriteBatch};
    use crate::{Error, Result};

    /// Stub Redis store when feature is not enabled.
    #[derive(Debug)]
    pub struct RedisStore;

    impl RedisStore {
        /// Opens a store (stub).
        ///
        /// # Errors
        ///
        /// Always returns an error because the feature is not enabled.
        pub fn connect(_connection_url: &str) -> Result<Self> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }
    }

    impl KvStore for RedisStore {
        fn name(&self) -> &'static str {
            "redis"
        }

        fn ping(&self) -> Result<()> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn get_many(&self, _keys: &[String]) -> Result<Vec<Option<String>>> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn exists(&self, _key: &str) -> Result<bool> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn exists_many(&self, _keys: &[String]) -> Result<Vec<bool>> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn apply(&self, _batch: &WriteBatch) -> Result<BatchOutcome> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn range_by_score(
            &self,
            _key: &str,
            _max_exclusive: Option<f64>,
        ) -> Result<Vec<(String, f64)>> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }
    }
}

#[cfg(not(feature = "redis"))]
pub use stub::RedisStore;
