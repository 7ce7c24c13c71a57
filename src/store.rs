use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, IntoConnectionInfo};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to connect to store - {0}")]
    Connect(String),
    #[error("failed to set key {key} - {reason}")]
    Write { key: String, reason: String },
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// Something that hands out connections to the key-value store.
///
/// A connection is acquired once per request and released when dropped, so
/// implementations must not share a connection between calls to `connect`.
#[async_trait]
pub trait KvStore: Send + Sync {
    type Connection: KvConnection;

    async fn connect(&self) -> Result<Self::Connection, StoreError>;
}

#[async_trait]
pub trait KvConnection: Send {
    /// Unconditional overwrite of `key` with `value`.
    async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Redis backed store. Holds connection parameters only; sockets are opened
/// per request in [`KvStore::connect`].
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    op_timeout: Duration,
}

impl RedisStore {
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        let mut info = config
            .redis_url
            .as_str()
            .into_connection_info()
            .map_err(|e| StoreError::Connect(e.to_string()))?;
        info.redis.db = config.redis_database_index;
        let client = redis::Client::open(info).map_err(|e| StoreError::Connect(e.to_string()))?;

        Ok(RedisStore {
            client,
            op_timeout: config.store_timeout,
        })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    type Connection = RedisConnection;

    async fn connect(&self) -> Result<RedisConnection, StoreError> {
        let conn = timeout(
            self.op_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| StoreError::Timeout {
            operation: "connect",
            after: self.op_timeout,
        })?
        .map_err(|e| StoreError::Connect(e.to_string()))?;

        debug!("redis connection opened");
        Ok(RedisConnection {
            conn,
            op_timeout: self.op_timeout,
        })
    }
}

pub struct RedisConnection {
    conn: MultiplexedConnection,
    op_timeout: Duration,
}

#[async_trait]
impl KvConnection for RedisConnection {
    async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        timeout(self.op_timeout, self.conn.set::<_, _, ()>(key, value))
            .await
            .map_err(|_| StoreError::Timeout {
                operation: "set",
                after: self.op_timeout,
            })?
            .map_err(|e| StoreError::Write {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}

impl Drop for RedisConnection {
    fn drop(&mut self) {
        debug!("redis connection released");
    }
}
