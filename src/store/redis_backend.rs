//! Redis backing for the snapshot store: string keys, SET with expiry, KEYS
//! scans. Every operation runs under a bounded timeout; an error here is the
//! signal that flips the store into its degraded in-memory mode.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::time::timeout;

use super::StoreError;

const OP_TIMEOUT: Duration = Duration::from_secs(5);

pub(super) struct RedisBackend {
    conn: MultiplexedConnection,
}

impl RedisBackend {
    pub(super) async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(classify)?;
        let mut conn = timeout(OP_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| StoreError::Transient("redis connect timeout".into()))?
            .map_err(classify)?;
        let pong: String = timeout(OP_TIMEOUT, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| StoreError::Transient("redis ping timeout".into()))?
            .map_err(classify)?;
        if pong != "PONG" {
            return Err(StoreError::Backend(format!("unexpected ping reply: {pong}")));
        }
        Ok(Self { conn })
    }

    pub(super) async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        timeout(OP_TIMEOUT, conn.get::<_, Option<String>>(key))
            .await
            .map_err(|_| StoreError::Transient("redis get timeout".into()))?
            .map_err(classify)
    }

    pub(super) async fn set_raw(
        &self,
        key: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let ttl_secs = ttl.as_secs().max(1);
        timeout(OP_TIMEOUT, conn.set_ex::<_, _, ()>(key, payload, ttl_secs))
            .await
            .map_err(|_| StoreError::Transient("redis set timeout".into()))?
            .map_err(classify)
    }

    /// Keys matching the glob pattern together with their payloads. A key that
    /// disappears between KEYS and GET (TTL expiry) is silently skipped.
    pub(super) async fn scan_raw(&self, pattern: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = timeout(
            OP_TIMEOUT,
            redis::cmd("KEYS").arg(pattern).query_async(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Transient("redis scan timeout".into()))?
        .map_err(classify)?;

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(payload) = self.get_raw(&key).await? {
                entries.push((key, payload));
            }
        }
        Ok(entries)
    }
}

fn classify(e: redis::RedisError) -> StoreError {
    if e.is_timeout() || e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        StoreError::Transient(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}
