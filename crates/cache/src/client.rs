//! Redis implementation of the volatile tier.
//! Command timeouts are applied by the connection manager around this handle.

use crate::connection::{VolatileConnector, VolatileHandle, VolatileTier};
use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisConnection;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tavern_core::{TavernError, TavernResult};
use tracing::info;

fn unavailable(op: &str, e: redis::RedisError) -> TavernError {
    TavernError::TierUnavailable(format!("redis {op}: {e}"))
}

/// Volatile tier backed by a single auto-reconnecting Redis connection.
pub struct RedisTier {
    conn: RedisConnection,
}

#[async_trait]
impl VolatileTier for RedisTier {
    async fn get(&self, key: &str) -> TavernResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| unavailable("GET", e))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> TavernResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| unavailable("SETEX", e))
    }

    async fn del(&self, key: &str) -> TavernResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| unavailable("DEL", e))
    }
}

/// Connects to Redis and verifies the link with a PING.
pub struct RedisConnector;

#[async_trait]
impl VolatileConnector for RedisConnector {
    async fn connect(&self, url: &str) -> TavernResult<VolatileHandle> {
        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url)
            .map_err(|e| TavernError::Config(format!("invalid redis address: {e}")))?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| TavernError::TierUnavailable(e.to_string()))?;

        // Verify connectivity
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| TavernError::TierUnavailable(e.to_string()))?;
        info!(response = %pong, "Redis connection established");

        Ok(Arc::new(RedisTier { conn }))
    }
}
