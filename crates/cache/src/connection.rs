//! Lifecycle of the shared handle to the volatile tier.
//!
//! The manager is built explicitly by the composition root and injected into
//! the stores. The handle itself is created lazily on first `acquire` (or
//! eagerly via `open`) and torn down by `close`. Every handle it gives out is
//! wrapped so each command is bounded by the operation timeout, whatever the
//! backend.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tavern_core::config::RedisConfig;
use tavern_core::types::CacheEntry;
use tavern_core::{TavernError, TavernResult};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Operations the stores need from the volatile key-value tier.
#[async_trait]
pub trait VolatileTier: Send + Sync {
    async fn get(&self, key: &str) -> TavernResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> TavernResult<()>;

    /// Deleting an absent key succeeds.
    async fn del(&self, key: &str) -> TavernResult<()>;

    async fn close(&self) {}
}

pub type VolatileHandle = Arc<dyn VolatileTier>;

/// Opens handles to the volatile tier.
#[async_trait]
pub trait VolatileConnector: Send + Sync {
    async fn connect(&self, url: &str) -> TavernResult<VolatileHandle>;
}

/// Handle wrapper that turns a stalled command into `TierUnavailable`.
struct BoundedTier {
    inner: VolatileHandle,
    op_timeout: Duration,
}

impl BoundedTier {
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> TavernResult<T>
    where
        F: Future<Output = TavernResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                metrics::counter!("volatile.timeouts").increment(1);
                Err(TavernError::TierUnavailable(format!(
                    "{op} timed out after {}ms",
                    self.op_timeout.as_millis()
                )))
            }
        }
    }
}

#[async_trait]
impl VolatileTier for BoundedTier {
    async fn get(&self, key: &str) -> TavernResult<Option<String>> {
        self.bounded("GET", self.inner.get(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> TavernResult<()> {
        self.bounded("SETEX", self.inner.set_ex(key, value, ttl))
            .await
    }

    async fn del(&self, key: &str) -> TavernResult<()> {
        self.bounded("DEL", self.inner.del(key)).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

pub struct ConnectionManager {
    url: Option<String>,
    connector: Arc<dyn VolatileConnector>,
    connect_timeout: Duration,
    op_timeout: Duration,
    retry_backoff: Duration,
    handle: RwLock<Option<VolatileHandle>>,
    last_failure: SyncMutex<Option<Instant>>,
    init: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        url: Option<String>,
        connector: Arc<dyn VolatileConnector>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            url,
            connector,
            connect_timeout,
            op_timeout: DEFAULT_OP_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            handle: RwLock::new(None),
            last_failure: SyncMutex::new(None),
            init: Mutex::new(()),
        }
    }

    pub fn from_config(config: &RedisConfig, connector: Arc<dyn VolatileConnector>) -> Self {
        Self::new(config.url.clone(), connector, config.connect_timeout())
            .with_op_timeout(config.op_timeout())
            .with_retry_backoff(config.retry_backoff())
    }

    /// Bound applied to every command on the handles this manager returns.
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// How long after a failed connect callers fail fast instead of trying
    /// again.
    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    fn current(&self) -> Option<VolatileHandle> {
        self.handle.read().clone()
    }

    fn backing_off(&self) -> bool {
        self.last_failure
            .lock()
            .map_or(false, |at| at.elapsed() < self.retry_backoff)
    }

    fn fail(&self, e: TavernError) -> TavernError {
        *self.last_failure.lock() = Some(Instant::now());
        e
    }

    /// Return the shared handle, connecting first if nobody has yet.
    ///
    /// Only the first caller to observe an empty slot connects; everyone else
    /// either takes the fast path or waits on the init lock and then sees the
    /// handle it produced. After a failed connect, callers fail immediately
    /// until the retry backoff has passed. No retries happen here.
    pub async fn acquire(&self) -> TavernResult<VolatileHandle> {
        if let Some(handle) = self.current() {
            return Ok(handle);
        }
        if self.backing_off() {
            return Err(TavernError::TierUnavailable(
                "volatile tier connect recently failed".to_string(),
            ));
        }

        let _guard = self.init.lock().await;
        if let Some(handle) = self.current() {
            return Ok(handle);
        }
        if self.backing_off() {
            return Err(TavernError::TierUnavailable(
                "volatile tier connect recently failed".to_string(),
            ));
        }

        let url = self.url.as_deref().ok_or_else(|| {
            TavernError::TierUnavailable("no volatile tier address configured".to_string())
        })?;

        let inner = match tokio::time::timeout(self.connect_timeout, self.connector.connect(url))
            .await
        {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                warn!(error = %e, "Volatile tier connect failed");
                return Err(self.fail(e));
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.connect_timeout.as_millis() as u64,
                    "Volatile tier connect timed out"
                );
                return Err(self.fail(TavernError::TierUnavailable(format!(
                    "connect timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))));
            }
        };

        let handle: VolatileHandle = Arc::new(BoundedTier {
            inner,
            op_timeout: self.op_timeout,
        });
        *self.handle.write() = Some(handle.clone());
        *self.last_failure.lock() = None;
        info!("Volatile tier connected");
        Ok(handle)
    }

    /// Eagerly initialize the handle from the composition root.
    pub async fn open(&self) -> TavernResult<()> {
        self.acquire().await.map(|_| ())
    }

    pub fn is_connected(&self) -> bool {
        self.handle.read().is_some()
    }

    /// Tear down the handle. A later `acquire` connects again.
    pub async fn close(&self) {
        let _guard = self.init.lock().await;
        *self.last_failure.lock() = None;
        let taken = self.handle.write().take();
        match taken {
            Some(handle) => {
                handle.close().await;
                info!("Volatile tier disconnected");
            }
            None => debug!("Volatile tier close requested with no open handle"),
        }
    }
}

/// Serialize and store an entry in the volatile tier. Entries without a TTL
/// are refused; already-expired ones are skipped.
pub async fn put_entry<T: Serialize>(
    tier: &dyn VolatileTier,
    entry: &CacheEntry<T>,
) -> TavernResult<()> {
    let remaining = entry.remaining_ttl(Utc::now()).ok_or_else(|| {
        TavernError::Cache(format!("entry {} has no expiry", entry.key))
    })?;
    if remaining.is_zero() {
        debug!(key = %entry.key, "Skipping write of expired entry");
        return Ok(());
    }

    // Round partial seconds up so a short TTL never collapses to zero.
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    let json = serde_json::to_string(&entry.value)?;
    tier.set_ex(&entry.key, &json, Duration::from_secs(secs.max(1)))
        .await
}
