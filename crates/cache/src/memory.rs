//! In-process stand-ins for the volatile tier and the durable store.
//!
//! Both can be switched offline to reproduce partial outages. They back the
//! test suite and the development wiring of the service binary.

use crate::connection::{VolatileConnector, VolatileHandle, VolatileTier};
use crate::durable::{LobbyStore, ProfileStore, UpsertOutcome};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tavern_core::types::{ChatId, LobbyRecord, ProfileRecord, UserId};
use tavern_core::{TavernError, TavernResult};

/// Volatile tier with native per-key TTLs.
pub struct MemoryTier {
    entries: DashMap<String, (String, Instant)>,
    online: AtomicBool,
    stalled: AtomicBool,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            online: AtomicBool::new(true),
            stalled: AtomicBool::new(false),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// While stalled, every command hangs instead of answering.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Raw lookup that ignores the online switch, for assertions.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .filter(|entry| entry.1 > Instant::now())
            .map(|entry| entry.0.clone())
    }

    /// Remaining lifetime of a live key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.entries
            .get(key)
            .and_then(|entry| entry.1.checked_duration_since(Instant::now()))
    }

    async fn check_online(&self) -> TavernResult<()> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TavernError::TierUnavailable("memory tier offline".to_string()))
        }
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VolatileTier for MemoryTier {
    async fn get(&self, key: &str) -> TavernResult<Option<String>> {
        self.check_online().await?;
        let live = self
            .entries
            .get(key)
            .map(|entry| (entry.1 > Instant::now()).then(|| entry.0.clone()));
        match live {
            None => Ok(None),
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove(key);
                Ok(None)
            }
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> TavernResult<()> {
        self.check_online().await?;
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> TavernResult<()> {
        self.check_online().await?;
        self.entries.remove(key);
        Ok(())
    }
}

/// Hands out a shared [`MemoryTier`], counting connects.
pub struct MemoryConnector {
    tier: Arc<MemoryTier>,
    reachable: AtomicBool,
    hanging: AtomicBool,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(tier: Arc<MemoryTier>) -> Self {
        Self {
            tier,
            reachable: AtomicBool::new(true),
            hanging: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// While hanging, connect attempts never complete.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Number of connect attempts, successful or not.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VolatileConnector for MemoryConnector {
    async fn connect(&self, _url: &str) -> TavernResult<VolatileHandle> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent acquirers really do race on the init lock.
        tokio::task::yield_now().await;
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(TavernError::TierUnavailable(
                "memory tier unreachable".to_string(),
            ));
        }
        let handle: VolatileHandle = self.tier.clone();
        Ok(handle)
    }
}

/// Profile and lobby persistence held in memory.
pub struct MemoryDurableStore {
    profiles: DashMap<UserId, ProfileRecord>,
    lobbies: DashMap<ChatId, LobbyRecord>,
    online: AtomicBool,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self {
            profiles: DashMap::new(),
            lobbies: DashMap::new(),
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn insert_lobby(&self, lobby: LobbyRecord) {
        self.lobbies.insert(lobby.chat_id, lobby);
    }

    pub fn has_lobby(&self, chat_id: ChatId) -> bool {
        self.lobbies.contains_key(&chat_id)
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    /// Raw profile lookup that ignores the online switch.
    pub fn profile(&self, user_id: UserId) -> Option<ProfileRecord> {
        self.profiles.get(&user_id).map(|p| p.clone())
    }

    fn check_online(&self) -> TavernResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TavernError::Persistence("durable store offline".to_string()))
        }
    }
}

impl Default for MemoryDurableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileStore for MemoryDurableStore {
    async fn get_profile(&self, user_id: UserId) -> TavernResult<Option<ProfileRecord>> {
        self.check_online()?;
        Ok(self.profile(user_id))
    }

    async fn upsert_profile(
        &self,
        user_id: UserId,
        record: &ProfileRecord,
    ) -> TavernResult<UpsertOutcome> {
        self.check_online()?;
        self.profiles.insert(user_id, record.clone());
        Ok(UpsertOutcome::Applied)
    }
}

#[async_trait]
impl LobbyStore for MemoryDurableStore {
    async fn list_lobbies(&self) -> TavernResult<Vec<LobbyRecord>> {
        self.check_online()?;
        Ok(self.lobbies.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn delete_lobby(&self, chat_id: ChatId) -> TavernResult<()> {
        self.check_online()?;
        self.lobbies.remove(&chat_id);
        Ok(())
    }
}
