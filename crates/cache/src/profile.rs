//! Read-through / write-through cache of user profiles.
//!
//! The durable store is the system of record. The volatile tier only holds
//! copies with a bounded lifetime, and any failure there degrades to the
//! durable path instead of surfacing to the caller.

use crate::connection::{put_entry, ConnectionManager, VolatileHandle};
use crate::durable::{ProfileStore, UpsertOutcome};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tavern_core::settings::SettingToggle;
use tavern_core::types::{CacheEntry, ProfileRecord, UserId};
use tavern_core::{TavernError, TavernResult};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

pub struct ProfileCache {
    connections: Arc<ConnectionManager>,
    store: Arc<dyn ProfileStore>,
    ttl: Duration,
    write_lock: Mutex<()>,
}

fn profile_key(user_id: UserId) -> String {
    format!("profile:{user_id}")
}

impl ProfileCache {
    pub fn new(
        connections: Arc<ConnectionManager>,
        store: Arc<dyn ProfileStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            connections,
            store,
            ttl,
            write_lock: Mutex::new(()),
        }
    }

    async fn tier(&self) -> Option<VolatileHandle> {
        match self.connections.acquire().await {
            Ok(tier) => Some(tier),
            Err(e) => {
                warn!(error = %e, "Profile cache running without volatile tier");
                None
            }
        }
    }

    /// Load a profile. Never fails: unknown users and durable read outages
    /// both yield an empty record.
    pub async fn load(&self, user_id: UserId) -> ProfileRecord {
        let key = profile_key(user_id);
        let tier = self.tier().await;
        let mut reachable = tier.is_some();

        if let Some(handle) = &tier {
            match handle.get(&key).await {
                Ok(Some(json)) => match serde_json::from_str::<ProfileRecord>(&json) {
                    Ok(profile) => {
                        metrics::counter!("profile.cache.hit").increment(1);
                        return profile;
                    }
                    Err(e) => {
                        warn!(user_id, error = %e, "Discarding undecodable cached profile");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(user_id, error = %e, "Profile cache read failed, using durable store");
                    reachable = false;
                }
            }
        }
        metrics::counter!("profile.cache.miss").increment(1);

        let profile = match self.store.get_profile(user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                debug!(user_id, "No stored profile, returning empty record");
                return ProfileRecord::default();
            }
            Err(e) => {
                metrics::counter!("profile.durable.read_errors").increment(1);
                error!(user_id, error = %e, "Durable profile read failed, returning empty record");
                return ProfileRecord::default();
            }
        };

        if let Some(handle) = tier.filter(|_| reachable) {
            let entry = CacheEntry::volatile(key, &profile, self.ttl, Utc::now());
            if let Err(e) = put_entry(handle.as_ref(), &entry).await {
                warn!(user_id, error = %e, "Profile cache fill failed");
            }
        }

        profile
    }

    /// Write a profile to the volatile tier (best effort) and then to the
    /// durable store. Only the durable outcome decides success.
    pub async fn save(&self, user_id: UserId, record: &ProfileRecord) -> TavernResult<()> {
        let entry = CacheEntry::volatile(profile_key(user_id), record, self.ttl, Utc::now());

        if let Some(handle) = self.tier().await {
            let _guard = self.write_lock.lock().await;
            if let Err(e) = put_entry(handle.as_ref(), &entry).await {
                warn!(user_id, error = %e, "Profile cache write failed");
            }
        }

        match self.store.upsert_profile(user_id, record).await {
            Ok(UpsertOutcome::Applied) => Ok(()),
            Ok(UpsertOutcome::Conflict) => {
                warn!(user_id, "Durable store rejected profile write with a conflict");
                Err(TavernError::Persistence(format!(
                    "profile {user_id} write conflicted"
                )))
            }
            Err(e) => {
                error!(user_id, error = %e, "Durable profile write failed");
                Err(match e {
                    TavernError::Persistence(_) => e,
                    other => TavernError::Persistence(other.to_string()),
                })
            }
        }
    }

    /// Drop the cached copy. The durable record is untouched.
    pub async fn evict(&self, user_id: UserId) {
        if let Some(handle) = self.tier().await {
            if let Err(e) = handle.del(&profile_key(user_id)).await {
                warn!(user_id, error = %e, "Profile cache eviction failed");
            }
        }
    }

    /// Flip a named setting for a user and persist it. Unknown names are
    /// rejected before anything is loaded.
    pub async fn toggle_setting(&self, user_id: UserId, name: &str) -> TavernResult<bool> {
        let toggle: SettingToggle = name.parse()?;
        let mut profile = self.load(user_id).await;
        let value = profile.settings.toggle(toggle);
        self.save(user_id, &profile).await?;
        debug!(user_id, setting = %toggle, value, "Setting toggled");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::VolatileTier;
    use crate::memory::{MemoryConnector, MemoryDurableStore, MemoryTier};
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixture {
        tier: Arc<MemoryTier>,
        store: Arc<MemoryDurableStore>,
        cache: ProfileCache,
    }

    fn fixture() -> Fixture {
        let tier = Arc::new(MemoryTier::new());
        let store = Arc::new(MemoryDurableStore::new());
        let connections = Arc::new(ConnectionManager::new(
            Some("memory://test".to_string()),
            Arc::new(MemoryConnector::new(tier.clone())),
            Duration::from_millis(200),
        ));
        let cache = ProfileCache::new(connections, store.clone(), Duration::from_secs(86_400));
        Fixture { tier, store, cache }
    }

    fn profile(name: &str) -> ProfileRecord {
        let mut record = ProfileRecord::default();
        record.attributes.insert("name".to_string(), json!(name));
        record
    }

    #[tokio::test]
    async fn test_unknown_user_gets_empty_record() {
        let f = fixture();
        let loaded = f.cache.load(42).await;
        assert_eq!(loaded, ProfileRecord::default());
        assert!(f.tier.peek("profile:42").is_none());
    }

    #[tokio::test]
    async fn test_miss_fills_cache_with_ttl() {
        let f = fixture();
        f.store.upsert_profile(1, &profile("ada")).await.unwrap();

        assert_eq!(f.cache.load(1).await, profile("ada"));

        let ttl = f.tier.ttl("profile:1").unwrap();
        assert!(ttl > Duration::from_secs(86_000) && ttl <= Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn test_hit_served_from_volatile_tier() {
        let f = fixture();
        f.cache.save(1, &profile("ada")).await.unwrap();

        // Durable store going dark does not matter while the copy is cached.
        f.store.set_online(false);
        assert_eq!(f.cache.load(1).await, profile("ada"));
    }

    #[tokio::test]
    async fn test_durable_failure_surfaces_after_cache_write() {
        let f = fixture();
        f.store.set_online(false);

        let err = f.cache.save(1, &profile("ada")).await.unwrap_err();
        assert!(matches!(err, TavernError::Persistence(_)));
        // The unconfirmed copy stays in the volatile tier.
        assert!(f.tier.peek("profile:1").is_some());
    }

    #[tokio::test]
    async fn test_durable_read_outage_returns_empty() {
        let f = fixture();
        f.tier.set_online(false);
        f.store.set_online(false);
        assert_eq!(f.cache.load(9).await, ProfileRecord::default());
    }

    #[tokio::test]
    async fn test_evict_leaves_durable_record() {
        let f = fixture();
        f.cache.save(1, &profile("ada")).await.unwrap();
        f.cache.evict(1).await;

        assert!(f.tier.peek("profile:1").is_none());
        assert_eq!(f.store.profile(1), Some(profile("ada")));
        assert_eq!(f.cache.load(1).await, profile("ada"));
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_falls_back() {
        let f = fixture();
        f.store.upsert_profile(1, &profile("ada")).await.unwrap();
        f.tier
            .set_ex("profile:1", "{not json", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(f.cache.load(1).await, profile("ada"));
        assert_eq!(f.tier.peek("profile:1").unwrap(), serde_json::to_string(&profile("ada")).unwrap());
    }

    #[tokio::test]
    async fn test_toggle_setting_round_trips() {
        let f = fixture();
        assert!(f.cache.toggle_setting(1, "profile_memory").await.unwrap());
        assert!(f.store.profile(1).unwrap().settings.profile_memory);
        assert!(!f.cache.toggle_setting(1, "profile_memory").await.unwrap());

        let err = f.cache.toggle_setting(1, "no_such_flag").await.unwrap_err();
        assert!(matches!(err, TavernError::UnknownSetting(_)));
    }

    fn stalled_fixture() -> Fixture {
        let tier = Arc::new(MemoryTier::new());
        let store = Arc::new(MemoryDurableStore::new());
        let connections = Arc::new(
            ConnectionManager::new(
                Some("memory://test".to_string()),
                Arc::new(MemoryConnector::new(tier.clone())),
                Duration::from_millis(200),
            )
            .with_op_timeout(Duration::from_millis(50)),
        );
        let cache = ProfileCache::new(connections, store.clone(), Duration::from_secs(86_400));
        tier.set_stalled(true);
        Fixture { tier, store, cache }
    }

    #[tokio::test]
    async fn test_stalled_tier_falls_back_to_durable_store() {
        let f = stalled_fixture();
        f.store.upsert_profile(1, &profile("ada")).await.unwrap();

        let loaded = tokio::time::timeout(Duration::from_secs(1), f.cache.load(1))
            .await
            .expect("load must not hang on a stalled tier");
        assert_eq!(loaded, profile("ada"));
    }

    #[tokio::test]
    async fn test_stalled_tier_does_not_block_save() {
        let f = stalled_fixture();

        tokio::time::timeout(Duration::from_secs(1), f.cache.save(2, &profile("bob")))
            .await
            .expect("save must not hang on a stalled tier")
            .unwrap();
        assert_eq!(f.store.profile(2), Some(profile("bob")));

        f.tier.set_stalled(false);
        assert!(f.tier.peek("profile:2").is_none());
    }

    struct ConflictingStore;

    #[async_trait]
    impl ProfileStore for ConflictingStore {
        async fn get_profile(&self, _user_id: UserId) -> TavernResult<Option<ProfileRecord>> {
            Ok(None)
        }

        async fn upsert_profile(
            &self,
            _user_id: UserId,
            _record: &ProfileRecord,
        ) -> TavernResult<UpsertOutcome> {
            Ok(UpsertOutcome::Conflict)
        }
    }

    #[tokio::test]
    async fn test_conflict_is_a_persistence_error() {
        let connections = Arc::new(ConnectionManager::new(
            None,
            Arc::new(MemoryConnector::new(Arc::new(MemoryTier::new()))),
            Duration::from_millis(200),
        ));
        let cache = ProfileCache::new(connections, Arc::new(ConflictingStore), Duration::from_secs(60));

        let err = cache.save(1, &profile("ada")).await.unwrap_err();
        assert!(matches!(err, TavernError::Persistence(_)));
    }
}
