//! Process-local session map backed by DashMap.
//! Written on every session save so the latest state seen by this process
//! survives a volatile tier outage. Entries idle longer than the session TTL
//! are dropped by `evict_expired`.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tavern_core::types::{SessionRecord, UserId};

struct FallbackEntry {
    session: SessionRecord,
    written_at: Instant,
}

pub struct SessionFallback {
    store: DashMap<UserId, FallbackEntry>,
    ttl: Duration,
}

impl SessionFallback {
    pub fn new(ttl: Duration) -> Self {
        Self {
            store: DashMap::new(),
            ttl,
        }
    }

    /// Get a session, returns None if expired or missing.
    pub fn get(&self, user_id: UserId) -> Option<SessionRecord> {
        let entry = self.store.get(&user_id)?;
        if entry.written_at.elapsed() > self.ttl {
            drop(entry);
            self.store.remove(&user_id);
            return None;
        }
        Some(entry.session.clone())
    }

    pub fn put(&self, user_id: UserId, session: SessionRecord) {
        self.store.insert(
            user_id,
            FallbackEntry {
                session,
                written_at: Instant::now(),
            },
        );
    }

    pub fn remove(&self, user_id: UserId) {
        self.store.remove(&user_id);
    }

    /// Remove expired entries. Call this periodically from a background task.
    pub fn evict_expired(&self) -> usize {
        let before = self.store.len();
        self.store
            .retain(|_, entry| entry.written_at.elapsed() <= self.ttl);
        before.saturating_sub(self.store.len())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
