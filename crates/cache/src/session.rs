//! Short-term conversation state.
//!
//! Sessions live in the volatile tier with a process-local copy beside them.
//! Neither is durable: losing both loses the session, and callers always get
//! the freshest state this process knows about (possibly a brand-new one).

use crate::connection::{put_entry, ConnectionManager, VolatileHandle};
use crate::local::SessionFallback;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tavern_core::types::{CacheEntry, ChatMessage, Role, SessionRecord, UserId};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct SessionStore {
    connections: Arc<ConnectionManager>,
    fallback: SessionFallback,
    ttl: Duration,
    max_history: usize,
    write_lock: Mutex<()>,
}

fn session_key(user_id: UserId) -> String {
    format!("session:{user_id}")
}

impl SessionStore {
    pub fn new(connections: Arc<ConnectionManager>, ttl: Duration, max_history: usize) -> Self {
        Self {
            connections,
            fallback: SessionFallback::new(ttl),
            ttl,
            max_history,
            write_lock: Mutex::new(()),
        }
    }

    async fn tier(&self) -> Option<VolatileHandle> {
        match self.connections.acquire().await {
            Ok(tier) => Some(tier),
            Err(e) => {
                warn!(error = %e, "Session store running on local fallback");
                None
            }
        }
    }

    /// Load a session, creating an empty one if none is known.
    pub async fn load(&self, user_id: UserId) -> SessionRecord {
        if let Some(handle) = self.tier().await {
            match handle.get(&session_key(user_id)).await {
                Ok(Some(json)) => match serde_json::from_str::<SessionRecord>(&json) {
                    Ok(session) => return session,
                    Err(e) => warn!(user_id, error = %e, "Discarding undecodable session"),
                },
                Ok(None) => {}
                Err(e) => warn!(user_id, error = %e, "Session read failed, using local fallback"),
            }
        }

        if let Some(session) = self.fallback.get(user_id) {
            metrics::counter!("session.fallback.read").increment(1);
            return session;
        }

        debug!(user_id, "Starting new session");
        SessionRecord::new(Utc::now())
    }

    /// Store a session in the volatile tier (best effort) and, always, in the
    /// local fallback map.
    pub async fn save(&self, user_id: UserId, session: &SessionRecord) {
        let entry = CacheEntry::volatile(session_key(user_id), session, self.ttl, Utc::now());

        let tier = self.tier().await;

        // Both copies change under one guard so they never disagree.
        let _guard = self.write_lock.lock().await;
        if let Some(handle) = tier {
            if let Err(e) = put_entry(handle.as_ref(), &entry).await {
                metrics::counter!("session.volatile.write_errors").increment(1);
                warn!(user_id, error = %e, "Session write to volatile tier failed");
            }
        }
        self.fallback.put(user_id, session.clone());
    }

    /// Forget a session in both places.
    pub async fn clear(&self, user_id: UserId) {
        let tier = self.tier().await;

        let _guard = self.write_lock.lock().await;
        if let Some(handle) = tier {
            if let Err(e) = handle.del(&session_key(user_id)).await {
                warn!(user_id, error = %e, "Session delete from volatile tier failed");
            }
        }
        self.fallback.remove(user_id);
    }

    /// Append a message to the chat history, keeping at most the configured
    /// number of most recent entries.
    pub async fn append(
        &self,
        user_id: UserId,
        role: Role,
        content: impl Into<String>,
    ) -> SessionRecord {
        let mut session = self.load(user_id).await;
        session.push_message(
            ChatMessage {
                role,
                content: content.into(),
            },
            self.max_history,
        );
        session.touch(Utc::now());
        self.save(user_id, &session).await;
        session
    }

    /// Set one value in the session context.
    pub async fn set_context(
        &self,
        user_id: UserId,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> SessionRecord {
        let mut session = self.load(user_id).await;
        session.session_context.insert(key.into(), value);
        session.touch(Utc::now());
        self.save(user_id, &session).await;
        session
    }

    /// Drop local copies idle for longer than the session TTL.
    pub fn maintenance(&self) -> usize {
        let evicted = self.fallback.evict_expired();
        if evicted > 0 {
            debug!(evicted, "Session fallback eviction complete");
        }
        evicted
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }
}
