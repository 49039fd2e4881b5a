use crate::settings::ChatSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

pub type UserId = i64;
pub type ChatId = i64;

/// Tier-agnostic envelope for a cached value.
///
/// An entry without `expires_at` is only valid in the durable tier; anything
/// written to the volatile tier must carry one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub expires_at: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
    /// Entry destined for the volatile tier, expiring `ttl` from `now`.
    pub fn volatile(key: impl Into<String>, value: T, ttl: Duration, now: DateTime<Utc>) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl));
        Self {
            key: key.into(),
            value,
            expires_at,
        }
    }

    pub fn durable(key: impl Into<String>, value: T) -> Self {
        Self {
            key: key.into(),
            value,
            expires_at: None,
        }
    }

    /// Time left before expiry. `None` for entries that never expire,
    /// `Some(ZERO)` once the deadline has passed.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Semantic attributes of a user. The durable store owns it; caches hold copies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileRecord {
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub settings: ChatSettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Short-term conversational memory for one user. Never durable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub chat_history: Vec<ChatMessage>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub session_context: BTreeMap<String, serde_json::Value>,
}

impl SessionRecord {
    /// The implicit session handed out on first access.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            chat_history: Vec::new(),
            last_activity: now,
            session_context: BTreeMap::new(),
        }
    }

    /// Append a message, dropping the oldest entries beyond `max_len`.
    pub fn push_message(&mut self, message: ChatMessage, max_len: usize) {
        self.chat_history.push(message);
        if self.chat_history.len() > max_len {
            let overflow = self.chat_history.len() - max_len;
            self.chat_history.drain(..overflow);
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }
}

/// A time-boxed group lobby. Lives only in the durable store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LobbyRecord {
    pub chat_id: ChatId,
    pub message_id: i64,
    pub leader_id: UserId,
    pub party_size: u32,
    /// Player id to assigned role, `None` until a role is handed out.
    pub players: HashMap<UserId, Option<String>>,
    pub roles_left: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
}

impl LobbyRecord {
    /// Strictly past its deadline: a lobby expiring exactly at `now` survives.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str) -> ChatMessage {
        ChatMessage {
            role: Role::User,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_new_session_shape() {
        let now = Utc::now();
        let session = SessionRecord::new(now);
        assert!(session.chat_history.is_empty());
        assert!(session.session_context.is_empty());
        assert_eq!(session.last_activity, now);
    }

    #[test]
    fn test_push_message_evicts_oldest_first() {
        let mut session = SessionRecord::new(Utc::now());
        for i in 0..5 {
            session.push_message(msg(&format!("m{i}")), 3);
        }
        let contents: Vec<_> = session.chat_history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_volatile_entry_carries_ttl() {
        let now = Utc::now();
        let entry = CacheEntry::volatile("k", 1u8, Duration::from_secs(60), now);
        assert_eq!(entry.remaining_ttl(now), Some(Duration::from_secs(60)));
        assert_eq!(
            entry.remaining_ttl(now + chrono::Duration::seconds(120)),
            Some(Duration::ZERO)
        );
        assert_eq!(CacheEntry::durable("k", 1u8).remaining_ttl(now), None);
    }

    #[test]
    fn test_lobby_expiry_is_strict() {
        let now = Utc::now();
        let mut lobby = LobbyRecord {
            chat_id: 1,
            message_id: 10,
            leader_id: 7,
            party_size: 4,
            players: HashMap::new(),
            roles_left: BTreeSet::new(),
            expires_at: now,
        };
        assert!(!lobby.is_expired(now));
        lobby.expires_at = now - chrono::Duration::seconds(1);
        assert!(lobby.is_expired(now));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&msg("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
