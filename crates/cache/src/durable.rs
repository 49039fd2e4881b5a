//! Interfaces of the durable store and the expiry notification collaborator.
//! The concrete backends live outside this crate.

use async_trait::async_trait;
use tavern_core::types::{ChatId, LobbyRecord, ProfileRecord, UserId};
use tavern_core::TavernResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Applied,
    /// The store refused the write because of a concurrent change.
    Conflict,
}

/// Durable profile persistence, the system of record for profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: UserId) -> TavernResult<Option<ProfileRecord>>;

    async fn upsert_profile(
        &self,
        user_id: UserId,
        record: &ProfileRecord,
    ) -> TavernResult<UpsertOutcome>;
}

/// Durable lobby persistence. The store has no native expiry.
#[async_trait]
pub trait LobbyStore: Send + Sync {
    async fn list_lobbies(&self) -> TavernResult<Vec<LobbyRecord>>;

    /// Deleting a lobby that no longer exists succeeds.
    async fn delete_lobby(&self, chat_id: ChatId) -> TavernResult<()>;
}

/// Updates the presentation of a lobby that has been reaped.
#[async_trait]
pub trait ExpiryNotifier: Send + Sync {
    async fn notify_expired(&self, lobby: &LobbyRecord) -> TavernResult<()>;
}
