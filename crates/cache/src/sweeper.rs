//! Active expiry for lobbies, which the durable store cannot expire itself.

use crate::durable::{ExpiryNotifier, LobbyStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tavern_core::types::LobbyRecord;
use tavern_core::TavernResult;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct ExpirySweeper {
    lobbies: Arc<dyn LobbyStore>,
    notifier: Arc<dyn ExpiryNotifier>,
}

impl ExpirySweeper {
    pub fn new(lobbies: Arc<dyn LobbyStore>, notifier: Arc<dyn ExpiryNotifier>) -> Self {
        Self { lobbies, notifier }
    }

    /// Remove every lobby whose deadline is strictly before `now` and return
    /// the ones that were deleted.
    ///
    /// Notification is a courtesy: a failed notify is logged and the lobby is
    /// deleted anyway. Re-running on the same snapshot is harmless since
    /// deletes are keyed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> TavernResult<Vec<LobbyRecord>> {
        let expired: Vec<LobbyRecord> = self
            .lobbies
            .list_lobbies()
            .await?
            .into_iter()
            .filter(|lobby| lobby.is_expired(now))
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for lobby in expired {
            if let Err(e) = self.notifier.notify_expired(&lobby).await {
                metrics::counter!("sweeper.notify_errors").increment(1);
                warn!(chat_id = lobby.chat_id, error = %e, "Lobby expiry notification failed");
            }

            match self.lobbies.delete_lobby(lobby.chat_id).await {
                Ok(()) => removed.push(lobby),
                Err(e) => {
                    error!(chat_id = lobby.chat_id, error = %e, "Failed to delete expired lobby");
                }
            }
        }

        metrics::counter!("sweeper.expired").increment(removed.len() as u64);
        if !removed.is_empty() {
            info!(count = removed.len(), "Expired lobbies removed");
        }
        Ok(removed)
    }

    /// Run `sweep` on a fixed interval until the task is aborted.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep(Utc::now()).await {
                    error!(error = %e, "Lobby sweep failed");
                }
            }
        })
    }
}

/// Notifier that only records the expiry in the log.
pub struct TracingNotifier;

#[async_trait]
impl ExpiryNotifier for TracingNotifier {
    async fn notify_expired(&self, lobby: &LobbyRecord) -> TavernResult<()> {
        debug!(
            chat_id = lobby.chat_id,
            message_id = lobby.message_id,
            leader_id = lobby.leader_id,
            "Lobby expired"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDurableStore;
    use parking_lot::Mutex;
    use std::collections::{BTreeSet, HashMap};
    use tavern_core::types::ChatId;
    use tavern_core::TavernError;

    fn lobby(chat_id: ChatId, expires_at: DateTime<Utc>) -> LobbyRecord {
        LobbyRecord {
            chat_id,
            message_id: chat_id * 10,
            leader_id: 1,
            party_size: 4,
            players: HashMap::from([(1, None)]),
            roles_left: BTreeSet::from(["seer".to_string(), "wolf".to_string()]),
            expires_at,
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<ChatId>>,
        fail: bool,
    }

    #[async_trait]
    impl ExpiryNotifier for RecordingNotifier {
        async fn notify_expired(&self, lobby: &LobbyRecord) -> TavernResult<()> {
            self.seen.lock().push(lobby.chat_id);
            if self.fail {
                Err(TavernError::Notification("message was deleted".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_failed_notification_still_deletes() {
        let store = Arc::new(MemoryDurableStore::new());
        let now = Utc::now();
        store.insert_lobby(lobby(1, now - chrono::Duration::seconds(5)));

        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let sweeper = ExpirySweeper::new(store.clone(), notifier.clone());

        let removed = sweeper.sweep(now).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(*notifier.seen.lock(), vec![1]);
        assert!(!store.has_lobby(1));
    }

    #[tokio::test]
    async fn test_listing_failure_is_reported() {
        let store = Arc::new(MemoryDurableStore::new());
        store.set_online(false);
        let sweeper = ExpirySweeper::new(store, Arc::new(TracingNotifier));
        assert!(sweeper.sweep(Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_spawned_loop_reaps_lobbies() {
        let store = Arc::new(MemoryDurableStore::new());
        store.insert_lobby(lobby(1, Utc::now() - chrono::Duration::seconds(1)));
        let sweeper = Arc::new(ExpirySweeper::new(store.clone(), Arc::new(TracingNotifier)));

        let handle = sweeper.spawn(Duration::from_millis(10));
        for _ in 0..50 {
            if store.lobby_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(store.lobby_count(), 0);
    }
}
