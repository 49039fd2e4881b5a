#![warn(clippy::unwrap_used)]

pub mod client;
pub mod connection;
pub mod durable;
pub mod local;
pub mod memory;
pub mod profile;
pub mod session;
pub mod sweeper;

pub use client::{RedisConnector, RedisTier};
pub use connection::{ConnectionManager, VolatileConnector, VolatileHandle, VolatileTier};
pub use durable::{ExpiryNotifier, LobbyStore, ProfileStore, UpsertOutcome};
pub use local::SessionFallback;
pub use profile::ProfileCache;
pub use session::SessionStore;
pub use sweeper::{ExpirySweeper, TracingNotifier};
