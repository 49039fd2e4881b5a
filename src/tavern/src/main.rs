//! Tavern — tiered state layer for the conversational service.
//!
//! Composition root for the background side of the state layer: wires the
//! volatile tier connection, the session store and the lobby sweeper, then
//! runs their loops until interrupted. The profile cache and session store
//! are consumed in-process by the chat front end through `tavern-cache`.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tavern_cache::memory::MemoryDurableStore;
use tavern_cache::{
    ConnectionManager, ExpirySweeper, RedisConnector, SessionStore, TracingNotifier,
};
use tavern_core::config::AppConfig;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tavern")]
#[command(about = "Profile cache, session store and lobby sweeper for the chat service")]
#[command(version)]
struct Cli {
    /// Volatile tier address (overrides config)
    #[arg(long, env = "TAVERN__REDIS__URL")]
    redis_url: Option<String>,

    /// Lobby sweep interval in seconds (overrides config)
    #[arg(long, env = "TAVERN__SWEEPER__INTERVAL_SECS")]
    sweep_interval_secs: Option<u64>,

    /// Maximum chat history length (overrides config)
    #[arg(long, env = "TAVERN__CACHE__MAX_HISTORY_LEN")]
    max_history_len: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tavern=info,tavern_cache=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Tavern starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(url) = cli.redis_url {
        config.redis.url = Some(url);
    }
    if let Some(secs) = cli.sweep_interval_secs {
        config.sweeper.interval_secs = secs;
    }
    if let Some(len) = cli.max_history_len {
        config.cache.max_history_len = len;
    }

    config.validate()?;

    info!(
        profile_ttl_secs = config.cache.profile_ttl_secs,
        session_ttl_secs = config.cache.session_ttl_secs,
        max_history_len = config.cache.max_history_len,
        sweep_interval_secs = config.sweeper.interval_secs,
        "Configuration loaded"
    );

    let connections = Arc::new(ConnectionManager::from_config(
        &config.redis,
        Arc::new(RedisConnector),
    ));
    if let Err(e) = connections.open().await {
        error!(error = %e, "Volatile tier unavailable at startup, running degraded");
    }

    // The durable store is provided by the hosting service; standalone runs
    // keep it in memory.
    warn!("No durable backend attached, using in-memory store");
    let durable = Arc::new(MemoryDurableStore::new());

    let sessions = Arc::new(SessionStore::new(
        connections.clone(),
        config.cache.session_ttl(),
        config.cache.max_history_len,
    ));

    let sweeper = Arc::new(ExpirySweeper::new(durable.clone(), Arc::new(TracingNotifier)));
    let sweeper_task = sweeper.spawn(config.sweeper.interval());

    // Spawn session fallback maintenance task
    let sessions_for_maintenance = sessions.clone();
    let maintenance_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            sessions_for_maintenance.maintenance();
        }
    });

    info!(max_history = sessions.max_history(), "Tavern is ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    sweeper_task.abort();
    maintenance_task.abort();
    connections.close().await;

    info!("Tavern stopped");
    Ok(())
}
