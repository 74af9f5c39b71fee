use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use permission_groups::config::AppConfig;
use permission_groups::logging::init_logging;
use permission_groups::members::wait_all;
use permission_groups::scheduler::spawn_ticker;
use permission_groups::{GroupManager, MemberManager, MemoryStore, SyncEvent, SyncReporter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => AppConfig::default(),
    };
    let _log_guard = init_logging(&config.logging);
    info!(defaults = ?config.default_groups, "Starting permission registry");

    // Store outcomes
    let (event_sender, mut event_receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = event_receiver.recv().await {
            if let SyncEvent::Failed { op, key, error } = event {
                warn!(%op, key = %key, error = %error, "Store write lost");
            }
        }
    });
    let reporter = SyncReporter::with_events(event_sender);

    let store = Arc::new(MemoryStore::new());
    let members = Arc::new(MemberManager::new(
        store.clone(),
        reporter.clone(),
        config.default_groups.clone(),
    ));
    let groups = GroupManager::new(store, members.clone(), reporter);

    for name in &config.default_groups {
        let status = groups.register_group(name, 0, Vec::<String>::new(), true).await;
        info!(group = %name, ?status, "Registered default group");
    }

    let ticker = spawn_ticker(members.clone(), config.tick_interval());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    ticker.abort();
    let pending = members.close().await;
    if tokio::time::timeout(config.shutdown_flush_timeout(), wait_all(pending))
        .await
        .is_err()
    {
        warn!("Gave up waiting for member flushes");
    }

    Ok(())
}
