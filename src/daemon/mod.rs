pub mod dispatch;
pub mod scheduler;

use crate::core::settings::{FileSettings, Settings, SettingsSource};
use crate::core::store::JsonStore;
use crate::providers::HypixelApi;
use anyhow::{Context, Result};
use dispatch::LogDispatcher;
use scheduler::PollScheduler;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn run(settings: Settings, config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting player-poller daemon");

    settings.validate_for_daemon()?;

    let store_path = settings
        .storage
        .store_path()
        .context("Could not determine data directory")?;
    let store = JsonStore::open(&store_path)?;
    tracing::info!(
        path = ?store_path,
        accounts = store.accounts().await.len(),
        "Opened account store"
    );

    let settings_source: Arc<dyn SettingsSource> = match config_path {
        Some(path) if path.exists() => Arc::new(FileSettings::new(path, settings.clone())),
        _ => Arc::new(settings.clone()),
    };

    let mut scheduler = PollScheduler::new(
        Arc::new(HypixelApi::new()),
        Arc::new(store),
        Arc::new(LogDispatcher),
        settings_source,
    )?;
    if let Some(stats_path) = settings.storage.stats_path() {
        scheduler = scheduler.with_stats_path(stats_path);
    }

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");
    shutdown.cancel();

    handle.await.context("Scheduler task panicked")?;
    Ok(())
}
