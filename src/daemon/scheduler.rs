use crate::core::clean::{clean, CleanError};
use crate::core::diff::diff;
use crate::core::errors::{CategoryStats, ErrorAggregate, ErrorCategory};
use crate::core::models::Account;
use crate::core::settings::{Settings, SettingsSource};
use crate::core::store::AccountStore;
use crate::daemon::dispatch::ModuleDispatcher;
use crate::providers::request::RequestError;
use crate::providers::{Endpoint, PlayerApi};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why polling cannot proceed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    Paused(Duration),
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassReport {
    Paused {
        sleep: Duration,
    },
    Disabled {
        sleep: Duration,
    },
    Idle {
        sleep: Duration,
    },
    Completed {
        processed: usize,
        failed: usize,
    },
    Abandoned {
        processed: usize,
        failed: usize,
        reason: Halt,
    },
    Cancelled,
}

impl PassReport {
    fn sleep(&self) -> Duration {
        match self {
            PassReport::Paused { sleep }
            | PassReport::Disabled { sleep }
            | PassReport::Idle { sleep } => *sleep,
            _ => Duration::ZERO,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum PollError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Clean(#[from] CleanError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl PollError {
    fn category(&self) -> ErrorCategory {
        match self {
            PollError::Request(e) => e.category(),
            PollError::Clean(_) | PollError::Store(_) => ErrorCategory::Generic,
        }
    }

    fn url(&self) -> Option<&str> {
        match self {
            PollError::Request(e) => e.url(),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsFile {
    pub written_at: DateTime<Utc>,
    pub categories: Vec<CategoryStats>,
}

/// Spacing between requests that keeps the whole loop inside the budget.
pub fn pacing_delay(requests_per_minute: u32, urls: usize) -> Duration {
    let per_request = Duration::from_secs(60) / requests_per_minute.max(1);
    per_request * urls as u32
}

/// `status` only carries data while the player is online.
pub fn endpoints_for(account: &Account) -> Vec<Endpoint> {
    if account.appears_online() {
        vec![Endpoint::Player, Endpoint::Status]
    } else {
        vec![Endpoint::Player]
    }
}

pub struct PollScheduler {
    api: Arc<dyn PlayerApi>,
    store: Arc<dyn AccountStore>,
    dispatcher: Arc<dyn ModuleDispatcher>,
    settings_source: Arc<dyn SettingsSource>,
    settings: Settings,
    errors: ErrorAggregate,
    stats_path: Option<PathBuf>,
}

impl PollScheduler {
    /// Loads settings once up front; failing here is fatal. Backoff timers
    /// are built from these settings and live for the whole process.
    pub fn new(
        api: Arc<dyn PlayerApi>,
        store: Arc<dyn AccountStore>,
        dispatcher: Arc<dyn ModuleDispatcher>,
        settings_source: Arc<dyn SettingsSource>,
    ) -> Result<Self> {
        let settings = settings_source.current()?;
        settings.validate()?;

        Ok(Self {
            api,
            store,
            dispatcher,
            errors: ErrorAggregate::new(&settings.backoff),
            settings_source,
            settings,
            stats_path: None,
        })
    }

    pub fn with_stats_path(mut self, path: PathBuf) -> Self {
        self.stats_path = Some(path);
        self
    }

    pub fn errors(&self) -> &ErrorAggregate {
        &self.errors
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("Polling scheduler started");

        while !shutdown.is_cancelled() {
            let report = self.run_pass(&shutdown).await;
            self.write_stats().await;

            match &report {
                PassReport::Cancelled => break,
                PassReport::Paused { sleep } => {
                    tracing::info!(sleep_secs = sleep.as_secs(), "Polling paused after errors");
                }
                PassReport::Completed { processed, failed }
                | PassReport::Abandoned {
                    processed, failed, ..
                } => {
                    tracing::debug!(processed, failed, "Pass finished");
                }
                _ => {}
            }

            let sleep = report.sleep();
            if !sleep.is_zero() && !sleep_or_cancel(sleep, &shutdown).await {
                break;
            }
        }

        tracing::info!("Polling scheduler stopped");
    }

    /// One loop iteration: either a halt report with the sleep to apply, or
    /// a walk over the account list.
    pub async fn run_pass(&mut self, shutdown: &CancellationToken) -> PassReport {
        let settings = self.refresh_settings();

        match self.halt(&settings, Instant::now()) {
            Some(Halt::Paused(sleep)) => return PassReport::Paused { sleep },
            Some(Halt::Disabled) => {
                return PassReport::Disabled {
                    sleep: settings.polling.disabled_interval(),
                }
            }
            None => {}
        }

        let accounts = match self.store.list_polling_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                self.record_failure(None, &PollError::Store(e));
                return PassReport::Idle {
                    sleep: settings.polling.idle_interval(),
                };
            }
        };

        if accounts.is_empty() {
            return PassReport::Idle {
                sleep: settings.polling.idle_interval(),
            };
        }

        let mut processed = 0;
        let mut failed = 0;

        for account in &accounts {
            if shutdown.is_cancelled() {
                return PassReport::Cancelled;
            }

            let settings = self.refresh_settings();
            if let Some(reason) = self.halt(&settings, Instant::now()) {
                tracing::info!(
                    ?reason,
                    remaining = accounts.len() - processed - failed,
                    "Abandoning pass"
                );
                return PassReport::Abandoned {
                    processed,
                    failed,
                    reason,
                };
            }

            match self.poll_account(account, &settings).await {
                Ok(urls) => {
                    processed += 1;
                    let delay = pacing_delay(settings.polling.requests_per_minute, urls);
                    if !sleep_or_cancel(delay, shutdown).await {
                        return PassReport::Cancelled;
                    }
                }
                Err(e) => {
                    failed += 1;
                    self.record_failure(Some(account), &e);
                }
            }
        }

        PassReport::Completed { processed, failed }
    }

    fn halt(&self, settings: &Settings, now: Instant) -> Option<Halt> {
        if self.errors.is_paused(now) {
            Some(Halt::Paused(self.errors.pause_duration(now)))
        } else if !settings.polling.enabled {
            Some(Halt::Disabled)
        } else {
            None
        }
    }

    fn refresh_settings(&mut self) -> Settings {
        match self.settings_source.current() {
            Ok(settings) => self.settings = settings,
            Err(e) => tracing::warn!(error = %e, "Failed to load settings, keeping previous"),
        }
        self.settings.clone()
    }

    /// Returns the number of URLs fetched.
    async fn poll_account(&self, account: &Account, settings: &Settings) -> Result<usize, PollError> {
        let endpoints = endpoints_for(account);

        let player = self.api.fetch(Endpoint::Player, &account.uuid, settings);
        let (player, status) = if endpoints.contains(&Endpoint::Status) {
            let status = self.api.fetch(Endpoint::Status, &account.uuid, settings);
            let (player, status) = tokio::try_join!(player, status)?;
            (player, Some(status))
        } else {
            (player.await?, None)
        };

        let snapshot = clean(&player, status.as_ref())?;
        let previous = self.store.read_snapshot(&account.id).await?;
        let changes = diff(&snapshot, previous.as_ref());

        if !changes.is_empty() {
            self.store
                .write_snapshot(&account.id, &snapshot, Utc::now())
                .await?;
        }

        if let Err(e) = self.dispatcher.dispatch(account, &snapshot, &changes).await {
            tracing::warn!(account = %account.id, error = %e, "Module dispatch failed");
        }

        Ok(endpoints.len())
    }

    fn record_failure(&mut self, account: Option<&Account>, error: &PollError) {
        let category = error.category();
        self.errors.record(category, Instant::now());

        tracing::error!(
            account = account.map(|a| a.id.as_str()),
            %category,
            url = error.url(),
            error = %error,
            "Polling failed"
        );
    }

    async fn write_stats(&self) {
        let Some(path) = &self.stats_path else {
            return;
        };

        let stats = StatsFile {
            written_at: Utc::now(),
            categories: self.errors.stats(Instant::now()),
        };

        let result = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = serde_json::to_string_pretty(&stats)?;
            tokio::fs::write(path, content).await?;
            anyhow::Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(?path, error = %e, "Failed to write backoff stats");
        }
    }
}

/// Returns false when shutdown was requested before the sleep finished.
async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => !shutdown.is_cancelled(),
    }
}
