use crate::core::errors::CategoryStats;
use crate::core::settings::Settings;
use crate::core::store::JsonStore;
use crate::daemon::scheduler::StatsFile;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize)]
struct StatusOutput {
    polling_enabled: bool,
    requests_per_minute: u32,
    accounts: Vec<AccountStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    backoff: Option<StatsFile>,
}

#[derive(Serialize)]
struct AccountStatus {
    id: String,
    uuid: String,
    polling: bool,
    online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_snapshot: Option<DateTime<Utc>>,
}

pub async fn run(settings: &Settings, json: bool) -> Result<()> {
    let store_path = settings
        .storage
        .store_path()
        .context("Could not determine data directory")?;
    let store = JsonStore::open(&store_path)?;

    let mut accounts = Vec::new();
    for account in store.accounts().await {
        let last_snapshot = store
            .stored_snapshot(&account.id)
            .await
            .map(|s| s.updated_at);
        accounts.push(AccountStatus {
            online: account.appears_online(),
            id: account.id,
            uuid: account.uuid,
            polling: account.polling,
            last_snapshot,
        });
    }

    let backoff = settings.storage.stats_path().and_then(|path| {
        let content = std::fs::read_to_string(&path).ok()?;
        serde_json::from_str::<StatsFile>(&content).ok()
    });

    let output = StatusOutput {
        polling_enabled: settings.polling.enabled,
        requests_per_minute: settings.polling.requests_per_minute,
        accounts,
        backoff,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text_output(&output);
    }

    Ok(())
}

fn print_text_output(output: &StatusOutput) {
    println!(
        "Polling: {} ({} requests/minute)",
        if output.polling_enabled { "enabled" } else { "disabled" },
        output.requests_per_minute
    );
    println!();

    if output.accounts.is_empty() {
        println!("No accounts tracked");
    }

    for account in &output.accounts {
        let last = account
            .last_snapshot
            .map(format_age)
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {:<20} {:<36} {:<8} last change {}",
            account.id,
            account.uuid,
            if !account.polling {
                "off"
            } else if account.online {
                "online"
            } else {
                "offline"
            },
            last
        );
    }

    let Some(backoff) = &output.backoff else {
        return;
    };

    println!();
    println!("Backoff (as of {})", format_age(backoff.written_at));
    for stats in &backoff.categories {
        print_backoff_line(stats);
    }
}

fn print_backoff_line(stats: &CategoryStats) {
    let state = if stats.paused {
        format!("paused {}s", stats.resume_in_ms / 1000)
    } else {
        "ok".to_string()
    };

    println!(
        "  {:<12} {:<14} next timeout {:>5}s, {} in the last hour",
        format!("{}:", stats.category),
        state,
        stats.current_timeout_ms / 1000,
        stats.last_hour_count
    );
}

fn format_age(at: DateTime<Utc>) -> String {
    let seconds = Utc::now().signed_duration_since(at).num_seconds();

    if seconds < 60 {
        return "just now".to_string();
    }

    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{}d {}h ago", days, hours % 24)
    } else if hours > 0 {
        format!("{}h {:02}m ago", hours, minutes % 60)
    } else {
        format!("{}m ago", minutes)
    }
}
