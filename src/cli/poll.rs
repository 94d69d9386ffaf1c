use crate::core::clean::clean;
use crate::core::settings::Settings;
use crate::providers::{Endpoint, HypixelApi, PlayerApi};
use anyhow::{Context, Result};
use serde_json::Value;

pub async fn run(settings: &Settings, uuid: &str, status: bool, json: bool) -> Result<()> {
    if settings.api.key.trim().is_empty() {
        anyhow::bail!("api.key must be set to poll the API");
    }

    let api = HypixelApi::new();

    let player = api
        .fetch(Endpoint::Player, uuid, settings)
        .await
        .map_err(|e| anyhow::anyhow!("[{}] {}", e.category(), e))?;

    let status_body = if status {
        let body = api
            .fetch(Endpoint::Status, uuid, settings)
            .await
            .map_err(|e| anyhow::anyhow!("[{}] {}", e.category(), e))?;
        Some(body)
    } else {
        None
    };

    let snapshot =
        clean(&player, status_body.as_ref()).context("Failed to clean player response")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("Player {uuid}");
    for (key, value) in snapshot.iter() {
        println!("  {:<20} {}", key, format_value(value));
    }

    Ok(())
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
