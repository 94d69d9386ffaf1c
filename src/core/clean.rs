use crate::core::models::CleanSnapshot;
use serde_json::Value;

/// `(snapshot key, player field)`
const PLAYER_FIELDS: &[(&str, &str)] = &[
    ("firstLogin", "firstLogin"),
    ("lastLogin", "lastLogin"),
    ("lastLogout", "lastLogout"),
    ("version", "mcVersionRp"),
    ("language", "userLanguage"),
    ("lastClaimedReward", "lastClaimedReward"),
    ("rewardScore", "rewardScore"),
    ("rewardHighScore", "rewardHighScore"),
    ("totalDailyRewards", "totalDailyRewards"),
    ("totalRewards", "totalRewards"),
];

/// `(snapshot key, session field)`
const SESSION_FIELDS: &[(&str, &str)] = &[
    ("online", "online"),
    ("gameType", "gameType"),
    ("gameMode", "mode"),
    ("gameMap", "map"),
];

#[derive(Debug, thiserror::Error)]
pub enum CleanError {
    #[error("API reported failure: {0}")]
    Unsuccessful(String),

    #[error("response did not contain a player object")]
    MissingPlayer,
}

/// Flattens the `player` body, and the `status` body when one was fetched,
/// into a [`CleanSnapshot`].
pub fn clean(player: &Value, status: Option<&Value>) -> Result<CleanSnapshot, CleanError> {
    ensure_success(player)?;
    if let Some(status) = status {
        ensure_success(status)?;
    }

    let player = player
        .get("player")
        .filter(|p| p.is_object())
        .ok_or(CleanError::MissingPlayer)?;

    let mut snapshot = CleanSnapshot::new();

    for (key, field) in PLAYER_FIELDS {
        snapshot.insert(*key, scalar(player.get(field)));
    }

    let session = status.and_then(|s| s.get("session"));
    for (key, field) in SESSION_FIELDS {
        snapshot.insert(*key, scalar(session.and_then(|s| s.get(field))));
    }

    Ok(snapshot)
}

fn ensure_success(body: &Value) -> Result<(), CleanError> {
    if body.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(());
    }

    let cause = body
        .get("cause")
        .and_then(Value::as_str)
        .unwrap_or("no cause given");
    Err(CleanError::Unsuccessful(cause.to_string()))
}

fn scalar(value: Option<&Value>) -> Value {
    match value {
        Some(v @ (Value::Bool(_) | Value::Number(_) | Value::String(_))) => v.clone(),
        _ => Value::Null,
    }
}
