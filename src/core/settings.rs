use crate::core::backoff::BackoffConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub polling: PollingSettings,
    pub storage: StorageSettings,
    pub backoff: BackoffSettings,
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub key: String,
    pub base_url: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            key: String::new(),
            base_url: "https://api.hypixel.net".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub timeout_ms: u64,
    pub retry_limit: u32,
    pub disabled_interval_secs: u64,
    pub idle_interval_secs: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
            timeout_ms: 5000,
            retry_limit: 2,
            disabled_interval_secs: 10,
            idle_interval_secs: 10,
        }
    }
}

impl PollingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn disabled_interval(&self) -> Duration {
        Duration::from_secs(self.disabled_interval_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub path: Option<PathBuf>,
    pub stats_path: Option<PathBuf>,
}

impl StorageSettings {
    pub fn store_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| dirs::data_dir().map(|p| p.join("player-poller").join("store.json")))
    }

    pub fn stats_path(&self) -> Option<PathBuf> {
        self.stats_path
            .clone()
            .or_else(|| dirs::cache_dir().map(|p| p.join("player-poller").join("backoff.json")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub abort: TimerSettings,
    pub generic: TimerSettings,
    pub http: TimerSettings,
    pub rate_limit: TimerSettings,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            abort: TimerSettings {
                base_secs: 0,
                max_secs: 30 * 60,
                reset_after_secs: 60 * 60,
            },
            generic: TimerSettings {
                base_secs: 30,
                ..TimerSettings::default()
            },
            http: TimerSettings::default(),
            rate_limit: TimerSettings::default(),
        }
    }
}

impl BackoffSettings {
    fn categories(&self) -> [(&'static str, &TimerSettings); 4] {
        [
            ("abort", &self.abort),
            ("generic", &self.generic),
            ("http", &self.http),
            ("rate_limit", &self.rate_limit),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    pub base_secs: u64,
    pub max_secs: u64,
    pub reset_after_secs: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            base_secs: 60,
            max_secs: 30 * 60,
            reset_after_secs: 5 * 60,
        }
    }
}

impl TimerSettings {
    pub fn to_config(&self) -> BackoffConfig {
        BackoffConfig {
            base_timeout: Duration::from_secs(self.base_secs),
            max_timeout: Duration::from_secs(self.max_secs),
            reset_after: Duration::from_secs(self.reset_after_secs),
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("player-poller").join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path().context("Could not determine config directory")?;

        if !path.exists() {
            tracing::info!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::debug!(?path, "Loaded config");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.polling.requests_per_minute == 0 {
            anyhow::bail!("polling.requests_per_minute must be at least 1");
        }
        if self.polling.timeout_ms == 0 {
            anyhow::bail!("polling.timeout_ms must be at least 1");
        }
        for (name, timer) in self.backoff.categories() {
            if timer.base_secs > timer.max_secs {
                anyhow::bail!(
                    "backoff.{name}.base_secs ({}) must not exceed max_secs ({})",
                    timer.base_secs,
                    timer.max_secs
                );
            }
        }
        Ok(())
    }

    /// Validation for running the daemon, which also needs credentials.
    pub fn validate_for_daemon(&self) -> Result<()> {
        self.validate()?;
        if self.api.key.trim().is_empty() {
            anyhow::bail!("api.key must be set to poll the API");
        }
        Ok(())
    }
}

/// Where the scheduler gets its settings on every loop iteration.
pub trait SettingsSource: Send + Sync {
    fn current(&self) -> Result<Settings>;
}

impl SettingsSource for Settings {
    fn current(&self) -> Result<Settings> {
        Ok(self.clone())
    }
}

/// Re-reads the config file on each load, falling back to the last
/// settings that parsed and validated.
pub struct FileSettings {
    path: PathBuf,
    last_good: Mutex<Settings>,
}

impl FileSettings {
    pub fn new(path: PathBuf, initial: Settings) -> Self {
        Self {
            path,
            last_good: Mutex::new(initial),
        }
    }
}

impl SettingsSource for FileSettings {
    fn current(&self) -> Result<Settings> {
        let fresh = Settings::load_from(&self.path).and_then(|s| s.validate().map(|_| s));

        let mut last_good = self
            .last_good
            .lock()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;

        match fresh {
            Ok(settings) => {
                *last_good = settings.clone();
                Ok(settings)
            }
            Err(e) => {
                tracing::warn!(error = %e, path = ?self.path, "Failed to reload config, keeping previous");
                Ok(last_good.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.polling.enabled);
        assert_eq!(settings.polling.requests_per_minute, 60);
        assert_eq!(settings.polling.retry_limit, 2);
        assert_eq!(settings.polling.timeout(), Duration::from_secs(5));
        assert_eq!(settings.backoff.abort.base_secs, 0);
        assert_eq!(settings.backoff.generic.base_secs, 30);
        assert_eq!(settings.backoff.http.base_secs, 60);
        assert_eq!(settings.backoff.rate_limit.reset_after_secs, 300);
        assert!(!settings.debug);
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.validate_for_daemon().is_err());

        settings.api.key = "key".to_string();
        assert!(settings.validate_for_daemon().is_ok());

        settings.polling.requests_per_minute = 0;
        assert!(settings.validate().is_err());

        settings.polling.requests_per_minute = 60;
        settings.backoff.http.base_secs = 4000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            debug = true

            [api]
            key = "abc"

            [polling]
            enabled = false
            requests_per_minute = 120
            retry_limit = 4

            [backoff.rate_limit]
            base_secs = 90
        "#;

        let settings: Settings = toml::from_str(toml).unwrap();
        assert!(settings.debug);
        assert_eq!(settings.api.key, "abc");
        assert_eq!(settings.api.base_url, "https://api.hypixel.net");
        assert!(!settings.polling.enabled);
        assert_eq!(settings.polling.requests_per_minute, 120);
        assert_eq!(settings.polling.retry_limit, 4);
        assert_eq!(settings.polling.timeout_ms, 5000);
        assert_eq!(settings.backoff.rate_limit.base_secs, 90);
        assert_eq!(settings.backoff.rate_limit.max_secs, 1800);
    }

    #[test]
    fn test_file_settings_keeps_last_good_on_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[polling]\nrequests_per_minute = 30").unwrap();

        let source = FileSettings::new(file.path().to_path_buf(), Settings::default());
        assert_eq!(source.current().unwrap().polling.requests_per_minute, 30);

        std::fs::write(file.path(), "[polling\nbroken").unwrap();
        assert_eq!(source.current().unwrap().polling.requests_per_minute, 30);

        std::fs::write(file.path(), "[polling]\nenabled = false").unwrap();
        assert!(!source.current().unwrap().polling.enabled);
    }
}
