use crate::core::backoff::BackoffTimer;
use crate::core::settings::BackoffSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Abort,
    Generic,
    Http,
    RateLimit,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 4] = [
        ErrorCategory::Abort,
        ErrorCategory::Generic,
        ErrorCategory::Http,
        ErrorCategory::RateLimit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ErrorCategory::Abort => "abort",
            ErrorCategory::Generic => "generic",
            ErrorCategory::Http => "http",
            ErrorCategory::RateLimit => "rate_limit",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryStats {
    pub category: ErrorCategory,
    pub paused: bool,
    pub last_hour_count: usize,
    pub current_timeout_ms: u64,
    pub resume_in_ms: u64,
}

/// Process-wide error state: one backoff timer per category.
#[derive(Debug, Clone)]
pub struct ErrorAggregate {
    abort: BackoffTimer,
    generic: BackoffTimer,
    http: BackoffTimer,
    rate_limit: BackoffTimer,
}

impl ErrorAggregate {
    pub fn new(settings: &BackoffSettings) -> Self {
        Self {
            abort: BackoffTimer::new(settings.abort.to_config()),
            generic: BackoffTimer::new(settings.generic.to_config()),
            http: BackoffTimer::new(settings.http.to_config()),
            rate_limit: BackoffTimer::new(settings.rate_limit.to_config()),
        }
    }

    pub fn add_abort(&mut self, now: Instant) {
        self.abort.record_error(now);
    }

    pub fn add_generic(&mut self, now: Instant) {
        self.generic.record_error(now);
    }

    pub fn add_http(&mut self, now: Instant) {
        self.http.record_error(now);
    }

    pub fn add_rate_limit(&mut self, now: Instant) {
        self.rate_limit.record_error(now);
    }

    pub fn record(&mut self, category: ErrorCategory, now: Instant) {
        match category {
            ErrorCategory::Abort => self.add_abort(now),
            ErrorCategory::Generic => self.add_generic(now),
            ErrorCategory::Http => self.add_http(now),
            ErrorCategory::RateLimit => self.add_rate_limit(now),
        }
    }

    pub fn timer(&self, category: ErrorCategory) -> &BackoffTimer {
        match category {
            ErrorCategory::Abort => &self.abort,
            ErrorCategory::Generic => &self.generic,
            ErrorCategory::Http => &self.http,
            ErrorCategory::RateLimit => &self.rate_limit,
        }
    }

    fn timers(&self) -> impl Iterator<Item = (ErrorCategory, &BackoffTimer)> {
        ErrorCategory::ALL
            .into_iter()
            .map(move |category| (category, self.timer(category)))
    }

    pub fn is_paused(&self, now: Instant) -> bool {
        self.timers().any(|(_, timer)| timer.is_paused(now))
    }

    /// Longest pause among the categories that are paused right now.
    pub fn pause_duration(&self, now: Instant) -> Duration {
        self.timers()
            .filter(|(_, timer)| timer.is_paused(now))
            .map(|(_, timer)| timer.remaining_pause(now))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    pub fn stats(&self, now: Instant) -> Vec<CategoryStats> {
        self.timers()
            .map(|(category, timer)| CategoryStats {
                category,
                paused: timer.is_paused(now),
                last_hour_count: timer.last_hour_count(now),
                current_timeout_ms: timer.current_timeout(now).as_millis() as u64,
                resume_in_ms: timer
                    .resume_after()
                    .map(|resume| resume.saturating_duration_since(now).as_millis() as u64)
                    .unwrap_or(0),
            })
            .collect()
    }
}

impl Default for ErrorAggregate {
    fn default() -> Self {
        Self::new(&BackoffSettings::default())
    }
}
