use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Doubling zero would never escalate, so the first step up from a zero
/// timeout lands here instead.
const ZERO_ESCALATION_FLOOR: Duration = Duration::from_secs(30);
const LAST_HOUR: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_timeout: Duration,
    pub max_timeout: Duration,
    pub reset_after: Duration,
}

/// Exponential backoff state for a single error category.
///
/// Every method takes `now` explicitly. The pending decay back to
/// `base_timeout` is a stored deadline that each `record_error` replaces.
#[derive(Debug, Clone)]
pub struct BackoffTimer {
    config: BackoffConfig,
    current_timeout: Duration,
    pause_for: Duration,
    resume_after: Option<Instant>,
    decay_at: Option<Instant>,
    last_hour: VecDeque<Instant>,
}

impl BackoffTimer {
    pub fn new(config: BackoffConfig) -> Self {
        let config = BackoffConfig {
            max_timeout: config.max_timeout.max(config.base_timeout),
            ..config
        };

        Self {
            config,
            current_timeout: config.base_timeout,
            pause_for: Duration::ZERO,
            resume_after: None,
            decay_at: None,
            last_hour: VecDeque::new(),
        }
    }

    pub fn record_error(&mut self, now: Instant) {
        if self.decayed(now) {
            self.current_timeout = self.config.base_timeout;
        }

        self.pause_for = self.current_timeout;
        self.resume_after = Some(now + self.current_timeout);

        let next = increment(self.current_timeout).max(self.config.base_timeout);
        self.current_timeout = next.clamp(self.config.base_timeout, self.config.max_timeout);

        self.decay_at = Some(now + self.current_timeout.mul_f64(1.25) + self.config.reset_after);

        while self
            .last_hour
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) >= LAST_HOUR)
        {
            self.last_hour.pop_front();
        }
        self.last_hour.push_back(now);
    }

    pub fn is_paused(&self, now: Instant) -> bool {
        self.resume_after.is_some_and(|resume| resume > now)
    }

    /// Length of the most recent pause. Not a countdown; pair it with
    /// [`BackoffTimer::is_paused`].
    pub fn remaining_pause(&self, now: Instant) -> Duration {
        if self.decayed(now) {
            Duration::ZERO
        } else {
            self.pause_for
        }
    }

    pub fn current_timeout(&self, now: Instant) -> Duration {
        if self.decayed(now) {
            self.config.base_timeout
        } else {
            self.current_timeout
        }
    }

    pub fn resume_after(&self) -> Option<Instant> {
        self.resume_after
    }

    pub fn last_hour_count(&self, now: Instant) -> usize {
        self.last_hour
            .iter()
            .filter(|at| now.saturating_duration_since(**at) < LAST_HOUR)
            .count()
    }

    fn decayed(&self, now: Instant) -> bool {
        self.decay_at.is_some_and(|at| at <= now)
    }
}

fn increment(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        ZERO_ESCALATION_FLOOR
    } else {
        timeout.saturating_mul(2)
    }
}
