//! Retry policy with exponential backoff and jitter.

use std::time::Duration;

use serde::Deserialize;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay: Duration },
    /// `base * factor^attempt`, capped at `max`, optionally jittered by +/- 50%.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped = if seconds.is_finite() {
                    seconds.min(max.as_secs_f64()).max(0.0)
                } else {
                    max.as_secs_f64()
                };
                let delay = Duration::from_secs_f64(capped);

                if !jitter {
                    return delay;
                }
                let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                let spread = millis / 2;
                let offset = fastrand::u64(0..=spread.saturating_mul(2));
                Duration::from_millis((millis - spread).saturating_add(offset))
            }
        }
    }
}

/// Retry policy for one upstream request.
///
/// Total attempts = `max_retries + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff: Backoff,
    /// HTTP statuses treated as transient.
    pub retry_on_status: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            backoff: Backoff::default(),
            retry_on_status: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// `[retry]` table of the pipeline configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay_ms: 500,
            factor: 2.0,
            max_delay_ms: 8_000,
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(settings.base_delay_ms),
                factor: settings.factor,
                max: Duration::from_millis(settings.max_delay_ms),
                jitter: settings.jitter,
            },
            ..Self::default()
        }
    }
}
