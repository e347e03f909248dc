//! Router tuning and retry policy contracts that can be shared across crates.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::{period, Granularity};

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_initial_backoff", with = "period")]
    pub initial_backoff: Duration,

    /// Upper bound for any single delay
    #[serde(default = "default_max_backoff", with = "period")]
    pub max_backoff: Duration,

    /// Growth factor between consecutive delays
    #[validate(range(min = 1.0, max = 10.0))]
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits (tests)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Accepted timestamp range (seconds since epoch), inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimestampRange {
    #[serde(default = "default_min_seconds")]
    pub min_seconds: f64,
    #[serde(default = "default_max_seconds")]
    pub max_seconds: f64,
}

fn default_min_seconds() -> f64 {
    0.0
}

/// 9999-12-31T23:59:59Z
fn default_max_seconds() -> f64 {
    253_402_300_799.0
}

impl Default for TimestampRange {
    fn default() -> Self {
        Self {
            min_seconds: default_min_seconds(),
            max_seconds: default_max_seconds(),
        }
    }
}

impl TimestampRange {
    pub fn contains(&self, seconds: f64) -> bool {
        seconds >= self.min_seconds && seconds <= self.max_seconds
    }
}

/// Router tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RouterTuning {
    /// Bucket size
    #[serde(default = "default_segment_granularity")]
    pub segment_granularity: Granularity,

    /// Grace period after bucket end during which late records are accepted
    #[serde(default = "default_window_period", with = "period")]
    pub window_period: Duration,

    /// How far ahead of the clock partitions are opened eagerly
    #[serde(default, with = "period")]
    pub warming_period: Duration,

    /// Destinations sharing one bucket's records
    #[validate(range(min = 1, max = 1024))]
    #[serde(default = "default_one")]
    pub partitions: u32,

    /// Copies of each partition that must all accept a record
    #[validate(range(min = 1, max = 16))]
    #[serde(default = "default_one")]
    pub replicants: u32,

    /// Period of the expiry sweep
    #[serde(default = "default_sweep_interval", with = "period")]
    pub sweep_interval: Duration,

    /// Sane timestamp range; records outside it are invalid
    #[serde(default)]
    pub timestamp_range: TimestampRange,
}

fn default_segment_granularity() -> Granularity {
    Granularity::Hour
}

fn default_window_period() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_one() -> u32 {
    1
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(15)
}

impl Default for RouterTuning {
    fn default() -> Self {
        Self {
            segment_granularity: default_segment_granularity(),
            window_period: default_window_period(),
            warming_period: Duration::ZERO,
            partitions: default_one(),
            replicants: default_one(),
            timestamp_range: TimestampRange::default(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl RouterTuning {
    /// Number of destinations registered per partition key
    pub fn destinations_per_key(&self) -> usize {
        (self.partitions as usize) * (self.replicants as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert!(policy.allows_retry(4));
        assert!(!policy.allows_retry(5));
    }

    #[test]
    fn test_tuning_defaults_from_empty_toml_table() {
        let tuning: RouterTuning = serde_json::from_str("{}").unwrap();
        assert_eq!(tuning.segment_granularity, Granularity::Hour);
        assert_eq!(tuning.window_period, Duration::from_secs(600));
        assert_eq!(tuning.destinations_per_key(), 1);
    }

    #[test]
    fn test_tuning_iso_periods() {
        let tuning: RouterTuning =
            serde_json::from_str(r#"{"window_period":"PT10M","warming_period":"PT5M","replicants":2}"#)
                .unwrap();
        assert_eq!(tuning.warming_period, Duration::from_secs(300));
        assert_eq!(tuning.destinations_per_key(), 2);
    }

    #[test]
    fn test_validator_ranges() {
        let tuning = RouterTuning {
            partitions: 0,
            ..Default::default()
        };
        assert!(tuning.validate().is_err());
    }
}
