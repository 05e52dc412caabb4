//! Configuration for the background loops.
//!
//! Defaults mirror the production deployment (5-minute tick, 1-hour
//! lookahead); tests override with short values.

use std::time::Duration;

use serde::Deserialize;

use crate::error::PulseError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval between reminder scans.
    #[serde(with = "duration_secs")]
    pub tick: Duration,

    /// Forward window each scan covers. Must be >= `tick`, otherwise a
    /// task due between two ticks would never be seen.
    #[serde(with = "duration_secs")]
    pub lookahead: Duration,

    /// Execution cap for one scan batch. A slow batch is abandoned with
    /// a warning rather than blocking subsequent ticks.
    #[serde(with = "duration_secs")]
    pub batch_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5 * 60),
            lookahead: Duration::from_secs(60 * 60),
            batch_timeout: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.tick.is_zero() {
            return Err(PulseError::InvalidConfig(
                "scheduler tick must be non-zero".to_string(),
            ));
        }
        if self.lookahead < self.tick {
            return Err(PulseError::InvalidConfig(format!(
                "lookahead ({:?}) must be >= tick ({:?}) or due times between ticks are missed",
                self.lookahead, self.tick
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Shard count for the connection registry. More shards, less
    /// contention under connection churn.
    pub registry_shards: usize,

    /// Connections silent for longer than this are evicted by the
    /// housekeeping sweep (missed-heartbeat cleanup).
    #[serde(with = "duration_secs")]
    pub idle_ttl: Duration,

    /// Interval of the housekeeping sweep.
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            registry_shards: 16,
            idle_ttl: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.registry_shards == 0 {
            return Err(PulseError::InvalidConfig(
                "registry_shards must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Size of the recurrence engine's recently-seen event window. Bounds
/// memory; duplicates older than this are caught by the store's own
/// state (the task already exists) only probabilistically, which the
/// at-least-once contract tolerates.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub recent_capacity: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            recent_capacity: 4096,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scheduler_config_is_valid() {
        SchedulerConfig::default().validate().unwrap();
    }

    #[test]
    fn lookahead_shorter_than_tick_is_rejected() {
        let config = SchedulerConfig {
            tick: Duration::from_secs(600),
            lookahead: Duration::from_secs(300),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PulseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn configs_deserialize_from_seconds() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"tick": 60, "lookahead": 900}"#).unwrap();
        assert_eq!(config.tick, Duration::from_secs(60));
        assert_eq!(config.lookahead, Duration::from_secs(900));
        // Unspecified fields keep defaults.
        assert_eq!(config.batch_timeout, Duration::from_secs(60));
        config.validate().unwrap();
    }

    #[test]
    fn zero_shards_is_rejected() {
        let config = GatewayConfig {
            registry_shards: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
