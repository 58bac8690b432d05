//! Retry policy for transient storage contention.
//!
//! Delay grows as base * 2^attempt, randomized by the jitter factor and
//! capped at max_delay_ms. The attempt limit lives here too, so the whole
//! policy is one injectable, serializable object.

use std::time::Duration;

use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Retry policy consumed by the pipeline writer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts before a task is reported failed (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Randomization applied to each delay (0.0 = none, 0.5 = +/-50%).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_jitter_factor() -> f64 {
    0.25
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries (useful in tests).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_attempts == 0 {
            return Err(PipelineError::InvalidPolicy(
                "max_attempts must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(PipelineError::InvalidPolicy(format!(
                "jitter_factor must be 0.0-1.0, got {}",
                self.jitter_factor
            )));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(PipelineError::InvalidPolicy(
                "max_delay_ms must be >= base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the stateful backoff generator for one task execution.
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.base_delay_ms),
            current_interval: Duration::from_millis(self.base_delay_ms),
            randomization_factor: self.jitter_factor,
            multiplier: 2.0,
            max_interval: Duration::from_millis(self.max_delay_ms),
            // Attempts are bounded by max_attempts, not elapsed time
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}
