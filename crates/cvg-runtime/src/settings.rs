//! Config → engine parameters.

use std::time::Duration;

use cvg_config::{RetryConfig, SubmissionConfig};
use cvg_execution::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionSettings {
    pub policy: RetryPolicy,
    pub attempt_timeout: Duration,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self::from_config(&SubmissionConfig::default())
    }
}

impl SubmissionSettings {
    pub fn from_config(cfg: &SubmissionConfig) -> Self {
        let policy = match cfg.retry {
            RetryConfig::Fixed { delay_ms } => {
                RetryPolicy::fixed(cfg.max_attempts, Duration::from_millis(delay_ms))
            }
            RetryConfig::Exponential { base_ms, max_ms } => RetryPolicy::exponential(
                cfg.max_attempts,
                Duration::from_millis(base_ms),
                Duration::from_millis(max_ms),
            ),
        };
        Self {
            policy,
            attempt_timeout: Duration::from_millis(cfg.attempt_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_behaviour() {
        let s = SubmissionSettings::default();
        assert_eq!(
            s.policy,
            RetryPolicy::fixed(5, Duration::from_millis(2_000))
        );
        assert_eq!(s.attempt_timeout, Duration::from_secs(10));
    }

    #[test]
    fn exponential_config_maps_through() {
        let cfg = SubmissionConfig {
            max_attempts: 7,
            attempt_timeout_ms: 500,
            retry: RetryConfig::Exponential {
                base_ms: 50,
                max_ms: 800,
            },
        };
        let s = SubmissionSettings::from_config(&cfg);
        assert_eq!(
            s.policy,
            RetryPolicy::exponential(7, Duration::from_millis(50), Duration::from_millis(800))
        );
    }
}
