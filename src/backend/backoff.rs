//! Delay between retry attempts.
//!
//! Batch retries are immediate by default ([`BackoffConfig::immediate`]).
//! For rate-limited cloud APIs, [`BackoffConfig::exponential`] spaces
//! attempts out with exponential growth and jitter. The delay never changes
//! *whether* an attempt is retried, only when.

use crate::PromptError;
use std::time::Duration;

/// Delay strategy applied before each retry attempt.
///
/// # Example
///
/// ```
/// use llm_prompt_batch::backend::BackoffConfig;
/// use std::time::Duration;
///
/// assert_eq!(BackoffConfig::immediate().delay_for_attempt(3), Duration::ZERO);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry. `Duration::ZERO` disables waiting.
    pub initial_delay: Duration,

    /// Multiplier applied to delay after each retry.
    /// Delay grows: initial, initial * multiplier, initial * multiplier^2, ...
    pub multiplier: f64,

    /// Maximum delay between retries.
    pub max_delay: Duration,

    /// Jitter strategy.
    pub jitter: JitterStrategy,

    /// Use the provider's `Retry-After` hint instead of the computed delay
    /// when the failed attempt carried one.
    pub respect_retry_after: bool,
}

/// Jitter strategy to prevent thundering herd on shared rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// No jitter. Delay is exactly the calculated value.
    None,

    /// Full jitter: random value in `[0, calculated_delay]`.
    Full,

    /// Equal jitter: `calculated_delay/2 + random in [0, calculated_delay/2]`.
    Equal,
}

impl BackoffConfig {
    /// Retry immediately, with no delay.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: JitterStrategy::None,
            respect_retry_after: false,
        }
    }

    /// Cloud API defaults: 1s initial, 2x multiplier, 60s max, full jitter,
    /// respects Retry-After.
    pub fn exponential() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::Full,
            respect_retry_after: true,
        }
    }

    /// Calculate the delay for retry N (0-indexed).
    ///
    /// The base delay is `initial_delay * multiplier^attempt`, capped at
    /// `max_delay`. Jitter is then applied according to the configured strategy.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };

        // negative or NaN multipliers and overflowing products
        if !jittered.is_finite() || jittered <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(jittered).unwrap_or(self.max_delay)
    }

    /// Delay before retry `attempt` after `last_error`.
    pub fn delay_after(&self, attempt: u32, last_error: &PromptError) -> Duration {
        if self.respect_retry_after {
            if let PromptError::HttpError {
                retry_after: Some(ra),
                ..
            } = last_error
            {
                return *ra;
            }
        }
        self.delay_for_attempt(attempt)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::immediate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::None,
            respect_retry_after: false,
        }
    }

    #[test]
    fn test_immediate_is_default() {
        let config = BackoffConfig::default();
        for attempt in 0..5 {
            assert_eq!(config.delay_for_attempt(attempt), Duration::ZERO);
        }
    }

    #[test]
    fn test_backoff_delay_exponential() {
        let config = no_jitter();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_delay_capped_at_max() {
        let config = BackoffConfig {
            max_delay: Duration::from_secs(5),
            ..no_jitter()
        };
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_jitter_full_in_range() {
        let config = BackoffConfig::exponential();
        for _ in 0..100 {
            let d = config.delay_for_attempt(1);
            assert!(d <= Duration::from_secs(2), "delay {:?} > 2s", d);
        }
    }

    #[test]
    fn test_retry_after_respected() {
        let config = BackoffConfig {
            respect_retry_after: true,
            ..no_jitter()
        };
        let err = PromptError::HttpError {
            status: 429,
            body: "rate limited".into(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(config.delay_after(0, &err), Duration::from_secs(30));

        let other = PromptError::Service("down".into());
        assert_eq!(config.delay_after(0, &other), Duration::from_secs(1));
    }

    #[test]
    fn test_degenerate_multiplier_does_not_panic() {
        for multiplier in [-2.0, f64::NAN, f64::INFINITY] {
            let config = BackoffConfig {
                multiplier,
                ..no_jitter()
            };
            for attempt in 0..4 {
                assert!(config.delay_for_attempt(attempt) <= Duration::from_secs(60));
            }
        }
        let negative = BackoffConfig {
            multiplier: -2.0,
            ..no_jitter()
        };
        assert_eq!(negative.delay_for_attempt(1), Duration::ZERO);
    }
}
