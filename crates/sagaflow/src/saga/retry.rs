//! Per-step retry policy: failure classification and exponential backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::saga::error::AttemptError;
use crate::{serde_dur, serde_dur_option};

/// Backoff configuration consulted by the executor between attempts of a step.
///
/// The delay before retry `n` (1-based) is `base_delay * multiplier^(n-1)`,
/// capped at `max_delay`, then spread by `jitter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryPolicy {
	#[serde(default = "default_base_delay", with = "serde_dur")]
	pub base_delay: Duration,

	#[serde(default = "default_multiplier")]
	pub multiplier: f64,

	#[serde(default = "default_max_delay", with = "serde_dur")]
	pub max_delay: Duration,

	/// Fraction of the computed delay to randomize by, in `[0.0, 1.0]`
	#[serde(default)]
	pub jitter: f64,

	/// Whether an attempt that hit its timeout may be retried
	#[serde(default = "default_retry_on_timeout")]
	pub retry_on_timeout: bool,

	/// Upper bound for the whole retry sequence of one step, if any
	#[serde(default, skip_serializing_if = "Option::is_none", with = "serde_dur_option")]
	pub max_elapsed: Option<Duration>,
}

fn default_base_delay() -> Duration {
	Duration::from_millis(100)
}

fn default_multiplier() -> f64 {
	2.0
}

fn default_max_delay() -> Duration {
	Duration::from_secs(10)
}

fn default_retry_on_timeout() -> bool {
	true
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			base_delay: default_base_delay(),
			multiplier: default_multiplier(),
			max_delay: default_max_delay(),
			jitter: 0.0,
			retry_on_timeout: default_retry_on_timeout(),
			max_elapsed: None,
		}
	}
}

impl RetryPolicy {
	/// Fixed delay between attempts.
	pub fn fixed(delay: Duration) -> Self {
		Self {
			base_delay: delay,
			multiplier: 1.0,
			max_delay: delay,
			..Default::default()
		}
	}

	/// Retry immediately. Mostly useful in tests.
	pub fn immediate() -> Self {
		Self::fixed(Duration::ZERO)
	}

	pub fn with_jitter(mut self, jitter: f64) -> Self {
		self.jitter = jitter.clamp(0.0, 1.0);
		self
	}

	/// Whether the failed attempt is eligible for another try.
	pub fn should_retry(&self, err: &AttemptError) -> bool {
		match err {
			AttemptError::Step(e) => e.is_retryable(),
			AttemptError::Timeout(_) => self.retry_on_timeout,
			AttemptError::Panicked(_) => false,
		}
	}

	/// Delay before the given retry (1 for the first retry) without jitter.
	pub fn base_delay_for(&self, retry: u32) -> Duration {
		let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
		let factor = self.multiplier.max(1.0).powi(exponent);
		let nanos = self.base_delay.as_nanos() as f64 * factor;
		let capped = nanos.min(self.max_delay.as_nanos() as f64);
		if capped.is_finite() && capped > 0.0 {
			Duration::from_nanos(capped as u64)
		} else if capped.is_finite() {
			Duration::ZERO
		} else {
			self.max_delay
		}
	}

	/// Delay before the given retry with jitter applied, never above `max_delay`.
	pub fn delay_for(&self, retry: u32) -> Duration {
		let delay = self.base_delay_for(retry);
		let jitter = self.jitter.clamp(0.0, 1.0);
		if jitter == 0.0 || delay.is_zero() {
			return delay;
		}
		let nanos = delay.as_nanos() as f64;
		let spread = nanos * jitter;
		let low = (nanos - spread).max(0.0);
		let high = (nanos + spread).min(self.max_delay.as_nanos() as f64);
		if high <= low {
			return Duration::from_nanos(low as u64);
		}
		Duration::from_nanos(rand::rng().random_range(low..=high) as u64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::saga::error::StepError;

	#[test]
	fn test_exponential_backoff_is_capped() {
		let policy = RetryPolicy {
			base_delay: Duration::from_millis(100),
			multiplier: 2.0,
			max_delay: Duration::from_millis(500),
			..Default::default()
		};

		assert_eq!(policy.delay_for(1), Duration::from_millis(100));
		assert_eq!(policy.delay_for(2), Duration::from_millis(200));
		assert_eq!(policy.delay_for(3), Duration::from_millis(400));
		assert_eq!(policy.delay_for(4), Duration::from_millis(500));
		assert_eq!(policy.delay_for(60), Duration::from_millis(500));
	}

	#[test]
	fn test_sub_millisecond_backoff_is_kept() {
		let policy = RetryPolicy {
			base_delay: Duration::from_micros(500),
			multiplier: 2.0,
			max_delay: Duration::from_millis(10),
			..Default::default()
		};

		assert_eq!(policy.delay_for(1), Duration::from_micros(500));
		assert_eq!(policy.delay_for(2), Duration::from_micros(1000));
		assert_eq!(policy.delay_for(6), Duration::from_millis(10));
	}

	#[test]
	fn test_jitter_stays_within_bounds() {
		let policy = RetryPolicy {
			base_delay: Duration::from_millis(1000),
			multiplier: 1.0,
			max_delay: Duration::from_millis(1100),
			..Default::default()
		}
		.with_jitter(0.5);

		for _ in 0..100 {
			let delay = policy.delay_for(1);
			assert!(delay >= Duration::from_millis(500), "{delay:?} below lower bound");
			assert!(delay <= Duration::from_millis(1100), "{delay:?} above max_delay");
		}
	}

	#[test]
	fn test_permanent_errors_are_not_retried() {
		let policy = RetryPolicy::default();
		assert!(policy.should_retry(&AttemptError::Step(StepError::transient("503"))));
		assert!(!policy.should_retry(&AttemptError::Step(StepError::permanent("invalid slug"))));
		assert!(!policy.should_retry(&AttemptError::Panicked("boom".into())));
	}

	#[test]
	fn test_timeout_retry_is_configurable() {
		let mut policy = RetryPolicy::default();
		let timeout = AttemptError::Timeout(Duration::from_secs(1));
		assert!(policy.should_retry(&timeout));
		policy.retry_on_timeout = false;
		assert!(!policy.should_retry(&timeout));
	}

	#[test]
	fn test_policy_deserialize_defaults() {
		let policy: RetryPolicy = serde_json::from_str(r#"{"baseDelay": "250ms"}"#).unwrap();
		assert_eq!(policy.base_delay, Duration::from_millis(250));
		assert_eq!(policy.multiplier, 2.0);
		assert_eq!(policy.max_delay, Duration::from_secs(10));
		assert!(policy.retry_on_timeout);
		assert_eq!(policy.max_elapsed, None);
	}

	#[test]
	fn test_policy_denies_unknown_fields() {
		let result: Result<RetryPolicy, _> = serde_json::from_str(r#"{"attempts": 3}"#);
		assert!(result.is_err());
	}
}
