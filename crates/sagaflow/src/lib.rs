//! Saga orchestration for multi-service business operations.
//!
//! A saga runs an ordered list of remote, side-effecting steps. Every step
//! that commits is recorded; when a later step fails terminally the committed
//! steps are compensated in reverse order. See [`saga`] for the engine itself.

pub mod config;
pub mod metrics;
pub mod saga;
pub mod telemetry;

pub use config::{ConfigError, EngineConfig, StepPolicy};
pub use metrics::SagaMetrics;
pub use saga::{
	AttemptError, CompensationAction, CompensationCoordinator, CompensationError,
	CompensationOutcome, CompensationReport, DefinitionError, DefinitionRegistry, NoopHooks,
	RegistryError, RetryPolicy, SagaContext, SagaDefinition, SagaDefinitionBuilder, SagaEvent,
	SagaExecutionFailed, SagaExecutor, SagaHooks, SagaObserver, SagaResult, SagaState, SagaStep,
	StepAction, StepError, StepFailure, StepRecord,
};

/// Serde helpers for `Duration` fields written as `"250ms"`, `"30s"`, `"5m"` or `"1h"`.
///
/// `"us"` and `"ns"` are accepted too, so sub-millisecond values survive a round trip.
pub mod serde_dur {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&format(*duration))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		parse(&s).map_err(serde::de::Error::custom)
	}

	pub(crate) fn format(duration: Duration) -> String {
		let nanos = duration.subsec_nanos();
		if nanos == 0 {
			format!("{}s", duration.as_secs())
		} else if nanos % 1_000_000 == 0 {
			format!("{}ms", duration.as_millis())
		} else if nanos % 1_000 == 0 {
			format!("{}us", duration.as_micros())
		} else {
			format!("{}ns", duration.as_nanos())
		}
	}

	pub(crate) fn parse(s: &str) -> Result<Duration, String> {
		let s = s.trim();
		let (digits, unit_nanos) = if let Some(ns) = s.strip_suffix("ns") {
			(ns, 1)
		} else if let Some(us) = s.strip_suffix("us") {
			(us, 1_000)
		} else if let Some(ms) = s.strip_suffix("ms") {
			(ms, 1_000_000)
		} else if let Some(secs) = s.strip_suffix('s') {
			(secs, 1_000_000_000)
		} else if let Some(mins) = s.strip_suffix('m') {
			(mins, 60_000_000_000)
		} else if let Some(hours) = s.strip_suffix('h') {
			(hours, 3_600_000_000_000)
		} else {
			return Err(format!("invalid duration format: {s}"));
		};
		let value: u64 = digits
			.trim()
			.parse()
			.map_err(|e| format!("invalid duration '{s}': {e}"))?;
		value
			.checked_mul(unit_nanos)
			.map(Duration::from_nanos)
			.ok_or_else(|| format!("duration out of range: {s}"))
	}
}

/// Like [`serde_dur`], for `Option<Duration>`.
pub mod serde_dur_option {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match duration {
			Some(d) => serializer.serialize_str(&super::serde_dur::format(*d)),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s: Option<String> = Option::deserialize(deserializer)?;
		s.map(|s| super::serde_dur::parse(&s).map_err(serde::de::Error::custom))
			.transpose()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::serde_dur;

	#[test]
	fn test_parse_duration_units() {
		assert_eq!(serde_dur::parse("250ms").unwrap(), Duration::from_millis(250));
		assert_eq!(serde_dur::parse("30s").unwrap(), Duration::from_secs(30));
		assert_eq!(serde_dur::parse("2m").unwrap(), Duration::from_secs(120));
		assert_eq!(serde_dur::parse(" 1h ").unwrap(), Duration::from_secs(3600));
		assert_eq!(serde_dur::parse("500us").unwrap(), Duration::from_micros(500));
		assert_eq!(serde_dur::parse("750ns").unwrap(), Duration::from_nanos(750));
	}

	#[test]
	fn test_parse_duration_rejects_garbage() {
		assert!(serde_dur::parse("10").is_err());
		assert!(serde_dur::parse("fast").is_err());
		assert!(serde_dur::parse("-5s").is_err());
	}

	#[test]
	fn test_format_duration() {
		assert_eq!(serde_dur::format(Duration::from_secs(5)), "5s");
		assert_eq!(serde_dur::format(Duration::from_millis(1500)), "1500ms");
		assert_eq!(serde_dur::format(Duration::from_micros(1500)), "1500us");
		assert_eq!(serde_dur::format(Duration::from_nanos(1_000_000_001)), "1000000001ns");
	}

	#[test]
	fn test_sub_millisecond_durations_survive_round_trip() {
		let policy = crate::RetryPolicy {
			base_delay: Duration::from_micros(1500),
			max_delay: Duration::from_nanos(2_000_500),
			..Default::default()
		};
		let json = serde_json::to_value(&policy).unwrap();
		assert_eq!(json["baseDelay"], "1500us");
		let back: crate::RetryPolicy = serde_json::from_value(json).unwrap();
		assert_eq!(back, policy);
	}
}
