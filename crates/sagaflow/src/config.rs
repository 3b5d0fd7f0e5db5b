//! Engine configuration.
//!
//! ```yaml
//! defaultRetry:
//!   baseDelay: 200ms
//!   multiplier: 2.0
//!   maxDelay: 5s
//!   jitter: 0.2
//! steps:
//!   createOrg:
//!     retryable: true
//!     maxRetries: 3
//!     timeout: 30s
//! log:
//!   filter: info,sagaflow=debug
//!   format: json
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::saga::RetryPolicy;
use crate::serde_dur_option;
use crate::telemetry::LogConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config: {0}")]
	Io(#[from] std::io::Error),

	#[error("invalid YAML config: {0}")]
	Yaml(#[from] serde_yaml::Error),

	#[error("invalid JSON config: {0}")]
	Json(#[from] serde_json::Error),

	#[error("unsupported config file extension: {0}")]
	UnsupportedFormat(String),

	#[error("invalid config: {0}")]
	Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
	/// Backoff for steps without their own policy
	#[serde(default)]
	pub default_retry: RetryPolicy,

	/// Per-step overrides keyed by step name
	#[serde(default)]
	pub steps: HashMap<String, StepPolicy>,

	#[serde(default)]
	pub log: LogConfig,
}

/// Retry and timeout settings for one step. Unset fields keep the step's own value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StepPolicy {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub retryable: Option<bool>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_retries: Option<u32>,

	#[serde(default, skip_serializing_if = "Option::is_none", with = "serde_dur_option")]
	pub timeout: Option<Duration>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub retry: Option<RetryPolicy>,
}

impl EngineConfig {
	pub fn from_yaml(s: &str) -> Result<Self, ConfigError> {
		let config: Self = serde_yaml::from_str(s)?;
		config.validate()?;
		Ok(config)
	}

	pub fn from_json(s: &str) -> Result<Self, ConfigError> {
		let config: Self = serde_json::from_str(s)?;
		config.validate()?;
		Ok(config)
	}

	/// Load from a `.yaml`, `.yml` or `.json` file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let contents = fs_err::read_to_string(path)?;
		match path.extension().and_then(|e| e.to_str()) {
			Some("yaml" | "yml") => Self::from_yaml(&contents),
			Some("json") => Self::from_json(&contents),
			other => Err(ConfigError::UnsupportedFormat(other.unwrap_or_default().to_string())),
		}
	}

	fn validate(&self) -> Result<(), ConfigError> {
		let policies = std::iter::once(("defaultRetry", &self.default_retry)).chain(
			self
				.steps
				.iter()
				.filter_map(|(name, p)| p.retry.as_ref().map(|r| (name.as_str(), r))),
		);
		for (name, policy) in policies {
			if !(0.0..=1.0).contains(&policy.jitter) {
				return Err(ConfigError::Invalid(format!(
					"{name}: jitter must be between 0 and 1, got {}",
					policy.jitter
				)));
			}
			if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
				return Err(ConfigError::Invalid(format!(
					"{name}: multiplier must be at least 1, got {}",
					policy.multiplier
				)));
			}
			if policy.base_delay > policy.max_delay {
				return Err(ConfigError::Invalid(format!(
					"{name}: baseDelay must not exceed maxDelay"
				)));
			}
		}
		for (name, step) in &self.steps {
			if step.timeout.is_some_and(|t| t.is_zero()) {
				return Err(ConfigError::Invalid(format!("{name}: timeout must be positive")));
			}
		}
		Ok(())
	}
}
