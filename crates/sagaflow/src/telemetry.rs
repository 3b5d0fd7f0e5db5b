//! Logging setup for hosts embedding the engine.
//!
//! The engine only emits `tracing` events; installing a subscriber is up to
//! the host process.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogFormat {
	#[default]
	Plain,
	Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LogConfig {
	/// `EnvFilter` directives; `RUST_LOG` takes precedence when set
	#[serde(default = "default_filter")]
	pub filter: String,

	#[serde(default)]
	pub format: LogFormat,
}

fn default_filter() -> String {
	"info".to_string()
}

impl Default for LogConfig {
	fn default() -> Self {
		Self {
			filter: default_filter(),
			format: LogFormat::default(),
		}
	}
}

#[derive(Debug, Error)]
pub enum TelemetryError {
	#[error("invalid log filter: {0}")]
	Filter(#[from] tracing_subscriber::filter::ParseError),

	#[error("failed to install tracing subscriber: {0}")]
	Init(#[from] tracing_subscriber::util::TryInitError),
}

fn env_filter(config: &LogConfig) -> Result<EnvFilter, TelemetryError> {
	match EnvFilter::try_from_default_env() {
		Ok(filter) => Ok(filter),
		Err(_) => Ok(EnvFilter::try_new(&config.filter)?),
	}
}

/// Install a global subscriber. Fails if one is already installed.
pub fn try_init(config: &LogConfig) -> Result<(), TelemetryError> {
	let registry = tracing_subscriber::registry().with(env_filter(config)?);
	match config.format {
		LogFormat::Plain => registry.with(fmt::layer()).try_init()?,
		LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
	}
	Ok(())
}

/// Subscriber writing through the test harness so output is captured per test.
pub fn init_for_tests() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sagaflow=debug")),
		)
		.with_test_writer()
		.try_init();
}
