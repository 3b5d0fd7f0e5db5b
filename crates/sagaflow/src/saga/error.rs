//! Error taxonomy for saga execution.

use std::any::Any;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::saga::compensation::CompensationReport;

/// Error returned by a step's forward or compensating action.
///
/// Errors are retryable unless explicitly classified as permanent.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum StepError {
	#[error("{0}")]
	Transient(String),

	#[error("{0}")]
	Permanent(String),
}

impl StepError {
	pub fn transient(message: impl Into<String>) -> Self {
		Self::Transient(message.into())
	}

	pub fn permanent(message: impl Into<String>) -> Self {
		Self::Permanent(message.into())
	}

	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Transient(_))
	}

	pub fn message(&self) -> &str {
		match self {
			Self::Transient(m) | Self::Permanent(m) => m,
		}
	}
}

impl From<anyhow::Error> for StepError {
	fn from(err: anyhow::Error) -> Self {
		Self::Transient(format!("{err:#}"))
	}
}

/// Failure of a single attempt of a step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptError {
	#[error(transparent)]
	Step(StepError),

	#[error("attempt timed out after {0:?}")]
	Timeout(Duration),

	#[error("step panicked: {0}")]
	Panicked(String),
}

/// Terminal failure of the forward pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepFailure {
	#[error("step '{step}' failed after {attempts} attempt(s): {error}")]
	Execution {
		step: String,
		attempts: u32,
		error: StepError,
	},

	#[error("step '{step}' timed out after {timeout:?} ({attempts} attempt(s))")]
	Timeout {
		step: String,
		attempts: u32,
		timeout: Duration,
	},

	#[error("saga deadline of {deadline:?} exceeded before step '{step}'")]
	DeadlineExceeded { step: String, deadline: Duration },
}

impl StepFailure {
	pub(crate) fn from_attempt(step: &str, attempts: u32, err: AttemptError) -> Self {
		let step = step.to_string();
		match err {
			AttemptError::Step(error) => Self::Execution {
				step,
				attempts,
				error,
			},
			AttemptError::Timeout(timeout) => Self::Timeout {
				step,
				attempts,
				timeout,
			},
			AttemptError::Panicked(msg) => Self::Execution {
				step,
				attempts,
				error: StepError::Permanent(format!("step panicked: {msg}")),
			},
		}
	}

	/// Name of the step the forward pass stopped at.
	pub fn step(&self) -> &str {
		match self {
			Self::Execution { step, .. } | Self::Timeout { step, .. } | Self::DeadlineExceeded { step, .. } => {
				step
			},
		}
	}

	/// Number of attempts made before giving up. Zero when the step never started.
	pub fn attempts(&self) -> u32 {
		match self {
			Self::Execution { attempts, .. } | Self::Timeout { attempts, .. } => *attempts,
			Self::DeadlineExceeded { .. } => 0,
		}
	}
}

/// A compensating action that did not complete. Only ever reported, never propagated.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("compensation for step '{step}' failed: {reason}")]
pub struct CompensationError {
	pub step: String,
	pub reason: String,
}

/// Top-level failure returned by [`SagaExecutor::run`](crate::saga::SagaExecutor::run).
#[derive(Debug, Error)]
#[error("saga '{saga}' failed at step '{}'", .error.step())]
pub struct SagaExecutionFailed {
	pub saga: String,
	pub execution_id: Uuid,
	#[source]
	pub error: StepFailure,
	pub report: CompensationReport,
	/// Steps that had committed before the failure, in commit order.
	pub completed_steps: Vec<String>,
}

impl SagaExecutionFailed {
	pub fn failed_step(&self) -> &str {
		self.error.step()
	}

	/// True when automated compensation did not fully succeed and someone has to look.
	pub fn needs_remediation(&self) -> bool {
		!self.report.is_clean()
	}
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic payload".to_string()
	}
}

/// Errors raised while building a [`SagaDefinition`](crate::saga::SagaDefinition).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
	#[error("saga name must not be empty")]
	EmptySagaName,

	#[error("step at position {index} has an empty name")]
	EmptyStepName { index: usize },

	#[error("duplicate step name '{name}' in saga '{saga}'")]
	DuplicateStep { saga: String, name: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
	#[error("saga '{0}' is already registered")]
	AlreadyRegistered(String),

	#[error("saga '{0}' not found")]
	NotFound(String),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_step_error_retryable_classification() {
		assert!(StepError::transient("connection reset").is_retryable());
		assert!(!StepError::permanent("invalid org name").is_retryable());
	}

	#[test]
	fn test_anyhow_errors_are_transient() {
		let err: StepError = anyhow::anyhow!("upstream 503").context("calling billing").into();
		assert!(err.is_retryable());
		assert_eq!(err.message(), "calling billing: upstream 503");
	}

	#[test]
	fn test_panic_becomes_permanent_execution_failure() {
		let failure = StepFailure::from_attempt("createOrg", 1, AttemptError::Panicked("boom".into()));
		match failure {
			StepFailure::Execution { error, attempts, .. } => {
				assert_eq!(attempts, 1);
				assert!(!error.is_retryable());
				assert!(error.message().contains("boom"));
			},
			other => panic!("Expected Execution failure, got {other:?}"),
		}
	}

	#[test]
	fn test_step_failure_display() {
		let failure = StepFailure::Timeout {
			step: "createTeams".into(),
			attempts: 3,
			timeout: Duration::from_secs(30),
		};
		assert_eq!(failure.step(), "createTeams");
		assert_eq!(failure.to_string(), "step 'createTeams' timed out after 30s (3 attempt(s))");
	}

	#[test]
	fn test_saga_failure_message_does_not_repeat_source() {
		let failed = SagaExecutionFailed {
			saga: "provision-org".into(),
			execution_id: Uuid::new_v4(),
			error: StepFailure::Execution {
				step: "createTeams".into(),
				attempts: 1,
				error: StepError::permanent("team quota exceeded"),
			},
			report: CompensationReport::default(),
			completed_steps: vec!["createOrg".into()],
		};

		assert_eq!(failed.to_string(), "saga 'provision-org' failed at step 'createTeams'");
		let source = std::error::Error::source(&failed).map(ToString::to_string);
		assert_eq!(
			source.as_deref(),
			Some("step 'createTeams' failed after 1 attempt(s): team quota exceeded")
		);

		let chain = format!("{:#}", anyhow::Error::new(failed));
		assert_eq!(chain.matches("team quota exceeded").count(), 1);
	}
}
