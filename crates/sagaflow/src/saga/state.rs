use std::fmt;

use serde::Serialize;

/// Lifecycle of a single saga execution.
///
/// `Pending -> Running -> {Succeeded, Compensating -> CompensatedFailure}`.
/// A compensating saga never goes back to `Running`; a new execution starts
/// from a fresh context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SagaState {
	Pending,
	Running,
	Succeeded,
	Compensating,
	CompensatedFailure,
}

impl SagaState {
	pub fn can_transition_to(self, next: SagaState) -> bool {
		use SagaState::*;
		matches!(
			(self, next),
			(Pending, Running) | (Running, Succeeded) | (Running, Compensating) | (Compensating, CompensatedFailure)
		)
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, SagaState::Succeeded | SagaState::CompensatedFailure)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			SagaState::Pending => "pending",
			SagaState::Running => "running",
			SagaState::Succeeded => "succeeded",
			SagaState::Compensating => "compensating",
			SagaState::CompensatedFailure => "compensated_failure",
		}
	}
}

impl fmt::Display for SagaState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
