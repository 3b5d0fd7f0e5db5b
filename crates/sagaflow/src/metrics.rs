//! Prometheus counters for saga executions.
//!
//! [`SagaMetrics`] is a [`SagaObserver`]: attach it to a
//! [`SagaExecutor`](crate::SagaExecutor) and expose the registry however the
//! host exports metrics.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use crate::saga::{AttemptError, CompensationOutcome, SagaEvent, SagaObserver, SagaState};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ExecutionLabels {
	pub saga: String,
	pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StepLabels {
	pub saga: String,
	pub step: String,
	pub outcome: String,
}

#[derive(Clone, Debug, Default)]
pub struct SagaMetrics {
	pub executions: Family<ExecutionLabels, Counter>,
	pub step_attempts: Family<StepLabels, Counter>,
	pub compensations: Family<StepLabels, Counter>,
}

impl SagaMetrics {
	pub fn new(registry: &mut Registry) -> Self {
		let metrics = Self::default();
		registry.register(
			"saga_executions",
			"Saga executions by terminal outcome",
			metrics.executions.clone(),
		);
		registry.register(
			"saga_step_attempts",
			"Step attempts by outcome",
			metrics.step_attempts.clone(),
		);
		registry.register(
			"saga_compensations",
			"Compensating actions by outcome",
			metrics.compensations.clone(),
		);
		metrics
	}
}

impl SagaObserver for SagaMetrics {
	fn on_event(&self, event: &SagaEvent) {
		match event {
			SagaEvent::StateChanged { saga, to, .. } if to.is_terminal() => {
				let outcome = match to {
					SagaState::Succeeded => "succeeded",
					_ => "compensated_failure",
				};
				self
					.executions
					.get_or_create(&ExecutionLabels {
						saga: saga.clone(),
						outcome: outcome.to_string(),
					})
					.inc();
			},
			SagaEvent::AttemptFinished {
				saga, step, error, ..
			} => {
				let outcome = match error {
					None => "ok",
					Some(AttemptError::Timeout(_)) => "timeout",
					Some(AttemptError::Panicked(_)) => "panic",
					Some(AttemptError::Step(_)) => "error",
				};
				self
					.step_attempts
					.get_or_create(&StepLabels {
						saga: saga.clone(),
						step: step.clone(),
						outcome: outcome.to_string(),
					})
					.inc();
			},
			SagaEvent::CompensationFinished {
				saga, step, outcome, ..
			} => {
				let outcome = match outcome {
					CompensationOutcome::Ok => "ok",
					CompensationOutcome::Skipped => "skipped",
					CompensationOutcome::Failed { .. } => "failed",
				};
				self
					.compensations
					.get_or_create(&StepLabels {
						saga: saga.clone(),
						step: step.clone(),
						outcome: outcome.to_string(),
					})
					.inc();
			},
			_ => {},
		}
	}
}
