//! Saga executor implementation.
//!
//! Drives one saga execution from its first step to a terminal outcome:
//! forward execution with per-attempt timeouts and retries, then either the
//! success hook or compensation followed by the failure hook.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::saga::compensation::CompensationCoordinator;
use crate::saga::context::SagaContext;
use crate::saga::error::{AttemptError, SagaExecutionFailed, StepFailure, panic_message};
use crate::saga::observer::{ObserverSet, SagaEvent, SagaObserver};
use crate::saga::retry::RetryPolicy;
use crate::saga::state::SagaState;
use crate::saga::types::{SagaDefinition, SagaStep};

/// Result of a successfully completed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
	pub name: String,
	pub attempts: u32,
	pub duration: Duration,
}

/// Result of a successful saga execution.
#[derive(Debug, Clone)]
pub struct SagaResult {
	pub saga: String,
	pub execution_id: Uuid,
	/// Step outputs keyed by step name, in commit order
	pub output: Value,
	/// Committed steps in commit order
	pub completed_steps: Vec<String>,
	pub steps: Vec<StepRecord>,
	/// Context metadata as left by the last step
	pub metadata: HashMap<String, Value>,
	pub duration: Duration,
}

/// Executor for running sagas.
///
/// Holds no per-execution state: one executor can run any number of sagas
/// concurrently, each with its own [`SagaContext`].
#[derive(Clone, Default)]
pub struct SagaExecutor {
	retry_policy: RetryPolicy,
	observers: ObserverSet,
}

impl SagaExecutor {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_config(config: &EngineConfig) -> Self {
		Self {
			retry_policy: config.default_retry.clone(),
			observers: ObserverSet::default(),
		}
	}

	/// Backoff used by steps that do not carry their own policy.
	pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.retry_policy = policy;
		self
	}

	pub fn with_observer(mut self, observer: Arc<dyn SagaObserver>) -> Self {
		self.observers.push(observer);
		self
	}

	pub fn retry_policy(&self) -> &RetryPolicy {
		&self.retry_policy
	}

	pub fn observer_count(&self) -> usize {
		self.observers.len()
	}

	/// Execute a saga to completion with a fresh context.
	pub async fn run(
		&self,
		definition: &SagaDefinition,
		payload: Value,
	) -> Result<SagaResult, SagaExecutionFailed> {
		let ctx = SagaContext::new(definition.name());
		self.run_with_context(definition, payload, ctx).await
	}

	/// Execute a saga with a caller-prepared context.
	///
	/// The context must be fresh (in the `Pending` state); it is consumed by
	/// the execution and dropped once the terminal hook has returned. A
	/// context created under another saga name is rebound to `definition`.
	pub async fn run_with_context(
		&self,
		definition: &SagaDefinition,
		payload: Value,
		mut ctx: SagaContext,
	) -> Result<SagaResult, SagaExecutionFailed> {
		let start = Instant::now();
		let saga = definition.name();
		let execution_id = ctx.execution_id();
		if ctx.saga_name() != saga {
			warn!(
				saga = %saga,
				context_saga = %ctx.saga_name(),
				"context was created for another saga, rebinding"
			);
			ctx.bind_saga(saga);
		}
		let mut records = Vec::with_capacity(definition.steps().len());

		info!(
			saga = %saga,
			execution_id = %execution_id,
			step_count = definition.steps().len(),
			"starting saga execution"
		);
		self.transition(&mut ctx, SagaState::Running);

		for (idx, step) in definition.steps().iter().enumerate() {
			if let Some(deadline) = definition.deadline()
				&& start.elapsed() >= deadline
			{
				warn!(
					saga = %saga,
					step = %step.name,
					elapsed = ?start.elapsed(),
					"saga deadline exceeded"
				);
				let failure = StepFailure::DeadlineExceeded {
					step: step.name.clone(),
					deadline,
				};
				return Err(self.fail(definition, &payload, ctx, failure).await);
			}

			debug!(
				saga = %saga,
				step = %step.name,
				description = ?step.description,
				step_index = idx,
				"executing step"
			);

			let step_start = Instant::now();
			match self.execute_step(saga, step, &payload, &mut ctx).await {
				Ok((output, attempts)) => {
					let duration = step_start.elapsed();
					ctx.record_completed(&step.name, output);
					records.push(StepRecord {
						name: step.name.clone(),
						attempts,
						duration,
					});
					self.observers.emit(|| SagaEvent::StepSucceeded {
						saga: saga.to_string(),
						execution_id,
						step: step.name.clone(),
						attempts,
					});
					info!(
						saga = %saga,
						step = %step.name,
						attempts,
						duration = ?duration,
						"step completed successfully"
					);
				},
				Err(failure) => {
					error!(
						saga = %saga,
						step = %step.name,
						error = %failure,
						"step failed, starting compensation"
					);
					return Err(self.fail(definition, &payload, ctx, failure).await);
				},
			}
		}

		self.transition(&mut ctx, SagaState::Succeeded);
		definition.hooks().on_success(&payload, &ctx).await;

		let duration = start.elapsed();
		info!(
			saga = %saga,
			execution_id = %execution_id,
			duration = ?duration,
			"saga completed successfully"
		);

		let output = Value::Object(
			ctx
				.outputs()
				.iter()
				.map(|(k, v)| (k.clone(), v.clone()))
				.collect(),
		);
		Ok(SagaResult {
			saga: saga.to_string(),
			execution_id,
			output,
			completed_steps: ctx.completed_steps().to_vec(),
			steps: records,
			metadata: ctx.metadata().clone(),
			duration,
		})
	}

	/// Unwind the committed steps and fire the failure hook.
	async fn fail(
		&self,
		definition: &SagaDefinition,
		payload: &Value,
		mut ctx: SagaContext,
		failure: StepFailure,
	) -> SagaExecutionFailed {
		self.observers.emit(|| SagaEvent::StepFailed {
			saga: definition.name().to_string(),
			execution_id: ctx.execution_id(),
			failure: failure.clone(),
		});
		self.transition(&mut ctx, SagaState::Compensating);

		let report = CompensationCoordinator::with_observers(self.observers.clone())
			.compensate(definition, payload, &mut ctx)
			.await;
		if !report.is_clean() {
			error!(
				saga = %definition.name(),
				execution_id = %ctx.execution_id(),
				failed_compensations = report.failures().count(),
				"saga left partially compensated, manual remediation required"
			);
		}
		ctx.set_compensation_report(report.clone());
		self.transition(&mut ctx, SagaState::CompensatedFailure);

		definition.hooks().on_failure(payload, &ctx, &failure).await;

		SagaExecutionFailed {
			saga: definition.name().to_string(),
			execution_id: ctx.execution_id(),
			error: failure,
			report,
			completed_steps: ctx.completed_steps().to_vec(),
		}
	}

	/// Execute one step, retrying per its policy. Returns the output and the number of attempts.
	async fn execute_step(
		&self,
		saga: &str,
		step: &SagaStep,
		payload: &Value,
		ctx: &mut SagaContext,
	) -> Result<(Value, u32), StepFailure> {
		let policy = step.retry_policy.as_ref().unwrap_or(&self.retry_policy);
		let max_attempts = step.max_attempts();
		let execution_id = ctx.execution_id();
		let first_attempt = Instant::now();
		let mut attempt = 0;

		loop {
			attempt += 1;
			self.observers.emit(|| SagaEvent::AttemptStarted {
				saga: saga.to_string(),
				execution_id,
				step: step.name.clone(),
				attempt,
			});

			let attempt_start = Instant::now();
			let result = Self::attempt(step, payload, ctx).await;
			self.observers.emit(|| SagaEvent::AttemptFinished {
				saga: saga.to_string(),
				execution_id,
				step: step.name.clone(),
				attempt,
				duration: attempt_start.elapsed(),
				error: result.as_ref().err().cloned(),
			});

			let err = match result {
				Ok(output) => return Ok((output, attempt)),
				Err(err) => err,
			};

			if attempt >= max_attempts {
				return Err(StepFailure::from_attempt(&step.name, attempt, err));
			}
			if !policy.should_retry(&err) {
				debug!(
					saga = %saga,
					step = %step.name,
					attempt,
					error = %err,
					"error is not retryable"
				);
				return Err(StepFailure::from_attempt(&step.name, attempt, err));
			}

			let delay = policy.delay_for(attempt);
			if let Some(max_elapsed) = policy.max_elapsed
				&& first_attempt.elapsed() + delay > max_elapsed
			{
				warn!(
					saga = %saga,
					step = %step.name,
					attempt,
					max_elapsed = ?max_elapsed,
					"retry window exhausted"
				);
				return Err(StepFailure::from_attempt(&step.name, attempt, err));
			}

			warn!(
				saga = %saga,
				step = %step.name,
				attempt,
				max_attempts,
				delay = ?delay,
				error = %err,
				"step attempt failed, retrying"
			);
			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}
		}
	}

	/// A single attempt under the step's timeout. Panics are reported as failures.
	async fn attempt(step: &SagaStep, payload: &Value, ctx: &mut SagaContext) -> Result<Value, AttemptError> {
		let fut = AssertUnwindSafe(step.action.execute(payload, ctx)).catch_unwind();
		let result = match step.timeout {
			Some(timeout) => tokio::time::timeout(timeout, fut)
				.await
				.map_err(|_| AttemptError::Timeout(timeout))?,
			None => fut.await,
		};
		match result {
			Ok(output) => output.map_err(AttemptError::Step),
			Err(panic) => Err(AttemptError::Panicked(panic_message(&*panic))),
		}
	}

	fn transition(&self, ctx: &mut SagaContext, next: SagaState) {
		let from = ctx.transition(next);
		self.observers.emit(|| SagaEvent::StateChanged {
			saga: ctx.saga_name().to_string(),
			execution_id: ctx.execution_id(),
			from,
			to: next,
		});
	}
}
