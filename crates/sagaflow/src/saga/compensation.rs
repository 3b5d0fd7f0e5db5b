//! Reverse-order unwinding of committed steps.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::saga::context::SagaContext;
use crate::saga::error::{CompensationError, panic_message};
use crate::saga::observer::{ObserverSet, SagaEvent};
use crate::saga::types::{SagaDefinition, SagaStep};

/// What happened when a committed step was unwound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CompensationOutcome {
	Ok,
	/// The step has no compensating action
	Skipped,
	Failed { error: CompensationError },
}

impl CompensationOutcome {
	pub fn is_failed(&self) -> bool {
		matches!(self, CompensationOutcome::Failed { .. })
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompensationEntry {
	pub step: String,
	#[serde(flatten)]
	pub outcome: CompensationOutcome,
}

/// Per-step outcomes of an unwind, in the order the steps were processed
/// (most recently committed first).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompensationReport {
	entries: Vec<CompensationEntry>,
}

impl CompensationReport {
	pub fn entries(&self) -> &[CompensationEntry] {
		&self.entries
	}

	pub fn outcome(&self, step: &str) -> Option<&CompensationOutcome> {
		self.entries.iter().find(|e| e.step == step).map(|e| &e.outcome)
	}

	/// True when no compensation failed. Skipped steps count as clean.
	pub fn is_clean(&self) -> bool {
		!self.entries.iter().any(|e| e.outcome.is_failed())
	}

	pub fn failures(&self) -> impl Iterator<Item = &CompensationError> {
		self.entries.iter().filter_map(|e| match &e.outcome {
			CompensationOutcome::Failed { error } => Some(error),
			_ => None,
		})
	}

	/// Steps whose compensating action ran successfully, in unwind order.
	pub fn compensated_steps(&self) -> Vec<&str> {
		self
			.entries
			.iter()
			.filter(|e| e.outcome == CompensationOutcome::Ok)
			.map(|e| e.step.as_str())
			.collect()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	fn record(&mut self, step: &str, outcome: CompensationOutcome) {
		self.entries.push(CompensationEntry {
			step: step.to_string(),
			outcome,
		});
	}
}

/// Unwinds the committed steps of a failed saga.
///
/// Steps are compensated one at a time, last committed first, since later
/// steps may hold references to resources created by earlier ones. A failing
/// compensation is recorded and the unwind carries on with the earlier steps.
#[derive(Clone, Default)]
pub struct CompensationCoordinator {
	observers: ObserverSet,
}

impl CompensationCoordinator {
	pub fn new() -> Self {
		Self::default()
	}

	pub(crate) fn with_observers(observers: ObserverSet) -> Self {
		Self { observers }
	}

	/// Compensate every step in `ctx.completed_steps()`, in reverse order.
	pub async fn compensate(
		&self,
		definition: &SagaDefinition,
		payload: &Value,
		ctx: &mut SagaContext,
	) -> CompensationReport {
		let mut report = CompensationReport::default();
		let completed: Vec<String> = ctx.completed_steps().to_vec();
		let saga = definition.name().to_string();
		let execution_id = ctx.execution_id();

		info!(
			saga = %saga,
			execution_id = %execution_id,
			step_count = completed.len(),
			"starting compensation for completed steps"
		);

		for name in completed.iter().rev() {
			let Some(step) = definition.step(name) else {
				error!(saga = %saga, step = %name, "completed step not found in saga definition");
				report.record(
					name,
					CompensationOutcome::Failed {
						error: CompensationError {
							step: name.clone(),
							reason: "step not found in saga definition".to_string(),
						},
					},
				);
				continue;
			};

			if !step.has_compensation() {
				debug!(saga = %saga, step = %name, "step has no compensation action, skipping");
				report.record(name, CompensationOutcome::Skipped);
				continue;
			}

			self.observers.emit(|| SagaEvent::CompensationStarted {
				saga: saga.clone(),
				execution_id,
				step: name.clone(),
			});
			debug!(saga = %saga, step = %name, "compensating step");

			let start = Instant::now();
			let outcome = match Self::invoke(step, payload, ctx).await {
				Ok(()) => {
					info!(
						saga = %saga,
						step = %name,
						duration = ?start.elapsed(),
						"compensation succeeded"
					);
					CompensationOutcome::Ok
				},
				Err(reason) => {
					error!(
						saga = %saga,
						step = %name,
						error = %reason,
						"compensation failed (continuing with remaining compensations)"
					);
					CompensationOutcome::Failed {
						error: CompensationError {
							step: name.clone(),
							reason,
						},
					}
				},
			};

			self.observers.emit(|| SagaEvent::CompensationFinished {
				saga: saga.clone(),
				execution_id,
				step: name.clone(),
				outcome: outcome.clone(),
			});
			report.record(name, outcome);
		}

		info!(
			saga = %saga,
			execution_id = %execution_id,
			clean = report.is_clean(),
			"compensation finished"
		);
		report
	}

	/// Run one compensating action under the step's timeout, containing panics.
	async fn invoke(step: &SagaStep, payload: &Value, ctx: &mut SagaContext) -> Result<(), String> {
		let Some(action) = step.compensate.as_ref() else {
			return Ok(());
		};
		let fut = AssertUnwindSafe(action.compensate(payload, ctx)).catch_unwind();
		let result = match step.timeout {
			Some(timeout) => match tokio::time::timeout(timeout, fut).await {
				Ok(result) => result,
				Err(_) => return Err(format!("timed out after {timeout:?}")),
			},
			None => fut.await,
		};
		match result {
			Ok(Ok(())) => Ok(()),
			Ok(Err(e)) => Err(e.to_string()),
			Err(panic) => Err(format!("panicked: {}", panic_message(&*panic))),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};
	use std::time::Duration;

	use async_trait::async_trait;
	use serde_json::json;

	use super::*;
	use crate::saga::error::StepError;
	use crate::saga::types::{CompensationAction, StepAction};

	struct Noop;

	#[async_trait]
	impl StepAction for Noop {
		async fn execute(&self, _payload: &Value, _ctx: &mut SagaContext) -> Result<Value, StepError> {
			Ok(Value::Null)
		}
	}

	/// Records its own name into a shared log, optionally failing.
	struct Undo {
		name: &'static str,
		log: Arc<Mutex<Vec<String>>>,
		behavior: Behavior,
	}

	#[derive(Clone, Copy)]
	enum Behavior {
		Succeed,
		Fail,
		Panic,
		Hang,
	}

	#[async_trait]
	impl CompensationAction for Undo {
		async fn compensate(&self, _payload: &Value, _ctx: &mut SagaContext) -> Result<(), StepError> {
			self.log.lock().unwrap().push(self.name.to_string());
			match self.behavior {
				Behavior::Succeed => Ok(()),
				Behavior::Fail => Err(StepError::transient("billing service unavailable")),
				Behavior::Panic => panic!("compensation exploded"),
				Behavior::Hang => {
					tokio::time::sleep(Duration::from_secs(3600)).await;
					Ok(())
				},
			}
		}
	}

	fn step(name: &'static str, log: &Arc<Mutex<Vec<String>>>, behavior: Option<Behavior>) -> SagaStep {
		let s = SagaStep::new(name, Noop);
		match behavior {
			Some(behavior) => s.with_compensation(Undo {
				name,
				log: log.clone(),
				behavior,
			}),
			None => s,
		}
	}

	fn context_with(completed: &[&str]) -> SagaContext {
		let mut ctx = SagaContext::new("provision-org");
		for name in completed {
			ctx.record_completed(name, json!(null));
		}
		ctx
	}

	#[tokio::test]
	async fn test_compensates_in_reverse_commit_order() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let def = SagaDefinition::builder("provision-org")
			.step(step("createOrg", &log, Some(Behavior::Succeed)))
			.step(step("createAdmin", &log, Some(Behavior::Succeed)))
			.step(step("createTeams", &log, Some(Behavior::Succeed)))
			.build()
			.unwrap();
		let mut ctx = context_with(&["createOrg", "createAdmin", "createTeams"]);

		let report = CompensationCoordinator::new()
			.compensate(&def, &json!({}), &mut ctx)
			.await;

		assert_eq!(*log.lock().unwrap(), vec!["createTeams", "createAdmin", "createOrg"]);
		assert!(report.is_clean());
		assert_eq!(report.compensated_steps(), vec!["createTeams", "createAdmin", "createOrg"]);
	}

	#[tokio::test]
	async fn test_failed_compensation_does_not_stop_unwind() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let def = SagaDefinition::builder("provision-org")
			.step(step("S1", &log, Some(Behavior::Succeed)))
			.step(step("S2", &log, Some(Behavior::Fail)))
			.step(step("S3", &log, Some(Behavior::Succeed)))
			.build()
			.unwrap();
		let mut ctx = context_with(&["S1", "S2"]);

		let report = CompensationCoordinator::new()
			.compensate(&def, &json!({}), &mut ctx)
			.await;

		assert_eq!(*log.lock().unwrap(), vec!["S2", "S1"]);
		assert!(!report.is_clean());
		assert!(report.outcome("S2").unwrap().is_failed());
		assert_eq!(report.outcome("S1"), Some(&CompensationOutcome::Ok));
		assert_eq!(report.outcome("S3"), None);
		let failures: Vec<_> = report.failures().collect();
		assert_eq!(failures.len(), 1);
		assert_eq!(failures[0].reason, "billing service unavailable");
	}

	#[tokio::test]
	async fn test_steps_without_compensation_are_skipped() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let def = SagaDefinition::builder("provision-org")
			.step(step("createOrg", &log, Some(Behavior::Succeed)))
			.step(step("sendWelcomeEmail", &log, None))
			.build()
			.unwrap();
		let mut ctx = context_with(&["createOrg", "sendWelcomeEmail"]);

		let report = CompensationCoordinator::new()
			.compensate(&def, &json!({}), &mut ctx)
			.await;

		assert_eq!(report.outcome("sendWelcomeEmail"), Some(&CompensationOutcome::Skipped));
		assert_eq!(report.outcome("createOrg"), Some(&CompensationOutcome::Ok));
		assert!(report.is_clean());
	}

	#[tokio::test]
	async fn test_panicking_compensation_is_contained() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let def = SagaDefinition::builder("provision-org")
			.step(step("createOrg", &log, Some(Behavior::Succeed)))
			.step(step("createAdmin", &log, Some(Behavior::Panic)))
			.build()
			.unwrap();
		let mut ctx = context_with(&["createOrg", "createAdmin"]);

		let report = CompensationCoordinator::new()
			.compensate(&def, &json!({}), &mut ctx)
			.await;

		match report.outcome("createAdmin") {
			Some(CompensationOutcome::Failed { error }) => {
				assert!(error.reason.contains("compensation exploded"));
			},
			other => panic!("Expected Failed outcome, got {other:?}"),
		}
		assert_eq!(report.outcome("createOrg"), Some(&CompensationOutcome::Ok));
	}

	#[tokio::test(start_paused = true)]
	async fn test_compensation_respects_step_timeout() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let def = SagaDefinition::builder("provision-org")
			.step(step("createOrg", &log, Some(Behavior::Hang)).with_timeout(Duration::from_secs(5)))
			.build()
			.unwrap();
		let mut ctx = context_with(&["createOrg"]);

		let report = CompensationCoordinator::new()
			.compensate(&def, &json!({}), &mut ctx)
			.await;

		match report.outcome("createOrg") {
			Some(CompensationOutcome::Failed { error }) => assert!(error.reason.contains("timed out")),
			other => panic!("Expected timeout failure, got {other:?}"),
		}
	}

	#[test]
	fn test_report_serializes_for_alerting() {
		let mut report = CompensationReport::default();
		report.record("createAdmin", CompensationOutcome::Ok);
		report.record(
			"createOrg",
			CompensationOutcome::Failed {
				error: CompensationError {
					step: "createOrg".into(),
					reason: "409 conflict".into(),
				},
			},
		);

		let value = serde_json::to_value(&report).unwrap();
		assert_eq!(
			value,
			json!({
				"entries": [
					{ "step": "createAdmin", "status": "ok" },
					{
						"step": "createOrg",
						"status": "failed",
						"error": { "step": "createOrg", "reason": "409 conflict" }
					}
				]
			})
		);
	}
}
