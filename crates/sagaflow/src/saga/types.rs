//! Saga definition types.
//!
//! A [`SagaDefinition`] is pure data: an ordered list of [`SagaStep`]s plus
//! lifecycle hooks. It is built once, usually at startup, and shared
//! read-only by every execution.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::config::{EngineConfig, StepPolicy};
use crate::saga::context::SagaContext;
use crate::saga::error::{DefinitionError, StepError, StepFailure};
use crate::saga::retry::RetryPolicy;

/// Forward action of a step.
///
/// Typically wraps a call to a remote service. The returned value becomes the
/// step's output; return `Value::Null` when there is nothing to report.
#[async_trait]
pub trait StepAction: Send + Sync {
	async fn execute(&self, payload: &Value, ctx: &mut SagaContext) -> Result<Value, StepError>;
}

/// Reverse action of a step.
///
/// Must be safe to call even if the forward action only partially succeeded.
#[async_trait]
pub trait CompensationAction: Send + Sync {
	async fn compensate(&self, payload: &Value, ctx: &mut SagaContext) -> Result<(), StepError>;
}

/// Lifecycle hooks of a saga. Exactly one of them fires per execution.
#[async_trait]
pub trait SagaHooks: Send + Sync {
	async fn on_success(&self, _payload: &Value, _ctx: &SagaContext) {}

	async fn on_failure(&self, _payload: &Value, _ctx: &SagaContext, _error: &StepFailure) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl SagaHooks for NoopHooks {}

/// A single step in a saga.
#[derive(Clone)]
pub struct SagaStep {
	/// Unique name within the saga
	pub name: String,

	/// Human-readable description for logging
	pub description: Option<String>,

	/// The action to execute (forward direction)
	pub action: Arc<dyn StepAction>,

	/// The compensating action, executed in reverse order on failure
	pub compensate: Option<Arc<dyn CompensationAction>>,

	/// Whether failed attempts may be retried at all
	pub retryable: bool,

	/// Additional attempts after the first one
	pub max_retries: u32,

	/// Per-attempt timeout
	pub timeout: Option<Duration>,

	/// Backoff for this step; the executor's default applies when unset
	pub retry_policy: Option<RetryPolicy>,
}

impl SagaStep {
	pub fn new(name: impl Into<String>, action: impl StepAction + 'static) -> Self {
		Self::from_arc(name, Arc::new(action))
	}

	pub fn from_arc(name: impl Into<String>, action: Arc<dyn StepAction>) -> Self {
		Self {
			name: name.into(),
			description: None,
			action,
			compensate: None,
			retryable: false,
			max_retries: 0,
			timeout: None,
			retry_policy: None,
		}
	}

	pub fn with_compensation(mut self, compensate: impl CompensationAction + 'static) -> Self {
		self.compensate = Some(Arc::new(compensate));
		self
	}

	pub fn with_compensation_arc(mut self, compensate: Arc<dyn CompensationAction>) -> Self {
		self.compensate = Some(compensate);
		self
	}

	/// Make the step retryable with `max_retries` additional attempts.
	pub fn with_retries(mut self, max_retries: u32) -> Self {
		self.retryable = true;
		self.max_retries = max_retries;
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.retry_policy = Some(policy);
		self
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());
		self
	}

	/// Apply configured retry settings. Fields left unset in the policy keep their current value.
	pub fn with_policy(mut self, policy: &StepPolicy) -> Self {
		if let Some(retryable) = policy.retryable {
			self.retryable = retryable;
		}
		if let Some(max_retries) = policy.max_retries {
			self.max_retries = max_retries;
		}
		if policy.timeout.is_some() {
			self.timeout = policy.timeout;
		}
		if policy.retry.is_some() {
			self.retry_policy = policy.retry.clone();
		}
		self
	}

	pub fn has_compensation(&self) -> bool {
		self.compensate.is_some()
	}

	/// Total attempts this step may consume.
	pub fn max_attempts(&self) -> u32 {
		if self.retryable {
			self.max_retries.saturating_add(1)
		} else {
			1
		}
	}
}

impl fmt::Debug for SagaStep {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SagaStep")
			.field("name", &self.name)
			.field("description", &self.description)
			.field("has_compensation", &self.compensate.is_some())
			.field("retryable", &self.retryable)
			.field("max_retries", &self.max_retries)
			.field("timeout", &self.timeout)
			.field("retry_policy", &self.retry_policy)
			.finish()
	}
}

/// An immutable saga: named, ordered steps plus lifecycle hooks.
#[derive(Clone)]
pub struct SagaDefinition {
	name: String,
	steps: Vec<SagaStep>,
	hooks: Arc<dyn SagaHooks>,
	deadline: Option<Duration>,
}

impl SagaDefinition {
	pub fn builder(name: impl Into<String>) -> SagaDefinitionBuilder {
		SagaDefinitionBuilder {
			name: name.into(),
			steps: Vec::new(),
			hooks: Arc::new(NoopHooks),
			deadline: None,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn steps(&self) -> &[SagaStep] {
		&self.steps
	}

	pub fn step(&self, name: &str) -> Option<&SagaStep> {
		self.steps.iter().find(|s| s.name == name)
	}

	pub fn hooks(&self) -> &dyn SagaHooks {
		self.hooks.as_ref()
	}

	/// Wall-clock budget for the forward pass, checked before each step starts.
	pub fn deadline(&self) -> Option<Duration> {
		self.deadline
	}
}

impl fmt::Debug for SagaDefinition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SagaDefinition")
			.field("name", &self.name)
			.field("steps", &self.steps)
			.field("deadline", &self.deadline)
			.finish()
	}
}

pub struct SagaDefinitionBuilder {
	name: String,
	steps: Vec<SagaStep>,
	hooks: Arc<dyn SagaHooks>,
	deadline: Option<Duration>,
}

impl SagaDefinitionBuilder {
	pub fn step(mut self, step: SagaStep) -> Self {
		self.steps.push(step);
		self
	}

	pub fn steps(mut self, steps: impl IntoIterator<Item = SagaStep>) -> Self {
		self.steps.extend(steps);
		self
	}

	pub fn hooks(mut self, hooks: impl SagaHooks + 'static) -> Self {
		self.hooks = Arc::new(hooks);
		self
	}

	pub fn hooks_arc(mut self, hooks: Arc<dyn SagaHooks>) -> Self {
		self.hooks = hooks;
		self
	}

	pub fn deadline(mut self, deadline: Duration) -> Self {
		self.deadline = Some(deadline);
		self
	}

	/// Apply per-step overrides from the engine configuration, matched by step name.
	///
	/// Entries that cannot take effect are logged at `warn`.
	pub fn apply_config(mut self, config: &EngineConfig) -> Self {
		for problem in ineffective_overrides(&self.steps, config) {
			warn!(saga = %self.name, "{problem}");
		}
		self.steps = self
			.steps
			.into_iter()
			.map(|step| match config.steps.get(&step.name) {
				Some(policy) => step.with_policy(policy),
				None => step,
			})
			.collect();
		self
	}

	pub fn build(self) -> Result<SagaDefinition, DefinitionError> {
		if self.name.trim().is_empty() {
			return Err(DefinitionError::EmptySagaName);
		}
		let mut seen = HashSet::new();
		for (index, step) in self.steps.iter().enumerate() {
			if step.name.trim().is_empty() {
				return Err(DefinitionError::EmptyStepName { index });
			}
			if !seen.insert(step.name.as_str()) {
				return Err(DefinitionError::DuplicateStep {
					saga: self.name.clone(),
					name: step.name.clone(),
				});
			}
		}
		Ok(SagaDefinition {
			name: self.name,
			steps: self.steps,
			hooks: self.hooks,
			deadline: self.deadline,
		})
	}
}

/// Config step policies that would change nothing on the given steps.
fn ineffective_overrides(steps: &[SagaStep], config: &EngineConfig) -> Vec<String> {
	let mut names: Vec<_> = config.steps.keys().collect();
	names.sort_unstable();

	let mut problems = Vec::new();
	for name in names {
		let policy = &config.steps[name];
		let Some(step) = steps.iter().find(|s| &s.name == name) else {
			problems.push(format!("step policy '{name}' matches no step in the saga"));
			continue;
		};
		let retryable = policy.retryable.unwrap_or(step.retryable);
		if policy.max_retries.is_some() && !retryable {
			problems.push(format!(
				"step '{name}': maxRetries has no effect unless retryable is true"
			));
		}
	}
	problems
}
