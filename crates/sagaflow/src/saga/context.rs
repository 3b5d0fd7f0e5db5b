//! Per-execution saga state shared by the steps of one run.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::saga::compensation::CompensationReport;
use crate::saga::error::StepError;
use crate::saga::state::SagaState;

/// Mutable state of one saga execution.
///
/// Steps publish generated identifiers into `metadata` so that later steps and
/// compensations can find them. The executor hands the context to one step at
/// a time as `&mut`, so it is never touched by two steps at once. A context
/// belongs to exactly one execution; do not reuse it across runs.
#[derive(Debug)]
pub struct SagaContext {
	execution_id: Uuid,
	saga_name: String,
	state: SagaState,
	metadata: HashMap<String, Value>,
	completed_steps: Vec<String>,
	outputs: IndexMap<String, Value>,
	compensation_report: Option<CompensationReport>,
	cancellation: Option<CancellationToken>,
}

impl SagaContext {
	pub fn new(saga_name: impl Into<String>) -> Self {
		Self {
			execution_id: Uuid::new_v4(),
			saga_name: saga_name.into(),
			state: SagaState::Pending,
			metadata: HashMap::new(),
			completed_steps: Vec::new(),
			outputs: IndexMap::new(),
			compensation_report: None,
			cancellation: None,
		}
	}

	/// Seed the context with initial metadata.
	pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
		self.metadata.extend(metadata);
		self
	}

	/// Attach a caller-owned cancellation signal for steps to observe.
	///
	/// The executor never cancels on its own; steps decide how to react.
	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancellation = Some(token);
		self
	}

	pub fn execution_id(&self) -> Uuid {
		self.execution_id
	}

	pub fn saga_name(&self) -> &str {
		&self.saga_name
	}

	pub fn state(&self) -> SagaState {
		self.state
	}

	pub fn cancellation(&self) -> Option<&CancellationToken> {
		self.cancellation.as_ref()
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancellation.as_ref().is_some_and(|t| t.is_cancelled())
	}

	pub fn metadata(&self) -> &HashMap<String, Value> {
		&self.metadata
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.metadata.get(key)
	}

	/// Deserialize a metadata entry. Returns `None` if missing or of the wrong shape.
	pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
		self
			.metadata
			.get(key)
			.and_then(|v| serde_json::from_value(v.clone()).ok())
	}

	/// Look up a metadata entry a step cannot do without.
	///
	/// A missing key is a permanent error: retrying will not make it appear.
	pub fn require(&self, key: &str) -> Result<&Value, StepError> {
		self
			.metadata
			.get(key)
			.ok_or_else(|| StepError::permanent(format!("missing context metadata '{key}'")))
	}

	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
		self.metadata.insert(key.into(), value.into())
	}

	/// Serialize `value` into the metadata map.
	pub fn insert_serialized<T: Serialize>(
		&mut self,
		key: impl Into<String>,
		value: &T,
	) -> Result<Option<Value>, StepError> {
		let value = serde_json::to_value(value)
			.map_err(|e| StepError::permanent(format!("failed to serialize context value: {e}")))?;
		Ok(self.metadata.insert(key.into(), value))
	}

	pub fn remove(&mut self, key: &str) -> Option<Value> {
		self.metadata.remove(key)
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.metadata.contains_key(key)
	}

	/// Names of the committed steps, in commit order.
	pub fn completed_steps(&self) -> &[String] {
		&self.completed_steps
	}

	/// Output of a committed step.
	pub fn output(&self, step: &str) -> Option<&Value> {
		self.outputs.get(step)
	}

	/// Outputs of all committed steps, in commit order.
	pub fn outputs(&self) -> &IndexMap<String, Value> {
		&self.outputs
	}

	/// Set once compensation has finished, before the failure hook runs.
	pub fn compensation_report(&self) -> Option<&CompensationReport> {
		self.compensation_report.as_ref()
	}

	pub(crate) fn record_completed(&mut self, step: &str, output: Value) {
		self.completed_steps.push(step.to_string());
		self.outputs.insert(step.to_string(), output);
	}

	pub(crate) fn bind_saga(&mut self, saga_name: &str) {
		self.saga_name = saga_name.to_string();
	}

	pub(crate) fn set_compensation_report(&mut self, report: CompensationReport) {
		self.compensation_report = Some(report);
	}

	pub(crate) fn transition(&mut self, next: SagaState) -> SagaState {
		debug_assert!(
			self.state.can_transition_to(next),
			"illegal saga transition {} -> {}",
			self.state,
			next
		);
		let previous = self.state;
		debug!(
			saga = %self.saga_name,
			execution_id = %self.execution_id,
			from = %previous,
			to = %next,
			"saga state transition"
		);
		self.state = next;
		previous
	}
}

#[cfg(test)]
mod tests {
	use serde::Deserialize;
	use serde_json::json;

	use super::*;

	#[derive(Debug, Serialize, Deserialize, PartialEq)]
	struct OrgRef {
		id: String,
		region: String,
	}

	#[test]
	fn test_metadata_roundtrip_through_serde() {
		let mut ctx = SagaContext::new("provision-org");
		let org = OrgRef {
			id: "org-42".into(),
			region: "eu-west-1".into(),
		};
		ctx.insert_serialized("org", &org).unwrap();

		assert_eq!(ctx.get_as::<OrgRef>("org"), Some(org));
		assert_eq!(ctx.get_as::<u32>("org"), None);
	}

	#[test]
	fn test_require_missing_key_is_permanent() {
		let ctx = SagaContext::new("provision-org");
		let err = ctx.require("orgId").unwrap_err();
		assert!(!err.is_retryable());
		assert!(err.message().contains("orgId"));
	}

	#[test]
	fn test_record_completed_keeps_commit_order() {
		let mut ctx = SagaContext::new("provision-org");
		ctx.record_completed("createOrg", json!({"orgId": "o1"}));
		ctx.record_completed("createAdmin", Value::Null);

		assert_eq!(ctx.completed_steps(), ["createOrg", "createAdmin"]);
		assert_eq!(ctx.output("createOrg"), Some(&json!({"orgId": "o1"})));
		let order: Vec<_> = ctx.outputs().keys().cloned().collect();
		assert_eq!(order, vec!["createOrg", "createAdmin"]);
	}

	#[test]
	fn test_fresh_contexts_are_independent() {
		let a = SagaContext::new("provision-org");
		let b = SagaContext::new("provision-org");
		assert_ne!(a.execution_id(), b.execution_id());
		assert_eq!(a.state(), SagaState::Pending);
	}

	#[test]
	fn test_cancellation_token_is_visible_to_steps() {
		let token = CancellationToken::new();
		let ctx = SagaContext::new("provision-org")
			.with_metadata(HashMap::from([("tenant".to_string(), json!("acme"))]))
			.with_cancellation(token.clone());
		assert!(!ctx.is_cancelled());
		token.cancel();
		assert!(ctx.is_cancelled());
		assert_eq!(ctx.get("tenant"), Some(&json!("acme")));
	}
}
