//! Saga pattern implementation for multi-service operations.
//!
//! A saga manages a business operation that spans several services with no
//! shared transaction. Steps run strictly in order; each committed step is
//! recorded in the [`SagaContext`]. If a step fails terminally, the steps that
//! already committed are compensated in reverse order and the failure hook
//! fires. The failing step itself never committed and is not compensated.
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use sagaflow::{
//! 	CompensationAction, SagaContext, SagaDefinition, SagaExecutor, SagaStep, StepAction, StepError,
//! };
//! use serde_json::{Value, json};
//!
//! struct CreateOrg;
//!
//! #[async_trait]
//! impl StepAction for CreateOrg {
//! 	async fn execute(&self, payload: &Value, ctx: &mut SagaContext) -> Result<Value, StepError> {
//! 		let org_id = format!("org-{}", payload["slug"].as_str().unwrap_or_default());
//! 		ctx.insert("orgId", org_id.clone());
//! 		Ok(json!({ "orgId": org_id }))
//! 	}
//! }
//!
//! struct DeleteOrg;
//!
//! #[async_trait]
//! impl CompensationAction for DeleteOrg {
//! 	async fn compensate(&self, _payload: &Value, ctx: &mut SagaContext) -> Result<(), StepError> {
//! 		let _org_id = ctx.require("orgId")?;
//! 		Ok(())
//! 	}
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let saga = SagaDefinition::builder("provision-org")
//! 	.step(SagaStep::new("createOrg", CreateOrg).with_compensation(DeleteOrg).with_retries(2))
//! 	.build()?;
//!
//! let result = SagaExecutor::new().run(&saga, json!({ "slug": "acme" })).await?;
//! assert_eq!(result.completed_steps, vec!["createOrg"]);
//! # Ok(())
//! # }
//! ```

mod compensation;
mod context;
mod error;
mod executor;
mod observer;
mod registry;
mod retry;
mod state;
mod types;

pub use compensation::{
	CompensationCoordinator, CompensationEntry, CompensationOutcome, CompensationReport,
};
pub use context::SagaContext;
pub use error::{
	AttemptError, CompensationError, DefinitionError, RegistryError, SagaExecutionFailed, StepError,
	StepFailure,
};
pub use executor::{SagaExecutor, SagaResult, StepRecord};
pub use observer::{SagaEvent, SagaObserver};
pub use registry::DefinitionRegistry;
pub use retry::RetryPolicy;
pub use state::SagaState;
pub use types::{
	CompensationAction, NoopHooks, SagaDefinition, SagaDefinitionBuilder, SagaHooks, SagaStep,
	StepAction,
};
