//! Observability extension points.
//!
//! The executor reports what it does as [`SagaEvent`]s. Observers are
//! synchronous and cannot fail the execution: a panic inside `on_event` is
//! caught and logged. Wire them to whatever logging or metrics collaborator
//! the host uses.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::saga::compensation::CompensationOutcome;
use crate::saga::error::{AttemptError, StepFailure, panic_message};
use crate::saga::state::SagaState;

#[derive(Debug, Clone)]
pub enum SagaEvent {
	StateChanged {
		saga: String,
		execution_id: Uuid,
		from: SagaState,
		to: SagaState,
	},
	AttemptStarted {
		saga: String,
		execution_id: Uuid,
		step: String,
		attempt: u32,
	},
	AttemptFinished {
		saga: String,
		execution_id: Uuid,
		step: String,
		attempt: u32,
		duration: Duration,
		error: Option<AttemptError>,
	},
	StepSucceeded {
		saga: String,
		execution_id: Uuid,
		step: String,
		attempts: u32,
	},
	StepFailed {
		saga: String,
		execution_id: Uuid,
		failure: StepFailure,
	},
	CompensationStarted {
		saga: String,
		execution_id: Uuid,
		step: String,
	},
	CompensationFinished {
		saga: String,
		execution_id: Uuid,
		step: String,
		outcome: CompensationOutcome,
	},
}

impl SagaEvent {
	pub fn saga(&self) -> &str {
		match self {
			SagaEvent::StateChanged { saga, .. }
			| SagaEvent::AttemptStarted { saga, .. }
			| SagaEvent::AttemptFinished { saga, .. }
			| SagaEvent::StepSucceeded { saga, .. }
			| SagaEvent::StepFailed { saga, .. }
			| SagaEvent::CompensationStarted { saga, .. }
			| SagaEvent::CompensationFinished { saga, .. } => saga,
		}
	}

	pub fn execution_id(&self) -> Uuid {
		match self {
			SagaEvent::StateChanged { execution_id, .. }
			| SagaEvent::AttemptStarted { execution_id, .. }
			| SagaEvent::AttemptFinished { execution_id, .. }
			| SagaEvent::StepSucceeded { execution_id, .. }
			| SagaEvent::StepFailed { execution_id, .. }
			| SagaEvent::CompensationStarted { execution_id, .. }
			| SagaEvent::CompensationFinished { execution_id, .. } => *execution_id,
		}
	}
}

pub trait SagaObserver: Send + Sync {
	fn on_event(&self, event: &SagaEvent);
}

impl<F> SagaObserver for F
where
	F: Fn(&SagaEvent) + Send + Sync,
{
	fn on_event(&self, event: &SagaEvent) {
		self(event)
	}
}

/// Fan-out to the observers registered on an executor.
#[derive(Clone, Default)]
pub(crate) struct ObserverSet(Vec<Arc<dyn SagaObserver>>);

impl ObserverSet {
	pub(crate) fn push(&mut self, observer: Arc<dyn SagaObserver>) {
		self.0.push(observer);
	}

	pub(crate) fn len(&self) -> usize {
		self.0.len()
	}

	/// Build the event only if someone is listening. A panicking observer is
	/// logged and skipped; it never interrupts the execution.
	pub(crate) fn emit(&self, event: impl FnOnce() -> SagaEvent) {
		if self.0.is_empty() {
			return;
		}
		let event = event();
		for observer in &self.0 {
			if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(&event))) {
				warn!(
					saga = %event.saga(),
					execution_id = %event.execution_id(),
					error = %panic_message(&*panic),
					"saga observer panicked"
				);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	struct Exploding;

	impl SagaObserver for Exploding {
		fn on_event(&self, _event: &SagaEvent) {
			panic!("metrics backend gone");
		}
	}

	fn state_changed() -> SagaEvent {
		SagaEvent::StateChanged {
			saga: "provision-org".into(),
			execution_id: Uuid::new_v4(),
			from: SagaState::Pending,
			to: SagaState::Running,
		}
	}

	#[test]
	fn test_panicking_observer_does_not_starve_others() {
		let seen = Arc::new(AtomicUsize::new(0));
		let counter = seen.clone();

		let mut observers = ObserverSet::default();
		observers.push(Arc::new(Exploding));
		observers.push(Arc::new(move |_: &SagaEvent| {
			counter.fetch_add(1, Ordering::SeqCst);
		}));

		observers.emit(state_changed);
		observers.emit(state_changed);
		assert_eq!(seen.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn test_event_not_built_without_observers() {
		let observers = ObserverSet::default();
		observers.emit(|| panic!("event should not be constructed"));
		assert_eq!(observers.len(), 0);
	}
}
