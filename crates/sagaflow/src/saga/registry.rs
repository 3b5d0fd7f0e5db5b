use std::collections::HashMap;
use std::sync::Arc;

use crate::saga::error::RegistryError;
use crate::saga::types::SagaDefinition;

/// Saga definitions by name, assembled at startup and read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct DefinitionRegistry {
	definitions: HashMap<String, Arc<SagaDefinition>>,
}

impl DefinitionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, definition: SagaDefinition) -> Result<Arc<SagaDefinition>, RegistryError> {
		let name = definition.name().to_string();
		if self.definitions.contains_key(&name) {
			return Err(RegistryError::AlreadyRegistered(name));
		}
		let definition = Arc::new(definition);
		self.definitions.insert(name, definition.clone());
		Ok(definition)
	}

	pub fn get(&self, name: &str) -> Result<Arc<SagaDefinition>, RegistryError> {
		self
			.definitions
			.get(name)
			.cloned()
			.ok_or_else(|| RegistryError::NotFound(name.to_string()))
	}

	pub fn contains(&self, name: &str) -> bool {
		self.definitions.contains_key(name)
	}

	/// Registered saga names, sorted.
	pub fn names(&self) -> Vec<&str> {
		let mut names: Vec<_> = self.definitions.keys().map(String::as_str).collect();
		names.sort_unstable();
		names
	}

	pub fn len(&self) -> usize {
		self.definitions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.definitions.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn def(name: &str) -> SagaDefinition {
		SagaDefinition::builder(name).build().unwrap()
	}

	#[test]
	fn test_register_and_lookup() {
		let mut registry = DefinitionRegistry::new();
		registry.register(def("provision-org")).unwrap();
		registry.register(def("offboard-org")).unwrap();

		assert_eq!(registry.get("provision-org").unwrap().name(), "provision-org");
		assert_eq!(registry.names(), vec!["offboard-org", "provision-org"]);
		assert_eq!(
			registry.get("rename-org").unwrap_err(),
			RegistryError::NotFound("rename-org".into())
		);
	}

	#[test]
	fn test_duplicate_registration_rejected() {
		let mut registry = DefinitionRegistry::new();
		registry.register(def("provision-org")).unwrap();
		assert_eq!(
			registry.register(def("provision-org")).unwrap_err(),
			RegistryError::AlreadyRegistered("provision-org".into())
		);
		assert_eq!(registry.len(), 1);
	}
}
