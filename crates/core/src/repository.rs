//! Script lookup for the registry.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use playback_protocol::Script;

use crate::error::{Error, Result};

/// Resolves a script reference to a script.
#[async_trait]
pub trait ScriptRepository: Send + Sync {
	async fn load(&self, reference: &str) -> Result<Script>;
}

/// Scripts registered in memory, keyed by their id.
#[derive(Debug, Default)]
pub struct InMemoryScriptRepository {
	scripts: DashMap<String, Arc<Script>>,
}

impl InMemoryScriptRepository {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds or replaces the script stored under its id.
	pub fn insert(&self, script: Script) {
		self.scripts.insert(script.id.clone(), Arc::new(script));
	}

	pub fn remove(&self, id: &str) -> Option<Arc<Script>> {
		self.scripts.remove(id).map(|(_, script)| script)
	}

	pub fn len(&self) -> usize {
		self.scripts.len()
	}

	pub fn is_empty(&self) -> bool {
		self.scripts.is_empty()
	}
}

impl FromIterator<Script> for InMemoryScriptRepository {
	fn from_iter<I: IntoIterator<Item = Script>>(iter: I) -> Self {
		let repository = Self::new();
		for script in iter {
			repository.insert(script);
		}
		repository
	}
}

#[async_trait]
impl ScriptRepository for InMemoryScriptRepository {
	async fn load(&self, reference: &str) -> Result<Script> {
		self.scripts
			.get(reference)
			.map(|entry| Script::clone(entry.value()))
			.ok_or_else(|| Error::ScriptNotFound(reference.to_string()))
	}
}
