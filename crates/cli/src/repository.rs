//! Scripts loaded from JSON files on disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use playback::{Error, Script, ScriptRepository};

/// Resolves script references as file paths, relative to `base_dir` when set.
#[derive(Debug, Clone, Default)]
pub struct FileScriptRepository {
	base_dir: Option<PathBuf>,
}

impl FileScriptRepository {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
		Self {
			base_dir: Some(base_dir.into()),
		}
	}

	fn resolve(&self, reference: &str) -> PathBuf {
		let path = Path::new(reference);
		match &self.base_dir {
			Some(base) if path.is_relative() => base.join(path),
			_ => path.to_path_buf(),
		}
	}
}

#[async_trait]
impl ScriptRepository for FileScriptRepository {
	async fn load(&self, reference: &str) -> playback::Result<Script> {
		let path = self.resolve(reference);
		tracing::debug!(target = "playback.cli", path = %path.display(), "loading script");

		let bytes = match tokio::fs::read(&path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::ScriptNotFound(reference.to_string())),
			Err(e) => {
				return Err(Error::Repository {
					reference: reference.to_string(),
					message: e.to_string(),
				});
			}
		};

		serde_json::from_slice(&bytes).map_err(|e| Error::Repository {
			reference: reference.to_string(),
			message: format!("invalid script JSON: {e}"),
		})
	}
}
