use std::path::Path;

use playback::ScriptRepository;

use crate::error::Result;
use crate::output::{self, Report};
use crate::repository::FileScriptRepository;

pub async fn execute(path: &Path) -> Result<bool> {
	let script = FileScriptRepository::new().load(&path.to_string_lossy()).await?;
	let validation = script.validate();

	output::print_line(&Report::ScriptSummary {
		script_id: &script.id,
		tasks: script.tasks.len(),
		steps: script.step_count(),
		valid: validation.is_ok(),
		error: validation.as_ref().err().map(ToString::to_string),
	})?;

	if let Err(e) = &validation {
		tracing::warn!(target = "playback.cli", script = %script.id, error = %e, "script is invalid");
	}
	Ok(validation.is_ok())
}
