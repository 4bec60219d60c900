//! JSON-lines output on stdout.

use std::io::Write;

use playback::{RunSummary, SessionSnapshot};
use serde::Serialize;

use crate::error::Result;

/// Lines the CLI prints besides the registry's own events.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Report<'a> {
	#[serde(rename_all = "camelCase")]
	Snapshot { snapshot: &'a SessionSnapshot },
	#[serde(rename_all = "camelCase")]
	RunSummary {
		session_id: &'a str,
		#[serde(flatten)]
		summary: &'a RunSummary,
	},
	#[serde(rename_all = "camelCase")]
	ScriptSummary {
		script_id: &'a str,
		tasks: usize,
		steps: usize,
		valid: bool,
		#[serde(skip_serializing_if = "Option::is_none")]
		error: Option<String>,
	},
}

/// Serializes `value` as a single line and flushes.
pub fn write_line<W: Write, T: Serialize + ?Sized>(writer: &mut W, value: &T) -> Result<()> {
	let mut line = serde_json::to_vec(value)?;
	line.push(b'\n');
	writer.write_all(&line)?;
	writer.flush()?;
	Ok(())
}

/// [`write_line`] to a locked stdout, so concurrent lines never interleave.
pub fn print_line<T: Serialize + ?Sized>(value: &T) -> Result<()> {
	let stdout = std::io::stdout();
	let mut handle = stdout.lock();
	write_line(&mut handle, value)
}
