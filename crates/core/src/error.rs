//! Error types for the playback engine.

use playback_protocol::{ScriptError, SessionState};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by sessions and the registry.
///
/// Step failures never show up here: they are captured in
/// [`StepResult`](playback_protocol::StepResult)s instead.
#[derive(Debug, Error)]
pub enum Error {
	/// No session is registered under this id.
	#[error("Session not found: {0}")]
	SessionNotFound(String),

	/// The operation is not allowed in the session's current state.
	#[error("Cannot {operation} while session is {state}")]
	InvalidOperation { operation: &'static str, state: SessionState },

	/// The session was disposed and accepts no further operations.
	#[error("Session has been disposed")]
	Disposed,

	#[error("Invalid script: {0}")]
	InvalidScript(#[from] ScriptError),

	/// The repository has no script under this reference.
	#[error("Script not found: {0}")]
	ScriptNotFound(String),

	/// The repository failed while loading a script.
	#[error("Failed to load script {reference}: {message}")]
	Repository { reference: String, message: String },

	/// Acquiring or probing the remote surface failed.
	#[error("Initialization failed: {0}")]
	Initialization(String),

	/// The run task ended without producing a summary.
	#[error("Run failed: {0}")]
	RunFailed(String),

	/// One or more sessions failed to dispose; the rest were disposed anyway.
	#[error("Failed to dispose {} session(s): {}", .0.len(), summarize(.0))]
	DisposeAll(Vec<(String, Error)>),

	#[error(transparent)]
	Runtime(#[from] playback_runtime::Error),
}

fn summarize(failures: &[(String, Error)]) -> String {
	failures
		.iter()
		.map(|(id, err)| format!("{id}: {err}"))
		.collect::<Vec<_>>()
		.join("; ")
}

impl Error {
	pub(crate) fn invalid(operation: &'static str, state: SessionState) -> Self {
		Self::InvalidOperation { operation, state }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_invalid_operation_message() {
		let err = Error::invalid("resume", SessionState::Idle);
		assert_eq!(err.to_string(), "Cannot resume while session is idle");
	}

	#[test]
	fn test_dispose_all_lists_every_failure() {
		let err = Error::DisposeAll(vec![
			("session-1".to_string(), Error::Initialization("surface gone".to_string())),
			("session-4".to_string(), Error::RunFailed("panicked".to_string())),
		]);
		let message = err.to_string();
		assert!(message.starts_with("Failed to dispose 2 session(s)"));
		assert!(message.contains("session-1: Initialization failed: surface gone"));
		assert!(message.contains("session-4: Run failed: panicked"));
	}
}
