//! Session lifecycle states, the events a session emits, and snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::options::ExecutionOptions;
use crate::result::{ExecutionPosition, ResultsTable, StepResult, TaskOutcome, TaskStatus};
use crate::script::{Step, Task};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
	#[default]
	Idle,
	Ready,
	Running,
	Paused,
	Completed,
	Error,
}

impl SessionState {
	/// A run is in flight (possibly blocked on the pause gate).
	pub fn is_active(self) -> bool {
		matches!(self, Self::Running | Self::Paused)
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::Idle => "idle",
			Self::Ready => "ready",
			Self::Running => "running",
			Self::Paused => "paused",
			Self::Completed => "completed",
			Self::Error => "error",
		};
		f.write_str(name)
	}
}

/// Task identity carried by task-level events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
	pub id: String,
	pub step_count: usize,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub depends_on: Vec<String>,
}

impl From<&Task> for TaskInfo {
	fn from(task: &Task) -> Self {
		Self {
			id: task.id.clone(),
			step_count: task.steps.len(),
			depends_on: task.depends_on.clone(),
		}
	}
}

/// Events emitted by a session while it initializes and runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
	#[serde(rename_all = "camelCase")]
	SessionState {
		state: SessionState,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		position: Option<ExecutionPosition>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error: Option<String>,
	},
	#[serde(rename_all = "camelCase")]
	SessionReady { session_id: String },
	#[serde(rename_all = "camelCase")]
	TaskStart { task_index: usize, task: TaskInfo },
	/// A dependency was not satisfied; none of the task's steps ran.
	#[serde(rename_all = "camelCase")]
	TaskSkipped {
		task_index: usize,
		task: TaskInfo,
		missing: Vec<String>,
	},
	#[serde(rename_all = "camelCase")]
	TaskComplete {
		task_index: usize,
		task: TaskInfo,
		result: TaskOutcome,
	},
	StepStart { position: ExecutionPosition, step: Step },
	StepComplete {
		position: ExecutionPosition,
		step: Step,
		result: StepResult,
	},
	#[serde(rename_all = "camelCase")]
	ExecutionComplete {
		success: bool,
		duration_ms: u64,
		/// The run was stopped before reaching its end.
		#[serde(default)]
		aborted: bool,
	},
}

impl SessionEvent {
	/// Wire name of the event (`"step-start"`, ...).
	pub fn kind(&self) -> &'static str {
		match self {
			Self::SessionState { .. } => "session-state",
			Self::SessionReady { .. } => "session-ready",
			Self::TaskStart { .. } => "task-start",
			Self::TaskSkipped { .. } => "task-skipped",
			Self::TaskComplete { .. } => "task-complete",
			Self::StepStart { .. } => "step-start",
			Self::StepComplete { .. } => "step-complete",
			Self::ExecutionComplete { .. } => "execution-complete",
		}
	}

	/// Whether this event ends a run: `execution-complete` or an error state.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			Self::ExecutionComplete { .. }
				| Self::SessionState {
					state: SessionState::Error,
					..
				}
		)
	}
}

/// Per-task row of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
	pub task_index: usize,
	pub task_id: String,
	pub status: TaskStatus,
}

/// Serializable point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
	pub session_id: String,
	pub script_id: String,
	pub state: SessionState,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub position: Option<ExecutionPosition>,
	pub tasks: Vec<TaskProgress>,
	pub results: ResultsTable,
	pub options: ExecutionOptions,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_event_tags_are_kebab_case() {
		let event = SessionEvent::ExecutionComplete {
			success: true,
			duration_ms: 40,
			aborted: false,
		};
		let value = serde_json::to_value(&event).unwrap();
		assert_eq!(
			value,
			json!({"type": "execution-complete", "success": true, "durationMs": 40, "aborted": false})
		);
		assert_eq!(event.kind(), "execution-complete");
		assert!(event.is_terminal());
	}

	#[test]
	fn test_state_event_omits_empty_fields() {
		let event = SessionEvent::SessionState {
			state: SessionState::Paused,
			position: Some(ExecutionPosition::new(0, 1, "a")),
			error: None,
		};
		let value = serde_json::to_value(&event).unwrap();
		assert_eq!(value["type"], "session-state");
		assert_eq!(value["state"], "paused");
		assert_eq!(value["position"]["stepIndex"], 1);
		assert!(value.get("error").is_none());
		assert!(!event.is_terminal());
	}

	#[test]
	fn test_error_state_is_terminal() {
		let event = SessionEvent::SessionState {
			state: SessionState::Error,
			position: None,
			error: Some("boom".into()),
		};
		assert!(event.is_terminal());
	}

	#[test]
	fn test_session_state_active() {
		assert!(SessionState::Running.is_active());
		assert!(SessionState::Paused.is_active());
		assert!(!SessionState::Ready.is_active());
		assert_eq!(SessionState::Completed.to_string(), "completed");
	}
}
