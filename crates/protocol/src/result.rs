//! Step positions and results.

use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies exactly one step instance in a running script.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPosition {
	pub task_index: usize,
	pub step_index: usize,
	pub task_id: String,
}

impl ExecutionPosition {
	pub fn new(task_index: usize, step_index: usize, task_id: impl Into<String>) -> Self {
		Self {
			task_index,
			step_index,
			task_id: task_id.into(),
		}
	}

	/// Results table key, `"{task_index}:{step_index}"`.
	pub fn key(&self) -> String {
		format!("{}:{}", self.task_index, self.step_index)
	}
}

impl fmt::Display for ExecutionPosition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{} ({})", self.task_index, self.step_index, self.task_id)
	}
}

/// Outcome of executing one step. Produced once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
	pub success: bool,
	/// Wall-clock milliseconds from action start to completion or failure.
	pub duration_ms: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl StepResult {
	pub fn success(duration: Duration, value: Option<Value>) -> Self {
		Self {
			success: true,
			duration_ms: duration_ms(duration),
			value,
			error: None,
		}
	}

	pub fn failure(duration: Duration, error: impl Into<String>) -> Self {
		Self {
			success: false,
			duration_ms: duration_ms(duration),
			value: None,
			error: Some(error.into()),
		}
	}
}

/// Step results keyed by [`ExecutionPosition::key`], in execution order.
pub type ResultsTable = IndexMap<String, StepResult>;

/// Summary attached to `task-complete` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
	/// Every executed step succeeded and none were abandoned.
	pub success: bool,
	/// Number of steps that produced a result.
	pub executed: usize,
	pub failed: usize,
}

/// Per-task progress shown in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
	#[default]
	Pending,
	Running,
	Completed,
	Failed,
	/// A dependency never completed, so no step ran.
	Skipped,
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
