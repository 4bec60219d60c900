//! Declarative scripts: tasks of steps, with dependencies between tasks.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A declarative document describing tasks and steps to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
	/// Identifier used by repositories and snapshots.
	pub id: String,
	/// Human-readable name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Tasks in declared (execution) order.
	#[serde(default)]
	pub tasks: Vec<Task>,
}

/// A named group of steps that may depend on earlier tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
	/// Unique within the script.
	pub id: String,
	#[serde(default)]
	pub steps: Vec<Step>,
	/// Ids of tasks that must complete successfully before this one runs.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub depends_on: Vec<String>,
}

/// One atomic action plus optional post-condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
	#[serde(flatten)]
	pub action: StepAction,
	/// Overrides the action's default timeout.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timeout_ms: Option<u64>,
	/// Why this step exists. Documentation only.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub why: Option<String>,
	/// Remote execution context (frame, window) the action targets.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context: Option<String>,
	/// Expression that must evaluate truthy after the action succeeds.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub post_condition: Option<String>,
}

impl Step {
	/// Creates a step with no timeout override, context or post-condition.
	pub fn new(action: StepAction) -> Self {
		Self {
			action,
			timeout_ms: None,
			why: None,
			context: None,
			post_condition: None,
		}
	}

	pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
		self.timeout_ms = Some(timeout_ms);
		self
	}

	pub fn with_why(mut self, why: impl Into<String>) -> Self {
		self.why = Some(why.into());
		self
	}

	pub fn with_context(mut self, context: impl Into<String>) -> Self {
		self.context = Some(context.into());
		self
	}

	pub fn with_post_condition(mut self, condition: impl Into<String>) -> Self {
		self.post_condition = Some(condition.into());
		self
	}
}

/// Action kinds a step can perform. Each variant carries only what it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum StepAction {
	/// Click the element matched by `selector`, optionally narrowed by its text.
	#[serde(rename_all = "camelCase")]
	Click {
		selector: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		text: Option<String>,
	},
	/// Type `text` into the element matched by `selector`.
	Type { selector: String, text: String },
	/// Run `code` in the target context and return its value.
	Evaluate { code: String },
	/// Re-evaluate `condition` until it is truthy.
	#[serde(rename_all = "camelCase")]
	WaitForCondition {
		condition: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		interval_ms: Option<u64>,
	},
	/// Block until `selector` is visible.
	WaitForVisibility { selector: String },
	/// Block until `selector` is hidden or detached.
	WaitForHidden { selector: String },
	/// Re-evaluate `condition` every `interval_ms` until it is truthy.
	#[serde(rename_all = "camelCase")]
	Poll {
		condition: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		interval_ms: Option<u64>,
	},
	/// Read text (or `property`) from the element matched by `selector`.
	Extract {
		selector: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		property: Option<String>,
	},
	/// Evaluate `condition` and compare the value with `expected`.
	Assert {
		condition: String,
		expected: serde_json::Value,
	},
	Hover { selector: String },
	/// Press `key`, focused on `selector` when given.
	Keyboard {
		key: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		selector: Option<String>,
	},
	/// Capture the surface (or the bounds of `selector`) into `path`.
	Screenshot {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		selector: Option<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		path: Option<String>,
	},
}

impl StepAction {
	/// Wire name of the action kind (`"click"`, `"waitForVisibility"`, ...).
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Click { .. } => "click",
			Self::Type { .. } => "type",
			Self::Evaluate { .. } => "evaluate",
			Self::WaitForCondition { .. } => "waitForCondition",
			Self::WaitForVisibility { .. } => "waitForVisibility",
			Self::WaitForHidden { .. } => "waitForHidden",
			Self::Poll { .. } => "poll",
			Self::Extract { .. } => "extract",
			Self::Assert { .. } => "assert",
			Self::Hover { .. } => "hover",
			Self::Keyboard { .. } => "keyboard",
			Self::Screenshot { .. } => "screenshot",
		}
	}
}

impl fmt::Display for StepAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.kind())
	}
}

/// Reasons a script fails load-time validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
	#[error("task at index {index} has an empty id")]
	EmptyTaskId { index: usize },

	#[error("duplicate task id '{0}'")]
	DuplicateTaskId(String),

	#[error("task '{task}' depends on unknown task '{dependency}'")]
	UnknownDependency { task: String, dependency: String },

	#[error("task '{0}' depends on itself")]
	SelfDependency(String),
}

impl Script {
	pub fn new(id: impl Into<String>, tasks: Vec<Task>) -> Self {
		Self {
			id: id.into(),
			name: None,
			tasks,
		}
	}

	/// Checks task id uniqueness and that every dependency names a task.
	///
	/// Cycles between different tasks are accepted: tasks run in declared
	/// order, so a dependency on a later task is simply never satisfied.
	pub fn validate(&self) -> Result<(), ScriptError> {
		let mut ids = HashSet::with_capacity(self.tasks.len());
		for (index, task) in self.tasks.iter().enumerate() {
			if task.id.is_empty() {
				return Err(ScriptError::EmptyTaskId { index });
			}
			if !ids.insert(task.id.as_str()) {
				return Err(ScriptError::DuplicateTaskId(task.id.clone()));
			}
		}

		for task in &self.tasks {
			for dependency in &task.depends_on {
				if dependency == &task.id {
					return Err(ScriptError::SelfDependency(task.id.clone()));
				}
				if !ids.contains(dependency.as_str()) {
					return Err(ScriptError::UnknownDependency {
						task: task.id.clone(),
						dependency: dependency.clone(),
					});
				}
			}
		}

		Ok(())
	}

	/// Total number of steps across all tasks.
	pub fn step_count(&self) -> usize {
		self.tasks.iter().map(|t| t.steps.len()).sum()
	}
}

impl Task {
	pub fn new(id: impl Into<String>, steps: Vec<Step>) -> Self {
		Self {
			id: id.into(),
			steps,
			depends_on: Vec::new(),
		}
	}

	pub fn depends_on(mut self, id: impl Into<String>) -> Self {
		self.depends_on.push(id.into());
		self
	}
}
