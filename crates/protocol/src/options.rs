//! Per-session execution options.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a failing step abandons.
///
/// Deserializes from either a scope name or a boolean: `true` means
/// [`StopOnError::Run`], `false` means [`StopOnError::Continue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "StopOnErrorRepr")]
pub enum StopOnError {
	/// Keep executing; the failed task still never counts as completed.
	Continue,
	/// Abandon the rest of the failing task, continue with later tasks.
	Task,
	/// Abandon the whole run.
	#[default]
	Run,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StopOnErrorRepr {
	Flag(bool),
	Scope(StopOnErrorScope),
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum StopOnErrorScope {
	Continue,
	Task,
	Run,
}

impl From<StopOnErrorRepr> for StopOnError {
	fn from(repr: StopOnErrorRepr) -> Self {
		match repr {
			StopOnErrorRepr::Flag(flag) => Self::from(flag),
			StopOnErrorRepr::Scope(StopOnErrorScope::Continue) => Self::Continue,
			StopOnErrorRepr::Scope(StopOnErrorScope::Task) => Self::Task,
			StopOnErrorRepr::Scope(StopOnErrorScope::Run) => Self::Run,
		}
	}
}

impl From<bool> for StopOnError {
	fn from(flag: bool) -> Self {
		if flag { Self::Run } else { Self::Continue }
	}
}

impl fmt::Display for StopOnError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Continue => write!(f, "continue"),
			Self::Task => write!(f, "task"),
			Self::Run => write!(f, "run"),
		}
	}
}

impl FromStr for StopOnError {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"continue" | "false" => Ok(Self::Continue),
			"task" => Ok(Self::Task),
			"run" | "true" => Ok(Self::Run),
			other => Err(format!("invalid stop-on-error policy '{other}' (expected continue, task or run)")),
		}
	}
}

/// Options supplied when a session is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
	/// Block before the first step until resumed or stepped.
	pub pause_on_start: bool,
	pub stop_on_error: StopOnError,
	/// Scales every action timeout. Values at or below zero are treated as 1.0.
	pub timeout_multiplier: f64,
	/// Base directory for relative screenshot paths.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub screenshot_dir: Option<std::path::PathBuf>,
}

impl Default for ExecutionOptions {
	fn default() -> Self {
		Self {
			pause_on_start: false,
			stop_on_error: StopOnError::default(),
			timeout_multiplier: 1.0,
			screenshot_dir: None,
		}
	}
}

impl ExecutionOptions {
	pub fn with_pause_on_start(mut self, pause: bool) -> Self {
		self.pause_on_start = pause;
		self
	}

	pub fn with_stop_on_error(mut self, policy: StopOnError) -> Self {
		self.stop_on_error = policy;
		self
	}

	pub fn with_timeout_multiplier(mut self, multiplier: f64) -> Self {
		self.timeout_multiplier = multiplier;
		self
	}

	pub fn with_screenshot_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
		self.screenshot_dir = Some(dir.into());
		self
	}

	/// The multiplier actually applied to timeouts.
	pub fn effective_multiplier(&self) -> f64 {
		if self.timeout_multiplier.is_finite() && self.timeout_multiplier > 0.0 {
			self.timeout_multiplier
		} else {
			1.0
		}
	}
}
