//! Executes one step against the remote surface.
//!
//! [`ActionExecutor::execute_step`] never fails: bridge errors, exhausted
//! waits, assertion mismatches and I/O problems all end up in the returned
//! [`StepResult`]. Every bridge call and every wait between polls is raced
//! against the run's [`StopSignal`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use playback_protocol::{ExecutionOptions, ScreenshotClip, Step, StepAction, StepResult, is_truthy};
use playback_runtime::{Invocation, Invoke};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::gate::StopSignal;

/// Timeouts and paths the executor applies to every step.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
	/// Single-call actions: click, type, hover, keyboard, evaluate, extract, assert, screenshot.
	pub action_timeout: Duration,
	/// Overall budget for `waitForVisibility`, `waitForHidden` and `waitForCondition`.
	pub wait_timeout: Duration,
	/// Overall budget for `poll`.
	pub poll_timeout: Duration,
	/// Delay between checks when a step does not set its own interval.
	pub poll_interval: Duration,
	/// Scales every effective timeout, including per-step overrides.
	pub timeout_multiplier: f64,
	/// Base directory for relative screenshot paths.
	pub screenshot_dir: Option<PathBuf>,
}

impl Default for ExecutorConfig {
	fn default() -> Self {
		Self {
			action_timeout: Duration::from_millis(5_000),
			wait_timeout: Duration::from_millis(30_000),
			poll_timeout: Duration::from_millis(10_000),
			poll_interval: Duration::from_millis(100),
			timeout_multiplier: 1.0,
			screenshot_dir: None,
		}
	}
}

impl From<&ExecutionOptions> for ExecutorConfig {
	fn from(options: &ExecutionOptions) -> Self {
		Self {
			timeout_multiplier: options.effective_multiplier(),
			screenshot_dir: options.screenshot_dir.clone(),
			..Self::default()
		}
	}
}

impl ExecutorConfig {
	fn scaled(&self, base: Duration) -> Duration {
		let multiplier = self.timeout_multiplier;
		if multiplier == 1.0 || !multiplier.is_finite() || multiplier <= 0.0 {
			return base;
		}
		Duration::try_from_secs_f64(base.as_secs_f64() * multiplier).unwrap_or(Duration::MAX)
	}

	/// Effective timeout for `step`: its override or `default`, then scaled.
	pub fn timeout_for(&self, step: &Step, default: Duration) -> Duration {
		self.scaled(step.timeout_ms.map(Duration::from_millis).unwrap_or(default))
	}

	fn resolve_screenshot_path(&self, path: &str) -> PathBuf {
		let path = Path::new(path);
		match &self.screenshot_dir {
			Some(dir) if path.is_relative() => dir.join(path),
			_ => path.to_path_buf(),
		}
	}
}

/// Why a step failed. Rendered into [`StepResult::error`].
#[derive(Debug, Error)]
enum StepError {
	#[error(transparent)]
	Bridge(#[from] playback_runtime::Error),

	#[error("step aborted by stop request")]
	Aborted,

	#[error("poll timeout: condition `{condition}` not truthy after {elapsed_ms}ms{}", last_error_suffix(.last_error))]
	PollTimeout {
		condition: String,
		elapsed_ms: u128,
		last_error: Option<String>,
	},

	#[error("wait timeout: `{selector}` did not become {state} within {elapsed_ms}ms{}", last_error_suffix(.last_error))]
	VisibilityTimeout {
		selector: String,
		state: &'static str,
		elapsed_ms: u128,
		last_error: Option<String>,
	},

	#[error("wait timeout: condition `{condition}` not truthy after {elapsed_ms}ms{}", last_error_suffix(.last_error))]
	ConditionTimeout {
		condition: String,
		elapsed_ms: u128,
		last_error: Option<String>,
	},

	#[error("assertion failed: `{condition}`\n- expected: {expected}\n+ actual: {actual}")]
	AssertMismatch {
		condition: String,
		expected: Value,
		actual: Value,
	},

	#[error("post-condition not satisfied: `{0}`")]
	PostCondition(String),

	#[error("no bounding box for `{0}`")]
	NoBoundingBox(String),

	#[error("invalid screenshot payload: {0}")]
	ScreenshotPayload(String),

	#[error("failed to write screenshot {path}: {source}")]
	ScreenshotWrite { path: PathBuf, source: std::io::Error },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
	last_error
		.as_ref()
		.map(|e| format!(" (last error: {e})"))
		.unwrap_or_default()
}

/// Result of a bounded polling loop.
enum PollOutcome {
	Satisfied(Value),
	Exhausted { elapsed: Duration, last_error: Option<String> },
}

#[derive(Deserialize)]
struct ScreenshotReply {
	binary: String,
}

/// Drives a remote surface one step at a time.
pub struct ActionExecutor {
	invoker: Arc<dyn Invoke>,
	config: ExecutorConfig,
	stop: StopSignal,
}

impl ActionExecutor {
	pub fn new(invoker: Arc<dyn Invoke>, config: ExecutorConfig) -> Self {
		Self {
			invoker,
			config,
			stop: StopSignal::never(),
		}
	}

	/// Makes in-flight calls and waits give up as soon as `stop` fires.
	pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
		self.stop = stop;
		self
	}

	pub fn config(&self) -> &ExecutorConfig {
		&self.config
	}

	/// Runs the step's action and post-condition.
	///
	/// The duration covers both; failures are captured, never returned.
	pub async fn execute_step(&self, step: &Step) -> StepResult {
		let started = Instant::now();

		let outcome = match self.perform(step).await {
			Ok(value) => self.check_post_condition(step).await.map(|()| value),
			Err(e) => Err(e),
		};

		match outcome {
			Ok(value) => StepResult::success(started.elapsed(), value),
			Err(e) => {
				tracing::debug!(target = "playback.executor", action = step.action.kind(), error = %e, "step failed");
				StepResult::failure(started.elapsed(), e.to_string())
			}
		}
	}

	async fn perform(&self, step: &Step) -> Result<Option<Value>, StepError> {
		let target = step.context.as_deref();
		let action_timeout = self.config.timeout_for(step, self.config.action_timeout);

		match &step.action {
			StepAction::Click { selector, text } => {
				let mut args = Map::new();
				args.insert("selector".into(), json!(selector));
				if let Some(text) = text {
					args.insert("text".into(), json!(text));
				}
				self.call("click", Value::Object(args), target, action_timeout).await?;
				Ok(None)
			}
			StepAction::Type { selector, text } => {
				self.call("type", json!({ "selector": selector, "text": text }), target, action_timeout)
					.await?;
				Ok(None)
			}
			StepAction::Hover { selector } => {
				self.call("hover", json!({ "selector": selector }), target, action_timeout)
					.await?;
				Ok(None)
			}
			StepAction::Keyboard { key, selector } => {
				let mut args = Map::new();
				args.insert("key".into(), json!(key));
				if let Some(selector) = selector {
					args.insert("selector".into(), json!(selector));
				}
				self.call("press", Value::Object(args), target, action_timeout).await?;
				Ok(None)
			}
			StepAction::Evaluate { code } => {
				let value = self.evaluate(code, target, action_timeout).await?;
				Ok(Some(value))
			}
			StepAction::Extract { selector, property } => {
				let mut args = Map::new();
				args.insert("selector".into(), json!(selector));
				if let Some(property) = property {
					args.insert("property".into(), json!(property));
				}
				let value = self.call("extract", Value::Object(args), target, action_timeout).await?;
				Ok(Some(value))
			}
			StepAction::WaitForVisibility { selector } => {
				self.wait_for_visibility(step, selector, true).await?;
				Ok(None)
			}
			StepAction::WaitForHidden { selector } => {
				self.wait_for_visibility(step, selector, false).await?;
				Ok(None)
			}
			StepAction::WaitForCondition { condition, interval_ms } => {
				let overall = self.config.timeout_for(step, self.config.wait_timeout);
				match self.poll_condition(condition, target, *interval_ms, overall).await? {
					PollOutcome::Satisfied(value) => Ok(Some(value)),
					PollOutcome::Exhausted { elapsed, last_error } => Err(StepError::ConditionTimeout {
						condition: condition.clone(),
						elapsed_ms: elapsed.as_millis(),
						last_error,
					}),
				}
			}
			StepAction::Poll { condition, interval_ms } => {
				let overall = self.config.timeout_for(step, self.config.poll_timeout);
				match self.poll_condition(condition, target, *interval_ms, overall).await? {
					PollOutcome::Satisfied(value) => Ok(Some(value)),
					PollOutcome::Exhausted { elapsed, last_error } => Err(StepError::PollTimeout {
						condition: condition.clone(),
						elapsed_ms: elapsed.as_millis(),
						last_error,
					}),
				}
			}
			StepAction::Assert { condition, expected } => {
				let actual = self.evaluate(condition, target, action_timeout).await?;
				if values_match(&actual, expected) {
					Ok(Some(actual))
				} else {
					Err(StepError::AssertMismatch {
						condition: condition.clone(),
						expected: expected.clone(),
						actual,
					})
				}
			}
			StepAction::Screenshot { selector, path } => {
				let Some(path) = path else {
					return Ok(Some(json!({ "skipped": true })));
				};
				let value = self
					.screenshot(selector.as_deref(), path, target, action_timeout)
					.await?;
				Ok(Some(value))
			}
		}
	}

	async fn check_post_condition(&self, step: &Step) -> Result<(), StepError> {
		let Some(condition) = &step.post_condition else {
			return Ok(());
		};
		let timeout = self.config.scaled(self.config.action_timeout);
		let value = self.evaluate(condition, step.context.as_deref(), timeout).await?;
		if is_truthy(&value) {
			Ok(())
		} else {
			Err(StepError::PostCondition(condition.clone()))
		}
	}

	async fn evaluate(&self, expression: &str, target: Option<&str>, timeout: Duration) -> Result<Value, StepError> {
		self.call("evaluate", json!({ "expression": expression }), target, timeout)
			.await
	}

	/// One bridge invocation, abandoned as soon as the run is stopped.
	async fn call(&self, action: &str, args: Value, target: Option<&str>, timeout: Duration) -> Result<Value, StepError> {
		let invocation = Invocation::new(action, args)
			.with_target(target.map(str::to_string))
			.with_timeout(timeout);

		let mut stop = self.stop.clone();
		tokio::select! {
			biased;
			_ = stop.stopped() => Err(StepError::Aborted),
			result = self.invoker.invoke(invocation) => result.map_err(StepError::from),
		}
	}

	async fn sleep(&self, duration: Duration) -> Result<(), StepError> {
		let mut stop = self.stop.clone();
		tokio::select! {
			biased;
			_ = stop.stopped() => Err(StepError::Aborted),
			_ = tokio::time::sleep(duration) => Ok(()),
		}
	}

	async fn wait_for_visibility(&self, step: &Step, selector: &str, visible: bool) -> Result<(), StepError> {
		let overall = self.config.timeout_for(step, self.config.wait_timeout);
		let args = json!({ "selector": selector });
		let outcome = self
			.poll_until(
				"isVisible",
				&args,
				step.context.as_deref(),
				self.config.poll_interval,
				overall,
				|value| is_truthy(value) == visible,
			)
			.await?;

		match outcome {
			PollOutcome::Satisfied(_) => Ok(()),
			PollOutcome::Exhausted { elapsed, last_error } => Err(StepError::VisibilityTimeout {
				selector: selector.to_string(),
				state: if visible { "visible" } else { "hidden" },
				elapsed_ms: elapsed.as_millis(),
				last_error,
			}),
		}
	}

	async fn poll_condition(
		&self,
		condition: &str,
		target: Option<&str>,
		interval_ms: Option<u64>,
		overall: Duration,
	) -> Result<PollOutcome, StepError> {
		let interval = interval_ms
			.map(Duration::from_millis)
			.unwrap_or(self.config.poll_interval);
		let args = json!({ "expression": condition });
		self.poll_until("evaluate", &args, target, interval, overall, is_truthy)
			.await
	}

	/// Repeats `action` until `satisfied` accepts its reply or `overall` elapses.
	///
	/// Failed checks count as unsatisfied; the last failure is kept for the
	/// error message. Each check is bounded by the remaining budget.
	async fn poll_until(
		&self,
		action: &str,
		args: &Value,
		target: Option<&str>,
		interval: Duration,
		overall: Duration,
		satisfied: impl Fn(&Value) -> bool,
	) -> Result<PollOutcome, StepError> {
		let started = Instant::now();
		// No deadline when the budget is past the clock's range.
		let deadline = started.checked_add(overall);
		let time_left = || deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()));
		let mut last_error = None;

		loop {
			let remaining = time_left();
			if remaining.is_zero() {
				break;
			}

			let per_call = remaining.min(self.config.scaled(self.config.action_timeout));
			match self.call(action, args.clone(), target, per_call).await {
				Ok(value) if satisfied(&value) => return Ok(PollOutcome::Satisfied(value)),
				Ok(_) => {}
				Err(StepError::Aborted) => return Err(StepError::Aborted),
				Err(e) => last_error = Some(e.to_string()),
			}

			let remaining = time_left();
			if remaining.is_zero() {
				break;
			}
			self.sleep(interval.min(remaining)).await?;
		}

		Ok(PollOutcome::Exhausted {
			elapsed: started.elapsed(),
			last_error,
		})
	}

	async fn screenshot(
		&self,
		selector: Option<&str>,
		path: &str,
		target: Option<&str>,
		timeout: Duration,
	) -> Result<Value, StepError> {
		let clip = match selector {
			Some(selector) => {
				let bounds = self
					.call("boundingBox", json!({ "selector": selector }), target, timeout)
					.await?;
				let clip: Option<ScreenshotClip> = serde_json::from_value(bounds)
					.map_err(|e| StepError::ScreenshotPayload(format!("bounding box: {e}")))?;
				Some(clip.ok_or_else(|| StepError::NoBoundingBox(selector.to_string()))?)
			}
			None => None,
		};

		let mut args = Map::new();
		if let Some(clip) = clip {
			args.insert("clip".into(), json!(clip));
		}
		let reply = self.call("screenshot", Value::Object(args), target, timeout).await?;
		let reply: ScreenshotReply =
			serde_json::from_value(reply).map_err(|e| StepError::ScreenshotPayload(e.to_string()))?;
		let bytes = base64::prelude::BASE64_STANDARD
			.decode(&reply.binary)
			.map_err(|e| StepError::ScreenshotPayload(format!("decode screenshot: {e}")))?;

		let resolved = self.config.resolve_screenshot_path(path);
		write_file(&resolved, &bytes)
			.await
			.map_err(|source| StepError::ScreenshotWrite {
				path: resolved.clone(),
				source,
			})?;

		Ok(json!({
			"path": resolved.display().to_string(),
			"byteSize": bytes.len(),
		}))
	}
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		tokio::fs::create_dir_all(parent).await?;
	}
	tokio::fs::write(path, bytes).await
}

/// JSON equality where numbers compare by value, so `1` matches `1.0`.
fn values_match(actual: &Value, expected: &Value) -> bool {
	match (actual, expected) {
		(Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
			(Some(a), Some(b)) => a == b,
			_ => a == b,
		},
		(Value::Array(a), Value::Array(b)) => a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_match(a, b)),
		(Value::Object(a), Value::Object(b)) => {
			a.len() == b.len()
				&& a
					.iter()
					.all(|(key, value)| b.get(key).is_some_and(|other| values_match(value, other)))
		}
		_ => actual == expected,
	}
}
