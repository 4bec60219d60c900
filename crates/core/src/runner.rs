//! Walks a script's tasks and steps in declared order.
//!
//! Before each step the runner emits `step-start` and then consults the
//! [`PauseGate`]. A task whose dependencies have not all completed is skipped
//! outright: no step events, no results. A task counts as completed only when
//! every one of its steps succeeded.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use playback_protocol::{
	ExecutionPosition, Script, SessionEvent, SessionState, StepResult, StopOnError, TaskInfo, TaskOutcome, TaskStatus,
};
use serde::Serialize;

use crate::executor::ActionExecutor;
use crate::gate::{Checkpoint, PauseGate};

/// Where the runner publishes progress.
///
/// Implemented by the session; the runner is the only writer.
pub trait RunSink: Send + Sync {
	fn set_position(&self, position: Option<ExecutionPosition>);

	fn set_task_status(&self, task_index: usize, status: TaskStatus);

	fn record_result(&self, key: String, result: StepResult);

	/// Updates the session state and emits `session-state`.
	fn set_state(&self, state: SessionState, position: Option<ExecutionPosition>);

	fn emit(&self, event: SessionEvent);
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
	/// Every recorded step succeeded and the run was not stopped.
	pub success: bool,
	pub aborted: bool,
	pub duration_ms: u64,
	pub executed_steps: usize,
	pub failed_steps: usize,
	pub skipped_tasks: Vec<String>,
}

impl RunSummary {
	pub fn duration(&self) -> Duration {
		Duration::from_millis(self.duration_ms)
	}
}

/// One pass over a script.
pub struct Runner {
	script: Arc<Script>,
	executor: ActionExecutor,
	gate: Arc<PauseGate>,
	policy: StopOnError,
	sink: Arc<dyn RunSink>,
}

#[derive(Default)]
struct Tally {
	executed: usize,
	failed: usize,
	skipped: Vec<String>,
}

impl Runner {
	pub fn new(
		script: Arc<Script>,
		executor: ActionExecutor,
		gate: Arc<PauseGate>,
		policy: StopOnError,
		sink: Arc<dyn RunSink>,
	) -> Self {
		Self {
			script,
			executor,
			gate,
			policy,
			sink,
		}
	}

	pub async fn run(self) -> RunSummary {
		let started = Instant::now();
		let mut completed: HashSet<&str> = HashSet::new();
		let mut tally = Tally::default();
		let mut aborted = false;

		tracing::debug!(
			target = "playback.runner",
			script = %self.script.id,
			tasks = self.script.tasks.len(),
			policy = %self.policy,
			"run started"
		);

		'tasks: for (task_index, task) in self.script.tasks.iter().enumerate() {
			let info = TaskInfo::from(task);
			let missing: Vec<String> = task
				.depends_on
				.iter()
				.filter(|dep| !completed.contains(dep.as_str()))
				.cloned()
				.collect();

			if !missing.is_empty() {
				tracing::debug!(target = "playback.runner", task = %task.id, ?missing, "skipping task with unmet dependencies");
				self.sink.set_task_status(task_index, TaskStatus::Skipped);
				self.sink.emit(SessionEvent::TaskSkipped {
					task_index,
					task: info,
					missing,
				});
				tally.skipped.push(task.id.clone());
				continue;
			}

			self.sink.set_task_status(task_index, TaskStatus::Running);
			self.sink.emit(SessionEvent::TaskStart {
				task_index,
				task: info.clone(),
			});

			let mut outcome = TaskOutcome {
				success: true,
				executed: 0,
				failed: 0,
			};
			let mut abandon_run = false;

			for (step_index, step) in task.steps.iter().enumerate() {
				let position = ExecutionPosition::new(task_index, step_index, &task.id);
				self.sink.set_position(Some(position.clone()));
				self.sink.emit(SessionEvent::StepStart {
					position: position.clone(),
					step: step.clone(),
				});

				if !self.checkpoint(&position).await {
					self.sink.set_task_status(task_index, TaskStatus::Pending);
					aborted = true;
					break 'tasks;
				}

				let result = self.executor.execute_step(step).await;
				if self.gate.is_stopped() {
					tracing::debug!(target = "playback.runner", %position, "discarding result of step interrupted by stop");
					self.sink.set_task_status(task_index, TaskStatus::Pending);
					aborted = true;
					break 'tasks;
				}

				let succeeded = result.success;
				self.sink.record_result(position.key(), result.clone());
				self.sink.emit(SessionEvent::StepComplete {
					position: position.clone(),
					step: step.clone(),
					result,
				});
				outcome.executed += 1;
				tally.executed += 1;

				if succeeded {
					continue;
				}

				outcome.success = false;
				outcome.failed += 1;
				tally.failed += 1;
				tracing::debug!(target = "playback.runner", %position, policy = %self.policy, "step failed");

				match self.policy {
					StopOnError::Continue => {}
					StopOnError::Task => break,
					StopOnError::Run => {
						abandon_run = true;
						break;
					}
				}
			}

			if outcome.success {
				completed.insert(task.id.as_str());
				self.sink.set_task_status(task_index, TaskStatus::Completed);
			} else {
				self.sink.set_task_status(task_index, TaskStatus::Failed);
			}
			self.sink.emit(SessionEvent::TaskComplete {
				task_index,
				task: info,
				result: outcome,
			});

			if abandon_run {
				tracing::debug!(target = "playback.runner", task = %task.id, "abandoning run after failure");
				break;
			}
		}

		let duration = started.elapsed();
		let summary = RunSummary {
			success: tally.failed == 0 && !aborted,
			aborted,
			duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
			executed_steps: tally.executed,
			failed_steps: tally.failed,
			skipped_tasks: tally.skipped,
		};

		tracing::debug!(
			target = "playback.runner",
			success = summary.success,
			aborted,
			executed = summary.executed_steps,
			duration_ms = summary.duration_ms,
			"run finished"
		);

		self.sink.emit(SessionEvent::ExecutionComplete {
			success: summary.success,
			duration_ms: summary.duration_ms,
			aborted,
		});
		if !aborted {
			self.sink.set_position(None);
			self.sink.set_state(SessionState::Completed, None);
		}
		summary
	}

	/// Blocks while the gate is armed. Returns `false` when the run was stopped.
	async fn checkpoint(&self, position: &ExecutionPosition) -> bool {
		let mut parked = false;
		loop {
			match self.gate.checkpoint() {
				Checkpoint::Proceed => {
					if parked {
						self.sink.set_state(SessionState::Running, Some(position.clone()));
					}
					return true;
				}
				Checkpoint::Stop => return false,
				Checkpoint::Wait(release) => {
					if !parked {
						tracing::debug!(target = "playback.runner", %position, "paused");
						self.sink.set_state(SessionState::Paused, Some(position.clone()));
						parked = true;
					}
					let _ = release.await;
				}
			}
		}
	}
}
