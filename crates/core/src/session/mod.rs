//! One script execution and everything it owns.
//!
//! A [`Session`] holds the script, the remote surface handle, the current run
//! and the results table. Lifecycle operations are serialized; `pause`,
//! `resume` and `step` act on the current run's [`PauseGate`] and may be
//! issued while another task is awaiting [`Session::start`].
//!
//! | op \ state | idle | ready | running | paused | completed | error |
//! |---|---|---|---|---|---|---|
//! | initialize | acquire | no-op | invalid | invalid | no-op | acquire |
//! | start | initialize + run | run | invalid | resume + wait | run | initialize + run |
//! | pause | invalid | invalid | pause | no-op | invalid | invalid |
//! | resume | invalid | invalid | no-op | resume | invalid | invalid |
//! | step | initialize + one step | one step | pause | one step | one step | invalid |
//! | stop | idle | idle | abort, idle | abort, idle | idle | idle |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use playback_protocol::{
	ExecutionOptions, ExecutionPosition, ResultsTable, Script, SessionEvent, SessionSnapshot, SessionState, StepResult,
	TaskProgress, TaskStatus,
};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::executor::{ActionExecutor, ExecutorConfig};
use crate::gate::PauseGate;
use crate::handlers::{self, ListenerMap, Subscription};
use crate::runner::{RunSink, RunSummary, Runner};
use crate::surface::{Surface, SurfaceProvider};

/// Identifier assigned by the registry (`session-N`).
pub type SessionId = String;

type RunOutcome = std::result::Result<RunSummary, String>;

/// Mutable view shared between the session and its runner.
#[derive(Debug, Default)]
struct Status {
	state: SessionState,
	position: Option<ExecutionPosition>,
	error: Option<String>,
	tasks: Vec<TaskStatus>,
	results: ResultsTable,
}

struct SessionShared {
	id: SessionId,
	script: Arc<Script>,
	options: ExecutionOptions,
	status: Mutex<Status>,
	listeners: ListenerMap<SessionEvent>,
}

impl SessionShared {
	fn state(&self) -> SessionState {
		self.status.lock().state
	}

	fn begin_run(&self) {
		let mut status = self.status.lock();
		status.results.clear();
		status.tasks = vec![TaskStatus::Pending; self.script.tasks.len()];
		status.position = None;
		status.error = None;
	}

	/// Moves to `error` and emits the terminal `session-state` event.
	fn fail(&self, message: String) {
		let position = {
			let mut status = self.status.lock();
			status.state = SessionState::Error;
			status.error = Some(message.clone());
			status.position.clone()
		};
		tracing::warn!(target = "playback.session", session = %self.id, error = %message, "session failed");
		self.emit(SessionEvent::SessionState {
			state: SessionState::Error,
			position,
			error: Some(message),
		});
	}

	fn snapshot(&self) -> SessionSnapshot {
		let status = self.status.lock();
		let tasks = self
			.script
			.tasks
			.iter()
			.enumerate()
			.map(|(task_index, task)| TaskProgress {
				task_index,
				task_id: task.id.clone(),
				status: status.tasks.get(task_index).copied().unwrap_or_default(),
			})
			.collect();

		SessionSnapshot {
			session_id: self.id.clone(),
			script_id: self.script.id.clone(),
			state: status.state,
			position: status.position.clone(),
			tasks,
			results: status.results.clone(),
			options: self.options.clone(),
			error: status.error.clone(),
		}
	}
}

impl RunSink for SessionShared {
	fn set_position(&self, position: Option<ExecutionPosition>) {
		self.status.lock().position = position;
	}

	fn set_task_status(&self, task_index: usize, status: TaskStatus) {
		let mut current = self.status.lock();
		if let Some(slot) = current.tasks.get_mut(task_index) {
			*slot = status;
		}
	}

	fn record_result(&self, key: String, result: StepResult) {
		self.status.lock().results.insert(key, result);
	}

	fn set_state(&self, state: SessionState, position: Option<ExecutionPosition>) {
		{
			let mut status = self.status.lock();
			status.state = state;
			if position.is_some() {
				status.position = position.clone();
			}
		}
		tracing::debug!(target = "playback.session", session = %self.id, %state, "state changed");
		self.emit(SessionEvent::SessionState {
			state,
			position,
			error: None,
		});
	}

	fn emit(&self, event: SessionEvent) {
		handlers::emit(&self.listeners, &event);
	}
}

/// The run currently owned by a session.
struct ActiveRun {
	gate: Arc<PauseGate>,
	done: watch::Receiver<Option<RunOutcome>>,
	supervisor: JoinHandle<()>,
}

/// Lifecycle owner for one script execution.
pub struct Session {
	shared: Arc<SessionShared>,
	provider: Arc<dyn SurfaceProvider>,
	surface: tokio::sync::Mutex<Option<Box<dyn Surface>>>,
	run: Mutex<Option<ActiveRun>>,
	lifecycle: tokio::sync::Mutex<()>,
	disposed: AtomicBool,
}

impl Session {
	pub fn new(
		id: impl Into<SessionId>,
		script: Arc<Script>,
		options: ExecutionOptions,
		provider: Arc<dyn SurfaceProvider>,
	) -> Self {
		let tasks = vec![TaskStatus::Pending; script.tasks.len()];
		Self {
			shared: Arc::new(SessionShared {
				id: id.into(),
				script,
				options,
				status: Mutex::new(Status {
					tasks,
					..Status::default()
				}),
				listeners: handlers::listener_map(),
			}),
			provider,
			surface: tokio::sync::Mutex::new(None),
			run: Mutex::new(None),
			lifecycle: tokio::sync::Mutex::new(()),
			disposed: AtomicBool::new(false),
		}
	}

	pub fn id(&self) -> &str {
		&self.shared.id
	}

	pub fn script(&self) -> &Script {
		&self.shared.script
	}

	pub fn options(&self) -> &ExecutionOptions {
		&self.shared.options
	}

	pub fn state(&self) -> SessionState {
		self.shared.state()
	}

	pub fn is_disposed(&self) -> bool {
		self.disposed.load(Ordering::SeqCst)
	}

	/// Registers a listener for this session's events.
	pub fn on<F>(&self, listener: F) -> Subscription
	where
		F: Fn(&SessionEvent) + Send + Sync + 'static,
	{
		handlers::register(&self.shared.listeners, listener)
	}

	/// Point-in-time copy of state, position, task progress and results.
	pub fn snapshot(&self) -> SessionSnapshot {
		self.shared.snapshot()
	}

	/// Validates the script and acquires the remote surface.
	///
	/// On failure the session is left in `error` with nothing acquired.
	pub async fn initialize(&self) -> Result<()> {
		self.ensure_live()?;
		let _lifecycle = self.lifecycle.lock().await;
		match self.state() {
			SessionState::Idle | SessionState::Error => self.initialize_locked().await,
			SessionState::Ready | SessionState::Completed => Ok(()),
			state => Err(Error::invalid("initialize", state)),
		}
	}

	/// Runs the script to the end and returns how it went.
	///
	/// From `paused` this resumes the current run and waits for it.
	pub async fn start(&self) -> Result<RunSummary> {
		self.ensure_live()?;
		let done = {
			let _lifecycle = self.lifecycle.lock().await;
			match self.state() {
				SessionState::Idle | SessionState::Error => {
					self.initialize_locked().await?;
					self.launch(PauseGate::new(self.shared.options.pause_on_start)).await?
				}
				SessionState::Ready | SessionState::Completed => {
					self.launch(PauseGate::new(self.shared.options.pause_on_start)).await?
				}
				SessionState::Paused => {
					let run = self.run.lock();
					let run = run.as_ref().ok_or(Error::invalid("start", SessionState::Paused))?;
					run.gate.resume();
					run.done.clone()
				}
				state @ SessionState::Running => return Err(Error::invalid("start", state)),
			}
		};
		wait_for_outcome(done).await
	}

	/// Requests a pause before the next step.
	pub fn pause(&self) -> Result<()> {
		self.ensure_live()?;
		match self.state() {
			SessionState::Running => {
				self.with_gate("pause", PauseGate::pause)?;
				tracing::debug!(target = "playback.session", session = %self.id(), "pause requested");
				Ok(())
			}
			SessionState::Paused => Ok(()),
			state => Err(Error::invalid("pause", state)),
		}
	}

	/// Releases a paused run.
	pub fn resume(&self) -> Result<()> {
		self.ensure_live()?;
		match self.state() {
			state @ (SessionState::Paused | SessionState::Running) => {
				self.with_gate("resume", PauseGate::resume)
					.map_err(|_| Error::invalid("resume", state))
			}
			state => Err(Error::invalid("resume", state)),
		}
	}

	/// Executes exactly one step, then pauses.
	///
	/// Outside a run this starts one paused at its first step; it does not
	/// wait for the run to end. While a granted step is still executing,
	/// each call queues one more step.
	pub async fn step(&self) -> Result<()> {
		self.ensure_live()?;
		let _lifecycle = self.lifecycle.lock().await;
		match self.state() {
			SessionState::Paused => self.with_gate("step", PauseGate::step),
			SessionState::Running => self.with_gate("step", PauseGate::step_or_pause),
			SessionState::Idle => {
				self.initialize_locked().await?;
				self.launch(PauseGate::single_step()).await.map(drop)
			}
			SessionState::Ready | SessionState::Completed => self.launch(PauseGate::single_step()).await.map(drop),
			state @ SessionState::Error => Err(Error::invalid("step", state)),
		}
	}

	/// Aborts any run, releases the surface and returns to `idle`.
	pub async fn stop(&self) -> Result<()> {
		self.ensure_live()?;
		let _lifecycle = self.lifecycle.lock().await;
		self.stop_locked().await;
		Ok(())
	}

	/// Stops and releases everything. Safe to call repeatedly.
	pub async fn dispose(&self) -> Result<()> {
		if self.disposed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		let _lifecycle = self.lifecycle.lock().await;
		self.stop_locked().await;
		self.shared.listeners.lock().clear();
		tracing::debug!(target = "playback.session", session = %self.id(), "disposed");
		Ok(())
	}

	fn ensure_live(&self) -> Result<()> {
		if self.is_disposed() {
			Err(Error::Disposed)
		} else {
			Ok(())
		}
	}

	fn with_gate(&self, operation: &'static str, apply: impl FnOnce(&PauseGate)) -> Result<()> {
		let run = self.run.lock();
		let run = run.as_ref().ok_or_else(|| Error::invalid(operation, self.state()))?;
		apply(&run.gate);
		Ok(())
	}

	async fn initialize_locked(&self) -> Result<()> {
		let shared = &self.shared;
		self.release_surface().await;

		if let Err(e) = shared.script.validate() {
			let err = Error::from(e);
			shared.fail(err.to_string());
			return Err(err);
		}

		tracing::debug!(target = "playback.session", session = %shared.id, script = %shared.script.id, "acquiring surface");
		let mut surface = match self.provider.acquire(&shared.script).await {
			Ok(surface) => surface,
			Err(e) => {
				let err = into_initialization(e);
				shared.fail(err.to_string());
				return Err(err);
			}
		};

		if let Err(e) = surface.ready().await {
			if let Err(close_err) = surface.close().await {
				tracing::warn!(target = "playback.session", session = %shared.id, error = %close_err, "failed to close surface after probe failure");
			}
			let err = into_initialization(e);
			shared.fail(err.to_string());
			return Err(err);
		}

		*self.surface.lock().await = Some(surface);
		{
			let mut status = shared.status.lock();
			status.error = None;
		}
		shared.set_state(SessionState::Ready, None);
		shared.emit(SessionEvent::SessionReady {
			session_id: shared.id.clone(),
		});
		tracing::info!(target = "playback.session", session = %shared.id, "session ready");
		Ok(())
	}

	/// Spawns a run behind `gate` and returns its completion channel.
	async fn launch(&self, gate: PauseGate) -> Result<watch::Receiver<Option<RunOutcome>>> {
		let invoker = self
			.surface
			.lock()
			.await
			.as_ref()
			.map(|surface| surface.invoker())
			.ok_or_else(|| Error::invalid("run", self.state()))?;

		let shared = Arc::clone(&self.shared);
		let gate = Arc::new(gate);
		let executor =
			ActionExecutor::new(invoker, ExecutorConfig::from(&shared.options)).with_stop_signal(gate.stop_signal());
		let runner = Runner::new(
			Arc::clone(&shared.script),
			executor,
			Arc::clone(&gate),
			shared.options.stop_on_error,
			Arc::clone(&shared) as Arc<dyn RunSink>,
		);

		shared.begin_run();

		// The runner waits for `go` so that `running` is only published once
		// the gate is reachable through `self.run`.
		let (go_tx, go_rx) = oneshot::channel::<()>();
		let (done_tx, done_rx) = watch::channel(None);
		let run_task = tokio::spawn(async move {
			let _ = go_rx.await;
			runner.run().await
		});
		let supervisor = tokio::spawn({
			let shared = Arc::clone(&shared);
			async move {
				let outcome = match run_task.await {
					Ok(summary) => Ok(summary),
					Err(e) => {
						let message = if e.is_panic() {
							format!("run panicked: {}", panic_message(e.into_panic()))
						} else {
							"run task was cancelled".to_string()
						};
						shared.fail(message.clone());
						Err(message)
					}
				};
				done_tx.send_replace(Some(outcome));
			}
		});

		*self.run.lock() = Some(ActiveRun {
			gate,
			done: done_rx.clone(),
			supervisor,
		});
		shared.set_state(SessionState::Running, None);
		let _ = go_tx.send(());
		Ok(done_rx)
	}

	async fn stop_locked(&self) {
		let run = self.run.lock().take();
		if let Some(run) = run {
			run.gate.stop();
			let _ = wait_for_outcome(run.done).await;
			let _ = run.supervisor.await;
		}
		self.release_surface().await;

		let changed = {
			let mut status = self.shared.status.lock();
			let changed = status.state != SessionState::Idle;
			status.position = None;
			changed
		};
		if changed {
			self.shared.set_state(SessionState::Idle, None);
		}
		tracing::debug!(target = "playback.session", session = %self.id(), "stopped");
	}

	async fn release_surface(&self) {
		let surface = self.surface.lock().await.take();
		if let Some(mut surface) = surface {
			if let Err(e) = surface.close().await {
				tracing::warn!(target = "playback.session", session = %self.id(), error = %e, "failed to close surface");
			}
		}
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		if let Some(run) = self.run.get_mut().take() {
			run.gate.stop();
		}
	}
}

async fn wait_for_outcome(mut done: watch::Receiver<Option<RunOutcome>>) -> Result<RunSummary> {
	let outcome = match done.wait_for(Option::is_some).await {
		Ok(outcome) => outcome.clone(),
		Err(_) => return Err(Error::RunFailed("run ended without reporting".to_string())),
	};
	match outcome {
		Some(Ok(summary)) => Ok(summary),
		Some(Err(message)) => Err(Error::RunFailed(message)),
		None => Err(Error::RunFailed("run ended without reporting".to_string())),
	}
}

fn into_initialization(err: Error) -> Error {
	match err {
		Error::Initialization(_) => err,
		other => Error::Initialization(other.to_string()),
	}
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		(*message).to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"unknown panic".to_string()
	}
}
