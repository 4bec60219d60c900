//! One-shot pause gate consulted by the runner before every step.
//!
//! The gate never preempts a step. [`PauseGate::pause`] only arms a flag that
//! the next [`PauseGate::checkpoint`] observes. A blocked runner holds the
//! receiving half of a oneshot; `resume`, `step` and `stop` fire the sender.
//! Single-stepping works with credits: each `step()` grants exactly one
//! checkpoint pass while the pause flag stays armed.

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

/// What the runner should do at a checkpoint.
#[derive(Debug)]
pub enum Checkpoint {
	Proceed,
	/// Paused. Await the receiver, then ask again.
	Wait(oneshot::Receiver<()>),
	Stop,
}

#[derive(Debug, Default)]
struct GateState {
	pause_requested: bool,
	step_credits: u32,
	stopped: bool,
	waiter: Option<oneshot::Sender<()>>,
}

impl GateState {
	fn release(&mut self) {
		if let Some(waiter) = self.waiter.take() {
			let _ = waiter.send(());
		}
	}
}

/// Pause/step/stop coordination for one run.
#[derive(Debug)]
pub struct PauseGate {
	state: Mutex<GateState>,
	stop_tx: watch::Sender<bool>,
}

impl PauseGate {
	/// Creates a gate, armed when `paused` is set.
	pub fn new(paused: bool) -> Self {
		let (stop_tx, _) = watch::channel(false);
		Self {
			state: Mutex::new(GateState {
				pause_requested: paused,
				..GateState::default()
			}),
			stop_tx,
		}
	}

	/// Creates an armed gate that lets exactly one step through.
	pub fn single_step() -> Self {
		let gate = Self::new(true);
		gate.state.lock().step_credits = 1;
		gate
	}

	pub fn checkpoint(&self) -> Checkpoint {
		let mut state = self.state.lock();
		if state.stopped {
			return Checkpoint::Stop;
		}
		if state.step_credits > 0 {
			state.step_credits -= 1;
			return Checkpoint::Proceed;
		}
		if !state.pause_requested {
			return Checkpoint::Proceed;
		}

		let (tx, rx) = oneshot::channel();
		state.waiter = Some(tx);
		Checkpoint::Wait(rx)
	}

	/// Arms the gate; takes effect at the next checkpoint.
	pub fn pause(&self) {
		self.state.lock().pause_requested = true;
	}

	/// Disarms the gate and releases a blocked runner.
	pub fn resume(&self) {
		let mut state = self.state.lock();
		state.pause_requested = false;
		state.step_credits = 0;
		state.release();
	}

	/// Lets exactly one more step through, then blocks again.
	pub fn step(&self) {
		let mut state = self.state.lock();
		state.pause_requested = true;
		state.step_credits = state.step_credits.saturating_add(1);
		state.release();
	}

	/// Step request while a step is in flight: queues another pass when the
	/// gate is already single-stepping, otherwise arms it.
	pub fn step_or_pause(&self) {
		let mut state = self.state.lock();
		if state.pause_requested {
			state.step_credits = state.step_credits.saturating_add(1);
			state.release();
		} else {
			state.pause_requested = true;
		}
	}

	/// Aborts the run: releases a blocked runner and signals in-flight actions.
	pub fn stop(&self) {
		let mut state = self.state.lock();
		state.stopped = true;
		state.release();
		drop(state);
		self.stop_tx.send_replace(true);
	}

	pub fn is_stopped(&self) -> bool {
		self.state.lock().stopped
	}

	/// True while the runner is parked at a checkpoint.
	pub fn is_blocked(&self) -> bool {
		self.state
			.lock()
			.waiter
			.as_ref()
			.is_some_and(|waiter| !waiter.is_closed())
	}

	pub fn stop_signal(&self) -> StopSignal {
		StopSignal {
			rx: Some(self.stop_tx.subscribe()),
		}
	}
}

/// Cloneable view of a gate's stop flag, awaited by in-flight actions.
#[derive(Debug, Clone)]
pub struct StopSignal {
	rx: Option<watch::Receiver<bool>>,
}

impl StopSignal {
	/// A signal that never fires.
	pub fn never() -> Self {
		Self { rx: None }
	}

	pub fn is_stopped(&self) -> bool {
		self.rx.as_ref().is_some_and(|rx| *rx.borrow())
	}

	/// Completes once the run has been stopped.
	pub async fn stopped(&mut self) {
		let Some(rx) = self.rx.as_mut() else {
			return std::future::pending().await;
		};
		if rx.wait_for(|stopped| *stopped).await.is_err() {
			std::future::pending::<()>().await;
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[test]
	fn test_unarmed_gate_proceeds() {
		let gate = PauseGate::new(false);
		assert!(matches!(gate.checkpoint(), Checkpoint::Proceed));
		assert!(matches!(gate.checkpoint(), Checkpoint::Proceed));
	}

	#[test]
	fn test_pause_takes_effect_at_next_checkpoint() {
		let gate = PauseGate::new(false);
		gate.pause();
		let checkpoint = gate.checkpoint();
		assert!(matches!(checkpoint, Checkpoint::Wait(_)));
		assert!(gate.is_blocked());
		drop(checkpoint);
		assert!(!gate.is_blocked());
	}

	#[tokio::test]
	async fn test_resume_releases_waiter() {
		let gate = PauseGate::new(true);
		let Checkpoint::Wait(rx) = gate.checkpoint() else {
			panic!("expected gate to block");
		};
		gate.resume();
		rx.await.unwrap();
		assert!(matches!(gate.checkpoint(), Checkpoint::Proceed));
		assert!(!gate.is_blocked());
	}

	#[tokio::test]
	async fn test_each_step_grants_one_pass() {
		let gate = PauseGate::new(true);
		let Checkpoint::Wait(rx) = gate.checkpoint() else {
			panic!("expected gate to block");
		};

		gate.step();
		rx.await.unwrap();
		assert!(matches!(gate.checkpoint(), Checkpoint::Proceed));
		assert!(matches!(gate.checkpoint(), Checkpoint::Wait(_)));
	}

	#[test]
	fn test_step_credits_queue() {
		let gate = PauseGate::new(true);
		gate.step();
		gate.step();
		gate.step();
		for _ in 0..3 {
			assert!(matches!(gate.checkpoint(), Checkpoint::Proceed));
		}
		assert!(matches!(gate.checkpoint(), Checkpoint::Wait(_)));
	}

	#[test]
	fn test_step_or_pause_arms_free_running_gate() {
		let gate = PauseGate::new(false);
		gate.step_or_pause();
		assert!(matches!(gate.checkpoint(), Checkpoint::Wait(_)));
	}

	#[test]
	fn test_step_or_pause_queues_while_stepping() {
		let gate = PauseGate::single_step();
		assert!(matches!(gate.checkpoint(), Checkpoint::Proceed));
		gate.step_or_pause();
		assert!(matches!(gate.checkpoint(), Checkpoint::Proceed));
		assert!(matches!(gate.checkpoint(), Checkpoint::Wait(_)));
	}

	#[test]
	fn test_single_step_gate() {
		let gate = PauseGate::single_step();
		assert!(matches!(gate.checkpoint(), Checkpoint::Proceed));
		assert!(matches!(gate.checkpoint(), Checkpoint::Wait(_)));
	}

	#[tokio::test]
	async fn test_stop_releases_and_signals() {
		let gate = PauseGate::new(true);
		let mut signal = gate.stop_signal();
		let Checkpoint::Wait(rx) = gate.checkpoint() else {
			panic!("expected gate to block");
		};

		gate.stop();
		rx.await.unwrap();
		assert!(matches!(gate.checkpoint(), Checkpoint::Stop));
		assert!(signal.is_stopped());
		tokio::time::timeout(Duration::from_millis(100), signal.stopped())
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn test_never_signal_pends() {
		let mut signal = StopSignal::never();
		assert!(!signal.is_stopped());
		let fired = tokio::time::timeout(Duration::from_millis(20), signal.stopped()).await;
		assert!(fired.is_err());
	}
}
