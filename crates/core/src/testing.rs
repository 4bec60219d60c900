//! In-process doubles for the remote surface used by unit tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use playback_protocol::Script;
use playback_runtime::{Invocation, Invoke};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::surface::{Surface, SurfaceProvider};

/// How the fake surface answers one invocation.
pub(crate) enum Reply {
	Value(Value),
	Fail(String),
	/// Never answers; the call fails once its own timeout elapses.
	Hang,
	After(Duration, Value),
}

type Handler = dyn Fn(&Invocation) -> Reply + Send + Sync;

/// Records every invocation and answers through a handler closure.
pub(crate) struct MockInvoker {
	calls: Mutex<Vec<Invocation>>,
	handler: Box<Handler>,
}

impl MockInvoker {
	pub(crate) fn new(handler: impl Fn(&Invocation) -> Reply + Send + Sync + 'static) -> Arc<Self> {
		Arc::new(Self {
			calls: Mutex::new(Vec::new()),
			handler: Box::new(handler),
		})
	}

	/// Answers `null` to everything.
	pub(crate) fn ok() -> Arc<Self> {
		Self::new(|_| Reply::Value(Value::Null))
	}

	pub(crate) fn call_count(&self) -> usize {
		self.calls.lock().len()
	}

	pub(crate) fn actions(&self) -> Vec<String> {
		self.calls.lock().iter().map(|c| c.action.clone()).collect()
	}

	pub(crate) fn calls(&self) -> Vec<Invocation> {
		self.calls.lock().clone()
	}
}

impl Invoke for MockInvoker {
	fn invoke(&self, invocation: Invocation) -> Pin<Box<dyn Future<Output = playback_runtime::Result<Value>> + Send + '_>> {
		let reply = (self.handler)(&invocation);
		let action = invocation.action.clone();
		let timeout = invocation.timeout;
		self.calls.lock().push(invocation);

		Box::pin(async move {
			match reply {
				Reply::Value(value) => Ok(value),
				Reply::Fail(message) => Err(playback_runtime::Error::Remote {
					name: "Error".to_string(),
					message,
					stack: None,
				}),
				Reply::Hang => {
					tokio::time::sleep(timeout).await;
					Err(playback_runtime::Error::Timeout(format!(
						"invocation '{action}' got no reply within {}ms timeout",
						timeout.as_millis()
					)))
				}
				Reply::After(delay, value) => {
					tokio::time::sleep(delay).await;
					Ok(value)
				}
			}
		})
	}
}

/// Counters shared between a [`MockProvider`] and the surfaces it hands out.
#[derive(Default)]
pub(crate) struct SurfaceStats {
	pub(crate) acquired: AtomicUsize,
	pub(crate) closed: AtomicUsize,
}

impl SurfaceStats {
	pub(crate) fn acquired(&self) -> usize {
		self.acquired.load(Ordering::SeqCst)
	}

	pub(crate) fn closed(&self) -> usize {
		self.closed.load(Ordering::SeqCst)
	}
}

pub(crate) struct MockSurface {
	invoker: Arc<MockInvoker>,
	stats: Arc<SurfaceStats>,
	ready_error: Option<String>,
}

#[async_trait]
impl Surface for MockSurface {
	fn invoker(&self) -> Arc<dyn Invoke> {
		Arc::clone(&self.invoker) as Arc<dyn Invoke>
	}

	async fn ready(&self) -> Result<()> {
		match &self.ready_error {
			Some(message) => Err(Error::Initialization(message.clone())),
			None => Ok(()),
		}
	}

	async fn close(&mut self) -> Result<()> {
		self.stats.closed.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

/// Hands out [`MockSurface`]s sharing one invoker.
pub(crate) struct MockProvider {
	pub(crate) invoker: Arc<MockInvoker>,
	pub(crate) stats: Arc<SurfaceStats>,
	acquire_error: Option<String>,
	ready_error: Option<String>,
}

impl MockProvider {
	pub(crate) fn new(invoker: Arc<MockInvoker>) -> Arc<Self> {
		Arc::new(Self {
			invoker,
			stats: Arc::default(),
			acquire_error: None,
			ready_error: None,
		})
	}

	pub(crate) fn unreachable(message: &str) -> Arc<Self> {
		Arc::new(Self {
			invoker: MockInvoker::ok(),
			stats: Arc::default(),
			acquire_error: Some(message.to_string()),
			ready_error: None,
		})
	}

	pub(crate) fn not_ready(message: &str) -> Arc<Self> {
		Arc::new(Self {
			invoker: MockInvoker::ok(),
			stats: Arc::default(),
			acquire_error: None,
			ready_error: Some(message.to_string()),
		})
	}
}

#[async_trait]
impl SurfaceProvider for MockProvider {
	async fn acquire(&self, _script: &Script) -> Result<Box<dyn Surface>> {
		if let Some(message) = &self.acquire_error {
			return Err(Error::Initialization(message.clone()));
		}
		self.stats.acquired.fetch_add(1, Ordering::SeqCst);
		Ok(Box::new(MockSurface {
			invoker: Arc::clone(&self.invoker),
			stats: Arc::clone(&self.stats),
			ready_error: self.ready_error.clone(),
		}))
	}
}

/// Polls `condition` every millisecond for up to two seconds.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
	for _ in 0..2_000 {
		if condition() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(1)).await;
	}
	panic!("condition not reached within 2s");
}
