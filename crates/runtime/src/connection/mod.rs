//! Request/reply correlation on top of a transport.
//!
//! This module implements the remote invocation bridge. It handles:
//! - Generating unique correlation ids
//! - Racing each reply against a per-call timeout
//! - Removing the reply handler on every exit path
//! - Re-broadcasting unsolicited events from the surface
//!
//! # Message Flow
//!
//! 1. Caller invokes `call()` with an action, arguments and a timeout
//! 2. Connection allocates an id and registers a oneshot sender under it
//! 3. Request is queued for the writer task and sent via transport
//! 4. Caller awaits the oneshot receiver, bounded by the timeout
//! 5. Dispatch loop receives a response and removes the sender by id
//! 6. Reply is delivered; if the caller already gave up, it is dropped

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

/// Default per-invocation timeout.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// One call to make against the remote surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
	pub action: String,
	pub args: Value,
	/// Execution context (frame, window) on the surface, if not the default one.
	pub target: Option<String>,
	pub timeout: Duration,
}

impl Invocation {
	pub fn new(action: impl Into<String>, args: Value) -> Self {
		Self {
			action: action.into(),
			args,
			target: None,
			timeout: DEFAULT_INVOKE_TIMEOUT,
		}
	}

	pub fn with_target(mut self, target: Option<String>) -> Self {
		self.target = target;
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}
}

/// The bridge contract: send one invocation, get one reply or error.
///
/// Object-safe so executors can hold `Arc<dyn Invoke>` and tests can supply
/// their own implementations.
pub trait Invoke: Send + Sync {
	fn invoke(&self, invocation: Invocation) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>>;
}

/// Metadata attached to every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
	/// Unix timestamp in milliseconds
	pub wall_time: i64,
}

impl Metadata {
	/// Create metadata stamped with the current time
	pub fn now() -> Self {
		let wall_time = std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.map(|d| d.as_millis() as i64)
			.unwrap_or_default();
		Self { wall_time }
	}
}

/// Request message sent to the surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Correlation id echoed by the reply
	pub id: u32,
	pub action: String,
	pub args: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target: Option<String>,
	pub metadata: Metadata,
}

/// Reply message from the surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	/// Request id this response correlates to
	pub id: u32,
	/// Success result (mutually exclusive with error)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error result (mutually exclusive with result)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorWrapper>,
}

/// Wrapper for remote error payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorWrapper {
	pub error: ErrorPayload,
}

/// Remote error details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub message: String,
	/// Error type name (e.g., "TimeoutError")
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

/// Unsolicited event from the surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	/// Context that emitted the event, if any
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target: Option<String>,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Discriminated union of incoming messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Response message (has `id` field)
	Response(Response),
	/// Event message (no `id` field)
	Event(Event),
	/// Unknown message type (forward-compatible catch-all)
	Unknown(Value),
}

/// Pending reply handlers keyed by correlation id.
type CallbackMap = Arc<DashMap<u32, oneshot::Sender<Result<Value>>>>;

/// RAII guard removing the reply handler when a call ends without a reply.
struct CancelGuard {
	id: u32,
	callbacks: CallbackMap,
	completed: bool,
}

impl CancelGuard {
	fn new(id: u32, callbacks: CallbackMap) -> Self {
		Self {
			id,
			callbacks,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if self.callbacks.remove(&self.id).is_some() {
			tracing::debug!(id = self.id, "removed abandoned reply handler");
		}
	}
}

/// Reply future with automatic handler cleanup.
struct ResponseFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Aborts the connection's reader and writer tasks when dropped.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
	fn drop(&mut self) {
		for handle in &self.0 {
			handle.abort();
		}
	}
}

/// Correlating connection to a remote surface.
pub struct Connection {
	/// Sequential correlation id counter
	last_id: AtomicU32,
	callbacks: CallbackMap,
	/// Outbound queue drained by the writer task
	outbound_tx: mpsc::UnboundedSender<Value>,
	transport_sender: Mutex<Option<Box<dyn Transport>>>,
	transport_receiver: Mutex<Option<Box<dyn TransportReceiver>>>,
	message_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
	outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
	events_tx: broadcast::Sender<Event>,
}

impl Connection {
	/// Create a new Connection with the given transport
	pub fn new(parts: TransportParts) -> Self {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (events_tx, _) = broadcast::channel(256);

		Self {
			last_id: AtomicU32::new(0),
			callbacks: Arc::new(DashMap::new()),
			outbound_tx,
			transport_sender: Mutex::new(Some(sender)),
			transport_receiver: Mutex::new(Some(receiver)),
			message_rx: Mutex::new(Some(message_rx)),
			outbound_rx: Mutex::new(Some(outbound_rx)),
			events_tx,
		}
	}

	/// Sends one request and waits for its reply, at most `timeout`.
	///
	/// Exactly one outcome is produced. On timeout the handler is removed, so
	/// a reply arriving later is discarded by the dispatch loop.
	pub async fn call(&self, action: &str, args: Value, target: Option<&str>, timeout: Duration) -> Result<Value> {
		let id = self.last_id.fetch_add(1, Ordering::SeqCst);

		let (tx, rx) = oneshot::channel();
		self.callbacks.insert(id, tx);
		let guard = CancelGuard::new(id, Arc::clone(&self.callbacks));

		let request = Request {
			id,
			action: action.to_string(),
			args,
			target: target.map(str::to_string),
			metadata: Metadata::now(),
		};
		let request_value = serde_json::to_value(&request)?;

		tracing::debug!(id, action, ?target, "sending invocation");

		if self.outbound_tx.send(request_value).is_err() {
			tracing::error!(id, "outbound channel closed");
			return Err(Error::ChannelClosed);
		}

		match tokio::time::timeout(timeout, ResponseFuture { rx, guard }).await {
			Ok(result) => result,
			Err(_) => {
				tracing::debug!(id, action, "invocation timed out");
				Err(Error::Timeout(format!(
					"invocation '{action}' (id {id}) got no reply within {}ms timeout",
					timeout.as_millis()
				)))
			}
		}
	}

	/// Number of invocations still waiting for a reply.
	pub fn pending_count(&self) -> usize {
		self.callbacks.len()
	}

	/// Subscribes to unsolicited events sent by the surface.
	pub fn events(&self) -> broadcast::Receiver<Event> {
		self.events_tx.subscribe()
	}

	/// Fails every outstanding invocation with [`Error::ChannelClosed`].
	pub fn shutdown(&self) {
		let ids: Vec<u32> = self.callbacks.iter().map(|entry| *entry.key()).collect();
		for id in ids {
			if let Some((_, tx)) = self.callbacks.remove(&id) {
				let _ = tx.send(Err(Error::ChannelClosed));
			}
		}
	}

	/// Runs the reader, writer and dispatch loop until the transport closes.
	///
	/// May only be called once per connection.
	pub async fn run(self: &Arc<Self>) -> Result<()> {
		let (Some(transport_receiver), Some(mut transport_sender), Some(mut outbound_rx), Some(mut message_rx)) = (
			self.transport_receiver.lock().take(),
			self.transport_sender.lock().take(),
			self.outbound_rx.lock().take(),
			self.message_rx.lock().take(),
		) else {
			return Err(Error::ProtocolError("connection is already running".to_string()));
		};

		let reader_handle = tokio::spawn(async move {
			if let Err(e) = transport_receiver.run().await {
				tracing::debug!(error = %e, "transport reader stopped");
			}
		});

		let writer_handle = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if let Err(e) = transport_sender.send(message).await {
					tracing::error!(error = %e, "transport write error");
					break;
				}
			}
		});

		// Aborted together with this future, e.g. when the surface is closed.
		let tasks = AbortOnDrop(vec![reader_handle.abort_handle(), writer_handle.abort_handle()]);

		while let Some(message_value) = message_rx.recv().await {
			match serde_json::from_value::<Message>(message_value) {
				Ok(message) => self.dispatch_internal(message),
				Err(e) => tracing::error!(error = %e, "failed to parse message"),
			}
		}

		tracing::debug!(pending = self.pending_count(), "surface disconnected");
		self.shutdown();
		drop(tasks);
		let _ = reader_handle.await;
		Ok(())
	}

	/// Dispatch an incoming message (test-only public version)
	#[cfg(test)]
	pub fn dispatch(&self, message: Message) {
		self.dispatch_internal(message)
	}

	fn dispatch_internal(&self, message: Message) {
		match message {
			Message::Response(response) => {
				let Some((_, callback)) = self.callbacks.remove(&response.id) else {
					tracing::debug!(id = response.id, "dropping late or unknown reply");
					return;
				};

				let result = match response.error {
					Some(wrapper) => Err(parse_remote_error(wrapper.error)),
					None => Ok(response.result.unwrap_or(Value::Null)),
				};
				let _ = callback.send(result);
			}
			Message::Event(event) => {
				tracing::trace!(method = %event.method, "surface event");
				let _ = self.events_tx.send(event);
			}
			Message::Unknown(value) => {
				tracing::debug!(%value, "unknown message type (ignored)");
			}
		}
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("last_id", &self.last_id.load(Ordering::Relaxed))
			.field("pending", &self.pending_count())
			.finish_non_exhaustive()
	}
}

/// Converts an [`ErrorPayload`] into [`Error::Remote`].
fn parse_remote_error(error: ErrorPayload) -> Error {
	Error::Remote {
		name: error.name.unwrap_or_else(|| "Error".to_string()),
		message: error.message,
		stack: error.stack,
	}
}

impl Invoke for Connection {
	fn invoke(&self, invocation: Invocation) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
		Box::pin(async move {
			Connection::call(
				self,
				&invocation.action,
				invocation.args,
				invocation.target.as_deref(),
				invocation.timeout,
			)
			.await
		})
	}
}

#[cfg(test)]
mod tests;
