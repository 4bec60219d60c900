//! Keyed collection of sessions with a shared event fan-out.
//!
//! Every session created here is subscribed once; its events are re-published
//! as [`RegistryEvent`]s to registry listeners and to broadcast subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures_util::future::join_all;
use playback_protocol::{ExecutionOptions, SessionEvent, SessionSnapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use crate::error::{Error, Result};
use crate::handlers::{self, ListenerMap, Subscription};
use crate::repository::ScriptRepository;
use crate::runner::RunSummary;
use crate::session::{Session, SessionId};
use crate::surface::SurfaceProvider;

const EVENT_CAPACITY: usize = 1024;

/// A session event tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEvent {
	pub session_id: SessionId,
	pub event: SessionEvent,
}

/// What to run and how.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
	/// Reference resolved through the registry's [`ScriptRepository`].
	pub script: String,
	#[serde(default)]
	pub options: ExecutionOptions,
}

impl SessionConfig {
	pub fn new(script: impl Into<String>) -> Self {
		Self {
			script: script.into(),
			options: ExecutionOptions::default(),
		}
	}

	pub fn with_options(mut self, options: ExecutionOptions) -> Self {
		self.options = options;
		self
	}
}

struct Entry {
	seq: u64,
	session: Arc<Session>,
	_forward: Subscription,
}

pub struct SessionRegistry {
	repository: Arc<dyn ScriptRepository>,
	provider: Arc<dyn SurfaceProvider>,
	sessions: DashMap<SessionId, Entry>,
	next_seq: AtomicU64,
	listeners: ListenerMap<RegistryEvent>,
	events: broadcast::Sender<RegistryEvent>,
}

impl SessionRegistry {
	pub fn new(repository: Arc<dyn ScriptRepository>, provider: Arc<dyn SurfaceProvider>) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Self {
			repository,
			provider,
			sessions: DashMap::new(),
			next_seq: AtomicU64::new(1),
			listeners: handlers::listener_map(),
			events,
		}
	}

	/// Resolves and validates the script, then registers a new idle session.
	pub async fn create_session(&self, config: SessionConfig) -> Result<SessionId> {
		let script = self.repository.load(&config.script).await?;
		script.validate()?;

		let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
		let id = format!("session-{seq}");
		let session = Arc::new(Session::new(
			id.clone(),
			Arc::new(script),
			config.options,
			Arc::clone(&self.provider),
		));

		let forward = {
			let session_id = id.clone();
			let listeners = Arc::clone(&self.listeners);
			let events = self.events.clone();
			session.on(move |event| {
				let event = RegistryEvent {
					session_id: session_id.clone(),
					event: event.clone(),
				};
				handlers::emit(&listeners, &event);
				let _ = events.send(event);
			})
		};

		tracing::info!(target = "playback.registry", session = %id, script = %config.script, "session created");
		self.sessions.insert(
			id.clone(),
			Entry {
				seq,
				session,
				_forward: forward,
			},
		);
		Ok(id)
	}

	/// Shared handle to a registered session.
	pub fn session(&self, id: &str) -> Result<Arc<Session>> {
		self.sessions
			.get(id)
			.map(|entry| Arc::clone(&entry.session))
			.ok_or_else(|| Error::SessionNotFound(id.to_string()))
	}

	pub async fn initialize_session(&self, id: &str) -> Result<()> {
		self.session(id)?.initialize().await
	}

	pub async fn start_session(&self, id: &str) -> Result<RunSummary> {
		self.session(id)?.start().await
	}

	pub fn pause_session(&self, id: &str) -> Result<()> {
		self.session(id)?.pause()
	}

	pub fn resume_session(&self, id: &str) -> Result<()> {
		self.session(id)?.resume()
	}

	pub async fn step_session(&self, id: &str) -> Result<()> {
		self.session(id)?.step().await
	}

	pub async fn stop_session(&self, id: &str) -> Result<()> {
		self.session(id)?.stop().await
	}

	/// Disposes the session and forgets it.
	pub async fn dispose_session(&self, id: &str) -> Result<()> {
		let (_, entry) = self
			.sessions
			.remove(id)
			.ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
		tracing::debug!(target = "playback.registry", session = %id, "disposing session");
		entry.session.dispose().await
	}

	pub fn snapshot(&self, id: &str) -> Result<SessionSnapshot> {
		Ok(self.session(id)?.snapshot())
	}

	/// Snapshots of every session, in creation order.
	pub fn snapshots(&self) -> Vec<SessionSnapshot> {
		self.ordered().into_iter().map(|session| session.snapshot()).collect()
	}

	/// Registered ids, in creation order.
	pub fn session_ids(&self) -> Vec<SessionId> {
		self.ordered().iter().map(|session| session.id().to_string()).collect()
	}

	pub fn len(&self) -> usize {
		self.sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}

	/// Disposes every session, continuing past failures.
	pub async fn dispose_all(&self) -> Result<()> {
		let ids: Vec<SessionId> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
		let entries: Vec<(SessionId, Entry)> = ids.iter().filter_map(|id| self.sessions.remove(id)).collect();

		let outcomes = join_all(entries.iter().map(|(id, entry)| async move {
			(id.clone(), entry.session.dispose().await)
		}))
		.await;

		let failures: Vec<(SessionId, Error)> = outcomes
			.into_iter()
			.filter_map(|(id, outcome)| outcome.err().map(|e| (id, e)))
			.collect();

		tracing::debug!(
			target = "playback.registry",
			disposed = entries.len(),
			failed = failures.len(),
			"disposed all sessions"
		);
		if failures.is_empty() {
			Ok(())
		} else {
			Err(Error::DisposeAll(failures))
		}
	}

	/// Registers a listener for events from every session.
	pub fn on<F>(&self, listener: F) -> Subscription
	where
		F: Fn(&RegistryEvent) + Send + Sync + 'static,
	{
		handlers::register(&self.listeners, listener)
	}

	/// Stream of events emitted from now on. Lagging subscribers skip ahead.
	pub fn subscribe(&self) -> impl Stream<Item = RegistryEvent> + Send + Unpin + 'static {
		BroadcastStream::new(self.events.subscribe()).filter_map(|item| match item {
			Ok(event) => Some(event),
			Err(BroadcastStreamRecvError::Lagged(skipped)) => {
				tracing::warn!(target = "playback.registry", skipped, "event subscriber lagged");
				None
			}
		})
	}

	fn ordered(&self) -> Vec<Arc<Session>> {
		let mut sessions: Vec<(u64, Arc<Session>)> = self
			.sessions
			.iter()
			.map(|entry| (entry.seq, Arc::clone(&entry.session)))
			.collect();
		sessions.sort_by_key(|(seq, _)| *seq);
		sessions.into_iter().map(|(_, session)| session).collect()
	}
}

impl std::fmt::Debug for SessionRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionRegistry")
			.field("sessions", &self.sessions.len())
			.finish_non_exhaustive()
	}
}
