//! Listener registration shared by sessions and the registry.
//!
//! Listeners live in an [`IndexMap`] keyed by [`ListenerId`], so removal is
//! O(1) and delivery follows registration order. Registering returns a
//! [`Subscription`] that removes the listener again when dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Unique identifier for a registered listener.
pub type ListenerId = u64;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique listener id.
pub fn next_listener_id() -> ListenerId {
	NEXT_LISTENER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Synchronous event callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Listener storage.
pub type ListenerMap<E> = Arc<Mutex<IndexMap<ListenerId, Listener<E>>>>;

/// Creates an empty listener map.
pub fn listener_map<E>() -> ListenerMap<E> {
	Arc::new(Mutex::new(IndexMap::new()))
}

/// Registers `listener` and returns the subscription that owns it.
pub fn register<E, F>(listeners: &ListenerMap<E>, listener: F) -> Subscription
where
	E: 'static,
	F: Fn(&E) + Send + Sync + 'static,
{
	let id = next_listener_id();
	listeners.lock().insert(id, Arc::new(listener));
	Subscription::from_listener_map(id, listeners)
}

/// Delivers `event` to every listener in registration order.
///
/// The map lock is released before any listener runs, so listeners may
/// subscribe or unsubscribe from inside the callback.
pub fn emit<E>(listeners: &ListenerMap<E>, event: &E) {
	let snapshot: Vec<Listener<E>> = listeners.lock().values().cloned().collect();
	for listener in snapshot {
		listener(event);
	}
}

/// RAII handle that unregisters a listener on drop.
///
/// Holds a weak reference to the listener map, so dropping it after the
/// owning session is gone is a no-op.
pub struct Subscription {
	id: ListenerId,
	dropper: Option<Arc<dyn Fn(ListenerId) + Send + Sync>>,
}

impl Subscription {
	/// Creates a subscription with a custom dropper function.
	pub fn new(id: ListenerId, dropper: Arc<dyn Fn(ListenerId) + Send + Sync>) -> Self {
		Self {
			id,
			dropper: Some(dropper),
		}
	}

	/// Creates a subscription from a listener map using a weak reference.
	pub fn from_listener_map<E: 'static>(id: ListenerId, listeners: &ListenerMap<E>) -> Self {
		let weak: Weak<Mutex<IndexMap<ListenerId, Listener<E>>>> = Arc::downgrade(listeners);
		let dropper = Arc::new(move |id: ListenerId| {
			if let Some(map) = weak.upgrade() {
				map.lock().shift_remove(&id);
			}
		});
		Self::new(id, dropper)
	}

	pub fn id(&self) -> ListenerId {
		self.id
	}

	/// Explicitly unsubscribes. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("active", &self.dropper.is_some())
			.finish()
	}
}
