//! Callback registry for unsolicited RPC events.
//!
//! Handlers live in a [`HandlerMap`] ([`IndexMap`] for O(1) removal and
//! stable insertion order) and are unregistered by dropping the
//! [`Subscription`] returned at registration.
//!
//! Each handler is driven by its own task draining a queue, so it sees events
//! one at a time in receipt order. Separate handlers run independently.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use drpc_protocol::EventKind;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::events::RpcEvent;

/// Unique identifier for event handlers.
pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_handler_id() -> HandlerId {
	NEXT_HANDLER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Boxed async handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = drpc_runtime::Result<()>> + Send>>;

/// Handler function: `E` to async `Result<()>`.
pub type HandlerFn<E> = Arc<dyn Fn(E) -> HandlerFuture + Send + Sync>;

/// Handler entry with metadata `M` used to select which events it sees.
///
/// Events pushed into `queue` are handled in order by a dedicated task, which
/// exits once the entry is removed from its map.
pub struct HandlerEntry<E, M = ()> {
	pub id: HandlerId,
	pub meta: M,
	queue: mpsc::UnboundedSender<E>,
}

impl<E: Send + 'static, M> HandlerEntry<E, M> {
	/// Spawns the task that runs `handler` for each queued event.
	pub fn spawn(id: HandlerId, meta: M, handler: HandlerFn<E>) -> Self {
		let (queue, mut rx) = mpsc::unbounded_channel::<E>();
		tokio::spawn(async move {
			while let Some(event) = rx.recv().await {
				if let Err(err) = handler(event).await {
					tracing::warn!(handler = id, error = %err, "Event handler failed");
				}
			}
		});
		Self { id, meta, queue }
	}

	/// Queues `event`. Returns false if the handler task is gone.
	pub fn push(&self, event: E) -> bool {
		self.queue.send(event).is_ok()
	}
}

impl<E, M: Clone> Clone for HandlerEntry<E, M> {
	fn clone(&self) -> Self {
		Self {
			id: self.id,
			meta: self.meta.clone(),
			queue: self.queue.clone(),
		}
	}
}

pub type HandlerMap<E, M = ()> = Arc<Mutex<IndexMap<HandlerId, HandlerEntry<E, M>>>>;

/// Which events a handler receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
	#[default]
	All,
	Kind(EventKind),
}

impl EventFilter {
	pub fn matches(&self, event: &RpcEvent) -> bool {
		match self {
			EventFilter::All => true,
			EventFilter::Kind(kind) => event.kind() == Some(*kind),
		}
	}
}

impl From<EventKind> for EventFilter {
	fn from(kind: EventKind) -> Self {
		EventFilter::Kind(kind)
	}
}

/// Handlers keyed by registration, filtered per entry.
pub(crate) type RpcHandlers = HandlerMap<RpcEvent, EventFilter>;

/// Queues `event` for every handler whose filter matches.
pub(crate) fn invoke_matching(handlers: &RpcHandlers, event: &RpcEvent) {
	for entry in handlers.lock().values().filter(|entry| entry.meta.matches(event)) {
		if !entry.push(event.clone()) {
			tracing::debug!(handler = entry.id, "Handler task already stopped");
		}
	}
}

/// RAII handle that unregisters an event handler on drop.
///
/// Holds a weak reference to the handler map, so dropping it after the
/// owning client is gone is a no-op.
pub struct Subscription {
	id: HandlerId,
	dropper: Option<Arc<dyn Fn(HandlerId) + Send + Sync>>,
}

impl Subscription {
	pub fn new(id: HandlerId, dropper: Arc<dyn Fn(HandlerId) + Send + Sync>) -> Self {
		Self {
			id,
			dropper: Some(dropper),
		}
	}

	/// Creates a subscription from a handler map using a weak reference.
	pub fn from_handler_map<E, M>(id: HandlerId, handlers: &HandlerMap<E, M>) -> Self
	where
		E: Send + Sync + 'static,
		M: Send + Sync + 'static,
	{
		let weak: Weak<Mutex<IndexMap<HandlerId, HandlerEntry<E, M>>>> = Arc::downgrade(handlers);
		let dropper = Arc::new(move |id: HandlerId| {
			if let Some(map) = weak.upgrade() {
				map.lock().shift_remove(&id);
			}
		});
		Self::new(id, dropper)
	}

	pub fn id(&self) -> HandlerId {
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
