//! Client lifecycle signals and unsolicited RPC events.
//!
//! - [`EventBus`] - Internal dispatcher combining broadcast channels with predicate-based waiters
//! - [`EventStream`] - Wrapper around [`broadcast::Receiver`] with lag handling
//! - [`EventWaiter`] - One-shot event capture with timeout support
//!
//! Events are consumed either as a stream via [`Client::events`] or through
//! callbacks registered with [`Client::on_event`].
//!
//! [`Client::events`]: crate::Client::events
//! [`Client::on_event`]: crate::Client::on_event

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use drpc_protocol::{ActivitySecret, Envelope, ErrorPayload, EventKind, JoinRequest};
use drpc_runtime::{CloseReason, Error, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

/// Everything a [`Client`](crate::Client) reports to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
	/// The handshake arrived; requests can be issued.
	Connected,
	/// `login` finished, including authentication when scopes were requested.
	Ready,
	/// A connection that had completed its handshake closed.
	Disconnected(Option<CloseReason>),
	/// Human-readable diagnostics (malformed frames, failed refreshes).
	Debug(String),
	/// An unsolicited event from the application.
	Rpc(RpcEvent),
}

/// Unsolicited event decoded from a `DISPATCH` (or stray reply).
#[derive(Debug, Clone, PartialEq)]
pub enum RpcEvent {
	Error(ErrorPayload),
	ActivityJoin(ActivitySecret),
	ActivitySpectate(ActivitySecret),
	ActivityJoinRequest(JoinRequest),
	/// Any other event, payload left as JSON.
	Other { kind: Option<EventKind>, data: Value },
}

impl RpcEvent {
	/// Decodes an envelope no pending request claimed.
	///
	/// Known events whose payload does not match their shape fall back to
	/// [`RpcEvent::Other`].
	pub fn from_envelope(envelope: Envelope) -> Self {
		let data = envelope.data.unwrap_or(Value::Null);
		match envelope.evt {
			Some(EventKind::Error) => decode(data, RpcEvent::Error, EventKind::Error),
			Some(EventKind::ActivityJoin) => decode(data, RpcEvent::ActivityJoin, EventKind::ActivityJoin),
			Some(EventKind::ActivitySpectate) => decode(data, RpcEvent::ActivitySpectate, EventKind::ActivitySpectate),
			Some(EventKind::ActivityJoinRequest) => decode(data, RpcEvent::ActivityJoinRequest, EventKind::ActivityJoinRequest),
			kind => RpcEvent::Other { kind, data },
		}
	}

	/// The event name, if the envelope carried one.
	pub fn kind(&self) -> Option<EventKind> {
		match self {
			RpcEvent::Error(_) => Some(EventKind::Error),
			RpcEvent::ActivityJoin(_) => Some(EventKind::ActivityJoin),
			RpcEvent::ActivitySpectate(_) => Some(EventKind::ActivitySpectate),
			RpcEvent::ActivityJoinRequest(_) => Some(EventKind::ActivityJoinRequest),
			RpcEvent::Other { kind, .. } => *kind,
		}
	}
}

fn decode<T, F>(data: Value, wrap: F, kind: EventKind) -> RpcEvent
where
	T: DeserializeOwned,
	F: FnOnce(T) -> RpcEvent,
{
	match serde_json::from_value(data.clone()) {
		Ok(payload) => wrap(payload),
		Err(err) => {
			tracing::warn!(?kind, error = %err, "Event payload did not match its shape");
			RpcEvent::Other { kind: Some(kind), data }
		}
	}
}

struct WaiterEntry<E> {
	predicate: Box<dyn Fn(&E) -> bool + Send + Sync>,
	complete_tx: oneshot::Sender<E>,
}

/// Internal event bus combining broadcast channels with predicate-based waiters.
///
/// Waiters are checked first during [`emit`](Self::emit), so `wait_for`
/// callers get the event even when broadcast receivers are lagging.
pub(crate) struct EventBus<E: Clone + Send + 'static> {
	tx: broadcast::Sender<E>,
	waiters: Mutex<Vec<WaiterEntry<E>>>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity);
		Self {
			tx,
			waiters: Mutex::new(Vec::new()),
		}
	}

	/// Emits an event to matching waiters, then to all subscribers.
	pub fn emit(&self, event: E) {
		{
			let mut waiters = self.waiters.lock();
			let mut i = 0;
			while i < waiters.len() {
				if (waiters[i].predicate)(&event) {
					let entry = waiters.swap_remove(i);
					let _ = entry.complete_tx.send(event.clone());
				} else {
					i += 1;
				}
			}
		}
		let _ = self.tx.send(event);
	}

	/// Events emitted before subscription are not received.
	pub fn subscribe(&self) -> broadcast::Receiver<E> {
		self.tx.subscribe()
	}

	/// Registers a waiter completed by the first event matching `predicate`.
	pub fn register_waiter<F>(&self, predicate: F) -> oneshot::Receiver<E>
	where
		F: Fn(&E) -> bool + Send + Sync + 'static,
	{
		let (complete_tx, complete_rx) = oneshot::channel();
		self.waiters.lock().push(WaiterEntry {
			predicate: Box::new(predicate),
			complete_tx,
		});
		complete_rx
	}

	#[allow(dead_code)]
	pub fn waiter_count(&self) -> usize {
		self.waiters.lock().len()
	}
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
	fn default() -> Self {
		Self::new(256)
	}
}

/// Wrapper around [`broadcast::Receiver`] that logs and skips over lag.
pub struct EventStream<E: Clone + Send + 'static> {
	rx: broadcast::Receiver<E>,
}

impl<E: Clone + Send + 'static> EventStream<E> {
	pub(crate) fn new(rx: broadcast::Receiver<E>) -> Self {
		Self { rx }
	}

	/// Receives the next event, or `None` once the client is dropped.
	pub async fn recv(&mut self) -> Option<E> {
		loop {
			match self.rx.recv().await {
				Ok(event) => return Some(event),
				Err(broadcast::error::RecvError::Lagged(n)) => {
					tracing::warn!(dropped = n, "Event stream lagged, dropped events");
				}
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}

	pub fn try_recv(&mut self) -> Option<E> {
		loop {
			match self.rx.try_recv() {
				Ok(event) => return Some(event),
				Err(broadcast::error::TryRecvError::Lagged(n)) => {
					tracing::warn!(dropped = n, "Event stream lagged, dropped events");
				}
				Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => return None,
			}
		}
	}
}

/// One-shot event waiter.
///
/// Await it directly for no deadline, or call [`wait`](Self::wait).
pub struct EventWaiter<E> {
	rx: oneshot::Receiver<E>,
	timeout: Duration,
}

impl<E: Send + 'static> EventWaiter<E> {
	pub(crate) fn new(rx: oneshot::Receiver<E>, timeout: Duration) -> Self {
		Self { rx, timeout }
	}

	/// Waits for the event with the configured timeout.
	///
	/// # Errors
	///
	/// [`Error::Timeout`] if nothing matched in time, [`Error::ConnectionEnded`]
	/// if the client was dropped first.
	pub async fn wait(self) -> Result<E> {
		tokio::time::timeout(self.timeout, self.rx)
			.await
			.map_err(|_| Error::Timeout("Timeout waiting for event".to_string()))?
			.map_err(|_| Error::connection_ended(None))
	}
}

impl<E: Send + 'static> Future for EventWaiter<E> {
	type Output = Result<E>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(Ok(event)) => Poll::Ready(Ok(event)),
			Poll::Ready(Err(_)) => Poll::Ready(Err(Error::connection_ended(None))),
			Poll::Pending => Poll::Pending,
		}
	}
}
