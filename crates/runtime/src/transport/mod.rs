//! Transport layer for the local RPC endpoint.
//!
//! A [`Transport`] moves JSON payloads between this process and the desktop
//! application. Two implementations are provided:
//!
//! - [`IpcTransport`]: length-framed messages over a Unix socket or Windows named pipe
//! - [`WebSocketTransport`]: text messages over a loopback WebSocket, probing a port range
//!
//! Inbound traffic is reported through the [`EventSender`] handed to
//! [`Transport::connect`]: one [`TransportEvent::Message`] per inbound frame,
//! in receipt order, then exactly one [`TransportEvent::Close`].

mod ipc;
mod websocket;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

pub use ipc::{IpcTransport, default_ipc_endpoints};
pub use websocket::{DEFAULT_BASE_PORT, DEFAULT_PORT_COUNT, LOOPBACK_HOST, SocketEndpoints, WebSocketTransport, socket_url};

use crate::error::{Error, Result};

/// How long a local close waits for the remote to finish the close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Boxed future returned by transport operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Channel a connected transport reports inbound traffic on.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Why a connection closed, when the remote said so.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
	pub code: Option<i64>,
	pub message: String,
}

impl CloseReason {
	pub(crate) fn from_error(err: impl std::fmt::Display) -> Self {
		Self {
			code: None,
			message: err.to_string(),
		}
	}
}

/// Inbound traffic from a connected transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
	/// One inbound frame, parsed as JSON.
	Message(Value),
	/// The connection is gone. Emitted exactly once per connection.
	Close(Option<CloseReason>),
}

/// Bidirectional channel to the RPC endpoint.
///
/// Implementations must be usable through `Arc<dyn Transport>`; the client
/// accepts caller-supplied implementations satisfying the same contract.
pub trait Transport: Send + Sync {
	/// Opens the channel. On success, inbound traffic flows to `events`
	/// until a single [`TransportEvent::Close`]. On failure nothing is emitted.
	fn connect(&self, events: EventSender) -> TransportFuture<'_, Result<()>>;

	/// Queues one JSON message. Write failures surface as a close event.
	fn send(&self, payload: Value);

	/// Best-effort liveness probe.
	fn ping(&self);

	/// Closes the channel and resolves once the close event was emitted.
	/// Safe to call repeatedly, while closing, or when never connected.
	fn close(&self) -> TransportFuture<'_, ()>;
}

/// Work items for a transport's writer task.
#[derive(Debug)]
pub(crate) enum Outbound {
	Payload(Value),
	Ping,
	Pong(Value),
	Close,
}

/// Emits inbound events and guarantees a single close event per connection.
pub(crate) struct CloseLatch {
	events: EventSender,
	fired: AtomicBool,
	closed: watch::Sender<bool>,
}

impl CloseLatch {
	pub(crate) fn new(events: EventSender) -> Arc<Self> {
		let (closed, _) = watch::channel(false);
		Arc::new(Self {
			events,
			fired: AtomicBool::new(false),
			closed,
		})
	}

	/// Forwards an inbound message unless the connection already closed.
	pub(crate) fn emit(&self, payload: Value) {
		if !self.is_closed() {
			let _ = self.events.send(TransportEvent::Message(payload));
		}
	}

	/// Marks the connection closed. Only the first call emits the close event.
	///
	/// Waiters are released only after the event is queued, so a resolved
	/// [`Transport::close`] always finds the close event in the channel.
	pub(crate) fn finish(&self, reason: Option<CloseReason>) -> bool {
		if self.fired.swap(true, Ordering::SeqCst) {
			return false;
		}
		tracing::debug!(?reason, "Transport closed");
		let _ = self.events.send(TransportEvent::Close(reason));
		self.closed.send_replace(true);
		true
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.fired.load(Ordering::SeqCst)
	}

	/// Resolves once [`finish`](Self::finish) has run.
	pub(crate) async fn wait(&self) {
		let mut rx = self.closed.subscribe();
		let _ = rx.wait_for(|closed| *closed).await;
	}

	/// Waits for the remote side of a local close, then closes regardless.
	pub(crate) async fn settle(&self) {
		if tokio::time::timeout(CLOSE_GRACE, self.wait()).await.is_err() {
			self.finish(None);
		}
	}
}

/// Handle on one live connection, shared by both transport variants.
#[derive(Clone)]
pub(crate) struct Link {
	outbound: mpsc::UnboundedSender<Outbound>,
	latch: Arc<CloseLatch>,
}

impl Link {
	pub(crate) fn new(outbound: mpsc::UnboundedSender<Outbound>, latch: Arc<CloseLatch>) -> Self {
		Self { outbound, latch }
	}

	fn push(&self, item: Outbound) {
		if self.outbound.send(item).is_err() {
			// Writer is gone; the connection is over.
			self.latch.finish(None);
		}
	}

	async fn close(&self) {
		if !self.latch.is_closed() {
			self.push(Outbound::Close);
		}
		self.latch.wait().await;
	}
}

/// Slot holding the current connection of a transport instance.
#[derive(Default)]
pub(crate) struct LinkSlot {
	link: Mutex<Option<Link>>,
}

impl LinkSlot {
	/// Fails if a previous connection on this transport is still open.
	pub(crate) fn ensure_vacant(&self) -> Result<()> {
		match self.link.lock().as_ref() {
			Some(link) if !link.latch.is_closed() => Err(Error::Transport("transport is already connected".to_string())),
			_ => Ok(()),
		}
	}

	pub(crate) fn install(&self, link: Link) {
		*self.link.lock() = Some(link);
	}

	fn current(&self) -> Option<Link> {
		self.link.lock().clone()
	}

	pub(crate) fn send(&self, payload: Value) {
		match self.current() {
			Some(link) => link.push(Outbound::Payload(payload)),
			None => tracing::warn!("Dropping message: transport is not connected"),
		}
	}

	pub(crate) fn ping(&self) {
		if let Some(link) = self.current() {
			link.push(Outbound::Ping);
		}
	}

	pub(crate) async fn close(&self) {
		let Some(link) = self.current() else {
			return;
		};
		link.close().await;
		let mut slot = self.link.lock();
		if slot.as_ref().is_some_and(|current| Arc::ptr_eq(&current.latch, &link.latch)) {
			*slot = None;
		}
	}
}
