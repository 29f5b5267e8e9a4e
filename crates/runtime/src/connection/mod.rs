//! Request correlation on top of a [`Transport`].
//!
//! This module turns logical commands into envelopes and matches replies back
//! to their callers. It handles:
//! - Generating a fresh nonce per request
//! - Correlating replies with pending requests, in any order
//! - Mapping `ERROR` replies to [`Error::RemoteError`]
//! - Handing everything else back as unsolicited events
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Connection::request`] with a command and args
//! 2. Connection generates a UUID nonce and registers a oneshot waiter
//! 3. The envelope is handed to [`Transport::send`]
//! 4. Caller awaits the waiter
//! 5. The dispatch loop feeds inbound envelopes to [`Connection::dispatch`]
//! 6. A reply with a known nonce settles its waiter; anything else is returned
//!    to the dispatch loop as an unsolicited event

mod pending;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use drpc_protocol::{Command, Envelope, ErrorPayload, EventKind};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

pub use pending::{PendingTable, Waiter};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// RAII guard removing the table entry when a request future is dropped early.
struct CancelGuard {
	nonce: String,
	pending: Arc<PendingTable>,
	completed: bool,
}

impl CancelGuard {
	fn new(nonce: String, pending: Arc<PendingTable>) -> Self {
		Self {
			nonce,
			pending,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if !self.completed && self.pending.take(&self.nonce).is_some() {
			tracing::debug!(nonce = %self.nonce, "Removed abandoned request");
		}
	}
}

/// Future returned by [`Connection::request`].
struct ReplyFuture {
	rx: oneshot::Receiver<Result<Envelope>>,
	guard: CancelGuard,
}

impl Future for ReplyFuture {
	type Output = Result<Envelope>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::connection_ended(None)).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Request correlation engine for one client.
///
/// Owns the pending-request table; the transport is shared with the client
/// that drives connection lifecycle.
pub struct Connection {
	transport: Arc<dyn Transport>,
	pending: Arc<PendingTable>,
}

impl Connection {
	/// Creates a connection over `transport`. Requests fail with
	/// [`Error::NotConnected`] until [`open`](Self::open) is called.
	pub fn new(transport: Arc<dyn Transport>) -> Self {
		Self {
			transport,
			pending: Arc::new(PendingTable::new()),
		}
	}

	pub fn transport(&self) -> &Arc<dyn Transport> {
		&self.transport
	}

	/// Starts accepting requests for a new connection cycle.
	pub fn open(&self) {
		self.pending.open();
	}

	/// Sends `cmd` and waits for the reply carrying the same nonce.
	///
	/// Resolves with the full reply envelope, or [`Error::RemoteError`] when
	/// the application answered with an `ERROR` event.
	pub async fn request(&self, cmd: Command, args: Value, evt: Option<EventKind>) -> Result<Envelope> {
		let nonce = Uuid::new_v4().to_string();
		let rx = self.pending.register(&nonce)?;
		let guard = CancelGuard::new(nonce.clone(), Arc::clone(&self.pending));

		let envelope = Envelope::request(cmd, args, evt, nonce.as_str());
		let payload = serde_json::to_value(&envelope)?;
		tracing::debug!(nonce = %nonce, ?cmd, ?evt, "Sending request");

		self.transport.send(payload);

		ReplyFuture { rx, guard }.await
	}

	/// Routes one inbound envelope.
	///
	/// Returns the envelope back if no pending request claims it, in which
	/// case it is an unsolicited event for general subscribers.
	pub fn dispatch(&self, envelope: Envelope) -> Option<Envelope> {
		let Some(waiter) = envelope.nonce.as_deref().and_then(|nonce| self.pending.take(nonce)) else {
			return Some(envelope);
		};

		tracing::debug!(nonce = ?envelope.nonce, cmd = ?envelope.cmd, error = envelope.is_error(), "Settling request");
		let result = if envelope.is_error() {
			Err(remote_error(&envelope))
		} else {
			Ok(envelope)
		};
		let _ = waiter.send(result);
		None
	}

	/// Fails every pending request with `error` and stops accepting new ones.
	pub fn fail_all(&self, error: &Error) -> usize {
		let count = self.pending.fail_all(error);
		if count > 0 {
			tracing::debug!(count, %error, "Failed pending requests");
		}
		count
	}

	pub fn pending_count(&self) -> usize {
		self.pending.len()
	}
}

/// Converts an `ERROR` reply into [`Error::RemoteError`].
fn remote_error(envelope: &Envelope) -> Error {
	let payload: ErrorPayload = envelope
		.data
		.clone()
		.and_then(|data| serde_json::from_value(data).ok())
		.unwrap_or_else(|| ErrorPayload {
			code: 0,
			message: "unknown RPC error".to_string(),
		});
	Error::RemoteError {
		code: payload.code,
		message: payload.message,
	}
}
