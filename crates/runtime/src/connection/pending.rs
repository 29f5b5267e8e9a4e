//! Table of requests awaiting a correlated reply.
//!
//! Every entry is settled at most once: whoever removes it owns the sender.
//! The table is closed while no connection is up; registering then fails
//! instead of parking a caller that nothing will ever answer.

use std::collections::HashMap;

use drpc_protocol::Envelope;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Sender half settling one pending request.
pub type Waiter = oneshot::Sender<Result<Envelope>>;

#[derive(Default)]
struct Inner {
	open: bool,
	waiters: HashMap<String, Waiter>,
}

/// Pending requests keyed by nonce.
#[derive(Default)]
pub struct PendingTable {
	inner: Mutex<Inner>,
}

impl PendingTable {
	/// Creates a closed, empty table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Accepts registrations again after a (re)connect.
	pub fn open(&self) {
		self.inner.lock().open = true;
	}

	pub fn is_open(&self) -> bool {
		self.inner.lock().open
	}

	/// Registers a waiter for `nonce`.
	///
	/// # Errors
	///
	/// [`Error::NotConnected`] while the table is closed, and
	/// [`Error::InvalidArgument`] if `nonce` is already pending.
	pub fn register(&self, nonce: &str) -> Result<oneshot::Receiver<Result<Envelope>>> {
		let mut inner = self.inner.lock();
		if !inner.open {
			return Err(Error::NotConnected);
		}
		if inner.waiters.contains_key(nonce) {
			return Err(Error::InvalidArgument(format!("nonce {nonce} is already pending")));
		}
		let (tx, rx) = oneshot::channel();
		inner.waiters.insert(nonce.to_string(), tx);
		Ok(rx)
	}

	/// Removes and returns the waiter for `nonce`, if any.
	pub fn take(&self, nonce: &str) -> Option<Waiter> {
		self.inner.lock().waiters.remove(nonce)
	}

	/// Closes the table and fails every waiter with `error`.
	///
	/// Returns how many requests were failed.
	pub fn fail_all(&self, error: &Error) -> usize {
		let drained: Vec<Waiter> = {
			let mut inner = self.inner.lock();
			inner.open = false;
			inner.waiters.drain().map(|(_, waiter)| waiter).collect()
		};
		let count = drained.len();
		for waiter in drained {
			let _ = waiter.send(Err(error.clone()));
		}
		count
	}

	pub fn len(&self) -> usize {
		self.inner.lock().waiters.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
