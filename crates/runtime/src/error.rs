//! Error types for the drpc runtime.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::transport::CloseReason;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by connection, request and login operations.
///
/// `Clone` so one failed connection attempt can be reported to every caller
/// sharing it.
#[derive(Debug, Clone, Error)]
pub enum Error {
	/// The handshake did not arrive within the connect timeout.
	#[error("Connection timed out after {}ms waiting for the handshake", .0.as_millis())]
	ConnectionTimeout(Duration),

	/// The transport closed while the operation was outstanding.
	#[error("Connection ended: {message}")]
	ConnectionEnded {
		/// Close code reported by the remote, if any.
		code: Option<i64>,
		/// Close reason, or a generic message when the close was unstructured.
		message: String,
	},

	/// Every candidate endpoint failed to open.
	#[error("No local RPC endpoint found{}", format_attempts(attempts))]
	NoEndpointFound {
		/// One entry per probed candidate, in probe order.
		attempts: Vec<String>,
	},

	/// The application answered with an `ERROR` event.
	#[error("RPC error {code}: {message}")]
	RemoteError { code: i64, message: String },

	/// A token reply lacked required fields.
	#[error("Malformed token response: missing {}", missing.join(", "))]
	MalformedTokenResponse { missing: Vec<&'static str> },

	/// Waiting for an event exceeded its deadline.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// A request was issued while no connection is established.
	#[error("Not connected")]
	NotConnected,

	/// Transport-level failure (socket, pipe, WebSocket).
	#[error("Transport error: {0}")]
	Transport(String),

	/// Credential exchange HTTP failure.
	#[error("HTTP error: {0}")]
	Http(String),

	/// Invalid argument provided to an operation.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(Arc<std::io::Error>),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(Arc<serde_json::Error>),

	/// Fallback for failures without a better classification.
	#[error("Unknown error: {0}")]
	Unknown(String),
}

fn format_attempts(attempts: &[String]) -> String {
	if attempts.is_empty() {
		String::new()
	} else {
		format!(" (tried: {})", attempts.join("; "))
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Error::Io(Arc::new(err))
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Json(Arc::new(err))
	}
}

impl Error {
	/// Builds the error pending requests receive when the transport closes.
	pub fn connection_ended(reason: Option<&CloseReason>) -> Self {
		match reason {
			Some(reason) => Error::ConnectionEnded {
				code: reason.code,
				message: reason.message.clone(),
			},
			None => Error::ConnectionEnded {
				code: None,
				message: "connection closed".to_string(),
			},
		}
	}

	/// Returns true if this is a connection timeout.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::ConnectionTimeout(_))
	}

	/// Returns true if the connection ended under the operation.
	pub fn is_connection_ended(&self) -> bool {
		matches!(self, Error::ConnectionEnded { .. })
	}

	/// Returns the remote error code if this is a [`Error::RemoteError`].
	pub fn remote_code(&self) -> Option<i64> {
		match self {
			Error::RemoteError { code, .. } => Some(*code),
			_ => None,
		}
	}
}
