use std::fmt;

/// Lifecycle of one client's connection.
///
/// `Idle -> Connecting -> AwaitingHandshake -> Connected -> Disconnected`;
/// a failed attempt also lands in `Disconnected`, from which `connect`
/// starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
	#[default]
	Idle,
	Connecting,
	AwaitingHandshake,
	Connected,
	Disconnected,
}

impl ConnectionState {
	/// True while a transport is open for this client.
	pub fn is_open(&self) -> bool {
		matches!(self, ConnectionState::AwaitingHandshake | ConnectionState::Connected)
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ConnectionState::Idle => "idle",
			ConnectionState::Connecting => "connecting",
			ConnectionState::AwaitingHandshake => "awaiting handshake",
			ConnectionState::Connected => "connected",
			ConnectionState::Disconnected => "disconnected",
		};
		f.write_str(name)
	}
}
