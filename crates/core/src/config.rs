//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use drpc_runtime::SocketEndpoints;

/// Default bound on transport open plus handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default base URL of the HTTP API hosting the OAuth2 token endpoints.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api";

/// Which built-in transport a [`Client`](crate::Client) opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
	/// Unix socket or Windows named pipe.
	#[default]
	Ipc,
	/// Loopback WebSocket, probing a port range.
	WebSocket,
}

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub client_id: String,
	pub transport: TransportKind,
	/// Bound on transport open plus the `READY` handshake.
	pub connect_timeout: Duration,
	/// Directory holding the IPC sockets. Defaults to the runtime/temp dir chain.
	pub ipc_dir: Option<PathBuf>,
	pub socket: SocketEndpoints,
	/// `Origin` header sent with each WebSocket probe.
	pub origin: Option<String>,
	pub api_base: String,
	pub client_secret: Option<String>,
	pub redirect_uri: Option<String>,
}

impl ClientConfig {
	pub fn new(client_id: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			transport: TransportKind::default(),
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
			ipc_dir: None,
			socket: SocketEndpoints::default(),
			origin: None,
			api_base: DEFAULT_API_BASE.to_string(),
			client_secret: None,
			redirect_uri: None,
		}
	}

	pub fn transport(mut self, kind: TransportKind) -> Self {
		self.transport = kind;
		self
	}

	pub fn connect_timeout(mut self, timeout: Duration) -> Self {
		self.connect_timeout = timeout;
		self
	}

	pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());
		self
	}

	pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
		self.redirect_uri = Some(uri.into());
		self
	}

	/// Token endpoint used for code and refresh exchanges.
	pub fn token_url(&self) -> String {
		format!("{}/oauth2/token", self.api_base.trim_end_matches('/'))
	}

	/// Endpoint issuing RPC tokens for `AUTHORIZE`.
	pub fn rpc_token_url(&self) -> String {
		format!("{}/oauth2/token/rpc", self.api_base.trim_end_matches('/'))
	}
}

/// Options for [`Client::login`](crate::Client::login).
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
	/// OAuth2 scopes. Empty means connect without authenticating.
	pub scopes: Vec<String>,
	/// Passed through to `AUTHORIZE`, e.g. `"none"` to skip the consent screen.
	pub prompt: Option<String>,
	/// Skips `AUTHORIZE` and authenticates with this token directly.
	pub access_token: Option<String>,
	/// Fetches an RPC token before `AUTHORIZE`. Requires a client secret.
	pub rpc_token: bool,
}

impl LoginOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scopes = scopes.into_iter().map(Into::into).collect();
		self
	}

	pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
		self.prompt = Some(prompt.into());
		self
	}

	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(token.into());
		self
	}

	pub fn rpc_token(mut self, enabled: bool) -> Self {
		self.rpc_token = enabled;
		self
	}
}
