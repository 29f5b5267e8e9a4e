//! The RPC client.
//!
//! A [`Client`] owns one transport, the request correlation engine, the
//! connection state machine and the token lifecycle. Inbound traffic for a
//! connection cycle is handled by a single dispatch task, in receipt order:
//!
//! 1. `DISPATCH`/`READY` completes the handshake and emits [`ClientEvent::Connected`]
//! 2. Replies settle the matching [`Connection::request`] future
//! 3. Everything else becomes an [`RpcEvent`] for handlers and streams
//! 4. The close event fails every pending request and ends the cycle

mod commands;
mod state;

use std::sync::{Arc, Weak};
use std::time::Duration;

use drpc_protocol::{
	Application, AuthenticateArgs, AuthenticateResponse, AuthorizeArgs, AuthorizeResponse, Command, Envelope, EventKind, ReadyPayload,
	ServerConfig, User,
};
use drpc_runtime::{
	CloseReason, Connection, Error, IpcTransport, Result, Transport, TransportEvent, WebSocketTransport, default_ipc_endpoints,
};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

pub use commands::EventSubscription;
pub use state::ConnectionState;

use crate::config::{ClientConfig, LoginOptions, TransportKind};
use crate::events::{ClientEvent, EventBus, EventStream, EventWaiter, RpcEvent};
use crate::handlers::{EventFilter, HandlerEntry, HandlerFn, HandlerFuture, RpcHandlers, Subscription, invoke_matching, next_handler_id};
use crate::oauth::{CredentialExchange, HttpCredentialExchange};
use crate::token::TokenManager;

type ConnectFuture = Shared<BoxFuture<'static, Result<()>>>;
type ReadySender = oneshot::Sender<Result<()>>;

/// Identity learned from the handshake and from `AUTHENTICATE`.
#[derive(Debug, Clone, Default)]
struct Session {
	user: Option<User>,
	server: Option<ServerConfig>,
	application: Option<Application>,
	scopes: Vec<String>,
}

struct ClientInner {
	config: ClientConfig,
	connection: Connection,
	state: watch::Sender<ConnectionState>,
	connecting: Mutex<Option<ConnectFuture>>,
	/// Bumped by `destroy`; an attempt started under an older value gives up.
	teardown: watch::Sender<u64>,
	session: RwLock<Session>,
	tokens: TokenManager,
	events: Arc<EventBus<ClientEvent>>,
	handlers: RpcHandlers,
}

/// Client for the desktop application's local RPC endpoint. Cheap to clone.
#[derive(Clone)]
pub struct Client {
	inner: Arc<ClientInner>,
}

impl Client {
	/// Creates a client using the transport selected by `config.transport`.
	pub fn new(config: ClientConfig) -> Result<Self> {
		let transport = default_transport(&config);
		Self::with_transport(config, transport)
	}

	/// Creates a client over a caller-supplied transport.
	pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
		let exchange = Arc::new(HttpCredentialExchange::new(&config)?);
		Ok(Self::with_parts(config, transport, exchange))
	}

	/// Creates a client over a caller-supplied transport and credential exchange.
	pub fn with_parts(config: ClientConfig, transport: Arc<dyn Transport>, exchange: Arc<dyn CredentialExchange>) -> Self {
		let events = Arc::new(EventBus::default());
		let (state, _) = watch::channel(ConnectionState::Idle);
		let (teardown, _) = watch::channel(0);
		Self {
			inner: Arc::new(ClientInner {
				config,
				connection: Connection::new(transport),
				state,
				connecting: Mutex::new(None),
				teardown,
				session: RwLock::new(Session::default()),
				tokens: TokenManager::with_events(exchange, Arc::clone(&events)),
				events,
				handlers: Arc::new(Mutex::new(IndexMap::new())),
			}),
		}
	}

	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	pub fn transport(&self) -> &Arc<dyn Transport> {
		self.inner.connection.transport()
	}

	pub fn tokens(&self) -> &TokenManager {
		&self.inner.tokens
	}

	pub fn state(&self) -> ConnectionState {
		*self.inner.state.borrow()
	}

	/// Watches state transitions.
	pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
		self.inner.state.subscribe()
	}

	/// The user from the handshake, replaced by the authenticated user after login.
	pub fn user(&self) -> Option<User> {
		self.inner.session.read().user.clone()
	}

	pub fn server_config(&self) -> Option<ServerConfig> {
		self.inner.session.read().server.clone()
	}

	pub fn application(&self) -> Option<Application> {
		self.inner.session.read().application.clone()
	}

	/// Scopes granted by the last `AUTHENTICATE`.
	pub fn scopes(&self) -> Vec<String> {
		self.inner.session.read().scopes.clone()
	}

	pub fn access_token(&self) -> Option<String> {
		self.inner.tokens.access_token()
	}

	pub fn pending_requests(&self) -> usize {
		self.inner.connection.pending_count()
	}

	/// Opens the transport and waits for the handshake.
	///
	/// Concurrent calls share one attempt. Once connected, further calls
	/// resolve immediately until the connection closes.
	///
	/// # Errors
	///
	/// - [`Error::NoEndpointFound`] if no endpoint accepted the connection
	/// - [`Error::ConnectionTimeout`] if the handshake did not arrive in time
	/// - [`Error::ConnectionEnded`] if the transport closed before the handshake
	pub async fn connect(&self) -> Result<()> {
		let attempt = {
			let mut slot = self.inner.connecting.lock();
			match slot.as_ref() {
				Some(attempt) => attempt.clone(),
				None => {
					let weak = Arc::downgrade(&self.inner);
					let attempt = async move {
						match weak.upgrade() {
							Some(inner) => inner.establish().await,
							None => Err(Error::connection_ended(None)),
						}
					}
					.boxed()
					.shared();
					*slot = Some(attempt.clone());
					attempt
				}
			}
		};
		attempt.await
	}

	/// Connects and, when scopes are requested, authorizes and authenticates.
	///
	/// Emits [`ClientEvent::Ready`] on success.
	pub async fn login(&self, options: LoginOptions) -> Result<()> {
		self.connect().await?;

		if !options.scopes.is_empty() {
			let access_token = match &options.access_token {
				Some(token) => token.clone(),
				None => self.authorize(&options).await?,
			};
			self.authenticate(&access_token).await?;
		}

		tracing::debug!("Login complete");
		self.inner.events.emit(ClientEvent::Ready);
		Ok(())
	}

	/// Runs `AUTHORIZE` and exchanges the returned code for tokens.
	///
	/// Returns the new access token. The refresh timer is armed on success.
	///
	/// # Errors
	///
	/// [`Error::MalformedTokenResponse`] if the token reply is incomplete.
	pub async fn authorize(&self, options: &LoginOptions) -> Result<String> {
		let tokens = &self.inner.tokens;

		let rpc_token = if options.rpc_token && self.inner.config.client_secret.is_some() {
			Some(tokens.exchange().rpc_token().await?.rpc_token)
		} else {
			None
		};

		let args = AuthorizeArgs {
			client_id: self.inner.config.client_id.clone(),
			scopes: options.scopes.clone(),
			prompt: options.prompt.clone(),
			rpc_token,
		};
		let reply = self.request(Command::Authorize, serde_json::to_value(args)?).await?;
		let AuthorizeResponse { code } = serde_json::from_value(reply)?;

		let response = tokens.exchange().exchange_code(&code).await?;
		let grant = tokens.store(response)?;
		Ok(grant.access_token)
	}

	/// Runs `AUTHENTICATE` and records the application and user.
	pub async fn authenticate(&self, access_token: &str) -> Result<AuthenticateResponse> {
		let args = AuthenticateArgs {
			access_token: access_token.to_string(),
		};
		let reply = self.request(Command::Authenticate, serde_json::to_value(args)?).await?;
		let auth: AuthenticateResponse = serde_json::from_value(reply)?;

		let mut session = self.inner.session.write();
		session.user = Some(auth.user.clone());
		session.application = Some(auth.application.clone());
		session.scopes = auth.scopes.clone();
		Ok(auth)
	}

	/// Sends `cmd` and resolves with the reply's `data`.
	pub async fn request(&self, cmd: Command, args: Value) -> Result<Value> {
		self.request_with_event(cmd, args, None).await
	}

	pub(crate) async fn request_with_event(&self, cmd: Command, args: Value, evt: Option<EventKind>) -> Result<Value> {
		let reply = self.inner.connection.request(cmd, args, evt).await?;
		Ok(reply.data.unwrap_or(Value::Null))
	}

	/// Best-effort liveness probe.
	pub fn ping(&self) {
		self.transport().ping();
	}

	/// Cancels the refresh timer, clears tokens and closes the transport.
	///
	/// A connect still in progress is abandoned and fails with
	/// [`Error::ConnectionEnded`]. Resolves once the close was fully processed.
	pub async fn destroy(&self) -> Result<()> {
		self.inner.tokens.shutdown();
		self.inner.teardown.send_modify(|generation| *generation += 1);

		let attempt = self.inner.connecting.lock().clone();
		if let Some(attempt) = attempt {
			let _ = attempt.await;
		}

		let mut state = self.inner.state.subscribe();
		self.transport().close().await;
		let _ = state.wait_for(|state| !state.is_open()).await;
		tracing::debug!("Client destroyed");
		Ok(())
	}

	/// Stream of lifecycle signals and unsolicited events.
	pub fn events(&self) -> EventStream<ClientEvent> {
		EventStream::new(self.inner.events.subscribe())
	}

	/// Waits for the first event matching `predicate`.
	pub fn wait_for_event<F>(&self, predicate: F, timeout: Duration) -> EventWaiter<ClientEvent>
	where
		F: Fn(&ClientEvent) -> bool + Send + Sync + 'static,
	{
		EventWaiter::new(self.inner.events.register_waiter(predicate), timeout)
	}

	/// Registers a handler for unsolicited RPC events.
	///
	/// The handler gets matching events one at a time, in receipt order, on a
	/// task owned by the registration. Must be called within a Tokio runtime.
	/// Returns a [`Subscription`] that unregisters the handler when dropped.
	pub fn on_event<F, Fut>(&self, filter: impl Into<EventFilter>, handler: F) -> Subscription
	where
		F: Fn(RpcEvent) -> Fut + Send + Sync + 'static,
		Fut: std::future::Future<Output = Result<()>> + Send + 'static,
	{
		let id = next_handler_id();
		let handler: HandlerFn<RpcEvent> = Arc::new(move |event: RpcEvent| -> HandlerFuture { Box::pin(handler(event)) });

		self.inner.handlers.lock().insert(id, HandlerEntry::spawn(id, filter.into(), handler));

		Subscription::from_handler_map(id, &self.inner.handlers)
	}
}

impl ClientInner {
	fn set_state(&self, next: ConnectionState) {
		let previous = self.state.send_replace(next);
		if previous != next {
			tracing::debug!(from = %previous, to = %next, "Connection state changed");
		}
	}

	fn debug(&self, message: String) {
		self.events.emit(ClientEvent::Debug(message));
	}

	/// One connection cycle, from opening the transport to the handshake.
	async fn establish(self: Arc<Self>) -> Result<()> {
		let timeout = self.config.connect_timeout;
		let mut teardown = self.teardown.subscribe();
		self.set_state(ConnectionState::Connecting);

		let (ready_tx, ready_rx) = oneshot::channel();
		let mut dispatcher = None;
		let attempt = async {
			let (events_tx, events_rx) = mpsc::unbounded_channel();
			self.connection.transport().connect(events_tx).await?;
			self.connection.open();
			self.set_state(ConnectionState::AwaitingHandshake);
			dispatcher = Some(tokio::spawn(run_dispatch(Arc::downgrade(&self), events_rx, ready_tx)));
			ready_rx.await.unwrap_or_else(|_| Err(Error::connection_ended(None)))
		};

		let result = tokio::select! {
			result = tokio::time::timeout(timeout, attempt) => match result {
				Ok(result) => result,
				Err(_) => Err(Error::ConnectionTimeout(timeout)),
			},
			_ = teardown.changed() => Err(Error::ConnectionEnded {
				code: None,
				message: "client destroyed".to_string(),
			}),
		};

		let Err(err) = result else {
			return Ok(());
		};

		tracing::debug!(error = %err, "Connection attempt failed");
		if let Some(handle) = dispatcher {
			self.connection.transport().close().await;
			let _ = handle.await;
		}
		self.connection.fail_all(&err);
		*self.connecting.lock() = None;
		self.set_state(ConnectionState::Disconnected);
		Err(err)
	}

	fn handle_message(&self, payload: Value, ready: &mut Option<ReadySender>) {
		let envelope: Envelope = match serde_json::from_value(payload) {
			Ok(envelope) => envelope,
			Err(err) => {
				tracing::warn!(error = %err, "Dropping malformed envelope");
				self.debug(format!("malformed envelope: {err}"));
				return;
			}
		};

		if envelope.is_ready() {
			match ready.take() {
				Some(tx) => {
					self.complete_handshake(&envelope);
					let _ = tx.send(Ok(()));
				}
				None => tracing::debug!("Ignoring repeated READY"),
			}
			return;
		}

		if let Some(unsolicited) = self.connection.dispatch(envelope) {
			let event = RpcEvent::from_envelope(unsolicited);
			tracing::debug!(kind = ?event.kind(), "Unsolicited event");
			invoke_matching(&self.handlers, &event);
			self.events.emit(ClientEvent::Rpc(event));
		}
	}

	fn complete_handshake(&self, envelope: &Envelope) {
		match serde_json::from_value::<ReadyPayload>(envelope.data_or_null()) {
			Ok(ready) => {
				let mut session = self.session.write();
				session.user = ready.user;
				session.server = Some(ready.config);
			}
			Err(err) => tracing::warn!(error = %err, "READY payload did not parse"),
		}
		self.set_state(ConnectionState::Connected);
		self.events.emit(ClientEvent::Connected);
	}

	fn handle_close(&self, reason: Option<CloseReason>, ready: Option<ReadySender>) {
		let err = Error::connection_ended(reason.as_ref());
		let failed = self.connection.fail_all(&err);
		let was_connected = *self.state.borrow() == ConnectionState::Connected;
		tracing::debug!(?reason, failed, "Connection closed");

		match ready {
			// Handshake never arrived; `establish` reports and cleans up.
			Some(tx) => {
				let _ = tx.send(Err(err));
			}
			None => {
				*self.connecting.lock() = None;
				self.set_state(ConnectionState::Disconnected);
			}
		}

		if was_connected {
			self.events.emit(ClientEvent::Disconnected(reason));
		}
	}
}

async fn run_dispatch(inner: Weak<ClientInner>, mut events: mpsc::UnboundedReceiver<TransportEvent>, ready: ReadySender) {
	let mut ready = Some(ready);
	while let Some(event) = events.recv().await {
		let Some(client) = inner.upgrade() else {
			return;
		};
		match event {
			TransportEvent::Message(payload) => client.handle_message(payload, &mut ready),
			TransportEvent::Close(reason) => {
				client.handle_close(reason, ready.take());
				return;
			}
		}
	}
	if let Some(client) = inner.upgrade() {
		client.handle_close(None, ready.take());
	}
}

fn default_transport(config: &ClientConfig) -> Arc<dyn Transport> {
	match config.transport {
		TransportKind::Ipc => Arc::new(IpcTransport::with_endpoints(
			config.client_id.clone(),
			default_ipc_endpoints(config.ipc_dir.as_deref()),
		)),
		TransportKind::WebSocket => {
			let mut transport = WebSocketTransport::with_endpoints(&config.client_id, &config.socket);
			if let Some(origin) = &config.origin {
				transport = transport.with_origin(origin.clone());
			}
			Arc::new(transport)
		}
	}
}
