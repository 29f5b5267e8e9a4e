//! WebSocket transport over the loopback interface.
//!
//! The application's RPC port is not known up front, so connection probes
//! ten consecutive ports starting at 6463 and keeps the first that completes
//! the WebSocket handshake. Payloads are JSON text messages.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{CloseLatch, CloseReason, EventSender, Link, LinkSlot, Outbound, Transport, TransportFuture};
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Loopback address the application binds.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// First port in the probe range.
pub const DEFAULT_BASE_PORT: u16 = 6463;

/// Number of consecutive ports probed.
pub const DEFAULT_PORT_COUNT: u16 = 10;

/// Port range probed by the WebSocket transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEndpoints {
	pub host: String,
	pub base_port: u16,
	pub port_count: u16,
}

impl Default for SocketEndpoints {
	fn default() -> Self {
		Self {
			host: LOOPBACK_HOST.to_string(),
			base_port: DEFAULT_BASE_PORT,
			port_count: DEFAULT_PORT_COUNT,
		}
	}
}

impl SocketEndpoints {
	/// Candidate URLs in increasing port order.
	pub fn urls(&self, client_id: &str) -> Vec<String> {
		(0..self.port_count)
			.filter_map(|offset| self.base_port.checked_add(offset))
			.map(|port| socket_url(&self.host, port, client_id))
			.collect()
	}
}

/// RPC URL for one candidate port.
pub fn socket_url(host: &str, port: u16, client_id: &str) -> String {
	format!("ws://{host}:{port}/?v=1&client_id={client_id}")
}

/// Transport over a loopback WebSocket.
pub struct WebSocketTransport {
	candidates: Vec<String>,
	origin: Option<String>,
	slot: LinkSlot,
}

impl WebSocketTransport {
	/// Creates a transport probing the default port range.
	pub fn new(client_id: &str) -> Self {
		Self::with_endpoints(client_id, &SocketEndpoints::default())
	}

	/// Creates a transport probing `endpoints`.
	pub fn with_endpoints(client_id: &str, endpoints: &SocketEndpoints) -> Self {
		Self::with_candidates(endpoints.urls(client_id))
	}

	/// Creates a transport probing explicit URLs, in order.
	pub fn with_candidates(candidates: Vec<String>) -> Self {
		Self {
			candidates,
			origin: None,
			slot: LinkSlot::default(),
		}
	}

	/// Sends `origin` as the `Origin` header on every probe.
	pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
		self.origin = Some(origin.into());
		self
	}

	/// URLs probed by [`Transport::connect`].
	pub fn candidates(&self) -> &[String] {
		&self.candidates
	}

	fn client_request(&self, url: &str) -> Result<Request> {
		let mut request = url
			.into_client_request()
			.map_err(|e| Error::InvalidArgument(format!("invalid endpoint URL {url}: {e}")))?;
		if let Some(origin) = &self.origin {
			let value = HeaderValue::from_str(origin).map_err(|e| Error::InvalidArgument(format!("invalid origin {origin}: {e}")))?;
			request.headers_mut().insert("Origin", value);
		}
		Ok(request)
	}

	/// Tries each candidate in order and returns the first open socket.
	///
	/// A failed probe means "nothing listening there"; only exhausting every
	/// candidate is an error.
	async fn probe(&self) -> Result<(String, WsStream)> {
		let mut attempts = Vec::with_capacity(self.candidates.len());
		for url in &self.candidates {
			let request = self.client_request(url)?;
			match tokio_tungstenite::connect_async(request).await {
				Ok((stream, _)) => return Ok((url.clone(), stream)),
				Err(e) => {
					tracing::debug!(url = %url, error = %e, "WebSocket endpoint unavailable");
					attempts.push(format!("{url}: {e}"));
				}
			}
		}
		Err(Error::NoEndpointFound { attempts })
	}
}

impl Transport for WebSocketTransport {
	fn connect(&self, events: EventSender) -> TransportFuture<'_, Result<()>> {
		Box::pin(async move {
			self.slot.ensure_vacant()?;
			let (url, stream) = self.probe().await?;
			tracing::debug!(url = %url, "Connected to WebSocket endpoint");

			let (sink, source) = stream.split();
			let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
			let latch = CloseLatch::new(events);

			let read_latch = Arc::clone(&latch);
			tokio::spawn(async move {
				let reason = read_loop(source, &read_latch).await;
				read_latch.finish(reason);
			});

			let write_latch = Arc::clone(&latch);
			tokio::spawn(async move { write_loop(sink, outbound_rx, write_latch).await });

			self.slot.install(Link::new(outbound_tx, latch));
			Ok(())
		})
	}

	fn send(&self, payload: Value) {
		self.slot.send(payload);
	}

	/// The socket's own close handshake already reports liveness.
	fn ping(&self) {}

	fn close(&self) -> TransportFuture<'_, ()> {
		Box::pin(self.slot.close())
	}
}

async fn read_loop(mut source: SplitStream<WsStream>, latch: &CloseLatch) -> Option<CloseReason> {
	loop {
		let message = tokio::select! {
			message = source.next() => message,
			_ = latch.wait() => return None,
		};

		match message {
			Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
				Ok(payload) => latch.emit(payload),
				Err(e) => tracing::warn!(error = %e, "Dropping WebSocket message with invalid JSON"),
			},
			Some(Ok(Message::Close(frame))) => {
				return frame.map(|frame| CloseReason {
					code: Some(i64::from(u16::from(frame.code))),
					message: frame.reason.to_string(),
				});
			}
			Some(Ok(_)) => {}
			Some(Err(e)) => {
				tracing::debug!(error = %e, "WebSocket read failed");
				return Some(CloseReason::from_error(e));
			}
			None => return None,
		}
	}
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut outbound: mpsc::UnboundedReceiver<Outbound>, latch: Arc<CloseLatch>) {
	loop {
		let item = tokio::select! {
			item = outbound.recv() => item,
			_ = latch.wait() => None,
		};
		let Some(item) = item else {
			return;
		};

		let result = match item {
			Outbound::Payload(payload) => sink.send(Message::Text(payload.to_string())).await,
			Outbound::Ping | Outbound::Pong(_) => Ok(()),
			Outbound::Close => {
				let _ = sink.close().await;
				latch.settle().await;
				return;
			}
		};

		if let Err(e) = result {
			tracing::error!(error = %e, "WebSocket write failed");
			latch.finish(Some(CloseReason::from_error(e)));
			return;
		}
	}
}
