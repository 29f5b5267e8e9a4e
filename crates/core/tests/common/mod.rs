// Shared fixtures for client integration tests.
//
// ScriptedTransport stands in for the desktop application: it records every
// outbound payload, can answer the READY handshake and selected commands on
// its own, and lets a test inject inbound messages or a close.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use drpc::drpc_protocol::{Command, Envelope, EventKind, RpcTokenResponse, TokenResponse};
use drpc::drpc_runtime::EventSender;
use drpc::oauth::ExchangeFuture;
use drpc::{Client, ClientConfig, CloseReason, CredentialExchange, Error, Result, Transport, TransportEvent, TransportFuture};
use parking_lot::Mutex;
use serde_json::{Value, json};

pub const CLIENT_ID: &str = "180984871685062656";

#[derive(Clone)]
pub enum Reply {
	Data(Value),
	Error(i64, &'static str),
}

#[derive(Default)]
pub struct ScriptedTransport {
	sent: Mutex<Vec<Value>>,
	events: Mutex<Option<EventSender>>,
	replies: Mutex<HashMap<Command, Reply>>,
	connects: AtomicUsize,
	closes: AtomicUsize,
	connect_delay: Duration,
	send_ready: bool,
	refuse: bool,
}

impl ScriptedTransport {
	/// Answers the handshake as soon as it opens.
	pub fn ready() -> Arc<Self> {
		Arc::new(Self {
			send_ready: true,
			..Self::default()
		})
	}

	/// Opens but never sends READY.
	pub fn silent() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Opens after `delay`, then answers the handshake.
	pub fn slow(delay: Duration) -> Arc<Self> {
		Arc::new(Self {
			send_ready: true,
			connect_delay: delay,
			..Self::default()
		})
	}

	/// Every connect fails as if no endpoint were listening.
	pub fn refusing() -> Arc<Self> {
		Arc::new(Self {
			refuse: true,
			..Self::default()
		})
	}

	pub fn reply_to(&self, cmd: Command, reply: Reply) {
		self.replies.lock().insert(cmd, reply);
	}

	pub fn connects(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}

	pub fn closes(&self) -> usize {
		self.closes.load(Ordering::SeqCst)
	}

	pub fn sent(&self) -> Vec<Value> {
		self.sent.lock().clone()
	}

	pub fn sent_commands(&self) -> Vec<String> {
		self.sent().iter().map(|p| p["cmd"].as_str().unwrap_or_default().to_string()).collect()
	}

	pub async fn wait_for_sent(&self, count: usize) -> Vec<Value> {
		for _ in 0..400 {
			let sent = self.sent();
			if sent.len() >= count {
				return sent;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		panic!("expected {count} sent payloads, got {}", self.sent().len());
	}

	pub async fn wait_for_connects(&self, count: usize) {
		for _ in 0..400 {
			if self.connects() >= count && self.events.lock().is_some() {
				return;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		panic!("expected {count} connects, got {}", self.connects());
	}

	/// Delivers an inbound envelope.
	pub fn push(&self, envelope: Envelope) {
		let payload = serde_json::to_value(envelope).unwrap();
		self.push_raw(payload);
	}

	pub fn push_raw(&self, payload: Value) {
		if let Some(events) = self.events.lock().as_ref() {
			let _ = events.send(TransportEvent::Message(payload));
		}
	}

	/// Simulates the remote closing the connection.
	pub fn close_with(&self, reason: Option<CloseReason>) {
		if let Some(events) = self.events.lock().take() {
			let _ = events.send(TransportEvent::Close(reason));
		}
	}
}

pub fn ready_envelope() -> Envelope {
	Envelope::dispatch(
		EventKind::Ready,
		json!({
			"v": 1,
			"config": {"cdn_host": "cdn.example.com", "api_endpoint": "//api.example.com", "environment": "production"},
			"user": {"id": "53908232506183680", "username": "mason", "discriminator": "0", "avatar": null}
		}),
	)
}

impl Transport for ScriptedTransport {
	fn connect(&self, events: EventSender) -> TransportFuture<'_, Result<()>> {
		Box::pin(async move {
			self.connects.fetch_add(1, Ordering::SeqCst);
			if !self.connect_delay.is_zero() {
				tokio::time::sleep(self.connect_delay).await;
			}
			if self.refuse {
				return Err(Error::NoEndpointFound {
					attempts: vec!["scripted: refused".to_string()],
				});
			}
			if self.send_ready {
				let _ = events.send(TransportEvent::Message(serde_json::to_value(ready_envelope()).unwrap()));
			}
			*self.events.lock() = Some(events);
			Ok(())
		})
	}

	fn send(&self, payload: Value) {
		self.sent.lock().push(payload.clone());

		let Ok(cmd) = serde_json::from_value::<Command>(payload["cmd"].clone()) else {
			return;
		};
		let Some(reply) = self.replies.lock().get(&cmd).cloned() else {
			return;
		};
		let nonce = payload["nonce"].as_str().unwrap_or_default().to_string();
		let envelope = match reply {
			Reply::Data(data) => Envelope::reply(cmd, nonce, data),
			Reply::Error(code, message) => Envelope::error_reply(cmd, nonce, code, message),
		};
		self.push(envelope);
	}

	fn ping(&self) {}

	fn close(&self) -> TransportFuture<'_, ()> {
		Box::pin(async move {
			self.closes.fetch_add(1, Ordering::SeqCst);
			self.close_with(None);
		})
	}
}

/// Credential exchange returning canned replies and counting calls.
pub struct FakeExchange {
	pub code_response: Mutex<TokenResponse>,
	pub codes: Mutex<Vec<String>>,
	pub refreshes: AtomicUsize,
	pub rpc_tokens: AtomicUsize,
}

impl FakeExchange {
	pub fn new() -> Arc<Self> {
		Self::with_response(token_response("access-1", 60))
	}

	pub fn with_response(response: TokenResponse) -> Arc<Self> {
		Arc::new(Self {
			code_response: Mutex::new(response),
			codes: Mutex::new(Vec::new()),
			refreshes: AtomicUsize::new(0),
			rpc_tokens: AtomicUsize::new(0),
		})
	}

	pub fn refreshes(&self) -> usize {
		self.refreshes.load(Ordering::SeqCst)
	}
}

impl CredentialExchange for FakeExchange {
	fn exchange_code<'a>(&'a self, code: &'a str) -> ExchangeFuture<'a, TokenResponse> {
		self.codes.lock().push(code.to_string());
		let response = self.code_response.lock().clone();
		Box::pin(async move { Ok(response) })
	}

	fn refresh<'a>(&'a self, _refresh_token: &'a str) -> ExchangeFuture<'a, TokenResponse> {
		let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
		Box::pin(async move { Ok(token_response(&format!("access-refreshed-{n}"), 60)) })
	}

	fn rpc_token(&self) -> ExchangeFuture<'_, RpcTokenResponse> {
		self.rpc_tokens.fetch_add(1, Ordering::SeqCst);
		Box::pin(async {
			Ok(RpcTokenResponse {
				rpc_token: "rpc-token".into(),
			})
		})
	}
}

pub fn token_response(access: &str, expires_in: u64) -> TokenResponse {
	TokenResponse {
		access_token: Some(access.to_string()),
		refresh_token: Some(format!("{access}-refresh")),
		token_type: Some("Bearer".into()),
		expires_in: Some(expires_in),
		scope: Some("rpc identify".into()),
	}
}

pub fn client_with(transport: Arc<ScriptedTransport>, exchange: Arc<FakeExchange>) -> Client {
	Client::with_parts(ClientConfig::new(CLIENT_ID), transport, exchange)
}

pub fn client_with_config(config: ClientConfig, transport: Arc<ScriptedTransport>, exchange: Arc<FakeExchange>) -> Client {
	Client::with_parts(config, transport, exchange)
}
