//! drpc: client for the desktop application's local presence RPC endpoint
//!
//! Connects over an IPC socket/pipe (or a loopback WebSocket), correlates
//! requests with replies, runs the OAuth2 login flow and keeps the access
//! token refreshed.
//!
//! # Example
//!
//! ```ignore
//! use drpc::{Client, ClientConfig, LoginOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> drpc::Result<()> {
//!     let client = Client::new(ClientConfig::new("180984871685062656"))?;
//!     client.login(LoginOptions::new()).await?;
//!
//!     client
//!         .set_activity(json!({ "state": "In a match", "details": "Ranked" }))
//!         .await?;
//!
//!     client.destroy().await
//! }
//! ```
//!
//! # Events
//!
//! Lifecycle signals and unsolicited RPC events are delivered as
//! [`ClientEvent`]s, either through [`Client::events`] or, for RPC events
//! only, through handlers registered with [`Client::on_event`].

pub mod client;
pub mod config;
pub mod events;
pub mod handlers;
pub mod oauth;
pub mod token;

pub use client::{Client, ConnectionState, EventSubscription};
pub use config::{ClientConfig, DEFAULT_API_BASE, DEFAULT_CONNECT_TIMEOUT, LoginOptions, TransportKind};
pub use events::{ClientEvent, EventStream, EventWaiter, RpcEvent};
pub use handlers::{EventFilter, Subscription};
pub use oauth::{CredentialExchange, ExchangeFuture, HttpCredentialExchange};
pub use token::TokenManager;

/// Re-export protocol types.
pub use drpc_protocol;
pub use drpc_protocol::{Command, EventKind, TokenGrant, TokenResponse, User};

/// Re-export runtime types for custom transports.
pub use drpc_runtime;
pub use drpc_runtime::{CloseReason, Error, EventSender, Result, Transport, TransportEvent, TransportFuture};
