//! drpc runtime - transports and request correlation
//!
//! This crate provides the low-level machinery for talking to the desktop
//! application's local RPC endpoint:
//!
//! - **Transport**: Bidirectional channel over an IPC pipe or a loopback WebSocket
//! - **Connection**: Nonce-based request/response correlation
//! - **Errors**: The error taxonomy shared by every layer above
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │    drpc     │  Client state machine, tokens, events
//! └──────┬──────┘
//!        │ owns Arc<dyn Transport>
//! ┌──────▼──────┐
//! │drpc-runtime │  This crate
//! │  ┌────────┐ │
//! │  │ Conn   │ │  Nonce correlation
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Trans  │ │  IPC / WebSocket
//! │  └────────┘ │
//! └─────────────┘
//! ```

pub mod connection;
pub mod error;
pub mod transport;

pub use connection::{Connection, PendingTable};
pub use error::{Error, Result};
pub use transport::{
	CloseReason, EventSender, IpcTransport, SocketEndpoints, Transport, TransportEvent, TransportFuture, WebSocketTransport,
	default_ipc_endpoints,
};
