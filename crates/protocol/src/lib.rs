//! Wire types for the local presence RPC protocol.
//!
//! This crate contains the serde-serializable types exchanged with the desktop
//! application over its local RPC endpoint. These types represent the
//! "protocol layer" - the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization and framing
//! - **Forward compatible**: Unknown command and event names decode to a catch-all
//! - **Transport agnostic**: The same [`Envelope`] travels over IPC frames and WebSocket text
//!
//! Connection handling lives in `drpc-runtime`; the client API in `drpc`.

pub mod envelope;
pub mod frame;
pub mod token;
pub mod types;

pub use envelope::*;
pub use frame::*;
pub use token::*;
pub use types::*;
