//! Binary framing used by the IPC transport.
//!
//! Every IPC message is framed as:
//! - a 4-byte little-endian opcode
//! - a 4-byte little-endian payload length
//! - the JSON payload
//!
//! The WebSocket transport does not use this framing; it sends the JSON
//! payload as a single text message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Size of the opcode + length header.
pub const HEADER_LEN: usize = 8;

/// Upper bound on a single frame payload. Larger lengths indicate a corrupt stream.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// IPC protocol version sent in the handshake.
pub const IPC_VERSION: u32 = 1;

/// IPC frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
	Handshake = 0,
	Frame = 1,
	Close = 2,
	Ping = 3,
	Pong = 4,
}

impl TryFrom<u32> for Opcode {
	type Error = u32;

	fn try_from(value: u32) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(Opcode::Handshake),
			1 => Ok(Opcode::Frame),
			2 => Ok(Opcode::Close),
			3 => Ok(Opcode::Ping),
			4 => Ok(Opcode::Pong),
			other => Err(other),
		}
	}
}

/// First frame written after the pipe opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
	pub v: u32,
	pub client_id: String,
}

impl Handshake {
	pub fn new(client_id: impl Into<String>) -> Self {
		Self {
			v: IPC_VERSION,
			client_id: client_id.into(),
		}
	}
}

/// Encodes a frame header for `len` payload bytes.
pub fn encode_header(op: Opcode, len: u32) -> [u8; HEADER_LEN] {
	let mut header = [0u8; HEADER_LEN];
	header[..4].copy_from_slice(&(op as u32).to_le_bytes());
	header[4..].copy_from_slice(&len.to_le_bytes());
	header
}

/// Splits a raw header into `(opcode, length)`.
pub fn decode_header(header: [u8; HEADER_LEN]) -> (u32, u32) {
	let op = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
	let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
	(op, len)
}

/// Serializes `payload` and prefixes it with its header.
pub fn encode_frame(op: Opcode, payload: &Value) -> serde_json::Result<Vec<u8>> {
	let body = serde_json::to_vec(payload)?;
	let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
	frame.extend_from_slice(&encode_header(op, body.len() as u32));
	frame.extend_from_slice(&body);
	Ok(frame)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_is_little_endian() {
		let header = encode_header(Opcode::Frame, 0x0102_0304);
		assert_eq!(header, [1, 0, 0, 0, 4, 3, 2, 1]);
		assert_eq!(decode_header(header), (1, 0x0102_0304));
	}

	#[test]
	fn frame_layout_is_header_then_json() {
		let payload = serde_json::json!({"cmd": "DISPATCH"});
		let frame = encode_frame(Opcode::Ping, &payload).unwrap();
		let body = serde_json::to_vec(&payload).unwrap();

		assert_eq!(frame.len(), HEADER_LEN + body.len());
		let (op, len) = decode_header(frame[..HEADER_LEN].try_into().unwrap());
		assert_eq!(Opcode::try_from(op), Ok(Opcode::Ping));
		assert_eq!(len as usize, body.len());
		assert_eq!(&frame[HEADER_LEN..], body.as_slice());
	}

	#[test]
	fn unknown_opcode_is_rejected() {
		assert_eq!(Opcode::try_from(9), Err(9));
	}

	#[test]
	fn handshake_uses_protocol_version() {
		let json = serde_json::to_value(Handshake::new("123")).unwrap();
		assert_eq!(json, serde_json::json!({"v": 1, "client_id": "123"}));
	}
}
