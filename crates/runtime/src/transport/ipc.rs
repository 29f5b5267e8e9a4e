//! IPC transport over a Unix domain socket or Windows named pipe.
//!
//! The application listens on `discord-ipc-0` through `discord-ipc-9`; the
//! first endpoint that opens is used. Messages are framed as
//! `[opcode u32 LE][length u32 LE][JSON]` (see [`drpc_protocol::frame`]).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use drpc_protocol::{HEADER_LEN, Handshake, MAX_FRAME_LEN, Opcode, decode_header, encode_frame};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::{CloseLatch, CloseReason, EventSender, Link, LinkSlot, Outbound, Transport, TransportFuture};
use crate::error::{Error, Result};

/// Number of numbered IPC endpoints the application may listen on.
const ENDPOINT_COUNT: usize = 10;

/// Environment variables consulted, in order, for the socket directory.
#[cfg(unix)]
const DIR_VARS: [&str; 4] = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"];

/// Candidate IPC endpoints in probe order.
///
/// `dir` overrides the socket directory on Unix; it is ignored on Windows,
/// where endpoints are named pipes.
pub fn default_ipc_endpoints(dir: Option<&Path>) -> Vec<PathBuf> {
	#[cfg(windows)]
	{
		let _ = dir;
		(0..ENDPOINT_COUNT)
			.map(|id| PathBuf::from(format!(r"\\?\pipe\discord-ipc-{id}")))
			.collect()
	}
	#[cfg(not(windows))]
	{
		let base = dir.map(Path::to_path_buf).unwrap_or_else(socket_dir);
		(0..ENDPOINT_COUNT).map(|id| base.join(format!("discord-ipc-{id}"))).collect()
	}
}

#[cfg(unix)]
fn socket_dir() -> PathBuf {
	DIR_VARS
		.iter()
		.find_map(|var| std::env::var_os(var).filter(|value| !value.is_empty()))
		.map(PathBuf::from)
		.unwrap_or_else(|| PathBuf::from("/tmp"))
}

#[cfg(all(not(unix), not(windows)))]
fn socket_dir() -> PathBuf {
	std::env::temp_dir()
}

/// Transport over the application's local IPC endpoint.
pub struct IpcTransport {
	client_id: String,
	endpoints: Vec<PathBuf>,
	slot: LinkSlot,
}

impl IpcTransport {
	/// Creates a transport probing the default endpoints.
	pub fn new(client_id: impl Into<String>) -> Self {
		Self::with_endpoints(client_id, default_ipc_endpoints(None))
	}

	/// Creates a transport probing `endpoints` in order.
	pub fn with_endpoints(client_id: impl Into<String>, endpoints: Vec<PathBuf>) -> Self {
		Self {
			client_id: client_id.into(),
			endpoints,
			slot: LinkSlot::default(),
		}
	}

	/// Endpoints probed by [`Transport::connect`].
	pub fn endpoints(&self) -> &[PathBuf] {
		&self.endpoints
	}

	/// Runs the IPC protocol over an already-open stream.
	///
	/// Writes the handshake frame, then starts the reader and writer tasks.
	pub async fn connect_stream<S>(&self, stream: S, events: EventSender) -> Result<()>
	where
		S: AsyncRead + AsyncWrite + Send + 'static,
	{
		self.slot.ensure_vacant()?;

		let (mut reader, mut writer) = tokio::io::split(stream);
		let handshake = serde_json::to_value(Handshake::new(self.client_id.as_str()))?;
		write_frame(&mut writer, Opcode::Handshake, &handshake).await?;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let latch = CloseLatch::new(events);

		let read_latch = Arc::clone(&latch);
		let pong_tx = outbound_tx.clone();
		tokio::spawn(async move {
			let reason = read_loop(&mut reader, &pong_tx, &read_latch).await;
			read_latch.finish(reason);
		});

		let write_latch = Arc::clone(&latch);
		tokio::spawn(async move { write_loop(writer, outbound_rx, write_latch).await });

		self.slot.install(Link::new(outbound_tx, latch));
		Ok(())
	}

	async fn open_first(&self) -> Result<(PathBuf, IpcStream)> {
		let mut attempts = Vec::with_capacity(self.endpoints.len());
		for path in &self.endpoints {
			match open_endpoint(path).await {
				Ok(stream) => return Ok((path.clone(), stream)),
				Err(e) => {
					tracing::debug!(path = %path.display(), error = %e, "IPC endpoint unavailable");
					attempts.push(format!("{}: {e}", path.display()));
				}
			}
		}
		Err(Error::NoEndpointFound { attempts })
	}
}

impl Transport for IpcTransport {
	fn connect(&self, events: EventSender) -> TransportFuture<'_, Result<()>> {
		Box::pin(async move {
			self.slot.ensure_vacant()?;
			let (path, stream) = self.open_first().await?;
			tracing::debug!(path = %path.display(), "Connected to IPC endpoint");
			self.connect_stream(stream, events).await
		})
	}

	fn send(&self, payload: Value) {
		self.slot.send(payload);
	}

	fn ping(&self) {
		self.slot.ping();
	}

	fn close(&self) -> TransportFuture<'_, ()> {
		Box::pin(self.slot.close())
	}
}

#[cfg(unix)]
type IpcStream = tokio::net::UnixStream;

#[cfg(windows)]
type IpcStream = tokio::net::windows::named_pipe::NamedPipeClient;

#[cfg(unix)]
async fn open_endpoint(path: &Path) -> std::io::Result<IpcStream> {
	tokio::net::UnixStream::connect(path).await
}

#[cfg(windows)]
async fn open_endpoint(path: &Path) -> std::io::Result<IpcStream> {
	tokio::net::windows::named_pipe::ClientOptions::new().open(path)
}

/// Writes one frame and flushes it.
pub(crate) async fn write_frame<W>(writer: &mut W, op: Opcode, payload: &Value) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let frame = encode_frame(op, payload)?;
	writer.write_all(&frame).await?;
	writer.flush().await?;
	Ok(())
}

/// Reads one frame, returning its raw opcode and payload bytes.
///
/// Returns `Ok(None)` when the stream ends before a header starts.
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Option<(u32, Vec<u8>)>>
where
	R: AsyncRead + Unpin,
{
	let mut header = [0u8; HEADER_LEN];
	match reader.read_exact(&mut header).await {
		Ok(_) => {}
		Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
		Err(e) => return Err(Error::Transport(format!("Failed to read frame header: {e}"))),
	}

	let (op, len) = decode_header(header);
	if len > MAX_FRAME_LEN {
		return Err(Error::Transport(format!("Frame of {len} bytes exceeds limit")));
	}

	let mut body = vec![0u8; len as usize];
	reader
		.read_exact(&mut body)
		.await
		.map_err(|e| Error::Transport(format!("Failed to read frame body: {e}")))?;
	Ok(Some((op, body)))
}

/// Reads frames until the stream ends, returning the close reason.
async fn read_loop<R>(reader: &mut R, outbound: &mpsc::UnboundedSender<Outbound>, latch: &CloseLatch) -> Option<CloseReason>
where
	R: AsyncRead + Unpin,
{
	loop {
		let frame = tokio::select! {
			frame = read_frame(reader) => frame,
			_ = latch.wait() => return None,
		};

		let (op, body) = match frame {
			Ok(Some(frame)) => frame,
			Ok(None) => {
				tracing::debug!("IPC stream ended");
				return None;
			}
			Err(e) => {
				tracing::debug!(error = %e, "IPC read failed");
				return Some(CloseReason::from_error(e));
			}
		};

		let payload: Value = match serde_json::from_slice(&body) {
			Ok(value) => value,
			Err(e) => {
				tracing::warn!(op, error = %e, "Dropping IPC frame with invalid JSON");
				continue;
			}
		};

		match Opcode::try_from(op) {
			Ok(Opcode::Frame) => latch.emit(payload),
			Ok(Opcode::Close) => return Some(close_reason(&payload)),
			Ok(Opcode::Ping) => {
				let _ = outbound.send(Outbound::Pong(payload));
			}
			Ok(Opcode::Pong | Opcode::Handshake) => {}
			Err(unknown) => {
				tracing::warn!(op = unknown, "Unknown IPC opcode");
				return Some(CloseReason::from_error(format!("unknown opcode {unknown}")));
			}
		}
	}
}

fn close_reason(payload: &Value) -> CloseReason {
	CloseReason {
		code: payload.get("code").and_then(Value::as_i64),
		message: payload
			.get("message")
			.and_then(Value::as_str)
			.unwrap_or("connection closed")
			.to_string(),
	}
}

/// Drains queued work onto the stream until closed.
async fn write_loop<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<Outbound>, latch: Arc<CloseLatch>)
where
	W: AsyncWrite + Unpin,
{
	loop {
		let item = tokio::select! {
			item = outbound.recv() => item,
			_ = latch.wait() => None,
		};
		let Some(item) = item else {
			return;
		};

		let result = match item {
			Outbound::Payload(payload) => write_frame(&mut writer, Opcode::Frame, &payload).await,
			Outbound::Ping => {
				let nonce = uuid::Uuid::new_v4().to_string();
				write_frame(&mut writer, Opcode::Ping, &serde_json::json!({ "nonce": nonce })).await
			}
			Outbound::Pong(payload) => write_frame(&mut writer, Opcode::Pong, &payload).await,
			Outbound::Close => {
				let _ = write_frame(&mut writer, Opcode::Close, &serde_json::json!({})).await;
				let _ = writer.shutdown().await;
				latch.settle().await;
				return;
			}
		};

		if let Err(e) = result {
			tracing::error!(error = %e, "IPC write failed");
			latch.finish(Some(CloseReason::from_error(e)));
			return;
		}
	}
}
