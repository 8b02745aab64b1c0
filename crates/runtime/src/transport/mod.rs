//! Length-prefixed JSON transport over a byte pipe.
//!
//! Each frame is a 4-byte length in native byte order followed by that many
//! bytes of UTF-8 JSON. This is the framing browsers use for native messaging
//! hosts on stdin/stdout.
//!
//! The transport splits into a sender half (writes frames) and a receiver half
//! (reads frames and pushes decoded values into an unbounded channel), so the
//! two directions never block each other.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Upper bound on an inbound frame.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Sending half of a transport.
pub trait Transport: Send {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Receiving half of a transport. `run` reads until the peer closes.
pub trait TransportReceiver: Send {
	fn run(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Boxed halves of a transport plus the channel its receiver feeds.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Framed JSON over an arbitrary reader/writer pair (stdio in production,
/// `tokio::io::duplex` in tests).
pub struct PipeTransport<W, R> {
	writer: W,
	reader: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport and the receiver its read loop will feed.
	pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		(
			Self {
				writer,
				reader,
				message_tx,
			},
			message_rx,
		)
	}

	/// Reads frames until the pipe closes. A clean EOF between frames ends
	/// the loop with `Ok`; EOF inside a frame is an error.
	pub async fn run(&mut self) -> Result<()> {
		read_frames(&mut self.reader, &self.message_tx).await
	}

	pub async fn send(&mut self, message: Value) -> Result<()> {
		write_frame(&mut self.writer, &message).await
	}

	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
		(
			PipeTransportSender {
				writer: self.writer,
			},
			PipeTransportReceiver {
				reader: self.reader,
				message_tx: self.message_tx,
			},
		)
	}

	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		let (sender, receiver) = self.into_parts();
		TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		}
	}
}

pub struct PipeTransportSender<W> {
	writer: W,
}

impl<W> PipeTransportSender<W>
where
	W: AsyncWrite + Unpin + Send,
{
	pub async fn send(&mut self, message: Value) -> Result<()> {
		write_frame(&mut self.writer, &message).await
	}
}

impl<W> Transport for PipeTransportSender<W>
where
	W: AsyncWrite + Unpin + Send,
{
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move { write_frame(&mut self.writer, &message).await })
	}
}

pub struct PipeTransportReceiver<R> {
	reader: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<R> TransportReceiver for PipeTransportReceiver<R>
where
	R: AsyncRead + Unpin + Send,
{
	fn run(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move { read_frames(&mut self.reader, &self.message_tx).await })
	}
}

async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let bytes = serde_json::to_vec(message)?;
	let length = u32::try_from(bytes.len())
		.map_err(|_| Error::TransportError(format!("Message too large to frame: {} bytes", bytes.len())))?;

	writer.write_all(&length.to_ne_bytes()).await?;
	writer.write_all(&bytes).await?;
	writer.flush().await?;
	Ok(())
}

async fn read_frames<R>(reader: &mut R, message_tx: &mpsc::UnboundedSender<Value>) -> Result<()>
where
	R: AsyncRead + Unpin,
{
	loop {
		let mut len_buf = [0u8; 4];
		let mut filled = 0;
		while filled < len_buf.len() {
			let n = reader
				.read(&mut len_buf[filled..])
				.await
				.map_err(|e| Error::TransportError(format!("Failed to read length prefix: {e}")))?;
			if n == 0 {
				if filled == 0 {
					tracing::debug!(target = "um", "pipe closed");
					return Ok(());
				}
				return Err(Error::TransportError(format!(
					"Failed to read length prefix: stream ended after {filled} of 4 bytes"
				)));
			}
			filled += n;
		}

		let length = u32::from_ne_bytes(len_buf) as usize;
		if length > MAX_MESSAGE_SIZE {
			return Err(Error::ProtocolError(format!(
				"Frame of {length} bytes exceeds limit of {MAX_MESSAGE_SIZE}"
			)));
		}

		let mut body = vec![0u8; length];
		reader
			.read_exact(&mut body)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read message body: {e}")))?;

		match serde_json::from_slice::<Value>(&body) {
			Ok(value) => {
				if message_tx.send(value).is_err() {
					tracing::debug!(target = "um", "message receiver dropped, stopping reader");
					return Ok(());
				}
			}
			Err(e) => {
				tracing::warn!(target = "um", error = %e, length, "discarding frame with invalid JSON");
			}
		}
	}
}
