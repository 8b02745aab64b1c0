//! The router's handle on one connected context.

use serde_json::Value;
use tokio::sync::mpsc;
use um_protocol::{ContextId, ContextRequest};
use um_runtime::{Error, Result};

/// Sending side of a context channel. Cloning shares the channel.
///
/// The receiving half is owned by whatever carries frames to the context
/// (a WebSocket task in the binary, a test task in unit tests).
#[derive(Debug, Clone)]
pub struct ContextPort {
	id: ContextId,
	tx: mpsc::UnboundedSender<Value>,
}

impl ContextPort {
	pub fn new(id: ContextId) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { id, tx }, rx)
	}

	pub fn id(&self) -> ContextId {
		self.id
	}

	/// Queues a request for the context.
	pub fn send(&self, request: &ContextRequest) -> Result<()> {
		let frame = serde_json::to_value(request)?;
		self.tx.send(frame).map_err(|_| Error::ContextLost { context: self.id })
	}

	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}

	/// True if both handles feed the same underlying channel.
	pub fn same_channel(&self, other: &ContextPort) -> bool {
		self.id == other.id && self.tx.same_channel(&other.tx)
	}
}
