//! The external process side: request/response envelopes over stdio, and
//! the relay that pushes unsolicited context updates to the same channel.

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use um_protocol::{ContextId, ErrorInfo, RequestEnvelope, ResponseEnvelope, UPDATE_REQUEST_ID, UpdateEvent};
use um_runtime::{Error, PipeTransport, Result, TransportReceiver};

use crate::dispatch::Dispatcher;
use crate::router::Router;

/// Outbound half of the session with the external process.
///
/// Envelopes are queued on an unbounded channel and written by a single
/// writer task, so responses from concurrently running requests never
/// interleave on the wire.
#[derive(Debug, Clone)]
pub struct BridgeEndpoint {
	outbound: mpsc::UnboundedSender<Value>,
}

impl BridgeEndpoint {
	pub fn new() -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (outbound, rx) = mpsc::unbounded_channel();
		(Self { outbound }, rx)
	}

	pub fn post(&self, envelope: &ResponseEnvelope) -> Result<()> {
		let frame = serde_json::to_value(envelope)?;
		self.outbound.send(frame).map_err(|_| Error::ChannelClosed)
	}

	/// Decodes one inbound frame, runs it through `dispatcher` and posts
	/// exactly one response carrying the same request id.
	pub async fn handle_frame(&self, dispatcher: &Dispatcher, frame: Value) {
		let request = match RequestEnvelope::deserialize(&frame) {
			Ok(request) => request,
			Err(e) => {
				let id = frame
					.get("requestId")
					.or_else(|| frame.get("messageNum"))
					.and_then(Value::as_i64);
				match id {
					Some(id) if id != UPDATE_REQUEST_ID => {
						tracing::warn!(target = "um.bridge", id, error = %e, "malformed request");
						let info = ErrorInfo::new("ProtocolError", format!("Malformed request: {e}"));
						self.post_logged(&ResponseEnvelope::failure(id, info));
					}
					_ => tracing::warn!(target = "um.bridge", error = %e, "dropping request without a usable id"),
				}
				return;
			}
		};

		let id = request.request_id;
		if id == UPDATE_REQUEST_ID {
			tracing::warn!(target = "um.bridge", "dropping request that uses the reserved update id");
			return;
		}

		tracing::debug!(target = "um.bridge", id, command = request.command().name(), "request received");
		let envelope = match dispatcher.dispatch(&request.payload).await {
			Ok(value) => ResponseEnvelope::success(id, value),
			Err(e) => {
				tracing::warn!(target = "um.bridge", id, error = %e, "request failed");
				ResponseEnvelope::failure(id, e.to_error_info())
			}
		};
		self.post_logged(&envelope);
	}

	fn post_logged(&self, envelope: &ResponseEnvelope) {
		if let Err(e) = self.post(envelope) {
			tracing::error!(target = "um.bridge", id = envelope.request_id, error = %e, "failed to queue response");
		}
	}
}

/// Forwards context updates to the attached bridge with the reserved id.
#[derive(Default)]
pub struct UpdateRelay {
	bridge: RwLock<Option<BridgeEndpoint>>,
}

impl UpdateRelay {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn attach(&self, bridge: BridgeEndpoint) {
		*self.bridge.write() = Some(bridge);
	}

	pub fn detach(&self) {
		self.bridge.write().take();
	}

	/// Posts `data` as an update envelope. Log records are also written to
	/// the router's own log. Returns false if no bridge is attached.
	pub fn relay(&self, context: ContextId, data: Value) -> bool {
		match UpdateEvent::classify(&data) {
			UpdateEvent::Log(record) => {
				let text = record.text();
				let logger = record.logger.as_str();
				match record.level.to_ascii_lowercase().as_str() {
					"error" => tracing::error!(target = "um.relay", %context, logger, "{text}"),
					"warn" | "warning" => tracing::warn!(target = "um.relay", %context, logger, "{text}"),
					"debug" => tracing::debug!(target = "um.relay", %context, logger, "{text}"),
					"trace" => tracing::trace!(target = "um.relay", %context, logger, "{text}"),
					_ => tracing::info!(target = "um.relay", %context, logger, "{text}"),
				}
			}
			UpdateEvent::Playback(info) => {
				tracing::debug!(target = "um.relay", %context, status = ?info.status, play_time = info.play_time, "playback update");
			}
			UpdateEvent::Other => tracing::trace!(target = "um.relay", %context, "update"),
		}

		let bridge = self.bridge.read().clone();
		match bridge {
			Some(bridge) => bridge.post(&ResponseEnvelope::update(data)).is_ok(),
			None => {
				tracing::debug!(target = "um.relay", %context, "no bridge attached, dropping update");
				false
			}
		}
	}
}

/// Runs one session with the external process over `reader`/`writer` until
/// the reader reaches end of stream.
pub async fn serve<W, R>(router: &Router, writer: W, reader: R) -> Result<()>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	let (transport, mut inbound) = PipeTransport::new(writer, reader);
	let (mut sender, mut receiver) = transport.into_parts();
	let (bridge, mut outbound) = BridgeEndpoint::new();
	router.relay().attach(bridge.clone());

	tokio::spawn(async move {
		while let Some(frame) = outbound.recv().await {
			if let Err(e) = sender.send(frame).await {
				tracing::error!(target = "um.bridge", error = %e, "failed to write response");
				break;
			}
		}
	});
	let reader_task = tokio::spawn(async move { receiver.run().await });

	tracing::info!(target = "um.bridge", "session started");
	while let Some(frame) = inbound.recv().await {
		let router = router.clone();
		let bridge = bridge.clone();
		tokio::spawn(async move {
			bridge.handle_frame(router.dispatcher(), frame).await;
		});
	}

	router.relay().detach();
	tracing::info!(target = "um.bridge", "session ended");
	reader_task
		.await
		.map_err(|e| Error::TransportError(format!("reader task failed: {e}")))?
}
