//! WebSocket endpoints for page contexts and the host agent.
//!
//! - `/context/{id}`: one socket per page context, carrying context envelopes
//! - `/host`: the host agent; a new connection replaces the previous one

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::routing::get;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use um::protocol::{ContextId, HostEvent};
use um::{RemoteHost, Router};

use crate::error::{CliError, Result};

#[derive(Clone)]
pub struct RelayState {
	pub router: Router,
	pub host: Arc<RemoteHost>,
}

pub fn app(state: RelayState) -> axum::Router {
	axum::Router::new()
		.route("/", get(|| async { "OK" }))
		.route(
			"/host",
			get(
				|ws: WebSocketUpgrade, State(state): State<RelayState>| async move {
					ws.on_upgrade(move |socket| handle_host_socket(socket, state))
				},
			),
		)
		.route(
			"/context/{id}",
			get(
				|Path(id): Path<ContextId>, ws: WebSocketUpgrade, State(state): State<RelayState>| async move {
					ws.on_upgrade(move |socket| handle_context_socket(socket, state.router, id))
				},
			),
		)
		.with_state(state)
}

pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
	let addr = format!("{host}:{port}");
	let listener = TcpListener::bind(&addr)
		.await
		.map_err(|source| CliError::Bind { addr, source })?;
	if let Ok(local) = listener.local_addr() {
		info!(target = "um", addr = %local, "relay listening");
	}
	Ok(listener)
}

pub async fn serve(listener: TcpListener, state: RelayState) -> Result<()> {
	axum::serve(listener, app(state).into_make_service())
		.await
		.map_err(CliError::Relay)
}

/// Drains `rx` into the socket as text frames.
fn spawn_writer(mut ws_tx: SplitSink<WebSocket, Message>, rx: mpsc::UnboundedReceiver<Value>) -> JoinHandle<()> {
	let mut frames = UnboundedReceiverStream::new(rx);
	tokio::spawn(async move {
		while let Some(frame) = frames.next().await {
			if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
				break;
			}
		}
		let _ = ws_tx.close().await;
	})
}

async fn handle_context_socket(socket: WebSocket, router: Router, id: ContextId) {
	let (port, rx) = router.connect_context(id);
	let (ws_tx, mut ws_rx) = socket.split();
	let send_task = spawn_writer(ws_tx, rx);

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Text(text)) => match serde_json::from_str::<Value>(text.as_str()) {
				Ok(value) => router.context_message(id, value),
				Err(err) => warn!(target = "um", context = %id, error = %err, "unparseable context frame"),
			},
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "um", context = %id, error = %err, "context websocket error");
				break;
			}
		}
	}

	router.disconnect_context(&port);
	send_task.abort();
	debug!(target = "um", context = %id, "context socket closed");
}

async fn handle_host_socket(socket: WebSocket, state: RelayState) {
	let (serial, rx) = state.host.attach();
	let (ws_tx, mut ws_rx) = socket.split();
	let send_task = spawn_writer(ws_tx, rx);

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Text(text)) => match serde_json::from_str::<Value>(text.as_str()) {
				Ok(value) => {
					if let Some(HostEvent::ContextRemoved { context_id }) = state.host.handle_message(value) {
						state.router.host_removed(context_id);
					}
				}
				Err(err) => warn!(target = "um", error = %err, "unparseable host agent frame"),
			},
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "um", error = %err, "host agent websocket error");
				break;
			}
		}
	}

	state.host.detach(serial);
	send_task.abort();
}
