//! The router instance: owns the correlation table, the context registry,
//! the acquisition manager and the dispatcher, and exposes the entry points
//! the transports call into.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use um_protocol::{ContextId, ContextMessage, ContextRequest};
use um_runtime::{CorrelationTable, Error, Result};

use crate::acquire::{AcquireOptions, AcquisitionManager, Target};
use crate::bridge::{self, UpdateRelay};
use crate::config::RouterConfig;
use crate::dispatch::{BuiltinCommands, CommandHandler, Dispatcher};
use crate::host::HostEnvironment;
use crate::port::ContextPort;
use crate::registry::ContextRegistry;
use crate::url_pattern::ALL_URLS;

/// State shared by the router handle and the built-in command handler.
pub(crate) struct RouterCore {
	pub(crate) config: RouterConfig,
	pub(crate) correlations: Arc<CorrelationTable>,
	pub(crate) registry: Arc<ContextRegistry>,
	pub(crate) acquirer: AcquisitionManager,
	pub(crate) relay: UpdateRelay,
}

impl RouterCore {
	/// Sends `payload` to the context behind `port` and waits for its answer.
	pub(crate) async fn forward(&self, port: &ContextPort, payload: Value) -> Result<Value> {
		let correlation = self.correlations.register(Some(port.id()));
		let num = correlation.id();
		tracing::debug!(target = "um", context = %port.id(), num, "forwarding request");
		port.send(&ContextRequest { num, data: payload })?;
		correlation.wait(self.config.request_timeout).await
	}

	pub(crate) async fn forward_active(&self, payload: Value) -> Result<Value> {
		let port = self
			.acquirer
			.active_port()
			.ok_or_else(|| Error::Routing("no active context".to_string()))?;
		self.forward(&port, payload).await
	}

	pub(crate) async fn forward_to(&self, target: Target, options: AcquireOptions, payload: Value) -> Result<Value> {
		self.acquirer
			.with_lease(target, options, |port| async move { self.forward(&port, payload).await })
			.await
	}

	/// Opens a disposable context, waits for it to settle, asks it for song
	/// metadata and closes it again.
	pub(crate) async fn query_song_data(&self, url: String, payload: Value) -> Result<Value> {
		self.acquirer
			.with_lease(Target::Url(url), AcquireOptions::disposable(), |port| async move {
				self.acquirer.wait_settled(port.id()).await?;
				self.forward(&port, payload).await
			})
			.await
	}

	/// Issues a close for every context the host knows about. Resolves once
	/// the closes are issued, not when they complete.
	pub(crate) async fn quit(&self) -> Result<Value> {
		let host = Arc::clone(self.acquirer.host());
		let contexts = host.query_contexts(ALL_URLS).await?;
		self.acquirer.set_pinned(None);
		tracing::info!(target = "um", count = contexts.len(), "closing all contexts");

		for info in contexts {
			let host = Arc::clone(&host);
			tokio::spawn(async move {
				if let Err(e) = host.close_context(info.id).await {
					tracing::warn!(target = "um", context = %info.id, error = %e, "close failed");
				}
			});
		}
		Ok(Value::Null)
	}
}

/// Handle on one router instance. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct Router {
	core: Arc<RouterCore>,
	dispatcher: Arc<Dispatcher>,
}

impl Router {
	pub fn new(host: Arc<dyn HostEnvironment>, config: RouterConfig) -> Self {
		let correlations = Arc::new(CorrelationTable::new("context"));
		let registry = Arc::new(ContextRegistry::new(Arc::clone(&correlations)));
		let acquirer = AcquisitionManager::new(host, Arc::clone(&registry), config);
		let core = Arc::new(RouterCore {
			config,
			correlations,
			registry,
			acquirer,
			relay: UpdateRelay::new(),
		});

		let dispatcher = Arc::new(Dispatcher::new());
		dispatcher.push(Arc::new(BuiltinCommands::new(Arc::clone(&core))));
		Self { core, dispatcher }
	}

	/// Appends a handler after the built-in commands.
	pub fn add_handler(&self, handler: impl CommandHandler + 'static) {
		self.dispatcher.push(Arc::new(handler));
	}

	pub fn config(&self) -> &RouterConfig {
		&self.core.config
	}

	pub fn registry(&self) -> &ContextRegistry {
		&self.core.registry
	}

	pub fn correlations(&self) -> &CorrelationTable {
		&self.core.correlations
	}

	pub fn acquirer(&self) -> &AcquisitionManager {
		&self.core.acquirer
	}

	pub fn relay(&self) -> &UpdateRelay {
		&self.core.relay
	}

	pub fn dispatcher(&self) -> &Dispatcher {
		&self.dispatcher
	}

	/// Registers a newly connected context. Frames for the context arrive on
	/// the returned receiver.
	pub fn connect_context(&self, id: ContextId) -> (ContextPort, mpsc::UnboundedReceiver<Value>) {
		let (port, rx) = ContextPort::new(id);
		self.core.registry.register(port.clone());
		(port, rx)
	}

	/// Handles the close of a context channel. Requests still waiting on the
	/// context fail with a context-lost error.
	pub fn disconnect_context(&self, port: &ContextPort) -> bool {
		let removed = self.core.registry.unregister_port(port);
		if removed {
			tracing::info!(target = "um", context = %port.id(), "context disconnected");
		}
		removed
	}

	/// Handles one frame from a context.
	pub fn context_message(&self, id: ContextId, message: Value) {
		match serde_json::from_value::<ContextMessage>(message) {
			Ok(ContextMessage::Response { num, data }) => {
				self.core.correlations.complete_from(num, id, Ok(data));
			}
			Ok(ContextMessage::Error { num, error }) => {
				tracing::debug!(target = "um", context = %id, num, name = %error.name, "context reported error");
				self.core
					.correlations
					.complete_from(num, id, Err(Error::from_error_info(error)));
			}
			Ok(ContextMessage::Update { data }) => {
				self.core.relay.relay(id, data);
			}
			Err(e) => tracing::warn!(target = "um", context = %id, error = %e, "malformed context message"),
		}
	}

	/// The host reports the context is gone for good.
	pub fn host_removed(&self, id: ContextId) {
		self.core.registry.unregister(id);
		let waiting = self.core.registry.discard_waiting(id);
		let was_pinned = self.core.acquirer.clear_pinned(id);
		tracing::debug!(target = "um", context = %id, waiting, was_pinned, "context removed by host");
	}

	pub async fn dispatch(&self, payload: &Value) -> Result<Value> {
		self.dispatcher.dispatch(payload).await
	}

	/// Sends `payload` to a specific connected context and waits for the answer.
	pub async fn forward(&self, port: &ContextPort, payload: Value) -> Result<Value> {
		self.core.forward(port, payload).await
	}

	/// Serves the external process over `reader`/`writer` until end of stream.
	pub async fn serve<W, R>(&self, writer: W, reader: R) -> Result<()>
	where
		W: AsyncWrite + Unpin + Send + 'static,
		R: AsyncRead + Unpin + Send + 'static,
	{
		bridge::serve(self, writer, reader).await
	}
}

#[cfg(test)]
mod tests;
