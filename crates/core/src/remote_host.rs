//! [`HostEnvironment`] backed by a host agent on a message channel.
//!
//! The agent (the browser extension background in production) receives
//! `{ id, method, params }` requests and answers `{ id, result }` or
//! `{ id, error }`. It also pushes `loadSettled` and `contextRemoved`
//! events, which [`RemoteHost::handle_message`] hands back to the caller
//! after settling any local waiters.
//!
//! Only one agent is attached at a time. Attaching a second one fails the
//! first one's outstanding requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use um_protocol::{ContextId, ContextInfo, HostCommand, HostEvent, HostMessage};
use um_runtime::{CorrelationTable, Error, Result};

use crate::host::HostEnvironment;

struct Agent {
	serial: u64,
	tx: mpsc::UnboundedSender<Value>,
}

pub struct RemoteHost {
	agent: Mutex<Option<Agent>>,
	next_serial: AtomicU64,
	requests: CorrelationTable,
	settle_waiters: Mutex<HashMap<ContextId, Vec<oneshot::Sender<()>>>>,
	timeout: Option<Duration>,
}

impl RemoteHost {
	/// `timeout` bounds every host request; `None` waits forever.
	pub fn new(timeout: Option<Duration>) -> Self {
		Self {
			agent: Mutex::new(None),
			next_serial: AtomicU64::new(1),
			requests: CorrelationTable::new("host"),
			settle_waiters: Mutex::new(HashMap::new()),
			timeout,
		}
	}

	/// Installs a new agent connection. Requests go out on the returned
	/// receiver; pass the serial to [`detach`](Self::detach) when it closes.
	pub fn attach(&self) -> (u64, mpsc::UnboundedReceiver<Value>) {
		let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = mpsc::unbounded_channel();
		let previous = self.agent.lock().replace(Agent { serial, tx });
		if let Some(previous) = previous {
			let failed = self
				.requests
				.reject_all(|| Error::HostEnvironment("host agent was replaced".to_string()));
			tracing::warn!(target = "um", old = previous.serial, serial, failed, "host agent replaced");
		} else {
			tracing::info!(target = "um", serial, "host agent attached");
		}
		(serial, rx)
	}

	/// Drops the agent if `serial` is still the attached one.
	pub fn detach(&self, serial: u64) -> bool {
		{
			let mut agent = self.agent.lock();
			if agent.as_ref().map(|a| a.serial) != Some(serial) {
				return false;
			}
			agent.take();
		}
		let failed = self
			.requests
			.reject_all(|| Error::HostEnvironment("host agent disconnected".to_string()));
		tracing::info!(target = "um", serial, failed, "host agent detached");
		true
	}

	pub fn is_attached(&self) -> bool {
		self.agent.lock().is_some()
	}

	pub fn pending_requests(&self) -> usize {
		self.requests.len()
	}

	/// Processes one message from the agent. Responses complete their
	/// request; events are returned after local settle waiters are updated.
	pub fn handle_message(&self, message: Value) -> Option<HostEvent> {
		match serde_json::from_value::<HostMessage>(message) {
			Ok(HostMessage::Response(response)) => {
				let outcome = match response.error {
					Some(info) => Err(Error::HostEnvironment(format!("{}: {}", info.name, info.message))),
					None => Ok(response.result),
				};
				self.requests.complete(response.id, outcome);
				None
			}
			Ok(HostMessage::Event(event)) => {
				match &event {
					HostEvent::LoadSettled { context_id } => {
						let waiters = self.settle_waiters.lock().remove(context_id).unwrap_or_default();
						for waiter in waiters {
							let _ = waiter.send(());
						}
					}
					// Dropped senders fail the waits.
					HostEvent::ContextRemoved { context_id } => {
						self.settle_waiters.lock().remove(context_id);
					}
				}
				Some(event)
			}
			Err(e) => {
				tracing::warn!(target = "um", error = %e, "malformed host agent message");
				None
			}
		}
	}

	async fn call(&self, command: HostCommand) -> Result<Value> {
		let tx = self
			.agent
			.lock()
			.as_ref()
			.map(|agent| agent.tx.clone())
			.ok_or_else(|| Error::HostEnvironment("no host agent connected".to_string()))?;

		let correlation = self.requests.register(None);
		let frame = command.to_request(correlation.id())?;
		tracing::debug!(target = "um", id = correlation.id(), method = command.method(), "host request");
		tx.send(frame)
			.map_err(|_| Error::HostEnvironment("host agent disconnected".to_string()))?;
		correlation.wait(self.timeout).await
	}

	async fn call_as<T: DeserializeOwned>(&self, command: HostCommand) -> Result<T> {
		let method = command.method();
		let value = self.call(command).await?;
		serde_json::from_value(value)
			.map_err(|e| Error::ProtocolError(format!("unexpected {method} result: {e}")))
	}
}

#[async_trait]
impl HostEnvironment for RemoteHost {
	async fn query_contexts(&self, pattern: &str) -> Result<Vec<ContextInfo>> {
		self.call_as(HostCommand::QueryContexts {
			pattern: pattern.to_string(),
		})
		.await
	}

	async fn get_context(&self, id: ContextId) -> Result<Option<ContextInfo>> {
		self.call_as(HostCommand::GetContext { context_id: id }).await
	}

	async fn create_context(&self, url: &str, muted: bool) -> Result<ContextInfo> {
		self.call_as(HostCommand::CreateContext {
			url: url.to_string(),
			muted,
		})
		.await
	}

	async fn navigate(&self, id: ContextId, url: &str) -> Result<()> {
		self.call(HostCommand::Navigate {
			context_id: id,
			url: url.to_string(),
		})
		.await
		.map(drop)
	}

	async fn wait_load_settled(&self, id: ContextId) -> Result<()> {
		// Registered before asking, so a settle event between the answer and
		// the wait is not lost.
		let (tx, rx) = oneshot::channel();
		{
			let mut waiters = self.settle_waiters.lock();
			let queue = waiters.entry(id).or_default();
			queue.retain(|waiter| !waiter.is_closed());
			queue.push(tx);
		}

		match self.get_context(id).await? {
			None => Err(Error::HostEnvironment(format!("context {id} does not exist"))),
			Some(info) if info.is_settled() => Ok(()),
			Some(_) => rx
				.await
				.map_err(|_| Error::HostEnvironment(format!("context {id} closed while loading"))),
		}
	}

	async fn close_context(&self, id: ContextId) -> Result<()> {
		self.call(HostCommand::CloseContext { context_id: id }).await.map(drop)
	}
}
