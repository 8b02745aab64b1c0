//! Live context channels and the queue of contexts expected to reconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use um_protocol::ContextId;
use um_runtime::{CorrelationTable, Error, Result};

use crate::host::HostEnvironment;
use crate::port::ContextPort;
use crate::url_pattern::MatchPattern;

#[derive(Default)]
struct RegistryState {
	ports: HashMap<ContextId, ContextPort>,
	waiting: HashMap<ContextId, Vec<oneshot::Sender<ContextPort>>>,
}

/// Context id → live channel, plus the waiting-port queue.
///
/// Both maps sit behind one lock so a connection can never slip between
/// "is anyone waiting" and "store the port". The lock is never held across
/// an await.
pub struct ContextRegistry {
	state: Mutex<RegistryState>,
	correlations: Arc<CorrelationTable>,
}

impl ContextRegistry {
	/// `correlations` is the table whose entries are rejected when a context
	/// disconnects.
	pub fn new(correlations: Arc<CorrelationTable>) -> Self {
		Self {
			state: Mutex::new(RegistryState::default()),
			correlations,
		}
	}

	/// Stores a freshly connected channel, replacing any previous one for
	/// the same id. Correlations sent over a replaced channel are rejected,
	/// since its late close will be ignored. Returns `true` if an
	/// acquisition was waiting for it.
	pub fn register(&self, port: ContextPort) -> bool {
		let id = port.id();
		let (replaced, waiters) = {
			let mut state = self.state.lock();
			let replaced = state
				.ports
				.insert(id, port.clone())
				.is_some_and(|old| !old.same_channel(&port));
			(replaced, state.waiting.remove(&id).unwrap_or_default())
		};

		if replaced {
			let rejected = self.correlations.reject_target(id);
			tracing::debug!(target = "um", context = %id, rejected, "replaced channel of connected context");
		}

		let mut delivered = false;
		for waiter in waiters {
			delivered |= waiter.send(port.clone()).is_ok();
		}
		if delivered {
			tracing::debug!(target = "um", context = %id, "context reconnected for pending acquisition");
		} else {
			tracing::info!(target = "um", context = %id, "unsolicited context connection");
		}
		delivered
	}

	pub fn lookup(&self, id: ContextId) -> Option<ContextPort> {
		self.state.lock().ports.get(&id).cloned()
	}

	pub fn contains(&self, id: ContextId) -> bool {
		self.state.lock().ports.contains_key(&id)
	}

	/// Removes the channel for `id` and rejects every correlation aimed at
	/// it. Waiting-port entries are kept: a navigating context disconnects
	/// before it reconnects.
	pub fn unregister(&self, id: ContextId) -> Option<ContextPort> {
		let removed = self.state.lock().ports.remove(&id);
		if removed.is_some() {
			let rejected = self.correlations.reject_target(id);
			tracing::debug!(target = "um", context = %id, rejected, "context unregistered");
		}
		removed
	}

	/// Like [`unregister`](Self::unregister), but only if `port` is still the
	/// registered channel. A late close from a replaced channel is ignored.
	pub fn unregister_port(&self, port: &ContextPort) -> bool {
		let current = {
			let state = self.state.lock();
			state.ports.get(&port.id()).is_some_and(|p| p.same_channel(port))
		};
		if !current {
			tracing::debug!(target = "um", context = %port.id(), "ignoring close of replaced channel");
			return false;
		}
		self.unregister(port.id()).is_some()
	}

	/// Registers interest in the next connection of `id`.
	///
	/// Call this before asking the host to create or navigate the context,
	/// so the reconnection resolves the waiter instead of being treated as
	/// unsolicited.
	pub fn expect_port(&self, id: ContextId) -> PortWaiter {
		let (tx, rx) = oneshot::channel();
		let mut state = self.state.lock();
		let queue = state.waiting.entry(id).or_default();
		queue.retain(|waiter| !waiter.is_closed());
		queue.push(tx);
		PortWaiter { id, rx }
	}

	/// Forgets waiters for `id` whose [`PortWaiter`] is gone. Returns how
	/// many are still live.
	pub fn prune_waiting(&self, id: ContextId) -> usize {
		let mut state = self.state.lock();
		let Some(queue) = state.waiting.get_mut(&id) else {
			return 0;
		};
		queue.retain(|waiter| !waiter.is_closed());
		let live = queue.len();
		if live == 0 {
			state.waiting.remove(&id);
		}
		live
	}

	/// Drops every waiter for `id`; they fail with [`Error::ContextLost`].
	pub fn discard_waiting(&self, id: ContextId) -> usize {
		self.state.lock().waiting.remove(&id).map_or(0, |waiters| waiters.len())
	}

	pub fn is_waiting(&self, id: ContextId) -> bool {
		self.state
			.lock()
			.waiting
			.get(&id)
			.is_some_and(|queue| queue.iter().any(|waiter| !waiter.is_closed()))
	}

	pub fn ids(&self) -> Vec<ContextId> {
		let mut ids: Vec<_> = self.state.lock().ports.keys().copied().collect();
		ids.sort();
		ids
	}

	pub fn len(&self) -> usize {
		self.state.lock().ports.len()
	}

	pub fn is_empty(&self) -> bool {
		self.state.lock().ports.is_empty()
	}

	/// First registered, settled context whose URL matches `pattern`.
	pub async fn find_by_url_pattern(&self, host: &dyn HostEnvironment, pattern: &str) -> Result<Option<ContextPort>> {
		let matcher = MatchPattern::new(pattern);
		let contexts = host.query_contexts(pattern).await?;
		Ok(contexts
			.into_iter()
			.filter(|info| info.is_settled() && matcher.is_match(&info.url))
			.find_map(|info| self.lookup(info.id)))
	}
}

/// Pending reconnection of one context.
pub struct PortWaiter {
	id: ContextId,
	rx: oneshot::Receiver<ContextPort>,
}

impl PortWaiter {
	pub fn id(&self) -> ContextId {
		self.id
	}

	pub async fn wait(self, timeout: Option<Duration>) -> Result<ContextPort> {
		let id = self.id;
		let received = match timeout {
			Some(limit) => tokio::time::timeout(limit, self.rx).await.map_err(|_| {
				Error::Timeout(format!("context {id} did not connect within {}ms", limit.as_millis()))
			})?,
			None => self.rx.await,
		};
		received.map_err(|_| Error::ContextLost { context: id })
	}
}
