//! Request/response correlation.
//!
//! Every outbound request that expects an answer registers here first and
//! gets a fresh numeric id. Whoever receives the answer calls [`CorrelationTable::resolve`]
//! or [`CorrelationTable::reject`] with that id, which wakes the waiting
//! [`Correlation`].
//!
//! Entries optionally carry the [`ContextId`] they were sent to, so that a
//! disconnecting context can fail everything addressed to it in one call
//! ([`CorrelationTable::reject_target`]). Dropping a [`Correlation`] before it
//! completes removes its entry, so abandoned or timed-out requests never leak.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use um_protocol::ContextId;

use crate::error::{Error, Result};

struct Pending {
	tx: oneshot::Sender<Result<Value>>,
	target: Option<ContextId>,
}

type PendingMap = Arc<DashMap<u64, Pending>>;

/// Table of outstanding requests keyed by correlation id.
pub struct CorrelationTable {
	label: &'static str,
	next_id: AtomicU64,
	pending: PendingMap,
}

impl CorrelationTable {
	/// `label` names the table in log output ("context", "host").
	pub fn new(label: &'static str) -> Self {
		Self {
			label,
			next_id: AtomicU64::new(1),
			pending: Arc::new(DashMap::new()),
		}
	}

	/// Allocates an id and a waiter for it. The id is never reused for the
	/// lifetime of the table.
	pub fn register(&self, target: Option<ContextId>) -> Correlation {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = oneshot::channel();
		self.pending.insert(id, Pending { tx, target });
		tracing::trace!(target = "um", table = self.label, id, context = ?target, "registered correlation");

		Correlation {
			id,
			label: self.label,
			rx,
			guard: CancelGuard {
				id,
				pending: Arc::clone(&self.pending),
				completed: false,
			},
		}
	}

	/// Completes `id` with a value. Returns false if nothing was waiting.
	pub fn resolve(&self, id: u64, value: Value) -> bool {
		self.complete(id, Ok(value))
	}

	/// Completes `id` with an error. Returns false if nothing was waiting.
	pub fn reject(&self, id: u64, error: Error) -> bool {
		self.complete(id, Err(error))
	}

	pub fn complete(&self, id: u64, outcome: Result<Value>) -> bool {
		match self.pending.remove(&id) {
			Some((_, pending)) => {
				// The waiter may have been dropped between remove and send.
				let _ = pending.tx.send(outcome);
				true
			}
			None => {
				tracing::warn!(target = "um", table = self.label, id, "answer for unknown correlation id");
				false
			}
		}
	}

	/// Like [`complete`](Self::complete), but only if `id` was sent to
	/// `context` (or to no particular context). An answer from any other
	/// context leaves the entry pending.
	pub fn complete_from(&self, id: u64, context: ContextId, outcome: Result<Value>) -> bool {
		let removed = self
			.pending
			.remove_if(&id, |_, pending| pending.target.is_none_or(|target| target == context));
		match removed {
			Some((_, pending)) => {
				let _ = pending.tx.send(outcome);
				true
			}
			None if self.pending.contains_key(&id) => {
				tracing::warn!(target = "um", table = self.label, id, %context, "answer from a context the request was not sent to");
				false
			}
			None => {
				tracing::warn!(target = "um", table = self.label, id, %context, "answer for unknown correlation id");
				false
			}
		}
	}

	/// Fails every request addressed to `context` with [`Error::ContextLost`].
	/// Returns how many were rejected.
	pub fn reject_target(&self, context: ContextId) -> usize {
		let ids: Vec<u64> = self
			.pending
			.iter()
			.filter(|entry| entry.value().target == Some(context))
			.map(|entry| *entry.key())
			.collect();

		let mut rejected = 0;
		for id in ids {
			if let Some((_, pending)) = self.pending.remove(&id) {
				let _ = pending.tx.send(Err(Error::ContextLost { context }));
				rejected += 1;
			}
		}
		if rejected > 0 {
			tracing::debug!(target = "um", table = self.label, %context, rejected, "rejected requests for lost context");
		}
		rejected
	}

	/// Fails everything outstanding. Used when the peer behind the whole
	/// table goes away.
	pub fn reject_all(&self, make_error: impl Fn() -> Error) -> usize {
		let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
		let mut rejected = 0;
		for id in ids {
			if let Some((_, pending)) = self.pending.remove(&id) {
				let _ = pending.tx.send(Err(make_error()));
				rejected += 1;
			}
		}
		rejected
	}

	pub fn len(&self) -> usize {
		self.pending.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}

	pub fn contains(&self, id: u64) -> bool {
		self.pending.contains_key(&id)
	}
}

/// RAII guard removing the table entry when a waiter is dropped early.
struct CancelGuard {
	id: u64,
	pending: PendingMap,
	completed: bool,
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if self.pending.remove(&self.id).is_some() {
			tracing::trace!(target = "um", id = self.id, "removed abandoned correlation");
		}
	}
}

/// Waiter for one correlated answer.
pub struct Correlation {
	id: u64,
	label: &'static str,
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Correlation {
	pub fn id(&self) -> u64 {
		self.id
	}

	/// Waits for the answer, failing with [`Error::Timeout`] after `timeout`
	/// if one is given. The entry is removed either way.
	pub async fn wait(self, timeout: Option<Duration>) -> Result<Value> {
		let Some(limit) = timeout else {
			return self.await;
		};
		let id = self.id;
		let label = self.label;
		match tokio::time::timeout(limit, self).await {
			Ok(outcome) => outcome,
			Err(_) => Err(Error::Timeout(format!(
				"{label} request {id} got no answer within {}ms",
				limit.as_millis()
			))),
		}
	}
}

impl Future for Correlation {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(outcome) => {
				self.guard.completed = true;
				Poll::Ready(outcome.unwrap_or(Err(Error::ChannelClosed)))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}
