//! Command dispatch.
//!
//! A [`Dispatcher`] runs an ordered chain of [`CommandHandler`]s over each
//! inbound command. Every handler sees the outcome produced so far and may
//! keep it or replace it; the final outcome is what the caller gets. A chain
//! that produces nothing answers with [`FALLBACK_REPLY`], so an unrecognised
//! command still gets a live reply.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use um_protocol::{Command, PlaybackStatus};
use um_runtime::{Error, Result};

use crate::acquire::{AcquireOptions, Target};
use crate::router::RouterCore;

/// Reply for commands no handler produced a value for.
pub const FALLBACK_REPLY: &str = "pong";

/// Result of a handler: a value now, or one later.
pub enum Outcome {
	Ready(Value),
	Deferred(BoxFuture<'static, Result<Value>>),
}

impl Outcome {
	pub fn ready(value: impl Into<Value>) -> Self {
		Outcome::Ready(value.into())
	}

	pub fn deferred<F>(future: F) -> Self
	where
		F: Future<Output = Result<Value>> + Send + 'static,
	{
		Outcome::Deferred(Box::pin(future))
	}

	pub async fn resolve(self) -> Result<Value> {
		match self {
			Outcome::Ready(value) => Ok(value),
			Outcome::Deferred(future) => future.await,
		}
	}
}

impl fmt::Debug for Outcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Outcome::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
			Outcome::Deferred(_) => f.write_str("Deferred(..)"),
		}
	}
}

/// One link of the dispatch chain.
///
/// Returning `previous` unchanged passes the command through. Returning an
/// error aborts the chain and fails the request.
pub trait CommandHandler: Send + Sync {
	fn handle(&self, command: &Command, payload: &Value, previous: Option<Outcome>) -> Result<Option<Outcome>>;
}

impl<F> CommandHandler for F
where
	F: Fn(&Command, &Value, Option<Outcome>) -> Result<Option<Outcome>> + Send + Sync,
{
	fn handle(&self, command: &Command, payload: &Value, previous: Option<Outcome>) -> Result<Option<Outcome>> {
		self(command, payload, previous)
	}
}

/// Ordered handler chain.
#[derive(Default)]
pub struct Dispatcher {
	handlers: RwLock<Vec<Arc<dyn CommandHandler>>>,
}

impl Dispatcher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends a handler; it runs after every handler already installed.
	pub fn push(&self, handler: Arc<dyn CommandHandler>) {
		self.handlers.write().push(handler);
	}

	pub fn len(&self) -> usize {
		self.handlers.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.handlers.read().is_empty()
	}

	pub async fn dispatch(&self, payload: &Value) -> Result<Value> {
		let command = Command::from_value(payload);
		let handlers = self.handlers.read().clone();

		let mut outcome = None;
		for handler in &handlers {
			outcome = handler.handle(&command, payload, outcome)?;
		}

		match outcome {
			None | Some(Outcome::Ready(Value::Null)) => {
				tracing::trace!(target = "um", command = command.name(), "no handler produced a value");
				Ok(Value::from(FALLBACK_REPLY))
			}
			Some(outcome) => outcome.resolve().await,
		}
	}
}

/// The router's own command set.
pub(crate) struct BuiltinCommands {
	core: Arc<RouterCore>,
}

impl BuiltinCommands {
	pub(crate) fn new(core: Arc<RouterCore>) -> Self {
		Self { core }
	}

	/// Shared path for every command answered by the active pinned context.
	fn forward_active(&self, payload: &Value) -> Outcome {
		let core = Arc::clone(&self.core);
		let payload = payload.clone();
		Outcome::deferred(async move { core.forward_active(payload).await })
	}
}

impl CommandHandler for BuiltinCommands {
	fn handle(&self, command: &Command, payload: &Value, previous: Option<Outcome>) -> Result<Option<Outcome>> {
		let core = Arc::clone(&self.core);
		let outcome = match command {
			Command::Ping { number, url: None } => Outcome::ready(*number),
			Command::Ping { url: Some(url), .. } => {
				let (url, payload) = (url.clone(), payload.clone());
				Outcome::deferred(async move {
					core.forward_to(Target::Url(url), AcquireOptions::default(), payload)
						.await
				})
			}
			Command::LoadSong { url } => {
				let url = url.clone();
				Outcome::deferred(async move {
					core.acquirer.open_pinned(url.as_deref()).await?;
					Ok(Value::Null)
				})
			}
			Command::QueryStatus => match core.acquirer.active_port() {
				Some(_) => self.forward_active(payload),
				None => Outcome::ready(serde_json::to_value(PlaybackStatus::Empty)?),
			},
			Command::QueryTime | Command::QueryLength | Command::SetPlayback { .. } | Command::Seek { .. } => {
				self.forward_active(payload)
			}
			Command::Quit => Outcome::deferred(async move { core.quit().await }),
			Command::ReportError { forward: true, .. } => self.forward_active(payload),
			Command::ReportError { forward: false, detail } => {
				tracing::error!(target = "um", ?detail, "error report requested");
				let message = match detail {
					Some(detail) => format!("Error requested by ReportError: {detail}"),
					None => "Error requested by ReportError".to_string(),
				};
				return Err(Error::LocalFault(message));
			}
			Command::QuerySongData { url: Some(url) } => {
				let (url, payload) = (url.clone(), payload.clone());
				Outcome::deferred(async move { core.query_song_data(url, payload).await })
			}
			Command::QuerySongData { url: None } => self.forward_active(payload),
			Command::Unknown { .. } => return Ok(previous),
		};
		Ok(Some(outcome))
	}
}
