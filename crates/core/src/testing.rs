//! In-memory host and context doubles for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use um_protocol::{ContextId, ContextInfo, ContextRequest, ErrorInfo, LoadStatus};
use um_runtime::{Error, Result};

use crate::host::HostEnvironment;
use crate::router::Router;
use crate::url_pattern::MatchPattern;

/// Host call as observed by a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
	Query(String),
	Create { id: ContextId, url: String, muted: bool },
	Navigate { id: ContextId, url: String },
	WaitSettled(ContextId),
	Close(ContextId),
}

#[derive(Default)]
struct FakeState {
	contexts: BTreeMap<ContextId, ContextInfo>,
	next_id: u64,
	settle_waiters: HashMap<ContextId, Vec<oneshot::Sender<()>>>,
	log: Vec<HostCall>,
	fail_create: bool,
	fail_navigate: bool,
}

/// Host environment backed by a map. Every call is logged and also pushed
/// to the receiver returned by [`FakeHost::new`].
pub struct FakeHost {
	state: Mutex<FakeState>,
	calls: mpsc::UnboundedSender<HostCall>,
}

impl FakeHost {
	pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<HostCall>) {
		let (calls, rx) = mpsc::unbounded_channel();
		let host = Arc::new(Self {
			state: Mutex::new(FakeState {
				next_id: 1,
				..FakeState::default()
			}),
			calls,
		});
		(host, rx)
	}

	pub fn add_context(&self, url: &str, status: LoadStatus, muted: bool) -> ContextId {
		let mut state = self.state.lock();
		let id = ContextId(state.next_id);
		state.next_id += 1;
		state.contexts.insert(
			id,
			ContextInfo {
				id,
				url: url.to_string(),
				status,
				muted,
			},
		);
		id
	}

	/// Marks the context complete and fires its settle waiters.
	pub fn settle(&self, id: ContextId) {
		let waiters = {
			let mut state = self.state.lock();
			if let Some(info) = state.contexts.get_mut(&id) {
				info.status = LoadStatus::Complete;
			}
			state.settle_waiters.remove(&id).unwrap_or_default()
		};
		for waiter in waiters {
			let _ = waiter.send(());
		}
	}

	pub fn info(&self, id: ContextId) -> Option<ContextInfo> {
		self.state.lock().contexts.get(&id).cloned()
	}

	pub fn calls(&self) -> Vec<HostCall> {
		self.state.lock().log.clone()
	}

	pub fn creations(&self) -> usize {
		self.calls()
			.iter()
			.filter(|call| matches!(call, HostCall::Create { .. }))
			.count()
	}

	pub fn fail_creation(&self) {
		self.state.lock().fail_create = true;
	}

	pub fn fail_navigation(&self) {
		self.state.lock().fail_navigate = true;
	}

	fn record(&self, call: HostCall) {
		self.state.lock().log.push(call.clone());
		let _ = self.calls.send(call);
	}
}

#[async_trait]
impl HostEnvironment for FakeHost {
	async fn query_contexts(&self, pattern: &str) -> Result<Vec<ContextInfo>> {
		self.record(HostCall::Query(pattern.to_string()));
		let matcher = MatchPattern::new(pattern);
		Ok(self
			.state
			.lock()
			.contexts
			.values()
			.filter(|info| matcher.is_match(&info.url))
			.cloned()
			.collect())
	}

	async fn get_context(&self, id: ContextId) -> Result<Option<ContextInfo>> {
		Ok(self.info(id))
	}

	async fn create_context(&self, url: &str, muted: bool) -> Result<ContextInfo> {
		if self.state.lock().fail_create {
			return Err(Error::HostEnvironment(format!("cannot open {url}")));
		}
		let id = self.add_context(url, LoadStatus::Loading, muted);
		self.record(HostCall::Create {
			id,
			url: url.to_string(),
			muted,
		});
		self.info(id)
			.ok_or_else(|| Error::HostEnvironment(format!("context {id} vanished")))
	}

	async fn navigate(&self, id: ContextId, url: &str) -> Result<()> {
		{
			let mut state = self.state.lock();
			if state.fail_navigate {
				return Err(Error::HostEnvironment(format!("cannot navigate {id}")));
			}
			let info = state
				.contexts
				.get_mut(&id)
				.ok_or_else(|| Error::HostEnvironment(format!("no context {id}")))?;
			info.url = url.to_string();
			info.status = LoadStatus::Loading;
		}
		self.record(HostCall::Navigate {
			id,
			url: url.to_string(),
		});
		Ok(())
	}

	async fn wait_load_settled(&self, id: ContextId) -> Result<()> {
		let rx = {
			let mut state = self.state.lock();
			match state.contexts.get(&id) {
				None => return Err(Error::HostEnvironment(format!("no context {id}"))),
				Some(info) if info.is_settled() => None,
				Some(_) => {
					let (tx, rx) = oneshot::channel();
					state.settle_waiters.entry(id).or_default().push(tx);
					Some(rx)
				}
			}
		};
		self.record(HostCall::WaitSettled(id));
		match rx {
			Some(rx) => rx
				.await
				.map_err(|_| Error::HostEnvironment(format!("context {id} closed while loading"))),
			None => Ok(()),
		}
	}

	async fn close_context(&self, id: ContextId) -> Result<()> {
		self.state.lock().contexts.remove(&id);
		self.record(HostCall::Close(id));
		Ok(())
	}
}

/// Answers a forwarded request the way a page adapter would.
pub type Responder = Arc<dyn Fn(&Value) -> std::result::Result<Value, ErrorInfo> + Send + Sync>;

/// Connects a context to `router` and answers its requests with `respond`
/// until the channel closes.
pub fn spawn_context(router: &Router, id: ContextId, respond: Responder) -> JoinHandle<()> {
	let (port, mut rx) = router.connect_context(id);
	drop(port);
	let router = router.clone();
	tokio::spawn(async move {
		while let Some(frame) = rx.recv().await {
			let Ok(request) = serde_json::from_value::<ContextRequest>(frame) else {
				continue;
			};
			let reply = match respond(&request.data) {
				Ok(data) => json!({"type": "response", "num": request.num, "data": data}),
				Err(error) => json!({"type": "error", "num": request.num, "error": error}),
			};
			router.context_message(id, reply);
		}
	})
}

pub fn responder(
	respond: impl Fn(&Value) -> std::result::Result<Value, ErrorInfo> + Send + Sync + 'static,
) -> Responder {
	Arc::new(respond)
}

/// Echo adapter: answers every request with `{"echo": <request>, "context": <id>}`.
pub fn echo(id: ContextId) -> Responder {
	responder(move |data| Ok(json!({"echo": data, "context": id})))
}

/// Plays the host agent: whenever a context is created or navigated, marks
/// it settled and connects it to `router` with `respond`.
pub fn auto_connect(
	router: &Router,
	host: Arc<FakeHost>,
	mut calls: mpsc::UnboundedReceiver<HostCall>,
	respond: impl Fn(ContextId) -> Responder + Send + 'static,
) -> JoinHandle<()> {
	let router = router.clone();
	tokio::spawn(async move {
		while let Some(call) = calls.recv().await {
			match call {
				HostCall::Create { id, .. } | HostCall::Navigate { id, .. } => {
					router.registry().unregister(id);
					host.settle(id);
					spawn_context(&router, id, respond(id));
				}
				HostCall::Close(id) => {
					router.registry().unregister(id);
				}
				_ => {}
			}
		}
	})
}
