//! Context acquisition: turning a target into a connected channel.
//!
//! Given a target the manager either returns a channel that is already
//! registered, redirects a reusable context on the same domain, or asks the
//! host for a new one. Redirecting a context tears its channel down, so the
//! waiting-port entry is always registered before navigation is issued and
//! the acquisition completes when the context reconnects.
//!
//! A context opened by acquisition is always disposable: muted, never
//! pinned, and handed out inside a [`Lease`] that closes it when released or
//! dropped. Only [`AcquisitionManager::open_pinned`] opens a persistent one.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use um_protocol::{ContextId, ContextInfo};
use um_runtime::{Error, Result};

use crate::config::RouterConfig;
use crate::host::HostEnvironment;
use crate::port::ContextPort;
use crate::registry::{ContextRegistry, PortWaiter};
use crate::url_pattern::{MatchPattern, domain_of, domain_pattern};

/// What the caller wants a channel to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
	/// A specific context.
	Id(ContextId),
	/// A context showing exactly this URL.
	Url(String),
	/// Any context on this domain; new contexts open at its root.
	Domain(String),
	/// The active pinned context, else any connected one.
	Any,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquireOptions {
	/// Skip reusable contexts and always open a fresh disposable one.
	pub disposable: bool,
}

impl AcquireOptions {
	pub fn disposable() -> Self {
		Self { disposable: true }
	}
}

struct Destination {
	url: String,
	exact: bool,
}

/// Resolves targets to connected channels and tracks the pinned context.
pub struct AcquisitionManager {
	host: Arc<dyn HostEnvironment>,
	registry: Arc<ContextRegistry>,
	config: RouterConfig,
	pinned: Mutex<Option<ContextId>>,
}

impl AcquisitionManager {
	pub fn new(host: Arc<dyn HostEnvironment>, registry: Arc<ContextRegistry>, config: RouterConfig) -> Self {
		Self {
			host,
			registry,
			config,
			pinned: Mutex::new(None),
		}
	}

	pub fn host(&self) -> &Arc<dyn HostEnvironment> {
		&self.host
	}

	pub fn pinned(&self) -> Option<ContextId> {
		*self.pinned.lock()
	}

	pub fn set_pinned(&self, id: Option<ContextId>) {
		*self.pinned.lock() = id;
	}

	/// Forgets the pinned context if it is `id`.
	pub fn clear_pinned(&self, id: ContextId) -> bool {
		let mut pinned = self.pinned.lock();
		if *pinned == Some(id) {
			*pinned = None;
			true
		} else {
			false
		}
	}

	/// Channel of the pinned context, if it is currently connected.
	pub fn active_port(&self) -> Option<ContextPort> {
		self.pinned().and_then(|id| self.registry.lookup(id))
	}

	pub async fn acquire(&self, target: Target, options: AcquireOptions) -> Result<Lease> {
		tracing::debug!(target = "um", request = ?target, disposable = options.disposable, "acquiring context");
		match target {
			Target::Id(id) => self.acquire_id(id).await.map(Lease::retained),
			Target::Any => self
				.active_port()
				.or_else(|| {
					self.registry
						.ids()
						.into_iter()
						.find_map(|id| self.registry.lookup(id))
				})
				.map(Lease::retained)
				.ok_or_else(|| Error::Routing("no context is connected".to_string())),
			Target::Url(url) => self.acquire_destination(Destination { url, exact: true }, options).await,
			Target::Domain(domain) => {
				let destination = Destination {
					url: format!("https://{domain}/"),
					exact: false,
				};
				self.acquire_destination(destination, options).await
			}
		}
	}

	/// Acquires a channel, runs `task` with it, then releases the lease.
	pub async fn with_lease<F, Fut, T>(&self, target: Target, options: AcquireOptions, task: F) -> Result<T>
	where
		F: FnOnce(ContextPort) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let lease = self.acquire(target, options).await?;
		let outcome = task(lease.port().clone()).await;
		if let Err(e) = lease.release().await {
			tracing::warn!(target = "um", error = %e, "failed to close disposable context");
		}
		outcome
	}

	/// Replaces the pinned context: closes the current one, then opens `url`
	/// (when given) and pins it. Returns as soon as the host has created the
	/// context; it may still be loading.
	pub async fn open_pinned(&self, url: Option<&str>) -> Result<Option<ContextInfo>> {
		let previous = self.pinned.lock().take();
		if let Some(previous) = previous {
			tracing::info!(target = "um", context = %previous, "closing pinned context");
			self.host.close_context(previous).await?;
		}

		let Some(url) = url else {
			return Ok(None);
		};
		let info = self.host.create_context(url, false).await?;
		tracing::info!(target = "um", context = %info.id, url, "opened pinned context");
		self.set_pinned(Some(info.id));
		Ok(Some(info))
	}

	async fn acquire_id(&self, id: ContextId) -> Result<ContextPort> {
		if let Some(port) = self.registry.lookup(id) {
			return Ok(port);
		}
		let waiter = self.registry.expect_port(id);
		let outcome = match self.host.get_context(id).await {
			Ok(Some(_)) => return self.connected(waiter).await,
			Ok(None) => Err(Error::Routing(format!("context {id} does not exist"))),
			Err(e) => Err(e),
		};
		drop(waiter);
		self.registry.prune_waiting(id);
		outcome
	}

	/// Takes the channel if it connected before `waiter` was needed, else
	/// waits for it.
	async fn connected(&self, waiter: PortWaiter) -> Result<ContextPort> {
		let id = waiter.id();
		match self.registry.lookup(id) {
			Some(port) => {
				drop(waiter);
				self.registry.prune_waiting(id);
				Ok(port)
			}
			None => self.reconnected(waiter).await,
		}
	}

	async fn reconnected(&self, waiter: PortWaiter) -> Result<ContextPort> {
		let id = waiter.id();
		let outcome = waiter.wait(self.config.connect_timeout).await;
		if outcome.is_err() {
			self.registry.prune_waiting(id);
		}
		outcome
	}

	async fn acquire_destination(&self, destination: Destination, options: AcquireOptions) -> Result<Lease> {
		let domain = domain_of(&destination.url)
			.ok_or_else(|| Error::Routing(format!("cannot determine the domain of {}", destination.url)))?;

		if !options.disposable {
			let pattern = domain_pattern(&domain);
			let matcher = MatchPattern::new(&pattern);
			let candidates: Vec<ContextInfo> = self
				.host
				.query_contexts(&pattern)
				.await?
				.into_iter()
				.filter(|info| info.is_reusable() && matcher.is_match(&info.url))
				.collect();

			if let Some(candidate) = self.choose(candidates) {
				let port = self.redirect(candidate, &destination).await?;
				return Ok(Lease::retained(port));
			}
		}

		self.create(&destination.url).await
	}

	/// Pinned context first, then connected and settled ones.
	fn choose(&self, candidates: Vec<ContextInfo>) -> Option<ContextInfo> {
		let pinned = self.pinned();
		candidates.into_iter().max_by_key(|info| {
			(
				Some(info.id) == pinned,
				self.registry.contains(info.id) && info.is_settled(),
				std::cmp::Reverse(info.id),
			)
		})
	}

	async fn redirect(&self, candidate: ContextInfo, destination: &Destination) -> Result<ContextPort> {
		let id = candidate.id;
		let mut current = candidate;

		if !current.is_settled() {
			tracing::debug!(target = "um", context = %id, "deferring redirect until load settles");
			self.wait_settled(id).await?;
			current = self
				.host
				.get_context(id)
				.await?
				.ok_or_else(|| Error::HostEnvironment(format!("context {id} closed while loading")))?;
		}

		if !destination.exact || current.url == destination.url {
			if let Some(port) = self.registry.lookup(id) {
				tracing::debug!(target = "um", context = %id, "reusing context without navigation");
				return Ok(port);
			}
		}

		let waiter = self.registry.expect_port(id);
		tracing::debug!(target = "um", context = %id, url = %destination.url, "redirecting context");
		if let Err(e) = self.host.navigate(id, &destination.url).await {
			drop(waiter);
			self.registry.prune_waiting(id);
			return Err(e);
		}
		self.reconnected(waiter).await
	}

	async fn create(&self, url: &str) -> Result<Lease> {
		let info = self.host.create_context(url, true).await?;
		let id = info.id;
		tracing::debug!(target = "um", context = %id, url, "created disposable context");

		// Armed before waiting so a failed connect still closes it.
		let teardown = Teardown::new(Arc::clone(&self.host), id);
		let port = self.connected(self.registry.expect_port(id)).await?;
		Ok(Lease {
			port,
			teardown: Some(teardown),
		})
	}

	pub async fn wait_settled(&self, id: ContextId) -> Result<()> {
		match self.config.settle_timeout {
			Some(limit) => tokio::time::timeout(limit, self.host.wait_load_settled(id))
				.await
				.map_err(|_| Error::Timeout(format!("context {id} did not settle within {}ms", limit.as_millis())))?,
			None => self.host.wait_load_settled(id).await,
		}
	}
}

/// Closes a disposable context exactly once.
struct Teardown {
	host: Arc<dyn HostEnvironment>,
	id: ContextId,
	done: bool,
}

impl Teardown {
	fn new(host: Arc<dyn HostEnvironment>, id: ContextId) -> Self {
		Self { host, id, done: false }
	}

	async fn run(mut self) -> Result<()> {
		self.done = true;
		self.host.close_context(self.id).await
	}
}

impl Drop for Teardown {
	fn drop(&mut self) {
		if self.done {
			return;
		}

		let host = Arc::clone(&self.host);
		let id = self.id;
		if let Ok(handle) = tokio::runtime::Handle::try_current() {
			handle.spawn(async move {
				if let Err(e) = host.close_context(id).await {
					tracing::warn!(target = "um", context = %id, error = %e, "failed to close disposable context");
				}
			});
		}
	}
}

/// A connected channel handed out by [`AcquisitionManager::acquire`].
///
/// For disposable contexts, dropping the lease closes the context in the
/// background; [`Lease::release`] does it inline.
pub struct Lease {
	port: ContextPort,
	teardown: Option<Teardown>,
}

impl Lease {
	fn retained(port: ContextPort) -> Self {
		Self { port, teardown: None }
	}

	pub fn port(&self) -> &ContextPort {
		&self.port
	}

	pub fn id(&self) -> ContextId {
		self.port.id()
	}

	pub fn is_disposable(&self) -> bool {
		self.teardown.is_some()
	}

	pub async fn release(mut self) -> Result<()> {
		match self.teardown.take() {
			Some(teardown) => teardown.run().await,
			None => Ok(()),
		}
	}
}

impl fmt::Debug for Lease {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Lease")
			.field("id", &self.id())
			.field("disposable", &self.is_disposable())
			.finish()
	}
}
