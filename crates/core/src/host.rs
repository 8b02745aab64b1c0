//! Capabilities the router needs from the environment that owns contexts.

use async_trait::async_trait;
use um_protocol::{ContextId, ContextInfo};
use um_runtime::Result;

/// Host-level control over contexts (browser tabs in production).
///
/// Implementations report failures as [`um_runtime::Error::HostEnvironment`].
#[async_trait]
pub trait HostEnvironment: Send + Sync {
	/// Contexts whose current URL matches the match pattern.
	async fn query_contexts(&self, pattern: &str) -> Result<Vec<ContextInfo>>;

	/// Current description of one context, `None` if it no longer exists.
	async fn get_context(&self, id: ContextId) -> Result<Option<ContextInfo>>;

	/// Opens a new context on `url`. Muted contexts are treated as disposable.
	async fn create_context(&self, url: &str, muted: bool) -> Result<ContextInfo>;

	/// Redirects an existing context. Its channel drops and reconnects.
	async fn navigate(&self, id: ContextId, url: &str) -> Result<()>;

	/// Resolves once the context's current load has settled. Resolves
	/// immediately if it is not loading.
	async fn wait_load_settled(&self, id: ContextId) -> Result<()>;

	async fn close_context(&self, id: ContextId) -> Result<()>;
}
