//! Wires the router, the host agent adapter and the relay together and
//! serves the native messaging channel until the browser closes it.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use um::{HostEnvironment, RemoteHost, Router};

use crate::config::Settings;
use crate::error::Result;
use crate::relay::{self, RelayState};

/// Builds the router state for `settings`. Host agent requests share the
/// request deadline.
pub fn build(settings: &Settings) -> RelayState {
	let host = Arc::new(RemoteHost::new(settings.router.request_timeout));
	let router = Router::new(Arc::clone(&host) as Arc<dyn HostEnvironment>, settings.router);
	RelayState { router, host }
}

/// Serves the native channel on `writer`/`reader` with the relay accepting
/// on `listener`. Returns when `reader` reaches end of stream.
pub async fn serve<W, R>(state: RelayState, listener: TcpListener, writer: W, reader: R) -> Result<()>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	let relay_task = tokio::spawn(relay::serve(listener, state.clone()));

	let served = state.router.serve(writer, reader).await;
	if relay_task.is_finished() {
		if let Ok(Err(e)) = relay_task.await {
			tracing::warn!(target = "um", error = %e, "relay stopped early");
		}
	} else {
		relay_task.abort();
	}
	served?;
	tracing::info!(target = "um", "native channel closed, shutting down");
	Ok(())
}

pub async fn run(settings: Settings) -> Result<()> {
	let state = build(&settings);
	let listener = relay::bind(&settings.host, settings.port).await?;
	serve(state, listener, tokio::io::stdout(), tokio::io::stdin()).await
}
