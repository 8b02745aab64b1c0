//! Media context router.
//!
//! Sits between one external control process and a changing set of page
//! contexts, each able to observe or control media playback:
//!
//! - **Bridge**: request/response envelopes with the external process
//! - **Dispatcher**: a chain of command handlers producing immediate or
//!   deferred outcomes
//! - **Acquisition**: finds, redirects or creates the context a command needs
//! - **Registry**: live context channels and the contexts expected to reconnect
//! - **Relay**: unsolicited context updates pushed back with the reserved id
//!
//! # Architecture
//!
//! ```text
//! external process ──► BridgeEndpoint ──► Dispatcher ──► AcquisitionManager
//!        ▲                                                    │
//!        │                                             ContextRegistry
//!        │                                                    │
//!        └──── UpdateRelay / CorrelationTable ◄──── page contexts
//! ```
//!
//! Everything the router needs from the environment owning the contexts
//! goes through [`HostEnvironment`]. [`RemoteHost`] implements it over a
//! correlated message channel to a host agent.

pub mod acquire;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod host;
pub mod port;
pub mod registry;
pub mod remote_host;
pub mod router;
pub mod url_pattern;

#[cfg(test)]
mod testing;

pub use acquire::{AcquireOptions, AcquisitionManager, Lease, Target};
pub use bridge::{BridgeEndpoint, UpdateRelay};
pub use config::{RouterConfig, timeout_from_millis};
pub use dispatch::{CommandHandler, Dispatcher, FALLBACK_REPLY, Outcome};
pub use host::HostEnvironment;
pub use port::ContextPort;
pub use registry::{ContextRegistry, PortWaiter};
pub use remote_host::RemoteHost;
pub use router::Router;
pub use url_pattern::{ALL_URLS, MatchPattern, domain_of, domain_pattern};
// Re-export the layers below so embedders need a single dependency.
pub use um_protocol as protocol;
pub use um_runtime::{Error, Result};
