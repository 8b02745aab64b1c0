//! Native messaging host for the media context router.
//!
//! The browser launches the `um` binary and talks to it over stdio; page
//! contexts and the extension background connect back over WebSocket.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod relay;
pub mod runtime;
