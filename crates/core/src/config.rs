//! Router timing configuration.

use std::time::Duration;

/// Default time a forwarded request may wait for its context's answer.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Default time an acquisition waits for a context channel to (re)connect.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
/// Default time spent waiting for a loading context to settle.
pub const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 30_000;

/// Timeouts applied by the router. `None` waits indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
	pub request_timeout: Option<Duration>,
	pub connect_timeout: Option<Duration>,
	pub settle_timeout: Option<Duration>,
}

impl Default for RouterConfig {
	fn default() -> Self {
		Self {
			request_timeout: timeout_from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
			connect_timeout: timeout_from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
			settle_timeout: timeout_from_millis(DEFAULT_SETTLE_TIMEOUT_MS),
		}
	}
}

impl RouterConfig {
	pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.request_timeout = timeout;
		self
	}

	pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.connect_timeout = timeout;
		self
	}

	pub fn with_settle_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.settle_timeout = timeout;
		self
	}
}

/// Milliseconds to a timeout, where `0` disables it.
pub fn timeout_from_millis(ms: u64) -> Option<Duration> {
	(ms > 0).then(|| Duration::from_millis(ms))
}
