//! Settings for one run: config file values overridden by command-line flags.
//!
//! ```json
//! {
//!   "relay": { "host": "127.0.0.1", "port": 19989 },
//!   "timeouts": { "requestMs": 30000, "connectMs": 30000, "settleMs": 30000 }
//! }
//! ```
//!
//! Every field is optional. A timeout of 0 disables it.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use um::{RouterConfig, timeout_from_millis};

use crate::cli::Cli;
use crate::error::{CliError, Result};

pub const DEFAULT_RELAY_HOST: &str = "127.0.0.1";
pub const DEFAULT_RELAY_PORT: u16 = 19989;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
	#[serde(default)]
	pub relay: RelaySection,
	#[serde(default)]
	pub timeouts: TimeoutSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySection {
	pub host: Option<String>,
	pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutSection {
	pub request_ms: Option<u64>,
	pub connect_ms: Option<u64>,
	pub settle_ms: Option<u64>,
}

impl FileConfig {
	pub fn read(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
			path: path.to_path_buf(),
			source,
		})?;
		serde_json::from_str(&text).map_err(|source| CliError::ConfigParse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Reads `explicit` if given (it must exist), else the default location
	/// if a file is there, else returns the empty config.
	pub fn load(explicit: Option<&Path>) -> Result<Self> {
		if let Some(path) = explicit {
			return Self::read(path);
		}
		match default_path() {
			Some(path) if path.is_file() => {
				tracing::debug!(target = "um", path = %path.display(), "using default config file");
				Self::read(&path)
			}
			_ => Ok(Self::default()),
		}
	}
}

/// `$XDG_CONFIG_HOME/um/config.json` or the platform equivalent.
pub fn default_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("um").join("config.json"))
}

/// Resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
	pub host: String,
	pub port: u16,
	pub router: RouterConfig,
}

impl Settings {
	pub fn resolve(cli: &Cli, file: FileConfig) -> Self {
		let defaults = RouterConfig::default();
		let timeout = |flag: Option<u64>, file: Option<u64>, default| match flag.or(file) {
			Some(ms) => timeout_from_millis(ms),
			None => default,
		};

		Self {
			host: cli
				.host
				.clone()
				.or(file.relay.host)
				.unwrap_or_else(|| DEFAULT_RELAY_HOST.to_string()),
			port: cli.port.or(file.relay.port).unwrap_or(DEFAULT_RELAY_PORT),
			router: RouterConfig {
				request_timeout: timeout(cli.request_timeout_ms, file.timeouts.request_ms, defaults.request_timeout),
				connect_timeout: timeout(cli.connect_timeout_ms, file.timeouts.connect_ms, defaults.connect_timeout),
				settle_timeout: timeout(cli.settle_timeout_ms, file.timeouts.settle_ms, defaults.settle_timeout),
			},
		}
	}

	pub fn from_cli(cli: &Cli) -> Result<Self> {
		let file = FileConfig::load(cli.config.as_deref())?;
		Ok(Self::resolve(cli, file))
	}
}
