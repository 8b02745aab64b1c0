use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("failed to read config {path}")]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config {path}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("failed to bind relay to {addr}")]
	Bind {
		addr: String,
		#[source]
		source: std::io::Error,
	},

	#[error("relay server failed")]
	Relay(#[source] std::io::Error),

	#[error(transparent)]
	Router(#[from] um::Error),
}

impl CliError {
	/// Process exit code. Configuration problems are distinguished from
	/// failures at runtime.
	pub fn exit_code(&self) -> i32 {
		match self {
			CliError::ConfigRead { .. } | CliError::ConfigParse { .. } => 2,
			_ => 1,
		}
	}
}
