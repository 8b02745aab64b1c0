
use std::path::PathBuf;

use clap::Parser;
use clap::builder::Styles;
use clap::builder::styling::AnsiColor;

/// Native messaging host for the media context router.
///
/// Reads length-prefixed JSON requests on stdin, writes responses on stdout
/// and accepts page contexts and the host agent over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "um")]
#[command(version)]
#[command(styles = styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug). Logs go to stderr.
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// JSON config file (default: $XDG_CONFIG_HOME/um/config.json when present)
	#[arg(short, long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Address the WebSocket relay listens on
	#[arg(long, value_name = "HOST")]
	pub host: Option<String>,

	/// Port the WebSocket relay listens on (0 picks a free port)
	#[arg(short, long, value_name = "PORT")]
	pub port: Option<u16>,

	/// Per-request deadline for context answers, 0 disables
	#[arg(long, value_name = "MS")]
	pub request_timeout_ms: Option<u64>,

	/// How long to wait for a created or redirected context to connect, 0 disables
	#[arg(long, value_name = "MS")]
	pub connect_timeout_ms: Option<u64>,

	/// How long to wait for a context to finish loading, 0 disables
	#[arg(long, value_name = "MS")]
	pub settle_timeout_ms: Option<u64>,

	/// Browser-supplied arguments (manifest path, extension id). Ignored.
	#[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
	pub browser_args: Vec<String>,
}

fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
}
