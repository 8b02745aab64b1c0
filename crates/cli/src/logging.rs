use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the global subscriber. Always writes to stderr: stdout carries
/// the native messaging frames.
pub fn init_logging(verbosity: u8) {
	// 0 = warnings only, relayed context logs included
	// 1 (-v) = router lifecycle at info
	// 2+ (-vv) = per-request debug/trace
	let filter = match verbosity {
		0 => "warn",
		1 => "info,axum=warn",
		2 => "debug,axum=info,tower=info,hyper=info",
		_ => "trace",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_ansi(false)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
