use anyhow::Context;
use clap::Parser;
use um_cli::cli::Cli;
use um_cli::config::Settings;
use um_cli::error::CliError;
use um_cli::{logging, runtime};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = start(cli).await {
		// stdout belongs to the native channel.
		eprintln!("um: {err:#}");
		let code = err.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
		std::process::exit(code);
	}
}

async fn start(cli: Cli) -> anyhow::Result<()> {
	let settings = Settings::from_cli(&cli)?;
	tracing::debug!(target = "um", ?settings, "starting");
	runtime::run(settings).await.context("router session failed")
}
