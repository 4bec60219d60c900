use clap::Parser;
use playback_cli::{cli::Cli, commands, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	match commands::dispatch(cli).await {
		Ok(true) => {}
		Ok(false) => std::process::exit(1),
		Err(err) => {
			tracing::debug!(target = "playback.cli", error = ?err, "command failed");
			eprintln!("error: {err}");
			std::process::exit(1);
		}
	}
}
