use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the stderr subscriber. Stdout is reserved for JSON lines.
pub fn init_logging(verbosity: u8) {
	let filter = default_filter(verbosity);
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}

/// 0 = info, 1 (-v) = debug, 2+ (-vv) = trace for the playback crates.
fn default_filter(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "warn,playback=info,playback_cli=info,playback_runtime=warn",
		1 => "info,playback=debug,playback_cli=debug,playback_runtime=debug",
		_ => "debug,playback=trace,playback_cli=trace,playback_runtime=trace",
	}
}
