use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use playback::{ExecutionOptions, StopOnError};

/// Failure policy (CLI wrapper for playback::StopOnError)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CliStopOnError {
	/// Record the failure and keep going
	Continue,
	/// Abandon the failing task, continue with the next one
	Task,
	/// Abandon the whole run
	#[default]
	Run,
}

impl From<CliStopOnError> for StopOnError {
	fn from(policy: CliStopOnError) -> Self {
		match policy {
			CliStopOnError::Continue => StopOnError::Continue,
			CliStopOnError::Task => StopOnError::Task,
			CliStopOnError::Run => StopOnError::Run,
		}
	}
}

#[derive(Parser, Debug)]
#[command(name = "playback")]
#[command(about = "Run playback scripts against a remote UI surface")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v debug, -vv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run a script and stream its events as JSON lines
	Run(RunArgs),

	/// Load and validate a script without running it
	Validate {
		/// Path to the JSON script
		script: PathBuf,
	},
}

#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("surface").required(true).args(["endpoint", "driver"])))]
pub struct RunArgs {
	/// Path to the JSON script
	pub script: PathBuf,

	/// WebSocket endpoint of the remote surface
	#[arg(long, value_name = "URL")]
	pub endpoint: Option<String>,

	/// Driver program speaking length-prefixed JSON on stdio
	#[arg(long, value_name = "PROGRAM")]
	pub driver: Option<PathBuf>,

	/// Argument passed to the driver (repeatable)
	#[arg(long = "driver-arg", value_name = "ARG", allow_hyphen_values = true, requires = "driver")]
	pub driver_args: Vec<String>,

	/// Pause before the first step
	#[arg(long)]
	pub pause_on_start: bool,

	/// What to do when a step fails
	#[arg(long, value_enum, default_value = "run")]
	pub stop_on_error: CliStopOnError,

	/// Scale every step timeout by this factor
	#[arg(long, value_name = "F", default_value_t = 1.0)]
	pub timeout_multiplier: f64,

	/// Base directory for relative screenshot paths
	#[arg(long, value_name = "DIR")]
	pub screenshot_dir: Option<PathBuf>,

	/// Read pause/resume/step/stop/snapshot commands from stdin
	#[arg(short, long)]
	pub interactive: bool,
}

impl RunArgs {
	pub fn execution_options(&self) -> ExecutionOptions {
		let mut options = ExecutionOptions::default()
			.with_pause_on_start(self.pause_on_start)
			.with_stop_on_error(self.stop_on_error.into())
			.with_timeout_multiplier(self.timeout_multiplier);
		if let Some(dir) = &self.screenshot_dir {
			options = options.with_screenshot_dir(dir);
		}
		options
	}
}
