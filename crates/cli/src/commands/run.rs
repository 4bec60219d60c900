use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use futures::{Stream, StreamExt};
use playback::{
	DriverProvider, RegistryEvent, RunSummary, SessionConfig, SessionRegistry, SurfaceProvider, WebSocketProvider,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use crate::output::{self, Report};
use crate::repository::FileScriptRepository;

/// One interactive stdin command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
	Pause,
	Resume,
	Step,
	Stop,
	Snapshot,
}

impl FromStr for Control {
	type Err = CliError;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"pause" => Ok(Self::Pause),
			"resume" => Ok(Self::Resume),
			"step" => Ok(Self::Step),
			"stop" => Ok(Self::Stop),
			"snapshot" => Ok(Self::Snapshot),
			other => Err(CliError::UnknownCommand(other.to_string())),
		}
	}
}

pub async fn execute(args: RunArgs) -> Result<bool> {
	let provider: Arc<dyn SurfaceProvider> = match (&args.endpoint, &args.driver) {
		(Some(url), _) => Arc::new(WebSocketProvider::new(url.clone())),
		(None, Some(program)) => Arc::new(DriverProvider::new(program.clone()).with_args(args.driver_args.clone())),
		(None, None) => return Err(anyhow!("either --endpoint or --driver is required").into()),
	};

	let registry = Arc::new(SessionRegistry::new(Arc::new(FileScriptRepository::new()), provider));
	let printer = tokio::spawn(print_events(registry.subscribe()));

	let config = SessionConfig::new(args.script.to_string_lossy()).with_options(args.execution_options());
	let outcome = match registry.create_session(config).await {
		Ok(id) => drive(&registry, &id, args.interactive).await.map(|summary| (id, summary)),
		Err(e) => Err(e.into()),
	};

	if let Err(e) = registry.dispose_all().await {
		tracing::warn!(target = "playback.cli", error = %e, "cleanup failed");
	}
	// Dropping the registry closes the event stream once every queued event is printed.
	drop(registry);
	let _ = printer.await;

	let (id, summary) = outcome?;
	output::print_line(&Report::RunSummary {
		session_id: &id,
		summary: &summary,
	})?;
	tracing::info!(
		target = "playback.cli",
		session = %id,
		success = summary.success,
		aborted = summary.aborted,
		duration_ms = summary.duration_ms,
		"run finished"
	);
	Ok(summary.success)
}

/// Waits for the run while serving stdin commands and Ctrl-C.
async fn drive(registry: &Arc<SessionRegistry>, id: &str, interactive: bool) -> Result<RunSummary> {
	let mut run = tokio::spawn({
		let registry = Arc::clone(registry);
		let id = id.to_string();
		async move { registry.start_session(&id).await }
	});
	let mut stdin = interactive.then(|| BufReader::new(tokio::io::stdin()).lines());
	let mut interrupted = false;

	loop {
		tokio::select! {
			joined = &mut run => {
				let summary = joined.map_err(|e| anyhow!("run task failed: {e}"))??;
				return Ok(summary);
			}
			line = next_line(&mut stdin) => match line? {
				Some(line) if line.trim().is_empty() => {}
				Some(line) => {
					if let Err(e) = apply_line(registry, id, &line).await {
						tracing::warn!(target = "playback.cli", command = %line.trim(), error = %e, "command rejected");
					}
				}
				None => {
					tracing::debug!(target = "playback.cli", "stdin closed");
					stdin = None;
				}
			},
			signal = tokio::signal::ctrl_c(), if !interrupted => {
				signal?;
				interrupted = true;
				tracing::info!(target = "playback.cli", session = %id, "interrupted, stopping run");
				registry.stop_session(id).await?;
			}
		}
	}
}

async fn next_line(lines: &mut Option<Lines<BufReader<Stdin>>>) -> std::io::Result<Option<String>> {
	match lines {
		Some(lines) => lines.next_line().await,
		None => std::future::pending().await,
	}
}

async fn apply_line(registry: &SessionRegistry, id: &str, line: &str) -> Result<()> {
	let control: Control = line.parse()?;
	tracing::debug!(target = "playback.cli", session = %id, ?control, "applying command");
	match control {
		Control::Pause => registry.pause_session(id)?,
		Control::Resume => registry.resume_session(id)?,
		Control::Step => registry.step_session(id).await?,
		Control::Stop => registry.stop_session(id).await?,
		Control::Snapshot => {
			let snapshot = registry.snapshot(id)?;
			output::print_line(&Report::Snapshot { snapshot: &snapshot })?;
		}
	}
	Ok(())
}

async fn print_events(mut events: impl Stream<Item = RegistryEvent> + Unpin) {
	while let Some(event) = events.next().await {
		if let Err(e) = output::print_line(&event) {
			tracing::warn!(target = "playback.cli", error = %e, "failed to print event");
			break;
		}
	}
}
