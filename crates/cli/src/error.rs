use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	/// Unknown interactive command.
	#[error("unknown command '{0}' (expected pause, resume, step, stop or snapshot)")]
	UnknownCommand(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Engine(#[from] playback::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}
