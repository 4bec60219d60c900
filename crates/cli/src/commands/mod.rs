mod run;
mod validate;

pub use run::Control;

use crate::cli::{Cli, Commands};
use crate::error::Result;

/// Runs the parsed command. `Ok(false)` means it completed but did not succeed.
pub async fn dispatch(cli: Cli) -> Result<bool> {
	match cli.command {
		Commands::Run(args) => run::execute(args).await,
		Commands::Validate { script } => validate::execute(&script).await,
	}
}
