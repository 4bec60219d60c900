//! Connected remote surfaces.
//!
//! A [`RemoteSurface`] owns a running [`Connection`] plus whatever keeps the
//! other end alive: a driver child process speaking length-prefixed JSON on
//! stdio, or a WebSocket.

use std::ffi::OsStr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::transport::{PipeTransport, TransportParts, WebSocketTransport};

/// How long a freshly spawned driver must stay alive to count as started.
const STARTUP_GRACE: Duration = Duration::from_millis(100);

/// How long to wait for a killed driver to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// A live connection to a surface and the resources backing it.
#[derive(Debug)]
pub struct RemoteSurface {
	connection: Arc<Connection>,
	dispatch: JoinHandle<()>,
	process: Option<Child>,
}

impl RemoteSurface {
	/// Wraps an already established transport and starts its dispatch loop.
	///
	/// Must be called from within a Tokio runtime.
	pub fn from_parts(parts: TransportParts) -> Self {
		let connection = Arc::new(Connection::new(parts));
		let runner = Arc::clone(&connection);
		let dispatch = tokio::spawn(async move {
			if let Err(e) = runner.run().await {
				tracing::warn!(error = %e, "surface connection ended with error");
			}
		});

		Self {
			connection,
			dispatch,
			process: None,
		}
	}

	/// Launches `program` and talks to it over its stdin/stdout.
	///
	/// The child's stderr is inherited. A child that exits within the startup
	/// grace period is reported as [`Error::LaunchFailed`].
	pub async fn spawn_driver<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<OsStr>,
	{
		let program = program.as_ref();
		tracing::debug!(program = %program.to_string_lossy(), "launching surface driver");

		let mut child = Command::new(program)
			.args(args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::LaunchFailed(format!("Failed to spawn {}: {e}", program.to_string_lossy())))?;

		tokio::time::sleep(STARTUP_GRACE).await;

		match child.try_wait() {
			Ok(Some(status)) => {
				return Err(Error::LaunchFailed(format!(
					"Driver process exited immediately with status: {status}"
				)));
			}
			Ok(None) => {}
			Err(e) => {
				return Err(Error::LaunchFailed(format!("Failed to check process status: {e}")));
			}
		}

		let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
			return Err(Error::LaunchFailed("driver stdio was not captured".to_string()));
		};

		let (transport, message_rx) = PipeTransport::new(stdin, stdout);
		let mut surface = Self::from_parts(transport.into_transport_parts(message_rx));
		surface.process = Some(child);
		Ok(surface)
	}

	/// Connects to a surface listening on a WebSocket endpoint.
	pub async fn connect_websocket(url: &str) -> Result<Self> {
		tracing::debug!(%url, "connecting to surface via websocket");
		let (transport, message_rx) = WebSocketTransport::connect(url).await?;
		Ok(Self::from_parts(transport.into_transport_parts(message_rx)))
	}

	/// The correlating connection; cheap to clone and share.
	pub fn connection(&self) -> Arc<Connection> {
		Arc::clone(&self.connection)
	}

	/// True while the dispatch loop is still reading from the surface.
	pub fn is_connected(&self) -> bool {
		!self.dispatch.is_finished()
	}

	/// Tears the connection down and terminates the driver process, if any.
	///
	/// Outstanding invocations fail with [`Error::ChannelClosed`]. Calling this
	/// more than once is harmless.
	pub async fn close(&mut self) -> Result<()> {
		self.connection.shutdown();
		self.dispatch.abort();

		let Some(mut child) = self.process.take() else {
			return Ok(());
		};

		drop(child.stdin.take());
		drop(child.stdout.take());

		if child.try_wait()?.is_none() {
			child
				.kill()
				.await
				.map_err(|e| Error::LaunchFailed(format!("Failed to kill process: {e}")))?;
			let _ = tokio::time::timeout(REAP_TIMEOUT, child.wait()).await;
		}
		tracing::debug!("surface driver terminated");
		Ok(())
	}
}

impl Drop for RemoteSurface {
	fn drop(&mut self) {
		self.dispatch.abort();
	}
}
