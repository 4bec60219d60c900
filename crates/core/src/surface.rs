//! Acquisition seam for remote UI surfaces.
//!
//! A session asks its [`SurfaceProvider`] for a [`Surface`] when it
//! initializes and closes it again when it stops. The session is the only
//! owner of the handle it receives.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use playback_protocol::Script;
use playback_runtime::{Invoke, RemoteSurface};

use crate::error::{Error, Result};

/// An exclusively owned handle to a remote UI surface.
#[async_trait]
pub trait Surface: Send + Sync {
	/// The bridge executors invoke actions through.
	fn invoker(&self) -> Arc<dyn Invoke>;

	/// Readiness probe run once after acquisition.
	async fn ready(&self) -> Result<()> {
		Ok(())
	}

	/// Releases the surface. Called exactly once by the owning session.
	async fn close(&mut self) -> Result<()>;
}

/// Produces a fresh surface for a session.
#[async_trait]
pub trait SurfaceProvider: Send + Sync {
	async fn acquire(&self, script: &Script) -> Result<Box<dyn Surface>>;
}

#[async_trait]
impl Surface for RemoteSurface {
	fn invoker(&self) -> Arc<dyn Invoke> {
		self.connection()
	}

	async fn ready(&self) -> Result<()> {
		if self.is_connected() {
			Ok(())
		} else {
			Err(Error::Initialization("surface disconnected during startup".to_string()))
		}
	}

	async fn close(&mut self) -> Result<()> {
		RemoteSurface::close(self).await.map_err(Error::from)
	}
}

/// Connects every session to a WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketProvider {
	url: String,
}

impl WebSocketProvider {
	pub fn new(url: impl Into<String>) -> Self {
		Self { url: url.into() }
	}
}

#[async_trait]
impl SurfaceProvider for WebSocketProvider {
	async fn acquire(&self, script: &Script) -> Result<Box<dyn Surface>> {
		tracing::debug!(target = "playback.session", url = %self.url, script = %script.id, "acquiring websocket surface");
		let surface = RemoteSurface::connect_websocket(&self.url)
			.await
			.map_err(|e| Error::Initialization(format!("cannot reach {}: {e}", self.url)))?;
		Ok(Box::new(surface))
	}
}

/// Launches one driver process per session and talks to it over stdio.
#[derive(Debug, Clone)]
pub struct DriverProvider {
	program: PathBuf,
	args: Vec<String>,
}

impl DriverProvider {
	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
			args: Vec::new(),
		}
	}

	pub fn with_args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.args = args.into_iter().map(Into::into).collect();
		self
	}
}

#[async_trait]
impl SurfaceProvider for DriverProvider {
	async fn acquire(&self, script: &Script) -> Result<Box<dyn Surface>> {
		tracing::debug!(
			target = "playback.session",
			program = %self.program.display(),
			script = %script.id,
			"acquiring driver surface"
		);
		let surface = RemoteSurface::spawn_driver(&self.program, &self.args)
			.await
			.map_err(|e| Error::Initialization(format!("cannot start {}: {e}", self.program.display())))?;
		Ok(Box::new(surface))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_unreachable_websocket_is_an_initialization_error() {
		let provider = WebSocketProvider::new("ws://127.0.0.1:1/surface");
		let script = Script::new("s", Vec::new());
		let err = provider.acquire(&script).await.err().unwrap();
		assert!(matches!(err, Error::Initialization(ref msg) if msg.contains("127.0.0.1:1")));
	}

	#[tokio::test]
	async fn test_missing_driver_is_an_initialization_error() {
		let provider = DriverProvider::new("/nonexistent/driver").with_args(["--stdio"]);
		let script = Script::new("s", Vec::new());
		let err = provider.acquire(&script).await.err().unwrap();
		assert!(matches!(err, Error::Initialization(ref msg) if msg.contains("/nonexistent/driver")));
	}
}
