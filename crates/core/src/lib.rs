//! playback: debug/playback execution engine for scripted UI automation
//!
//! A [`Script`] is an ordered list of tasks, each an ordered list of steps.
//! A [`Session`] owns one remote surface and runs a script against it with
//! debugger-style controls: pause before any step, single-step, resume and
//! stop. Every step produces a [`StepResult`] stored under `"{task}:{step}"`
//! and announced through [`SessionEvent`]s.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use playback::{InMemoryScriptRepository, SessionConfig, SessionRegistry, WebSocketProvider};
//!
//! #[tokio::main]
//! async fn main() -> playback::Result<()> {
//!     let scripts = InMemoryScriptRepository::new();
//!     scripts.insert(serde_json::from_str(include_str!("login.json")).unwrap());
//!
//!     let registry = SessionRegistry::new(
//!         Arc::new(scripts),
//!         Arc::new(WebSocketProvider::new("ws://127.0.0.1:9222/surface")),
//!     );
//!     let _events = registry.on(|event| println!("{}", serde_json::to_string(event).unwrap()));
//!
//!     let id = registry.create_session(SessionConfig::new("login")).await?;
//!     let summary = registry.start_session(&id).await?;
//!     println!("success: {}", summary.success);
//!
//!     registry.dispose_all().await
//! }
//! ```
//!
//! # Layers
//!
//! - [`executor`]: one step against an [`Invoke`] bridge, never erroring
//! - [`runner`]: tasks in order, dependency skips, pause checkpoints
//! - [`session`]: lifecycle state machine and surface ownership
//! - [`registry`]: many sessions behind string ids with event fan-out

pub mod error;
pub mod executor;
pub mod gate;
pub mod handlers;
pub mod registry;
pub mod repository;
pub mod runner;
pub mod session;
pub mod surface;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use executor::{ActionExecutor, ExecutorConfig};
pub use gate::{Checkpoint, PauseGate, StopSignal};
pub use handlers::Subscription;
pub use playback_protocol::{
	ExecutionOptions, ExecutionPosition, ResultsTable, Script, ScriptError, SessionEvent, SessionSnapshot,
	SessionState, Step, StepAction, StepResult, StopOnError, Task, TaskInfo, TaskOutcome, TaskProgress, TaskStatus,
};
pub use playback_runtime::{Invocation, Invoke, RemoteSurface};
pub use registry::{RegistryEvent, SessionConfig, SessionRegistry};
pub use repository::{InMemoryScriptRepository, ScriptRepository};
pub use runner::{RunSink, RunSummary, Runner};
pub use session::{Session, SessionId};
pub use surface::{DriverProvider, Surface, SurfaceProvider, WebSocketProvider};
