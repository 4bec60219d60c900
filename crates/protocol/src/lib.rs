//! Data model for the playback engine.
//!
//! This crate contains the serde-serializable types shared by the engine,
//! its front ends and anything that observes a running session:
//!
//! - **Scripts**: [`Script`], [`Task`], [`Step`] and the [`StepAction`] union
//! - **Results**: [`ExecutionPosition`], [`StepResult`], [`ResultsTable`]
//! - **Options**: [`ExecutionOptions`] and the [`StopOnError`] policy
//! - **Observation**: [`SessionEvent`], [`SessionState`], [`SessionSnapshot`]
//!
//! Types here are pure data. Behavior lives in `playback-rs`.

pub mod events;
pub mod options;
pub mod result;
pub mod script;
pub mod types;

pub use events::*;
pub use options::*;
pub use result::*;
pub use script::*;
pub use types::*;
