//! Playback runtime: the bridge to a remote UI surface.
//!
//! This crate provides the low-level plumbing the execution engine drives:
//!
//! - **Transport**: length-prefixed JSON over stdio pipes, or JSON text frames
//!   over WebSocket
//! - **Connection**: request/reply correlation with per-call timeouts and
//!   unsolicited event fan-out
//! - **Surface**: a connection bundled with the driver process or socket that
//!   keeps it alive
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   playback-rs    │  Executor, runner, sessions
//! └────────┬─────────┘
//!          │ Arc<dyn Invoke>
//! ┌────────▼─────────┐
//! │ playback-runtime │  This crate
//! │  ┌────────────┐  │
//! │  │ Connection │  │  id correlation, timeouts
//! │  └────────────┘  │
//! │  ┌────────────┐  │
//! │  │ Transport  │  │  pipe / WebSocket framing
//! │  └────────────┘  │
//! └──────────────────┘
//! ```

pub mod connection;
pub mod error;
pub mod surface;
pub mod transport;

pub use connection::{
	Connection, DEFAULT_INVOKE_TIMEOUT, ErrorPayload, Event, Invocation, Invoke, Message, Metadata, Request, Response,
};
pub use error::{Error, Result};
pub use surface::RemoteSurface;
pub use transport::{
	PipeTransport, PipeTransportReceiver, PipeTransportSender, Transport, TransportParts, TransportReceiver,
	WebSocketReceiver, WebSocketSender, WebSocketTransport,
};
