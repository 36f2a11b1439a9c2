//! sendspin-core — shared library implementing the Sendspin protocol.
//!
//! This crate implements both endpoints of Sendspin: a WebSocket-based
//! synchronized multi-room audio streaming protocol. A server drives
//! playback across many clients; each client adopts the server's clock via
//! a 2-D Kalman time filter so PCM/compressed frames tagged with a server
//! timestamp render in lock-step across devices.
//!
//! # Architecture
//!
//! - [`time_filter`]: clock offset/drift estimation (client↔server time
//!   projection)
//! - [`binary_header`]: the 9-byte header prepended to every binary frame
//! - [`message`]: the JSON envelope schema exchanged over the control plane
//! - [`session`]: server-side per-connection protocol driver
//! - [`registry`]: maps client IDs to sessions, routes server-initiated ops
//! - [`client`]: peer-side protocol driver
//! - [`events`]: listener registration shared by [`client`] and [`registry`]
//! - [`runtime`]: task spawning abstraction for async runtime independence
//! - [`state`]: process configuration
//! - [`error`]: centralized error types
//! - [`api`]: Axum HTTP/WebSocket transport adapter for the server side
//! - [`bootstrap`]: composition root wiring the above into a running server

#![warn(clippy::all)]

pub mod api;
pub mod binary_header;
pub mod bootstrap;
pub mod client;
pub mod error;
pub mod events;
pub mod message;
pub mod protocol_constants;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod state;
pub mod time_filter;
pub mod transport;
pub mod utils;

pub use binary_header::{BinaryHeader, FrameTag, HeaderError};
pub use client::{Client, ClientError, ClientOptions};
pub use error::{ErrorCode, SendspinError, SendspinResult};
pub use events::{ListenerRegistry, Subscription};
pub use registry::SessionRegistry;
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{Session, SessionHooks, SessionState};
pub use state::Config;
pub use time_filter::TimeFilter;

// Re-export API types
pub use api::{start_server, AppState, AppStateBuilder, ServerError};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};
