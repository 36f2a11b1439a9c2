//! Listener/observer surface used by [`crate::client`].
//!
//! [`crate::session::Session`] uses the single-slot `SessionHooks` trait
//! instead (see [`crate::session::hooks`]) since it has exactly one observer;
//! `Client` and the registry's fan-out use [`ListenerRegistry`], a
//! copy-before-iterate, panic-isolating dispatcher, since they may have many.

mod emitter;

pub use emitter::{ListenerRegistry, Subscription};

use bytes::Bytes;

/// Events a [`crate::client::Client`] makes observable to its caller.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Metadata(crate::message::MetadataState),
    GroupUpdate(crate::message::GroupUpdate),
    ControllerState(crate::message::ControllerState),
    StreamStart,
    StreamEnd { roles: Option<Vec<String>> },
    StreamClear { roles: Vec<String> },
    AudioChunk {
        timestamp_us: i64,
        data: Bytes,
        format: crate::message::AudioFormat,
    },
    Disconnected,
    ServerCommand(crate::message::ServerCommand),
    SourceCommand(crate::message::SourceServerCommand),
}
