//! Session lifecycle hooks.
//!
//! A [`Session`](super::Session) has at most one hook implementation
//! attached at a time, installed either directly (the session already
//! exists) or latched in the registry's pending-hooks table until the
//! session identifies itself. Every method has a no-op default so callers
//! only override the events they care about.

use bytes::Bytes;

use crate::message::{ClientPlayerState, ClientSourceState, ControllerCommand, GoodbyeReason, SourceClientCommand};

/// Opaque context threaded back into every hook callback so stateless hook
/// implementations can still identify which session fired.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub client_id: String,
}

impl HookContext {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

/// Observer interface for a single session's lifecycle and protocol events.
pub trait SessionHooks: Send + Sync {
    fn on_identified(&self, _ctx: &HookContext) {}
    fn on_disconnected(&self, _ctx: &HookContext) {}
    fn on_goodbye(&self, _ctx: &HookContext, _reason: GoodbyeReason) {}
    fn on_unsupported_roles(&self, _ctx: &HookContext, _roles: Vec<String>) {}
    fn on_player_state(&self, _ctx: &HookContext, _state: ClientPlayerState) {}
    fn on_source_state(&self, _ctx: &HookContext, _state: ClientSourceState) {}
    fn on_group_command(&self, _ctx: &HookContext, _command: ControllerCommand) {}
    fn on_source_command(&self, _ctx: &HookContext, _command: SourceClientCommand) {}
    fn on_format_changed(&self, _ctx: &HookContext) {}
    fn on_source_audio(&self, _ctx: &HookContext, _timestamp_us: i64, _data: Bytes) {}
}

/// Hooks implementation that observes nothing; the default for sessions
/// with no hooks attached yet.
pub struct NoopSessionHooks;

impl SessionHooks for NoopSessionHooks {}
