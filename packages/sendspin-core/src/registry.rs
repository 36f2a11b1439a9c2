//! Tracks every connected [`Session`] and the hooks destined for it.
//!
//! Two maps, both [`DashMap`](dashmap::DashMap) for the same reason the
//! teacher's `WsConnectionManager` uses one for its connection table: many
//! short-lived readers (one per inbound frame), occasional inserts/removes.
//! `hooks_by_client_id` solves a rendezvous problem: a caller may want to
//! attach hooks to a client before that client's session has identified
//! itself (or even connected at all). Hooks registered early latch in this
//! table and are installed on the session the moment it identifies.

use std::sync::Arc;

use dashmap::DashMap;

use crate::message::{AudioFormat, ControllerState, MetadataState, ServerCommand};
use crate::session::{HookContext, Session, SessionHooks};

/// Metadata parsed from the WebSocket upgrade request (query string, etc.)
/// that a [`Session`] needs before the peer's `client/hello` arrives.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMetadata {
    pub remote_addr: Option<String>,
    pub zone: Option<i64>,
    pub player: Option<String>,
}

/// Lead/lag snapshot supplied by the upstream streamer for a given client,
/// kept around purely for introspection (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub struct LeadStats {
    pub lead_us: i64,
    pub target_lead_us: i64,
    pub buffered_bytes: Option<u64>,
    pub updated_at: i64,
}

/// Registry of live sessions, keyed by an opaque per-socket id and (once
/// known) by the peer's `client_id`.
pub struct SessionRegistry {
    by_socket: DashMap<u64, Arc<Session>>,
    by_client_id: DashMap<String, Arc<Session>>,
    pending_hooks: DashMap<String, (Arc<dyn SessionHooks>, HookContext)>,
    lead_stats: DashMap<String, LeadStats>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            by_socket: DashMap::new(),
            by_client_id: DashMap::new(),
            pending_hooks: DashMap::new(),
            lead_stats: DashMap::new(),
        }
    }

    pub fn register(&self, socket_id: u64, session: Arc<Session>) {
        self.by_socket.insert(socket_id, session);
    }

    /// Called once a session's `client_id` is known (after `client/hello`).
    /// Applies any hooks latched via [`Self::attach_hooks`] before this
    /// point, preferring a playback-reason session over a discovery-reason
    /// one if both are registered under the same `client_id` (spec §4.4).
    pub fn bind_client_id(&self, socket_id: u64, client_id: &str, session: &Arc<Session>) {
        let _ = socket_id;
        let should_replace = match self.by_client_id.get(client_id) {
            Some(existing) => {
                use crate::message::ConnectionReason;
                !matches!(existing.connection_reason(), ConnectionReason::Playback)
                    || matches!(session.connection_reason(), ConnectionReason::Playback)
            }
            None => true,
        };
        if should_replace {
            self.by_client_id.insert(client_id.to_string(), session.clone());
        }
        if let Some((_, (hooks, ctx))) = self.pending_hooks.remove(client_id) {
            session.set_hooks(hooks, ctx);
        }
    }

    /// Attaches hooks for `client_id`. If a session with that id is already
    /// known, installs immediately; otherwise latches in the pending table
    /// until [`Self::bind_client_id`] resolves it.
    pub fn attach_hooks(&self, client_id: &str, hooks: Arc<dyn SessionHooks>, context: HookContext) {
        if let Some(session) = self.by_client_id.get(client_id) {
            session.set_hooks(hooks, context);
        } else {
            self.pending_hooks.insert(client_id.to_string(), (hooks, context));
        }
    }

    /// Detaches hooks for `client_id`: drops any latched pending entry and,
    /// if a live session is bound to that id, installs empty hooks on it in
    /// place of whatever was attached.
    pub fn unregister_hooks(&self, client_id: &str) {
        self.pending_hooks.remove(client_id);
        if let Some(session) = self.by_client_id.get(client_id) {
            session.set_hooks(Arc::new(crate::session::NoopSessionHooks), HookContext::new(client_id));
        }
    }

    pub fn get_by_client_id(&self, client_id: &str) -> Option<Arc<Session>> {
        self.by_client_id.get(client_id).map(|s| s.clone())
    }

    pub fn unregister(&self, socket_id: u64, client_id: Option<&str>) {
        self.by_socket.remove(&socket_id);
        if let Some(id) = client_id {
            self.by_client_id.remove(id);
            self.pending_hooks.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.by_socket.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_socket.is_empty()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.by_socket.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Records the upstream streamer's latest lead/lag figures for `client_id`.
    pub fn record_lead_stats(
        &self,
        client_id: &str,
        lead_us: i64,
        target_lead_us: i64,
        buffered_bytes: Option<u64>,
        now_us: i64,
    ) {
        self.lead_stats.insert(
            client_id.to_string(),
            LeadStats {
                lead_us,
                target_lead_us,
                buffered_bytes,
                updated_at: now_us,
            },
        );
    }

    pub fn lead_stats(&self, client_id: &str) -> Option<LeadStats> {
        self.lead_stats.get(client_id).map(|entry| *entry.value())
    }

    // The following mirror `Session`'s send-verbs, resolving the target by
    // `client_id` first. Each is a no-op if no session is registered under
    // that id.

    pub async fn send_pcm_to(&self, client_id: &str, frame: &[u8], timestamp_us: Option<i64>) {
        if let Some(session) = self.get_by_client_id(client_id) {
            session.send_pcm(frame, timestamp_us).await;
        }
    }

    pub async fn send_stream_start_to(&self, client_id: &str, format: Option<AudioFormat>) {
        if let Some(session) = self.get_by_client_id(client_id) {
            session.send_stream_start(format).await;
        }
    }

    pub async fn send_stream_clear_to(&self, client_id: &str, roles: Option<Vec<String>>) {
        if let Some(session) = self.get_by_client_id(client_id) {
            session.send_stream_clear(roles).await;
        }
    }

    pub async fn send_stream_end_to(&self, client_id: &str, roles: Option<Vec<String>>) {
        if let Some(session) = self.get_by_client_id(client_id) {
            session.send_stream_end(roles).await;
        }
    }

    pub async fn send_server_command_to(&self, client_id: &str, payload: ServerCommand) {
        if let Some(session) = self.get_by_client_id(client_id) {
            session.send_server_command(payload).await;
        }
    }

    pub async fn send_metadata_to(&self, client_id: &str, metadata: MetadataState) {
        if let Some(session) = self.get_by_client_id(client_id) {
            session.send_metadata(metadata).await;
        }
    }

    pub async fn send_controller_state_to(&self, client_id: &str, controller: ControllerState) {
        if let Some(session) = self.get_by_client_id(client_id) {
            session.send_controller_state(controller).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ConnectionReason;
    use crate::runtime::TokioSpawner;
    use crate::session::{HookContext, SessionConfig};
    use crate::transport::InMemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_session(reason: ConnectionReason) -> Arc<Session> {
        let transport = Arc::new(InMemoryTransport::new());
        let spawner = Arc::new(TokioSpawner::current());
        Session::new(
            transport,
            spawner,
            SessionConfig {
                server_id: "srv".into(),
                server_name: "sendspin-server".into(),
                supported_roles: vec!["player@v1".into()],
                connection_reason: reason,
                remote_addr: None,
                player_id: None,
                zone_id: None,
                initial_state_timeout_ms: 5000,
            },
        )
    }

    #[tokio::test]
    async fn playback_session_wins_over_discovery_for_same_client_id() {
        let registry = SessionRegistry::new();
        let discovery = make_session(ConnectionReason::Discovery);
        let playback = make_session(ConnectionReason::Playback);

        registry.register(1, discovery.clone());
        registry.bind_client_id(1, "c1", &discovery);
        registry.register(2, playback.clone());
        registry.bind_client_id(2, "c1", &playback);

        assert!(Arc::ptr_eq(&registry.get_by_client_id("c1").unwrap(), &playback));
    }

    #[tokio::test]
    async fn pending_hooks_latch_until_client_identifies() {
        struct CountingHooks(Arc<AtomicUsize>);
        impl SessionHooks for CountingHooks {
            fn on_identified(&self, _ctx: &HookContext) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let registry = SessionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.attach_hooks("c1", Arc::new(CountingHooks(counter.clone())), HookContext::new("c1"));

        let session = make_session(ConnectionReason::Playback);
        registry.register(1, session.clone());
        registry.bind_client_id(1, "c1", &session);

        session.handle_text(
            r#"{"type":"client/hello","payload":{"client_id":"c1","name":"c1","version":1,"supported_roles":["_custom"]}}"#,
        ).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lead_stats_round_trip() {
        let registry = SessionRegistry::new();
        assert!(registry.lead_stats("c1").is_none());
        registry.record_lead_stats("c1", 1200, 1000, Some(4096), 42);
        let stats = registry.lead_stats("c1").unwrap();
        assert_eq!(stats.lead_us, 1200);
        assert_eq!(stats.target_lead_us, 1000);
        assert_eq!(stats.buffered_bytes, Some(4096));
        assert_eq!(stats.updated_at, 42);
    }

    #[tokio::test]
    async fn send_verbs_are_noop_for_unknown_client() {
        let registry = SessionRegistry::new();
        registry.send_pcm_to("missing", &[0u8; 4], None).await;
        registry.send_stream_clear_to("missing", None).await;
    }

    #[test]
    fn unregister_hooks_drops_pending_latch() {
        struct CountingHooks(Arc<AtomicUsize>);
        impl SessionHooks for CountingHooks {
            fn on_identified(&self, _ctx: &HookContext) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let registry = SessionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.attach_hooks("c1", Arc::new(CountingHooks(counter.clone())), HookContext::new("c1"));
        registry.unregister_hooks("c1");

        assert!(registry.pending_hooks.get("c1").is_none());
    }

    #[tokio::test]
    async fn unregister_hooks_silences_a_live_session() {
        struct CountingHooks(Arc<AtomicUsize>);
        impl SessionHooks for CountingHooks {
            fn on_disconnected(&self, _ctx: &HookContext) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let registry = SessionRegistry::new();
        let session = make_session(ConnectionReason::Playback);
        registry.register(1, session.clone());
        registry.bind_client_id(1, "c1", &session);

        let counter = Arc::new(AtomicUsize::new(0));
        registry.attach_hooks("c1", Arc::new(CountingHooks(counter.clone())), HookContext::new("c1"));
        registry.unregister_hooks("c1");

        session.destroy().await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
