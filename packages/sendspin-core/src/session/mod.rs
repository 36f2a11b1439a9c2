//! Server-side per-connection protocol driver.
//!
//! A [`Session`] owns the handshake state machine, the negotiated
//! capability set, the current stream format, and the backpressure ledger
//! for one WebSocket connection. It is transport-agnostic: callers supply a
//! [`Transport`](crate::transport::Transport) (the real Axum socket, or
//! [`InMemoryTransport`](crate::transport::InMemoryTransport) in tests).

mod hooks;

pub use hooks::{HookContext, NoopSessionHooks, SessionHooks};

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::binary_header::{BinaryHeader, FrameTag};
use crate::message::{
    AudioFormat, ClientGoodbye, ClientInbound, Codec, ConnectionReason, GoodbyeReason,
    GroupUpdate, MetadataState, PlaybackState, RoleFamily, ServerCommand, ServerHello,
    ServerInbound, ServerState, ServerTime,
};
use crate::protocol_constants::{
    BACKPRESSURE_RETRY_MS, DROP_WINDOW_SECS, INITIAL_STATE_TIMEOUT_MS, MAX_BUFFERED_BYTES,
    PROTOCOL_VERSION,
};
use crate::runtime::TaskSpawner;
use crate::transport::Transport;
use crate::utils::{Clock, SystemClock};

/// Handshake/lifecycle state machine (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitHello,
    Ready,
    Identified,
    Closed,
}

/// Static configuration a [`SessionRegistry`](crate::registry::SessionRegistry)
/// supplies when accepting a new connection.
pub struct SessionConfig {
    pub server_id: String,
    pub server_name: String,
    pub supported_roles: Vec<String>,
    pub connection_reason: ConnectionReason,
    pub remote_addr: Option<String>,
    pub player_id: Option<String>,
    pub zone_id: Option<i64>,
    pub initial_state_timeout_ms: u64,
}

struct NegotiatedSupport {
    artwork_channels: Vec<u8>,
    source_support: bool,
    expect_volume: bool,
    expect_mute: bool,
}

/// Per-channel artwork format negotiated via `stream/request-format`.
#[derive(Debug, Clone, Default)]
struct ArtworkChannelFormat {
    source: Option<String>,
    format: Option<String>,
    media_width: Option<u32>,
    media_height: Option<u32>,
}

struct DropEvent {
    at_us: i64,
    bytes: usize,
}

#[derive(Default)]
struct BackpressureLedger {
    total_drops: u64,
    last_drop_bytes: Option<usize>,
    last_drop_at_us: Option<i64>,
    window: VecDeque<DropEvent>,
}

impl BackpressureLedger {
    fn record_drop(&mut self, bytes: usize, now_us: i64) {
        self.total_drops += 1;
        self.last_drop_bytes = Some(bytes);
        self.last_drop_at_us = Some(now_us);
        self.window.push_back(DropEvent { at_us: now_us, bytes });
        self.prune(now_us);
    }

    fn prune(&mut self, now_us: i64) {
        let cutoff = now_us - (DROP_WINDOW_SECS as i64) * 1_000_000;
        while let Some(front) = self.window.front() {
            if front.at_us < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Backpressure/drop statistics exposed to callers.
#[derive(Debug, Clone)]
pub struct BackpressureStats {
    pub total_drops: u64,
    pub last_drop_bytes: Option<usize>,
    pub last_drop_at_us: Option<i64>,
    pub drops_in_window: usize,
}

struct Inner {
    state: SessionState,
    client_id: Option<String>,
    client_name: String,
    active_roles: Vec<String>,
    support: NegotiatedSupport,
    ready: bool,
    identified: bool,
    identified_fired: bool,
    active_stream: bool,
    stream_format: AudioFormat,
    last_goodbye_reason: Option<GoodbyeReason>,
    last_source_state: Option<(crate::message::SourceState, Option<crate::message::SourceSignal>)>,
    initial_state_received: bool,
    backpressure: BackpressureLedger,
    artwork_formats: [ArtworkChannelFormat; 4],
}

/// Per-connection server-side protocol driver.
pub struct Session {
    transport: Arc<dyn Transport>,
    spawner: Arc<dyn TaskSpawner>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    inner: Mutex<Inner>,
    hooks: Mutex<(Arc<dyn SessionHooks>, HookContext)>,
    cancel: CancellationToken,
    disconnected_once: AtomicBool,
    weak_self: Mutex<Weak<Session>>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, spawner: Arc<dyn TaskSpawner>, config: SessionConfig) -> Arc<Session> {
        Self::with_clock(transport, spawner, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        transport: Arc<dyn Transport>,
        spawner: Arc<dyn TaskSpawner>,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Session> {
        let session = Arc::new(Session {
            transport,
            spawner,
            clock,
            inner: Mutex::new(Inner {
                state: SessionState::AwaitHello,
                client_id: None,
                client_name: String::new(),
                active_roles: Vec::new(),
                support: NegotiatedSupport {
                    artwork_channels: Vec::new(),
                    source_support: false,
                    expect_volume: false,
                    expect_mute: false,
                },
                ready: false,
                identified: false,
                identified_fired: false,
                active_stream: false,
                stream_format: AudioFormat::default(),
                last_goodbye_reason: None,
                last_source_state: None,
                initial_state_received: false,
                backpressure: BackpressureLedger::default(),
                artwork_formats: Default::default(),
            }),
            hooks: Mutex::new((Arc::new(NoopSessionHooks), HookContext::default())),
            cancel: CancellationToken::new(),
            disconnected_once: AtomicBool::new(false),
            weak_self: Mutex::new(Weak::new()),
            config,
        });
        *session.weak_self.lock() = Arc::downgrade(&session);
        session
    }

    // ── accessors ──────────────────────────────────────────────────────

    pub fn client_id(&self) -> Option<String> {
        self.inner.lock().client_id.clone()
    }

    pub fn active_roles(&self) -> Vec<String> {
        self.inner.lock().active_roles.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn connection_reason(&self) -> ConnectionReason {
        match self.config.connection_reason {
            ConnectionReason::Discovery => ConnectionReason::Discovery,
            ConnectionReason::Playback => ConnectionReason::Playback,
        }
    }

    pub fn remote_addr(&self) -> Option<String> {
        self.config.remote_addr.clone()
    }

    pub fn stream_format(&self) -> AudioFormat {
        self.inner.lock().stream_format.clone()
    }

    pub fn backpressure_stats(&self) -> BackpressureStats {
        let mut inner = self.inner.lock();
        let now = self.clock.now_us();
        inner.backpressure.prune(now);
        BackpressureStats {
            total_drops: inner.backpressure.total_drops,
            last_drop_bytes: inner.backpressure.last_drop_bytes,
            last_drop_at_us: inner.backpressure.last_drop_at_us,
            drops_in_window: inner.backpressure.window.len(),
        }
    }

    pub fn set_hooks(&self, hooks: Arc<dyn SessionHooks>, context: HookContext) {
        *self.hooks.lock() = (hooks, context);
    }

    fn fire<R>(&self, f: impl FnOnce(&dyn SessionHooks, &HookContext) -> R) -> R {
        let guard = self.hooks.lock();
        let (hooks, ctx) = (&guard.0, &guard.1);
        f(hooks.as_ref(), ctx)
    }

    // ── inbound dispatch ───────────────────────────────────────────────

    pub async fn handle_text(&self, utf8: &str) {
        let state = self.inner.lock().state;
        if state == SessionState::Closed {
            return;
        }
        let msg: ClientInbound = match serde_json::from_str(utf8) {
            Ok(m) => m,
            Err(_) => return, // DecodeError: dropped silently
        };

        if state == SessionState::AwaitHello {
            match msg {
                ClientInbound::ClientHello(hello) => self.handle_hello(hello).await,
                _ => {
                    self.close_violation("expected client/hello first").await;
                }
            }
            return;
        }

        match msg {
            ClientInbound::ClientHello(_) => {} // repeat hello ignored
            ClientInbound::ClientTime(time) => self.handle_client_time(time).await,
            ClientInbound::ClientState(state_msg) => self.handle_client_state(state_msg).await,
            ClientInbound::ClientCommand(cmd) => self.handle_client_command(cmd),
            ClientInbound::ClientGoodbye(goodbye) => self.handle_goodbye(goodbye).await,
            ClientInbound::StreamRequestFormat(req) => self.handle_request_format(req).await,
        }
    }

    pub async fn handle_binary(&self, bytes: &[u8]) {
        if self.inner.lock().state == SessionState::Closed {
            return;
        }
        let (header, payload) = match BinaryHeader::unpack(bytes) {
            Ok(pair) => pair,
            Err(_) => return,
        };
        if header.tag != FrameTag::SOURCE_AUDIO_CHUNK {
            return;
        }
        let has_source_role = self
            .inner
            .lock()
            .active_roles
            .iter()
            .any(|r| RoleFamily::from_role_literal(r) == Some(RoleFamily::Source));
        if !has_source_role {
            return;
        }
        self.fire(|hooks, ctx| {
            hooks.on_source_audio(ctx, header.timestamp_us, Bytes::copy_from_slice(payload))
        });
    }

    async fn handle_hello(&self, hello: crate::message::ClientHello) {
        if hello.version != PROTOCOL_VERSION {
            self.close_violation("invalid protocol version").await;
            return;
        }
        let client_id = hello.client_id.trim().to_string();
        if client_id.is_empty() {
            self.close_violation("missing client_id").await;
            return;
        }
        if hello.supported_roles.is_empty() {
            self.close_violation("missing supported_roles").await;
            return;
        }

        let server_supported: HashSet<&str> =
            self.config.supported_roles.iter().map(String::as_str).collect();
        let mut active_roles = Vec::new();
        let mut admitted_families = HashSet::new();
        let mut unsupported_roles = Vec::new();

        for role in &hello.supported_roles {
            let family = match RoleFamily::from_role_literal(role) {
                Some(f) => f,
                None => {
                    if !role.starts_with('_') {
                        unsupported_roles.push(role.clone());
                    }
                    continue;
                }
            };
            if admitted_families.contains(&std::mem::discriminant(&family)) {
                continue;
            }
            if server_supported.contains(role.as_str()) {
                admitted_families.insert(std::mem::discriminant(&family));
                active_roles.push(role.clone());
            } else if !role.starts_with('_') {
                unsupported_roles.push(role.clone());
            }
        }

        for role in &active_roles {
            let family = RoleFamily::from_role_literal(role);
            let missing = match family {
                Some(RoleFamily::Player) => hello.player_support.is_none(),
                Some(RoleFamily::Artwork) => hello.artwork_support.is_none(),
                Some(RoleFamily::Visualizer) => hello.visualizer_support.is_none(),
                Some(RoleFamily::Source) => hello.source_support.is_none(),
                _ => false,
            };
            if missing {
                let name = match family {
                    Some(RoleFamily::Player) => "player",
                    Some(RoleFamily::Artwork) => "artwork",
                    Some(RoleFamily::Visualizer) => "visualizer",
                    Some(RoleFamily::Source) => "source",
                    _ => "unknown",
                };
                self.close_violation(&format!("missing {name} support")).await;
                return;
            }
        }

        let player_admitted = active_roles
            .iter()
            .any(|r| RoleFamily::from_role_literal(r) == Some(RoleFamily::Player));
        let artwork_admitted = active_roles
            .iter()
            .any(|r| RoleFamily::from_role_literal(r) == Some(RoleFamily::Artwork));
        let source_admitted = active_roles
            .iter()
            .any(|r| RoleFamily::from_role_literal(r) == Some(RoleFamily::Source));

        let stream_format = if player_admitted {
            select_preferred_format(&hello.player_support)
        } else {
            AudioFormat::default()
        };

        let (expect_volume, expect_mute) = hello
            .player_support
            .as_ref()
            .map(|p| {
                (
                    p.supported_commands.iter().any(|c| c == "volume"),
                    p.supported_commands.iter().any(|c| c == "mute"),
                )
            })
            .unwrap_or((false, false));

        let artwork_channels = if artwork_admitted {
            hello
                .artwork_support
                .as_ref()
                .map(|a| a.channels.clone())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        {
            let mut inner = self.inner.lock();
            inner.client_id = Some(client_id.clone());
            inner.client_name = hello.name.clone();
            inner.active_roles = active_roles.clone();
            inner.support = NegotiatedSupport {
                artwork_channels,
                source_support: source_admitted,
                expect_volume,
                expect_mute,
            };
            inner.stream_format = stream_format;
            inner.ready = true;
            inner.state = SessionState::Ready;
            if !player_admitted {
                inner.identified = true;
            }
        }

        if !unsupported_roles.is_empty() {
            self.fire(|hooks, ctx| hooks.on_unsupported_roles(ctx, unsupported_roles.clone()));
        }

        self.send_server_hello(active_roles).await;
        self.send_initial_group_update().await;

        if player_admitted {
            self.arm_initial_state_timer();
        } else {
            self.mark_identified_if_needed();
        }
    }

    async fn send_server_hello(&self, active_roles: Vec<String>) {
        let hello = ServerHello {
            server_id: self.config.server_id.clone(),
            name: self.config.server_name.clone(),
            version: PROTOCOL_VERSION,
            active_roles,
            connection_reason: self.connection_reason(),
        };
        self.send_json_unconditional(&ServerInbound::ServerHello(hello)).await;
    }

    async fn send_initial_group_update(&self) {
        let client_id = self.inner.lock().client_id.clone().unwrap_or_default();
        let group_id = self
            .config
            .player_id
            .clone()
            .or_else(|| self.config.zone_id.map(|z| format!("zone-{z}")))
            .or_else(|| (!client_id.is_empty()).then(|| client_id.clone()))
            .unwrap_or_else(|| "sendspin".to_string());
        let update = GroupUpdate {
            playback_state: Some(PlaybackState::Stopped),
            group_id: Some(group_id.clone()),
            group_name: Some(group_id),
        };
        self.send_json_unconditional(&ServerInbound::GroupUpdate(update)).await;
    }

    fn arm_initial_state_timer(&self) {
        let cancel = self.cancel.clone();
        let timeout_ms = if self.config.initial_state_timeout_ms > 0 {
            self.config.initial_state_timeout_ms
        } else {
            INITIAL_STATE_TIMEOUT_MS
        };
        let weak = self.weak_self.lock().clone();
        self.spawner.spawn_boxed(Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                    let Some(session) = weak.upgrade() else { return };
                    let already_identified = session.inner.lock().identified;
                    if !already_identified {
                        session.close_violation("initial state timeout").await;
                    }
                }
            }
        }));
    }

    fn mark_identified_if_needed(&self) {
        let mut should_fire = false;
        {
            let mut inner = self.inner.lock();
            if inner.ready && !inner.identified {
                inner.identified = true;
            }
            if inner.identified && !inner.identified_fired {
                inner.identified_fired = true;
                should_fire = true;
                inner.state = SessionState::Identified;
            }
        }
        if should_fire {
            self.fire(|hooks, ctx| hooks.on_identified(ctx));
        }
    }

    async fn handle_client_time(&self, time: crate::message::ClientTime) {
        let now = self.clock.now_us();
        let reply = ServerTime {
            client_transmitted: time.client_transmitted,
            server_received: now,
            server_transmitted: self.clock.now_us(),
        };
        self.send_json(&ServerInbound::ServerTime(reply)).await;
    }

    async fn handle_client_state(&self, state_msg: crate::message::ClientState) {
        let mut newly_identified = false;
        {
            let mut inner = self.inner.lock();
            if !inner.initial_state_received {
                inner.initial_state_received = true;
                newly_identified = true;
            }
        }

        if let Some(player) = &state_msg.player {
            let (expect_volume, expect_mute) = {
                let inner = self.inner.lock();
                (inner.support.expect_volume, inner.support.expect_mute)
            };
            if expect_volume && player.volume.is_none() {
                tracing::warn!(client_id = ?self.client_id(), "expected volume in client/state but none present");
            }
            if expect_mute && player.muted.is_none() {
                tracing::warn!(client_id = ?self.client_id(), "expected muted in client/state but none present");
            }
            self.fire(|hooks, ctx| hooks.on_player_state(ctx, player.clone()));
        } else if let Some(top_state) = &state_msg.state {
            let synthetic = crate::message::ClientPlayerState {
                state: Some(top_state.clone()),
                volume: None,
                muted: None,
            };
            self.fire(|hooks, ctx| hooks.on_player_state(ctx, synthetic));
        }

        if let Some(source) = &state_msg.source {
            {
                let mut inner = self.inner.lock();
                inner.last_source_state = Some((source.state.clone(), source.signal.clone()));
            }
            self.fire(|hooks, ctx| hooks.on_source_state(ctx, source.clone()));
        }

        if newly_identified {
            self.mark_identified_if_needed();
        }
    }

    fn handle_client_command(&self, cmd: crate::message::ClientCommand) {
        if let Some(controller) = cmd.controller {
            self.fire(|hooks, ctx| hooks.on_group_command(ctx, controller));
        }
        if let Some(source) = cmd.source {
            self.fire(|hooks, ctx| hooks.on_source_command(ctx, source));
        }
    }

    async fn handle_goodbye(&self, goodbye: ClientGoodbye) {
        {
            let mut inner = self.inner.lock();
            inner.last_goodbye_reason = Some(goodbye.reason.clone());
        }
        self.fire(|hooks, ctx| hooks.on_goodbye(ctx, goodbye.reason));
        self.destroy().await;
    }

    async fn handle_request_format(&self, req: crate::message::StreamRequestFormat) {
        let mut format_changed = false;

        if let Some(player_req) = &req.player {
            let player_admitted = self
                .inner
                .lock()
                .active_roles
                .iter()
                .any(|r| RoleFamily::from_role_literal(r) == Some(RoleFamily::Player));
            if player_admitted {
                let mut inner = self.inner.lock();
                let mut fmt = inner.stream_format.clone();
                if let Some(codec_str) = &player_req.codec {
                    if let Some(codec) = Codec::parse(codec_str) {
                        fmt.codec = codec;
                    }
                }
                if let Some(sample_rate) = player_req.sample_rate {
                    fmt.sample_rate = sample_rate as u32;
                }
                if let Some(channels) = player_req.channels {
                    fmt.channels = channels as u8;
                }
                if let Some(bit_depth) = player_req.bit_depth {
                    fmt.bit_depth = bit_depth as u8;
                }
                inner.stream_format = fmt;
                format_changed = true;
            }
        }

        if let Some(artwork_req) = &req.artwork {
            let artwork_admitted = self
                .inner
                .lock()
                .active_roles
                .iter()
                .any(|r| RoleFamily::from_role_literal(r) == Some(RoleFamily::Artwork));
            if artwork_admitted {
                let index = artwork_req.channel.floor();
                if (0.0..4.0).contains(&index) {
                    let channels = {
                        let mut inner = self.inner.lock();
                        let idx = index as u8;
                        if !inner.support.artwork_channels.contains(&idx) {
                            inner.support.artwork_channels.push(idx);
                        }
                        let slot = &mut inner.artwork_formats[idx as usize];
                        if artwork_req.source.is_some() {
                            slot.source = artwork_req.source.clone();
                        }
                        if artwork_req.format.is_some() {
                            slot.format = artwork_req.format.clone();
                        }
                        if artwork_req.media_width.is_some() {
                            slot.media_width = artwork_req.media_width;
                        }
                        if artwork_req.media_height.is_some() {
                            slot.media_height = artwork_req.media_height;
                        }
                        inner.support.artwork_channels.clone()
                    };
                    format_changed = true;
                    self.send_artwork_stream_start(channels).await;
                }
            }
        }

        if format_changed {
            self.fire(|hooks, ctx| hooks.on_format_changed(ctx));
            self.send_stream_start_reflecting_player_format().await;
        }
    }

    // ── outbound ───────────────────────────────────────────────────────

    fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    async fn send_json(&self, msg: &ServerInbound) {
        if !self.transport.is_open() || !self.is_ready() {
            return;
        }
        self.send_json_unconditional(msg).await;
    }

    async fn send_json_unconditional(&self, msg: &ServerInbound) {
        if !self.transport.is_open() {
            return;
        }
        if let Ok(text) = serde_json::to_string(msg) {
            let _ = self.transport.send_text(text).await;
        }
    }

    async fn close_violation(&self, reason: &str) {
        {
            let mut inner = self.inner.lock();
            inner.state = SessionState::Closed;
        }
        self.transport.close(1008, reason.to_string()).await;
        self.destroy().await;
    }

    async fn ensure_stream_started(&self, is_new: bool) {
        if is_new {
            self.send_stream_start_reflecting_player_format().await;
        }
    }

    async fn send_stream_start_reflecting_player_format(&self) {
        let format = self.inner.lock().stream_format.clone();
        let player_cfg = crate::message::StreamPlayerConfig {
            codec: codec_str(&format.codec).to_string(),
            sample_rate: format.sample_rate,
            channels: format.channels,
            bit_depth: format.bit_depth,
            codec_header: format.codec_header.as_ref().map(|h| base64_encode(h)),
        };
        let start = crate::message::StreamStart {
            player: Some(player_cfg),
            artwork: None,
            visualizer: None,
        };
        self.send_json(&ServerInbound::StreamStart(start)).await;
    }

    /// Transmits a new `stream/start{player}` payload. `format = None` keeps
    /// the current format but still (re)announces it.
    pub async fn send_stream_start(&self, format: Option<AudioFormat>) {
        {
            let mut inner = self.inner.lock();
            if let Some(fmt) = format {
                inner.stream_format = fmt;
            }
            inner.active_stream = true;
        }
        self.send_stream_start_reflecting_player_format().await;
    }

    pub async fn send_stream_clear(&self, roles: Option<Vec<String>>) {
        let msg = crate::message::StreamClear { roles };
        self.send_json(&ServerInbound::StreamClear(msg)).await;
    }

    pub async fn send_stream_end(&self, roles: Option<Vec<String>>) {
        let is_player_or_all = roles
            .as_ref()
            .map(|r| r.iter().any(|x| x == "player"))
            .unwrap_or(true);
        if is_player_or_all {
            let mut inner = self.inner.lock();
            inner.active_stream = false;
        }
        let msg = crate::message::StreamEnd { roles };
        self.send_json(&ServerInbound::StreamEnd(msg)).await;
    }

    /// Sends one PCM/compressed audio frame, handling `ensure_stream_started`
    /// and the backpressure policy from spec §4.3/§5.
    pub async fn send_pcm(&self, frame: &[u8], timestamp_us: Option<i64>) {
        if !self.transport.is_open() || !self.is_ready() {
            return;
        }
        let is_new = !self.inner.lock().active_stream;
        self.ensure_stream_started(is_new).await;
        {
            let mut inner = self.inner.lock();
            inner.active_stream = true;
        }

        let ts = timestamp_us.unwrap_or_else(|| self.clock.now_us());
        let header = BinaryHeader::new(FrameTag::AUDIO_CHUNK, ts);
        let payload = header.pack_frame(frame);

        if self.transport.buffered_amount() > MAX_BUFFERED_BYTES {
            self.schedule_pcm_retry(payload);
        } else {
            let _ = self.transport.send_binary(payload).await;
        }
    }

    fn schedule_pcm_retry(&self, payload: Vec<u8>) {
        let transport = self.transport.clone();
        self.spawner.spawn_boxed(Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(BACKPRESSURE_RETRY_MS)).await;
            if transport.is_open() {
                let _ = transport.send_binary(payload).await;
            }
        }));
    }

    /// Sends an ancillary (non-PCM) binary frame with the drop-and-count
    /// policy: above the buffered-bytes threshold, the frame is dropped and
    /// counted rather than retried.
    async fn send_ancillary(&self, tag: FrameTag, timestamp_us: i64, payload: &[u8]) -> bool {
        if !self.transport.is_open() || !self.is_ready() {
            return false;
        }
        if self.transport.buffered_amount() > MAX_BUFFERED_BYTES {
            let now = self.clock.now_us();
            self.inner.lock().backpressure.record_drop(payload.len(), now);
            return false;
        }
        let header = BinaryHeader::new(tag, timestamp_us);
        let frame = header.pack_frame(payload);
        self.transport.send_binary(frame).await.is_ok()
    }

    pub async fn send_artwork_stream_start(&self, channels: Vec<u8>) {
        let start = crate::message::StreamStart {
            player: None,
            artwork: Some(crate::message::StreamArtworkConfig { channels }),
            visualizer: None,
        };
        self.send_json(&ServerInbound::StreamStart(start)).await;
    }

    pub async fn send_artwork(&self, channel: u8, bytes: Option<&[u8]>) {
        let Some(tag) = FrameTag::artwork_channel(channel as u32) else {
            return;
        };
        if let Some(data) = bytes {
            self.send_ancillary(tag, self.clock.now_us(), data).await;
        }
    }

    pub async fn send_visualizer_stream_start(&self, buffer_capacity: Option<u32>) {
        let start = crate::message::StreamStart {
            player: None,
            artwork: None,
            visualizer: Some(crate::message::StreamVisualizerConfig { buffer_capacity }),
        };
        self.send_json(&ServerInbound::StreamStart(start)).await;
    }

    pub async fn send_visualizer_frame(&self, bytes: &[u8], timestamp_us: Option<i64>) {
        let ts = timestamp_us.unwrap_or_else(|| self.clock.now_us());
        self.send_ancillary(FrameTag::VISUALIZATION_DATA, ts, bytes).await;
    }

    pub async fn send_server_command(&self, payload: ServerCommand) {
        let targets_player = payload.player.is_some();
        let targets_source = payload.source.is_some();
        let inner = self.inner.lock();
        let player_admitted = inner
            .active_roles
            .iter()
            .any(|r| RoleFamily::from_role_literal(r) == Some(RoleFamily::Player));
        let source_admitted = inner
            .active_roles
            .iter()
            .any(|r| RoleFamily::from_role_literal(r) == Some(RoleFamily::Source));
        drop(inner);
        if (targets_player && !player_admitted) || (targets_source && !source_admitted) {
            return;
        }
        self.send_json(&ServerInbound::ServerCommand(payload)).await;
    }

    pub async fn send_group_update(
        &self,
        state: Option<PlaybackState>,
        group_id: Option<String>,
        group_name: Option<String>,
    ) {
        let update = GroupUpdate {
            playback_state: state,
            group_id,
            group_name,
        };
        self.send_json_unconditional(&ServerInbound::GroupUpdate(update)).await;
    }

    pub async fn send_metadata(&self, metadata: MetadataState) {
        let msg = ServerState {
            metadata: Some(metadata),
            controller: None,
        };
        self.send_json(&ServerInbound::ServerState(msg)).await;
    }

    pub async fn send_controller_state(&self, controller: crate::message::ControllerState) {
        let msg = ServerState {
            metadata: None,
            controller: Some(controller),
        };
        self.send_json(&ServerInbound::ServerState(msg)).await;
    }

    pub async fn destroy(&self) {
        if self.disconnected_once.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        {
            let mut inner = self.inner.lock();
            inner.state = SessionState::Closed;
        }
        self.fire(|hooks, ctx| hooks.on_disconnected(ctx));
    }
}

fn select_preferred_format(support: &Option<crate::message::PlayerSupport>) -> AudioFormat {
    let Some(support) = support else {
        return AudioFormat::default();
    };
    for spec in &support.supported_formats {
        let Some(codec) = Codec::parse(&spec.codec) else {
            continue;
        };
        if spec.sample_rate > 0.0 && spec.channels > 0.0 && spec.bit_depth > 0.0 {
            return AudioFormat {
                codec,
                sample_rate: spec.sample_rate as u32,
                channels: spec.channels as u8,
                bit_depth: spec.bit_depth as u8,
                codec_header: None,
            };
        }
    }
    AudioFormat::default()
}

fn codec_str(codec: &Codec) -> &'static str {
    match codec {
        Codec::Pcm => "pcm",
        Codec::Flac => "flac",
        Codec::Opus => "opus",
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TokioSpawner;
    use crate::transport::InMemoryTransport;

    fn test_config() -> SessionConfig {
        SessionConfig {
            server_id: "srv1".into(),
            server_name: "sendspin-server".into(),
            supported_roles: vec!["player@v1".into(), "controller@v1".into()],
            connection_reason: ConnectionReason::Discovery,
            remote_addr: None,
            player_id: None,
            zone_id: None,
            initial_state_timeout_ms: INITIAL_STATE_TIMEOUT_MS,
        }
    }

    #[tokio::test]
    async fn rejects_non_hello_before_handshake() {
        let transport = Arc::new(InMemoryTransport::new());
        let spawner = Arc::new(TokioSpawner::current());
        let session = Session::new(transport.clone(), spawner, test_config());

        session.handle_text(r#"{"type":"client/time","payload":{"client_transmitted":1}}"#).await;

        assert_eq!(transport.closed_with(), Some((1008, "expected client/hello first".into())));
    }

    #[tokio::test]
    async fn happy_path_handshake_identifies_player() {
        let transport = Arc::new(InMemoryTransport::new());
        let spawner = Arc::new(TokioSpawner::current());
        let session = Session::new(transport.clone(), spawner, test_config());

        let hello = serde_json::json!({
            "type": "client/hello",
            "payload": {
                "client_id": "c1",
                "name": "c1",
                "version": 1,
                "supported_roles": ["player@v1"],
                "player@v1_support": {
                    "supported_formats": [{"codec":"pcm","channels":2,"sample_rate":48000,"bit_depth":16}],
                    "buffer_capacity": 524288,
                    "supported_commands": []
                }
            }
        });
        session.handle_text(&hello.to_string()).await;

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(transport.sent_text().len(), 2);

        session
            .handle_text(r#"{"type":"client/state","payload":{"state":"synchronized","player":{"volume":100,"muted":false}}}"#)
            .await;

        assert_eq!(session.state(), SessionState::Identified);
    }

    #[tokio::test]
    async fn invalid_version_closes_1008() {
        let transport = Arc::new(InMemoryTransport::new());
        let spawner = Arc::new(TokioSpawner::current());
        let session = Session::new(transport.clone(), spawner, test_config());

        let hello = serde_json::json!({
            "type": "client/hello",
            "payload": {"client_id": "c1", "name": "c1", "version": 2, "supported_roles": ["controller@v1"]}
        });
        session.handle_text(&hello.to_string()).await;

        assert_eq!(transport.closed_with(), Some((1008, "invalid protocol version".into())));
    }

    #[tokio::test]
    async fn send_pcm_defers_when_buffered_amount_exceeds_threshold() {
        let transport = Arc::new(InMemoryTransport::new());
        let spawner = Arc::new(TokioSpawner::current());
        let session = Session::new(transport.clone(), spawner, test_config());

        let hello = serde_json::json!({
            "type": "client/hello",
            "payload": {
                "client_id": "c1", "name": "c1", "version": 1,
                "supported_roles": ["controller@v1"]
            }
        });
        session.handle_text(&hello.to_string()).await;
        transport.set_buffered_amount(600 * 1024);

        session.send_pcm(&[1, 2, 3], Some(1000)).await;

        assert!(transport.sent_binary().is_empty());
    }
}
