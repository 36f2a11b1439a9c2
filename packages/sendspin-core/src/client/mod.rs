//! Peer-side protocol driver: the library a player/controller/source device
//! links against to speak Sendspin to a server.
//!
//! Mirrors [`crate::session::Session`]'s shape (inbound dispatch table,
//! outbound send-verbs) but drives a real `tokio-tungstenite` socket instead
//! of an injected [`Transport`](crate::transport::Transport) — a client only
//! ever has one connection, so the extra abstraction layer buys nothing.

mod format;

pub use format::{format_from_stream_player_config, ClientError};

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::binary_header::{BinaryHeader, FrameTag};
use crate::events::{ClientEvent, ListenerRegistry, Subscription};
use crate::message::{
    ArtworkSupport, ClientCommand, ClientGoodbye, ClientHello, ClientInbound, ClientPlayerState,
    ClientSourceState, ClientState, ClientState1, ClientTime, ControllerCommand,
    DeviceInfo, PlayerSupport, ServerInbound, SourceClientCommand, SourceSupport,
    VisualizerSupport,
};
use crate::protocol_constants::{
    GRACEFUL_CLOSE_CEILING_MS, PROTOCOL_VERSION, TIME_SYNC_INTERVALS, TIME_SYNC_INTERVAL_UNSYNCED_MS,
};
use crate::runtime::TaskSpawner;
use crate::time_filter::TimeFilter;
use crate::utils::now_micros;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, WsMessage>;

/// Capability declarations and playback defaults supplied at construction.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub device_info: Option<DeviceInfo>,
    pub player_support: Option<PlayerSupport>,
    pub artwork_support: Option<ArtworkSupport>,
    pub visualizer_support: Option<VisualizerSupport>,
    pub source_support: Option<SourceSupport>,
    pub static_delay_ms: i64,
    pub initial_volume: u8,
    pub initial_muted: bool,
}

struct StreamState {
    active: bool,
    format: Option<crate::message::AudioFormat>,
}

struct Inner {
    server_id: Option<String>,
    server_name: Option<String>,
    server_version: Option<u32>,
    filter: TimeFilter,
    stream: StreamState,
}

/// Peer-side Sendspin protocol driver.
pub struct Client {
    client_id: String,
    client_name: String,
    roles: Vec<String>,
    options: ClientOptions,
    spawner: Arc<dyn TaskSpawner>,
    sink: AsyncMutex<Option<WsSink>>,
    inner: Mutex<Inner>,
    events: Arc<ListenerRegistry<ClientEvent>>,
    weak_self: Mutex<Weak<Client>>,
}

impl Client {
    pub fn new(
        client_id: impl Into<String>,
        client_name: impl Into<String>,
        roles: Vec<String>,
        options: ClientOptions,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Result<Arc<Client>, ClientError> {
        if roles.iter().any(|r| r.starts_with("player")) && options.player_support.is_none() {
            return Err(ClientError::MissingPlayerSupport);
        }
        if roles.iter().any(|r| r.starts_with("artwork")) && options.artwork_support.is_none() {
            return Err(ClientError::MissingArtworkSupport);
        }
        if roles.iter().any(|r| r.starts_with("source")) && options.source_support.is_none() {
            return Err(ClientError::MissingSourceSupport);
        }

        let client = Arc::new(Client {
            client_id: client_id.into(),
            client_name: client_name.into(),
            roles,
            options,
            spawner,
            sink: AsyncMutex::new(None),
            inner: Mutex::new(Inner {
                server_id: None,
                server_name: None,
                server_version: None,
                filter: TimeFilter::default(),
                stream: StreamState { active: false, format: None },
            }),
            events: Arc::new(ListenerRegistry::new()),
            weak_self: Mutex::new(Weak::new()),
        });
        *client.weak_self.lock() = Arc::downgrade(&client);
        Ok(client)
    }

    // ── connect / disconnect ─────────────────────────────────────────────

    pub async fn connect(self: &Arc<Self>, url: &str, timeout_ms: u64) -> Result<(), ClientError> {
        let connect_fut = tokio_tungstenite::connect_async(url);
        let (ws_stream, _) = tokio::time::timeout(Duration::from_millis(timeout_ms), connect_fut)
            .await
            .map_err(|_| ClientError::ConnectTimeout)?
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let (sink, mut stream) = ws_stream.split();
        *self.sink.lock().await = Some(sink);

        let self_for_reader = self.clone();
        self.spawner.spawn_boxed(Box::pin(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => self_for_reader.handle_text(&text).await,
                    Ok(WsMessage::Binary(data)) => self_for_reader.handle_binary(&data).await,
                    Ok(WsMessage::Close(_)) | Err(_) => {
                        self_for_reader.events.notify(&ClientEvent::Disconnected);
                        break;
                    }
                    _ => {}
                }
            }
        }));

        self.send_hello().await?;
        self.await_server_hello(timeout_ms).await?;

        if self.roles.iter().any(|r| r.starts_with("player")) {
            self.send_player_state(ClientPlayerState {
                state: Some(ClientState1::Synchronized),
                volume: Some(self.options.initial_volume),
                muted: Some(self.options.initial_muted),
            })
            .await;
        }

        self.send_client_time().await;
        self.schedule_next_time_sync(TIME_SYNC_INTERVAL_UNSYNCED_MS);
        Ok(())
    }

    pub fn server_id(&self) -> Option<String> {
        self.inner.lock().server_id.clone()
    }

    pub fn server_name(&self) -> Option<String> {
        self.inner.lock().server_name.clone()
    }

    pub fn server_version(&self) -> Option<u32> {
        self.inner.lock().server_version
    }

    pub async fn disconnect(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = tokio::time::timeout(
                Duration::from_millis(GRACEFUL_CLOSE_CEILING_MS),
                sink.close(),
            )
            .await;
        }
        self.events.notify(&ClientEvent::Disconnected);
    }

    async fn send_hello(&self) -> Result<(), ClientError> {
        let hello = ClientHello {
            client_id: self.client_id.clone(),
            name: self.client_name.clone(),
            version: PROTOCOL_VERSION,
            supported_roles: self.roles.clone(),
            device_info: self.options.device_info.clone(),
            player_support: self.options.player_support.clone(),
            artwork_support: self.options.artwork_support.clone(),
            visualizer_support: self.options.visualizer_support.clone(),
            source_support: self.options.source_support.clone(),
        };
        self.send_json(&ClientInbound::ClientHello(hello)).await
    }

    async fn await_server_hello(&self, timeout_ms: u64) -> Result<(), ClientError> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.inner.lock().server_id.is_some() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ClientError::HelloTimeout);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    // ── inbound dispatch ─────────────────────────────────────────────────

    async fn handle_text(&self, text: &str) {
        let Ok(msg) = serde_json::from_str::<ServerInbound>(text) else {
            return;
        };
        match msg {
            ServerInbound::ServerHello(hello) => {
                let mut inner = self.inner.lock();
                inner.server_id = Some(hello.server_id);
                inner.server_name = Some(hello.name);
                inner.server_version = Some(hello.version);
            }
            ServerInbound::ServerTime(time) => self.handle_server_time(time),
            ServerInbound::ServerState(state) => {
                if let Some(metadata) = state.metadata {
                    self.events.notify(&ClientEvent::Metadata(metadata));
                }
                if let Some(controller) = state.controller {
                    self.events.notify(&ClientEvent::ControllerState(controller));
                }
            }
            ServerInbound::ServerCommand(cmd) => {
                self.events.notify(&ClientEvent::ServerCommand(cmd));
            }
            ServerInbound::GroupUpdate(update) => {
                self.events.notify(&ClientEvent::GroupUpdate(update));
            }
            ServerInbound::StreamStart(start) => self.handle_stream_start(start),
            ServerInbound::StreamClear(clear) => self.handle_stream_clear(clear),
            ServerInbound::StreamEnd(end) => self.handle_stream_end(end),
        }
    }

    async fn handle_binary(&self, bytes: &[u8]) {
        let active = self.inner.lock().stream.active;
        if !active {
            return;
        }
        let Ok((header, payload)) = BinaryHeader::unpack(bytes) else {
            return;
        };
        if header.tag != FrameTag::AUDIO_CHUNK {
            return;
        }
        let format = self.inner.lock().stream.format.clone().unwrap_or_default();
        self.events.notify(&ClientEvent::AudioChunk {
            timestamp_us: header.timestamp_us,
            data: Bytes::copy_from_slice(payload),
            format,
        });
    }

    fn handle_server_time(&self, time: crate::message::ServerTime) {
        let now = now_micros();
        let round_trip = now - time.client_transmitted;
        // offset = ((server_received - client_transmitted) + (server_transmitted - now)) / 2
        let offset_estimate =
            ((time.server_received - time.client_transmitted) + (time.server_transmitted - now)) as f64
                / 2.0;
        // delay = ((now - client_transmitted) - (server_transmitted - server_received)) / 2
        let max_error =
            ((round_trip - (time.server_transmitted - time.server_received)) as f64 / 2.0).max(0.0);
        let mut inner = self.inner.lock();
        inner.filter.update(offset_estimate, max_error, now);
        let is_synchronized = inner.filter.is_synchronized();
        let error = inner.filter.error();
        drop(inner);
        self.schedule_next_time_sync(next_sync_interval_ms(is_synchronized, error));
    }

    fn handle_stream_start(&self, start: crate::message::StreamStart) {
        if let Some(player_cfg) = start.player {
            match format_from_stream_player_config(&player_cfg) {
                Ok(format) => {
                    let was_active = {
                        let mut inner = self.inner.lock();
                        let was_active = inner.stream.active;
                        inner.stream.active = true;
                        inner.stream.format = Some(format);
                        was_active
                    };
                    if !was_active {
                        self.events.notify(&ClientEvent::StreamStart);
                        self.resync_now();
                    }
                }
                Err(_) => {} // malformed format: drop silently
            }
        }
    }

    fn handle_stream_clear(&self, clear: crate::message::StreamClear) {
        let roles = clear.roles.unwrap_or_default();
        let allowed = roles.iter().all(|r| r == "player" || r == "visualizer");
        if !allowed {
            return;
        }
        self.events.notify(&ClientEvent::StreamClear { roles });
    }

    fn handle_stream_end(&self, end: crate::message::StreamEnd) {
        let drop_stream = end.roles.as_ref().map(|r| r.iter().any(|x| x == "player")).unwrap_or(true);
        if drop_stream {
            let mut inner = self.inner.lock();
            inner.stream.active = false;
            inner.stream.format = None;
        }
        self.events.notify(&ClientEvent::StreamEnd { roles: end.roles });
    }

    /// Kicks an out-of-cadence `client/time` without disturbing the
    /// adaptive timer's own schedule.
    fn resync_now(&self) {
        let weak = self.weak_self.lock().clone();
        self.spawner.spawn_boxed(Box::pin(async move {
            if let Some(this) = weak.upgrade() {
                this.send_client_time().await;
            }
        }));
    }

    // ── time sync ────────────────────────────────────────────────────────

    async fn send_client_time(&self) {
        let time = ClientTime {
            client_transmitted: now_micros(),
        };
        let _ = self.send_json(&ClientInbound::ClientTime(time)).await;
    }

    fn schedule_next_time_sync(&self, interval_ms: u64) {
        let weak = self.weak_self.lock().clone();
        self.spawner.spawn_boxed(Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            if let Some(this) = weak.upgrade() {
                this.send_client_time().await;
            }
        }));
    }

    // ── playback scheduling ──────────────────────────────────────────────

    pub fn is_synchronized(&self) -> bool {
        self.inner.lock().filter.is_synchronized()
    }

    /// `compute_play_time(server_ts_us)` (spec §4.5).
    pub fn compute_play_time(&self, server_ts_us: i64) -> i64 {
        let inner = self.inner.lock();
        if inner.filter.is_synchronized() {
            inner.filter.client_from_server(server_ts_us) + self.options.static_delay_ms * 1000
        } else {
            now_micros() + 500_000 + self.options.static_delay_ms * 1000
        }
    }

    /// `compute_server_time(client_ts_us)` (spec §4.5).
    pub fn compute_server_time(&self, client_ts_us: i64) -> i64 {
        let inner = self.inner.lock();
        inner
            .filter
            .server_from_client(client_ts_us - self.options.static_delay_ms * 1000)
    }

    // ── outbound ─────────────────────────────────────────────────────────

    async fn send_json(&self, msg: &ClientInbound) -> Result<(), ClientError> {
        let text = serde_json::to_string(msg).map_err(|e| ClientError::Transport(e.to_string()))?;
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        sink.send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn send_binary(&self, data: Vec<u8>) -> Result<(), ClientError> {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        sink.send(WsMessage::Binary(data.into()))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    pub async fn send_player_state(&self, state: ClientPlayerState) {
        let _ = self
            .send_json(&ClientInbound::ClientState(ClientState {
                state: None,
                player: Some(state),
                source: None,
            }))
            .await;
    }

    pub async fn send_source_state(&self, state: ClientSourceState) {
        let _ = self
            .send_json(&ClientInbound::ClientState(ClientState {
                state: None,
                player: None,
                source: Some(state),
            }))
            .await;
    }

    pub async fn send_group_command(&self, command: impl Into<String>, volume: Option<u8>, mute: Option<bool>) {
        let cmd = ControllerCommand {
            command: command.into(),
            volume,
            mute,
            source_id: None,
        };
        let _ = self
            .send_json(&ClientInbound::ClientCommand(ClientCommand {
                controller: Some(cmd),
                source: None,
            }))
            .await;
    }

    pub async fn send_source_command(&self, command: impl Into<String>) {
        let cmd = SourceClientCommand { command: command.into() };
        let _ = self
            .send_json(&ClientInbound::ClientCommand(ClientCommand {
                controller: None,
                source: Some(cmd),
            }))
            .await;
    }

    /// `send_source_audio_chunk(data, opts)` (spec §4.5).
    pub async fn send_source_audio_chunk(
        &self,
        data: &[u8],
        capture_ts_us: Option<i64>,
        server_ts_us: Option<i64>,
    ) -> Result<(), ClientError> {
        let timestamp_us = if let Some(ts) = server_ts_us {
            ts
        } else {
            let capture_ts_us = capture_ts_us.ok_or(ClientError::MissingTimestamp)?;
            if !self.is_synchronized() {
                return Err(ClientError::NotSynchronized);
            }
            self.inner.lock().filter.server_from_client(capture_ts_us)
        };
        let header = BinaryHeader::new(FrameTag::SOURCE_AUDIO_CHUNK, timestamp_us);
        self.send_binary(header.pack_frame(data)).await
    }

    pub async fn send_goodbye(&self, reason: crate::message::GoodbyeReason) {
        let _ = self.send_json(&ClientInbound::ClientGoodbye(ClientGoodbye { reason })).await;
    }

    // ── listener registration ───────────────────────────────────────────

    pub fn add_metadata_listener<F>(&self, listener: F) -> Subscription<ClientEvent>
    where
        F: Fn(&crate::message::MetadataState) + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if let ClientEvent::Metadata(metadata) = event {
                listener(metadata);
            }
        })
    }

    pub fn add_group_update_listener<F>(&self, listener: F) -> Subscription<ClientEvent>
    where
        F: Fn(&crate::message::GroupUpdate) + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if let ClientEvent::GroupUpdate(update) = event {
                listener(update);
            }
        })
    }

    pub fn add_controller_state_listener<F>(&self, listener: F) -> Subscription<ClientEvent>
    where
        F: Fn(&crate::message::ControllerState) + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if let ClientEvent::ControllerState(state) = event {
                listener(state);
            }
        })
    }

    pub fn add_stream_start_listener<F>(&self, listener: F) -> Subscription<ClientEvent>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if matches!(event, ClientEvent::StreamStart) {
                listener();
            }
        })
    }

    pub fn add_stream_end_listener<F>(&self, listener: F) -> Subscription<ClientEvent>
    where
        F: Fn(&Option<Vec<String>>) + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if let ClientEvent::StreamEnd { roles } = event {
                listener(roles);
            }
        })
    }

    pub fn add_stream_clear_listener<F>(&self, listener: F) -> Subscription<ClientEvent>
    where
        F: Fn(&Vec<String>) + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if let ClientEvent::StreamClear { roles } = event {
                listener(roles);
            }
        })
    }

    pub fn add_audio_chunk_listener<F>(&self, listener: F) -> Subscription<ClientEvent>
    where
        F: Fn(i64, &Bytes, &crate::message::AudioFormat) + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if let ClientEvent::AudioChunk { timestamp_us, data, format } = event {
                listener(*timestamp_us, data, format);
            }
        })
    }

    pub fn add_disconnect_listener<F>(&self, listener: F) -> Subscription<ClientEvent>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if matches!(event, ClientEvent::Disconnected) {
                listener();
            }
        })
    }

    pub fn add_server_command_listener<F>(&self, listener: F) -> Subscription<ClientEvent>
    where
        F: Fn(&crate::message::ServerCommand) + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if let ClientEvent::ServerCommand(cmd) = event {
                listener(cmd);
            }
        })
    }

    pub fn add_source_command_listener<F>(&self, listener: F) -> Subscription<ClientEvent>
    where
        F: Fn(&crate::message::SourceServerCommand) + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if let ClientEvent::SourceCommand(cmd) = event {
                listener(cmd);
            }
        })
    }
}

fn next_sync_interval_ms(is_synchronized: bool, error_us: i64) -> u64 {
    if !is_synchronized {
        return TIME_SYNC_INTERVAL_UNSYNCED_MS;
    }
    for &(threshold, interval) in TIME_SYNC_INTERVALS {
        if error_us < threshold {
            return interval;
        }
    }
    TIME_SYNC_INTERVAL_UNSYNCED_MS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AudioFormatSpec, PlayerSupport};
    use crate::runtime::TokioSpawner;

    fn spawner() -> Arc<dyn TaskSpawner> {
        Arc::new(TokioSpawner::current())
    }

    #[tokio::test]
    async fn missing_player_support_rejected() {
        let result = Client::new(
            "c1",
            "device",
            vec!["player@v1".into()],
            ClientOptions::default(),
            Arc::new(crate::runtime::TokioSpawner::new(tokio::runtime::Handle::current())),
        );
        assert!(matches!(result, Err(ClientError::MissingPlayerSupport)));
    }

    #[tokio::test]
    async fn player_role_with_support_constructs() {
        let options = ClientOptions {
            player_support: Some(PlayerSupport {
                supported_formats: vec![AudioFormatSpec {
                    codec: "pcm".into(),
                    channels: 2.0,
                    sample_rate: 48000.0,
                    bit_depth: 16.0,
                }],
                buffer_capacity: 1024,
                supported_commands: vec![],
            }),
            ..Default::default()
        };
        let client = Client::new("c1", "device", vec!["player@v1".into()], options, spawner());
        assert!(client.is_ok());
    }

    #[test]
    fn next_interval_follows_thresholds() {
        assert_eq!(next_sync_interval_ms(false, 0), 200);
        assert_eq!(next_sync_interval_ms(true, 500), 3000);
        assert_eq!(next_sync_interval_ms(true, 1500), 1000);
        assert_eq!(next_sync_interval_ms(true, 4000), 500);
        assert_eq!(next_sync_interval_ms(true, 9000), 200);
    }
}
