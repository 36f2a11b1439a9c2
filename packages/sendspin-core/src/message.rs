//! JSON envelope schema exchanged over the Sendspin control plane.
//!
//! Every envelope on the wire is `{type: string, payload: object}`; inbound
//! and outbound message sets are separate tagged enums per direction, each
//! keyed on a single `type` discriminator (a dual-union would force one side
//! to accept messages it never sends).

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────
// Envelopes
// ─────────────────────────────────────────────────────────────────────────

/// Messages the server accepts from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientInbound {
    #[serde(rename = "client/hello")]
    ClientHello(ClientHello),
    #[serde(rename = "client/time")]
    ClientTime(ClientTime),
    #[serde(rename = "client/state")]
    ClientState(ClientState),
    #[serde(rename = "client/command")]
    ClientCommand(ClientCommand),
    #[serde(rename = "client/goodbye")]
    ClientGoodbye(ClientGoodbye),
    #[serde(rename = "stream/request-format")]
    StreamRequestFormat(StreamRequestFormat),
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerInbound {
    #[serde(rename = "server/hello")]
    ServerHello(ServerHello),
    #[serde(rename = "server/time")]
    ServerTime(ServerTime),
    #[serde(rename = "server/state")]
    ServerState(ServerState),
    #[serde(rename = "server/command")]
    ServerCommand(ServerCommand),
    #[serde(rename = "group/update")]
    GroupUpdate(GroupUpdate),
    #[serde(rename = "stream/start")]
    StreamStart(StreamStart),
    #[serde(rename = "stream/clear")]
    StreamClear(StreamClear),
    #[serde(rename = "stream/end")]
    StreamEnd(StreamEnd),
}

// ─────────────────────────────────────────────────────────────────────────
// Roles and enums
// ─────────────────────────────────────────────────────────────────────────

/// A role family, without its `@vN` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleFamily {
    Player,
    Controller,
    Metadata,
    Artwork,
    Visualizer,
    Source,
}

impl RoleFamily {
    /// Splits a role literal such as `"player@v1"` into its family, if the
    /// prefix before `@` matches a known family.
    pub fn from_role_literal(role: &str) -> Option<RoleFamily> {
        let family = role.split('@').next().unwrap_or(role);
        match family {
            "player" => Some(RoleFamily::Player),
            "controller" => Some(RoleFamily::Controller),
            "metadata" => Some(RoleFamily::Metadata),
            "artwork" => Some(RoleFamily::Artwork),
            "visualizer" => Some(RoleFamily::Visualizer),
            "source" => Some(RoleFamily::Source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionReason {
    Discovery,
    Playback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientState1 {
    Synchronized,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GoodbyeReason {
    AnotherServer,
    Shutdown,
    Restart,
    UserRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    RepeatOff,
    RepeatOne,
    RepeatAll,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Idle,
    Streaming,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceSignal {
    Unknown,
    Present,
    Absent,
}

/// The three codecs this protocol recognizes on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Pcm,
    Flac,
    Opus,
}

impl Codec {
    pub fn parse(s: &str) -> Option<Codec> {
        match s {
            "pcm" => Some(Codec::Pcm),
            "flac" => Some(Codec::Flac),
            "opus" => Some(Codec::Opus),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// client/hello, server/hello
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHello {
    pub client_id: String,
    #[serde(default)]
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub supported_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    #[serde(
        rename = "player@v1_support",
        alias = "player_support",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub player_support: Option<PlayerSupport>,
    #[serde(
        rename = "artwork@v1_support",
        alias = "artwork_support",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub artwork_support: Option<ArtworkSupport>,
    #[serde(
        rename = "visualizer@v1_support",
        alias = "visualizer_support",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub visualizer_support: Option<VisualizerSupport>,
    #[serde(
        rename = "source@v1_support",
        alias = "source_support",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_support: Option<SourceSupport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSupport {
    #[serde(default)]
    pub supported_formats: Vec<AudioFormatSpec>,
    #[serde(default)]
    pub buffer_capacity: u32,
    #[serde(default)]
    pub supported_commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFormatSpec {
    pub codec: String,
    pub channels: f64,
    pub sample_rate: f64,
    pub bit_depth: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtworkSupport {
    #[serde(default)]
    pub channels: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizerSupport {
    #[serde(default)]
    pub buffer_capacity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSupport {
    #[serde(default)]
    pub supported_commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHello {
    pub server_id: String,
    pub name: String,
    pub version: u32,
    pub active_roles: Vec<String>,
    pub connection_reason: ConnectionReason,
}

// ─────────────────────────────────────────────────────────────────────────
// client/time, server/time
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientTime {
    pub client_transmitted: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTime {
    pub client_transmitted: i64,
    pub server_received: i64,
    pub server_transmitted: i64,
}

// ─────────────────────────────────────────────────────────────────────────
// client/state, server/state
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ClientState1>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<ClientPlayerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ClientSourceState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientPlayerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ClientState1>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSourceState {
    pub state: SourceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SourceSignal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetadataState {
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerState {
    #[serde(default)]
    pub supported_commands: Vec<String>,
    pub volume: u8,
    pub muted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
}

// ─────────────────────────────────────────────────────────────────────────
// client/command, server/command
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceClientCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerCommand {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceClientCommand {
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceServerCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerCommand {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceServerCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vad: Option<VadConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VadConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_db: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_ms: Option<u32>,
}

// ─────────────────────────────────────────────────────────────────────────
// stream/*
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamStart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<StreamPlayerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork: Option<StreamArtworkConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualizer: Option<StreamVisualizerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamPlayerConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_header: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamArtworkConfig {
    pub channels: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamVisualizerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_capacity: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamEnd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamClear {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamRequestFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerFormatRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork: Option<ArtworkFormatRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerFormatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtworkFormatRequest {
    pub channel: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_height: Option<u32>,
}

// ─────────────────────────────────────────────────────────────────────────
// group/update
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GroupUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_state: Option<PlaybackState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────
// client/goodbye
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientGoodbye {
    pub reason: GoodbyeReason,
}

// ─────────────────────────────────────────────────────────────────────────
// Negotiated stream format
// ─────────────────────────────────────────────────────────────────────────

/// Error constructing an [`AudioFormat`] from out-of-range parameters.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AudioFormatError {
    #[error("unsupported channel count: {0}")]
    UnsupportedChannels(u8),
    #[error("unsupported bit depth: {0}")]
    UnsupportedBitDepth(u8),
}

/// The player stream format the server currently commits to send, or the
/// client currently expects to receive.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFormat {
    pub codec: Codec,
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
    pub codec_header: Option<Vec<u8>>,
}

impl AudioFormat {
    pub fn new(
        codec: Codec,
        sample_rate: u32,
        channels: u8,
        bit_depth: u8,
        codec_header: Option<Vec<u8>>,
    ) -> Result<Self, AudioFormatError> {
        if !matches!(channels, 1 | 2) {
            return Err(AudioFormatError::UnsupportedChannels(channels));
        }
        if !matches!(bit_depth, 16 | 24 | 32) {
            return Err(AudioFormatError::UnsupportedBitDepth(bit_depth));
        }
        Ok(Self {
            codec,
            sample_rate,
            channels,
            bit_depth,
            codec_header,
        })
    }

    pub fn default_pcm() -> Self {
        Self {
            codec: Codec::Pcm,
            sample_rate: crate::protocol_constants::DEFAULT_SAMPLE_RATE,
            channels: crate::protocol_constants::DEFAULT_CHANNELS as u8,
            bit_depth: crate::protocol_constants::DEFAULT_BIT_DEPTH as u8,
            codec_header: None,
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::default_pcm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_format_rejects_out_of_range_parameters() {
        assert!(AudioFormat::new(Codec::Pcm, 48000, 3, 16, None).is_err());
        assert!(AudioFormat::new(Codec::Pcm, 48000, 2, 20, None).is_err());
        assert!(AudioFormat::new(Codec::Pcm, 48000, 2, 24, None).is_ok());
    }

    #[test]
    fn client_hello_round_trips_with_legacy_alias() {
        let json = serde_json::json!({
            "type": "client/hello",
            "payload": {
                "client_id": "c1",
                "name": "living-room",
                "version": 1,
                "supported_roles": ["player@v1"],
                "player_support": {
                    "supported_formats": [],
                    "buffer_capacity": 10,
                    "supported_commands": []
                }
            }
        });
        let msg: ClientInbound = serde_json::from_value(json).unwrap();
        match msg {
            ClientInbound::ClientHello(hello) => {
                assert_eq!(hello.client_id, "c1");
                assert!(hello.player_support.is_some());
            }
            _ => panic!("expected ClientHello"),
        }
    }

    #[test]
    fn server_hello_serializes_canonical_tag() {
        let hello = ServerHello {
            server_id: "s1".into(),
            name: "sendspin-server".into(),
            version: 1,
            active_roles: vec!["player@v1".into()],
            connection_reason: ConnectionReason::Discovery,
        };
        let value = serde_json::to_value(ServerInbound::ServerHello(hello)).unwrap();
        assert_eq!(value["type"], "server/hello");
        assert_eq!(value["payload"]["connection_reason"], "discovery");
    }

    #[test]
    fn role_family_parses_prefix() {
        assert_eq!(RoleFamily::from_role_literal("player@v1"), Some(RoleFamily::Player));
        assert_eq!(RoleFamily::from_role_literal("_unknown@v1"), None);
    }
}
