//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the Sendspin wire protocol; changing them
//! would break interoperability with other implementations.

// ─────────────────────────────────────────────────────────────────────────────
// Binary frame tags
// ─────────────────────────────────────────────────────────────────────────────

/// Server → player PCM/compressed audio chunk.
pub const TAG_AUDIO_CHUNK: u8 = 4;

/// Server → artwork, channels 0..3 (`TAG_ARTWORK_CHANNEL_0 + channel`).
pub const TAG_ARTWORK_CHANNEL_0: u8 = 8;
pub const TAG_ARTWORK_CHANNEL_1: u8 = 9;
pub const TAG_ARTWORK_CHANNEL_2: u8 = 10;
pub const TAG_ARTWORK_CHANNEL_3: u8 = 11;

/// Source → server captured audio chunk.
pub const TAG_SOURCE_AUDIO_CHUNK: u8 = 12;

/// Server → visualizer frame.
pub const TAG_VISUALIZATION_DATA: u8 = 16;

/// Number of artwork channels the protocol supports (0..3).
pub const ARTWORK_CHANNEL_COUNT: u32 = 4;

// ─────────────────────────────────────────────────────────────────────────────
// Protocol version and defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Wire protocol version carried in `client/hello`/`server/hello`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default WebSocket listen port.
pub const DEFAULT_PORT: u16 = 8927;

/// Default WebSocket path.
pub const DEFAULT_WS_PATH: &str = "/sendspin";

/// Default sample rate (Hz) when no format has been negotiated.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default channel count when no format has been negotiated.
pub const DEFAULT_CHANNELS: u32 = 2;

/// Default bit depth when no format has been negotiated.
pub const DEFAULT_BIT_DEPTH: u32 = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Backpressure
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum buffered bytes before PCM sends are deferred and ancillary sends
/// are dropped.
pub const MAX_BUFFERED_BYTES: usize = 512 * 1024;

/// Delay before retrying a deferred PCM send.
pub const BACKPRESSURE_RETRY_MS: u64 = 5;

/// Retention window for the drop-event ledger.
pub const DROP_WINDOW_SECS: u64 = 5 * 60;

// ─────────────────────────────────────────────────────────────────────────────
// Timeouts
// ─────────────────────────────────────────────────────────────────────────────

/// Default `connect()` timeout covering socket open and `server/hello`.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Server-side timer for the initial-state admission gate.
pub const INITIAL_STATE_TIMEOUT_MS: u64 = 5_000;

/// Ceiling on graceful-close wait before cleanup proceeds regardless.
pub const GRACEFUL_CLOSE_CEILING_MS: u64 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Time-sync cadence
// ─────────────────────────────────────────────────────────────────────────────

/// Time-sync interval while unsynchronized.
pub const TIME_SYNC_INTERVAL_UNSYNCED_MS: u64 = 200;

/// Time-sync interval thresholds, expressed as `(max error µs, interval ms)`
/// pairs evaluated in order once synchronized. The last entry is the
/// fallback for errors at or above its threshold.
pub const TIME_SYNC_INTERVALS: &[(i64, u64)] = &[
    (1_000, 3_000),
    (2_000, 1_000),
    (5_000, 500),
    (i64::MAX, 200),
];

/// Half-second safety margin applied to scheduled playback time before the
/// client has achieved synchronization.
pub const BOOTSTRAP_PLAYBACK_MARGIN_US: i64 = 500_000;

// ─────────────────────────────────────────────────────────────────────────────
// Kalman filter defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default process noise standard deviation (µs/s), squared to form `Q`.
pub const DEFAULT_PROCESS_STD: f64 = 1.0;

/// Default forgetting factor, squared to form the covariance inflation
/// multiplier applied after a large residual.
pub const DEFAULT_FORGET_FACTOR: f64 = 1.5;

/// Number of updates after which the forgetting-factor cutoff starts being
/// evaluated, rather than unconditionally incrementing `count`.
pub const FORGET_COUNT_THRESHOLD: u32 = 100;

/// Residual-to-max_error ratio beyond which the filter inflates its
/// covariance to reacquire lock after a clock jump.
pub const FORGET_CUTOFF_RATIO: f64 = 0.75;

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Default server name advertised in `server/hello`.
pub const SERVER_NAME: &str = "sendspin-server";

/// Service identifier used for the `/health` endpoint.
pub const SERVICE_ID: &str = "sendspin";

/// Default group name fallback when no connection metadata identifies one.
pub const DEFAULT_GROUP_NAME: &str = "sendspin";
