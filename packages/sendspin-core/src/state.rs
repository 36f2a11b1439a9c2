//! Process configuration for a Sendspin server.

use serde::{Deserialize, Serialize};

/// Top-level configuration for `sendspin-server`.
///
/// All fields have sensible defaults; `validate()` catches values that would
/// cause a runtime panic or a nonsensical server further down the line.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Address to bind the HTTP/WS listener to.
    pub bind_addr: String,

    /// Port to bind the HTTP/WS listener to (0 = auto-allocate).
    pub bind_port: u16,

    /// Path the WebSocket upgrade is served on.
    pub ws_path: String,

    /// Identity announced in `server/hello`.
    pub server_id: String,

    /// Human-readable name announced in `server/hello`.
    pub server_name: String,

    /// Timeout for `Client::connect` to reach an OPEN socket (milliseconds).
    pub connect_timeout_ms: u64,

    /// Timeout after handshake for the first `client/state` before giving up
    /// on marking a player-role session identified (spec §4.3).
    pub initial_state_timeout_ms: u64,

    /// Backpressure threshold above which `Session::send_pcm` defers
    /// (bytes buffered in the outbound socket).
    pub max_buffered_bytes: usize,

    /// Retry interval used while a session's outbound socket is backpressured.
    pub backpressure_retry_ms: u64,

    /// `tracing`/`log` filter directive, e.g. `"info"` or `"sendspin=debug"`.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        use crate::protocol_constants::{
            BACKPRESSURE_RETRY_MS, CONNECT_TIMEOUT_MS, DEFAULT_PORT, DEFAULT_WS_PATH,
            INITIAL_STATE_TIMEOUT_MS, MAX_BUFFERED_BYTES, SERVER_NAME, SERVICE_ID,
        };
        Self {
            bind_addr: "0.0.0.0".to_string(),
            bind_port: DEFAULT_PORT,
            ws_path: DEFAULT_WS_PATH.to_string(),
            server_id: SERVICE_ID.to_string(),
            server_name: SERVER_NAME.to_string(),
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            initial_state_timeout_ms: INITIAL_STATE_TIMEOUT_MS,
            max_buffered_bytes: MAX_BUFFERED_BYTES,
            backpressure_retry_ms: BACKPRESSURE_RETRY_MS,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Validates field ranges that would otherwise surface as a confusing
    /// panic or silent misbehavior deep in the server.
    pub fn validate(&self) -> Result<(), String> {
        if self.ws_path.is_empty() || !self.ws_path.starts_with('/') {
            return Err("ws_path must be a non-empty absolute path".to_string());
        }
        if self.server_id.is_empty() {
            return Err("server_id must not be empty".to_string());
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms must be >= 1".to_string());
        }
        if self.initial_state_timeout_ms == 0 {
            return Err("initial_state_timeout_ms must be >= 1".to_string());
        }
        if self.max_buffered_bytes == 0 {
            return Err("max_buffered_bytes must be >= 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_relative_ws_path() {
        let mut config = Config::default();
        config.ws_path = "sendspin".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeouts() {
        let mut config = Config::default();
        config.connect_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
