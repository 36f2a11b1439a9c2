//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP/WS listener to.
    pub bind_addr: String,

    /// Port to bind the HTTP/WS listener to.
    /// Override: `SENDSPIN_BIND_PORT`
    pub bind_port: u16,

    /// Path the WebSocket upgrade is served on.
    pub ws_path: String,

    /// Identity announced in `server/hello`.
    /// Override: `SENDSPIN_SERVER_ID`
    pub server_id: String,

    /// Human-readable name announced in `server/hello`.
    pub server_name: String,

    /// Roles this server advertises as supporting, e.g. `["player@v1"]`.
    pub supported_roles: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = sendspin_core::Config::default();
        Self {
            bind_addr: core.bind_addr,
            bind_port: core.bind_port,
            ws_path: core.ws_path,
            server_id: core.server_id,
            server_name: core.server_name,
            supported_roles: vec!["player@v1".to_string()],
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SENDSPIN_BIND_ADDR") {
            self.bind_addr = val;
        }
        if let Ok(val) = std::env::var("SENDSPIN_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }
        if let Ok(val) = std::env::var("SENDSPIN_SERVER_ID") {
            self.server_id = val;
        }
    }

    /// Converts to sendspin-core's `Config` type.
    pub fn to_core_config(&self) -> sendspin_core::Config {
        sendspin_core::Config {
            bind_addr: self.bind_addr.clone(),
            bind_port: self.bind_port,
            ws_path: self.ws_path.clone(),
            server_id: self.server_id.clone(),
            server_name: self.server_name.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_core_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.ws_path, sendspin_core::Config::default().ws_path);
    }

    #[test]
    fn to_core_config_preserves_overrides() {
        let mut config = ServerConfig::default();
        config.bind_port = 9001;
        config.server_id = "my-server".to_string();
        let core = config.to_core_config();
        assert_eq!(core.bind_port, 9001);
        assert_eq!(core.server_id, "my-server");
    }
}
