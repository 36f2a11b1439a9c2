//! Application bootstrap and dependency wiring.
//!
//! Composition root: the single place all services are instantiated and
//! wired together.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::WsConnectionManager;
use crate::error::{SendspinError, SendspinResult};
use crate::registry::SessionRegistry;
use crate::runtime::TokioSpawner;
use crate::state::Config;

/// Container for all bootstrapped services, consumed by [`crate::api::AppState`].
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Tracks live sessions and hooks destined for them.
    pub registry: Arc<SessionRegistry>,
    /// Manages WebSocket connections (force-close, RAII cleanup).
    pub ws_manager: Arc<WsConnectionManager>,
    /// Task spawner for session background work.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown: force-closes every live connection and
    /// signals cancellation to all background tasks.
    pub async fn shutdown(&self) {
        tracing::info!("beginning graceful shutdown");
        self.cancel_token.cancel();
        let closed = self.ws_manager.close_all();
        tracing::info!(closed, "closed websocket connection(s)");
        tracing::info!("shutdown complete");
    }
}

/// Bootstraps all application services with their dependencies.
///
/// # Errors
///
/// Returns an error if `config` fails validation.
pub fn bootstrap_services(config: &Config) -> SendspinResult<BootstrappedServices> {
    config
        .validate()
        .map_err(SendspinError::Configuration)?;

    let spawner = TokioSpawner::current();
    let registry = Arc::new(SessionRegistry::new());
    let ws_manager = Arc::new(WsConnectionManager::new());
    let cancel_token = CancellationToken::new();

    Ok(BootstrappedServices {
        registry,
        ws_manager,
        spawner,
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_wires_empty_registry() {
        let config = Config::default();
        let services = bootstrap_services(&config).unwrap();
        assert!(services.registry.is_empty());
        assert_eq!(services.ws_manager.connection_count(), 0);
    }

    #[test]
    fn bootstrap_rejects_invalid_config() {
        let mut config = Config::default();
        config.server_id = String::new();
        assert!(bootstrap_services(&config).is_err());
    }
}
