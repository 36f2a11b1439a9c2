//! HTTP/WebSocket API layer.
//!
//! Thin handlers that delegate to [`crate::session`]/[`crate::registry`].
//! Provides router construction and server startup.

use std::sync::Arc;

use thiserror::Error;

use crate::registry::SessionRegistry;
use crate::runtime::TaskSpawner;
use crate::state::Config;

pub mod http;
pub mod ws;
pub mod ws_connection;
mod ws_transport;

pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub ws_manager: Arc<WsConnectionManager>,
    pub spawner: Arc<dyn TaskSpawner>,
    /// Roles this server advertises as supporting in `server/hello`.
    pub supported_roles: Arc<Vec<String>>,
}

/// Builder for constructing an [`AppState`].
#[derive(Default)]
pub struct AppStateBuilder {
    config: Option<Arc<Config>>,
    registry: Option<Arc<SessionRegistry>>,
    ws_manager: Option<Arc<WsConnectionManager>>,
    spawner: Option<Arc<dyn TaskSpawner>>,
    supported_roles: Option<Vec<String>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates the fields shared with a [`crate::BootstrappedServices`] container.
    pub fn from_services(mut self, services: &crate::BootstrappedServices) -> Self {
        self.registry = Some(Arc::clone(&services.registry));
        self.ws_manager = Some(Arc::clone(&services.ws_manager));
        self.spawner = Some(Arc::new(services.spawner.clone()) as Arc<dyn TaskSpawner>);
        self
    }

    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn ws_manager(mut self, manager: Arc<WsConnectionManager>) -> Self {
        self.ws_manager = Some(manager);
        self
    }

    pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn supported_roles(mut self, roles: Vec<String>) -> Self {
        self.supported_roles = Some(roles);
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    pub fn build(self) -> AppState {
        AppState {
            config: self.config.expect("config is required"),
            registry: self.registry.expect("registry is required"),
            ws_manager: self.ws_manager.expect("ws_manager is required"),
            spawner: self.spawner.expect("spawner is required"),
            supported_roles: Arc::new(self.supported_roles.unwrap_or_else(|| vec!["player@v1".to_string()])),
        }
    }
}

impl AppState {
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Starts the HTTP/WebSocket server on `state.config.bind_addr:bind_port`.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let addr = format!("{}:{}", state.config.bind_addr, state.config.bind_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, ws_path = %state.config.ws_path, "sendspin server listening");
    let app = http::create_router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
