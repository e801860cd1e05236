//! Listening endpoint: binds the configured port and hands every upgraded
//! connection to its own session.

use axum::{routing::get, Router};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::{Config, ConfigError};
use crate::counters::SharedCounters;
use crate::state::AppState;
use crate::ws::ws_handler;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("could not listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server stopped: {0}")]
    Serve(#[source] std::io::Error),
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

pub struct MonitorServer {
    listener: TcpListener,
    state: AppState,
}

impl MonitorServer {
    /// Validates `config` and binds the endpoint. No retry and no fallback port.
    pub async fn bind(config: Config, counters: SharedCounters) -> Result<Self, ServerError> {
        let config = config.validate()?;
        let addr = config.addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self {
            listener,
            state: AppState::new(config, counters),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) -> Result<(), ServerError> {
        let app = router(self.state);
        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(ServerError::Serve)
    }
}

/// Binds and serves until the listener fails. Both outcomes are logged.
pub async fn start(config: Config, counters: SharedCounters) -> Result<(), ServerError> {
    info!(port = config.port, "starting monitoring on port {}", config.port);
    let server = match MonitorServer::bind(config, counters).await {
        Ok(s) => s,
        Err(e) => {
            error!("{e}");
            return Err(e);
        }
    };
    if let Ok(addr) = server.local_addr() {
        info!("monitoring service listening on ws://{addr}");
    }
    server.serve().await.inspect_err(|e| error!("{e}"))
}
