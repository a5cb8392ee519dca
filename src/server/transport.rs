//! Relay server setup

use crate::server::connections::ConnectionManager;
use crate::server::keepalive::KeepAlive;
use crate::server::relay::RelayEngine;
use crate::server::websocket::{create_router, WsState};

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Interval between keep-alive sweeps
    pub keepalive_interval: Duration,
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            keepalive_interval: Duration::from_secs(30),
            outbound_buffer: 100,
        }
    }
}

/// Point-in-time registry counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub connections: usize,
    pub channels: usize,
}

/// A bound relay server
pub struct RelayServer {
    config: RelayServerConfig,
    listener: TcpListener,
    engine: RelayEngine,
}

impl RelayServer {
    /// Bind the listening socket. Use port 0 to pick a free port.
    pub async fn bind(config: RelayServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
        let engine = RelayEngine::new(Arc::new(ConnectionManager::new()));

        Ok(Self {
            config,
            listener,
            engine,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the engine (for stats or in-process publishing)
    pub fn engine(&self) -> RelayEngine {
        self.engine.clone()
    }

    pub fn stats(&self) -> RelayStats {
        let connections = self.engine.connections();
        RelayStats {
            connections: connections.count(),
            channels: connections.channel_count(),
        }
    }

    /// Serve until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let RelayServer {
            config,
            listener,
            engine,
        } = self;

        let keepalive = KeepAlive::new(engine.router().clone(), config.keepalive_interval).spawn();

        let app = create_router(WsState {
            engine,
            outbound_buffer: config.outbound_buffer,
        });

        let addr = listener.local_addr()?;
        info!(addr = %addr, "WebSocket relay listening");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Relay server failed");

        keepalive.abort();
        info!("WebSocket relay stopped");
        result
    }

    /// Serve forever
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }
}
