//! wsrelayd - WebSocket channel relay daemon

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wsrelay::server::{RelayServer, RelayServerConfig};

#[derive(Parser, Debug)]
#[command(name = "wsrelayd")]
#[command(about = "WebSocket channel relay daemon")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080", env = "WSRELAY_BIND")]
    bind: String,

    /// Port to listen on, overriding the port in --bind
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Seconds between keep-alive frames
    #[arg(long, default_value_t = 30, env = "WSRELAY_KEEPALIVE_SECS")]
    keepalive_secs: u64,

    /// Frames buffered per connection before new ones are dropped
    #[arg(long, default_value_t = 100, env = "WSRELAY_OUTBOUND_BUFFER")]
    outbound_buffer: usize,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<RelayServerConfig> {
        let mut bind_addr: SocketAddr = self.bind.parse().context("Invalid bind address")?;
        if let Some(port) = self.port {
            bind_addr.set_port(port);
        }

        if self.keepalive_secs == 0 {
            anyhow::bail!("--keepalive-secs must be at least 1");
        }

        Ok(RelayServerConfig {
            bind_addr,
            keepalive_interval: Duration::from_secs(self.keepalive_secs),
            outbound_buffer: self.outbound_buffer.max(1),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.into_config()?;
    let server = RelayServer::bind(config).await?;

    info!(addr = %server.local_addr()?, "wsrelayd starting");

    server.run_until(shutdown_signal()).await?;

    info!("wsrelayd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_overrides_bind() {
        let args = Args::parse_from(["wsrelayd", "--bind", "127.0.0.1:9000", "--port", "9100"]);
        let config = args.into_config().unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9100".parse().unwrap());
    }

    #[test]
    fn test_rejects_bad_bind() {
        let args = Args::parse_from(["wsrelayd", "--bind", "nope"]);
        assert!(args.into_config().is_err());
    }

    #[test]
    fn test_keepalive_interval() {
        let args = Args::parse_from(["wsrelayd", "--keepalive-secs", "5"]);
        let config = args.into_config().unwrap();
        assert_eq!(config.keepalive_interval, Duration::from_secs(5));

        let args = Args::parse_from(["wsrelayd", "--keepalive-secs", "0"]);
        assert!(args.into_config().is_err());
    }
}
