//! # kestrel-server
//!
//! Real-time presence and chat-notification server for the Kestrel
//! helpdesk.
//!
//! This binary provides:
//! - a **WebSocket endpoint** clients connect to with a resolved identity
//! - an in-memory **presence registry** of online/idle users and their
//!   live connections
//! - a **fan-out dispatcher** routing events to the right subset of
//!   connections, with group-based visibility filtering for non-privileged
//!   users
//! - a **conversation-notification pipeline** reconciling persisted
//!   conversation state against live delivery
//! - a small **REST surface** (axum) for health checks and instance info

mod api;
mod config;
mod conversations;
mod error;
mod relay;
mod server;
mod session;
mod state;
mod visibility;

#[cfg(test)]
mod test_util;

use tracing::info;
use tracing_subscriber::EnvFilter;

use kestrel_store::Database;

use crate::config::ServerConfig;
use crate::server::ChatServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,kestrel_server=debug")),
        )
        .init();

    info!("Starting Kestrel chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store and build the shared server state
    // -----------------------------------------------------------------------
    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    let http_addr = config.http_addr;
    let refresh_interval_secs = config.refresh_interval_secs;
    let server = ChatServer::new(db, config);

    // -----------------------------------------------------------------------
    // 4. Spawn the periodic refresh loop
    // -----------------------------------------------------------------------
    // Pushes the online list, presence bubbles and conversation
    // notifications to every connection even when no event triggered them.
    let refresh = server.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(refresh_interval_secs));
        loop {
            interval.tick().await;
            refresh.refresh().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(server, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
