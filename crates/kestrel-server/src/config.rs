//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8118`
    pub http_addr: SocketAddr,

    /// Explicit path for the SQLite database file.  When unset, the
    /// platform data directory is used.
    /// Env: `DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Kestrel Helpdesk"`
    pub instance_name: String,

    /// Interval of the periodic presence/notification refresh loop.
    /// Env: `REFRESH_INTERVAL_SECS`
    /// Default: `60`
    pub refresh_interval_secs: u64,

    /// How many recent conversations the notification pipeline loads.
    /// Env: `CONVERSATION_LIMIT`
    /// Default: `10`
    pub conversation_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8118).into(),
            db_path: None,
            instance_name: "Kestrel Helpdesk".to_string(),
            refresh_interval_secs: 60,
            conversation_limit: 10,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Ok(val) = std::env::var("REFRESH_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.refresh_interval_secs = secs;
            } else {
                tracing::warn!(value = %val, "Invalid REFRESH_INTERVAL_SECS, using default");
            }
        }

        if let Ok(val) = std::env::var("CONVERSATION_LIMIT") {
            if let Ok(limit) = val.parse::<u32>() {
                config.conversation_limit = limit;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8118).into());
        assert_eq!(config.conversation_limit, 10);
        assert!(config.db_path.is_none());
    }
}
