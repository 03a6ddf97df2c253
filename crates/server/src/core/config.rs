//! Chat server configuration

use std::path::PathBuf;
use std::sync::Arc;

use crate::chat::presence::PresenceRegistry;
use crate::core::auth::AuthManager;
use crate::core::store::MessageStore;

/// Configuration for the chat server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port the HTTP/WebSocket listener binds to
    pub port: u16,
    /// Directory holding the SQLite database
    pub data_dir: PathBuf,
    /// Session lifetime in days
    pub session_ttl_days: i64,
    /// Capacity of each connection's outbound event queue
    pub outbound_queue_capacity: usize,
    /// Max request body size in bytes
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            data_dir: PathBuf::from("chat_data"),
            session_ttl_days: 30,
            outbound_queue_capacity: 64,
            max_body_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl ServerConfig {
    /// Build config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_or("PORT", defaults.port),
            data_dir: std::env::var("CHAT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            session_ttl_days: env_or("SESSION_TTL_DAYS", defaults.session_ttl_days),
            outbound_queue_capacity: env_or(
                "OUTBOUND_QUEUE_CAPACITY",
                defaults.outbound_queue_capacity,
            )
            .max(1),
            max_body_bytes: env_or("MAX_BODY_BYTES", defaults.max_body_bytes),
        }
    }

    /// Create config with custom base directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Path of the SQLite database file
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chat.sqlite")
    }

    /// Ensure all directories exist
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub auth: Arc<AuthManager>,
    pub messages: Arc<MessageStore>,
    pub presence: Arc<PresenceRegistry>,
}
