use serde::{Deserialize, Serialize};

/// Listener and transport tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Per-session outbound queue depth. A session whose queue is full is
    /// treated as dead.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    /// A session with no pong for this long is swept by the cleanup task.
    pub client_timeout_secs: u64,
    /// Sockets that never send a valid `join` are closed after this long.
    pub join_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
            join_timeout_secs: 30,
        }
    }
}

/// Persistence location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// SQLite database file. `~` is expanded against `$HOME`.
    pub path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: "~/.tandem/tandem.db".to_string(),
        }
    }
}

impl StoreSettings {
    pub fn resolved_path(&self) -> std::path::PathBuf {
        match self.path.strip_prefix("~/") {
            Some(rest) => crate::loader::home_dir().join(rest),
            None => std::path::PathBuf::from(&self.path),
        }
    }
}
