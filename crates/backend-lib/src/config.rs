// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Which store backend to run against, selected at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store; state dies with the process.
    Memory,
    /// Flat-file store under `data_dir`; state survives restarts up to TTL.
    File,
}

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Data directory for the file store
    pub data_dir: PathBuf,
    /// Log filter directive
    pub log_level: String,
    /// Session idle TTL in seconds, refreshed on reconnect only
    pub session_ttl_secs: u64,
    /// Room idle TTL in seconds, refreshed on creation and round restart only
    pub room_ttl_secs: u64,
    /// Store backend
    pub store: StoreBackend,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3002".parse().expect("static addr"),
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            session_ttl_secs: 6 * 60 * 60,
            room_ttl_secs: 3 * 60 * 60,
            store: StoreBackend::Memory,
        }
    }
}

impl Settings {
    /// Load settings: defaults, overridden by `config.toml`, overridden by
    /// `QUIZROOM_`-prefixed environment variables.
    pub fn load() -> Result<Self> {
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("QUIZROOM_"))
            .extract()?;
        Ok(settings)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn room_ttl(&self) -> Duration {
        Duration::from_secs(self.room_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttls() {
        let settings = Settings::default();
        assert_eq!(settings.session_ttl(), Duration::from_secs(6 * 60 * 60));
        assert_eq!(settings.room_ttl(), Duration::from_secs(3 * 60 * 60));
        assert_eq!(settings.store, StoreBackend::Memory);
    }

    #[test]
    fn test_store_backend_parses_lowercase() {
        let backend: StoreBackend = serde_json::from_str("\"file\"").unwrap();
        assert_eq!(backend, StoreBackend::File);
    }
}
