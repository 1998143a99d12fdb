//! Server configuration
//!
//! Settings come from a JSON file; any field missing from the file takes its
//! default, and a missing file is created with every default written out.
//! Command-line flags are applied on top by the binary.

use crate::error::ServerError;
use log::info;
use serde::{Deserialize, Serialize};
use shared::{DEFAULT_MAX_PAYLOAD, DEFAULT_MULTICAST_GROUP, DEFAULT_MULTICAST_PORT, DEFAULT_TCP_PORT};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "HotelierServer/server_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub tcp_port: u16,
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    pub multicast_ttl: u32,
    pub ranking_interval_secs: u64,
    /// Upper bound on concurrently running request handlers.
    pub worker_threads: usize,
    pub data_dir: PathBuf,
    /// Divide the score of hotels rated below 2 by ten.
    pub low_rate_penalty: bool,
    pub max_payload: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            tcp_port: DEFAULT_TCP_PORT,
            multicast_group: DEFAULT_MULTICAST_GROUP
                .parse()
                .unwrap_or(Ipv4Addr::new(230, 0, 0, 0)),
            multicast_port: DEFAULT_MULTICAST_PORT,
            multicast_ttl: 1,
            ranking_interval_secs: 10,
            worker_threads: 8,
            data_dir: PathBuf::from("HotelierServer"),
            low_rate_penalty: false,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ServerConfig {
    /// Reads the configuration at `path`, writing a default file there first
    /// if none exists.
    pub fn load_or_create(path: &Path) -> Result<Self, ServerError> {
        if !path.exists() {
            let config = ServerConfig::default();
            config.save(path)?;
            info!("Wrote default configuration to {}", path.display());
            return Ok(config);
        }

        let text = fs::read_to_string(path)?;
        let config: ServerConfig = serde_json::from_str(&text).map_err(|e| ServerError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ServerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(self).map_err(|e| ServerError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        fs::write(path, text)?;
        Ok(())
    }

    fn validate(&self, path: &Path) -> Result<(), ServerError> {
        let invalid = |message: &str| {
            Err(ServerError::Config {
                path: path.to_path_buf(),
                message: message.to_string(),
            })
        };

        if self.ranking_interval_secs == 0 {
            return invalid("ranking_interval_secs must be positive");
        }
        if self.worker_threads == 0 {
            return invalid("worker_threads must be positive");
        }
        if !self.multicast_group.is_multicast() {
            return invalid("multicast_group is not a multicast address");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }

    pub fn ranking_interval(&self) -> Duration {
        Duration::from_secs(self.ranking_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.tcp_port, 4316);
        assert_eq!(config.multicast_group, Ipv4Addr::new(230, 0, 0, 0));
        assert_eq!(config.multicast_port, 49152);
        assert_eq!(config.ranking_interval(), Duration::from_secs(10));
        assert!(!config.low_rate_penalty);
        assert_eq!(config.listen_addr(), "127.0.0.1:4316");
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("server_config.json");

        let config = ServerConfig::load_or_create(&path).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert!(path.exists());

        let reloaded = ServerConfig::load_or_create(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server_config.json");
        fs::write(&path, r#"{ "tcp_port": 5000, "low_rate_penalty": true }"#).unwrap();

        let config = ServerConfig::load_or_create(&path).unwrap();
        assert_eq!(config.tcp_port, 5000);
        assert!(config.low_rate_penalty);
        assert_eq!(config.worker_threads, 8);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server_config.json");

        fs::write(&path, r#"{ "ranking_interval_secs": 0 }"#).unwrap();
        assert!(matches!(
            ServerConfig::load_or_create(&path),
            Err(ServerError::Config { .. })
        ));

        fs::write(&path, r#"{ "multicast_group": "10.0.0.1" }"#).unwrap();
        assert!(ServerConfig::load_or_create(&path).is_err());

        fs::write(&path, "not json").unwrap();
        assert!(ServerConfig::load_or_create(&path).is_err());
    }
}
