//! Node configuration with TOML file support.

use std::{path::PathBuf, time::Duration};

use chainlite_core::{DEFAULT_DIFFICULTY_ZEROS, DEFAULT_MINING_REWARD, pow::DEFAULT_CHECK_INTERVAL};
use serde::{Deserialize, Serialize};

use crate::errors::NodeError;

/// How incoming transaction signatures are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SignatureMode {
    /// ECDSA over secp256k1; `public_key` must derive `sender`.
    Secp256k1,
    /// Only require a non-empty signature string.
    Presence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// This node's own URL as peers see it. Never admitted to the peer set.
    #[serde(default)]
    pub public_url: Option<String>,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Save chain and peers under `data_dir`.
    #[serde(default = "default_true")]
    pub persist: bool,

    /// Required leading zero hex digits.
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,

    #[serde(default = "default_mining_reward")]
    pub mining_reward: u64,

    #[serde(default = "default_signature_mode")]
    pub signature_mode: SignatureMode,

    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,

    /// Periodic consensus; 0 disables it.
    #[serde(default)]
    pub resolve_interval_secs: u64,

    #[serde(default = "default_true")]
    pub broadcast_blocks: bool,

    /// Nonce attempts between cancellation checks.
    #[serde(default = "default_cancel_check_interval")]
    pub cancel_check_interval: u64,

    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_true() -> bool {
    true
}

fn default_difficulty() -> u32 {
    DEFAULT_DIFFICULTY_ZEROS
}

fn default_mining_reward() -> u64 {
    DEFAULT_MINING_REWARD
}

fn default_signature_mode() -> SignatureMode {
    SignatureMode::Secp256k1
}

fn default_peer_timeout_ms() -> u64 {
    5000
}

fn default_cancel_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Human
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            public_url: None,
            data_dir: default_data_dir(),
            persist: true,
            difficulty: default_difficulty(),
            mining_reward: default_mining_reward(),
            signature_mode: default_signature_mode(),
            peer_timeout_ms: default_peer_timeout_ms(),
            resolve_interval_secs: 0,
            broadcast_blocks: true,
            cancel_check_interval: default_cancel_check_interval(),
            bootstrap_peers: Vec::new(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl NodeConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, NodeError> {
        toml::from_str(contents).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn from_toml_file(path: &std::path::Path) -> Result<Self, NodeError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// In-memory node for tests and demos: no persistence, no broadcast.
    pub fn ephemeral(difficulty: u32) -> Self {
        Self {
            persist: false,
            broadcast_blocks: false,
            difficulty,
            cancel_check_interval: 64,
            ..Self::default()
        }
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let cfg = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.difficulty, DEFAULT_DIFFICULTY_ZEROS);
        assert_eq!(cfg.signature_mode, SignatureMode::Secp256k1);
        assert!(cfg.persist);
        assert_eq!(cfg.resolve_interval_secs, 0);
    }

    #[test]
    fn toml_overrides() {
        let cfg = NodeConfig::from_toml_str(
            r#"
            port = 6001
            difficulty = 2
            signature_mode = "presence"
            log_format = "json"
            bootstrap_peers = ["http://10.0.0.2:5000"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.port, 6001);
        assert_eq!(cfg.difficulty, 2);
        assert_eq!(cfg.signature_mode, SignatureMode::Presence);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.bootstrap_peers.len(), 1);
    }

    #[test]
    fn bad_toml_is_config_error() {
        assert!(matches!(
            NodeConfig::from_toml_str("port = \"nope\""),
            Err(NodeError::Config(_))
        ));
    }
}
