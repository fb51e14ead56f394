//! Command line for the node binary. A TOML file, when given, is the base;
//! flags and `CHAINLITE_*` env vars override it.

use std::path::PathBuf;

use clap::Parser;

use crate::{
    config::{LogFormat, NodeConfig, SignatureMode},
    errors::NodeError,
};

#[derive(Debug, Parser)]
#[command(name = "chainlite-node", version, about = "ChainLite proof-of-work node")]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "CHAINLITE_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "CHAINLITE_BIND_ADDR")]
    pub bind_addr: Option<String>,

    #[arg(long, short, env = "CHAINLITE_PORT")]
    pub port: Option<u16>,

    /// URL peers use to reach this node.
    #[arg(long, env = "CHAINLITE_PUBLIC_URL")]
    pub public_url: Option<String>,

    #[arg(long, env = "CHAINLITE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Keep chain and peers in memory only.
    #[arg(long, env = "CHAINLITE_NO_PERSIST")]
    pub no_persist: bool,

    /// Leading zero hex digits a block hash needs.
    #[arg(long, env = "CHAINLITE_DIFFICULTY")]
    pub difficulty: Option<u32>,

    #[arg(long, env = "CHAINLITE_MINING_REWARD")]
    pub mining_reward: Option<u64>,

    #[arg(long, value_enum, env = "CHAINLITE_SIGNATURE_MODE")]
    pub signature_mode: Option<SignatureMode>,

    #[arg(long, env = "CHAINLITE_PEER_TIMEOUT_MS")]
    pub peer_timeout_ms: Option<u64>,

    /// Seconds between automatic consensus rounds (0 = off).
    #[arg(long, env = "CHAINLITE_RESOLVE_INTERVAL")]
    pub resolve_interval_secs: Option<u64>,

    /// Do not announce mined blocks to peers.
    #[arg(long, env = "CHAINLITE_NO_BROADCAST")]
    pub no_broadcast: bool,

    /// Comma separated peer URLs registered at startup.
    #[arg(long, env = "CHAINLITE_BOOTSTRAP_PEERS", value_delimiter = ',')]
    pub bootstrap_peers: Vec<String>,

    #[arg(long, env = "CHAINLITE_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, value_enum, env = "CHAINLITE_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    pub fn into_config(self) -> Result<NodeConfig, NodeError> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_toml_file(path)?,
            None => NodeConfig::default(),
        };

        if let Some(v) = self.bind_addr {
            config.bind_addr = v;
        }
        if let Some(v) = self.port {
            config.port = v;
        }
        if self.public_url.is_some() {
            config.public_url = self.public_url;
        }
        if let Some(v) = self.data_dir {
            config.data_dir = v;
        }
        if self.no_persist {
            config.persist = false;
        }
        if let Some(v) = self.difficulty {
            config.difficulty = v;
        }
        if let Some(v) = self.mining_reward {
            config.mining_reward = v;
        }
        if let Some(v) = self.signature_mode {
            config.signature_mode = v;
        }
        if let Some(v) = self.peer_timeout_ms {
            config.peer_timeout_ms = v;
        }
        if let Some(v) = self.resolve_interval_secs {
            config.resolve_interval_secs = v;
        }
        if self.no_broadcast {
            config.broadcast_blocks = false;
        }
        if !self.bootstrap_peers.is_empty() {
            config.bootstrap_peers = self.bootstrap_peers;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
        if let Some(v) = self.log_format {
            config.log_format = v;
        }

        if config.difficulty > 64 {
            return Err(NodeError::Config(format!(
                "difficulty {} exceeds the 64 hex digits of a sha256 hash",
                config.difficulty
            )));
        }
        if config.mining_reward == 0 {
            return Err(NodeError::Config("mining_reward must be positive".to_string()));
        }
        Ok(config)
    }
}
