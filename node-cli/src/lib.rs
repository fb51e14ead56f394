//! ChainLite node: a proof-of-work ledger served over HTTP, kept in sync
//! with peers by longest-valid-chain consensus.

pub mod api;
pub mod cli;
pub mod config;
pub mod consensus;
pub mod errors;
pub mod explorer;
pub mod ledger;
pub mod logging;
pub mod mempool;
pub mod miner;
pub mod node;
pub mod p2p;
pub mod peers;
pub mod signature;
pub mod storage;

pub use config::NodeConfig;
pub use errors::NodeError;
pub use node::Node;
