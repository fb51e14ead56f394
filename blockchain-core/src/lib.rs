//! Chain data model shared by the ChainLite node and wallet.
//!
//! Blocks and transactions hash over a canonical `|`-joined preimage with
//! SHA-256; the Proof-of-Work engine searches nonces until the block hash
//! carries the required number of leading zero hex digits.

use chrono::Utc;

pub mod block;
pub mod crypto;
pub mod pow;
pub mod transaction;

pub use block::{Block, BlockRef};
pub use crypto::{CryptoError, pubkey_to_address};
pub use pow::{MiningError, MiningStats, ProofOfWork};
pub use transaction::{Transaction, TransactionRequest};

pub const DEFAULT_DIFFICULTY_ZEROS: u32 = 4;
pub const DEFAULT_MINING_REWARD: u64 = 50;
pub const GENESIS_TIMESTAMP: i64 = 1_735_689_600_000; // 2025-01-01 00:00:00 UTC, millis
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Sender used by coinbase (mining reward) transactions.
pub const COINBASE_SENDER: &str = "0";
pub const COINBASE_SIGNATURE: &str = "reward";

/// Milliseconds since the Unix epoch. All timestamps in the chain use this unit.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn sha256_hex(input: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(input))
}
