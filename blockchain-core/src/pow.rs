//! Proof-of-Work engine.
//!
//! The search walks nonces upward from 0 until the block hash starts with
//! `difficulty` zero hex digits. Every `check_interval` attempts it publishes
//! counters to [`MiningStats`] and asks the caller whether to abort, which is
//! how a search against a stale tip gets cancelled.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::{Block, block::meets_difficulty};

pub const DEFAULT_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MiningError {
    #[error("nonce space exhausted after {attempts} attempts")]
    NonceSpaceExhausted { attempts: u64 },
    #[error("mining cancelled")]
    Cancelled,
}

/// Counters for the current search. Reset at the start of each session.
#[derive(Debug, Default)]
pub struct MiningStats {
    nonce_attempts: AtomicU64,
    // f64 bits
    hash_rate: AtomicU64,
}

impl MiningStats {
    pub fn reset(&self) {
        self.nonce_attempts.store(0, Ordering::Relaxed);
        self.hash_rate.store(0f64.to_bits(), Ordering::Relaxed);
    }

    fn record(&self, attempts: u64, elapsed: Duration) {
        self.nonce_attempts.store(attempts, Ordering::Relaxed);
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { attempts as f64 / secs } else { 0.0 };
        self.hash_rate.store(rate.to_bits(), Ordering::Relaxed);
    }

    pub fn nonce_attempts(&self) -> u64 {
        self.nonce_attempts.load(Ordering::Relaxed)
    }

    /// Hashes per second over the current (or last) session.
    pub fn hash_rate(&self) -> f64 {
        f64::from_bits(self.hash_rate.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProofOfWork {
    difficulty: u32,
    check_interval: u64,
}

impl ProofOfWork {
    pub fn new(difficulty: u32, check_interval: u64) -> Self {
        Self {
            difficulty,
            check_interval: check_interval.max(1),
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Search the whole `u64` nonce space.
    pub fn seal<F>(&self, template: Block, should_abort: F, stats: &MiningStats) -> Result<Block, MiningError>
    where
        F: Fn() -> bool,
    {
        self.seal_within(template, u64::MAX, should_abort, stats)
    }

    /// Search nonces `0..=max_nonce`.
    pub fn seal_within<F>(
        &self,
        mut block: Block,
        max_nonce: u64,
        should_abort: F,
        stats: &MiningStats,
    ) -> Result<Block, MiningError>
    where
        F: Fn() -> bool,
    {
        block.difficulty = self.difficulty;
        block.nonce = 0;
        let (head, tail) = block.preimage_parts();

        let start = Instant::now();
        let mut last_report = start;
        let mut attempts: u64 = 0;
        loop {
            let mut hasher = Sha256::new();
            hasher.update(head.as_bytes());
            hasher.update(block.nonce.to_string().as_bytes());
            hasher.update(tail.as_bytes());
            let hash = hex::encode(hasher.finalize());
            attempts += 1;

            if meets_difficulty(&hash, self.difficulty) {
                block.hash = hash;
                stats.record(attempts, start.elapsed());
                return Ok(block);
            }

            if attempts % self.check_interval == 0 {
                stats.record(attempts, start.elapsed());
                if should_abort() {
                    debug!(height = block.index, attempts, "search aborted");
                    return Err(MiningError::Cancelled);
                }
                let now = Instant::now();
                if now.duration_since(last_report) >= Duration::from_secs(1) {
                    debug!(
                        height = block.index,
                        target_zeros = self.difficulty,
                        hashrate = stats.hash_rate(),
                        nonce = block.nonce,
                        "mining"
                    );
                    last_report = now;
                }
            }

            if block.nonce == max_nonce {
                stats.record(attempts, start.elapsed());
                return Err(MiningError::NonceSpaceExhausted { attempts });
            }
            block.nonce += 1;
        }
    }
}
