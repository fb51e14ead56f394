//! The canonical chain.
//!
//! Readers take an `Arc` snapshot and never see a chain mid-replacement:
//! `append` copies on write when a snapshot is still alive and `replace`
//! swaps the whole reference. Every accepted change bumps a version counter
//! that in-flight mining searches poll to detect a stale tip. Disk writes
//! happen after the chain lock is released, newest version wins.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chainlite_core::{Block, COINBASE_SENDER, GENESIS_PREVIOUS_HASH};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::{
    errors::NodeError, mempool::Mempool, signature::SignatureVerifier, storage::DataStore,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("block {index} does not extend the chain: {reason}")]
    InvalidLinkage { index: u64, reason: String },
    #[error("block {index} has invalid proof-of-work: {reason}")]
    InvalidProofOfWork { index: u64, reason: String },
    #[error("block {index} is malformed: {reason}")]
    InvalidBlock { index: u64, reason: String },
    #[error("candidate chain is invalid: {0}")]
    InvalidChain(String),
    #[error("candidate chain of length {candidate} is not longer than local chain of length {local}")]
    NotLonger { candidate: usize, local: usize },
}

/// What every block after genesis must satisfy, wherever it came from.
#[derive(Debug, Clone)]
pub struct ChainRules {
    pub min_difficulty: u32,
    /// Exact amount of the reward transaction.
    pub reward: u64,
    pub verifier: Arc<dyn SignatureVerifier>,
}

#[derive(Debug)]
pub struct Ledger {
    chain: RwLock<Arc<Vec<Block>>>,
    version: Arc<AtomicU64>,
    rules: ChainRules,
    mempool: Arc<Mempool>,
    store: Option<DataStore>,
    // highest version written to disk
    persisted: Mutex<u64>,
}

impl Ledger {
    /// Fresh ledger holding only the genesis block.
    pub fn new(rules: ChainRules, mempool: Arc<Mempool>, store: Option<DataStore>) -> Self {
        Self {
            chain: RwLock::new(Arc::new(vec![Block::genesis()])),
            version: Arc::new(AtomicU64::new(0)),
            rules,
            mempool,
            store,
            persisted: Mutex::new(0),
        }
    }

    /// Restore from `store` if a chain was persisted. A persisted chain that
    /// fails validation halts startup.
    pub fn open(
        rules: ChainRules,
        mempool: Arc<Mempool>,
        store: Option<DataStore>,
    ) -> Result<Self, NodeError> {
        let chain = match &store {
            None => vec![Block::genesis()],
            Some(store) => match store.load_chain()? {
                Some(chain) => {
                    check_chain(&chain, &rules)
                        .map_err(|e| NodeError::CorruptLedger(e.to_string()))?;
                    info!(height = chain.len(), dir = %store.dir().display(), "restored chain");
                    chain
                }
                None => {
                    let chain = vec![Block::genesis()];
                    store.save_chain(&chain)?;
                    info!(dir = %store.dir().display(), "initialized chain with genesis");
                    chain
                }
            },
        };
        Ok(Self {
            chain: RwLock::new(Arc::new(chain)),
            version: Arc::new(AtomicU64::new(0)),
            rules,
            mempool,
            store,
            persisted: Mutex::new(0),
        })
    }

    pub fn difficulty(&self) -> u32 {
        self.rules.min_difficulty
    }

    /// Bumped on every append or replace.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Shared counter for code that cannot await the lock (the PoW search).
    pub fn version_handle(&self) -> Arc<AtomicU64> {
        self.version.clone()
    }

    pub async fn snapshot(&self) -> Arc<Vec<Block>> {
        self.chain.read().await.clone()
    }

    /// Tip and the version it belongs to, read together.
    pub async fn tip_with_version(&self) -> (Block, u64) {
        let chain = self.chain.read().await;
        let tip = chain.last().cloned().unwrap_or_else(Block::genesis);
        (tip, self.version())
    }

    pub async fn tip(&self) -> Block {
        self.tip_with_version().await.0
    }

    pub async fn len(&self) -> usize {
        self.chain.read().await.len()
    }

    /// Append a block that extends the current tip.
    pub async fn append(&self, block: Block) -> Result<(), LedgerError> {
        let mut guard = self.chain.write().await;
        let tip = guard.last().cloned().unwrap_or_else(Block::genesis);
        check_successor(&tip, &block, &self.rules)?;
        if let Some(dup) = block
            .transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .find(|tx| contains_transaction(&guard, &tx.hash))
        {
            return Err(LedgerError::InvalidBlock {
                index: block.index,
                reason: format!("transaction {} is already confirmed", dup.hash),
            });
        }

        let included: HashSet<String> = block.transactions.iter().map(|tx| tx.hash.clone()).collect();
        info!(
            height = block.index,
            hash = %block.hash,
            txs = block.transactions.len(),
            "block appended"
        );
        Arc::make_mut(&mut guard).push(block);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        self.mempool.remove(&included).await;
        let snapshot = guard.clone();
        drop(guard);
        self.persist(snapshot, version).await;
        Ok(())
    }

    /// Walk `candidate` from genesis; false on the first bad block.
    pub fn validate_chain(&self, candidate: &[Block]) -> bool {
        match self.check_chain(candidate) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "candidate chain rejected");
                false
            }
        }
    }

    /// Same walk as [`Ledger::validate_chain`], reporting the reason.
    pub fn check_chain(&self, candidate: &[Block]) -> Result<(), LedgerError> {
        check_chain(candidate, &self.rules)
    }

    /// Swap in `candidate` if it is valid and strictly longer.
    pub async fn replace(&self, candidate: Vec<Block>) -> Result<(), LedgerError> {
        self.check_chain(&candidate)?;
        let mut guard = self.chain.write().await;
        if candidate.len() <= guard.len() {
            return Err(LedgerError::NotLonger {
                candidate: candidate.len(),
                local: guard.len(),
            });
        }

        let confirmed: HashSet<String> = candidate
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.hash.clone()))
            .collect();
        info!(
            old_height = guard.len(),
            new_height = candidate.len(),
            "chain replaced"
        );
        *guard = Arc::new(candidate);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        self.mempool.remove(&confirmed).await;
        let snapshot = guard.clone();
        drop(guard);
        self.persist(snapshot, version).await;
        Ok(())
    }

    /// Write `chain` unless a newer version already reached disk. Failures
    /// are logged; the in-memory chain stands.
    async fn persist(&self, chain: Arc<Vec<Block>>, version: u64) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let mut persisted = self.persisted.lock().await;
        if version <= *persisted {
            return;
        }
        match tokio::task::spawn_blocking(move || store.save_chain(&chain)).await {
            Ok(Ok(())) => *persisted = version,
            Ok(Err(e)) => error!(error = %e, version, "failed to persist chain"),
            Err(e) => error!(error = %e, version, "chain persistence task failed"),
        }
    }
}

/// Walk from genesis: linkage, hash integrity, proof-of-work, transaction
/// shape, and no transaction confirmed twice.
fn check_chain(candidate: &[Block], rules: &ChainRules) -> Result<(), LedgerError> {
    let Some(genesis) = candidate.first() else {
        return Err(LedgerError::InvalidChain("chain is empty".to_string()));
    };
    check_genesis(genesis)?;

    let mut seen = HashSet::new();
    for pair in candidate.windows(2) {
        let (prev, block) = (&pair[0], &pair[1]);
        check_successor(prev, block, rules)
            .map_err(|e| LedgerError::InvalidChain(e.to_string()))?;
        for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            if !seen.insert(tx.hash.as_str()) {
                return Err(LedgerError::InvalidChain(format!(
                    "transaction {} appears twice",
                    tx.hash
                )));
            }
        }
    }
    Ok(())
}

fn check_successor(prev: &Block, block: &Block, rules: &ChainRules) -> Result<(), LedgerError> {
    let index = block.index;
    let min_difficulty = rules.min_difficulty;
    if block.index != prev.index + 1 {
        return Err(LedgerError::InvalidLinkage {
            index,
            reason: format!("expected index {}", prev.index + 1),
        });
    }
    if block.previous_hash != prev.hash {
        return Err(LedgerError::InvalidLinkage {
            index,
            reason: format!("previous_hash {} != {}", block.previous_hash, prev.hash),
        });
    }
    if !block.hash_is_intact() {
        return Err(LedgerError::InvalidProofOfWork {
            index,
            reason: "hash does not match block contents".to_string(),
        });
    }
    if block.difficulty < min_difficulty {
        return Err(LedgerError::InvalidProofOfWork {
            index,
            reason: format!(
                "difficulty {} below required {}",
                block.difficulty, min_difficulty
            ),
        });
    }
    if !block.has_valid_proof() {
        return Err(LedgerError::InvalidProofOfWork {
            index,
            reason: format!("hash {} misses difficulty {}", block.hash, block.difficulty),
        });
    }
    check_transactions(block, rules)
}

fn contains_transaction(chain: &[Block], hash: &str) -> bool {
    chain
        .iter()
        .any(|b| b.transactions.iter().any(|tx| tx.hash == hash))
}

fn check_genesis(block: &Block) -> Result<(), LedgerError> {
    let bad = |reason: &str| LedgerError::InvalidChain(format!("genesis: {reason}"));
    if block.index != 0 {
        return Err(bad("index is not 0"));
    }
    if block.previous_hash != GENESIS_PREVIOUS_HASH {
        return Err(bad("previous_hash is not the sentinel"));
    }
    if !block.transactions.is_empty() {
        return Err(bad("carries transactions"));
    }
    if !block.hash_is_intact() {
        return Err(bad("hash does not match contents"));
    }
    Ok(())
}

/// Exactly one coinbase, last, paying the configured reward. Every transfer
/// is positive, correctly hashed and signed by its sender.
fn check_transactions(block: &Block, rules: &ChainRules) -> Result<(), LedgerError> {
    let bad = |reason: String| LedgerError::InvalidBlock {
        index: block.index,
        reason,
    };
    let coinbase_count = block.transactions.iter().filter(|tx| tx.is_coinbase()).count();
    if coinbase_count != 1 || !block.transactions.last().is_some_and(|tx| tx.is_coinbase()) {
        return Err(bad(format!(
            "expected a single trailing reward transaction, found {coinbase_count}"
        )));
    }
    for tx in &block.transactions {
        if tx.is_coinbase() {
            if tx.amount != rules.reward {
                return Err(bad(format!(
                    "reward of {} differs from the required {}",
                    tx.amount, rules.reward
                )));
            }
        } else if tx.sender == COINBASE_SENDER {
            return Err(bad(format!("transaction {} uses the reward sender", tx.hash)));
        } else if let Err(e) = rules.verifier.verify(tx) {
            return Err(bad(format!("transaction {} has a bad signature: {e}", tx.hash)));
        }
        if tx.amount == 0 {
            return Err(bad(format!("transaction {} has zero amount", tx.hash)));
        }
        if tx.hash != tx.compute_hash() {
            return Err(bad(format!("transaction hash {} does not match contents", tx.hash)));
        }
        if tx.block_index != Some(block.index) {
            return Err(bad(format!("transaction {} has wrong block_index", tx.hash)));
        }
    }
    Ok(())
}
