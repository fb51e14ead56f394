//! Unconfirmed transactions awaiting a block.
//!
//! Insertion order is the order transactions are offered to the miner.
//! `drain` only snapshots; entries leave the pool once the ledger accepts a
//! block containing them, so an aborted search loses nothing.

use std::{collections::HashSet, sync::Arc};

use chainlite_core::{COINBASE_SENDER, Transaction, TransactionRequest, now_millis};
use serde_json::Number;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::signature::{SignatureError, SignatureVerifier};

const MAX_ADDRESS_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("transaction already exists: {0}")]
    Duplicate(String),
}

#[derive(Debug)]
pub struct Mempool {
    pending: Mutex<Vec<Transaction>>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl Mempool {
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            verifier,
        }
    }

    /// Turn a client request into a hashed transaction, or say why not.
    pub fn validate(&self, req: TransactionRequest) -> Result<Transaction, PoolError> {
        let amount = parse_amount(&req.amount)?;
        check_address("sender", &req.sender)?;
        check_address("recipient", &req.recipient)?;
        if req.sender == COINBASE_SENDER {
            return Err(PoolError::InvalidAddress(
                "sender is reserved for mining rewards".to_string(),
            ));
        }

        let mut tx = Transaction {
            sender: req.sender,
            recipient: req.recipient,
            amount,
            timestamp: req.timestamp.unwrap_or_else(now_millis),
            signature: req.signature,
            public_key: req.public_key.filter(|k| !k.is_empty()),
            hash: String::new(),
            block_index: None,
        };
        self.verifier.verify(&tx)?;
        tx.hash = tx.compute_hash();
        Ok(tx)
    }

    pub async fn submit(&self, req: TransactionRequest) -> Result<Transaction, PoolError> {
        let tx = self.validate(req)?;
        self.insert(tx).await
    }

    /// Queue an already validated transaction.
    pub async fn insert(&self, tx: Transaction) -> Result<Transaction, PoolError> {
        let mut pending = self.pending.lock().await;
        if pending.iter().any(|p| p.hash == tx.hash) {
            return Err(PoolError::Duplicate(tx.hash));
        }
        pending.push(tx.clone());
        info!(
            hash = %tx.hash,
            sender = %tx.sender,
            recipient = %tx.recipient,
            amount = tx.amount,
            pending = pending.len(),
            "transaction accepted"
        );
        Ok(tx)
    }

    /// Snapshot of every pending transaction, oldest first.
    pub async fn drain(&self) -> Vec<Transaction> {
        self.pending.lock().await.clone()
    }

    /// Drop transactions whose hash is in `included`. Returns how many left.
    pub async fn remove(&self, included: &HashSet<String>) -> usize {
        if included.is_empty() {
            return 0;
        }
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|tx| !included.contains(&tx.hash));
        let removed = before - pending.len();
        if removed > 0 {
            debug!(removed, remaining = pending.len(), "pruned mempool");
        }
        removed
    }

    pub async fn find(&self, hash: &str) -> Option<Transaction> {
        self.pending
            .lock()
            .await
            .iter()
            .find(|tx| tx.hash == hash)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}

/// Whole positive units. Integers are taken exactly; a float is accepted
/// only when it is integral and fits.
fn parse_amount(amount: &Number) -> Result<u64, PoolError> {
    if let Some(units) = amount.as_u64() {
        if units == 0 {
            return Err(PoolError::InvalidAmount(
                "amount must be positive, got 0".to_string(),
            ));
        }
        return Ok(units);
    }
    if amount.is_i64() {
        return Err(PoolError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    let value = amount.as_f64().unwrap_or(f64::NAN);
    if !value.is_finite() || value <= 0.0 {
        return Err(PoolError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    if value.fract() != 0.0 || value >= u64::MAX as f64 {
        return Err(PoolError::InvalidAmount(format!(
            "amount must be a whole number of units, got {amount}"
        )));
    }
    Ok(value as u64)
}

pub(crate) fn check_address(field: &str, address: &str) -> Result<(), PoolError> {
    let well_formed = !address.is_empty()
        && address.len() <= MAX_ADDRESS_LEN
        && address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if well_formed {
        Ok(())
    } else {
        Err(PoolError::InvalidAddress(format!(
            "{field} {address:?} is not a valid address"
        )))
    }
}
