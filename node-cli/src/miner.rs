//! Mining sessions.
//!
//! One search at a time per node. A session runs in its own task, so a
//! caller that stops waiting does not end it, and the nonce search runs on
//! the blocking pool so request handlers (including `/mining/status`) stay
//! responsive. When the ledger version moves past the tip a search started
//! from, the session rebuilds its candidate on the new tip and searches
//! again. Only [`Miner::cancel`] ends a session early.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use chainlite_core::{
    Block, BlockRef, MiningError, MiningStats, ProofOfWork, Transaction, block::target_prefix,
    now_millis,
};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    ledger::{Ledger, LedgerError},
    mempool::{Mempool, check_address},
};

#[derive(Debug, Error)]
pub enum MinerError {
    #[error("mining already in progress")]
    AlreadyInProgress,
    #[error("invalid miner address: {0}")]
    InvalidAddress(String),
    #[error(transparent)]
    Search(#[from] MiningError),
    #[error("mined block rejected: {0}")]
    Rejected(LedgerError),
    #[error("mining task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct MinedBlock {
    #[serde(flatten)]
    pub block: Block,
    pub reward: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningStatus {
    pub in_progress: bool,
    pub difficulty: u32,
    pub current_target: String,
    pub nonce_attempts: u64,
    pub hash_rate: f64,
    pub last_block: Option<BlockRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_height: Option<u64>,
}

#[derive(Debug)]
pub struct Miner {
    ledger: Arc<Ledger>,
    mempool: Arc<Mempool>,
    pow: ProofOfWork,
    reward: u64,
    stats: Arc<MiningStats>,
    in_progress: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
    // 0 while idle; genesis is never mined
    candidate_height: AtomicU64,
}

/// Clears the in-progress flag however the session ends.
struct Session(Arc<AtomicBool>);

impl Drop for Session {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Miner {
    pub fn new(
        ledger: Arc<Ledger>,
        mempool: Arc<Mempool>,
        reward: u64,
        check_interval: u64,
    ) -> Self {
        let pow = ProofOfWork::new(ledger.difficulty(), check_interval);
        Self {
            ledger,
            mempool,
            pow,
            reward,
            stats: Arc::new(MiningStats::default()),
            in_progress: Arc::new(AtomicBool::new(false)),
            abort: Arc::new(AtomicBool::new(false)),
            candidate_height: AtomicU64::new(0),
        }
    }

    pub fn is_mining(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Claim the single mining slot.
    fn begin(&self) -> Result<Session, MinerError> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| MinerError::AlreadyInProgress)?;
        self.abort.store(false, Ordering::Release);
        self.stats.reset();
        Ok(Session(self.in_progress.clone()))
    }

    /// Claim the mining slot and run a session in the background. The
    /// session holds the slot until its block is appended or it is
    /// cancelled, whether or not anyone awaits the handle.
    pub fn start(
        self: &Arc<Self>,
        miner_address: &str,
    ) -> Result<JoinHandle<Result<MinedBlock, MinerError>>, MinerError> {
        check_address("miner_address", miner_address)
            .map_err(|e| MinerError::InvalidAddress(e.to_string()))?;
        let session = self.begin()?;
        let miner = self.clone();
        let miner_address = miner_address.to_string();
        Ok(tokio::spawn(async move {
            let _session = session;
            let result = miner.run(&miner_address).await;
            miner.candidate_height.store(0, Ordering::Release);
            result
        }))
    }

    /// Mine every pending transaction plus a reward to `miner_address` on
    /// top of the current tip and append the result.
    pub async fn mine(self: &Arc<Self>, miner_address: &str) -> Result<MinedBlock, MinerError> {
        self.start(miner_address)?
            .await
            .map_err(|e| MinerError::Task(e.to_string()))?
    }

    async fn run(&self, miner_address: &str) -> Result<MinedBlock, MinerError> {
        loop {
            let (tip, version) = self.ledger.tip_with_version().await;
            let mut transactions = self.mempool.drain().await;
            let pending = transactions.len();
            let timestamp = now_millis();
            transactions.push(Transaction::coinbase(miner_address, self.reward, timestamp));
            let template = Block::candidate(&tip, transactions, self.pow.difficulty(), timestamp);
            self.candidate_height.store(template.index, Ordering::Release);
            info!(
                height = template.index,
                pending,
                difficulty = self.pow.difficulty(),
                "mining started"
            );

            let pow = self.pow;
            let stats = self.stats.clone();
            let abort = self.abort.clone();
            let tip_version = self.ledger.version_handle();
            let sealed = tokio::task::spawn_blocking(move || {
                pow.seal(
                    template,
                    || abort.load(Ordering::Acquire) || tip_version.load(Ordering::Acquire) != version,
                    &stats,
                )
            })
            .await
            .map_err(|e| MinerError::Task(e.to_string()))?;

            let block = match sealed {
                Ok(block) => block,
                Err(MiningError::Cancelled) if !self.abort.load(Ordering::Acquire) => {
                    info!(height = tip.index + 1, "chain tip moved, restarting search");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "mining stopped");
                    return Err(e.into());
                }
            };

            match self.ledger.append(block.clone()).await {
                Ok(()) => {}
                // tip moved between the last abort check and the append
                Err(LedgerError::InvalidLinkage { .. }) => {
                    warn!(hash = %block.hash, "stale solved block discarded, restarting search");
                    continue;
                }
                Err(e) => return Err(MinerError::Rejected(e)),
            }
            info!(
                height = block.index,
                hash = %block.hash,
                nonce = block.nonce,
                attempts = self.stats.nonce_attempts(),
                "block mined"
            );
            return Ok(MinedBlock {
                block,
                reward: self.reward,
            });
        }
    }

    /// Ask the running session, if any, to stop at its next check.
    pub fn cancel(&self) {
        if self.is_mining() {
            self.abort.store(true, Ordering::Release);
        }
    }

    pub async fn status(&self) -> MiningStatus {
        let tip = self.ledger.tip().await;
        let candidate = self.candidate_height.load(Ordering::Acquire);
        MiningStatus {
            in_progress: self.is_mining(),
            difficulty: self.pow.difficulty(),
            current_target: target_prefix(self.pow.difficulty()),
            nonce_attempts: self.stats.nonce_attempts(),
            hash_rate: self.stats.hash_rate(),
            last_block: Some(tip.block_ref()),
            candidate_height: (candidate > 0).then_some(candidate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{TEST_DIFFICULTY, TEST_REWARD, mempool, mine_on, rules};
    use chainlite_core::TransactionRequest;
    use std::time::Duration;

    fn setup(difficulty: u32) -> (Arc<Ledger>, Arc<Mempool>, Arc<Miner>) {
        let pool = mempool();
        let ledger = Arc::new(Ledger::new(rules(difficulty), pool.clone(), None));
        let miner = Arc::new(Miner::new(ledger.clone(), pool.clone(), TEST_REWARD, 8));
        (ledger, pool, miner)
    }

    fn transfer(amount: u64) -> TransactionRequest {
        TransactionRequest {
            sender: "0xA".into(),
            recipient: "0xB".into(),
            amount: amount.into(),
            timestamp: None,
            signature: "mock".into(),
            public_key: None,
        }
    }

    async fn wait_until_mining(miner: &Miner) {
        while !miner.is_mining() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_until_idle(miner: &Miner) {
        while miner.is_mining() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn mines_pending_transactions_with_reward() {
        let (ledger, pool, miner) = setup(TEST_DIFFICULTY);
        let submitted = pool.submit(transfer(5)).await.unwrap();

        let mined = miner.mine("0xM").await.unwrap();
        assert_eq!(ledger.len().await, 2);
        assert_eq!(mined.block.index, 1);
        assert_eq!(mined.reward, TEST_REWARD);

        let txs = &mined.block.transactions;
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].hash, submitted.hash);
        assert_eq!(txs[0].block_index, Some(1));
        assert!(txs[1].is_coinbase());
        assert_eq!(txs[1].recipient, "0xM");
        assert!(pool.is_empty().await);
        wait_until_idle(&miner).await;
    }

    #[tokio::test]
    async fn rejects_bad_miner_address() {
        let (_, _, miner) = setup(TEST_DIFFICULTY);
        assert!(matches!(
            miner.mine("").await,
            Err(MinerError::InvalidAddress(_))
        ));
        assert!(!miner.is_mining());
    }

    #[tokio::test]
    async fn second_session_is_refused_while_first_runs() {
        let (_, _, miner) = setup(64);
        let running = miner.start("0xM").unwrap();
        wait_until_mining(&miner).await;
        assert!(matches!(
            miner.mine("0xM").await,
            Err(MinerError::AlreadyInProgress)
        ));

        let status = miner.status().await;
        assert!(status.in_progress);
        assert_eq!(status.current_target.len(), 64);
        assert_eq!(status.candidate_height, Some(1));

        miner.cancel();
        let result = running.await.unwrap();
        assert!(matches!(
            result,
            Err(MinerError::Search(MiningError::Cancelled))
        ));
        wait_until_idle(&miner).await;
        assert_eq!(miner.status().await.candidate_height, None);
    }

    #[tokio::test]
    async fn session_outlives_a_caller_that_stops_waiting() {
        let (_, _, miner) = setup(64);
        let caller = {
            let miner = miner.clone();
            tokio::spawn(async move { miner.mine("0xM").await })
        };
        wait_until_mining(&miner).await;
        caller.abort();
        let _ = caller.await;

        let attempts = miner.stats.nonce_attempts();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(miner.is_mining());
        assert!(miner.stats.nonce_attempts() > attempts);
        assert!(matches!(
            miner.start("0xM"),
            Err(MinerError::AlreadyInProgress)
        ));

        miner.cancel();
        wait_until_idle(&miner).await;
    }

    #[tokio::test]
    async fn new_tip_restarts_search_and_keeps_pool() {
        // ledger accepts difficulty-1 blocks but this miner searches at 64
        let pool = mempool();
        let ledger = Arc::new(Ledger::new(rules(TEST_DIFFICULTY), pool.clone(), None));
        let miner = Arc::new(Miner {
            pow: ProofOfWork::new(64, 8),
            ..Miner::new(ledger.clone(), pool.clone(), TEST_REWARD, 8)
        });
        pool.submit(transfer(7)).await.unwrap();

        let running = miner.start("0xM").unwrap();
        wait_until_mining(&miner).await;
        assert_eq!(miner.status().await.candidate_height, Some(1));

        let competing = mine_on(&ledger.tip().await, Vec::new(), "0xPEER");
        ledger.append(competing).await.unwrap();

        while miner.status().await.candidate_height != Some(2) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(miner.is_mining());
        assert!(!running.is_finished());
        assert_eq!(pool.len().await, 1);

        miner.cancel();
        assert!(matches!(
            running.await.unwrap(),
            Err(MinerError::Search(MiningError::Cancelled))
        ));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn status_reports_tip_and_counters() {
        let (_, _, miner) = setup(TEST_DIFFICULTY);
        let mined = miner.mine("0xM").await.unwrap();
        wait_until_idle(&miner).await;
        let status = miner.status().await;
        assert!(!status.in_progress);
        assert_eq!(status.difficulty, TEST_DIFFICULTY);
        assert_eq!(status.last_block.as_ref().unwrap().hash, mined.block.hash);
        assert_eq!(status.nonce_attempts, mined.block.nonce + 1);

        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("inProgress").is_some());
        assert!(json.get("nonceAttempts").is_some());
        assert!(json.get("hashRate").is_some());
        assert!(json.get("candidateHeight").is_none());
    }
}
