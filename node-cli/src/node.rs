//! Composition root: every component is built once here and shared with
//! the HTTP layer through `Arc<Node>`.

use std::{sync::Arc, time::Duration};

use chainlite_core::{Block, Transaction, TransactionRequest};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    api,
    config::NodeConfig,
    consensus::{ConsensusOutcome, ConsensusResolver},
    errors::NodeError,
    ledger::{ChainRules, Ledger, LedgerError},
    mempool::{Mempool, PoolError},
    miner::{MinedBlock, Miner, MinerError},
    p2p::PeerClient,
    peers::PeerRegistry,
    signature::verifier_for,
    storage::DataStore,
};

#[derive(Debug)]
pub struct Node {
    pub config: NodeConfig,
    pub ledger: Arc<Ledger>,
    pub mempool: Arc<Mempool>,
    pub peers: Arc<PeerRegistry>,
    pub miner: Arc<Miner>,
    client: PeerClient,
    resolver: ConsensusResolver,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        let store = config.persist.then(|| DataStore::new(&config.data_dir));
        let verifier = verifier_for(config.signature_mode);
        let mempool = Arc::new(Mempool::new(verifier.clone()));
        let rules = ChainRules {
            min_difficulty: config.difficulty,
            reward: config.mining_reward,
            verifier,
        };
        let ledger = Arc::new(Ledger::open(
            rules,
            mempool.clone(),
            store.clone(),
        )?);
        let peers = Arc::new(PeerRegistry::open(config.public_url.as_deref(), store)?);
        let client = PeerClient::new(config.peer_timeout())
            .map_err(|e| NodeError::Network(e.to_string()))?;
        let resolver = ConsensusResolver::new(ledger.clone(), peers.clone(), client.clone());
        let miner = Arc::new(Miner::new(
            ledger.clone(),
            mempool.clone(),
            config.mining_reward,
            config.cancel_check_interval,
        ));

        info!(
            difficulty = config.difficulty,
            reward = config.mining_reward,
            signatures = ?config.signature_mode,
            persist = config.persist,
            "node initialized"
        );
        Ok(Arc::new(Self {
            config,
            ledger,
            mempool,
            peers,
            miner,
            client,
            resolver,
        }))
    }

    /// Register the configured bootstrap peers. Bad entries are logged and
    /// skipped.
    pub async fn bootstrap(&self) {
        for peer in &self.config.bootstrap_peers {
            if let Err(e) = self.peers.register(peer).await {
                warn!(%peer, error = %e, "ignoring bootstrap peer");
            }
        }
    }

    /// Validate and queue a transaction. One already in the chain is a
    /// duplicate too.
    pub async fn submit_transaction(
        &self,
        req: TransactionRequest,
    ) -> Result<Transaction, PoolError> {
        let tx = self.mempool.validate(req)?;
        let chain = self.ledger.snapshot().await;
        if crate::explorer::find_transaction(&chain, &tx.hash).is_some() {
            return Err(PoolError::Duplicate(tx.hash));
        }
        self.mempool.insert(tx).await
    }

    /// Mine one block. Once appended it is announced to peers in the
    /// background.
    pub async fn mine(self: &Arc<Self>, miner_address: &str) -> Result<MinedBlock, MinerError> {
        self.start_mining(miner_address)?
            .await
            .map_err(|e| MinerError::Task(e.to_string()))?
    }

    /// Kick off mining without waiting for the result.
    pub fn mine_in_background(self: &Arc<Self>, miner_address: &str) -> Result<(), MinerError> {
        let session = self.start_mining(miner_address)?;
        tokio::spawn(async move {
            match session.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "background mining failed"),
                Err(e) => warn!(error = %e, "background mining task failed"),
            }
        });
        Ok(())
    }

    /// The session and its broadcast run on their own task, so they finish
    /// even if the caller goes away.
    fn start_mining(
        self: &Arc<Self>,
        miner_address: &str,
    ) -> Result<JoinHandle<Result<MinedBlock, MinerError>>, MinerError> {
        let session = self.miner.start(miner_address)?;
        let node = self.clone();
        Ok(tokio::spawn(async move {
            let mined = session
                .await
                .map_err(|e| MinerError::Task(e.to_string()))??;
            if node.config.broadcast_blocks {
                let block = mined.block.clone();
                tokio::spawn(async move { node.broadcast(&block).await });
            }
            Ok::<_, MinerError>(mined)
        }))
    }

    async fn broadcast(&self, block: &Block) {
        let peers = self.peers.list().await;
        if peers.is_empty() {
            return;
        }
        let delivered = self.client.broadcast_block(&peers, block).await;
        info!(height = block.index, delivered, peers = peers.len(), "block broadcast");
    }

    /// A block mined elsewhere. Appending it moves the tip, which stops any
    /// local search.
    pub async fn accept_block(&self, block: Block) -> Result<(), LedgerError> {
        let height = block.index;
        self.ledger.append(block).await?;
        debug!(height, "accepted peer block");
        Ok(())
    }

    pub async fn resolve(&self) -> ConsensusOutcome {
        self.resolver.resolve().await
    }

    /// Run consensus every `resolve_interval_secs`, if set.
    pub fn spawn_periodic_resolve(self: &Arc<Self>) {
        let secs = self.config.resolve_interval_secs;
        if secs == 0 {
            return;
        }
        let node = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let outcome = node.resolve().await;
                debug!(replaced = outcome.replaced, height = outcome.chain.len(), "periodic resolve");
            }
        });
    }

    /// Serve the HTTP API on `listener` until `shutdown` resolves.
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<(), NodeError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let miner = self.miner.clone();
        let app = api::router(self);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                miner.cancel();
            })
            .await?;
        Ok(())
    }
}
