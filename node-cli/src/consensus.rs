//! Longest-valid-chain resolution against registered peers.
//!
//! All peers are queried concurrently, each under the client timeout. A peer
//! that errors or times out is logged and left out of the comparison; it
//! stays registered. Among valid chains the longest wins; on equal length
//! the peer registered first wins. The local chain is replaced only by a
//! strictly longer one.

use std::sync::Arc;

use chainlite_core::Block;
use tracing::{info, warn};

use crate::{
    ledger::{Ledger, LedgerError},
    p2p::PeerClient,
    peers::PeerRegistry,
};

#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    pub replaced: bool,
    pub chain: Arc<Vec<Block>>,
    /// Peer whose chain was adopted.
    pub source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConsensusResolver {
    ledger: Arc<Ledger>,
    peers: Arc<PeerRegistry>,
    client: PeerClient,
}

impl ConsensusResolver {
    pub fn new(ledger: Arc<Ledger>, peers: Arc<PeerRegistry>, client: PeerClient) -> Self {
        Self {
            ledger,
            peers,
            client,
        }
    }

    pub async fn resolve(&self) -> ConsensusOutcome {
        let peers = self.peers.list().await;
        let fetched = self.client.fetch_chains(&peers).await;

        let mut best: Option<(String, Vec<Block>)> = None;
        for (peer, result) in peers.into_iter().zip(fetched) {
            let chain = match result {
                Ok(chain) => chain,
                Err(e) => {
                    warn!(%peer, error = %e, "skipping unreachable peer");
                    continue;
                }
            };
            if !self.ledger.validate_chain(&chain) {
                warn!(%peer, "peer served an invalid chain");
                continue;
            }
            let longer = best
                .as_ref()
                .is_none_or(|(_, current)| chain.len() > current.len());
            if longer {
                best = Some((peer, chain));
            }
        }

        if let Some((peer, chain)) = best {
            let candidate_len = chain.len();
            match self.ledger.replace(chain).await {
                Ok(()) => {
                    info!(%peer, length = candidate_len, "adopted longer chain");
                    return ConsensusOutcome {
                        replaced: true,
                        chain: self.ledger.snapshot().await,
                        source: Some(peer),
                    };
                }
                Err(LedgerError::NotLonger { candidate, local }) => {
                    info!(candidate, local, "local chain is authoritative");
                }
                Err(e) => warn!(%peer, error = %e, "replacement rejected"),
            }
        }

        ConsensusOutcome {
            replaced: false,
            chain: self.ledger.snapshot().await,
            source: None,
        }
    }
}
