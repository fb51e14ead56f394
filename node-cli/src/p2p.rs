//! HTTP calls this node makes to its peers.

use std::time::Duration;

use chainlite_core::Block;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("request to {peer} failed: {source}")]
    Request {
        peer: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{peer} answered {status}")]
    Status { peer: String, status: u16 },
}

/// Body served by `GET /chain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainResponse {
    pub chain: Vec<Block>,
    pub length: usize,
}

#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    /// Every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    pub async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, PeerError> {
        let request_err = |source| PeerError::Request {
            peer: peer.to_string(),
            source,
        };
        let resp = self
            .http
            .get(format!("{peer}/chain"))
            .send()
            .await
            .map_err(request_err)?;
        if !resp.status().is_success() {
            return Err(PeerError::Status {
                peer: peer.to_string(),
                status: resp.status().as_u16(),
            });
        }
        let body: ChainResponse = resp.json().await.map_err(request_err)?;
        debug!(peer, length = body.chain.len(), "fetched peer chain");
        Ok(body.chain)
    }

    /// Fetch every peer's chain at once. Output order matches `peers`.
    pub async fn fetch_chains(&self, peers: &[String]) -> Vec<Result<Vec<Block>, PeerError>> {
        join_all(peers.iter().map(|peer| self.fetch_chain(peer))).await
    }

    /// Announce a freshly mined block. Returns how many peers accepted it.
    pub async fn broadcast_block(&self, peers: &[String], block: &Block) -> usize {
        let sends = peers.iter().map(|peer| async move {
            let result = self.http.post(format!("{peer}/blocks")).json(block).send().await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(peer, hash = %block.hash, "block delivered");
                    true
                }
                Ok(resp) => {
                    debug!(peer, status = resp.status().as_u16(), "peer refused block");
                    false
                }
                Err(e) => {
                    warn!(peer, error = %e, "block broadcast failed");
                    false
                }
            }
        });
        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }
}
