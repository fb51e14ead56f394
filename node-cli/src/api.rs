//! HTTP surface. Flat JSON bodies; failures are `{ "error", "message" }`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chainlite_core::{Block, MiningError, Transaction, TransactionRequest, block::target_prefix};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::{
    explorer::{self, AddressActivity, Page},
    ledger::LedgerError,
    mempool::PoolError,
    miner::{MinedBlock, MinerError, MiningStatus},
    node::Node,
    p2p::ChainResponse,
    peers::{RegistryChange, RegistryError},
};

type AppState = State<Arc<Node>>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Miner(#[from] MinerError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Pool(e) => match e {
                PoolError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "invalid_amount"),
                PoolError::InvalidAddress(_) => (StatusCode::BAD_REQUEST, "invalid_address"),
                PoolError::InvalidSignature(_) => (StatusCode::BAD_REQUEST, "invalid_signature"),
                PoolError::Duplicate(_) => (StatusCode::CONFLICT, "duplicate_transaction"),
            },
            ApiError::Miner(e) => match e {
                MinerError::AlreadyInProgress => (StatusCode::CONFLICT, "mining_in_progress"),
                MinerError::InvalidAddress(_) => (StatusCode::BAD_REQUEST, "invalid_address"),
                MinerError::Search(MiningError::Cancelled) => {
                    (StatusCode::CONFLICT, "mining_cancelled")
                }
                MinerError::Search(MiningError::NonceSpaceExhausted { .. }) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "nonce_space_exhausted")
                }
                MinerError::Rejected(_) => (StatusCode::CONFLICT, "block_rejected"),
                MinerError::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
            ApiError::Ledger(e) => match e {
                LedgerError::InvalidLinkage { .. } => (StatusCode::CONFLICT, "invalid_linkage"),
                LedgerError::InvalidProofOfWork { .. } => {
                    (StatusCode::BAD_REQUEST, "invalid_proof_of_work")
                }
                LedgerError::InvalidBlock { .. } => (StatusCode::BAD_REQUEST, "invalid_block"),
                LedgerError::InvalidChain(_) => (StatusCode::BAD_REQUEST, "invalid_chain"),
                LedgerError::NotLonger { .. } => (StatusCode::CONFLICT, "not_longer"),
            },
            ApiError::Registry(RegistryError::InvalidUrl { .. }) => {
                (StatusCode::BAD_REQUEST, "invalid_url")
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(json!({ "error": kind, "message": self.to_string() }))).into_response()
    }
}

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/chain", get(chain))
        .route("/pending_tx", get(pending))
        .route("/transactions", post(submit_transaction))
        .route("/transactions/new", post(submit_transaction))
        .route("/transactions/latest", get(latest_transactions))
        .route("/transactions/:hash", get(transaction_by_hash))
        .route("/mine", get(mine).post(mine_background))
        .route("/mining/status", get(mining_status))
        .route("/difficulty", get(difficulty))
        .route("/balance/:address", get(balance))
        .route("/nodes", get(list_nodes).post(register_nodes))
        .route("/nodes/register", post(register_nodes))
        .route("/nodes/unregister", post(unregister_nodes))
        .route("/nodes/resolve", get(resolve))
        .route("/nodes/:host_port", delete(unregister_node))
        .route("/blocks", post(receive_block))
        .route("/blocks/latest", get(latest_blocks))
        .route("/blocks/hash/:hash", get(block_by_hash))
        .route("/blocks/:height", get(block_by_height))
        .route("/address/:address/transactions", get(address_transactions))
        .route("/address/:address/activity", get(address_activity))
        .with_state(node)
}

const ENDPOINTS: &[(&str, &str)] = &[
    ("GET /chain", "full chain"),
    ("GET /pending_tx", "unconfirmed transactions"),
    ("POST /transactions", "submit a transaction"),
    ("GET /mine?miner_address=", "mine a block and wait for it"),
    ("POST /mine", "start mining in the background"),
    ("GET /mining/status", "mining progress"),
    ("GET /difficulty", "required leading zero hex digits"),
    ("GET /balance/{address}", "confirmed balance"),
    ("GET /nodes", "registered peers"),
    ("POST /nodes/register", "add peers"),
    ("DELETE /nodes/{host_port}", "remove one peer"),
    ("POST /nodes/unregister", "remove peers"),
    ("GET /nodes/resolve", "adopt the longest valid peer chain"),
    ("POST /blocks", "accept a block mined by a peer"),
    ("GET /blocks/latest?limit=", "recent blocks"),
    ("GET /blocks/{height}", "block by index"),
    ("GET /blocks/hash/{hash}", "block by hash"),
    ("GET /transactions/latest?limit=", "recent confirmed transactions"),
    ("GET /transactions/{hash}", "transaction by hash"),
    ("GET /address/{address}/transactions?limit=&before=", "address history"),
    ("GET /address/{address}/activity", "sent, received and balance"),
];

async fn index(State(node): AppState) -> Json<serde_json::Value> {
    let endpoints: serde_json::Map<String, serde_json::Value> = ENDPOINTS
        .iter()
        .map(|(route, about)| (route.to_string(), json!(about)))
        .collect();
    Json(json!({
        "name": "chainlite-node",
        "version": env!("CARGO_PKG_VERSION"),
        "height": node.ledger.len().await,
        "endpoints": endpoints,
    }))
}

async fn chain(State(node): AppState) -> Json<ChainResponse> {
    let chain = node.ledger.snapshot().await;
    Json(ChainResponse {
        length: chain.len(),
        chain: chain.to_vec(),
    })
}

async fn pending(State(node): AppState) -> Json<serde_json::Value> {
    let txs = node.mempool.drain().await;
    Json(json!({ "pending_transactions": txs, "count": txs.len() }))
}

async fn submit_transaction(
    State(node): AppState,
    body: Result<Json<TransactionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    let Json(req) = body?;
    let tx = node.submit_transaction(req).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

#[derive(Debug, Deserialize)]
struct MineQuery {
    miner_address: Option<String>,
    address: Option<String>,
}

async fn mine(
    State(node): AppState,
    Query(q): Query<MineQuery>,
) -> Result<Json<MinedBlock>, ApiError> {
    let address = q
        .miner_address
        .or(q.address)
        .ok_or_else(|| ApiError::BadRequest("miner_address is required".to_string()))?;
    Ok(Json(node.mine(&address).await?))
}

#[derive(Debug, Deserialize)]
struct MineRequest {
    address: String,
}

async fn mine_background(
    State(node): AppState,
    body: Result<Json<MineRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let Json(req) = body?;
    node.mine_in_background(&req.address)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "message": format!("mining started, reward goes to {}", req.address),
        })),
    ))
}

async fn mining_status(State(node): AppState) -> Json<MiningStatus> {
    Json(node.miner.status().await)
}

async fn difficulty(State(node): AppState) -> Json<serde_json::Value> {
    let difficulty = node.ledger.difficulty();
    Json(json!({ "difficulty": difficulty, "target": target_prefix(difficulty) }))
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    address: String,
    balance: i128,
}

async fn balance(State(node): AppState, Path(address): Path<String>) -> Json<BalanceResponse> {
    let chain = node.ledger.snapshot().await;
    let balance = explorer::balance_of(&chain, &address);
    Json(BalanceResponse { address, balance })
}

async fn list_nodes(State(node): AppState) -> Json<serde_json::Value> {
    let nodes = node.peers.list().await;
    Json(json!({ "total_count": nodes.len(), "nodes": nodes }))
}

#[derive(Debug, Deserialize)]
struct NodesRequest {
    #[serde(default)]
    nodes: Vec<String>,
    node: Option<String>,
}

impl NodesRequest {
    fn urls(self) -> Result<Vec<String>, ApiError> {
        let mut urls = self.nodes;
        urls.extend(self.node);
        if urls.is_empty() {
            return Err(ApiError::BadRequest("supply a list of nodes".to_string()));
        }
        Ok(urls)
    }
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    message: String,
    registered_nodes: Vec<String>,
    total_nodes: Vec<String>,
    total_count: usize,
}

#[derive(Debug, Serialize)]
struct RemoveResponse {
    message: String,
    removed_nodes: Vec<String>,
    total_nodes: Vec<String>,
    total_count: usize,
}

impl From<RegistryChange> for RemoveResponse {
    fn from(change: RegistryChange) -> Self {
        let message = if change.changed.is_empty() {
            "no matching nodes were registered".to_string()
        } else {
            format!("{} node(s) removed", change.changed.len())
        };
        Self {
            message,
            total_count: change.total.len(),
            removed_nodes: change.changed,
            total_nodes: change.total,
        }
    }
}

async fn register_nodes(
    State(node): AppState,
    body: Result<Json<NodesRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let Json(req) = body?;
    let change = node.peers.register_many(&req.urls()?).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: format!("{} new node(s) have been added", change.changed.len()),
            total_count: change.total.len(),
            registered_nodes: change.changed,
            total_nodes: change.total,
        }),
    ))
}

async fn unregister_node(
    State(node): AppState,
    Path(host_port): Path<String>,
) -> Json<RemoveResponse> {
    Json(node.peers.unregister_host_port(&host_port).await.into())
}

async fn unregister_nodes(
    State(node): AppState,
    body: Result<Json<NodesRequest>, JsonRejection>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let Json(req) = body?;
    Ok(Json(node.peers.unregister_many(&req.urls()?).await.into()))
}

async fn resolve(State(node): AppState) -> Json<serde_json::Value> {
    let outcome = node.resolve().await;
    let message = if outcome.replaced {
        "Our chain was replaced"
    } else {
        "Our chain is authoritative"
    };
    Json(json!({
        "message": message,
        "replaced": outcome.replaced,
        "source": outcome.source,
        "length": outcome.chain.len(),
        "chain": outcome.chain.as_slice(),
    }))
}

async fn receive_block(
    State(node): AppState,
    body: Result<Json<Block>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let Json(block) = body?;
    let (index, hash) = (block.index, block.hash.clone());
    node.accept_block(block).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "block accepted", "index": index, "hash": hash })),
    ))
}

async fn latest_blocks(State(node): AppState, Query(page): Query<Page>) -> Json<serde_json::Value> {
    let chain = node.ledger.snapshot().await;
    Json(json!({ "blocks": explorer::latest_blocks(&chain, page.effective_limit()) }))
}

async fn block_by_height(
    State(node): AppState,
    Path(height): Path<String>,
) -> Result<Json<Block>, ApiError> {
    let height: u64 = height
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("height {height:?} is not a number")))?;
    let chain = node.ledger.snapshot().await;
    explorer::block_at(&chain, height)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no block at height {height}")))
}

async fn block_by_hash(
    State(node): AppState,
    Path(hash): Path<String>,
) -> Result<Json<Block>, ApiError> {
    let chain = node.ledger.snapshot().await;
    explorer::block_by_hash(&chain, &hash)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no block with hash {hash}")))
}

async fn latest_transactions(
    State(node): AppState,
    Query(page): Query<Page>,
) -> Json<serde_json::Value> {
    let chain = node.ledger.snapshot().await;
    Json(json!({ "transactions": explorer::latest_transactions(&chain, page.effective_limit()) }))
}

async fn transaction_by_hash(
    State(node): AppState,
    Path(hash): Path<String>,
) -> Result<Json<Transaction>, ApiError> {
    let chain = node.ledger.snapshot().await;
    if let Some(tx) = explorer::find_transaction(&chain, &hash) {
        return Ok(Json(tx.clone()));
    }
    node.mempool
        .find(&hash)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no transaction with hash {hash}")))
}

async fn address_transactions(
    State(node): AppState,
    Path(address): Path<String>,
    Query(page): Query<Page>,
) -> Json<Vec<Transaction>> {
    let chain = node.ledger.snapshot().await;
    let pending = node.mempool.drain().await;
    Json(explorer::address_transactions(&chain, &pending, &address, &page))
}

async fn address_activity(
    State(node): AppState,
    Path(address): Path<String>,
) -> Json<AddressActivity> {
    let chain = node.ledger.snapshot().await;
    Json(explorer::address_activity(&chain, &address))
}
