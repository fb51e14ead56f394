mod common;

use chainlite_node::{NodeConfig, config::SignatureMode};
use common::{dead_url, eventually, presence_config, spawn_chain_server, spawn_node};
use serde_json::json;

#[tokio::test]
async fn lagging_node_adopts_longer_peer_chain() {
    let a = spawn_node(presence_config()).await;
    let b = spawn_node(presence_config()).await;
    a.mine("0xM").await;

    b.register(&[a.url.as_str()]).await;
    let (status, outcome) = b.get("/nodes/resolve").await;
    assert_eq!(status, 200);
    assert_eq!(outcome["replaced"], true);
    assert_eq!(outcome["message"], "Our chain was replaced");
    assert_eq!(outcome["chain"].as_array().unwrap().len(), 2);

    let (_, chain_a) = a.get("/chain").await;
    let (_, chain_b) = b.get("/chain").await;
    assert_eq!(chain_a, chain_b);
}

#[tokio::test]
async fn equal_or_shorter_peer_chain_leaves_local_chain() {
    let a = spawn_node(presence_config()).await;
    let b = spawn_node(presence_config()).await;
    b.register(&[a.url.as_str()]).await;

    let (_, outcome) = b.get("/nodes/resolve").await;
    assert_eq!(outcome["replaced"], false);

    a.mine("0xA").await;
    b.mine("0xB").await;
    b.mine("0xB").await;
    let before = b.chain().await;

    let (_, outcome) = b.get("/nodes/resolve").await;
    assert_eq!(outcome["replaced"], false);
    assert_eq!(outcome["message"], "Our chain is authoritative");
    assert_eq!(b.chain().await, before);
}

#[tokio::test]
async fn tampered_chain_is_rejected_even_if_longer() {
    let a = spawn_node(presence_config()).await;
    a.mine("0xM").await;
    a.mine("0xM").await;
    let mut forged = a.chain().await;
    forged[1].transactions[0].amount = 1_000_000;
    let forger = spawn_chain_server(forged).await;

    let b = spawn_node(presence_config()).await;
    b.register(&[forger.as_str()]).await;
    let (_, outcome) = b.get("/nodes/resolve").await;
    assert_eq!(outcome["replaced"], false);
    assert_eq!(b.chain().await.len(), 1);
}

#[tokio::test]
async fn unreachable_peer_is_skipped_but_kept() {
    let a = spawn_node(presence_config()).await;
    a.mine("0xM").await;
    let dead = dead_url().await;

    let b = spawn_node(presence_config()).await;
    b.register(&[dead.as_str(), a.url.as_str()]).await;
    let (_, outcome) = b.get("/nodes/resolve").await;
    assert_eq!(outcome["replaced"], true);
    assert_eq!(b.chain().await, a.chain().await);

    let (_, nodes) = b.get("/nodes").await;
    assert_eq!(nodes["total_count"], 2);
}

#[tokio::test]
async fn first_registered_peer_wins_a_tie() {
    let a = spawn_node(presence_config()).await;
    let c = spawn_node(presence_config()).await;
    a.mine("0xA").await;
    c.mine("0xC").await;
    assert_ne!(a.chain().await, c.chain().await);

    let b = spawn_node(presence_config()).await;
    b.register(&[c.url.as_str(), a.url.as_str()]).await;
    let (_, outcome) = b.get("/nodes/resolve").await;
    assert_eq!(outcome["replaced"], true);
    assert_eq!(outcome["source"], json!(c.url));
    assert_eq!(b.chain().await, c.chain().await);
}

#[tokio::test]
async fn gossiped_block_extends_peer_once() {
    let a = spawn_node(presence_config()).await;
    let b = spawn_node(presence_config()).await;
    a.mine("0xM").await;
    let block = a.chain().await.pop().unwrap();

    let (status, body) = b.post("/blocks", json!(block)).await;
    assert_eq!(status, 201, "{body}");
    assert_eq!(b.chain().await, a.chain().await);

    let (status, body) = b.post("/blocks", json!(block)).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "invalid_linkage");

    let mut forged = block.clone();
    forged.index = 2;
    forged.previous_hash = block.hash.clone();
    let (status, _) = b.post("/blocks", json!(forged)).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn peer_blocks_must_carry_signed_transfers_and_the_fixed_reward() {
    let strict = spawn_node(NodeConfig {
        signature_mode: SignatureMode::Secp256k1,
        ..presence_config()
    })
    .await;

    let lax = spawn_node(presence_config()).await;
    let (status, _) = lax.submit("0xVICTIM", "0xTHIEF", 1_000.0).await;
    assert_eq!(status, 201);
    lax.mine("0xTHIEF").await;
    let unsigned = lax.chain().await.pop().unwrap();
    let (status, body) = strict.post("/blocks", json!(unsigned)).await;
    assert_eq!(status, 400, "{body}");
    assert_eq!(body["error"], "invalid_block");

    let greedy = spawn_node(NodeConfig {
        mining_reward: 9_000_000_000,
        ..presence_config()
    })
    .await;
    greedy.mine("0xTHIEF").await;
    let inflated = greedy.chain().await.pop().unwrap();
    let (status, body) = strict.post("/blocks", json!(inflated)).await;
    assert_eq!(status, 400, "{body}");
    assert_eq!(body["error"], "invalid_block");

    strict.register(&[greedy.url.as_str()]).await;
    let (_, body) = strict.get("/nodes/resolve").await;
    assert_eq!(body["replaced"], false);
    assert_eq!(strict.chain().await.len(), 1);
    let (_, bal) = strict.get("/balance/0xTHIEF").await;
    assert_eq!(bal["balance"], 0);
}

#[tokio::test]
async fn mined_blocks_are_broadcast_to_peers() {
    let b = spawn_node(presence_config()).await;
    let a = spawn_node(NodeConfig {
        broadcast_blocks: true,
        ..presence_config()
    })
    .await;
    a.register(&[b.url.as_str()]).await;

    a.mine("0xM").await;
    let peer = &b;
    assert!(eventually(move || async move { peer.node.ledger.len().await == 2 }).await);
    assert_eq!(b.chain().await, a.chain().await);
}
