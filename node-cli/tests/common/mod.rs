#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::{Json, Router, routing::get};
use chainlite_core::Block;
use chainlite_node::{Node, NodeConfig, config::SignatureMode};
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub const DIFFICULTY: u32 = 2;

pub struct TestNode {
    pub node: Arc<Node>,
    pub url: String,
    http: reqwest::Client,
}

/// In-memory node accepting mock signatures.
pub fn presence_config() -> NodeConfig {
    NodeConfig {
        signature_mode: SignatureMode::Presence,
        peer_timeout_ms: 2_000,
        ..NodeConfig::ephemeral(DIFFICULTY)
    }
}

pub async fn spawn_node(config: NodeConfig) -> TestNode {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let node = Node::new(NodeConfig {
        public_url: Some(url.clone()),
        ..config
    })
    .unwrap();
    tokio::spawn(node.clone().serve(listener, std::future::pending()));
    TestNode {
        node,
        url,
        http: reqwest::Client::new(),
    }
}

/// A stand-in peer that serves a fixed chain.
pub async fn spawn_chain_server(chain: Vec<Block>) -> String {
    let body = json!({ "length": chain.len(), "chain": chain });
    let app = Router::new().route(
        "/chain",
        get(move || {
            let body = body.clone();
            async move { Json(body) }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move { axum::serve(listener, app).await });
    url
}

/// URL of a port nothing listens on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    url
}

impl TestNode {
    async fn send(&self, req: reqwest::RequestBuilder) -> (u16, Value) {
        let resp = req.send().await.unwrap();
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn get(&self, path: &str) -> (u16, Value) {
        self.send(self.http.get(format!("{}{path}", self.url))).await
    }

    pub async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        self.send(self.http.post(format!("{}{path}", self.url)).json(&body))
            .await
    }

    pub async fn delete(&self, path: &str) -> (u16, Value) {
        self.send(self.http.delete(format!("{}{path}", self.url))).await
    }

    pub async fn chain(&self) -> Vec<Block> {
        let (status, body) = self.get("/chain").await;
        assert_eq!(status, 200);
        serde_json::from_value(body["chain"].clone()).unwrap()
    }

    pub async fn mine(&self, miner: &str) -> Value {
        let (status, body) = self.get(&format!("/mine?miner_address={miner}")).await;
        assert_eq!(status, 200, "mining failed: {body}");
        body
    }

    pub async fn register(&self, peers: &[&str]) {
        let (status, body) = self.post("/nodes/register", json!({ "nodes": peers })).await;
        assert_eq!(status, 201, "register failed: {body}");
    }

    pub async fn submit(&self, sender: &str, recipient: &str, amount: f64) -> (u16, Value) {
        self.post(
            "/transactions",
            json!({
                "sender": sender,
                "recipient": recipient,
                "amount": amount,
                "signature": "mock-signature",
            }),
        )
        .await
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
