use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::{COINBASE_SENDER, COINBASE_SIGNATURE, sha256_hex};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub timestamp: i64,
    pub signature: String,
    // compressed SEC1 hex; required when the node verifies secp256k1 signatures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub block_index: Option<u64>,
}

impl Transaction {
    /// Reward transaction crediting `miner` for the block it is mined into.
    pub fn coinbase(miner: &str, amount: u64, timestamp: i64) -> Self {
        let mut tx = Transaction {
            sender: COINBASE_SENDER.to_string(),
            recipient: miner.to_string(),
            amount,
            timestamp,
            signature: COINBASE_SIGNATURE.to_string(),
            public_key: None,
            hash: String::new(),
            block_index: None,
        };
        tx.hash = tx.compute_hash();
        tx
    }

    pub fn is_coinbase(&self) -> bool {
        self.sender == COINBASE_SENDER && self.signature == COINBASE_SIGNATURE
    }

    /// Identifier over the authored fields. `block_index` is excluded so the
    /// hash is stable between the pool and the block it lands in.
    pub fn compute_hash(&self) -> String {
        let preimage = format!(
            "{}|{}|{}|{}|{}",
            self.sender, self.recipient, self.amount, self.timestamp, self.signature
        );
        sha256_hex(preimage.as_bytes())
    }

    /// The message a wallet signs.
    pub fn signing_payload(sender: &str, recipient: &str, amount: u64, timestamp: i64) -> String {
        format!("{}|{}|{}|{}", sender, recipient, amount, timestamp)
    }

    pub fn involves(&self, address: &str) -> bool {
        self.sender == address || self.recipient == address
    }
}

/// Body of `POST /transactions`.
///
/// `amount` is kept as the JSON number the client sent. Integers stay exact
/// up to `u64::MAX`, and negative or fractional values reach validation
/// instead of failing deserialization.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransactionRequest {
    pub sender: String,
    pub recipient: String,
    pub amount: Number,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub public_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction {
            sender: "0xA".into(),
            recipient: "0xB".into(),
            amount: 5,
            timestamp: 1_700_000_000_000,
            signature: "sig".into(),
            public_key: None,
            hash: String::new(),
            block_index: None,
        }
    }

    #[test]
    fn hash_ignores_block_index() {
        let a = sample();
        let mut b = sample();
        b.block_index = Some(7);
        assert_eq!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn hash_changes_with_amount() {
        let a = sample();
        let mut b = sample();
        b.amount = 6;
        assert_ne!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn coinbase_is_recognised() {
        let tx = Transaction::coinbase("0xM", 50, 1);
        assert!(tx.is_coinbase());
        assert_eq!(tx.hash, tx.compute_hash());
        assert!(!sample().is_coinbase());
    }

    #[test]
    fn request_amount_keeps_large_integers_exact() {
        let req: TransactionRequest = serde_json::from_str(
            r#"{"sender":"0xA","recipient":"0xB","amount":9007199254740993}"#,
        )
        .unwrap();
        assert_eq!(req.amount.as_u64(), Some(9_007_199_254_740_993));
    }

    #[test]
    fn pending_transaction_serializes_null_block_index() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json["block_index"].is_null());
        assert!(json.get("public_key").is_none());
    }
}
