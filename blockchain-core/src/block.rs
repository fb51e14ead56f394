use serde::{Deserialize, Serialize};

use crate::{GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP, Transaction, sha256_hex};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub hash: String,
    pub previous_hash: String,
    #[serde(default)]
    pub difficulty: u32,
}

/// Index/hash pointer to a block, as reported by mining status.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub index: u64,
    pub hash: String,
    pub timestamp: i64,
}

impl Block {
    /// Canonical genesis shared by every node. Difficulty 0: the genesis
    /// block carries no proof-of-work.
    pub fn genesis() -> Self {
        let mut block = Block {
            index: 0,
            timestamp: GENESIS_TIMESTAMP,
            transactions: Vec::new(),
            nonce: 0,
            hash: String::new(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            difficulty: 0,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Unsealed block: nonce 0, empty hash. Transactions are stamped with
    /// the block index they are being mined into.
    pub fn candidate(
        previous: &Block,
        mut transactions: Vec<Transaction>,
        difficulty: u32,
        timestamp: i64,
    ) -> Self {
        let index = previous.index + 1;
        for tx in transactions.iter_mut() {
            tx.block_index = Some(index);
            if tx.hash.is_empty() {
                tx.hash = tx.compute_hash();
            }
        }
        Block {
            index,
            timestamp,
            transactions,
            nonce: 0,
            hash: String::new(),
            previous_hash: previous.hash.clone(),
            difficulty,
        }
    }

    pub fn calculate_hash(&self) -> String {
        let (head, tail) = self.preimage_parts();
        let input = format!("{}{}{}", head, self.nonce, tail);
        sha256_hex(input.as_bytes())
    }

    /// Canonical preimage is `index|timestamp|previous_hash|difficulty|nonce|txs_json`,
    /// returned split around the nonce.
    pub(crate) fn preimage_parts(&self) -> (String, String) {
        let txs_json = serde_json::to_string(&self.transactions).unwrap_or_default();
        let head = format!(
            "{}|{}|{}|{}|",
            self.index, self.timestamp, self.previous_hash, self.difficulty
        );
        (head, format!("|{}", txs_json))
    }

    /// Stored hash reproduces from the fields.
    pub fn hash_is_intact(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn has_valid_proof(&self) -> bool {
        meets_difficulty(&self.hash, self.difficulty)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            index: self.index,
            hash: self.hash.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Hash prefix a block at `difficulty` must start with.
pub fn target_prefix(difficulty: u32) -> String {
    "0".repeat(difficulty as usize)
}

pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let zeros = difficulty as usize;
    hash.len() >= zeros && hash.bytes().take(zeros).all(|b| b == b'0')
}
