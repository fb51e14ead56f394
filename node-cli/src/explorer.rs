//! Read-only queries over a chain snapshot: balances, address history,
//! block and transaction lookup.

use chainlite_core::{Block, Transaction};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 1000;

/// `?limit=&before=` on list endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page {
    pub limit: Option<usize>,
    /// Only entries strictly older than this timestamp (ms).
    pub before: Option<i64>,
}

impl Page {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressActivity {
    pub address: String,
    pub sent: Vec<Transaction>,
    pub received: Vec<Transaction>,
    pub total_sent: u128,
    pub total_received: u128,
    pub balance: i128,
}

fn confirmed(chain: &[Block]) -> impl DoubleEndedIterator<Item = &Transaction> {
    chain.iter().flat_map(|b| b.transactions.iter())
}

/// Confirmed balance. Can go negative since intake does not check funds.
pub fn balance_of(chain: &[Block], address: &str) -> i128 {
    let mut balance = 0i128;
    for tx in confirmed(chain) {
        if tx.recipient == address {
            balance += i128::from(tx.amount);
        }
        if tx.sender == address {
            balance -= i128::from(tx.amount);
        }
    }
    balance
}

pub fn address_activity(chain: &[Block], address: &str) -> AddressActivity {
    let mut activity = AddressActivity {
        address: address.to_string(),
        sent: Vec::new(),
        received: Vec::new(),
        total_sent: 0,
        total_received: 0,
        balance: 0,
    };
    for tx in confirmed(chain) {
        if tx.sender == address {
            activity.total_sent += u128::from(tx.amount);
            activity.sent.push(tx.clone());
        }
        if tx.recipient == address {
            activity.total_received += u128::from(tx.amount);
            activity.received.push(tx.clone());
        }
    }
    activity.balance = activity.total_received as i128 - activity.total_sent as i128;
    activity
}

/// Confirmed and pending transactions touching `address`, newest first.
/// Pending entries carry no `block_index`.
pub fn address_transactions(
    chain: &[Block],
    pending: &[Transaction],
    address: &str,
    page: &Page,
) -> Vec<Transaction> {
    let mut txs: Vec<Transaction> = confirmed(chain)
        .chain(pending.iter())
        .filter(|tx| tx.involves(address))
        .filter(|tx| page.before.is_none_or(|before| tx.timestamp < before))
        .cloned()
        .collect();
    // stable: equal timestamps keep chain order reversed
    txs.reverse();
    txs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    txs.truncate(page.effective_limit());
    txs
}

/// Newest block first.
pub fn latest_blocks(chain: &[Block], limit: usize) -> Vec<Block> {
    chain.iter().rev().take(limit).cloned().collect()
}

/// Newest confirmed transaction first.
pub fn latest_transactions(chain: &[Block], limit: usize) -> Vec<Transaction> {
    chain
        .iter()
        .rev()
        .flat_map(|b| b.transactions.iter().rev())
        .take(limit)
        .cloned()
        .collect()
}

pub fn block_at(chain: &[Block], height: u64) -> Option<&Block> {
    let block = chain.get(usize::try_from(height).ok()?)?;
    (block.index == height).then_some(block)
}

pub fn block_by_hash<'a>(chain: &'a [Block], hash: &str) -> Option<&'a Block> {
    chain.iter().find(|b| b.hash == hash)
}

pub fn find_transaction<'a>(chain: &'a [Block], hash: &str) -> Option<&'a Transaction> {
    confirmed(chain).rev().find(|tx| tx.hash == hash)
}
