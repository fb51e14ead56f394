use thiserror::Error;

use crate::storage::StorageError;

/// Errors that stop the node from starting or serving.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("persisted chain is corrupt: {0}")]
    CorruptLedger(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
