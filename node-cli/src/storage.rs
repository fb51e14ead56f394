use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chainlite_core::Block;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

const CHAIN_FILE: &str = "chain.json";
const PEERS_FILE: &str = "peers.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// JSON files under the node's data directory.
#[derive(Debug, Clone)]
pub struct DataStore {
    dir: PathBuf,
}

impl DataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn write_json<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<(), StorageError> {
        let path = self.path(file);
        let json = serde_json::to_string_pretty(value).map_err(|source| StorageError::Malformed {
            path: path.clone(),
            source,
        })?;
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.clone(),
            source,
        })?;
        // write-then-rename: the file on disk is always complete
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StorageError::Io { path, source })
    }

    fn read_json<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>, StorageError> {
        let path = self.path(file);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| StorageError::Malformed { path, source })
    }

    pub fn save_chain(&self, chain: &[Block]) -> Result<(), StorageError> {
        self.write_json(CHAIN_FILE, chain)
    }

    /// `Ok(None)` when no chain has been persisted yet.
    pub fn load_chain(&self) -> Result<Option<Vec<Block>>, StorageError> {
        self.read_json(CHAIN_FILE)
    }

    pub fn save_peers(&self, peers: &[String]) -> Result<(), StorageError> {
        self.write_json(PEERS_FILE, peers)
    }

    pub fn load_peers(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.read_json(PEERS_FILE)?.unwrap_or_default())
    }
}
