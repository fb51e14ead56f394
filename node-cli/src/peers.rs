//! Known peer nodes, kept as normalized `scheme://host:port` URLs in
//! registration order. Registration order is the consensus tie-break order.

use reqwest::Url;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::storage::{DataStore, StorageError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid node url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Result of a bulk register/unregister.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryChange {
    /// URLs newly added or actually removed.
    pub changed: Vec<String>,
    pub total: Vec<String>,
}

#[derive(Debug)]
pub struct PeerRegistry {
    peers: RwLock<Vec<String>>,
    self_url: Option<String>,
    store: Option<DataStore>,
}

impl PeerRegistry {
    pub fn new(self_url: Option<&str>, store: Option<DataStore>) -> Self {
        Self {
            peers: RwLock::new(Vec::new()),
            self_url: self_url.and_then(|u| normalize_url(u).ok()),
            store,
        }
    }

    /// Registry seeded from the data dir. Unparseable entries are dropped.
    pub fn open(self_url: Option<&str>, store: Option<DataStore>) -> Result<Self, StorageError> {
        let self_url = self_url.and_then(|u| normalize_url(u).ok());
        let mut seeded: Vec<String> = Vec::new();
        if let Some(store) = &store {
            for raw in store.load_peers()? {
                match normalize_url(&raw) {
                    Ok(url) if Some(&url) != self_url.as_ref() && !seeded.contains(&url) => {
                        seeded.push(url)
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "dropping persisted peer"),
                }
            }
            info!(peers = seeded.len(), "restored peers");
        }
        Ok(Self {
            peers: RwLock::new(seeded),
            self_url,
            store,
        })
    }

    pub async fn register(&self, url: &str) -> Result<(), RegistryError> {
        self.register_many(&[url.to_string()]).await.map(|_| ())
    }

    /// All-or-nothing: any invalid URL rejects the whole batch. This node's
    /// own URL is skipped.
    pub async fn register_many(&self, urls: &[String]) -> Result<RegistryChange, RegistryError> {
        let normalized = urls
            .iter()
            .map(|u| normalize_url(u))
            .collect::<Result<Vec<_>, _>>()?;

        let mut peers = self.peers.write().await;
        let mut changed = Vec::new();
        for url in normalized {
            if Some(&url) == self.self_url.as_ref() {
                debug!(%url, "ignoring own url");
                continue;
            }
            if !peers.contains(&url) {
                info!(%url, "peer registered");
                peers.push(url.clone());
                changed.push(url);
            }
        }
        if !changed.is_empty() {
            self.persist(&peers);
        }
        Ok(RegistryChange {
            changed,
            total: peers.clone(),
        })
    }

    pub async fn list(&self) -> Vec<String> {
        self.peers.read().await.clone()
    }

    pub async fn unregister(&self, url: &str) -> RegistryChange {
        self.unregister_many(&[url.to_string()]).await
    }

    /// Remove the peer at `host:port` whichever scheme it registered with.
    /// A full URL is matched exactly.
    pub async fn unregister_host_port(&self, host_port: &str) -> RegistryChange {
        if host_port.contains("://") {
            return self.unregister(host_port).await;
        }
        let targets: Vec<String> = normalize_url(host_port)
            .ok()
            .and_then(|url| url.split_once("://").map(|(_, authority)| authority.to_string()))
            .map(|authority| {
                ["http", "https"]
                    .iter()
                    .map(|scheme| format!("{scheme}://{authority}"))
                    .collect()
            })
            .unwrap_or_default();
        self.unregister_many(&targets).await
    }

    /// Removing an unknown or unparseable URL is a no-op.
    pub async fn unregister_many(&self, urls: &[String]) -> RegistryChange {
        let targets: Vec<String> = urls.iter().filter_map(|u| normalize_url(u).ok()).collect();
        let mut peers = self.peers.write().await;
        let mut changed = Vec::new();
        peers.retain(|p| {
            if targets.contains(p) {
                changed.push(p.clone());
                false
            } else {
                true
            }
        });
        if !changed.is_empty() {
            info!(removed = ?changed, "peers unregistered");
            self.persist(&peers);
        }
        RegistryChange {
            changed,
            total: peers.clone(),
        }
    }

    fn persist(&self, peers: &[String]) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_peers(peers) {
                error!(error = %e, "failed to persist peers");
            }
        }
    }
}

/// Canonical `scheme://host:port` form. Accepts a bare `host:port`
/// (scheme defaults to http); paths, queries and credentials are refused.
pub fn normalize_url(raw: &str) -> Result<String, RegistryError> {
    let raw = raw.trim();
    let invalid = |reason: &str| RegistryError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    if raw.is_empty() {
        return Err(invalid("empty"));
    }
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let url = Url::parse(&with_scheme).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(|| invalid("missing host"))?;
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid("credentials are not allowed"));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("only scheme, host and port are allowed"));
    }
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port"))?;
    Ok(format!("{}://{}:{}", url.scheme(), host, port))
}
