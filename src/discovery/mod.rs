use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::config::PeerDescriptor;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("{url} returned an unreadable id: {source}")]
    Body { url: String, source: reqwest::Error },
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

/// Result of one scan: peer id to the IP it answered on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerMap {
    pub peers: BTreeMap<String, String>,
    pub scanned_at: DateTime<Utc>,
}

impl PeerMap {
    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }
}

/// Probes configured peers and keeps the map of the last scan.
#[derive(Debug)]
pub struct Discovery {
    client: Client,
    last: RwLock<Option<Arc<PeerMap>>>,
    // one scan at a time, so a slow pass cannot land after a newer one
    scanning: Mutex<()>,
}

impl Discovery {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().no_proxy().timeout(timeout).build()?;
        Ok(Discovery {
            client,
            last: RwLock::new(None),
            scanning: Mutex::new(()),
        })
    }

    /// One GET to `/id` of the peer, no retries.
    pub async fn probe(&self, peer: &PeerDescriptor) -> Result<String, DiscoveryError> {
        let url = peer.id_url();
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| DiscoveryError::Request {
                url: url.clone(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status { url, status });
        }
        let body: IdResponse = resp
            .json()
            .await
            .map_err(|source| DiscoveryError::Body {
                url: url.clone(),
                source,
            })?;
        Ok(body.id)
    }

    /// Probes every peer concurrently and replaces the stored map with the
    /// peers that answered. Overlapping calls run one after the other.
    pub async fn scan(&self, peers: &[PeerDescriptor]) -> Arc<PeerMap> {
        let _scanning = self.scanning.lock().await;
        let results = join_all(peers.iter().map(|peer| async move {
            (peer, self.probe(peer).await)
        }))
        .await;

        let mut found = BTreeMap::new();
        for (peer, result) in results {
            match result {
                Ok(id) => {
                    tracing::info!(id = %id, ip = %peer.ip, port = peer.port, "found module");
                    found.insert(id, peer.ip.clone());
                }
                Err(e) => {
                    tracing::warn!(name = %peer.name, ip = %peer.ip, error = %e, "module not reachable");
                }
            }
        }

        let map = Arc::new(PeerMap {
            peers: found,
            scanned_at: Utc::now(),
        });
        *self.last.write().await = Some(map.clone());
        tracing::debug!(found = map.peers.len(), configured = peers.len(), "scan finished");
        map
    }

    /// The map from the last scan, `None` if no scan has run.
    pub async fn last(&self) -> Option<Arc<PeerMap>> {
        self.last.read().await.clone()
    }

    /// Ids not present in the last scan; all of them before the first scan.
    pub async fn missing<S: AsRef<str>>(&self, ids: &[S]) -> Vec<String> {
        let last = self.last().await;
        ids.iter()
            .map(AsRef::as_ref)
            .filter(|id| !last.as_ref().is_some_and(|map| map.contains(id)))
            .map(str::to_string)
            .collect()
    }

    pub async fn all_present<S: AsRef<str>>(&self, ids: &[S]) -> bool {
        let missing = self.missing(ids).await;
        if missing.is_empty() {
            return true;
        }
        tracing::debug!(missing = %missing.join(", "), "required modules are not available");
        false
    }
}
