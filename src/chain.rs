//! Subnet chain access
//!
//! The chain client is an external collaborator. Everything the gateway
//! needs from it goes through `ChainSource`; the shipped implementation
//! reads a JSON snapshot of the subnet exported by a chain indexer.
//!
//! Subnet state is fetched fresh for every round. `SnapshotChain` re-reads
//! its file each time it is asked, so an indexer rewriting the snapshot is
//! picked up by the next round.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::registry::WeightTable;
use crate::types::{PeerIdentity, PeerId, PeerWeight, ValidatorId};

/// Failure to obtain subnet state
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("failed to read snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid snapshot: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("chain unavailable: {0}")]
    Unavailable(String),
}

/// Everything one round needs from the chain, read together
#[derive(Debug, Clone, Default)]
pub struct SubnetView {
    pub weights: WeightTable,
    pub raw_addresses: HashMap<PeerId, String>,
    pub identities: HashMap<PeerId, PeerIdentity>,
}

/// Read access to the subnet's module registry and weights
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Weight vectors published by every validator
    async fn peer_weights(&self) -> Result<WeightTable, ChainError>;

    /// Connection strings published by every module, unparsed
    async fn peer_raw_addresses(&self) -> Result<HashMap<PeerId, String>, ChainError>;

    /// Module keys by uid
    async fn peer_identities(&self) -> Result<HashMap<PeerId, PeerIdentity>, ChainError>;

    /// Key this validator queries with
    fn self_identity(&self) -> PeerIdentity;

    /// Weights, addresses and keys for one round
    async fn subnet_view(&self) -> Result<SubnetView, ChainError> {
        Ok(SubnetView {
            weights: self.peer_weights().await?,
            raw_addresses: self.peer_raw_addresses().await?,
            identities: self.peer_identities().await?,
        })
    }
}

/// On-disk layout of a subnet snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubnetSnapshot {
    pub netuid: u16,

    #[serde(default)]
    pub weights: HashMap<ValidatorId, Vec<(u16, PeerWeight)>>,

    #[serde(default)]
    pub addresses: HashMap<u16, String>,

    #[serde(default)]
    pub keys: HashMap<u16, String>,
}

impl From<SubnetSnapshot> for SubnetView {
    fn from(snapshot: SubnetSnapshot) -> Self {
        Self {
            weights: snapshot
                .weights
                .into_iter()
                .map(|(validator, entries)| {
                    let entries = entries.into_iter().map(|(uid, w)| (PeerId(uid), w)).collect();
                    (validator, entries)
                })
                .collect(),
            raw_addresses: snapshot
                .addresses
                .into_iter()
                .map(|(uid, addr)| (PeerId(uid), addr))
                .collect(),
            identities: snapshot
                .keys
                .into_iter()
                .map(|(uid, key)| (PeerId(uid), PeerIdentity::new(key)))
                .collect(),
        }
    }
}

enum SnapshotSource {
    /// Snapshot file, re-read on every request
    File { path: PathBuf, netuid: u16 },

    /// Fixed in-memory subnet state
    Static(SubnetSnapshot),
}

/// `ChainSource` backed by a subnet snapshot
pub struct SnapshotChain {
    source: SnapshotSource,
    own_identity: PeerIdentity,
}

impl SnapshotChain {
    /// Serve a fixed subnet state
    pub fn new(snapshot: SubnetSnapshot, own_identity: PeerIdentity) -> Self {
        Self {
            source: SnapshotSource::Static(snapshot),
            own_identity,
        }
    }

    /// Check the snapshot file for `netuid` once, then follow it
    pub fn load(path: &Path, netuid: u16, own_identity: PeerIdentity) -> Result<Self, ChainError> {
        let content = std::fs::read_to_string(path).map_err(|source| ChainError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot = parse_snapshot(&content, netuid)?;

        info!(
            "📦 Following subnet {} snapshot {:?}: {} validators, {} modules",
            snapshot.netuid,
            path,
            snapshot.weights.len(),
            snapshot.keys.len()
        );

        Ok(Self {
            source: SnapshotSource::File {
                path: path.to_path_buf(),
                netuid,
            },
            own_identity,
        })
    }

    async fn current(&self) -> Result<SubnetSnapshot, ChainError> {
        match &self.source {
            SnapshotSource::Static(snapshot) => Ok(snapshot.clone()),
            SnapshotSource::File { path, netuid } => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ChainError::Io {
                        path: path.clone(),
                        source,
                    })?;
                let snapshot = parse_snapshot(&content, *netuid)?;
                debug!("Read subnet snapshot {:?}", path);
                Ok(snapshot)
            }
        }
    }
}

fn parse_snapshot(content: &str, netuid: u16) -> Result<SubnetSnapshot, ChainError> {
    let snapshot: SubnetSnapshot = serde_json::from_str(content)?;

    if snapshot.netuid != netuid {
        return Err(ChainError::Unavailable(format!(
            "snapshot is for netuid {}, expected {}",
            snapshot.netuid, netuid
        )));
    }

    Ok(snapshot)
}

#[async_trait]
impl ChainSource for SnapshotChain {
    async fn peer_weights(&self) -> Result<WeightTable, ChainError> {
        Ok(self.subnet_view().await?.weights)
    }

    async fn peer_raw_addresses(&self) -> Result<HashMap<PeerId, String>, ChainError> {
        Ok(self.subnet_view().await?.raw_addresses)
    }

    async fn peer_identities(&self) -> Result<HashMap<PeerId, PeerIdentity>, ChainError> {
        Ok(self.subnet_view().await?.identities)
    }

    fn self_identity(&self) -> PeerIdentity {
        self.own_identity.clone()
    }

    /// One file read per round keeps the three maps consistent
    async fn subnet_view(&self) -> Result<SubnetView, ChainError> {
        Ok(self.current().await?.into())
    }
}
