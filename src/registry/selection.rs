//! Weighted miner selection
//!
//! Validators each publish a weight vector over miners. Weights are summed
//! per miner across all validators and the heaviest `k` miners are picked.
//! Equal totals are ordered by ascending uid so selection is reproducible.

use std::collections::HashMap;
use tracing::debug;

use super::address::resolve_addresses;
use crate::types::{PeerIdentity, PeerId, PeerInfo, PeerWeight, ValidatorId};

/// Validator → list of (miner, weight) pairs
pub type WeightTable = HashMap<ValidatorId, Vec<(PeerId, PeerWeight)>>;

/// Errors that stop selection before anything is dispatched
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("validator key {identity} is not registered in subnet")]
    NotRegistered { identity: PeerIdentity },
}

/// Sum weights per miner and return the top `k`, heaviest first
pub fn select_top_k(weights: &WeightTable, k: usize) -> Vec<(PeerId, PeerWeight)> {
    let mut totals: HashMap<PeerId, PeerWeight> = HashMap::new();

    for entries in weights.values() {
        for (peer, weight) in entries {
            let total = totals.entry(*peer).or_insert(0);
            *total = total.saturating_add(*weight);
        }
    }

    let mut ranked: Vec<_> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(k);
    ranked
}

/// Miners chosen for a round
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Reachable miners, in rank order
    pub peers: Vec<PeerInfo>,

    /// Weighted top-K before reachability filtering
    pub ranked: Vec<(PeerId, PeerWeight)>,
}

impl Selection {
    /// Top-K miners dropped for a missing address or identity
    pub fn unreachable(&self) -> usize {
        self.ranked.len() - self.peers.len()
    }
}

/// Chain view used for one selection round
#[derive(Debug, Clone, Default)]
pub struct WeightedPeerSelector {
    weights: WeightTable,
    raw_addresses: HashMap<PeerId, String>,
    identities: HashMap<PeerId, PeerIdentity>,
}

impl WeightedPeerSelector {
    pub fn new(
        weights: WeightTable,
        raw_addresses: HashMap<PeerId, String>,
        identities: HashMap<PeerId, PeerIdentity>,
    ) -> Self {
        Self {
            weights,
            raw_addresses,
            identities,
        }
    }

    /// Whether `identity` belongs to any registered module
    pub fn is_registered(&self, identity: &PeerIdentity) -> bool {
        self.identities.values().any(|known| known == identity)
    }

    /// Pick the top `k` miners and resolve them to callable peers
    ///
    /// Fails with `NotRegistered` before doing any work if `own_identity`
    /// is unknown to the subnet.
    pub fn select(
        &self,
        own_identity: &PeerIdentity,
        k: usize,
    ) -> Result<Selection, SelectionError> {
        if !self.is_registered(own_identity) {
            return Err(SelectionError::NotRegistered {
                identity: own_identity.clone(),
            });
        }

        let ranked = select_top_k(&self.weights, k);
        let addresses = resolve_addresses(&self.raw_addresses);

        let peers: Vec<PeerInfo> = ranked
            .iter()
            .filter_map(|(id, _)| {
                let address = addresses.get(id);
                let identity = self.identities.get(id);
                match (address, identity) {
                    (Some(address), Some(identity)) => Some(PeerInfo {
                        id: *id,
                        address: address.clone(),
                        identity: identity.clone(),
                    }),
                    _ => {
                        debug!(
                            "Skipping {}: address={} identity={}",
                            id,
                            address.is_some(),
                            identity.is_some()
                        );
                        None
                    }
                }
            })
            .collect();

        Ok(Selection { peers, ranked })
    }
}
