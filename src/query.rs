//! Query rounds
//!
//! One round = select miners from the chain view, fan the request out to
//! them, and reduce their answers to one. Only an unregistered validator
//! key or an unreachable chain aborts a round; every miner-level problem
//! is absorbed and, at worst, yields `NoUsableAnswer`.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::aggregate::{aggregate, SelectionPolicy};
use crate::chain::{ChainError, ChainSource};
use crate::dispatch::FanoutDispatcher;
use crate::protocol::MetricRequest;
use crate::registry::{SelectionError, WeightedPeerSelector};
use crate::types::{AggregatedResult, PeerIdentity, RoundReport};

/// Errors that abort a whole round
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("validator key {identity} is not registered in subnet")]
    NotRegistered { identity: PeerIdentity },

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl From<SelectionError> for QueryError {
    fn from(e: SelectionError) -> Self {
        match e {
            SelectionError::NotRegistered { identity } => QueryError::NotRegistered { identity },
        }
    }
}

/// Runs select → dispatch → aggregate rounds
pub struct QueryEngine {
    chain: Arc<dyn ChainSource>,
    dispatcher: FanoutDispatcher,
    policy: Box<dyn SelectionPolicy>,
    top_k: usize,
    call_timeout: Duration,
}

impl QueryEngine {
    pub fn new(
        chain: Arc<dyn ChainSource>,
        dispatcher: FanoutDispatcher,
        policy: Box<dyn SelectionPolicy>,
        top_k: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            dispatcher,
            policy,
            top_k,
            call_timeout,
        }
    }

    /// Run one full round for `request`
    pub async fn query(&self, request: MetricRequest) -> Result<RoundReport, QueryError> {
        let own_identity = self.chain.self_identity();

        let view = self.chain.subnet_view().await?;
        let selector = WeightedPeerSelector::new(view.weights, view.raw_addresses, view.identities);

        let selection = selector.select(&own_identity, self.top_k)?;
        if selection.unreachable() > 0 {
            warn!(
                "{} of the top {} miners have no usable address or key",
                selection.unreachable(),
                selection.ranked.len()
            );
        }

        let request = Arc::new(request);
        let outcomes = self
            .dispatcher
            .dispatch(&selection.peers, request.clone(), self.call_timeout)
            .await;

        let succeeded = outcomes.iter().filter(|o| o.outcome.is_success()).count();
        let result = aggregate(&outcomes, self.policy.as_ref());

        match &result {
            AggregatedResult::Answer { peer, elapsed, .. } => info!(
                "{}: {}/{} miners answered, using {} ({:?})",
                request.class_name(),
                succeeded,
                outcomes.len(),
                peer,
                elapsed
            ),
            AggregatedResult::NoUsableAnswer => warn!(
                "{}: no miner managed to give an answer ({} dispatched)",
                request.class_name(),
                outcomes.len()
            ),
        }

        Ok(RoundReport {
            result,
            ranked: selection.ranked.len(),
            dispatched: selection.peers.len(),
            succeeded,
        })
    }
}
