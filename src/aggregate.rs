//! Answer aggregation
//!
//! Failed calls are discarded and a `SelectionPolicy` picks one of the
//! remaining answers. Answers are never merged or compared: any single
//! successful miner response is an acceptable answer for the round.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::MetricResponse;
use crate::types::{AggregatedResult, CallOutcome, PeerId, PeerOutcome};

/// A successful call, as seen by a selection policy
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub peer: PeerId,
    pub payload: &'a MetricResponse,
    pub elapsed: Duration,
}

/// Strategy choosing one answer among successful calls
pub trait SelectionPolicy: Send + Sync {
    /// Return the index of the chosen candidate; `candidates` is never empty
    fn choose(&self, candidates: &[Candidate<'_>]) -> usize;
}

/// Uniformly random pick
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformRandom;

impl SelectionPolicy for UniformRandom {
    fn choose(&self, candidates: &[Candidate<'_>]) -> usize {
        rand::thread_rng().gen_range(0..candidates.len())
    }
}

/// Lowest uid wins
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstByPeerId;

impl SelectionPolicy for FirstByPeerId {
    fn choose(&self, candidates: &[Candidate<'_>]) -> usize {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.peer)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

/// Fastest answer wins, ties broken by lowest uid
#[derive(Debug, Default, Clone, Copy)]
pub struct LowestLatency;

impl SelectionPolicy for LowestLatency {
    fn choose(&self, candidates: &[Candidate<'_>]) -> usize {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| (c.elapsed, c.peer))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

/// Policy names accepted in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    UniformRandom,
    FirstByPeerId,
    LowestLatency,
}

impl PolicyKind {
    pub fn build(self) -> Box<dyn SelectionPolicy> {
        match self {
            PolicyKind::UniformRandom => Box::new(UniformRandom),
            PolicyKind::FirstByPeerId => Box::new(FirstByPeerId),
            PolicyKind::LowestLatency => Box::new(LowestLatency),
        }
    }
}

/// Reduce a round's outcomes to at most one answer
pub fn aggregate(outcomes: &[PeerOutcome], policy: &dyn SelectionPolicy) -> AggregatedResult {
    let candidates: Vec<Candidate<'_>> = outcomes
        .iter()
        .filter_map(|o| match &o.outcome {
            CallOutcome::Success { payload, elapsed } => Some(Candidate {
                peer: o.peer,
                payload,
                elapsed: *elapsed,
            }),
            CallOutcome::Failure { .. } => None,
        })
        .collect();

    if candidates.is_empty() {
        return AggregatedResult::NoUsableAnswer;
    }

    // Out-of-range picks fall back to the first candidate
    let index = policy.choose(&candidates);
    let chosen = candidates.get(index).unwrap_or(&candidates[0]);

    AggregatedResult::Answer {
        peer: chosen.peer,
        payload: chosen.payload.clone(),
        elapsed: chosen.elapsed,
    }
}
