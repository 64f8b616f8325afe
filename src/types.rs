//! Core types shared by selection, dispatch and aggregation
//!
//! Everything here lives for a single query round. Nothing is cached
//! between rounds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::protocol::MetricResponse;

// =============================================================================
// PRIMITIVE TYPES
// =============================================================================

/// Validator identifier within the subnet
pub type ValidatorId = u16;

/// Trust weight assigned by a validator to a miner
pub type PeerWeight = u64;

/// Miner identifier within the subnet numbering (uid)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u16);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid{}", self.0)
    }
}

/// Public key used to authenticate a miner (SS58 encoded)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentity(pub String);

impl PeerIdentity {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// PEER INFORMATION
// =============================================================================

/// Reachable network address of a miner
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A miner that can actually be called this round: it has both an
/// address and an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub address: PeerAddress,
    pub identity: PeerIdentity,
}

// =============================================================================
// CALL OUTCOMES
// =============================================================================

/// Why a single miner call did not produce a usable payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("call task aborted: {0}")]
    TaskAborted(String),
}

/// Result of calling one miner
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Success {
        payload: MetricResponse,
        elapsed: Duration,
    },
    Failure {
        reason: FailureReason,
    },
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success { .. })
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            CallOutcome::Failure { reason } => Some(reason),
            CallOutcome::Success { .. } => None,
        }
    }
}

/// A call outcome tagged with the miner it came from
#[derive(Debug, Clone)]
pub struct PeerOutcome {
    pub peer: PeerId,
    pub outcome: CallOutcome,
}

// =============================================================================
// ROUND RESULT
// =============================================================================

/// The single answer chosen for a round
#[derive(Debug, Clone)]
pub enum AggregatedResult {
    /// One miner's payload, returned as-is
    Answer {
        peer: PeerId,
        payload: MetricResponse,
        elapsed: Duration,
    },

    /// No miner produced a usable payload
    NoUsableAnswer,
}

impl AggregatedResult {
    pub fn is_answer(&self) -> bool {
        matches!(self, AggregatedResult::Answer { .. })
    }

    pub fn payload(&self) -> Option<&MetricResponse> {
        match self {
            AggregatedResult::Answer { payload, .. } => Some(payload),
            AggregatedResult::NoUsableAnswer => None,
        }
    }
}

/// Outcome of a whole round plus the counts needed to judge it
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub result: AggregatedResult,

    /// Miners in the weighted top-K before resolution
    pub ranked: usize,

    /// Miners that had both an address and an identity
    pub dispatched: usize,

    /// Calls that returned a well-formed payload
    pub succeeded: usize,
}

impl RoundReport {
    /// Top-K miners that could not be reached this round
    pub fn unreachable(&self) -> usize {
        self.ranked.saturating_sub(self.dispatched)
    }
}
