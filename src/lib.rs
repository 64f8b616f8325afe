//! Velora validator query gateway
//!
//! Answers metric queries by asking the subnet's most trusted miners and
//! returning one of their answers:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   VELORA VALIDATOR API                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ChainSource          ←── weights, addresses, module keys    │
//! │  WeightedPeerSelector ←── top-K miners by summed weight      │
//! │  FanoutDispatcher     ←── bounded concurrent miner calls     │
//! │  aggregate()          ←── one answer, or NoUsableAnswer      │
//! │  HTTP API             ←── one route per metric kind          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod aggregate;
pub mod api;
pub mod chain;
pub mod config;
pub mod dispatch;
pub mod protocol;
pub mod query;
pub mod registry;
pub mod types;

pub use aggregate::{
    aggregate, FirstByPeerId, LowestLatency, PolicyKind, SelectionPolicy, UniformRandom,
};
pub use chain::{ChainError, ChainSource, SnapshotChain, SubnetView};
pub use config::GatewayConfig;
pub use dispatch::{FanoutDispatcher, PeerTransport, TcpTransport, TransportError};
pub use query::{QueryEngine, QueryError};
pub use types::{AggregatedResult, CallOutcome, PeerId, PeerIdentity, PeerInfo, RoundReport};
