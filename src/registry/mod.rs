//! Miner Registry Module
//!
//! Turns the chain's view of the subnet (weights, published addresses,
//! module keys) into the list of miners worth calling this round.

pub mod address;
mod selection;

pub use address::{extract_address, resolve_addresses};
pub use selection::{select_top_k, Selection, SelectionError, WeightTable, WeightedPeerSelector};
