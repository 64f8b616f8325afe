//! HTTP API Module
//!
//! Exposes one endpoint per metric kind plus health and metrics
//! endpoints. Each metric request runs one full query round.

mod routes;
mod metrics;

pub use routes::{build_router, run_api_server, ApiState};
pub use metrics::Metrics;
