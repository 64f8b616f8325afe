//! Metrics Collection
//!
//! Counters describing query rounds and miner calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::types::RoundReport;

/// Metrics collector for the gateway
#[derive(Default)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    /// Query rounds started
    pub rounds_total: AtomicU64,

    /// Rounds that produced an answer
    pub rounds_answered: AtomicU64,

    /// Rounds where no miner gave a usable answer
    pub rounds_no_data: AtomicU64,

    /// Rounds aborted (unregistered key, chain unavailable)
    pub rounds_aborted: AtomicU64,

    /// Miner calls that returned a valid payload
    pub miner_calls_succeeded: AtomicU64,

    /// Miner calls that failed or timed out
    pub miner_calls_failed: AtomicU64,

    /// Top-K miners skipped for missing address or key
    pub miners_unreachable: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn inc_rounds(&self) {
        self.rounds_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_aborted(&self) {
        self.rounds_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a finished round into the counters
    pub fn record_round(&self, report: &RoundReport) {
        if report.result.is_answer() {
            self.rounds_answered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rounds_no_data.fetch_add(1, Ordering::Relaxed);
        }

        let failed = report.dispatched.saturating_sub(report.succeeded);
        self.miner_calls_succeeded.fetch_add(report.succeeded as u64, Ordering::Relaxed);
        self.miner_calls_failed.fetch_add(failed as u64, Ordering::Relaxed);
        self.miners_unreachable.fetch_add(report.unreachable() as u64, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let series = [
            ("uptime_seconds", "gauge", "Gateway uptime in seconds", self.uptime_secs()),
            ("rounds_total", "counter", "Query rounds started", load(&self.rounds_total)),
            (
                "rounds_answered",
                "counter",
                "Rounds that produced an answer",
                load(&self.rounds_answered),
            ),
            (
                "rounds_no_data",
                "counter",
                "Rounds without a usable answer",
                load(&self.rounds_no_data),
            ),
            (
                "rounds_aborted",
                "counter",
                "Rounds aborted before dispatch",
                load(&self.rounds_aborted),
            ),
            (
                "miner_calls_succeeded",
                "counter",
                "Miner calls with a valid payload",
                load(&self.miner_calls_succeeded),
            ),
            (
                "miner_calls_failed",
                "counter",
                "Miner calls that failed or timed out",
                load(&self.miner_calls_failed),
            ),
            (
                "miners_unreachable",
                "counter",
                "Selected miners without address or key",
                load(&self.miners_unreachable),
            ),
        ];

        let mut output = String::new();
        for (name, kind, help, value) in series {
            output.push_str(&format!(
                "# HELP velora_gateway_{name} {help}\n\
                 # TYPE velora_gateway_{name} {kind}\n\
                 velora_gateway_{name} {value}\n\n"
            ));
        }
        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "rounds": {
                "total": self.rounds_total.load(Ordering::Relaxed),
                "answered": self.rounds_answered.load(Ordering::Relaxed),
                "no_data": self.rounds_no_data.load(Ordering::Relaxed),
                "aborted": self.rounds_aborted.load(Ordering::Relaxed),
            },
            "miner_calls": {
                "succeeded": self.miner_calls_succeeded.load(Ordering::Relaxed),
                "failed": self.miner_calls_failed.load(Ordering::Relaxed),
                "unreachable": self.miners_unreachable.load(Ordering::Relaxed),
            },
        })
    }
}
