//! Fan-out Dispatcher Module
//!
//! Sends the same request to every selected miner concurrently and waits
//! for all of them. Concurrency is capped by a semaphore; each call gets
//! its own timeout, and any failure stays confined to that miner's slot.
//!
//! ## Guarantees
//!
//! - Exactly one outcome per submitted miner, in submission order
//! - No early return on first success, no retries
//! - Round latency is bounded by the slowest call, not the sum of calls

mod transport;

pub use transport::TcpTransport;

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::protocol::{MetricRequest, MetricResponse};
use crate::types::{CallOutcome, FailureReason, PeerInfo, PeerOutcome};

/// Default number of miner calls in flight at once
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 8;

/// Failure reported by a transport for a single call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("timed out")]
    Timeout,
}

/// Opaque unit of work that reaches one miner
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send `request` to `peer` and return the raw response body
    async fn call(
        &self,
        peer: &PeerInfo,
        request: &MetricRequest,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;
}

/// Concurrent, failure-isolated request fan-out
pub struct FanoutDispatcher {
    transport: Arc<dyn PeerTransport>,
    max_concurrent: usize,
}

impl FanoutDispatcher {
    pub fn new(transport: Arc<dyn PeerTransport>, max_concurrent: usize) -> Self {
        Self {
            transport,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Call every miner in `peers` and collect one outcome per miner
    pub async fn dispatch(
        &self,
        peers: &[PeerInfo],
        request: Arc<MetricRequest>,
        call_timeout: Duration,
    ) -> Vec<PeerOutcome> {
        if peers.is_empty() {
            return Vec::new();
        }

        info!(
            "Dispatching {} to {} miners: {:?}",
            request.class_name(),
            peers.len(),
            peers.iter().map(|p| p.id.0).collect::<Vec<_>>()
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for (slot, peer) in peers.iter().cloned().enumerate() {
            let transport = self.transport.clone();
            let request = request.clone();
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                // The semaphore is never closed while tasks run
                let _permit = semaphore.acquire_owned().await.ok();

                // A panicking transport only poisons this slot. The call stays
                // inside this task, so dropping the round cancels it too.
                let call = AssertUnwindSafe(call_peer(
                    transport.as_ref(),
                    &peer,
                    &request,
                    call_timeout,
                ))
                .catch_unwind();

                let outcome = match call.await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        warn!("Call to {} aborted: {}", peer.id, message);
                        CallOutcome::Failure {
                            reason: FailureReason::TaskAborted(message),
                        }
                    }
                };
                (slot, outcome)
            });
        }

        let mut slots: Vec<Option<CallOutcome>> = vec![None; peers.len()];

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, outcome)) => slots[slot] = Some(outcome),
                Err(e) => error!("Dispatch worker failed: {}", e),
            }
        }

        peers
            .iter()
            .zip(slots)
            .map(|(peer, outcome)| PeerOutcome {
                peer: peer.id,
                outcome: outcome.unwrap_or(CallOutcome::Failure {
                    reason: FailureReason::TaskAborted("no outcome recorded".to_string()),
                }),
            })
            .collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "call panicked".to_string()
    }
}

/// Make one call, enforce its timeout and validate the payload
async fn call_peer(
    transport: &dyn PeerTransport,
    peer: &PeerInfo,
    request: &MetricRequest,
    call_timeout: Duration,
) -> CallOutcome {
    let start = tokio::time::Instant::now();

    let result =
        tokio::time::timeout(call_timeout, transport.call(peer, request, call_timeout)).await;

    let reason = match result {
        Ok(Ok(bytes)) => match MetricResponse::parse(&bytes, request) {
            Ok(payload) => {
                let elapsed = start.elapsed();
                debug!("Miner {} ({}) answered in {:?}", peer.id, peer.address, elapsed);
                return CallOutcome::Success { payload, elapsed };
            }
            Err(e) => FailureReason::InvalidResponse(e.to_string()),
        },
        Ok(Err(TransportError::Timeout)) | Err(_) => FailureReason::Timeout(call_timeout),
        Ok(Err(e)) => FailureReason::Transport(e.to_string()),
    };

    warn!("Miner {} ({}) failed to generate an answer: {}", peer.id, peer.address, reason);
    CallOutcome::Failure { reason }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::QueryParams;
    use crate::types::{PeerAddress, PeerIdentity, PeerId};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted behaviour for one miner
    #[derive(Clone)]
    pub(crate) enum MockReply {
        Respond { body: Vec<u8>, delay: Duration },
        Hang,
        Error(TransportError),
        Panic,
    }

    /// In-process transport that replays scripted replies per uid
    pub(crate) struct MockTransport {
        replies: HashMap<PeerId, MockReply>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl MockTransport {
        pub(crate) fn new(replies: HashMap<PeerId, MockReply>) -> Self {
            Self {
                replies,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn peak_in_flight(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }

        pub(crate) fn in_flight(&self) -> usize {
            self.in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PeerTransport for MockTransport {
        async fn call(
            &self,
            peer: &PeerInfo,
            _request: &MetricRequest,
            _timeout: Duration,
        ) -> Result<Vec<u8>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            let _in_flight = InFlight(&self.in_flight);

            let reply = self
                .replies
                .get(&peer.id)
                .cloned()
                .unwrap_or(MockReply::Error(TransportError::Connect("unknown peer".to_string())));

            match reply {
                MockReply::Respond { body, delay } => {
                    tokio::time::sleep(delay).await;
                    Ok(body)
                }
                MockReply::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                MockReply::Error(e) => Err(e),
                MockReply::Panic => panic!("miner handler blew up"),
            }
        }
    }

    /// Released however the call ends
    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn test_peer(uid: u16) -> PeerInfo {
        PeerInfo {
            id: PeerId(uid),
            address: PeerAddress { host: format!("10.0.0.{}", uid), port: 8000 },
            identity: PeerIdentity::new(format!("5Miner{}", uid)),
        }
    }

    pub(crate) fn token_body(symbol: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "class_name": "CurrentTokenMetricResponse",
            "data": [{
                "token_address": "0xabc",
                "symbol": symbol,
                "price": 1.0,
                "total_volume": 2.0,
                "total_liquidity": 3.0,
            }],
            "total_token_count": 1,
        }))
        .unwrap()
    }

    pub(crate) fn respond(body: Vec<u8>, delay_ms: u64) -> MockReply {
        MockReply::Respond { body, delay: Duration::from_millis(delay_ms) }
    }

    fn token_request() -> Arc<MetricRequest> {
        Arc::new(QueryParams::default().current_token_metric())
    }

    #[tokio::test]
    async fn test_empty_peer_set() {
        let transport = Arc::new(MockTransport::new(HashMap::new()));
        let dispatcher = FanoutDispatcher::new(transport.clone(), 8);

        let outcomes = dispatcher.dispatch(&[], token_request(), Duration::from_secs(1)).await;
        assert!(outcomes.is_empty());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_one_outcome_per_peer_in_order() {
        let mut replies = HashMap::new();
        replies.insert(PeerId(1), respond(token_body("A"), 30));
        replies.insert(PeerId(2), MockReply::Error(TransportError::Connect("refused".to_string())));
        replies.insert(PeerId(3), respond(b"{}".to_vec(), 0));
        replies.insert(PeerId(4), MockReply::Panic);
        replies.insert(PeerId(5), respond(token_body("E"), 5));

        let dispatcher = FanoutDispatcher::new(Arc::new(MockTransport::new(replies)), 8);
        let peers: Vec<_> = (1..=5).map(test_peer).collect();

        let outcomes = dispatcher.dispatch(&peers, token_request(), Duration::from_secs(2)).await;

        assert_eq!(outcomes.len(), 5);
        let ids: Vec<_> = outcomes.iter().map(|o| o.peer.0).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        assert!(outcomes[0].outcome.is_success());
        assert!(matches!(
            outcomes[1].outcome,
            CallOutcome::Failure { reason: FailureReason::Transport(_) }
        ));
        assert!(matches!(
            outcomes[2].outcome,
            CallOutcome::Failure { reason: FailureReason::InvalidResponse(_) }
        ));
        assert!(matches!(
            outcomes[3].outcome,
            CallOutcome::Failure { reason: FailureReason::TaskAborted(_) }
        ));
        assert!(outcomes[4].outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_peer_times_out_without_blocking_others() {
        let mut replies = HashMap::new();
        replies.insert(PeerId(1), MockReply::Hang);
        replies.insert(PeerId(2), respond(token_body("B"), 100));

        let dispatcher = FanoutDispatcher::new(Arc::new(MockTransport::new(replies)), 8);
        let peers = vec![test_peer(1), test_peer(2)];
        let timeout = Duration::from_secs(5);

        let start = tokio::time::Instant::now();
        let outcomes = dispatcher.dispatch(&peers, token_request(), timeout).await;

        assert!(start.elapsed() < timeout + Duration::from_secs(1));
        assert_eq!(
            outcomes[0].outcome.failure_reason(),
            Some(&FailureReason::Timeout(timeout))
        );
        match &outcomes[1].outcome {
            CallOutcome::Success { elapsed, .. } => assert!(*elapsed >= Duration::from_millis(100)),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_run_in_parallel() {
        let replies: HashMap<_, _> =
            (1..=4).map(|uid| (PeerId(uid), respond(token_body("X"), 1_000))).collect();

        let dispatcher = FanoutDispatcher::new(Arc::new(MockTransport::new(replies)), 8);
        let peers: Vec<_> = (1..=4).map(test_peer).collect();

        let start = tokio::time::Instant::now();
        let outcomes = dispatcher.dispatch(&peers, token_request(), Duration::from_secs(10)).await;

        assert!(outcomes.iter().all(|o| o.outcome.is_success()));
        assert!(start.elapsed() < Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_respected() {
        let replies: HashMap<_, _> =
            (1..=10).map(|uid| (PeerId(uid), respond(token_body("X"), 50))).collect();
        let transport = Arc::new(MockTransport::new(replies));

        let dispatcher = FanoutDispatcher::new(transport.clone(), 3);
        let peers: Vec<_> = (1..=10).map(test_peer).collect();

        let outcomes = dispatcher.dispatch(&peers, token_request(), Duration::from_secs(10)).await;

        assert_eq!(outcomes.len(), 10);
        assert_eq!(transport.calls(), 10);
        assert!(transport.peak_in_flight() <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_round_cancels_calls() {
        let replies: HashMap<_, _> = (1..=4).map(|uid| (PeerId(uid), MockReply::Hang)).collect();
        let transport = Arc::new(MockTransport::new(replies));

        let dispatcher = FanoutDispatcher::new(transport.clone(), 8);
        let peers: Vec<_> = (1..=4).map(test_peer).collect();

        let round = dispatcher.dispatch(&peers, token_request(), Duration::from_secs(60));
        let cut_short = tokio::time::timeout(Duration::from_millis(10), round).await;
        assert!(cut_short.is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(transport.calls(), 4);
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panic_message_recorded() {
        let mut replies = HashMap::new();
        replies.insert(PeerId(1), MockReply::Panic);
        let transport = Arc::new(MockTransport::new(replies));

        let dispatcher = FanoutDispatcher::new(transport.clone(), 8);
        let outcomes = dispatcher
            .dispatch(&[test_peer(1)], token_request(), Duration::from_secs(1))
            .await;

        assert_eq!(
            outcomes[0].outcome.failure_reason(),
            Some(&FailureReason::TaskAborted("miner handler blew up".to_string()))
        );
        assert_eq!(transport.in_flight(), 0);
    }

    #[test]
    fn test_zero_concurrency_coerced() {
        let dispatcher = FanoutDispatcher::new(Arc::new(MockTransport::new(HashMap::new())), 0);
        assert_eq!(dispatcher.max_concurrent(), 1);
    }
}
