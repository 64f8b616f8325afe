//! API Routes
//!
//! HTTP endpoints for metric queries, health checks and gateway metrics

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api::Metrics;
use crate::config::GatewayConfig;
use crate::protocol::{MetricRequest, QueryParams};
use crate::query::{QueryEngine, QueryError};
use crate::types::AggregatedResult;

/// Shared API state
pub struct ApiState {
    pub engine: Arc<QueryEngine>,
    pub metrics: Arc<Metrics>,
}

/// Build the router with all routes and middleware
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(health_check))

        // Metric queries
        .route("/current-pool-metric", get(get_current_pool_metric))
        .route("/current-token-metric", get(get_current_token_metric))
        .route("/token-metric", get(get_token_metric))
        .route("/token_metric", get(get_token_metric))
        .route("/pool-events", get(get_pool_events))
        .route("/recent-pool-events", get(get_recent_pool_events))

        // Metrics
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json))

        .with_state(state)
        .layer(middleware::from_fn(record_process_time))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::custom(handle_panic))
}

/// Run the HTTP API server
pub async fn run_api_server(
    config: Arc<GatewayConfig>,
    engine: Arc<QueryEngine>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let state = Arc::new(ApiState { engine, metrics });
    let app = build_router(state);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("📊 HTTP API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Log request latency and expose it as `X-Process-Time` (seconds)
async fn record_process_time(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let mut response = next.run(request).await;

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Request {} {} -> {} in {:.4} seconds",
        method,
        uri,
        response.status().as_u16(),
        elapsed
    );
    if let Ok(value) = HeaderValue::from_str(&format!("{:.6}", elapsed)) {
        response.headers_mut().insert("x-process-time", value);
    }

    response
}

/// GET /health - Simple health check
async fn health_check() -> impl IntoResponse {
    "OK"
}

/// GET /current-pool-metric
async fn get_current_pool_metric(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<QueryParams>,
) -> Response {
    run_round(&state, params.current_pool_metric()).await
}

/// GET /current-token-metric
async fn get_current_token_metric(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<QueryParams>,
) -> Response {
    run_round(&state, params.current_token_metric()).await
}

/// GET /token-metric
async fn get_token_metric(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<QueryParams>,
) -> Response {
    run_round(&state, params.token_metric()).await
}

/// GET /pool-events - requires `pool_address`
async fn get_pool_events(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<QueryParams>,
) -> Response {
    match params.pool_events() {
        Ok(request) => run_round(&state, request).await,
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

/// GET /recent-pool-events
async fn get_recent_pool_events(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<QueryParams>,
) -> Response {
    run_round(&state, params.recent_pool_events()).await
}

/// Run one query round and map its outcome to an HTTP response
async fn run_round(state: &ApiState, request: MetricRequest) -> Response {
    state.metrics.inc_rounds();

    match state.engine.query(request).await {
        Ok(report) => {
            state.metrics.record_round(&report);

            let summary = serde_json::json!({
                "ranked": report.ranked,
                "dispatched": report.dispatched,
                "succeeded": report.succeeded,
            });

            match report.result {
                AggregatedResult::Answer { peer, payload, elapsed } => Json(serde_json::json!({
                    "status": "ok",
                    "miner_uid": peer.0,
                    "process_time": elapsed.as_secs_f64(),
                    "miners": summary,
                    "data": payload,
                }))
                .into_response(),
                AggregatedResult::NoUsableAnswer => Json(serde_json::json!({
                    "status": "no_data",
                    "miners": summary,
                    "data": null,
                }))
                .into_response(),
            }
        }
        Err(e) => {
            state.metrics.inc_aborted();
            error!("Query round aborted: {}", e);

            let status = match e {
                QueryError::NotRegistered { .. } => StatusCode::SERVICE_UNAVAILABLE,
                QueryError::Chain(_) => StatusCode::BAD_GATEWAY,
            };
            error_response(status, &e.to_string())
        }
    }
}

fn error_response(status: StatusCode, detail: &str) -> Response {
    (status, Json(serde_json::json!({ "detail": detail }))).into_response()
}

/// Turn a handler panic into the same JSON error shape as other failures
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!("Request handler panicked: {}", message);

    error_response(StatusCode::INTERNAL_SERVER_ERROR, "An unexpected error occurred.")
}

/// GET /metrics - Prometheus format metrics
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
}

/// GET /metrics/json - JSON format metrics
async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.metrics.to_json())
}
