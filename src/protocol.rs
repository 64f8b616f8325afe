//! Miner query protocol
//!
//! Requests ("synapses") and responses exchanged with miners. Both sides
//! are JSON objects tagged by `class_name`, so a response can be checked
//! against the request that produced it before it is accepted.

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Default page size when none (or garbage) is supplied
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// Largest page a miner is asked for
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Default look-back window for time-ranged queries
pub const DEFAULT_TIME_RANGE_HOURS: i64 = 24;

// =============================================================================
// REQUESTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentPoolMetricRequest {
    pub page_limit: u32,
    pub page_number: u32,
    pub fee_tier: u32,
    pub liquidity_threshold: f64,
    pub volume_threshold: f64,
    pub search_query: String,
    pub sort_by: String,
    pub sort_order: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentTokenMetricRequest {
    pub page_limit: u32,
    pub page_number: u32,
    pub search_query: String,
    pub sort_by: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetricRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEventRequest {
    pub pool_address: String,
    pub start_datetime: i64,
    pub end_datetime: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentPoolEventRequest {
    pub page_limit: u32,
    pub filter_by: String,
}

impl Default for RecentPoolEventRequest {
    fn default() -> Self {
        Self {
            page_limit: DEFAULT_PAGE_LIMIT,
            filter_by: "all".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckRequest {}

/// The request sent, unchanged, to every selected miner in a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class_name")]
pub enum MetricRequest {
    #[serde(rename = "CurrentPoolMetricSynapse")]
    CurrentPoolMetric(CurrentPoolMetricRequest),

    #[serde(rename = "CurrentTokenMetricSynapse")]
    CurrentTokenMetric(CurrentTokenMetricRequest),

    #[serde(rename = "TokenMetricSynapse")]
    TokenMetric(TokenMetricRequest),

    #[serde(rename = "PoolEventSynapse")]
    PoolEvent(PoolEventRequest),

    #[serde(rename = "RecentPoolEventSynapse")]
    RecentPoolEvent(RecentPoolEventRequest),

    #[serde(rename = "HealthCheckSynapse")]
    HealthCheck(HealthCheckRequest),
}

impl MetricRequest {
    /// Wire class name of this request
    pub fn class_name(&self) -> &'static str {
        match self {
            MetricRequest::CurrentPoolMetric(_) => "CurrentPoolMetricSynapse",
            MetricRequest::CurrentTokenMetric(_) => "CurrentTokenMetricSynapse",
            MetricRequest::TokenMetric(_) => "TokenMetricSynapse",
            MetricRequest::PoolEvent(_) => "PoolEventSynapse",
            MetricRequest::RecentPoolEvent(_) => "RecentPoolEventSynapse",
            MetricRequest::HealthCheck(_) => "HealthCheckSynapse",
        }
    }

    /// Class name a well-behaved miner answers with
    pub fn expected_response(&self) -> &'static str {
        match self {
            MetricRequest::CurrentPoolMetric(_) => "CurrentPoolMetricResponse",
            MetricRequest::CurrentTokenMetric(_) => "CurrentTokenMetricResponse",
            MetricRequest::TokenMetric(_) => "TokenMetricResponse",
            MetricRequest::PoolEvent(_) => "PoolEventResponse",
            MetricRequest::RecentPoolEvent(_) => "RecentPoolEventResponse",
            MetricRequest::HealthCheck(_) => "HealthCheckResponse",
        }
    }

    /// Miner-side method that serves this request
    pub fn rpc_method(&self) -> String {
        format!("forward{}", self.class_name())
    }
}

// =============================================================================
// RESPONSES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentPoolMetric {
    pub pool_address: String,
    pub liquidity_token0: f64,
    pub liquidity_token1: f64,
    pub volume_token0: f64,
    pub volume_token1: f64,
    pub token0_symbol: String,
    pub token1_symbol: String,
    pub fee: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentTokenMetric {
    pub token_address: String,
    pub symbol: String,
    pub price: f64,
    pub total_volume: f64,
    pub total_liquidity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEvent {
    pub timestamp: i64,
    pub token0_symbol: String,
    pub token1_symbol: String,
    pub amount0: f64,
    pub amount1: f64,
    pub event_type: String,
    pub transaction_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentPoolMetricResponse {
    pub data: Vec<CurrentPoolMetric>,
    pub overall_data_hash: String,
    pub total_pool_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentTokenMetricResponse {
    pub data: Vec<CurrentTokenMetric>,
    pub total_token_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetricResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEventResponse {
    pub data: Vec<serde_json::Value>,
    pub overall_data_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentPoolEventResponse {
    pub data: Vec<PoolEvent>,
    pub overall_data_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub time_completed: i64,
    pub pool_addresses: Vec<String>,
}

/// A miner's answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class_name")]
pub enum MetricResponse {
    #[serde(rename = "CurrentPoolMetricResponse")]
    CurrentPoolMetric(CurrentPoolMetricResponse),

    #[serde(rename = "CurrentTokenMetricResponse")]
    CurrentTokenMetric(CurrentTokenMetricResponse),

    #[serde(rename = "TokenMetricResponse")]
    TokenMetric(TokenMetricResponse),

    #[serde(rename = "PoolEventResponse")]
    PoolEvent(PoolEventResponse),

    #[serde(rename = "RecentPoolEventResponse")]
    RecentPoolEvent(RecentPoolEventResponse),

    #[serde(rename = "HealthCheckResponse")]
    HealthCheck(HealthCheckResponse),
}

/// A payload that could not be accepted as an answer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("expected {expected}, got {actual}")]
    WrongClass {
        expected: &'static str,
        actual: &'static str,
    },
}

impl MetricResponse {
    pub fn class_name(&self) -> &'static str {
        match self {
            MetricResponse::CurrentPoolMetric(_) => "CurrentPoolMetricResponse",
            MetricResponse::CurrentTokenMetric(_) => "CurrentTokenMetricResponse",
            MetricResponse::TokenMetric(_) => "TokenMetricResponse",
            MetricResponse::PoolEvent(_) => "PoolEventResponse",
            MetricResponse::RecentPoolEvent(_) => "RecentPoolEventResponse",
            MetricResponse::HealthCheck(_) => "HealthCheckResponse",
        }
    }

    /// Decode raw bytes from a miner and check they answer `request`
    pub fn parse(bytes: &[u8], request: &MetricRequest) -> Result<Self, ResponseError> {
        let response: MetricResponse =
            serde_json::from_slice(bytes).map_err(|e| ResponseError::Malformed(e.to_string()))?;

        let expected = request.expected_response();
        if response.class_name() != expected {
            return Err(ResponseError::WrongClass {
                expected,
                actual: response.class_name(),
            });
        }

        Ok(response)
    }
}

// =============================================================================
// QUERY PARAMETERS
// =============================================================================

/// Raw query parameters as received by the gateway
///
/// Everything arrives as an optional string; the builders below coerce
/// values into a typed request, falling back to defaults on garbage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    pub page_limit: Option<String>,
    pub page_number: Option<String>,
    pub search_query: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub fee_tier: Option<String>,
    pub liquidity_threshold: Option<String>,
    pub volume_threshold: Option<String>,
    pub pool_address: Option<String>,
    pub start_datetime: Option<String>,
    pub end_datetime: Option<String>,
    pub filter_by: Option<String>,
}

/// A parameter set that cannot form a request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("missing required parameter: {0}")]
    Missing(&'static str),

    #[error("start_datetime ({start}) is after end_datetime ({end})")]
    InvertedRange { start: i64, end: i64 },
}

/// Clamp a page limit into `[1, MAX_PAGE_LIMIT]`
///
/// Absent or non-numeric input yields `DEFAULT_PAGE_LIMIT`.
pub fn clamp_page_limit(raw: Option<&str>) -> u32 {
    match raw.and_then(|s| s.trim().parse::<i64>().ok()) {
        Some(value) => value.clamp(1, MAX_PAGE_LIMIT as i64) as u32,
        None => DEFAULT_PAGE_LIMIT,
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<&str>, default: T) -> T {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn text_or(raw: Option<&String>, default: &str) -> String {
    raw.cloned().unwrap_or_else(|| default.to_string())
}

impl QueryParams {
    fn page_limit(&self) -> u32 {
        clamp_page_limit(self.page_limit.as_deref())
    }

    fn page_number(&self) -> u32 {
        parse_or(self.page_number.as_deref(), 1u32).max(1)
    }

    pub fn current_pool_metric(&self) -> MetricRequest {
        MetricRequest::CurrentPoolMetric(CurrentPoolMetricRequest {
            page_limit: self.page_limit(),
            page_number: self.page_number(),
            fee_tier: parse_or(self.fee_tier.as_deref(), 0),
            liquidity_threshold: parse_or(self.liquidity_threshold.as_deref(), 0.0),
            volume_threshold: parse_or(self.volume_threshold.as_deref(), 0.0),
            search_query: text_or(self.search_query.as_ref(), ""),
            sort_by: text_or(self.sort_by.as_ref(), "volume"),
            sort_order: text_or(self.sort_order.as_ref(), "desc"),
        })
    }

    pub fn current_token_metric(&self) -> MetricRequest {
        MetricRequest::CurrentTokenMetric(CurrentTokenMetricRequest {
            page_limit: self.page_limit(),
            page_number: self.page_number(),
            search_query: text_or(self.search_query.as_ref(), ""),
            sort_by: text_or(self.sort_by.as_ref(), "total_volume"),
        })
    }

    pub fn token_metric(&self) -> MetricRequest {
        MetricRequest::TokenMetric(TokenMetricRequest::default())
    }

    pub fn recent_pool_events(&self) -> MetricRequest {
        MetricRequest::RecentPoolEvent(RecentPoolEventRequest {
            page_limit: self.page_limit(),
            filter_by: text_or(self.filter_by.as_ref(), "all"),
        })
    }

    /// Pool events over a time range, defaulting to the last 24 hours
    pub fn pool_events(&self) -> Result<MetricRequest, ParamError> {
        let pool_address = self
            .pool_address
            .clone()
            .filter(|a| !a.trim().is_empty())
            .ok_or(ParamError::Missing("pool_address"))?;

        let now = Utc::now();
        let default_start = now - ChronoDuration::hours(DEFAULT_TIME_RANGE_HOURS);
        let end = parse_or(self.end_datetime.as_deref(), now.timestamp());
        let start = parse_or(self.start_datetime.as_deref(), default_start.timestamp());

        if start > end {
            return Err(ParamError::InvertedRange { start, end });
        }

        Ok(MetricRequest::PoolEvent(PoolEventRequest {
            pool_address,
            start_datetime: start,
            end_datetime: end,
        }))
    }
}
