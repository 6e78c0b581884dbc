//! External decision services
//!
//! Each service the pipeline consults sits behind a trait so the orchestrator
//! can be driven by the HTTP client in production and by fakes in tests.

use crate::filter::FilterEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use warden_common::{AccessRuleResponse, ThreatVerdict};

/// Failure of an external call
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Call exceeded its deadline
    #[error("request timed out")]
    Timeout,

    /// Connection or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-200 answer
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// Answer was not `application/json`
    #[error("expected JSON response, got {0}")]
    NotJson(String),

    /// JSON answer carrying an `error` field
    #[error("upstream reported error: {0}")]
    Embedded(String),

    /// Body did not match the expected shape
    #[error("invalid response body: {0}")]
    Decode(String),

    /// Threat verdict issued for another address
    #[error("verdict for {got} does not match requested address {expected}")]
    IpMismatch {
        /// Address queried
        expected: String,
        /// Address in the verdict
        got: String,
    },

    /// Well-formed answer that cannot be used
    #[error("rejected response: {0}")]
    Rejected(String),

    /// API URL, key or tenant missing
    #[error("API is not configured")]
    NotConfigured,
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Result alias for external calls
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Counts reported by the filter service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDetails {
    /// Files found in the body
    #[serde(default)]
    pub files_scanned: u64,
    /// Files flagged as infected
    #[serde(default)]
    pub files_infected: u64,
}

/// Verdict of `POST /filter`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterResponse {
    /// `block` rejects the request, anything else lets it through
    #[serde(default)]
    pub action: Option<String>,
    /// Human-readable reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Scan counters
    #[serde(default)]
    pub details: Option<FilterDetails>,
}

impl FilterResponse {
    /// True when the filter wants the request blocked
    pub fn is_block(&self) -> bool {
        self.action.as_deref() == Some("block")
    }
}

/// Body of `POST /scan`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Media type of the body
    pub content_type: String,
    /// Body as sent in the filter event
    pub body: String,
}

/// Verdict of `POST /scan`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponse {
    /// Malware found
    #[serde(default)]
    pub virus_detected: bool,
    /// Number of infected files
    #[serde(default)]
    pub files_infected: u64,
    /// Signature name
    #[serde(default)]
    pub virus_name: Option<String>,
    /// Scanner status
    #[serde(default)]
    pub status: Option<String>,
}

impl ScanResponse {
    /// Positive malware verdict
    pub fn is_positive(&self) -> bool {
        self.virus_detected || self.files_infected > 0
    }

    /// Signature name or `unknown`
    pub fn virus_name(&self) -> &str {
        self.virus_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or("unknown")
    }
}

/// Source of access-rule definitions
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// `GET /access-rules/{id}`
    async fn fetch_rule(&self, rule_id: &str) -> UpstreamResult<AccessRuleResponse>;
}

/// Source of threat verdicts
#[async_trait]
pub trait ThreatSource: Send + Sync {
    /// `GET /threat?ip={ip}`
    async fn fetch_threat(&self, ip: &str) -> UpstreamResult<ThreatVerdict>;
}

/// Content filter
#[async_trait]
pub trait FilterService: Send + Sync {
    /// `POST /filter` with an idempotency key
    async fn submit(&self, event: &FilterEvent, idempotency_key: &str) -> UpstreamResult<FilterResponse>;
}

/// Malware scanner
#[async_trait]
pub trait ScanService: Send + Sync {
    /// `POST /scan`
    async fn scan(&self, request: &ScanRequest) -> UpstreamResult<ScanResponse>;
}

/// The four services, shared
#[derive(Clone)]
pub struct Upstreams {
    /// Access rules
    pub rules: Arc<dyn RuleSource>,
    /// Threat intelligence
    pub threat: Arc<dyn ThreatSource>,
    /// Content filter
    pub filter: Arc<dyn FilterService>,
    /// Scanner
    pub scan: Arc<dyn ScanService>,
}

impl Upstreams {
    /// Route every service through one client
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: RuleSource + ThreatSource + FilterService + ScanService + 'static,
    {
        Self {
            rules: client.clone(),
            threat: client.clone(),
            filter: client.clone(),
            scan: client,
        }
    }
}
