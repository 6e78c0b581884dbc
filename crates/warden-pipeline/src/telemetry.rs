//! Log and metrics events
//!
//! Events are handed to a [`TelemetrySink`] and never awaited; delivery is
//! the buffer's job.

use crate::context::RequestContext;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use warden_buffer::BufferSet;
use warden_common::{DecisionResult, DecisionSource};

/// Version reported in log events
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fire-and-forget destination for telemetry
pub trait TelemetrySink: Send + Sync {
    /// Queue a log event
    fn emit_log(&self, event: Value);
    /// Queue a metrics event
    fn emit_metrics(&self, event: Value);
}

impl TelemetrySink for BufferSet {
    fn emit_log(&self, event: Value) {
        self.add_log(event);
    }

    fn emit_metrics(&self, event: Value) {
        self.add_metrics(event);
    }
}

/// Request summary inside a [`LogEvent`]
#[derive(Debug, Clone, Serialize)]
pub struct HttpSummary {
    /// HTTP method
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Headers, last value wins
    pub headers: Value,
    /// JSON document for JSON bodies, text for other textual bodies
    pub body: Value,
}

/// Event sent to the `log` channel for requests on the default path
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Gateway version
    pub version: String,
    /// Client address or empty
    pub client_ip: String,
    /// Host header or empty
    pub host_name: String,
    /// Request summary
    pub http: HttpSummary,
    /// Decision context
    pub additional: Value,
}

impl LogEvent {
    /// Describe `ctx`
    pub fn from_request(ctx: &RequestContext, client_ip: Option<&str>, additional: Value) -> Self {
        Self {
            timestamp: now_rfc3339(),
            version: AGENT_VERSION.to_string(),
            client_ip: client_ip.unwrap_or_default().to_string(),
            host_name: ctx.header("host").unwrap_or_default().to_string(),
            http: HttpSummary {
                method: ctx.method.clone(),
                url: ctx.url(),
                headers: ctx.headers.to_json_object(),
                body: log_body(ctx),
            },
            additional,
        }
    }
}

/// Event sent to the `metrics` channel for enforced decisions
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsEvent {
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Client address or `unknown`
    pub client_ip: String,
    /// Host without port
    pub host_name: String,
    /// Verdict label
    pub remediation: Option<String>,
    /// Whether the verdict came from cache
    pub cached: bool,
    /// Rule responsible
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Decision source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DecisionSource>,
    /// Threat score, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl MetricsEvent {
    /// Describe a decision
    pub fn from_decision(
        ctx: &RequestContext,
        client_ip: Option<&str>,
        result: &DecisionResult,
        score: Option<f64>,
    ) -> Self {
        Self {
            timestamp: now_rfc3339(),
            client_ip: client_ip.unwrap_or("unknown").to_string(),
            host_name: ctx.host().unwrap_or_default().to_string(),
            remediation: result.decision.map(|v| v.as_str().to_string()),
            cached: result.cached,
            rule_id: result.rule_id.clone(),
            source: result.source,
            score,
        }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn log_body(ctx: &RequestContext) -> Value {
    if ctx.body.is_empty() {
        return Value::Null;
    }
    let content_type = ctx.header("content-type").unwrap_or_default();
    if content_type.contains("application/json") {
        serde_json::from_slice(&ctx.body).unwrap_or(Value::Null)
    } else if content_type.contains("text/") || content_type.contains("application/") {
        Value::String(String::from_utf8_lossy(&ctx.body).into_owned())
    } else {
        Value::Null
    }
}

/// Serialize and emit; encode failures are logged and dropped
pub(crate) fn emit<T: Serialize>(event: &T, send: impl FnOnce(Value)) {
    match serde_json::to_value(event) {
        Ok(value) => send(value),
        Err(e) => warn!(error = %e, "Failed to encode telemetry event"),
    }
}
