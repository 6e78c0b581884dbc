//! Normalized filter events
//!
//! Builds the request description sent to the content filter, the key that
//! deduplicates retried submissions, and the scan request derived from it.

use crate::config::Mode;
use crate::context::RequestContext;
use crate::upstream::ScanRequest;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::warn;
use warden_common::{is_valid_ip, Timestamp};

const EVENT_TYPE: &str = "filter";
const SCHEMA_VERSION: &str = "1.0";
const IDEMPOTENCY_KEY_LEN: usize = 32;
const OCTET_STREAM: &str = "application/octet-stream";

/// One header value, or several when the header repeats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderField {
    /// Single occurrence
    One(String),
    /// Repeated header
    Many(Vec<String>),
}

impl HeaderField {
    fn first(&self) -> Option<&str> {
        match self {
            Self::One(v) => Some(v),
            Self::Many(vs) => vs.first().map(String::as_str),
        }
    }
}

/// Request details inside a [`FilterEvent`]
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSection {
    pub method: String,
    pub path: Option<String>,
    pub query: Option<String>,
    pub host: Option<String>,
    pub scheme: Option<String>,
    pub port: u16,
    pub remote_ip: Option<String>,
    pub user_agent: Option<String>,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, HeaderField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_hash: Option<String>,
}

/// Decision context attached to a filter event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterAdditional {
    /// Pipeline verdict so far, or `unknown`
    pub remediation: String,
    /// Threat score of the client, if looked up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat_score: Option<f64>,
    /// Threat rule, falling back to the access rule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat_rule: Option<String>,
    /// Enforcement mode
    pub mode: Mode,
}

/// Event posted to `/filter`
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterEvent {
    pub event_type: String,
    pub schema_version: String,
    /// RFC 3339 timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub http: HttpSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional: Option<FilterAdditional>,
}

/// Inputs for [`build_filter_event`] that do not come from the request itself
#[derive(Debug, Clone, Default)]
pub struct FilterEventOptions<'a> {
    /// Validated or raw client address header
    pub client_ip: Option<&'a str>,
    /// Request identifier
    pub request_id: Option<&'a str>,
    /// Tenant
    pub tenant_id: Option<&'a str>,
    /// Decision context
    pub additional: Option<FilterAdditional>,
}

fn data_uri_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^data:([^;,]+)(?:;[^,]*)*;base64,(.+)$").ok())
        .as_ref()
}

fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Each byte as one char (U+0000..U+00FF)
fn binary_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn is_text_like(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.is_empty()
        || ct.starts_with("text/")
        || ct.contains("json")
        || ct.contains("xml")
        || ct.contains("javascript")
        || ct.contains("form-urlencoded")
}

/// First base64 `data:` URI found among the string values of a JSON
/// document, decoded, with its media type.
///
/// Values are visited depth-first in document order; object members in key
/// order.
pub fn extract_data_uri(body: &str) -> Option<(String, Vec<u8>)> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let pattern = data_uri_pattern()?;
    let mut stack = vec![&parsed];

    while let Some(value) = stack.pop() {
        match value {
            Value::String(s) => {
                let Some(caps) = pattern.captures(s.trim()) else {
                    continue;
                };
                let mime = caps.get(1).map_or(OCTET_STREAM, |m| m.as_str());
                let data = caps.get(2).map_or("", |m| m.as_str());
                match STANDARD.decode(data.trim()) {
                    Ok(bytes) => return Some((mime.to_string(), bytes)),
                    Err(e) => warn!(error = %e, "Failed to decode data URI"),
                }
            }
            Value::Array(items) => stack.extend(items.iter().rev()),
            Value::Object(map) => stack.extend(map.values().rev()),
            _ => {}
        }
    }
    None
}

/// Normalize a request into a filter event
pub fn build_filter_event(ctx: &RequestContext, options: FilterEventOptions<'_>) -> FilterEvent {
    let mut headers: BTreeMap<String, HeaderField> = ctx
        .headers
        .to_multi_map()
        .into_iter()
        .map(|(name, mut values)| {
            let field = if values.len() == 1 {
                HeaderField::One(values.remove(0))
            } else {
                HeaderField::Many(values)
            };
            (name, field)
        })
        .collect();

    let original_content_type = ctx.header("content-type").map(str::to_string);
    let content_type_lower = original_content_type
        .as_deref()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let is_json = content_type_lower.contains("json");

    let (body, content_length, body_sha256) = if ctx.body.is_empty() {
        (Some(String::new()), Some(0), None)
    } else {
        let bytes = &ctx.body[..];
        let mut text = if is_text_like(&content_type_lower) {
            String::from_utf8_lossy(bytes).into_owned()
        } else {
            binary_string(bytes)
        };
        let mut length = bytes.len() as u64;
        let mut digest = sha256_hex(bytes);

        if is_json {
            if let Some((mime, decoded)) = extract_data_uri(&text) {
                text = binary_string(&decoded);
                length = decoded.len() as u64;
                digest = sha256_hex(&decoded);
                headers.insert("content-type".to_string(), HeaderField::One(mime));
            }
        }

        (Some(text), Some(length), Some(digest))
    };

    let content_type = headers
        .get("content-type")
        .and_then(HeaderField::first)
        .map(str::to_string)
        .or(original_content_type);

    let query = ctx.query.clone().filter(|q| !q.is_empty());
    let query_hash = query.as_deref().map(|q| sha256_hex(q));

    let http = HttpSection {
        method: ctx.method.clone(),
        path: Some(ctx.path.clone()),
        query,
        host: ctx.host().map(str::to_string),
        scheme: Some(ctx.scheme.clone()),
        port: 443,
        remote_ip: options
            .client_ip
            .filter(|ip| is_valid_ip(ip))
            .map(str::to_string),
        user_agent: ctx.header("user-agent").map(str::to_string),
        content_type,
        headers,
        body,
        content_length,
        body_sha256,
        query_hash,
    };

    FilterEvent {
        event_type: EVENT_TYPE.to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        request_id: options
            .request_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        tenant_id: options.tenant_id.map(str::to_string),
        http,
        additional: options.additional,
    }
}

/// Deterministic key for a filter submission.
///
/// SHA-256 of the first non-blank correlation header, or of
/// `{ip|unknown}:{unix_ms}:{uuid}` when the request carries none, truncated
/// to 32 hex characters.
pub fn idempotency_key(ctx: &RequestContext, correlation: &[String], client_ip: Option<&str>) -> String {
    let raw = correlation
        .iter()
        .find_map(|name| ctx.headers.get_non_blank(name))
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!(
                "{}:{}:{}",
                client_ip.unwrap_or("unknown"),
                Timestamp::now().as_millis(),
                uuid::Uuid::new_v4()
            )
        });

    let mut key = sha256_hex(raw);
    key.truncate(IDEMPOTENCY_KEY_LEN);
    key
}

/// Scan request for the event's body; `None` when there is nothing to scan
pub fn build_scan_request(event: &FilterEvent) -> Option<ScanRequest> {
    let body = event.http.body.as_ref().filter(|b| !b.is_empty())?;
    let content_type = event
        .http
        .content_type
        .clone()
        .or_else(|| {
            event
                .http
                .headers
                .get("content-type")
                .and_then(HeaderField::first)
                .map(str::to_string)
        })
        .filter(|ct| !ct.trim().is_empty())
        .unwrap_or_else(|| OCTET_STREAM.to_string());

    Some(ScanRequest {
        content_type,
        body: body.clone(),
    })
}
