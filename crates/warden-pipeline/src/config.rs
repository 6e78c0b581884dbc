//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use warden_common::WardenError;

/// Control API base URL used when none is configured
pub const DEFAULT_API_URL: &str = "https://api.warden.dev/v1";

/// Enforcement mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Decide and report, but always pass traffic to origin
    #[default]
    Monitor,
    /// Enforce block and challenge decisions
    #[serde(alias = "enforce")]
    Block,
}

impl Mode {
    /// True when decisions are enforced
    pub fn enforces(self) -> bool {
        self == Self::Block
    }

    /// Lowercase label
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Monitor => "monitor",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monitor" => Ok(Self::Monitor),
            "block" | "enforce" => Ok(Self::Block),
            other => Err(WardenError::ConfigError(format!("unknown mode: {}", other))),
        }
    }
}

/// Control API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL; trailing slashes are ignored
    pub base_url: String,
    /// Bearer key
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    /// Base URL without trailing slashes, falling back to the default
    pub fn base_url(&self) -> String {
        let trimmed = self.base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            DEFAULT_API_URL.to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// Non-empty API key
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Names of the inbound headers the pipeline reads, lowercase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderNames {
    /// Trusted client address
    pub client_ip: String,
    /// Access-rule identifier
    pub rule_id: String,
    /// Geo country code
    pub country: String,
    /// Autonomous system number
    pub asn: String,
    /// Request identifier forwarded in filter events
    pub request_id: String,
    /// Correlation headers tried in order for the idempotency key
    pub correlation: Vec<String>,
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            client_ip: "cf-connecting-ip".to_string(),
            rule_id: "x-access-rule-id".to_string(),
            country: "cf-ipcountry".to_string(),
            asn: "cf-asn".to_string(),
            request_id: "cf-request-id".to_string(),
            correlation: vec![
                "cf-request-id".to_string(),
                "cf-ray".to_string(),
                "x-request-id".to_string(),
                "x-amzn-trace-id".to_string(),
            ],
        }
    }
}

/// Decision pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Enforcement mode
    pub mode: Mode,
    /// Tenant identifier sent with filter events
    pub tenant_id: Option<String>,
    /// Access rule applied when the request names none
    pub default_rule_id: Option<String>,
    /// Lifetime of cached rule definitions
    pub rule_cache_ttl_secs: u64,
    /// Lifetime of cached "allow" threat verdicts
    pub threat_allow_ttl_secs: u64,
    /// Lifetime of other threat verdicts when the server gives none
    pub threat_default_ttl_secs: u64,
    /// Send default-path requests to the content filter
    pub filter_enabled: bool,
    /// Deadline for every external call
    pub call_timeout_secs: u64,
    /// Inbound header names
    pub headers: HeaderNames,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Monitor,
            tenant_id: None,
            default_rule_id: None,
            rule_cache_ttl_secs: 300,
            threat_allow_ttl_secs: 60,
            threat_default_ttl_secs: 300,
            filter_enabled: true,
            call_timeout_secs: 30,
            headers: HeaderNames::default(),
        }
    }
}

impl PipelineConfig {
    /// Non-empty tenant id
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Rule cache lifetime
    pub fn rule_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.rule_cache_ttl_secs)
    }

    /// "allow" verdict lifetime
    pub fn threat_allow_ttl(&self) -> Duration {
        Duration::from_secs(self.threat_allow_ttl_secs)
    }

    /// Fallback verdict lifetime
    pub fn threat_default_ttl(&self) -> Duration {
        Duration::from_secs(self.threat_default_ttl_secs)
    }

    /// External call deadline
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }
}
