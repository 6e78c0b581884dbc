//! Threat-intelligence verdicts

use crate::rule::lenient_opt_string;
use crate::verdict::Verdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Advice attached to a threat verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatAdvice {
    /// Reject the request
    Block,
    /// Ask the client to solve a challenge
    #[serde(alias = "captcha")]
    Challenge,
    /// Let the request through
    Allow,
}

impl ThreatAdvice {
    /// Pipeline verdict for this advice; "challenge" becomes "captcha"
    pub const fn verdict(self) -> Verdict {
        match self {
            Self::Block => Verdict::Block,
            Self::Challenge => Verdict::Captcha,
            Self::Allow => Verdict::Allow,
        }
    }
}

/// Intelligence details behind a verdict
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatIntel {
    /// Reputation score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Rule that produced the advice
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub rule_id: Option<String>,
    /// Remaining fields, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Verdict returned by `GET /threat?ip=…`, cached per client address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatVerdict {
    /// Address the verdict applies to
    pub ip: String,
    /// Advice
    pub advice: ThreatAdvice,
    /// Supporting intelligence
    #[serde(default)]
    pub intel: ThreatIntel,
    /// Server-given lifetime in seconds; non-positive means "use the default"
    #[serde(default)]
    pub ttl_s: i64,
    /// When the verdict was computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

/// Longest lifetime honoured from a server-given `ttl_s`
pub const MAX_VERDICT_TTL_SECS: i64 = 86_400;

impl ThreatVerdict {
    /// Cache lifetime: short for "allow", server-given otherwise.
    ///
    /// Server-given lifetimes are capped at [`MAX_VERDICT_TTL_SECS`].
    pub fn cache_ttl(&self, allow_ttl: Duration, default_ttl: Duration) -> Duration {
        match self.advice {
            ThreatAdvice::Allow => allow_ttl,
            _ if self.ttl_s <= 0 => default_ttl,
            _ => Duration::from_secs(self.ttl_s.min(MAX_VERDICT_TTL_SECS) as u64),
        }
    }
}
