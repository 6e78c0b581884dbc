//! Verdicts and decision provenance

use serde::{Deserialize, Serialize};
use std::fmt;

/// Final remediation for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Let the request through
    Allow,
    /// Reject the request
    Block,
    /// Challenge the client before letting it through
    Captcha,
}

impl Verdict {
    /// Lowercase label
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Block => "block",
            Self::Captcha => "captcha",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which decision source produced a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Operator access rule
    AccessRule,
    /// Threat-intelligence lookup
    Threat,
}

impl DecisionSource {
    /// Label used in logs and telemetry
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccessRule => "access_rule",
            Self::Threat => "threat",
        }
    }
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one decision source, with provenance
///
/// `decision == None` means "no opinion, proceed".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionResult {
    /// Verdict, if any
    pub decision: Option<Verdict>,
    /// Whether the verdict came from cache
    pub cached: bool,
    /// Rule responsible for the verdict
    #[serde(rename = "ruleId", skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Source of the verdict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DecisionSource>,
}

impl DecisionResult {
    /// No decision
    pub fn none() -> Self {
        Self::default()
    }

    /// Decision from an access rule
    pub fn access_rule(decision: Verdict, rule_id: impl Into<String>) -> Self {
        Self {
            decision: Some(decision),
            cached: false,
            rule_id: Some(rule_id.into()),
            source: Some(DecisionSource::AccessRule),
        }
    }

    /// Decision from threat intelligence
    pub fn threat(decision: Verdict, cached: bool, rule_id: Option<String>) -> Self {
        Self {
            decision: Some(decision),
            cached,
            rule_id,
            source: Some(DecisionSource::Threat),
        }
    }

    /// True when a verdict is present
    pub fn is_decided(&self) -> bool {
        self.decision.is_some()
    }

    /// Combine an access-rule result with a threat result.
    ///
    /// A non-null access-rule decision always wins, even "allow" over a
    /// threat "block".
    pub fn merge(access: DecisionResult, threat: Option<DecisionResult>) -> DecisionResult {
        if access.is_decided() {
            return access;
        }
        threat.unwrap_or_default()
    }
}
