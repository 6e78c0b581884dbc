//! Threat-intelligence stage
//!
//! Verdicts are cached per client address. A cached payload that no longer
//! decodes is deleted and the address is queried again.

use crate::upstream::{ThreatSource, UpstreamError, UpstreamResult};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_cache::CacheManager;
use warden_common::{parse_ip, DecisionResult, ThreatVerdict};

/// Decision plus the verdict behind it
#[derive(Debug, Clone, Default)]
pub struct ThreatOutcome {
    /// Pipeline decision
    pub result: DecisionResult,
    /// Verdict, when one was obtained
    pub verdict: Option<ThreatVerdict>,
}

impl ThreatOutcome {
    fn from_verdict(verdict: ThreatVerdict, cached: bool) -> Self {
        let result = DecisionResult::threat(verdict.advice.verdict(), cached, verdict.intel.rule_id.clone());
        Self {
            result,
            verdict: Some(verdict),
        }
    }
}

/// Cache TTL policy for threat verdicts
#[derive(Debug, Clone, Copy)]
pub struct ThreatTtl {
    /// Lifetime of "allow" verdicts
    pub allow: Duration,
    /// Lifetime of other verdicts when the server gives none
    pub fallback: Duration,
}

/// Threat-intelligence stage of the pipeline
pub struct ThreatEvaluator {
    cache: Arc<CacheManager>,
    source: Arc<dyn ThreatSource>,
    ttl: ThreatTtl,
    timeout: Duration,
}

impl ThreatEvaluator {
    /// Create evaluator
    pub fn new(cache: Arc<CacheManager>, source: Arc<dyn ThreatSource>, ttl: ThreatTtl, timeout: Duration) -> Self {
        Self {
            cache,
            source,
            ttl,
            timeout,
        }
    }

    /// Verdict for `ip`, cache first. Any failure yields no decision.
    pub async fn evaluate(&self, ip: &IpAddr) -> ThreatOutcome {
        let key = ip.to_string();

        if let Some(payload) = self.cache.get(&key).await {
            match serde_json::from_str::<ThreatVerdict>(&payload) {
                Ok(verdict) => {
                    debug!(client_ip = %key, advice = ?verdict.advice, "Using cached threat verdict");
                    return ThreatOutcome::from_verdict(verdict, true);
                }
                Err(e) => {
                    warn!(client_ip = %key, error = %e, "Corrupt cached threat verdict, requerying");
                    if let Err(e) = self.cache.delete(&key).await {
                        warn!(client_ip = %key, error = %e, "Failed to delete cached threat verdict");
                    }
                }
            }
        }

        let verdict = match self.fetch(ip, &key).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(client_ip = %key, error = %e, "Failed to get threat verdict");
                return ThreatOutcome::default();
            }
        };

        let ttl = verdict.cache_ttl(self.ttl.allow, self.ttl.fallback);
        match serde_json::to_string(&verdict) {
            Ok(payload) => {
                if let Err(e) = self.cache.set(&key, payload, ttl).await {
                    warn!(client_ip = %key, error = %e, "Failed to cache threat verdict");
                }
            }
            Err(e) => warn!(client_ip = %key, error = %e, "Failed to encode threat verdict"),
        }

        info!(
            client_ip = %key,
            advice = ?verdict.advice,
            ttl_s = ttl.as_secs(),
            "Threat verdict fetched"
        );
        ThreatOutcome::from_verdict(verdict, false)
    }

    async fn fetch(&self, ip: &IpAddr, key: &str) -> UpstreamResult<ThreatVerdict> {
        let verdict = tokio::time::timeout(self.timeout, self.source.fetch_threat(key))
            .await
            .map_err(|_| UpstreamError::Timeout)??;

        let same_address = parse_ip(&verdict.ip).map(|got| got == *ip).unwrap_or(false);
        if !same_address {
            return Err(UpstreamError::IpMismatch {
                expected: key.to_string(),
                got: verdict.ip,
            });
        }
        Ok(verdict)
    }
}
