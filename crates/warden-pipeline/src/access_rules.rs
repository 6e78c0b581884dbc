//! Access-rule evaluation
//!
//! Rules are read through the cache (`access-rule-data-{id}`) and compiled
//! into a pair of [`NetworkIndex`]es kept in a registry keyed by rule id. A
//! compiled rule is rebuilt only when the fetched definition changes.

use crate::upstream::{RuleSource, UpstreamError, UpstreamResult};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_cache::CacheManager;
use warden_common::{access_rule_cache_key, AccessRule, DecisionResult, RuleSet, Verdict};
use warden_netindex::NetworkIndex;

/// Request attributes matched by access rules
#[derive(Debug, Clone, Copy)]
pub struct ClientAttributes<'a> {
    /// Validated client address
    pub ip: IpAddr,
    /// Geo country code
    pub country: Option<&'a str>,
    /// Autonomous system number
    pub asn: Option<&'a str>,
}

/// A rule with its address lists indexed
pub struct CompiledRule {
    rule: AccessRule,
    block: NetworkIndex,
    allow: NetworkIndex,
}

impl CompiledRule {
    /// Index both sides of a rule
    pub fn compile(rule: AccessRule) -> Self {
        let block = NetworkIndex::build(rule.block.ips.iter());
        let allow = NetworkIndex::build(rule.allow.ips.iter());
        Self { rule, block, allow }
    }

    /// Source definition
    pub fn rule(&self) -> &AccessRule {
        &self.rule
    }

    /// Block beats allow; within a side, addresses then country then ASN
    pub fn evaluate(&self, client: &ClientAttributes<'_>) -> Option<Verdict> {
        if !self.rule.is_active {
            return None;
        }
        if matches(&self.block, &self.rule.block, client) {
            return Some(Verdict::Block);
        }
        if matches(&self.allow, &self.rule.allow, client) {
            return Some(Verdict::Allow);
        }
        None
    }
}

fn matches(index: &NetworkIndex, set: &RuleSet, client: &ClientAttributes<'_>) -> bool {
    index.contains_addr(&client.ip) || set.matches_country(client.country) || set.matches_asn(client.asn)
}

/// Access-rule stage of the pipeline
pub struct AccessRuleEvaluator {
    cache: Arc<CacheManager>,
    source: Arc<dyn RuleSource>,
    registry: DashMap<String, Arc<CompiledRule>>,
    cache_ttl: Duration,
    timeout: Duration,
}

impl AccessRuleEvaluator {
    /// Create evaluator
    pub fn new(
        cache: Arc<CacheManager>,
        source: Arc<dyn RuleSource>,
        cache_ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            source,
            registry: DashMap::new(),
            cache_ttl,
            timeout,
        }
    }

    /// Evaluate `rule_id` for a client. Any failure yields no decision.
    pub async fn evaluate(&self, rule_id: &str, client: &ClientAttributes<'_>) -> DecisionResult {
        let Some(rule) = self.load(rule_id).await else {
            return DecisionResult::none();
        };
        if !rule.is_active {
            debug!(rule_id, "Access rule is not active");
            return DecisionResult::none();
        }

        let compiled = self.compiled(rule);
        match compiled.evaluate(client) {
            Some(verdict) => {
                info!(rule_id = %compiled.rule().id, client_ip = %client.ip, %verdict, "Access rule matched");
                DecisionResult::access_rule(verdict, compiled.rule().id.clone())
            }
            None => DecisionResult::none(),
        }
    }

    /// Number of compiled rules held
    pub fn compiled_count(&self) -> usize {
        self.registry.len()
    }

    /// Drop a compiled rule so the next request recompiles it
    pub fn forget(&self, rule_id: &str) {
        self.registry.remove(rule_id);
    }

    /// Cache-first rule lookup; corrupt cache entries are deleted
    async fn load(&self, rule_id: &str) -> Option<AccessRule> {
        let key = access_rule_cache_key(rule_id);

        if let Some(payload) = self.cache.get(&key).await {
            match serde_json::from_str::<AccessRule>(&payload) {
                Ok(rule) => {
                    debug!(rule_id, "Using cached access rule");
                    return Some(rule);
                }
                Err(e) => {
                    warn!(rule_id, error = %e, "Corrupt cached access rule, refetching");
                    if let Err(e) = self.cache.delete(&key).await {
                        warn!(rule_id, error = %e, "Failed to delete cached access rule");
                    }
                }
            }
        }

        let rule = match self.fetch(rule_id).await {
            Ok(rule) => rule,
            Err(e) => {
                warn!(rule_id, error = %e, "Failed to get access rule");
                return None;
            }
        };

        match serde_json::to_string(&rule) {
            Ok(payload) => {
                if let Err(e) = self.cache.set(&key, payload, self.cache_ttl).await {
                    warn!(rule_id, error = %e, "Failed to cache access rule");
                }
            }
            Err(e) => warn!(rule_id, error = %e, "Failed to encode access rule"),
        }
        Some(rule)
    }

    async fn fetch(&self, rule_id: &str) -> UpstreamResult<AccessRule> {
        let response = tokio::time::timeout(self.timeout, self.source.fetch_rule(rule_id))
            .await
            .map_err(|_| UpstreamError::Timeout)??;

        match (response.success, response.data) {
            (true, Some(rule)) => Ok(rule),
            (false, _) => Err(UpstreamError::Rejected("success=false".into())),
            (true, None) => Err(UpstreamError::Rejected("missing data".into())),
        }
    }

    fn compiled(&self, rule: AccessRule) -> Arc<CompiledRule> {
        if let Some(existing) = self.registry.get(&rule.id) {
            if existing.rule == rule {
                return Arc::clone(&existing);
            }
        }

        let id = rule.id.clone();
        let compiled = Arc::new(CompiledRule::compile(rule));
        let (block, allow) = (compiled.block.stats(), compiled.allow.stats());
        debug!(
            rule_id = %id,
            block_ips = block.individual_ips,
            block_ranges = block.total_ranges,
            allow_ips = allow.individual_ips,
            allow_ranges = allow.total_ranges,
            "Compiled access rule"
        );
        self.registry.insert(id, Arc::clone(&compiled));
        compiled
    }
}
