//! Decision orchestrator
//!
//! ```text
//! START ──► ACCESS_RULE_EVAL ──(decided)──────────┐
//!   │              │                               ▼
//!   │              └──► THREAT_EVAL ──────────► DECISION ──► BLOCK
//!   │ (no client address)                       ▲   │   └──► CAPTCHA ──(solved)──┐
//!   └───────────────────────────────────────────┘   │            │               │
//!                                                    │            ▼               │
//!                                                    │        challenge           │
//!                                                    └──► FILTER_SCAN ◄───────────┘
//!                                                              │
//!                                                              ▼
//!                                                        PROXY | BLOCK
//! ```
//!
//! Every stage fails open: a failed lookup or external call means "no
//! decision" and the request continues towards origin.

use crate::access_rules::{AccessRuleEvaluator, ClientAttributes};
use crate::challenge::{ChallengeOutcome, ChallengeResponse, ChallengeSolver, StaticChallenge};
use crate::config::{ApiConfig, PipelineConfig};
use crate::context::RequestContext;
use crate::filter::{build_filter_event, build_scan_request, idempotency_key, FilterAdditional, FilterEventOptions};
use crate::telemetry::{emit, LogEvent, MetricsEvent, TelemetrySink};
use crate::threat::{ThreatEvaluator, ThreatOutcome, ThreatTtl};
use crate::upstream::{FilterService, ScanService, UpstreamError, UpstreamResult, Upstreams};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use warden_cache::CacheManager;
use warden_common::metrics::{HistogramSnapshot, LatencyHistogram};
use warden_common::{parse_ip, AtomicCounter, DecisionResult, DecisionSource, ThreatVerdict, Verdict};

const DEFAULT_WAF_REASON: &str = "Blocked by WAF";

/// What produced a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSource {
    /// Operator access rule
    AccessRule,
    /// Threat intelligence
    Threat,
    /// Content filter
    Waf,
    /// Malware scan
    ContentScan,
}

impl BlockSource {
    /// Label used in logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccessRule => "access_rule",
            Self::Threat => "threat",
            Self::Waf => "waf",
            Self::ContentScan => "content_scan",
        }
    }
}

impl fmt::Display for BlockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the request driver should do with the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Forward to origin
    Proxy,
    /// Reject
    Block {
        /// Why
        reason: String,
        /// Which stage decided
        source: BlockSource,
    },
    /// Send the solver's challenge
    Challenge(ChallengeResponse),
}

/// Full result of one pipeline run
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Final decision with provenance
    pub decision: DecisionResult,
    /// Action for the driver
    pub disposition: Disposition,
    /// Validated client address
    pub client_ip: Option<IpAddr>,
    /// Threat verdict, if one was consulted
    pub threat: Option<ThreatVerdict>,
    /// Time spent deciding
    pub elapsed: Duration,
}

/// Pipeline counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    requests: AtomicCounter,
    allow: AtomicCounter,
    block: AtomicCounter,
    captcha: AtomicCounter,
    undecided: AtomicCounter,
    proxied: AtomicCounter,
    blocked: AtomicCounter,
    challenged: AtomicCounter,
    latency: LatencyHistogram,
}

impl PipelineStats {
    fn record(&self, evaluation: &Evaluation) {
        self.requests.inc();
        match evaluation.decision.decision {
            Some(Verdict::Allow) => self.allow.inc(),
            Some(Verdict::Block) => self.block.inc(),
            Some(Verdict::Captcha) => self.captcha.inc(),
            None => self.undecided.inc(),
        };
        match evaluation.disposition {
            Disposition::Proxy => self.proxied.inc(),
            Disposition::Block { .. } => self.blocked.inc(),
            Disposition::Challenge(_) => self.challenged.inc(),
        };
        self.latency.record(evaluation.elapsed.as_millis() as u64);
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            requests: self.requests.get(),
            decisions: DecisionCounts {
                allow: self.allow.get(),
                block: self.block.get(),
                captcha: self.captcha.get(),
                none: self.undecided.get(),
            },
            proxied: self.proxied.get(),
            blocked: self.blocked.get(),
            challenged: self.challenged.get(),
            latency: self.latency.snapshot(),
        }
    }
}

/// Requests per final verdict
#[derive(Debug, Clone, Serialize)]
#[allow(missing_docs)]
pub struct DecisionCounts {
    pub allow: u64,
    pub block: u64,
    pub captcha: u64,
    pub none: u64,
}

/// Serializable pipeline counters
#[derive(Debug, Clone, Serialize)]
#[allow(missing_docs)]
pub struct PipelineStatsSnapshot {
    pub requests: u64,
    pub decisions: DecisionCounts,
    pub proxied: u64,
    pub blocked: u64,
    pub challenged: u64,
    pub latency: HistogramSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Start,
    AccessRuleEval,
    ThreatEval,
    Decision,
    Block,
    Captcha,
    FilterScan,
}

/// Per-request decision pipeline
pub struct Pipeline {
    config: PipelineConfig,
    access: AccessRuleEvaluator,
    threat: ThreatEvaluator,
    filter: Arc<dyn FilterService>,
    scan: Arc<dyn ScanService>,
    solver: Arc<dyn ChallengeSolver>,
    telemetry: Arc<dyn TelemetrySink>,
    filter_ready: bool,
    stats: PipelineStats,
}

impl Pipeline {
    /// Assemble the pipeline.
    ///
    /// The content filter is consulted only when it is enabled and an API
    /// key and tenant id are configured.
    pub fn new(
        config: PipelineConfig,
        api: &ApiConfig,
        cache: Arc<CacheManager>,
        upstreams: Upstreams,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let timeout = config.call_timeout();
        let access = AccessRuleEvaluator::new(
            Arc::clone(&cache),
            upstreams.rules,
            config.rule_cache_ttl(),
            timeout,
        );
        let threat = ThreatEvaluator::new(
            cache,
            upstreams.threat,
            ThreatTtl {
                allow: config.threat_allow_ttl(),
                fallback: config.threat_default_ttl(),
            },
            timeout,
        );
        let filter_ready = config.filter_enabled && api.api_key().is_some() && config.tenant_id().is_some();
        if !filter_ready {
            info!("Content filter disabled or not configured");
        }

        Self {
            config,
            access,
            threat,
            filter: upstreams.filter,
            scan: upstreams.scan,
            solver: Arc::new(StaticChallenge::default()),
            telemetry,
            filter_ready,
            stats: PipelineStats::default(),
        }
    }

    /// Replace the challenge solver
    pub fn with_solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
        self.solver = solver;
        self
    }

    /// Configuration in effect
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Counters
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Access-rule stage, for inspection
    pub fn access_rules(&self) -> &AccessRuleEvaluator {
        &self.access
    }

    /// Decide what to do with one request
    pub async fn evaluate(&self, ctx: &RequestContext) -> Evaluation {
        let started = Instant::now();
        let names = &self.config.headers;
        let raw_ip = ctx.headers.get_non_blank(&names.client_ip);

        let mut client: Option<IpAddr> = None;
        let mut access = DecisionResult::none();
        let mut threat: Option<ThreatOutcome> = None;
        let mut decision = DecisionResult::none();
        let mut stage = Stage::Start;

        let disposition = loop {
            stage = match stage {
                Stage::Start => match raw_ip.map(parse_ip) {
                    Some(Ok(ip)) => {
                        client = Some(ip);
                        Stage::AccessRuleEval
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Invalid client address, skipping decision sources");
                        Stage::Decision
                    }
                    None => {
                        debug!("No client address header, skipping decision sources");
                        Stage::Decision
                    }
                },
                Stage::AccessRuleEval => {
                    if let (Some(ip), Some(rule_id)) = (client, self.rule_id(ctx)) {
                        let attrs = ClientAttributes {
                            ip,
                            country: ctx.headers.get_non_blank(&names.country),
                            asn: ctx.headers.get_non_blank(&names.asn),
                        };
                        access = self.access.evaluate(rule_id, &attrs).await;
                    }
                    if access.is_decided() {
                        decision = access.clone();
                        Stage::Decision
                    } else {
                        Stage::ThreatEval
                    }
                }
                Stage::ThreatEval => {
                    if let Some(ip) = client {
                        threat = Some(self.threat.evaluate(&ip).await);
                    }
                    decision = DecisionResult::merge(access.clone(), threat.as_ref().map(|t| t.result.clone()));
                    Stage::Decision
                }
                Stage::Decision => match decision.decision {
                    Some(Verdict::Block) => Stage::Block,
                    Some(Verdict::Captcha) => Stage::Captcha,
                    _ => Stage::FilterScan,
                },
                Stage::Block => {
                    if !self.config.mode.enforces() {
                        debug!(client_ip = ?raw_ip, "Monitor mode, passing blocked request");
                        break Disposition::Proxy;
                    }
                    self.emit_metrics(ctx, raw_ip, &decision, threat.as_ref());
                    let source = match decision.source {
                        Some(DecisionSource::AccessRule) => BlockSource::AccessRule,
                        _ => BlockSource::Threat,
                    };
                    info!(
                        client_ip = ?raw_ip,
                        rule_id = ?decision.rule_id,
                        cached = decision.cached,
                        %source,
                        "Request blocked"
                    );
                    break Disposition::Block {
                        reason: format!("Blocked by {}", source),
                        source,
                    };
                }
                Stage::Captcha => {
                    if !self.config.mode.enforces() {
                        debug!(client_ip = ?raw_ip, "Monitor mode, passing challenged request");
                        break Disposition::Proxy;
                    }
                    self.emit_metrics(ctx, raw_ip, &decision, threat.as_ref());
                    match self.call(self.solver.solve(ctx, raw_ip)).await {
                        Ok(ChallengeOutcome::Solved) => {
                            debug!(client_ip = ?raw_ip, "Challenge already solved");
                            decision.decision = Some(Verdict::Allow);
                            Stage::Decision
                        }
                        Ok(ChallengeOutcome::Challenge(response)) => break Disposition::Challenge(response),
                        Err(e) => {
                            warn!(error = %e, "Challenge solver failed, passing request");
                            break Disposition::Proxy;
                        }
                    }
                }
                Stage::FilterScan => {
                    break self.default_path(ctx, raw_ip, &decision, threat.as_ref()).await;
                }
            };
        };

        let evaluation = Evaluation {
            decision,
            disposition,
            client_ip: client,
            threat: threat.and_then(|t| t.verdict),
            elapsed: started.elapsed(),
        };
        self.stats.record(&evaluation);
        evaluation
    }

    fn rule_id<'a>(&'a self, ctx: &'a RequestContext) -> Option<&'a str> {
        ctx.headers
            .get_non_blank(&self.config.headers.rule_id)
            .or_else(|| self.config.default_rule_id.as_deref().filter(|id| !id.trim().is_empty()))
    }

    async fn call<T, F>(&self, fut: F) -> UpstreamResult<T>
    where
        F: Future<Output = UpstreamResult<T>>,
    {
        tokio::time::timeout(self.config.call_timeout(), fut)
            .await
            .map_err(|_| UpstreamError::Timeout)?
    }

    async fn default_path(
        &self,
        ctx: &RequestContext,
        raw_ip: Option<&str>,
        decision: &DecisionResult,
        threat: Option<&ThreatOutcome>,
    ) -> Disposition {
        let intel = threat.and_then(|t| t.verdict.as_ref()).map(|v| &v.intel);
        let additional = FilterAdditional {
            remediation: decision.decision.map_or("unknown", Verdict::as_str).to_string(),
            threat_score: intel.and_then(|i| i.score),
            threat_rule: intel
                .and_then(|i| i.rule_id.clone())
                .or_else(|| decision.rule_id.clone()),
            mode: self.config.mode,
        };

        emit(&additional, |extra| {
            emit(&LogEvent::from_request(ctx, raw_ip, extra), |event| self.telemetry.emit_log(event))
        });

        if !self.filter_ready {
            return Disposition::Proxy;
        }

        let names = &self.config.headers;
        let event = build_filter_event(
            ctx,
            FilterEventOptions {
                client_ip: raw_ip,
                request_id: ctx.headers.get_non_blank(&names.request_id),
                tenant_id: self.config.tenant_id(),
                additional: Some(additional),
            },
        );
        let key = idempotency_key(ctx, &names.correlation, raw_ip);

        match self.call(self.filter.submit(&event, &key)).await {
            Ok(response) => {
                debug!(
                    action = ?response.action,
                    reason = ?response.reason,
                    details = ?response.details,
                    "Filter result"
                );
                if response.is_block() {
                    let reason = response
                        .reason
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| DEFAULT_WAF_REASON.to_string());
                    return self.enforce(reason, BlockSource::Waf);
                }
            }
            Err(e) => warn!(error = %e, "Filter request failed"),
        }

        let Some(scan_request) = build_scan_request(&event) else {
            return Disposition::Proxy;
        };
        match self.call(self.scan.scan(&scan_request)).await {
            Ok(response) if response.is_positive() => {
                self.enforce(format!("Malware detected ({})", response.virus_name()), BlockSource::ContentScan)
            }
            Ok(response) => {
                debug!(status = ?response.status, "Content scan clean");
                Disposition::Proxy
            }
            Err(e) => {
                warn!(error = %e, "Content scan failed");
                Disposition::Proxy
            }
        }
    }

    /// Block in enforce mode, pass in monitor mode
    fn enforce(&self, reason: String, source: BlockSource) -> Disposition {
        warn!(%reason, %source, mode = %self.config.mode, "Blocking request");
        if self.config.mode.enforces() {
            Disposition::Block { reason, source }
        } else {
            Disposition::Proxy
        }
    }

    fn emit_metrics(
        &self,
        ctx: &RequestContext,
        raw_ip: Option<&str>,
        decision: &DecisionResult,
        threat: Option<&ThreatOutcome>,
    ) {
        let score = threat
            .and_then(|t| t.verdict.as_ref())
            .and_then(|v| v.intel.score);
        let event = MetricsEvent::from_decision(ctx, raw_ip, decision, score);
        emit(&event, |value| self.telemetry.emit_metrics(value));
    }
}
