//! Warden Pipeline - per-request security decisions
//!
//! For every request the pipeline:
//! - Checks the operator's access rule (addresses, countries, ASNs)
//! - Falls back to threat intelligence for the client address
//! - Blocks, challenges or lets the request through according to the mode
//! - Submits allowed traffic to the content filter and malware scanner
//!
//! All external calls fail open. A broken dependency never blocks traffic.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access_rules;
pub mod challenge;
pub mod client;
pub mod config;
pub mod context;
pub mod filter;
pub mod orchestrator;
pub mod telemetry;
pub mod threat;
pub mod upstream;

pub use access_rules::{AccessRuleEvaluator, ClientAttributes, CompiledRule};
pub use challenge::{ChallengeOutcome, ChallengeResponse, ChallengeSolver, StaticChallenge};
pub use client::ApiClient;
pub use config::{ApiConfig, HeaderNames, Mode, PipelineConfig};
pub use context::{RequestContext, RequestHeaders};
pub use orchestrator::{BlockSource, Disposition, Evaluation, Pipeline, PipelineStats, PipelineStatsSnapshot};
pub use telemetry::{LogEvent, MetricsEvent, TelemetrySink};
pub use threat::{ThreatEvaluator, ThreatOutcome, ThreatTtl};
pub use upstream::{UpstreamError, UpstreamResult, Upstreams};
