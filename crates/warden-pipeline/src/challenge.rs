//! Challenge solver seam
//!
//! The pipeline only needs to know whether the client has already passed a
//! challenge; page rendering and session tokens belong to the solver.

use crate::context::RequestContext;
use crate::upstream::UpstreamResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Response the solver wants sent to the client
#[derive(Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    /// HTTP status
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
}

impl fmt::Debug for ChallengeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Result of consulting the solver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// Client holds a valid proof; continue as allowed
    Solved,
    /// Client must answer this challenge first
    Challenge(ChallengeResponse),
}

/// Challenge collaborator
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Inspect the request and decide whether it passes
    async fn solve(&self, ctx: &RequestContext, client_ip: Option<&str>) -> UpstreamResult<ChallengeOutcome>;
}

/// Solver that never accepts and always serves the same page
pub struct StaticChallenge {
    page: Bytes,
}

impl StaticChallenge {
    /// Serve `page` as HTML with status 403
    pub fn new(page: impl Into<Bytes>) -> Self {
        Self { page: page.into() }
    }
}

impl Default for StaticChallenge {
    fn default() -> Self {
        Self::new("<!DOCTYPE html><html><head><title>Verification required</title></head><body><p>Please verify you are human to continue.</p></body></html>")
    }
}

#[async_trait]
impl ChallengeSolver for StaticChallenge {
    async fn solve(&self, _ctx: &RequestContext, _client_ip: Option<&str>) -> UpstreamResult<ChallengeOutcome> {
        Ok(ChallengeOutcome::Challenge(ChallengeResponse {
            status: 403,
            headers: vec![
                ("content-type".to_string(), "text/html; charset=utf-8".to_string()),
                ("cache-control".to_string(), "no-store".to_string()),
            ],
            body: self.page.clone(),
        }))
    }
}
