//! HTTP handlers

use crate::proxy::OriginResponse;
use crate::AppState;
use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use bytes::Bytes;
use rand::Rng;
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, error, warn};
use warden_buffer::BufferSetStatus;
use warden_pipeline::{ChallengeResponse, Disposition, RequestContext};

/// Share of requests that sample buffer status
const BUFFER_SAMPLE_RATE: f64 = 0.1;

/// Health check response
#[derive(Serialize)]
#[allow(missing_docs)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub mode: String,
}

/// Health check
pub async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: state.pipeline.config().mode.to_string(),
    })
}

/// Buffer channel status
pub async fn buffers(Extension(state): Extension<Arc<AppState>>) -> Json<BufferSetStatus> {
    Json(state.buffers.status())
}

/// Metrics endpoint
pub async fn metrics(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        render_metrics(&state),
    )
}

fn render_metrics(state: &AppState) -> String {
    let stats = state.pipeline.stats().snapshot();
    let cache = state.cache.stats();
    let log = state.buffers.log().stats();
    let metrics = state.buffers.metrics().stats();
    let mut out = String::new();

    let _ = writeln!(out, "# HELP warden_requests_total Requests evaluated by the pipeline");
    let _ = writeln!(out, "# TYPE warden_requests_total counter");
    let _ = writeln!(out, "warden_requests_total {}", stats.requests);

    let _ = writeln!(out, "# HELP warden_decisions_total Final decisions by verdict");
    let _ = writeln!(out, "# TYPE warden_decisions_total counter");
    for (verdict, count) in [
        ("allow", stats.decisions.allow),
        ("block", stats.decisions.block),
        ("captcha", stats.decisions.captcha),
        ("none", stats.decisions.none),
    ] {
        let _ = writeln!(out, "warden_decisions_total{{verdict=\"{}\"}} {}", verdict, count);
    }

    let _ = writeln!(out, "# HELP warden_dispositions_total Actions taken on requests");
    let _ = writeln!(out, "# TYPE warden_dispositions_total counter");
    for (action, count) in [
        ("proxy", stats.proxied),
        ("block", stats.blocked),
        ("challenge", stats.challenged),
    ] {
        let _ = writeln!(out, "warden_dispositions_total{{action=\"{}\"}} {}", action, count);
    }

    let _ = writeln!(out, "# HELP warden_pipeline_latency_ms Pipeline decision latency");
    let _ = writeln!(out, "# TYPE warden_pipeline_latency_ms summary");
    for (quantile, value) in [("0.5", stats.latency.p50), ("0.9", stats.latency.p90), ("0.99", stats.latency.p99)] {
        let _ = writeln!(out, "warden_pipeline_latency_ms{{quantile=\"{}\"}} {}", quantile, value);
    }
    let _ = writeln!(out, "warden_pipeline_latency_ms_sum {}", stats.latency.sum_ms);
    let _ = writeln!(out, "warden_pipeline_latency_ms_count {}", stats.latency.count);

    let _ = writeln!(out, "# HELP warden_cache_lookups_total Cache lookups by outcome");
    let _ = writeln!(out, "# TYPE warden_cache_lookups_total counter");
    for (outcome, count) in [
        ("fast_hit", cache.fast_hits),
        ("durable_hit", cache.durable_hits),
        ("miss", cache.misses),
    ] {
        let _ = writeln!(out, "warden_cache_lookups_total{{outcome=\"{}\"}} {}", outcome, count);
    }

    let _ = writeln!(out, "# HELP warden_buffer_items_total Telemetry items by channel and outcome");
    let _ = writeln!(out, "# TYPE warden_buffer_items_total counter");
    for (channel, s) in [("log", log), ("metrics", metrics)] {
        for (outcome, count) in [("delivered", s.delivered), ("dropped", s.dropped), ("evicted", s.evicted)] {
            let _ = writeln!(
                out,
                "warden_buffer_items_total{{channel=\"{}\",outcome=\"{}\"}} {}",
                channel, outcome, count
            );
        }
    }

    out
}

/// Run the pipeline for every request that is not a gateway endpoint
pub async fn gate(Extension(state): Extension<Arc<AppState>>, request: Request) -> Response {
    let ctx = match request_context(request, state.max_body_bytes).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    let sample = rand::thread_rng().gen_bool(BUFFER_SAMPLE_RATE);
    if sample {
        sample_buffers(&state);
    }

    let pipeline = Arc::clone(&state.pipeline);
    let task_ctx = ctx.clone();
    let disposition = match tokio::spawn(async move { pipeline.evaluate(&task_ctx).await }).await {
        Ok(evaluation) => {
            debug!(
                decision = ?evaluation.decision.decision,
                elapsed_ms = evaluation.elapsed.as_millis() as u64,
                "Pipeline finished"
            );
            evaluation.disposition
        }
        Err(e) => {
            error!(error = %e, "Pipeline task failed, passing request");
            Disposition::Proxy
        }
    };

    match disposition {
        Disposition::Proxy => match state.origin.forward(&ctx).await {
            Ok(response) => origin_response(response),
            Err(e) => {
                error!(error = %e, "Origin request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        },
        Disposition::Block { reason, source } => {
            debug!(%reason, %source, "Responding with block");
            (StatusCode::FORBIDDEN, "Request blocked").into_response()
        }
        Disposition::Challenge(challenge) => challenge_response(challenge),
    }
}

async fn request_context(request: Request, limit: usize) -> Result<RequestContext, Response> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, limit).await.map_err(|e| {
        warn!(error = %e, "Request body rejected");
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response()
    })?;

    let path = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let mut ctx = RequestContext::new(parts.method.as_str(), path).with_body(body);
    for (name, value) in parts.headers.iter() {
        ctx.headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }
    if let Some(proto) = ctx.headers.get_non_blank("x-forwarded-proto").map(str::to_string) {
        ctx = ctx.with_scheme(&proto);
    }
    Ok(ctx)
}

fn sample_buffers(state: &Arc<AppState>) {
    let buffers = Arc::clone(&state.buffers);
    state.queue.spawn(async move {
        let status = buffers.status();
        debug!(
            log_size = status.log.size,
            log_flushing = status.log.is_flushing,
            metrics_size = status.metrics.size,
            metrics_flushing = status.metrics.is_flushing,
            "Buffer status"
        );
    });
}

fn build_response(status: u16, headers: Vec<(String, String)>, body: Bytes) -> Response {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(body)).unwrap_or_else(|e| {
        error!(error = %e, "Invalid response");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
    })
}

fn origin_response(response: OriginResponse) -> Response {
    build_response(response.status, response.headers, response.body)
}

fn challenge_response(challenge: ChallengeResponse) -> Response {
    build_response(challenge.status, challenge.headers, challenge.body)
}
