//! Warden Gateway - edge security gateway
//!
//! Puts the decision pipeline in front of an origin:
//! - Every request runs through access rules, threat intelligence and the content filter
//! - Allowed requests are forwarded to origin unchanged
//! - Telemetry is batched to the control API in the background
//!
//! Gateway endpoints live under `/__warden/`; everything else is proxied.

#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod proxy;

use axum::{middleware::from_fn, routing::get, Extension, Router};
use config::GatewayConfig;
use proxy::OriginClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tracing::{info, warn};
use warden_buffer::{BackgroundQueue, BufferSet, HttpBatchSink};
use warden_cache::{CacheManager, MemoryStore};
use warden_pipeline::{ApiClient, Pipeline, Upstreams};

/// Time allowed for queued background work on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Gateway error type
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration could not be loaded or is invalid
    #[error("config error: {0}")]
    Config(String),

    /// A component could not be constructed
    #[error("setup error: {0}")]
    Setup(String),

    /// Listener could not be bound or failed
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    /// Origin request failed
    #[error("origin error: {0}")]
    Origin(String),
}

/// Result type for the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Application state shared across handlers
pub struct AppState {
    /// Decision pipeline
    pub pipeline: Arc<Pipeline>,
    /// Decision cache
    pub cache: Arc<CacheManager>,
    /// Telemetry buffers
    pub buffers: Arc<BufferSet>,
    /// Background work queue
    pub queue: Arc<BackgroundQueue>,
    /// Origin client
    pub origin: OriginClient,
    /// Largest request body read
    pub max_body_bytes: usize,
}

/// Assembled gateway
pub struct Gateway {
    config: GatewayConfig,
    state: Arc<AppState>,
    janitor: Option<JoinHandle<()>>,
}

impl Gateway {
    /// Wire every component and start the buffer schedulers and cache purge.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn build(config: GatewayConfig) -> GatewayResult<Self> {
        let api = &config.api;
        let client = ApiClient::new(api).map_err(|e| GatewayError::Setup(e.to_string()))?;
        if !client.has_key() {
            warn!("No API key configured, telemetry will not be delivered");
        }

        let sink = HttpBatchSink::new(&api.base_url(), api.api_key().map(str::to_string), api.timeout())
            .map_err(|e| GatewayError::Setup(e.to_string()))?;
        let buffers = Arc::new(BufferSet::new(
            config.buffers.log.to_channel("log"),
            config.buffers.metrics.to_channel("metrics"),
            Arc::new(sink),
        ));
        buffers.start();

        let cache = Arc::new(CacheManager::new((&config.cache).into(), Arc::new(MemoryStore::new())));
        let janitor = config.cache.purge_interval().map(|every| cache.spawn_janitor(every));
        let pipeline = Pipeline::new(
            config.pipeline.clone(),
            api,
            Arc::clone(&cache),
            Upstreams::from_client(Arc::new(client)),
            buffers.clone(),
        );
        let origin = OriginClient::new(&config.origin, api.timeout())?;

        info!(
            mode = %config.pipeline.mode,
            api = %api.base_url(),
            origin = %origin.base_url(),
            "Gateway assembled"
        );

        let state = Arc::new(AppState {
            pipeline: Arc::new(pipeline),
            cache,
            buffers,
            queue: Arc::new(BackgroundQueue::new()),
            origin,
            max_body_bytes: config.max_body_bytes,
        });
        Ok(Self { config, state, janitor })
    }

    /// Shared state
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Serve until Ctrl-C, then drain background work and flush buffers
    pub async fn serve(self) -> GatewayResult<()> {
        let addr: SocketAddr = self.config.listen_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Warden gateway listening on {}", addr);

        axum::serve(listener, build_router(self.state()))
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.shutdown().await;
        Ok(())
    }

    /// Stop the cache purge, drain the background queue and flush both buffers
    pub async fn shutdown(&self) {
        if let Some(janitor) = &self.janitor {
            janitor.abort();
        }
        let completed = self.state.queue.drain(DRAIN_TIMEOUT).await;
        info!(completed, "Background queue drained");
        self.state.buffers.shutdown().await;
    }
}

/// Build the gateway router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/__warden/health", get(handlers::health))
        .route("/__warden/buffers", get(handlers::buffers))
        .route("/__warden/metrics", get(handlers::metrics))
        .fallback(handlers::gate)
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(middleware::logging))
                .layer(Extension(state)),
        )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_buffers_endpoint() {
        let gw = Gateway::build(GatewayConfig::default()).await.unwrap();
        let response = build_router(gw.state())
            .oneshot(Request::get("/__warden/buffers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let status: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(status["log"]["type"], "log");
        assert_eq!(status["metrics"]["size"], 0);
    }

    #[tokio::test]
    async fn test_shutdown_is_clean() {
        let gw = Gateway::build(GatewayConfig::default()).await.unwrap();
        gw.state().buffers.add_log(serde_json::json!({"msg": "last"}));
        gw.shutdown().await;
        // unconfigured sink keeps the item for retry
        assert_eq!(gw.state().buffers.status().log.size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_decisions_are_purged() {
        let gw = Gateway::build(GatewayConfig::default()).await.unwrap();
        let cache = gw.state().cache.clone();
        cache
            .set("203.0.113.9", "{}".into(), Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // a second purge on an empty store reclaims nothing
        assert_eq!(cache.purge_expired().await.unwrap(), 0);

        gw.shutdown().await;
        tokio::task::yield_now().await;
        assert!(gw.janitor.as_ref().is_some_and(|j| j.is_finished()));
    }
}
