//! Gateway configuration
//!
//! Loaded from a JSON file, then overridden from `WARDEN_*` environment
//! variables.

use crate::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::warn;
use warden_buffer::ChannelConfig;
use warden_cache::CacheConfig;
use warden_pipeline::{ApiConfig, Mode, PipelineConfig};

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/warden/gateway.json";

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listen address
    pub listen: String,
    /// Origin base URL
    pub origin: String,
    /// Largest request body read before forwarding
    pub max_body_bytes: usize,
    /// Control API
    pub api: ApiConfig,
    /// Decision pipeline
    pub pipeline: PipelineConfig,
    /// Decision cache
    pub cache: CacheSettings,
    /// Telemetry buffers
    pub buffers: BufferSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".into(),
            origin: "http://127.0.0.1:8081".into(),
            max_body_bytes: 10 * 1024 * 1024,
            api: ApiConfig::default(),
            pipeline: PipelineConfig::default(),
            cache: CacheSettings::default(),
            buffers: BufferSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content).map_err(|e| GatewayError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from file, or defaults when the file is missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            warn!(error = %e, "Config not loaded, using defaults");
            Self::default()
        })
    }

    /// Apply `WARDEN_*` overrides from the process environment
    pub fn apply_env(&mut self) -> GatewayResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`; blank values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("WARDEN_API_URL") {
            self.api.base_url = url;
        }
        if let Some(key) = get("WARDEN_API_KEY") {
            self.api.api_key = Some(key);
        }
        if let Some(tenant) = get("WARDEN_TENANT_ID") {
            self.pipeline.tenant_id = Some(tenant);
        }
        if let Some(mode) = get("WARDEN_MODE") {
            self.pipeline.mode = mode
                .parse::<Mode>()
                .map_err(|e| GatewayError::Config(e.to_string()))?;
        }
        if let Some(rule) = get("WARDEN_ACCESS_RULE_ID") {
            self.pipeline.default_rule_id = Some(rule);
        }
        if let Some(origin) = get("WARDEN_ORIGIN_URL") {
            self.origin = origin;
        }
        if let Some(listen) = get("WARDEN_LISTEN") {
            self.listen = listen;
        }
        Ok(())
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> GatewayResult<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| GatewayError::Config(format!("listen address {:?}: {}", self.listen, e)))
    }
}

/// Decision cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Entry bound
    pub fast_capacity: u64,
    /// Longest fast-tier lifetime
    pub fast_ttl_cap_secs: u64,
    /// Seconds between durable-tier purges; 0 disables purging
    pub purge_interval_secs: u64,
}

impl CacheSettings {
    /// Purge period, if purging is enabled
    pub fn purge_interval(&self) -> Option<Duration> {
        (self.purge_interval_secs > 0).then(|| Duration::from_secs(self.purge_interval_secs))
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            fast_capacity: defaults.fast_capacity,
            fast_ttl_cap_secs: defaults.fast_ttl_cap.as_secs(),
            purge_interval_secs: 60,
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        CacheConfig {
            fast_capacity: settings.fast_capacity,
            fast_ttl_cap: Duration::from_secs(settings.fast_ttl_cap_secs),
        }
    }
}

/// One buffer channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ChannelSettings {
    pub flush_interval_secs: u64,
    pub max_retries: u32,
    pub max_size: usize,
    pub health_check_secs: u64,
}

impl ChannelSettings {
    fn from_defaults(config: &ChannelConfig) -> Self {
        Self {
            flush_interval_secs: config.flush_interval.as_secs(),
            max_retries: config.max_retries,
            max_size: config.max_size,
            health_check_secs: config.health_check.as_secs(),
        }
    }

    /// Channel config named `name`
    pub fn to_channel(&self, name: &str) -> ChannelConfig {
        ChannelConfig {
            name: name.to_string(),
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            max_retries: self.max_retries,
            max_size: self.max_size,
            health_check: Duration::from_secs(self.health_check_secs),
        }
    }
}

/// Both telemetry channels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// `log` channel
    pub log: ChannelSettings,
    /// `metrics` channel
    pub metrics: ChannelSettings,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            log: ChannelSettings::from_defaults(&ChannelConfig::log()),
            metrics: ChannelSettings::from_defaults(&ChannelConfig::metrics()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.api.base_url(), "https://api.warden.dev/v1");
        assert_eq!(config.pipeline.mode, Mode::Monitor);
        assert_eq!(config.buffers.log.max_size, 2000);
        assert_eq!(config.buffers.metrics.flush_interval_secs, 10);
        assert_eq!(config.cache.purge_interval(), Some(Duration::from_secs(60)));
        assert!(config.listen_addr().is_ok());
    }

    #[test]
    fn test_purge_can_be_disabled() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"cache": {"purge_interval_secs": 0}}"#).unwrap();
        assert!(config.cache.purge_interval().is_none());
        assert_eq!(config.cache.fast_capacity, 65536);
    }

    #[test]
    fn test_partial_file() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{
                "origin": "http://origin.internal",
                "pipeline": {"mode": "block", "tenant_id": "t-9"},
                "buffers": {"log": {"flush_interval_secs": 2, "max_retries": 1, "max_size": 10, "health_check_secs": 30}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.origin, "http://origin.internal");
        assert_eq!(config.pipeline.mode, Mode::Block);
        assert_eq!(config.pipeline.tenant_id(), Some("t-9"));
        assert_eq!(config.buffers.log.to_channel("log").max_size, 10);
        assert_eq!(config.buffers.metrics.max_retries, 5);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("WARDEN_API_URL", "https://api.example.com/v2/"),
            ("WARDEN_API_KEY", "secret"),
            ("WARDEN_MODE", "block"),
            ("WARDEN_ACCESS_RULE_ID", "office"),
            ("WARDEN_LISTEN", "127.0.0.1:9000"),
            ("WARDEN_TENANT_ID", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = GatewayConfig::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.api.base_url(), "https://api.example.com/v2");
        assert_eq!(config.api.api_key(), Some("secret"));
        assert_eq!(config.pipeline.mode, Mode::Block);
        assert_eq!(config.pipeline.default_rule_id.as_deref(), Some("office"));
        assert!(config.pipeline.tenant_id().is_none());
        assert_eq!(config.listen_addr().unwrap().port(), 9000);
    }

    #[test]
    fn test_bad_mode_rejected() {
        let mut config = GatewayConfig::default();
        let result = config.apply_overrides(|name| (name == "WARDEN_MODE").then(|| "panic".to_string()));
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = GatewayConfig::load_or_default("/nonexistent/warden.json");
        assert_eq!(config.listen, "0.0.0.0:8080");
    }
}
