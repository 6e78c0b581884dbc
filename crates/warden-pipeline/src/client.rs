//! Control API client
//!
//! JSON over HTTPS with bearer auth. A call succeeds only on a `200` with a
//! JSON content type and no embedded `error` field.

use crate::config::ApiConfig;
use crate::filter::FilterEvent;
use crate::upstream::{
    FilterResponse, FilterService, RuleSource, ScanRequest, ScanResponse, ScanService,
    ThreatSource, UpstreamError, UpstreamResult,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};
use warden_common::{AccessRuleResponse, ThreatVerdict};

/// Control API client
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ApiClient {
    /// Create new client
    pub fn new(config: &ApiConfig) -> UpstreamResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            api_key: config.api_key().map(str::to_string),
        })
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True when a bearer key is present
    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn request<B, T>(&self, method: Method, endpoint: &str, body: Option<&B>) -> UpstreamResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        let started = Instant::now();

        let mut builder = self.client.request(method.clone(), &url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        debug!(
            %method,
            endpoint,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "API request completed"
        );

        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(endpoint, status = status.as_u16(), "API request failed");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.to_ascii_lowercase().contains("application/json") {
            return Err(UpstreamError::NotJson(content_type));
        }

        let value: Value = response.json().await?;
        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(UpstreamError::Embedded(message));
        }

        serde_json::from_value(value).map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RuleSource for ApiClient {
    async fn fetch_rule(&self, rule_id: &str) -> UpstreamResult<AccessRuleResponse> {
        let endpoint = format!("access-rules/{}", rule_id);
        self.request::<(), _>(Method::GET, &endpoint, None).await
    }
}

#[async_trait]
impl ThreatSource for ApiClient {
    async fn fetch_threat(&self, ip: &str) -> UpstreamResult<ThreatVerdict> {
        let endpoint = format!("threat?ip={}", ip);
        self.request::<(), _>(Method::GET, &endpoint, None).await
    }
}

#[async_trait]
impl FilterService for ApiClient {
    async fn submit(&self, event: &FilterEvent, idempotency_key: &str) -> UpstreamResult<FilterResponse> {
        let endpoint = format!("filter?idempotency-key={}&originalEvent=false", idempotency_key);
        self.request(Method::POST, &endpoint, Some(event)).await
    }
}

#[async_trait]
impl ScanService for ApiClient {
    async fn scan(&self, request: &ScanRequest) -> UpstreamResult<ScanResponse> {
        if request.body.is_empty() {
            return Err(UpstreamError::Rejected("scan body is empty".into()));
        }
        self.request(Method::POST, "scan", Some(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(&ApiConfig {
            base_url: format!("{}/v1/", server.uri()),
            api_key: Some("secret".into()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_rule() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/access-rules/r1"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "id": "r1",
                    "name": "office",
                    "block": {"ips": ["10.0.0.0/8"]},
                    "is_active": true
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = client(&server).fetch_rule("r1").await.unwrap();
        assert!(resp.success);
        let rule = resp.data.unwrap();
        assert_eq!(rule.block.ips, vec!["10.0.0.0/8".to_string()]);
        assert!(rule.allow.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_threat() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/threat"))
            .and(query_param("ip", "1.2.3.4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ip": "1.2.3.4",
                "advice": "block",
                "intel": {"score": 91, "rule_id": "t-7"},
                "ttl_s": 120
            })))
            .mount(&server)
            .await;

        let verdict = client(&server).fetch_threat("1.2.3.4").await.unwrap();
        assert_eq!(verdict.ttl_s, 120);
        assert_eq!(verdict.intel.rule_id.as_deref(), Some("t-7"));
    }

    #[tokio::test]
    async fn test_non_200_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ip": "1.2.3.4"})))
            .mount(&server)
            .await;

        let err = client(&server).fetch_threat("1.2.3.4").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 201, .. }));
    }

    #[tokio::test]
    async fn test_non_json_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server).fetch_rule("r1").await.unwrap_err();
        assert!(matches!(err, UpstreamError::NotJson(_)));
    }

    #[tokio::test]
    async fn test_embedded_error_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "rate limited"})))
            .mount(&server)
            .await;

        let err = client(&server).fetch_rule("r1").await.unwrap_err();
        match err {
            UpstreamError::Embedded(msg) => assert_eq!(msg, "rate limited"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scan_posts_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/scan"))
            .and(body_json(json!({"content_type": "application/pdf", "body": "%PDF"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"virus_detected": true, "virus_name": "EICAR"})),
            )
            .mount(&server)
            .await;

        let resp = client(&server)
            .scan(&ScanRequest {
                content_type: "application/pdf".into(),
                body: "%PDF".into(),
            })
            .await
            .unwrap();
        assert!(resp.is_positive());
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = ApiClient::new(&ApiConfig {
            base_url: server.uri(),
            api_key: None,
            timeout_secs: 1,
        })
        .unwrap();
        let err = client.fetch_rule("r1").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout));
    }
}
