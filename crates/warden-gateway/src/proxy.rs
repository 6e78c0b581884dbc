//! Origin forwarding

use crate::{GatewayError, GatewayResult};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;
use warden_pipeline::RequestContext;

/// Headers that describe a single hop and are not forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Response received from origin
#[derive(Debug, Clone)]
pub struct OriginResponse {
    /// Status code
    pub status: u16,
    /// End-to-end headers
    pub headers: Vec<(String, String)>,
    /// Body
    pub body: Bytes,
}

/// HTTP client for the protected origin
#[derive(Clone)]
pub struct OriginClient {
    client: reqwest::Client,
    base_url: String,
}

impl OriginClient {
    /// Create client for `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Origin base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replay `ctx` against origin, preserving method, path, query, headers and body
    pub async fn forward(&self, ctx: &RequestContext) -> GatewayResult<OriginResponse> {
        let method = reqwest::Method::from_bytes(ctx.method.as_bytes())
            .map_err(|e| GatewayError::Origin(format!("method {:?}: {}", ctx.method, e)))?;
        let url = format!("{}{}", self.base_url, ctx.path_and_query());

        let mut request = self.client.request(method, &url);
        for (name, value) in ctx.headers.iter().filter(|(name, _)| !is_hop_by_hop(name)) {
            request = request.header(name, value);
        }
        if !ctx.body.is_empty() {
            request = request.body(ctx.body.clone());
        }

        let response = request.send().await.map_err(|e| GatewayError::Origin(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await.map_err(|e| GatewayError::Origin(e.to_string()))?;

        debug!(%url, status, bytes = body.len(), "Origin responded");
        Ok(OriginResponse { status, headers, body })
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_forward_preserves_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cart/add"))
            .and(query_param("sku", "42"))
            .and(header("x-shop", "main"))
            .and(body_string("qty=2"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-origin", "yes")
                    .set_body_string("added"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let origin = OriginClient::new(&format!("{}/", server.uri()), Duration::from_secs(5)).unwrap();
        let ctx = RequestContext::new("POST", "/cart/add?sku=42")
            .with_header("host", "shop.example.com")
            .with_header("x-shop", "main")
            .with_header("connection", "keep-alive")
            .with_body("qty=2");

        let response = origin.forward(&ctx).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.body, Bytes::from_static(b"added"));
        assert!(response.headers.iter().any(|(k, v)| k == "x-origin" && v == "yes"));
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_error() {
        let origin = OriginClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let result = origin.forward(&RequestContext::new("GET", "/")).await;
        assert!(matches!(result, Err(GatewayError::Origin(_))));
    }

    #[test]
    fn test_hop_by_hop() {
        assert!(is_hop_by_hop("Transfer-Encoding"));
        assert!(!is_hop_by_hop("x-request-id"));
    }
}
