//! Inbound request as seen by the pipeline

use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Request headers with lowercase names, duplicates preserved in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders(Vec<(String, String)>);

impl RequestHeaders {
    /// Empty header list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0.push((name.to_ascii_lowercase(), value.into()));
    }

    /// Replace every value of `name` with a single one
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        self.0.retain(|(n, _)| *n != name);
        self.0.push((name, value.into()));
    }

    /// First value of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First non-blank value of `name`, trimmed
    pub fn get_non_blank(&self, name: &str) -> Option<&str> {
        self.get(name).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Iterate name/value pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of header lines
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no headers are present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Name to list of values
    pub fn to_multi_map(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &self.0 {
            map.entry(name.clone()).or_default().push(value.clone());
        }
        map
    }

    /// Name to last value, as a JSON object
    pub fn to_json_object(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in &self.0 {
            map.insert(name.clone(), Value::String(value.clone()));
        }
        Value::Object(map)
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for RequestHeaders {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name.as_ref(), value);
        }
        headers
    }
}

/// One inbound HTTP request
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// HTTP method, uppercase
    pub method: String,
    /// `http` or `https`
    pub scheme: String,
    /// Path component, always starting with `/`
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    /// Headers
    pub headers: RequestHeaders,
    /// Full request body
    pub body: Bytes,
}

impl RequestContext {
    /// Request without headers or body
    pub fn new(method: &str, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (path_and_query, None),
        };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        Self {
            method: method.to_ascii_uppercase(),
            scheme: "https".to_string(),
            path,
            query: query.filter(|q| !q.is_empty()),
            headers: RequestHeaders::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the scheme
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_ascii_lowercase();
        self
    }

    /// First value of a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Host header with any port removed
    pub fn host(&self) -> Option<&str> {
        let host = self.headers.get_non_blank("host")?;
        if host.starts_with('[') {
            // bracketed IPv6 literal
            return Some(host.split_once(']').map_or(host, |(h, _)| &host[..h.len() + 1]));
        }
        Some(host.split(':').next().unwrap_or(host))
    }

    /// Path plus query
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Absolute URL reconstructed from the host header
    pub fn url(&self) -> String {
        let host = self.headers.get_non_blank("host").unwrap_or("localhost");
        format!("{}://{}{}", self.scheme, host, self.path_and_query())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let mut headers: RequestHeaders =
            vec![("X-Forwarded-For", "1.1.1.1"), ("x-forwarded-for", "2.2.2.2")]
                .into_iter()
                .collect();
        assert_eq!(headers.get("X-FORWARDED-FOR"), Some("1.1.1.1"));
        assert_eq!(headers.to_multi_map()["x-forwarded-for"].len(), 2);

        headers.set("X-Forwarded-For", "3.3.3.3");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-forwarded-for"), Some("3.3.3.3"));
    }

    #[test]
    fn test_blank_header_is_absent() {
        let ctx = RequestContext::new("get", "/").with_header("cf-ray", "   ");
        assert_eq!(ctx.headers.get_non_blank("cf-ray"), None);
        assert_eq!(ctx.method, "GET");
    }

    #[test]
    fn test_path_query_split() {
        let ctx = RequestContext::new("POST", "/api/items?id=7&x=1");
        assert_eq!(ctx.path, "/api/items");
        assert_eq!(ctx.query.as_deref(), Some("id=7&x=1"));

        let ctx = RequestContext::new("GET", "/plain?");
        assert!(ctx.query.is_none());
    }

    #[test]
    fn test_host_strips_port() {
        let ctx = RequestContext::new("GET", "/a?b=1").with_header("Host", "shop.example.com:8443");
        assert_eq!(ctx.host(), Some("shop.example.com"));
        assert_eq!(ctx.url(), "https://shop.example.com:8443/a?b=1");

        let ctx = RequestContext::new("GET", "/").with_header("host", "[2001:db8::1]:8080");
        assert_eq!(ctx.host(), Some("[2001:db8::1]"));
    }
}
