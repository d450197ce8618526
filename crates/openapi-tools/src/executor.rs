//! HTTP execution against the fixed base URL.
//!
//! The transport is injected: the registry only ever sees [`HttpTransport`]. The
//! production implementation is [`ReqwestTransport`], a single pooled `reqwest` client
//! carrying the identity header on every request.

use crate::config::ClientConfig;
use crate::error::{ConfigError, InvocationError};
use crate::indexer::is_json_media_type;
use crate::request::PreparedRequest;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Raw upstream answer, before translation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// Response headers with lowercase names, in arrival order.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// First header value with this name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Sends prepared requests to the upstream API.
///
/// Implementations must be safe to share across concurrent invocations. Dropping the
/// returned future must abandon the in-flight request.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Execute one request.
    ///
    /// Any HTTP status counts as success here; only failures to obtain a response
    /// (connect, TLS, timeout, oversize body) are errors.
    async fn execute(&self, request: &PreparedRequest) -> Result<RawResponse, InvocationError>;

    /// Header names the transport always sets and callers may not override.
    fn reserved_headers(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Production transport: one `reqwest::Client` reused for every call.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Url,
    reserved: Vec<String>,
    max_response_bytes: Option<usize>,
}

impl ReqwestTransport {
    /// Build the pre-authenticated client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the base URL is not an absolute http(s) URL, if a
    /// header name or value is invalid, or if the client cannot be constructed.
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let base_url = parse_base_url(&config.base_url)?;

        let mut headers = HeaderMap::new();
        let mut reserved = Vec::new();

        let mut identity = header_value(&config.auth.name, &config.auth.value)?;
        identity.set_sensitive(true);
        headers.insert(header_name(&config.auth.name)?, identity);
        reserved.push(config.auth.name.clone());

        for (name, value) in &config.default_headers {
            headers.insert(header_name(name)?, header_value(name, value)?);
            reserved.push(name.clone());
        }

        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("jules-mcp/{}", env!("CARGO_PKG_VERSION")));

        // One request per call against the fixed origin; a 3xx is reported, not followed.
        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none());
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        if let Some(secs) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }

        let client = builder
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        tracing::debug!(
            base_url = %redact_url(&base_url),
            timeout_secs = config.timeout_secs,
            "HTTP client ready"
        );

        Ok(Self {
            client,
            base_url,
            reserved,
            max_response_bytes: config.max_response_bytes,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, request: &PreparedRequest) -> Result<Url, InvocationError> {
        let joined = format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            request.path
        );
        let mut url = Url::parse(&joined)
            .map_err(|e| InvocationError::malformed(format!("invalid request URL: {e}")))?;
        url.set_query(request.query_string().as_deref());
        Ok(url)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &PreparedRequest) -> Result<RawResponse, InvocationError> {
        let url = self.url_for(request)?;
        let mut builder = self.client.request(request.method.clone(), url);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        if let Some(payload) = &request.body {
            let raw = match &payload.value {
                Value::String(s) if !is_json_media_type(&payload.content_type) => {
                    s.clone().into_bytes()
                }
                other => serde_json::to_vec(other).map_err(|e| {
                    InvocationError::malformed(format!("cannot serialize request body: {e}"))
                })?,
            };
            builder = builder
                .header(CONTENT_TYPE, payload.content_type.as_str())
                .body(raw);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| InvocationError::Transport(sanitize_reqwest_error(&e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = read_body_limited(response, self.max_response_bytes).await?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    fn reserved_headers(&self) -> Vec<String> {
        self.reserved.clone()
    }
}

async fn read_body_limited(
    mut response: reqwest::Response,
    max_bytes: Option<usize>,
) -> Result<Vec<u8>, InvocationError> {
    let Some(max) = max_bytes else {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| InvocationError::Transport(sanitize_reqwest_error(&e)))?;
        return Ok(bytes.to_vec());
    };

    if let Some(len) = response.content_length()
        && len > max as u64
    {
        return Err(InvocationError::Transport(format!(
            "response too large: {len} bytes (limit {max})"
        )));
    }

    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| InvocationError::Transport(sanitize_reqwest_error(&e)))?
    {
        if out.len().saturating_add(chunk.len()) > max {
            return Err(InvocationError::Transport(format!(
                "response too large: exceeded {max} bytes"
            )));
        }
        out.extend_from_slice(&chunk);
    }

    Ok(out)
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        message,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.cannot_be_a_base() || url.host().is_none() {
        return Err(invalid("URL has no host".to_string()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("base URL must not carry a query or fragment".to_string()));
    }
    Ok(url)
}

fn header_name(name: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
        name: name.to_string(),
        message: e.to_string(),
    })
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeader {
        name: name.to_string(),
        message: "value contains invalid characters".to_string(),
    })
}

/// Drop credentials, query and fragment from a URL before it reaches a log or a client.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{QueryPair, RequestPayload};
    use axum::http::StatusCode;
    use jules_test_support::{StubUpstream, echo_router, fixed_router};
    use reqwest::Method;
    use serde_json::json;

    fn get(path: &str) -> PreparedRequest {
        PreparedRequest {
            method: Method::GET,
            path: path.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[test]
    fn rejects_bad_base_urls() {
        for bad in ["not a url", "ftp://example.com", "https://x.test/?key=1"] {
            let cfg = ClientConfig::jules("k").with_base_url(bad);
            assert!(
                matches!(ReqwestTransport::new(&cfg), Err(ConfigError::InvalidBaseUrl { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn rejects_api_key_with_newline() {
        let cfg = ClientConfig::jules("abc\ndef");
        assert!(matches!(
            ReqwestTransport::new(&cfg),
            Err(ConfigError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn identity_header_is_reserved() {
        let mut cfg = ClientConfig::jules("k");
        cfg.default_headers
            .insert("X-Client".to_string(), "mcp".to_string());
        let transport = ReqwestTransport::new(&cfg).unwrap();
        assert_eq!(
            transport.reserved_headers(),
            vec!["X-Goog-Api-Key".to_string(), "X-Client".to_string()]
        );
    }

    #[test]
    fn joins_base_path_and_query() {
        let cfg = ClientConfig::jules("k").with_base_url("https://api.test/prefix/");
        let transport = ReqwestTransport::new(&cfg).unwrap();
        let mut req = get("/v1alpha/sessions");
        req.query.push(QueryPair {
            key: "pageSize".to_string(),
            value: "5".to_string(),
            allow_reserved: false,
        });
        assert_eq!(
            transport.url_for(&req).unwrap().as_str(),
            "https://api.test/prefix/v1alpha/sessions?pageSize=5"
        );
    }

    #[test]
    fn test_redact_url() {
        let u = Url::parse("https://user:pw@api.test/a?key=secret#frag").unwrap();
        assert_eq!(redact_url(&u), "https://api.test/a");
    }

    #[tokio::test]
    async fn sends_identity_header_and_json_body() {
        let upstream = StubUpstream::spawn(echo_router()).await.unwrap();
        let cfg = ClientConfig::jules("key-123").with_base_url(upstream.base_url());
        let transport = ReqwestTransport::new(&cfg).unwrap();

        let req = PreparedRequest {
            method: Method::POST,
            path: "/v1alpha/sessions".to_string(),
            query: Vec::new(),
            headers: vec![("X-Trace".to_string(), "t-1".to_string())],
            body: Some(RequestPayload {
                content_type: "application/json".to_string(),
                value: json!({ "prompt": "hello" }),
            }),
        };

        let resp = transport.execute(&req).await.unwrap();
        assert_eq!(resp.status, 200);
        let echoed: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(echoed["method"], "POST");
        assert_eq!(echoed["path"], "/v1alpha/sessions");
        assert_eq!(echoed["headers"]["x-goog-api-key"], "key-123");
        assert_eq!(echoed["headers"]["x-trace"], "t-1");
        assert_eq!(echoed["headers"]["content-type"], "application/json");
        assert_eq!(echoed["body"], json!({ "prompt": "hello" }));
    }

    #[tokio::test]
    async fn json_suffix_body_keeps_declared_content_type() {
        let upstream = StubUpstream::spawn(echo_router()).await.unwrap();
        let cfg = ClientConfig::jules("k").with_base_url(upstream.base_url());
        let transport = ReqwestTransport::new(&cfg).unwrap();

        let req = PreparedRequest {
            method: Method::PATCH,
            path: "/items/1".to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Some(RequestPayload {
                content_type: "application/merge-patch+json".to_string(),
                value: json!({ "title": null }),
            }),
        };

        let resp = transport.execute(&req).await.unwrap();
        let echoed: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(
            echoed["headers"]["content-type"],
            "application/merge-patch+json"
        );
        assert_eq!(echoed["body"], json!({ "title": null }));
    }

    #[tokio::test]
    async fn redirects_are_not_followed() {
        let elsewhere = StubUpstream::spawn(echo_router()).await.unwrap();
        let location = format!("{}/elsewhere", elsewhere.base_url());
        let redirecting = axum::Router::new().fallback(move || {
            let location = location.clone();
            async move { (StatusCode::FOUND, [(axum::http::header::LOCATION, location)]) }
        });
        let upstream = StubUpstream::spawn(redirecting).await.unwrap();
        let cfg = ClientConfig::jules("secret").with_base_url(upstream.base_url());
        let transport = ReqwestTransport::new(&cfg).unwrap();

        let resp = transport.execute(&get("/v1alpha/sessions")).await.unwrap();
        assert_eq!(resp.status, 302);
        assert!(resp.header("location").is_some_and(|l| l.ends_with("/elsewhere")));
    }

    #[tokio::test]
    async fn error_statuses_are_responses_not_errors() {
        let upstream = StubUpstream::spawn(fixed_router(
            StatusCode::NOT_FOUND,
            "application/json",
            r#"{"error":"missing"}"#,
        ))
        .await
        .unwrap();
        let cfg = ClientConfig::jules("k").with_base_url(upstream.base_url());
        let transport = ReqwestTransport::new(&cfg).unwrap();

        let resp = transport.execute(&get("/x")).await.unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.content_type(), Some("application/json"));
    }

    #[tokio::test]
    async fn oversized_body_is_a_transport_error() {
        let upstream = StubUpstream::spawn(fixed_router(
            StatusCode::OK,
            "text/plain",
            "x".repeat(1024),
        ))
        .await
        .unwrap();
        let mut cfg = ClientConfig::jules("k").with_base_url(upstream.base_url());
        cfg.max_response_bytes = Some(16);
        let transport = ReqwestTransport::new(&cfg).unwrap();

        let err = transport.execute(&get("/big")).await.unwrap_err();
        assert!(matches!(err, InvocationError::Transport(m) if m.contains("too large")));
    }

    #[tokio::test]
    async fn connection_failure_does_not_leak_query() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let cfg = ClientConfig::jules("k").with_base_url(format!("http://{addr}"));
        let transport = ReqwestTransport::new(&cfg).unwrap();
        let mut req = get("/v1alpha/sources");
        req.query.push(QueryPair {
            key: "token".to_string(),
            value: "secret-token".to_string(),
            allow_reserved: false,
        });

        let err = transport.execute(&req).await.unwrap_err();
        let InvocationError::Transport(message) = err else {
            panic!("expected transport error");
        };
        assert!(!message.contains("secret-token"), "{message}");
    }
}
