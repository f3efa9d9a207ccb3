#![forbid(unsafe_code)]

use crate::context::EvalError;
use crate::error::{Context, Result};
use crate::retry::{is_retryable_status, RetryPolicy};
use axum::http::HeaderMap as AxumHeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Url};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;

pub fn resolve_url(base: &str, path: &str) -> Result<Url> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Url::parse(path).map_err(|err| crate::err!("invalid request url `{path}`: {err}"));
    }

    if path.is_empty() {
        return Url::parse(base).with_context(|| format!("invalid endpoint url `{base}`"));
    }

    let joined = join_url(base, path);
    Url::parse(&joined).with_context(|| format!("invalid request url `{joined}`"))
}

/// Endpoint and path concatenate with exactly one separating `/`;
/// `Url::join` would drop the endpoint's last segment.
pub fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

pub enum HttpBody<'a> {
    Empty,
    Json(&'a JsonValue),
    Text(&'a str),
}

pub fn build_request(
    client: &reqwest::Client,
    method: Method,
    url: Url,
    headers: &BTreeMap<String, String>,
    body: HttpBody<'_>,
) -> Result<RequestBuilder> {
    let mut request = client.request(method, url);
    let mut has_content_type = false;

    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| crate::err!("invalid header name `{name}`: {err}"))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|err| crate::err!("invalid header value for `{name}`: {err}"))?;
        has_content_type |= header_name == CONTENT_TYPE;
        request = request.header(header_name, header_value);
    }

    match body {
        HttpBody::Empty => {}
        HttpBody::Json(value) => {
            if !has_content_type {
                request = request.header(CONTENT_TYPE, "application/json");
            }
            request = match value {
                JsonValue::Null => request,
                JsonValue::String(text) => request.body(text.clone()),
                other => request.body(other.to_string()),
            };
        }
        HttpBody::Text(text) => {
            if !text.is_empty() {
                if !has_content_type {
                    request = request.header(CONTENT_TYPE, "application/json");
                }
                request = request.body(text.to_string());
            }
        }
    }

    Ok(request)
}

pub fn parse_method(verb: &str) -> Result<Method> {
    let upper = verb.trim().to_ascii_uppercase();
    let upper = if upper.is_empty() { "POST".to_string() } else { upper };
    Method::from_bytes(upper.as_bytes()).map_err(|err| crate::err!("invalid HTTP method `{verb}`: {err}"))
}

/// JSON when the body parses as JSON, otherwise the text (or base64 for binary).
pub fn decode_body(bytes: &[u8]) -> JsonValue {
    if bytes.is_empty() {
        return JsonValue::String(String::new());
    }

    if let Ok(json) = serde_json::from_slice::<JsonValue>(bytes) {
        return crate::jdoc::normalize_numbers(json);
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => JsonValue::String(text.to_string()),
        Err(_) => JsonValue::String(BASE64_ENGINE.encode(bytes)),
    }
}

pub fn normalise_headers(headers: &AxumHeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

/// Adds `name: value` unless a header with that name is already present.
pub fn insert_if_absent(headers: &mut BTreeMap<String, String>, name: &str, value: &str) {
    if name.is_empty() || value.is_empty() {
        return;
    }
    if headers.keys().any(|key| key.eq_ignore_ascii_case(name)) {
        return;
    }
    headers.insert(name.to_string(), value.to_string());
}

/// Outbound call issued by the `curl` family of functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurlRequest {
    pub method: String,
    pub url: String,
    pub body: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub retry: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurlResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Blocking HTTP seam used during expression evaluation. Evaluation is
/// synchronous, so implementations must not require an async caller.
pub trait HttpCaller: Send + Sync {
    fn call(&self, request: &CurlRequest) -> std::result::Result<CurlResponse, EvalError>;
}

/// Reqwest-backed caller driving the async client from the evaluating thread.
pub struct ReqwestCaller {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl ReqwestCaller {
    pub fn new(client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    async fn execute(&self, request: &CurlRequest) -> std::result::Result<CurlResponse, EvalError> {
        let policy = if request.retry {
            self.retry
        } else {
            RetryPolicy::none()
        };
        let mut attempt = 1;
        loop {
            let outcome = self.execute_once(request).await;
            let retryable = match &outcome {
                Ok(response) => is_retryable_status(response.status),
                Err(_) => true,
            };
            if !retryable || !policy.should_retry(attempt) {
                return outcome;
            }
            tokio::time::sleep(policy.delay_for(attempt)).await;
            attempt += 1;
        }
    }

    async fn execute_once(
        &self,
        request: &CurlRequest,
    ) -> std::result::Result<CurlResponse, EvalError> {
        let network = |status: u16, message: String| EvalError::network(&request.url, status, message);

        let method = parse_method(&request.method).map_err(|err| network(0, err.to_string()))?;
        let url = Url::parse(&request.url).map_err(|err| network(0, err.to_string()))?;
        let body = match request.body.as_deref() {
            Some(text) => HttpBody::Text(text),
            None => HttpBody::Empty,
        };
        let builder = build_request(&self.client, method, url, &request.headers, body)
            .map_err(|err| network(0, err.to_string()))?;

        let response = builder
            .send()
            .await
            .map_err(|err| network(0, err.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| network(status, err.to_string()))?;
        Ok(CurlResponse {
            status,
            body: bytes.to_vec(),
        })
    }
}

impl HttpCaller for ReqwestCaller {
    fn call(&self, request: &CurlRequest) -> std::result::Result<CurlResponse, EvalError> {
        crate::engine::block_on_io(self.execute(request))
            .unwrap_or_else(|| Err(EvalError::network(&request.url, 0, "no runtime available")))
    }
}

/// Shared client; `idle_timeout` closes pooled connections left idle that long.
pub fn build_client(
    timeout: Duration,
    max_idle_per_host: usize,
    idle_timeout: Option<Duration>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(max_idle_per_host);
    if let Some(idle) = idle_timeout {
        builder = builder.pool_idle_timeout(idle);
    }
    builder.build().context("failed to build HTTP client")
}
