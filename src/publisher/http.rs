use super::{PublishError, Publisher, PublisherTransport};
use crate::codec::http::{build_request, insert_if_absent, parse_method, resolve_url, HttpBody};
use crate::retry::{is_retryable_status, RetryPolicy};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;

const AUTHORIZATION: &str = "Authorization";

/// Default transport: one HTTP request per publisher, retried on transport
/// errors and retryable statuses.
pub struct HttpPublisher {
    client: reqwest::Client,
    retry: RetryPolicy,
    trace_header: String,
    tenant_header: String,
    header_timeout: Option<Duration>,
}

impl HttpPublisher {
    pub fn new(
        client: reqwest::Client,
        retry: RetryPolicy,
        trace_header: impl Into<String>,
        tenant_header: impl Into<String>,
    ) -> Self {
        Self {
            client,
            retry,
            trace_header: trace_header.into(),
            tenant_header: tenant_header.into(),
            header_timeout: None,
        }
    }

    /// Bounds the wait for response headers, separately from the client's
    /// overall request timeout.
    pub fn with_header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    async fn send_once(
        &self,
        publisher: &Publisher,
        headers: &BTreeMap<String, String>,
    ) -> Result<String, PublishError> {
        let url = publisher.url();
        let request_error = |message: String| PublishError::Request {
            endpoint: url.clone(),
            message,
        };

        let method = parse_method(&publisher.verb).map_err(|err| request_error(err.to_string()))?;
        let target = resolve_url(&publisher.endpoint, &publisher.path)
            .map_err(|err| request_error(err.to_string()))?;
        let request = build_request(
            &self.client,
            method,
            target,
            headers,
            HttpBody::Text(&publisher.payload),
        )
        .map_err(|err| request_error(err.to_string()))?;

        let response = match self.header_timeout {
            Some(limit) => timeout(limit, request.send()).await.map_err(|_| {
                request_error(format!(
                    "no response headers within {}ms",
                    limit.as_millis()
                ))
            })?,
            None => request.send().await,
        }
        .map_err(|err| request_error(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| request_error(err.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(PublishError::Status {
                endpoint: url,
                status,
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl PublisherTransport for HttpPublisher {
    fn protocol(&self) -> &str {
        "http"
    }

    async fn send(&self, publisher: &Publisher) -> Result<String, PublishError> {
        let mut headers = publisher.headers.clone();
        insert_if_absent(&mut headers, &self.trace_header, &publisher.trace_id);
        insert_if_absent(&mut headers, &self.tenant_header, &publisher.tenant_id);
        if let Some(authorization) = publisher.auth_info.as_ref().and_then(basic_authorization) {
            insert_if_absent(&mut headers, AUTHORIZATION, &authorization);
        }

        let started = Instant::now();
        let mut attempt = 1;
        loop {
            let outcome = self.send_once(publisher, &headers).await;
            let retryable = match &outcome {
                Ok(_) => false,
                Err(PublishError::Status { status, .. }) => is_retryable_status(*status),
                Err(PublishError::Request { .. }) => true,
                Err(PublishError::UnknownProtocol { .. }) => false,
            };
            if !retryable || !self.retry.should_retry(attempt) {
                tracing::debug!(
                    target: "eel::publisher",
                    event = "http_publish",
                    url = %publisher.url(),
                    attempts = attempt,
                    ok = outcome.is_ok(),
                    elapsed_ms = started.elapsed().as_millis() as u64
                );
                return outcome;
            }
            tokio::time::sleep(self.retry.delay_for(attempt)).await;
            attempt += 1;
        }
    }
}

/// `Basic` header value for `{"type": "basic", "username": …, "password": …}`.
/// A missing `type` is read as basic.
pub fn basic_authorization(auth_info: &JsonValue) -> Option<String> {
    let auth = auth_info.as_object()?;
    let field = |name: &str| {
        auth.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.as_str())
    };
    if let Some(kind) = field("type") {
        if !kind.eq_ignore_ascii_case("basic") {
            return None;
        }
    }
    let username = field("username")?;
    let password = field("password").unwrap_or_default();
    Some(format!(
        "Basic {}",
        BASE64_ENGINE.encode(format!("{username}:{password}"))
    ))
}
