//! Outbound sends produced by the pipeline.
//!
//! A [`Publisher`] carries everything needed for one side-effecting send; the
//! transport that performs it is looked up by the publisher's protocol.

pub mod http;
pub mod null;

pub use http::HttpPublisher;
pub use null::NullPublisher;

use crate::codec::http::join_url;
use crate::context::EvalError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Result of applying one handler to one event for one endpoint and path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Publisher {
    pub endpoint: String,
    pub path: String,
    pub verb: String,
    pub protocol: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_info: Option<JsonValue>,
    pub payload: String,
    pub payload_parsed: JsonValue,
    pub debug: bool,
    pub tenant_id: String,
    pub trace_id: String,
    pub handler: String,
}

impl Publisher {
    pub fn url(&self) -> String {
        join_url(&self.endpoint, &self.path)
    }

    /// Egress dedupe key.
    pub fn fingerprint(&self) -> String {
        format!("{}\n{}", self.url(), self.payload)
    }

    /// Debug view returned instead of sending; credentials are left out.
    pub fn describe(&self) -> JsonValue {
        json!({
            "handler": self.handler,
            "tenantId": self.tenant_id,
            "traceId": self.trace_id,
            "protocol": self.protocol,
            "verb": self.verb,
            "url": self.url(),
            "headers": self.headers,
            "payload": self.payload_parsed,
        })
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no publisher registered for protocol `{protocol}`")]
    UnknownProtocol { protocol: String },
    #[error("request to `{endpoint}` failed: {message}")]
    Request { endpoint: String, message: String },
    #[error("`{endpoint}` answered with status {status}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
}

impl PublishError {
    pub fn status(&self) -> u16 {
        match self {
            PublishError::Status { status, .. } => *status,
            _ => 0,
        }
    }

    pub fn to_eval_error(&self, url: &str) -> EvalError {
        EvalError::network(url, self.status(), self.to_string())
    }
}

#[async_trait]
pub trait PublisherTransport: Send + Sync {
    fn protocol(&self) -> &str;

    /// Performs the send and returns the response body.
    async fn send(&self, publisher: &Publisher) -> Result<String, PublishError>;
}

/// Transports keyed by protocol name (case-insensitive).
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    transports: HashMap<String, Arc<dyn PublisherTransport>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transport: Arc<dyn PublisherTransport>) {
        self.transports
            .insert(transport.protocol().to_ascii_lowercase(), transport);
    }

    pub fn with(mut self, transport: Arc<dyn PublisherTransport>) -> Self {
        self.register(transport);
        self
    }

    pub fn get(&self, protocol: &str) -> Option<Arc<dyn PublisherTransport>> {
        self.transports
            .get(&protocol.trim().to_ascii_lowercase())
            .cloned()
    }

    pub fn protocols(&self) -> Vec<String> {
        let mut protocols: Vec<String> = self.transports.keys().cloned().collect();
        protocols.sort();
        protocols
    }

    pub async fn send(&self, publisher: &Publisher) -> Result<String, PublishError> {
        let transport = self
            .get(&publisher.protocol)
            .ok_or_else(|| PublishError::UnknownProtocol {
                protocol: publisher.protocol.clone(),
            })?;
        transport.send(publisher).await
    }
}

impl std::fmt::Debug for PublisherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn sample_publisher(endpoint: &str, path: &str) -> Publisher {
    Publisher {
        endpoint: endpoint.to_string(),
        path: path.to_string(),
        verb: "POST".to_string(),
        protocol: "http".to_string(),
        headers: BTreeMap::new(),
        auth_info: None,
        payload: "{\"a\":1}".to_string(),
        payload_parsed: json!({ "a": 1 }),
        debug: false,
        tenant_id: "acme".to_string(),
        trace_id: "trace-1".to_string(),
        handler: "h".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_endpoint_and_path() {
        assert_eq!(sample_publisher("http://a", "/1").url(), "http://a/1");
        assert_eq!(sample_publisher("http://a/", "1").url(), "http://a/1");
        assert_eq!(sample_publisher("http://a", "").url(), "http://a");
    }

    #[test]
    fn fingerprint_combines_url_and_payload() {
        let publisher = sample_publisher("http://a", "/1");
        assert_eq!(publisher.fingerprint(), "http://a/1\n{\"a\":1}");
    }

    #[tokio::test]
    async fn unknown_protocol_is_an_error() {
        let registry = PublisherRegistry::new().with(Arc::new(NullPublisher));
        let mut publisher = sample_publisher("http://a", "");
        publisher.protocol = "NULL".to_string();
        assert_eq!(registry.send(&publisher).await.expect("null send"), "");

        publisher.protocol = "kafka".to_string();
        assert!(matches!(
            registry.send(&publisher).await,
            Err(PublishError::UnknownProtocol { .. })
        ));
    }
}
