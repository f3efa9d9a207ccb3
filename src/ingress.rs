//! Admission of raw events, shared by every ingress transport: size and
//! blank checks, JSON parsing, duplicate suppression, then either queueing
//! or synchronous processing.

use crate::context::{EvalError, EventContext};
use crate::dispatcher::{DispatchError, Dispatchers, WorkItem};
use crate::eel_event;
use crate::engine::Engine;
use crate::jdoc::JDoc;
use crate::pipeline::{self, SendOutcome};
use axum::http::StatusCode;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

const TARGET: &str = "eel::ingress";

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("message is blank")]
    Blank,
    #[error("message is not valid JSON: {0}")]
    InvalidJson(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("processing failed: {0}")]
    Internal(String),
}

impl IngressError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngressError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            IngressError::Blank | IngressError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            IngressError::Dispatch(DispatchError::QueueFull { .. }) => StatusCode::TOO_MANY_REQUESTS,
            IngressError::Dispatch(DispatchError::Stopped { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            IngressError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    Duplicate,
}

impl Admission {
    pub fn as_str(self) -> &'static str {
        match self {
            Admission::Queued => "queued",
            Admission::Duplicate => "duplicate",
        }
    }
}

/// Result of synchronous processing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReport {
    pub tenant_id: String,
    pub trace_id: String,
    pub publishers: Vec<JsonValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sent: Vec<SendOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EvalError>,
}

impl ProcessReport {
    pub fn payloads(&self) -> Vec<JsonValue> {
        self.publishers
            .iter()
            .filter_map(|publisher| publisher.get("payload").cloned())
            .collect()
    }
}

/// How a synchronously processed event leaves the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    /// Build publishers only and report them.
    Preview,
    /// Build and send; a debug context still only previews.
    Send,
}

pub struct Ingress {
    engine: Arc<Engine>,
    dispatchers: RwLock<Arc<Dispatchers>>,
}

impl Ingress {
    pub fn new(engine: Arc<Engine>, dispatchers: Arc<Dispatchers>) -> Self {
        Self {
            engine,
            dispatchers: RwLock::new(dispatchers),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn dispatchers(&self) -> Arc<Dispatchers> {
        Arc::clone(&self.dispatchers.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Routes new admissions to `next` and returns the previous set.
    pub fn swap_dispatchers(&self, next: Arc<Dispatchers>) -> Arc<Dispatchers> {
        let mut guard = self.dispatchers.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }

    pub fn context(&self, headers: BTreeMap<String, String>) -> EventContext {
        EventContext::from_headers(Arc::clone(&self.engine), headers)
    }

    pub fn is_sync(&self, headers: &BTreeMap<String, String>) -> bool {
        header_flag(headers, &self.engine.config().http_sync_header)
    }

    pub fn is_debug(&self, headers: &BTreeMap<String, String>) -> bool {
        header_flag(headers, &self.engine.config().http_debug_header)
    }

    /// Size, blank and JSON checks.
    pub fn parse(&self, raw: &[u8]) -> Result<JDoc, IngressError> {
        let limit = self.engine.config().max_message_size;
        if limit > 0 && raw.len() > limit {
            return Err(IngressError::TooLarge {
                size: raw.len(),
                limit,
            });
        }
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(IngressError::Blank);
        }
        JDoc::from_bytes(raw).map_err(|err| IngressError::InvalidJson(err.to_string()))
    }

    fn is_duplicate(&self, raw: &[u8], ctx: &EventContext) -> bool {
        if !self.engine.dup_checker().is_duplicate(raw) {
            return false;
        }
        self.engine.stats().inc_duplicates();
        eel_event!(
            info,
            TARGET,
            "duplicate_dropped",
            tenant = ctx.tenant_id(),
            trace = ctx.trace_id()
        );
        true
    }

    /// Parses `raw` and hands it to the tenant's dispatcher.
    pub async fn admit(
        &self,
        raw: Bytes,
        headers: BTreeMap<String, String>,
    ) -> Result<Admission, IngressError> {
        self.engine.stats().inc_received();
        let event = self.parse(&raw)?;
        let ctx = self.context(headers);
        eel_event!(
            debug,
            TARGET,
            "event_received",
            tenant = ctx.tenant_id(),
            trace = ctx.trace_id(),
            bytes = raw.len()
        );
        if self.is_duplicate(&raw, &ctx) {
            return Ok(Admission::Duplicate);
        }

        let tenant = ctx.tenant_id().to_string();
        let dispatchers = self.dispatchers();
        match dispatchers.enqueue(WorkItem { event, raw, ctx }).await {
            Ok(()) => Ok(Admission::Queued),
            Err(err) => {
                if matches!(err, DispatchError::QueueFull { .. }) {
                    self.engine.stats().inc_queue_full();
                    eel_event!(warn, TARGET, "queue_full", tenant = tenant.as_str());
                }
                Err(err.into())
            }
        }
    }

    /// Processes `raw` on the calling request. A duplicate in send mode
    /// yields a report without publishers.
    pub async fn process(
        &self,
        raw: Bytes,
        headers: BTreeMap<String, String>,
        mode: ProcessMode,
    ) -> Result<ProcessReport, IngressError> {
        self.engine.stats().inc_received();
        let event = self.parse(&raw)?;
        let ctx = self.context(headers);
        if mode == ProcessMode::Send && self.is_duplicate(&raw, &ctx) {
            return Ok(report(&ctx, Vec::new(), Vec::new()));
        }
        process_event(ctx, event, mode).await
    }
}

/// Runs the pipeline for one parsed event outside the worker pool.
pub async fn process_event(
    mut ctx: EventContext,
    event: JDoc,
    mode: ProcessMode,
) -> Result<ProcessReport, IngressError> {
    let (ctx, publishers) = tokio::task::spawn_blocking(move || {
        let publishers = pipeline::process_event(&mut ctx, &event);
        (ctx, publishers)
    })
    .await
    .map_err(|err| IngressError::Internal(err.to_string()))?;

    let described: Vec<JsonValue> = publishers.iter().map(|publisher| publisher.describe()).collect();
    let sent = if mode == ProcessMode::Send && !ctx.is_debug() {
        pipeline::send_publishers(&ctx, publishers).await
    } else {
        Vec::new()
    };

    let stats = ctx.engine().stats();
    stats.inc_processed();
    stats.add_eval_errors(ctx.error_count());
    Ok(report(&ctx, described, sent))
}

fn header_flag(headers: &BTreeMap<String, String>, name: &str) -> bool {
    headers
        .iter()
        .any(|(key, value)| key.eq_ignore_ascii_case(name) && value.trim().eq_ignore_ascii_case("true"))
}

fn report(ctx: &EventContext, publishers: Vec<JsonValue>, sent: Vec<SendOutcome>) -> ProcessReport {
    ProcessReport {
        tenant_id: ctx.tenant_id().to_string(),
        trace_id: ctx.trace_id().to_string(),
        publishers,
        sent,
        errors: ctx.errors(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EelConfig;
    use crate::dispatcher::PipelineWorkHandler;

    fn ingress(config: EelConfig) -> Ingress {
        let engine = Arc::new(Engine::builder(config).build().expect("engine"));
        let dispatchers = Arc::new(Dispatchers::new(
            Arc::clone(&engine),
            Arc::new(PipelineWorkHandler),
        ));
        Ingress::new(engine, dispatchers)
    }

    #[tokio::test]
    async fn parse_rejects_oversized_blank_and_invalid_bodies() {
        let mut config = EelConfig::default();
        config.max_message_size = 8;
        let ingress = ingress(config);

        let too_large = ingress.parse(b"{\"a\":\"123456\"}").expect_err("too large");
        assert_eq!(too_large.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        let blank = ingress.parse(b"  \n").expect_err("blank");
        assert_eq!(blank.status_code(), StatusCode::BAD_REQUEST);
        let invalid = ingress.parse(b"{oops").expect_err("invalid");
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
        assert!(ingress.parse(b"{\"a\":1}").is_ok());
    }

    #[tokio::test]
    async fn sync_header_is_case_insensitive() {
        let ingress = ingress(EelConfig::default());
        let headers = BTreeMap::from([("x-sync".to_string(), "TRUE".to_string())]);
        assert!(ingress.is_sync(&headers));
        assert!(!ingress.is_sync(&BTreeMap::new()));
    }

    #[test]
    fn queue_full_maps_to_too_many_requests() {
        let err = IngressError::from(DispatchError::QueueFull {
            tenant: String::new(),
        });
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }
}
