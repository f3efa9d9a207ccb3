use crate::engine::Engine;
use crate::handler::HandlerConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Error recorded while evaluating a single event. Evaluation carries on after
/// recording; the list is surfaced in debug responses and logs.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EvalError {
    #[error("syntax error: {message}")]
    Syntax { message: String },
    #[error("runtime error: {message}")]
    Runtime { message: String },
    #[error("parse error: {message}")]
    Parse { message: String },
    #[error("network error calling `{endpoint}` (status {status}): {message}")]
    Network {
        endpoint: String,
        status: u16,
        message: String,
    },
}

impl EvalError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn network(endpoint: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Network {
            endpoint: endpoint.into(),
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Syntax { .. } => "syntax",
            EvalError::Runtime { .. } => "runtime",
            EvalError::Parse { .. } => "parse",
            EvalError::Network { .. } => "network",
        }
    }
}

/// Per-event state threaded through matching, evaluation and publishing.
///
/// A context is owned by the worker processing the event; nested dispatch
/// (`etransform`, `ptransform`) derives a child that shares the engine and
/// request metadata but starts with no handler attached.
pub struct EventContext {
    engine: Arc<Engine>,
    tenant_id: String,
    trace_id: String,
    headers: BTreeMap<String, String>,
    /// Monotonic receive time; event ages are measured from here.
    received: Instant,
    /// Wall-clock receive time, for logs and debug output only.
    received_at: DateTime<Utc>,
    debug: bool,
    handler: Option<Arc<HandlerConfig>>,
    custom_properties: JsonMap<String, JsonValue>,
    errors: Mutex<Vec<EvalError>>,
    depth: AtomicUsize,
}

impl EventContext {
    pub fn new(engine: Arc<Engine>, tenant_id: impl Into<String>) -> Self {
        Self {
            engine,
            tenant_id: tenant_id.into(),
            trace_id: Uuid::new_v4().simple().to_string(),
            headers: BTreeMap::new(),
            received: Instant::now(),
            received_at: Utc::now(),
            debug: false,
            handler: None,
            custom_properties: JsonMap::new(),
            errors: Mutex::new(Vec::new()),
            depth: AtomicUsize::new(0),
        }
    }

    /// Builds a context from request headers, picking tenant and trace id from
    /// the configured header names. Header lookups are case-insensitive.
    pub fn from_headers(engine: Arc<Engine>, headers: BTreeMap<String, String>) -> Self {
        let config = engine.config();
        let tenant = lookup_header(&headers, &config.http_tenant_header).unwrap_or_default();
        let trace = lookup_header(&headers, &config.http_transaction_header);
        let debug = lookup_header(&headers, &config.http_debug_header)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let mut context = Self::new(engine, tenant).with_headers(headers);
        if let Some(trace) = trace.filter(|value| !value.trim().is_empty()) {
            context.trace_id = trace;
        }
        context.debug = debug;
        context
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Child context for nested dispatch, inheriting the current recursion
    /// depth. Errors recorded on the child are folded back with
    /// [`EventContext::absorb`].
    pub fn derive(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            tenant_id: self.tenant_id.clone(),
            trace_id: self.trace_id.clone(),
            headers: self.headers.clone(),
            received: self.received,
            received_at: self.received_at,
            debug: self.debug,
            handler: None,
            custom_properties: JsonMap::new(),
            errors: Mutex::new(Vec::new()),
            depth: AtomicUsize::new(self.depth()),
        }
    }

    pub fn absorb(&self, child: EventContext) {
        let errors = child.take_errors();
        if let Ok(mut guard) = self.errors.lock() {
            guard.extend(errors);
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<String> {
        lookup_header(&self.headers, name)
    }

    pub fn received(&self) -> Instant {
        self.received
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Time since the event was received. Unaffected by wall-clock changes.
    pub fn age(&self) -> Duration {
        self.received.elapsed()
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn handler(&self) -> Option<&Arc<HandlerConfig>> {
        self.handler.as_ref()
    }

    pub fn handler_name(&self) -> &str {
        self.handler
            .as_ref()
            .map(|handler| handler.name.as_str())
            .unwrap_or("")
    }

    /// Attaches a handler; previously evaluated custom properties belong to the
    /// old handler and are cleared.
    pub fn set_handler(&mut self, handler: Arc<HandlerConfig>) {
        self.handler = Some(handler);
        self.custom_properties.clear();
    }

    pub fn custom_properties(&self) -> &JsonMap<String, JsonValue> {
        &self.custom_properties
    }

    pub fn set_custom_properties(&mut self, properties: JsonMap<String, JsonValue>) {
        self.custom_properties = properties;
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Enters one level of recursive evaluation. Returns `None` once the
    /// configured bound is reached; the guard leaves the level on drop.
    pub fn enter(&self) -> Option<DepthGuard<'_>> {
        let limit = self.engine.config().max_eval_depth.max(1);
        let previous = self.depth.fetch_add(1, Ordering::Relaxed);
        if previous >= limit {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            return None;
        }
        Some(DepthGuard { depth: &self.depth })
    }

    pub fn record_error(&self, error: EvalError) {
        tracing::debug!(
            target: "eel::context",
            event = "eval_error",
            tenant = %self.tenant_id,
            trace_id = %self.trace_id,
            handler = self.handler_name(),
            kind = error.kind(),
            error = %error
        );
        if let Ok(mut guard) = self.errors.lock() {
            guard.push(error);
        }
    }

    pub fn errors(&self) -> Vec<EvalError> {
        self.errors
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn take_errors(&self) -> Vec<EvalError> {
        self.errors
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }

    /// Summary attached to debug responses.
    pub fn describe(&self) -> JsonValue {
        json!({
            "tenantId": self.tenant_id,
            "traceId": self.trace_id,
            "receivedAt": self.received_at.to_rfc3339(),
            "errors": self.errors(),
        })
    }
}

pub struct DepthGuard<'a> {
    depth: &'a AtomicUsize,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
    }
}

fn lookup_header(headers: &BTreeMap<String, String>, name: &str) -> Option<String> {
    if let Some(value) = headers.get(name) {
        return Some(value.clone());
    }
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}
