#![allow(dead_code)]

use eel::codec::http::{CurlRequest, CurlResponse, HttpCaller};
use eel::config::EelConfig;
use eel::context::{EvalError, EventContext};
use eel::engine::Engine;
use eel::handler::{HandlerConfig, HandlerRegistry};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const DEFAULT_ENDPOINT: &str = "http://default.example";

pub fn fixture_handlers_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/handlers")
}

pub fn config() -> EelConfig {
    EelConfig {
        endpoint: vec![DEFAULT_ENDPOINT.to_string()],
        ..EelConfig::default()
    }
}

pub fn handler(value: JsonValue) -> HandlerConfig {
    serde_json::from_value(value).expect("handler config")
}

pub fn registry(handlers: Vec<JsonValue>) -> HandlerRegistry {
    HandlerRegistry::from_handlers(handlers.into_iter().map(handler))
}

pub fn build_engine(handlers: Vec<JsonValue>) -> Arc<Engine> {
    build_engine_with(config(), handlers)
}

pub fn build_engine_with(config: EelConfig, handlers: Vec<JsonValue>) -> Arc<Engine> {
    Arc::new(
        Engine::builder(config)
            .registry(registry(handlers))
            .build()
            .expect("engine build"),
    )
}

pub fn context(engine: &Arc<Engine>, tenant: &str) -> EventContext {
    EventContext::new(Arc::clone(engine), tenant)
}

/// Writes `files` (relative path, handler JSON) below a fresh directory.
pub fn handler_dir(files: &[(&str, JsonValue)]) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for (relative, handler) in files {
        write_handler(dir.path(), relative, handler);
    }
    dir
}

pub fn write_handler(root: &Path, relative: &str, handler: &JsonValue) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create handler dir");
    }
    std::fs::write(&path, serde_json::to_vec_pretty(handler).expect("serialise"))
        .expect("write handler");
}

/// `HttpCaller` that records every request and answers with a fixed body.
#[derive(Default)]
pub struct RecordingCaller {
    calls: AtomicUsize,
    requests: Mutex<Vec<CurlRequest>>,
    body: Vec<u8>,
}

impl RecordingCaller {
    pub fn replying(body: &str) -> Arc<Self> {
        Arc::new(Self {
            body: body.as_bytes().to_vec(),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CurlRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl HttpCaller for RecordingCaller {
    fn call(&self, request: &CurlRequest) -> Result<CurlResponse, EvalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        Ok(CurlResponse {
            status: 200,
            body: self.body.clone(),
        })
    }
}
