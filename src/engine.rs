//! The explicit process handle shared by ingress, workers and expression
//! functions: configuration, the current handler registry snapshot, the
//! duplicate checker, outbound HTTP and the stats counters.

use crate::codec::http::{build_client, HttpCaller, ReqwestCaller};
use crate::config::EelConfig;
use crate::dupcheck::DupChecker;
use crate::error::Result;
use crate::handler::HandlerRegistry;
use crate::publisher::{HttpPublisher, NullPublisher, PublisherRegistry, PublisherTransport};
use crate::retry::RetryPolicy;
use crate::telemetry::RuntimeCounters;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::runtime::{Handle, RuntimeFlavor};

pub struct Engine {
    config: Arc<EelConfig>,
    registry: RwLock<Arc<HandlerRegistry>>,
    dup_checker: DupChecker,
    http_caller: Arc<dyn HttpCaller>,
    publishers: PublisherRegistry,
    retry: RetryPolicy,
    stats: RuntimeCounters,
}

impl Engine {
    pub fn new(config: EelConfig, registry: HandlerRegistry) -> Result<Self> {
        Self::builder(config).registry(registry).build()
    }

    pub fn builder(config: EelConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            registry: None,
            http_caller: None,
            publishers: Vec::new(),
        }
    }

    pub fn config(&self) -> &EelConfig {
        &self.config
    }

    pub fn config_arc(&self) -> Arc<EelConfig> {
        Arc::clone(&self.config)
    }

    /// Current registry snapshot. Callers keep the `Arc` for the whole event
    /// so a concurrent reload never changes handlers mid-flight.
    pub fn registry(&self) -> Arc<HandlerRegistry> {
        let guard = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn swap_registry(&self, registry: HandlerRegistry) -> Arc<HandlerRegistry> {
        let fresh = Arc::new(registry);
        let mut guard = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, fresh)
    }

    pub fn dup_checker(&self) -> &DupChecker {
        &self.dup_checker
    }

    pub fn http_caller(&self) -> &Arc<dyn HttpCaller> {
        &self.http_caller
    }

    pub fn publishers(&self) -> &PublisherRegistry {
        &self.publishers
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub fn stats(&self) -> &RuntimeCounters {
        &self.stats
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("handlers", &self.registry().len())
            .field("publishers", &self.publishers)
            .finish_non_exhaustive()
    }
}

pub struct EngineBuilder {
    config: EelConfig,
    registry: Option<HandlerRegistry>,
    http_caller: Option<Arc<dyn HttpCaller>>,
    publishers: Vec<Arc<dyn PublisherTransport>>,
}

impl EngineBuilder {
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the caller used by the `curl` family of functions.
    pub fn http_caller(mut self, caller: Arc<dyn HttpCaller>) -> Self {
        self.http_caller = Some(caller);
        self
    }

    /// Registers a transport, replacing any built-in one for the same protocol.
    pub fn publisher(mut self, transport: Arc<dyn PublisherTransport>) -> Self {
        self.publishers.push(transport);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        let retry = RetryPolicy::from_config(&config);
        let client = build_client(
            config.http_timeout(),
            config.max_idle_conns_per_host,
            config.idle_connection_timeout(),
        )?;

        let http_caller = self
            .http_caller
            .unwrap_or_else(|| Arc::new(ReqwestCaller::new(client.clone(), retry)));

        let http = HttpPublisher::new(
            client,
            retry,
            config.http_transaction_header.clone(),
            config.http_tenant_header.clone(),
        )
        .with_header_timeout(config.response_header_timeout());
        let mut publishers = PublisherRegistry::new()
            .with(Arc::new(http))
            .with(Arc::new(NullPublisher));
        for transport in self.publishers {
            publishers.register(transport);
        }

        Ok(Engine {
            dup_checker: DupChecker::new(config.duplicate_ttl()),
            registry: RwLock::new(Arc::new(self.registry.unwrap_or_default())),
            config: Arc::new(config),
            http_caller,
            publishers,
            retry,
            stats: RuntimeCounters::default(),
        })
    }
}

/// Drives `future` to completion from synchronous code. Expression
/// evaluation is synchronous but `curl` and `ptransform` need async I/O.
///
/// On a multi-thread runtime the current worker is handed over with
/// `block_in_place`; on a current-thread runtime the future runs on a scoped
/// helper thread with its own runtime; outside any runtime a temporary one is
/// built. `None` means no runtime could be built.
pub fn block_on_io<F>(future: F) -> Option<F::Output>
where
    F: Future + Send,
    F::Output: Send,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            Some(tokio::task::block_in_place(|| handle.block_on(future)))
        }
        Ok(_) => std::thread::scope(|scope| {
            scope
                .spawn(|| block_on_fresh_runtime(future))
                .join()
                .ok()
                .flatten()
        }),
        Err(_) => block_on_fresh_runtime(future),
    }
}

fn block_on_fresh_runtime<F: Future>(future: F) -> Option<F::Output> {
    match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => Some(runtime.block_on(future)),
        Err(err) => {
            tracing::error!(target: "eel::engine", error = %err, "failed to build runtime");
            None
        }
    }
}
