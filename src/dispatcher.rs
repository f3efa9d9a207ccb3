//! Per-tenant work queues and worker pools.
//!
//! Each tenant gets a bounded queue and a fixed set of workers. Idle workers
//! advertise readiness on an auxiliary channel; the dispatch loop only takes
//! an item off the queue once a worker is ready, so a tenant holds at most
//! `queue depth + workers` events at any time.

use crate::context::EventContext;
use crate::eel_event;
use crate::engine::Engine;
use crate::jdoc::JDoc;
use crate::pipeline::{self, SendOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TARGET: &str = "eel::dispatcher";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("work queue for tenant `{tenant}` is full")]
    QueueFull { tenant: String },
    #[error("dispatcher for tenant `{tenant}` is stopped")]
    Stopped { tenant: String },
}

/// An admitted event on its way to a worker.
pub struct WorkItem {
    pub event: JDoc,
    pub raw: Bytes,
    pub ctx: EventContext,
}

#[async_trait]
pub trait WorkHandler: Send + Sync + 'static {
    async fn handle(&self, item: WorkItem);
}

/// Runs the pipeline on a blocking thread, then sends the publishers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineWorkHandler;

#[async_trait]
impl WorkHandler for PipelineWorkHandler {
    async fn handle(&self, item: WorkItem) {
        let tenant = item.ctx.tenant_id().to_string();
        let outcomes = run_work_item(item).await;
        if let Err(err) = outcomes {
            eel_event!(error, TARGET, "worker_failed", tenant = tenant.as_str(), error = err);
        }
    }
}

/// Processes one work item end to end and returns the send outcomes.
pub async fn run_work_item(item: WorkItem) -> crate::error::Result<Vec<SendOutcome>> {
    let WorkItem { event, mut ctx, .. } = item;
    let (ctx, publishers) = tokio::task::spawn_blocking(move || {
        let publishers = pipeline::process_event(&mut ctx, &event);
        (ctx, publishers)
    })
    .await?;

    let outcomes = pipeline::send_publishers(&ctx, publishers).await;
    let stats = ctx.engine().stats();
    stats.inc_processed();
    let errors = ctx.take_errors();
    stats.add_eval_errors(errors.len());
    for error in &errors {
        eel_event!(
            debug,
            TARGET,
            "eval_error",
            tenant = ctx.tenant_id(),
            trace = ctx.trace_id(),
            error = error
        );
    }
    Ok(outcomes)
}

type ReadySlot = oneshot::Sender<WorkItem>;

/// Queue plus worker pool for one tenant.
pub struct Dispatcher {
    tenant: String,
    queue: Mutex<Option<mpsc::Sender<WorkItem>>>,
    admission_timeout: Duration,
    quit: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawns the dispatch loop and `workers` workers on the current runtime.
    pub fn start(
        tenant: impl Into<String>,
        queue_depth: usize,
        workers: usize,
        admission_timeout: Duration,
        handler: Arc<dyn WorkHandler>,
        quit: CancellationToken,
    ) -> Self {
        let tenant = tenant.into();
        let workers = workers.max(1);
        let (queue, queue_rx) = mpsc::channel(queue_depth.max(1));
        let (ready_tx, ready_rx) = mpsc::channel::<ReadySlot>(workers);

        let mut tasks = Vec::with_capacity(workers + 1);
        tasks.push(tokio::spawn(dispatch_loop(
            tenant.clone(),
            queue_rx,
            ready_rx,
            quit.clone(),
        )));
        for index in 0..workers {
            tasks.push(tokio::spawn(worker_loop(
                index,
                ready_tx.clone(),
                Arc::clone(&handler),
                quit.clone(),
            )));
        }

        tracing::info!(
            target: TARGET,
            event = "dispatcher_started",
            tenant = %tenant,
            workers,
            queue_depth
        );
        Self {
            tenant,
            queue: Mutex::new(Some(queue)),
            admission_timeout,
            quit,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Queues `item`, waiting up to the admission timeout for space.
    pub async fn enqueue(&self, item: WorkItem) -> Result<(), DispatchError> {
        let queue = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|_| !self.quit.is_cancelled());
        let Some(queue) = queue else {
            return Err(DispatchError::Stopped {
                tenant: self.tenant.clone(),
            });
        };
        match queue.send_timeout(item, self.admission_timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(DispatchError::QueueFull {
                tenant: self.tenant.clone(),
            }),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(DispatchError::Stopped {
                tenant: self.tenant.clone(),
            }),
        }
    }

    /// Signals quit; workers finish the item they hold and exit.
    pub fn stop(&self) {
        self.quit.cancel();
    }

    /// Stops and waits for the dispatch loop and every worker to exit.
    pub async fn shutdown(&self) {
        self.stop();
        self.join().await;
    }

    /// Refuses new work, lets every queued item finish, then waits for the
    /// workers to exit.
    pub async fn drain(&self) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.join().await;
    }

    async fn join(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn dispatch_loop(
    tenant: String,
    mut queue: mpsc::Receiver<WorkItem>,
    mut ready: mpsc::Receiver<ReadySlot>,
    quit: CancellationToken,
) {
    loop {
        let slot = tokio::select! {
            _ = quit.cancelled() => break,
            slot = ready.recv() => match slot {
                Some(slot) => slot,
                None => break,
            },
        };
        let item = tokio::select! {
            _ = quit.cancelled() => break,
            item = queue.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        if slot.send(item).is_err() {
            tracing::warn!(
                target: TARGET,
                event = "worker_gone",
                tenant = %tenant,
                "dropping work item for a worker that exited"
            );
        }
    }
    tracing::debug!(target: TARGET, event = "dispatcher_stopped", tenant = %tenant);
}

async fn worker_loop(
    index: usize,
    ready: mpsc::Sender<ReadySlot>,
    handler: Arc<dyn WorkHandler>,
    quit: CancellationToken,
) {
    loop {
        let (slot, assigned) = oneshot::channel();
        if ready.send(slot).await.is_err() {
            break;
        }
        let item = tokio::select! {
            _ = quit.cancelled() => break,
            item = assigned => match item {
                Ok(item) => item,
                Err(_) => break,
            },
        };
        handler.handle(item).await;
    }
    tracing::trace!(target: TARGET, event = "worker_stopped", worker = index);
}

/// One dispatcher per known tenant, started up front.
///
/// Known tenants are those with a `workerPoolSize` entry, those that declare
/// handlers, and the default tenant `""`. Events whose tenant header names
/// anything else are queued on the default dispatcher, so header values never
/// start new workers.
pub struct Dispatchers {
    quit: CancellationToken,
    by_tenant: Mutex<HashMap<String, Arc<Dispatcher>>>,
}

impl Dispatchers {
    /// Starts the dispatchers on the current runtime.
    pub fn new(engine: Arc<Engine>, handler: Arc<dyn WorkHandler>) -> Self {
        let quit = CancellationToken::new();
        let config = engine.config();
        let mut tenants: BTreeSet<String> = config.worker_pool_size.keys().cloned().collect();
        tenants.extend(engine.registry().tenants().map(str::to_string));
        tenants.insert(String::new());

        let by_tenant = tenants
            .into_iter()
            .map(|tenant| {
                let dispatcher = Dispatcher::start(
                    tenant.as_str(),
                    config.message_queue_depth,
                    config.worker_pool_size_for(&tenant),
                    config.queue_timeout(),
                    Arc::clone(&handler),
                    quit.child_token(),
                );
                (tenant, Arc::new(dispatcher))
            })
            .collect();

        Self {
            quit,
            by_tenant: Mutex::new(by_tenant),
        }
    }

    /// The tenant's dispatcher, or the default one for unknown tenants.
    /// `None` once the set has been drained or shut down.
    pub fn for_tenant(&self, tenant: &str) -> Option<Arc<Dispatcher>> {
        let by_tenant = self
            .by_tenant
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        by_tenant
            .get(tenant)
            .or_else(|| by_tenant.get(""))
            .map(Arc::clone)
    }

    pub async fn enqueue(&self, item: WorkItem) -> Result<(), DispatchError> {
        let Some(dispatcher) = self.for_tenant(item.ctx.tenant_id()) else {
            return Err(DispatchError::Stopped {
                tenant: item.ctx.tenant_id().to_string(),
            });
        };
        dispatcher.enqueue(item).await
    }

    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self
            .by_tenant
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        tenants.sort();
        tenants
    }

    pub fn stop(&self) {
        self.quit.cancel();
    }

    pub async fn shutdown(&self) {
        self.stop();
        for dispatcher in self.take_all() {
            dispatcher.shutdown().await;
        }
    }

    /// Drains every tenant's queue; admission fails with `Stopped` afterwards.
    pub async fn drain(&self) {
        for dispatcher in self.take_all() {
            dispatcher.drain().await;
        }
        self.stop();
    }

    fn take_all(&self) -> Vec<Arc<Dispatcher>> {
        self.by_tenant
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, dispatcher)| dispatcher)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EelConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl WorkHandler for Counting {
        async fn handle(&self, _item: WorkItem) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn item(engine: &Arc<Engine>) -> WorkItem {
        WorkItem {
            event: JDoc::from_value(serde_json::json!({ "a": 1 })),
            raw: Bytes::from_static(b"{\"a\":1}"),
            ctx: EventContext::new(Arc::clone(engine), ""),
        }
    }

    #[tokio::test]
    async fn every_admitted_item_reaches_a_worker() {
        let engine = Arc::new(Engine::builder(EelConfig::default()).build().expect("engine"));
        let handled = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::start(
            "t",
            4,
            2,
            Duration::from_millis(500),
            Arc::new(Counting(Arc::clone(&handled))),
            CancellationToken::new(),
        );

        for _ in 0..10 {
            dispatcher.enqueue(item(&engine)).await.expect("admitted");
        }
        for _ in 0..100 {
            if handled.load(Ordering::SeqCst) == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handled.load(Ordering::SeqCst), 10);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn stopped_dispatcher_rejects_work() {
        let engine = Arc::new(Engine::builder(EelConfig::default()).build().expect("engine"));
        let dispatcher = Dispatcher::start(
            "t",
            1,
            1,
            Duration::from_millis(50),
            Arc::new(Counting(Arc::new(AtomicUsize::new(0)))),
            CancellationToken::new(),
        );
        dispatcher.shutdown().await;
        assert!(matches!(
            dispatcher.enqueue(item(&engine)).await,
            Err(DispatchError::Stopped { .. })
        ));
    }
}
