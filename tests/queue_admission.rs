#[path = "common/mod.rs"]
mod common;

use async_trait::async_trait;
use bytes::Bytes;
use eel::config::EelConfig;
use eel::context::EventContext;
use eel::dispatcher::{DispatchError, Dispatcher, Dispatchers, WorkHandler, WorkItem};
use eel::ingress::{Admission, Ingress, IngressError};
use eel::jdoc::JDoc;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Holds every item until released.
struct Gate {
    started: AtomicUsize,
    release: CancellationToken,
}

#[async_trait]
impl WorkHandler for Gate {
    async fn handle(&self, _item: WorkItem) {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.release.cancelled().await;
    }
}

#[derive(Default)]
struct Counting(AtomicUsize);

#[async_trait]
impl WorkHandler for Counting {
    async fn handle(&self, _item: WorkItem) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn work_item(engine: &Arc<eel::engine::Engine>, n: usize) -> WorkItem {
    let raw = format!("{{\"n\":{n}}}");
    WorkItem {
        event: JDoc::from_str(&raw).expect("event"),
        raw: Bytes::from(raw),
        ctx: EventContext::new(Arc::clone(engine), "t"),
    }
}

async fn wait_for(counter: &AtomicUsize, expected: usize) {
    for _ in 0..200 {
        if counter.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn admits_queue_depth_plus_workers_then_rejects() {
    const QUEUE_DEPTH: usize = 3;
    const WORKERS: usize = 2;

    let engine = common::build_engine(Vec::new());
    let gate = Arc::new(Gate {
        started: AtomicUsize::new(0),
        release: CancellationToken::new(),
    });
    let dispatcher = Dispatcher::start(
        "t",
        QUEUE_DEPTH,
        WORKERS,
        Duration::from_millis(200),
        Arc::clone(&gate) as Arc<dyn WorkHandler>,
        CancellationToken::new(),
    );

    for n in 0..QUEUE_DEPTH + WORKERS {
        dispatcher
            .enqueue(work_item(&engine, n))
            .await
            .unwrap_or_else(|err| panic!("item {n} should be admitted: {err}"));
    }
    wait_for(&gate.started, WORKERS).await;
    assert_eq!(gate.started.load(Ordering::SeqCst), WORKERS);

    let rejected = dispatcher.enqueue(work_item(&engine, 99)).await;
    assert!(matches!(rejected, Err(DispatchError::QueueFull { .. })));

    dispatcher.stop();
    gate.release.cancel();
    dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drain_finishes_queued_work() {
    let engine = common::build_engine(Vec::new());
    let counting = Arc::new(Counting::default());
    let dispatcher = Dispatcher::start(
        "t",
        8,
        1,
        Duration::from_millis(200),
        Arc::clone(&counting) as Arc<dyn WorkHandler>,
        CancellationToken::new(),
    );
    for n in 0..5 {
        dispatcher.enqueue(work_item(&engine, n)).await.expect("admitted");
    }

    dispatcher.drain().await;

    assert_eq!(counting.0.load(Ordering::SeqCst), 5);
    assert!(matches!(
        dispatcher.enqueue(work_item(&engine, 6)).await,
        Err(DispatchError::Stopped { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_bodies_dispatch_once_within_ttl() {
    let config = EelConfig {
        duplicate_timeout: 150,
        ..common::config()
    };
    let engine = common::build_engine_with(config, Vec::new());
    let counting = Arc::new(Counting::default());
    let dispatchers = Arc::new(Dispatchers::new(
        Arc::clone(&engine),
        Arc::clone(&counting) as Arc<dyn WorkHandler>,
    ));
    let ingress = Ingress::new(Arc::clone(&engine), Arc::clone(&dispatchers));
    let body = Bytes::from_static(br#"{"order":1}"#);

    let first = ingress.admit(body.clone(), BTreeMap::new()).await.expect("first");
    let second = ingress.admit(body.clone(), BTreeMap::new()).await.expect("second");
    assert_eq!(first, Admission::Queued);
    assert_eq!(second, Admission::Duplicate);
    wait_for(&counting.0, 1).await;
    assert_eq!(counting.0.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let third = ingress.admit(body, BTreeMap::new()).await.expect("third");
    assert_eq!(third, Admission::Queued);
    wait_for(&counting.0, 2).await;
    assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    assert_eq!(engine.stats().snapshot().duplicates, 1);

    dispatchers.drain().await;
}

#[tokio::test]
async fn invalid_bodies_never_reach_a_dispatcher() {
    let engine = common::build_engine(Vec::new());
    let counting = Arc::new(Counting::default());
    let dispatchers = Arc::new(Dispatchers::new(
        Arc::clone(&engine),
        Arc::clone(&counting) as Arc<dyn WorkHandler>,
    ));
    let ingress = Ingress::new(engine, Arc::clone(&dispatchers));

    let err = ingress
        .admit(Bytes::from_static(b"{broken"), BTreeMap::new())
        .await
        .expect_err("invalid json");
    assert!(matches!(err, IngressError::InvalidJson(_)));
    dispatchers.drain().await;
    assert_eq!(counting.0.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatchers_cover_configured_and_declaring_tenants() {
    let config = EelConfig {
        worker_pool_size: BTreeMap::from([(String::new(), 2), ("globex".to_string(), 1)]),
        ..common::config()
    };
    let engine = common::build_engine_with(
        config,
        vec![json!({ "tenantId": "acme", "name": "orders", "version": "1.0", "topic": "orders" })],
    );
    let dispatchers = Dispatchers::new(engine, Arc::new(Counting::default()));

    assert_eq!(dispatchers.tenants(), vec!["", "acme", "globex"]);
    let acme = dispatchers.for_tenant("acme").expect("acme dispatcher");
    assert_eq!(acme.tenant(), "acme");
    dispatchers.drain().await;
    assert!(dispatchers.for_tenant("acme").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_tenant_headers_share_the_default_dispatcher() {
    let engine = common::build_engine(vec![json!({
        "tenantId": "acme",
        "name": "orders",
        "version": "1.0",
        "topic": "orders"
    })]);
    let counting = Arc::new(Counting::default());
    let dispatchers = Arc::new(Dispatchers::new(
        Arc::clone(&engine),
        Arc::clone(&counting) as Arc<dyn WorkHandler>,
    ));
    let ingress = Ingress::new(engine, Arc::clone(&dispatchers));
    let before = dispatchers.tenants();
    assert_eq!(before, vec!["", "acme"]);

    for n in 0..50 {
        let headers = BTreeMap::from([("X-TenantId".to_string(), format!("stranger-{n}"))]);
        let body = json!({ "n": n }).to_string();
        let admitted = ingress.admit(Bytes::from(body), headers).await.expect("admitted");
        assert_eq!(admitted, Admission::Queued);
    }
    let headers = BTreeMap::from([("X-TenantId".to_string(), "acme".to_string())]);
    ingress
        .admit(Bytes::from(json!({ "n": "acme" }).to_string()), headers)
        .await
        .expect("admitted");

    assert_eq!(dispatchers.tenants(), before);
    let fallback = dispatchers.for_tenant("stranger-0").expect("default dispatcher");
    assert_eq!(fallback.tenant(), "");
    wait_for(&counting.0, 51).await;
    assert_eq!(counting.0.load(Ordering::SeqCst), 51);
    dispatchers.drain().await;
}
