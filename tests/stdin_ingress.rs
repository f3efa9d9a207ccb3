#[path = "common/mod.rs"]
mod common;

use async_trait::async_trait;
use eel::dispatcher::{Dispatchers, WorkHandler, WorkItem};
use eel::ingress::Ingress;
use eel::transport::stdin::{run_reader, StdinSummary};
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Collect(Mutex<Vec<JsonValue>>);

#[async_trait]
impl WorkHandler for Collect {
    async fn handle(&self, item: WorkItem) {
        self.0
            .lock()
            .expect("collect lock")
            .push(item.event.root().clone());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn each_line_is_one_event_with_continuations() {
    let engine = common::build_engine(Vec::new());
    let collected = Arc::new(Collect::default());
    let dispatchers = Arc::new(Dispatchers::new(
        Arc::clone(&engine),
        Arc::clone(&collected) as Arc<dyn WorkHandler>,
    ));
    let ingress = Arc::new(Ingress::new(engine, Arc::clone(&dispatchers)));

    let input: &[u8] = b"{\"n\":1}\n\n{\"n\":\\\n2}\nnot json\n   \n{\"n\":3}";
    let summary = run_reader(ingress, input, CancellationToken::new())
        .await
        .expect("stdin run");
    dispatchers.drain().await;

    assert_eq!(
        summary,
        StdinSummary {
            admitted: 3,
            rejected: 1
        }
    );
    let mut events = collected.0.lock().expect("collect lock").clone();
    events.sort_by_key(|event| event["n"].as_i64());
    assert_eq!(events, vec![json!({ "n": 1 }), json!({ "n": 2 }), json!({ "n": 3 })]);
}

#[tokio::test]
async fn cancelled_reader_stops_immediately() {
    let engine = common::build_engine(Vec::new());
    let dispatchers = Arc::new(Dispatchers::new(
        Arc::clone(&engine),
        Arc::new(Collect::default()),
    ));
    let ingress = Arc::new(Ingress::new(engine, dispatchers));
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let (_writer, reader) = tokio::io::duplex(64);
    let summary = run_reader(ingress, tokio::io::BufReader::new(reader), shutdown)
        .await
        .expect("stdin run");

    assert_eq!(summary, StdinSummary::default());
}
