#[path = "common/mod.rs"]
mod common;

use eel::engine::Engine;
use eel::jdoc::JDoc;
use eel::jtl;
use serde_json::json;
use std::sync::Arc;

fn engine_with(caller: &Arc<common::RecordingCaller>) -> Arc<Engine> {
    Arc::new(
        Engine::builder(common::config())
            .http_caller(Arc::clone(caller) as Arc<dyn eel::codec::http::HttpCaller>)
            .build()
            .expect("engine"),
    )
}

#[test]
fn untaken_ifte_branch_never_calls_out() {
    let caller = common::RecordingCaller::replying(r#"{"remote":true}"#);
    let engine = engine_with(&caller);
    let ctx = common::context(&engine, "");
    let doc = JDoc::from_value(json!({}));

    let value = jtl::evaluate(
        "{{ifte('false','{{curl('GET','http://remote.example/a')}}','x')}}",
        &doc,
        &ctx,
    );
    assert_eq!(value, json!("x"));
    assert_eq!(caller.calls(), 0);

    let value = jtl::evaluate(
        "{{ifte('true','x','{{curl('GET','http://remote.example/b')}}')}}",
        &doc,
        &ctx,
    );
    assert_eq!(value, json!("x"));
    assert_eq!(caller.calls(), 0);
}

#[test]
fn taken_ifte_branch_calls_once() {
    let caller = common::RecordingCaller::replying(r#"{"remote":true}"#);
    let engine = engine_with(&caller);
    let ctx = common::context(&engine, "acme").with_trace_id("trace-9");

    jtl::evaluate(
        "{{ifte('true','{{curl('GET','http://remote.example/c')}}','x')}}",
        &JDoc::from_value(json!({})),
        &ctx,
    );

    assert_eq!(caller.calls(), 1);
    let request = &caller.requests()[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.url, "http://remote.example/c");
    let config = engine.config();
    assert_eq!(
        request.headers.get(&config.http_transaction_header).map(String::as_str),
        Some("trace-9")
    );
    assert_eq!(
        request.headers.get(&config.http_tenant_header).map(String::as_str),
        Some("acme")
    );
}

#[test]
fn alt_and_case_stop_at_the_chosen_argument() {
    let caller = common::RecordingCaller::replying("ignored");
    let engine = engine_with(&caller);
    let ctx = common::context(&engine, "");
    let doc = JDoc::from_value(json!({ "k": "b" }));

    let value = jtl::evaluate(
        "{{alt('{{/missing}}','first','{{curl('GET','http://remote.example/d')}}')}}",
        &doc,
        &ctx,
    );
    assert_eq!(value, json!("first"));

    let value = jtl::evaluate(
        "{{case('{{/k}}','a','{{curl('GET','http://remote.example/e')}}','{{/k}}','b','matched','fallback')}}",
        &doc,
        &ctx,
    );
    assert_eq!(value, json!("matched"));
    assert_eq!(caller.calls(), 0);
}
