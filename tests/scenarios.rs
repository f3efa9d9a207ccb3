#[path = "common/mod.rs"]
mod common;

use eel::handler::HandlerRegistry;
use eel::jdoc::JDoc;
use eel::jtl;
use eel::pipeline;
use serde_json::json;
use std::sync::Arc;

fn matched_names(engine: &Arc<eel::engine::Engine>, tenant: &str, event: serde_json::Value) -> Vec<String> {
    let ctx = common::context(engine, tenant);
    engine
        .registry()
        .match_handlers(&JDoc::from_value(event), &ctx)
        .iter()
        .map(|handler| handler.name.clone())
        .collect()
}

#[test]
fn canonicalize_with_identity_transformation() {
    let engine = common::build_engine(vec![json!({
        "name": "default",
        "version": "1.0",
        "transformation": { "{{/}}": "{{/}}" }
    })]);
    let mut ctx = common::context(&engine, "");
    let event = JDoc::from_value(json!({ "foo": "bar" }));

    let publishers = pipeline::process_event(&mut ctx, &event);

    assert_eq!(publishers.len(), 1);
    let publisher = &publishers[0];
    assert_eq!(publisher.endpoint, common::DEFAULT_ENDPOINT);
    assert_eq!(publisher.verb, "POST");
    assert_eq!(publisher.payload_parsed, json!({ "foo": "bar" }));
    assert!(JDoc::from_str(&publisher.payload).expect("payload json").equals(&event));
    assert_eq!(ctx.error_count(), 0);
}

#[test]
fn transform_by_example() {
    let engine = common::build_engine(vec![json!({
        "name": "example",
        "version": "1.0",
        "transformation": { "event": "{{/m}}" },
        "transformationByExample": true
    })]);
    let mut ctx = common::context(&engine, "");

    let publishers = pipeline::process_event(&mut ctx, &JDoc::from_value(json!({ "m": "hi" })));

    assert_eq!(publishers.len(), 1);
    assert_eq!(publishers[0].payload_parsed, json!({ "event": "hi" }));
}

#[test]
fn boolean_conditional() {
    let engine = common::build_engine(Vec::new());
    let ctx = common::context(&engine, "");
    let doc = JDoc::from_value(json!({ "a": 1, "b": 2 }));

    let value = jtl::evaluate("{{ifte('{{equals('{{/a}}','1')}}','yes','no')}}", &doc, &ctx);
    assert_eq!(value, json!("yes"));
    let value = jtl::evaluate("{{ifte('{{equals('{{/b}}','1')}}','yes','no')}}", &doc, &ctx);
    assert_eq!(value, json!("no"));
}

#[test]
fn topic_wildcard_matches_inner_segment() {
    let engine = common::build_engine(vec![json!({
        "name": "wild",
        "version": "1.0",
        "topic": "/x/*/z"
    })]);

    assert_eq!(matched_names(&engine, "", json!({ "topic": "/x/y/z" })), vec!["wild"]);
    assert!(matched_names(&engine, "", json!({ "topic": "/x/z" })).is_empty());
}

#[test]
fn short_topic_matches_exact_pattern_only() {
    let engine = common::build_engine(vec![
        json!({ "name": "exact", "version": "1.0", "topic": "/x/z" }),
        json!({ "name": "wild", "version": "1.0", "topic": "/x/*/z" }),
    ]);

    assert_eq!(matched_names(&engine, "", json!({ "topic": "/x/z" })), vec!["exact"]);
}

#[test]
fn parent_topics_match_unless_terminated() {
    let engine = common::build_engine(vec![
        json!({ "name": "leaf", "version": "1.0", "topic": "/a/b/c" }),
        json!({ "name": "parent", "version": "1.0", "topic": "/a/b" }),
        json!({ "name": "stop", "version": "1.0", "topic": "/q/r", "terminateOnMatch": true }),
        json!({ "name": "above", "version": "1.0", "topic": "/q" }),
    ]);

    assert_eq!(
        matched_names(&engine, "", json!({ "topic": "/a/b/c" })),
        vec!["leaf", "parent"]
    );
    assert_eq!(matched_names(&engine, "", json!({ "topic": "/q/r/s" })), vec!["stop"]);
}

#[test]
fn fan_out_produces_one_publisher_per_endpoint_and_path() {
    let engine = common::build_engine(vec![json!({
        "name": "fan",
        "version": "1.0",
        "endpoint": ["http://a", "http://b"],
        "path": ["/1", "/2"]
    })]);
    let mut ctx = common::context(&engine, "");

    let mut urls: Vec<String> = pipeline::process_event(&mut ctx, &JDoc::from_value(json!({ "k": 1 })))
        .iter()
        .map(|publisher| publisher.url())
        .collect();
    urls.sort();

    assert_eq!(urls, vec!["http://a/1", "http://a/2", "http://b/1", "http://b/2"]);
}

#[test]
fn filter_drops_event_before_transformation() {
    let engine = common::build_engine(vec![json!({
        "name": "filtered",
        "version": "1.0",
        "filter": { "a": 1, "b": "two" },
        "filterByExample": true,
        "transformation": { "{{/}}": "{{nosuchfunction()}}" }
    })]);
    let mut ctx = common::context(&engine, "");

    let publishers =
        pipeline::process_event(&mut ctx, &JDoc::from_value(json!({ "a": 1, "b": "two" })));

    assert!(publishers.is_empty());
    assert_eq!(ctx.error_count(), 0, "transformation must not run: {:?}", ctx.errors());
    assert_eq!(engine.stats().snapshot().filtered, 1);
}

#[test]
fn custom_matches_rank_by_strength_then_declaration() {
    let engine = common::build_engine(vec![
        json!({ "name": "weak", "version": "1", "match": { "{{/kind}}": "order" } }),
        json!({
            "name": "strong",
            "version": "1",
            "match": { "{{/kind}}": "order", "{{/region}}": "eu" }
        }),
        json!({ "name": "weak_too", "version": "1", "match": { "{{/region}}": "eu" } }),
        json!({ "name": "miss", "version": "1", "match": { "{{/kind}}": "refund" } }),
    ]);
    let event = json!({ "kind": "order", "region": "eu" });

    let first = matched_names(&engine, "", event.clone());
    assert_eq!(first, vec!["strong", "weak", "weak_too"]);
    for _ in 0..10 {
        assert_eq!(matched_names(&engine, "", event.clone()), first);
    }
}

#[test]
fn sequence_match_needs_a_common_element() {
    let engine = common::build_engine(vec![json!({
        "name": "tags",
        "version": "1",
        "match": { "{{/tags}}": ["red", "blue"] }
    })]);

    assert_eq!(
        matched_names(&engine, "", json!({ "tags": ["green", "blue"] })),
        vec!["tags"]
    );
    assert!(matched_names(&engine, "", json!({ "tags": ["green"] })).is_empty());
}

#[test]
fn fixture_tenants_route_independently() {
    let registry = HandlerRegistry::load(&[common::fixture_handlers_dir()]).expect("fixtures");
    let engine = Arc::new(
        eel::engine::Engine::builder(common::config())
            .registry(registry)
            .build()
            .expect("engine"),
    );
    let order = json!({
        "topic": "/orders/eu/created",
        "kind": "audit",
        "order": { "id": "o-1", "region": "eu", "total": 12 }
    });

    assert_eq!(matched_names(&engine, "acme", order.clone()), vec!["orders"]);
    assert_eq!(matched_names(&engine, "globex", order.clone()), vec!["catchall"]);
    assert_eq!(
        matched_names(&engine, "", order.clone()),
        vec!["orders", "catchall"],
        "an empty tenant routes across every tenant"
    );

    let mut ctx = common::context(&engine, "acme");
    let publishers = pipeline::process_event(&mut ctx, &JDoc::from_value(order));
    assert_eq!(publishers.len(), 1);
    assert_eq!(publishers[0].url(), "http://orders.acme.example/v1/orders");
    assert_eq!(publishers[0].headers.get("X-Order-Id").map(String::as_str), Some("o-1"));
    assert_eq!(
        publishers[0].payload_parsed,
        json!({ "id": "o-1", "region": "eu", "total": 12 })
    );
}

#[test]
fn audit_fixture_fans_out_with_tenant_stamp() {
    let registry = HandlerRegistry::load(&[common::fixture_handlers_dir()]).expect("fixtures");
    let engine = Arc::new(
        eel::engine::Engine::builder(common::config())
            .registry(registry)
            .build()
            .expect("engine"),
    );
    let mut ctx = common::context(&engine, "acme");

    let publishers =
        pipeline::process_event(&mut ctx, &JDoc::from_value(json!({ "kind": "audit", "n": 1 })));

    assert_eq!(publishers.len(), 2);
    for publisher in &publishers {
        assert_eq!(
            publisher.payload_parsed,
            json!({ "kind": "audit", "n": 1, "tenant": "acme" })
        );
    }
}
