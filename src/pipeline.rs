//! Per-event processing: handler selection, filtering, custom properties,
//! transformation and fan-out into publishers, then the parallel send.

use crate::context::EventContext;
use crate::eel_event;
use crate::handler::{expected_values_match, HandlerConfig};
use crate::jdoc::{self, JDoc};
use crate::jtl;
use crate::publisher::Publisher;
use crate::transform;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;

const TARGET: &str = "eel::pipeline";

/// Matches `event` against the current registry and runs every selected
/// handler, concatenating their publishers.
pub fn process_event(ctx: &mut EventContext, event: &JDoc) -> Vec<Publisher> {
    let registry = ctx.engine().registry();
    let handlers = registry.match_handlers(event, ctx);
    if handlers.is_empty() {
        ctx.engine().stats().inc_no_match();
        eel_event!(
            debug,
            TARGET,
            "no_match",
            tenant = ctx.tenant_id(),
            trace = ctx.trace_id()
        );
        return Vec::new();
    }

    let mut publishers = Vec::new();
    for handler in &handlers {
        publishers.extend(process_handler(ctx, event, handler));
    }
    publishers
}

/// Runs one handler against `event`. Failures are recorded on `ctx` and
/// produce no publishers for this handler only.
pub fn process_handler(
    ctx: &mut EventContext,
    event: &JDoc,
    handler: &Arc<HandlerConfig>,
) -> Vec<Publisher> {
    ctx.set_handler(Arc::clone(handler));
    eel_event!(
        debug,
        TARGET,
        "handler_matched",
        tenant = ctx.tenant_id(),
        handler = handler.name.as_str(),
        trace = ctx.trace_id(),
        params = log_params(&ctx.engine().config().log_params, event, ctx)
    );

    if let Some(reason) = filter_hit(handler, FilterStage::BeforeTransformation, event, ctx) {
        record_filtered(ctx, handler, &reason);
        return Vec::new();
    }

    let properties = evaluate_custom_properties(handler, event, ctx);
    ctx.set_custom_properties(properties);

    let headers: BTreeMap<String, String> = handler
        .http_headers
        .iter()
        .map(|(name, expression)| (name.clone(), jtl::evaluate_text(expression, event, ctx)))
        .collect();

    let mut paths: Vec<String> = handler
        .path
        .iter()
        .map(|expression| jtl::evaluate_text(expression, event, ctx))
        .collect();
    if paths.is_empty() {
        paths.push(String::new());
    }

    let endpoint_sources = if handler.endpoint.is_empty() {
        &ctx.engine().config().endpoint
    } else {
        &handler.endpoint
    };
    let endpoints: Vec<String> = endpoint_sources
        .iter()
        .map(|expression| jtl::evaluate_text(expression, event, ctx))
        .filter(|endpoint| !endpoint.trim().is_empty())
        .collect();
    if endpoints.is_empty() {
        ctx.record_error(crate::context::EvalError::runtime(format!(
            "handler `{}` has no endpoint",
            handler.name
        )));
        return Vec::new();
    }

    let payload = match &handler.transformation {
        Some(template) => {
            match transform::apply(template, handler.transformation_by_example, event, ctx) {
                Some(payload) => payload,
                None => return Vec::new(),
            }
        }
        None => event.root().clone(),
    };

    let transformed = JDoc::from_value(payload);
    if let Some(reason) = filter_hit(handler, FilterStage::AfterTransformation, &transformed, ctx) {
        record_filtered(ctx, handler, &reason);
        return Vec::new();
    }

    let payload_parsed = transformed.into_root();
    let payload = match &payload_parsed {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    };

    let mut publishers = Vec::with_capacity(endpoints.len() * paths.len());
    for endpoint in &endpoints {
        for path in &paths {
            publishers.push(Publisher {
                endpoint: endpoint.clone(),
                path: path.clone(),
                verb: handler.verb.clone(),
                protocol: handler.protocol.clone(),
                headers: headers.clone(),
                auth_info: handler.auth_info.clone(),
                payload: payload.clone(),
                payload_parsed: payload_parsed.clone(),
                debug: ctx.is_debug(),
                tenant_id: ctx.tenant_id().to_string(),
                trace_id: ctx.trace_id().to_string(),
                handler: handler.name.clone(),
            });
        }
    }
    publishers
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterStage {
    BeforeTransformation,
    AfterTransformation,
}

impl FilterStage {
    fn includes(self, after_transformation: bool) -> bool {
        match self {
            FilterStage::BeforeTransformation => !after_transformation,
            FilterStage::AfterTransformation => after_transformation,
        }
    }
}

/// First filter of `stage` that drops the event, as a description. The
/// handler's own flag places the boolean filters and the primary filter;
/// each entry of the filter list carries its own flag.
fn filter_hit(
    handler: &HandlerConfig,
    stage: FilterStage,
    doc: &JDoc,
    ctx: &EventContext,
) -> Option<String> {
    if stage.includes(handler.filter_after_transformation) {
        for expression in &handler.filter_if_true {
            if jtl::is_truthy(&jtl::evaluate(expression, doc, ctx)) {
                return Some(format!("filterIfTrue `{expression}`"));
            }
        }
        for expression in &handler.filter_if_false {
            if !jtl::is_truthy(&jtl::evaluate(expression, doc, ctx)) {
                return Some(format!("filterIfFalse `{expression}`"));
            }
        }
        if let Some(filter) = &handler.filter {
            if pattern_hit(filter, handler.filter_by_example, handler.filter_inverted, doc, ctx) {
                return Some("filter".to_string());
            }
        }
    }

    for (index, entry) in handler.filters.iter().enumerate() {
        if !stage.includes(entry.filter_after_transformation) {
            continue;
        }
        if pattern_hit(&entry.filter, entry.filter_by_example, entry.filter_inverted, doc, ctx) {
            if !entry.log_params.is_empty() {
                eel_event!(
                    info,
                    TARGET,
                    "filter_log",
                    tenant = ctx.tenant_id(),
                    handler = handler.name.as_str(),
                    trace = ctx.trace_id(),
                    params = log_params(&entry.log_params, doc, ctx)
                );
            }
            return Some(format!("filters[{index}]"));
        }
    }
    None
}

fn pattern_hit(
    filter: &JsonValue,
    by_example: bool,
    inverted: bool,
    doc: &JDoc,
    ctx: &EventContext,
) -> bool {
    let (matched, _) = expected_values_match(filter, by_example, doc, ctx);
    matched != inverted
}

fn record_filtered(ctx: &EventContext, handler: &HandlerConfig, reason: &str) {
    ctx.engine().stats().inc_filtered();
    eel_event!(
        debug,
        TARGET,
        "event_filtered",
        tenant = ctx.tenant_id(),
        handler = handler.name.as_str(),
        trace = ctx.trace_id(),
        reason = reason
    );
}

fn evaluate_custom_properties(
    handler: &HandlerConfig,
    event: &JDoc,
    ctx: &EventContext,
) -> JsonMap<String, JsonValue> {
    handler
        .custom_properties
        .iter()
        .map(|(name, value)| {
            let evaluated = match value {
                JsonValue::String(expression) => jtl::evaluate(expression, event, ctx),
                other => transform::by_example(other, event, ctx),
            };
            (name.clone(), evaluated)
        })
        .collect()
}

/// Evaluates configured log parameters into a compact `k=v` list.
fn log_params(params: &BTreeMap<String, String>, doc: &JDoc, ctx: &EventContext) -> String {
    params
        .iter()
        .map(|(name, expression)| {
            format!("{name}={}", jdoc::to_text(&jtl::evaluate(expression, doc, ctx)))
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SendStatus {
    Sent,
    Duplicate,
    Failed,
}

/// Outcome of one publisher send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub handler: String,
    pub url: String,
    pub status: SendStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sends every publisher concurrently. Identical `url\npayload` pairs seen
/// within the duplicate window are suppressed; a failing send never cancels
/// the others.
pub async fn send_publishers(ctx: &EventContext, publishers: Vec<Publisher>) -> Vec<SendOutcome> {
    let engine = ctx.engine();
    let sends = publishers.into_iter().map(|publisher| async move {
        let url = publisher.url();
        if engine
            .dup_checker()
            .is_duplicate(publisher.fingerprint().as_bytes())
        {
            engine.stats().inc_duplicates();
            eel_event!(
                debug,
                TARGET,
                "duplicate_dropped",
                tenant = ctx.tenant_id(),
                handler = publisher.handler.as_str(),
                url = url
            );
            return SendOutcome {
                handler: publisher.handler,
                url,
                status: SendStatus::Duplicate,
                response: None,
                error: None,
            };
        }

        match engine.publishers().send(&publisher).await {
            Ok(response) => {
                engine.stats().record_publish_success(&publisher.endpoint);
                eel_event!(
                    debug,
                    TARGET,
                    "publisher_sent",
                    tenant = ctx.tenant_id(),
                    handler = publisher.handler.as_str(),
                    trace = ctx.trace_id(),
                    url = url,
                    age_ms = ctx.age().as_millis()
                );
                SendOutcome {
                    handler: publisher.handler,
                    url,
                    status: SendStatus::Sent,
                    response: Some(response),
                    error: None,
                }
            }
            Err(err) => {
                engine.stats().record_publish_failure(&publisher.endpoint);
                eel_event!(
                    warn,
                    TARGET,
                    "publisher_failed",
                    tenant = ctx.tenant_id(),
                    handler = publisher.handler.as_str(),
                    trace = ctx.trace_id(),
                    url = url,
                    error = err
                );
                ctx.record_error(err.to_eval_error(&url));
                SendOutcome {
                    handler: publisher.handler,
                    url,
                    status: SendStatus::Failed,
                    response: None,
                    error: Some(err.to_string()),
                }
            }
        }
    });
    join_all(sends).await
}
