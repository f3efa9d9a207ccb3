use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self as stdfmt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "eel";

pub fn init_tracing() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("eel=info,info"));

    let stdout = std::io::stdout;
    let stderr = std::io::stderr;

    let writer = stdout
        .with_max_level(tracing::Level::INFO)
        .or_else(stderr.with_min_level(tracing::Level::WARN));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(false)
        .with_ansi(false)
        .event_format(KeyValueFormatter)
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

/// Fields promoted to the front of every line, in this order, so tenant
/// routing can be followed with plain `grep`.
const LEADING_FIELDS: [&str; 4] = ["event", "tenant", "handler", "trace"];

/// Writes one `key=value` line per event.
struct KeyValueFormatter;

impl<S, N> FormatEvent<S, N> for KeyValueFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let metadata = event.metadata();
        let mut fields = EventFields::default();
        event.record(&mut fields);

        let mut line = LogLine::default();
        line.push("ts", &Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        line.push("level", metadata.level().as_str());
        line.push("service", SERVICE_NAME);
        line.push("component", metadata.target());
        line.push("pid", &std::process::id().to_string());
        if let Some(span) = ctx.lookup_current() {
            let path: Vec<&str> = span.scope().from_root().map(|s| s.name()).collect();
            line.push("span", &path.join("."));
        }
        line.push("msg", fields.message.as_deref().unwrap_or(metadata.name()));

        for key in LEADING_FIELDS {
            if let Some(value) = fields.values.remove(key) {
                line.push(key, &value);
            }
        }
        for (key, value) in &fields.values {
            line.push(key, value);
        }

        writer.write_str(&line.0)?;
        writer.write_char('\n')
    }
}

#[derive(Default)]
struct LogLine(String);

impl LogLine {
    fn push(&mut self, key: &str, value: &str) {
        if !self.0.is_empty() {
            self.0.push(' ');
        }
        self.0.push_str(key);
        self.0.push('=');
        quote_into(&mut self.0, value);
    }
}

/// Collected event fields; `message` is kept apart, the rest sort by name.
#[derive(Default)]
struct EventFields {
    message: Option<String>,
    values: BTreeMap<&'static str, String>,
}

impl EventFields {
    fn insert(&mut self, field: &Field, value: String) {
        match field.name() {
            "" => {}
            "message" => self.message = Some(value),
            name => {
                self.values.insert(name, value);
            }
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.to_string());
    }
}

/// Process counters owned by the engine; updated with relaxed atomic adds.
#[derive(Default)]
pub struct RuntimeCounters {
    received: AtomicU64,
    duplicates: AtomicU64,
    queue_full: AtomicU64,
    processed: AtomicU64,
    no_match: AtomicU64,
    filtered: AtomicU64,
    eval_errors: AtomicU64,
    publish_success: AtomicU64,
    publish_failure: AtomicU64,
    endpoint_outcomes: Mutex<HashMap<String, EndpointOutcome>>,
}

#[derive(Default)]
struct EndpointOutcome {
    success: u64,
    failure: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeCountersSnapshot {
    pub received: u64,
    pub duplicates: u64,
    pub queue_full: u64,
    pub processed: u64,
    pub no_match: u64,
    pub filtered: u64,
    pub eval_errors: u64,
    pub publish_success: u64,
    pub publish_failure: u64,
    pub endpoints: Vec<EndpointOutcomeSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointOutcomeSnapshot {
    pub endpoint: String,
    pub success: u64,
    pub failure: u64,
}

impl RuntimeCounters {
    pub fn inc_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_no_match(&self) {
        self.no_match.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_eval_errors(&self, count: usize) {
        self.eval_errors.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_publish_success(&self, endpoint: &str) {
        self.publish_success.fetch_add(1, Ordering::Relaxed);
        let mut outcomes = self
            .endpoint_outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        outcomes.entry(endpoint.to_string()).or_default().success += 1;
    }

    pub fn record_publish_failure(&self, endpoint: &str) {
        self.publish_failure.fetch_add(1, Ordering::Relaxed);
        let mut outcomes = self
            .endpoint_outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        outcomes.entry(endpoint.to_string()).or_default().failure += 1;
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        let mut endpoints: Vec<EndpointOutcomeSnapshot> = self
            .endpoint_outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(endpoint, outcome)| EndpointOutcomeSnapshot {
                endpoint: endpoint.clone(),
                success: outcome.success,
                failure: outcome.failure,
            })
            .collect();
        endpoints.sort_by(|lhs, rhs| lhs.endpoint.cmp(&rhs.endpoint));

        RuntimeCountersSnapshot {
            received: self.received.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            no_match: self.no_match.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            eval_errors: self.eval_errors.load(Ordering::Relaxed),
            publish_success: self.publish_success.load(Ordering::Relaxed),
            publish_failure: self.publish_failure.load(Ordering::Relaxed),
            endpoints,
        }
    }
}

impl RuntimeCountersSnapshot {
    pub fn log(&self) {
        tracing::info!(
            target: "eel::stats",
            event = "stats",
            received = self.received,
            duplicates = self.duplicates,
            queue_full = self.queue_full,
            processed = self.processed,
            no_match = self.no_match,
            filtered = self.filtered,
            eval_errors = self.eval_errors,
            publish_success = self.publish_success,
            publish_failure = self.publish_failure,
            "periodic stats"
        );
    }
}

/// Appends `value`, quoting it when it would not survive a whitespace split.
fn quote_into(out: &mut String, value: &str) {
    let bare = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '='));
    if bare {
        out.push_str(value);
        return;
    }
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
}
