use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "config/eel";

/// Gateway configuration. Every key is optional; lowercase aliases accept the
/// keys produced by `EEL__`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EelConfig {
    #[serde(default = "default_listen_addr", alias = "listenaddr")]
    pub listen_addr: String,
    #[serde(
        default = "default_handler_dirs",
        alias = "handlerdirs",
        deserialize_with = "one_or_many"
    )]
    pub handler_dirs: Vec<String>,
    #[serde(default = "default_worker_pool_size", alias = "workerpoolsize")]
    pub worker_pool_size: BTreeMap<String, usize>,
    #[serde(default = "default_queue_depth", alias = "messagequeuedepth")]
    pub message_queue_depth: usize,
    #[serde(default = "default_queue_timeout_ms", alias = "messagequeuetimeout")]
    pub message_queue_timeout: u64,
    #[serde(default = "default_max_message_size", alias = "maxmessagesize")]
    pub max_message_size: usize,
    #[serde(default = "default_http_timeout_ms", alias = "httptimeout")]
    pub http_timeout: u64,
    #[serde(default = "default_http_timeout_ms", alias = "responseheadertimeout")]
    pub response_header_timeout: u64,
    #[serde(default = "default_max_idle_conns", alias = "maxidleconnsperhost")]
    pub max_idle_conns_per_host: usize,
    #[serde(default, alias = "closeidleconnectionintervalsec")]
    pub close_idle_connection_interval_sec: u64,
    #[serde(default, alias = "duplicatetimeout")]
    pub duplicate_timeout: u64,
    #[serde(default = "default_trace_header", alias = "httptransactionheader")]
    pub http_transaction_header: String,
    #[serde(default = "default_tenant_header", alias = "httptenantheader")]
    pub http_tenant_header: String,
    #[serde(default = "default_debug_header", alias = "httpdebugheader")]
    pub http_debug_header: String,
    #[serde(default = "default_sync_header", alias = "httpsyncheader")]
    pub http_sync_header: String,
    #[serde(default = "default_topic_path", alias = "topicpath")]
    pub topic_path: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub endpoint: Vec<String>,
    #[serde(default, alias = "customproperties")]
    pub custom_properties: JsonMap<String, JsonValue>,
    #[serde(default, alias = "logparams")]
    pub log_params: BTreeMap<String, String>,
    #[serde(default, alias = "logstats")]
    pub log_stats: bool,
    #[serde(default = "default_stats_interval", alias = "statsintervalsec")]
    pub stats_interval_sec: u64,
    #[serde(default = "default_max_attempts", alias = "maxattempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms", alias = "initialdelay")]
    pub initial_delay: u64,
    #[serde(default = "default_max_delay_ms", alias = "maxdelay")]
    pub max_delay: u64,
    #[serde(default = "default_max_eval_depth", alias = "maxevaldepth")]
    pub max_eval_depth: usize,
}

impl Default for EelConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            handler_dirs: default_handler_dirs(),
            worker_pool_size: default_worker_pool_size(),
            message_queue_depth: default_queue_depth(),
            message_queue_timeout: default_queue_timeout_ms(),
            max_message_size: default_max_message_size(),
            http_timeout: default_http_timeout_ms(),
            response_header_timeout: default_http_timeout_ms(),
            max_idle_conns_per_host: default_max_idle_conns(),
            close_idle_connection_interval_sec: 0,
            duplicate_timeout: 0,
            http_transaction_header: default_trace_header(),
            http_tenant_header: default_tenant_header(),
            http_debug_header: default_debug_header(),
            http_sync_header: default_sync_header(),
            topic_path: default_topic_path(),
            endpoint: Vec::new(),
            custom_properties: JsonMap::new(),
            log_params: BTreeMap::new(),
            log_stats: false,
            stats_interval_sec: default_stats_interval(),
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay_ms(),
            max_delay: default_max_delay_ms(),
            max_eval_depth: default_max_eval_depth(),
        }
    }
}

impl EelConfig {
    /// Loads `config/eel` (or the given file) overlaid with `EEL__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("EEL").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Pool size for the tenant, falling back to the default (empty) tenant entry.
    pub fn worker_pool_size_for(&self, tenant: &str) -> usize {
        self.worker_pool_size
            .get(tenant)
            .or_else(|| self.worker_pool_size.get(""))
            .copied()
            .unwrap_or(1)
            .max(1)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.message_queue_timeout)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout)
    }

    pub fn response_header_timeout(&self) -> Duration {
        Duration::from_millis(self.response_header_timeout)
    }

    pub fn idle_connection_timeout(&self) -> Option<Duration> {
        (self.close_idle_connection_interval_sec > 0)
            .then(|| Duration::from_secs(self.close_idle_connection_interval_sec))
    }

    pub fn duplicate_ttl(&self) -> Duration {
        Duration::from_millis(self.duplicate_timeout)
    }
}

/// Accepts either a single string or a sequence of strings.
pub fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    })
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_handler_dirs() -> Vec<String> {
    vec!["config-handlers".to_string()]
}

fn default_worker_pool_size() -> BTreeMap<String, usize> {
    BTreeMap::from([(String::new(), 100)])
}

const fn default_queue_depth() -> usize {
    1000
}

const fn default_queue_timeout_ms() -> u64 {
    1000
}

const fn default_max_message_size() -> usize {
    512_000
}

const fn default_http_timeout_ms() -> u64 {
    3000
}

const fn default_max_idle_conns() -> usize {
    100
}

fn default_trace_header() -> String {
    "X-B3-TraceId".to_string()
}

fn default_tenant_header() -> String {
    "X-TenantId".to_string()
}

fn default_debug_header() -> String {
    "X-Debug".to_string()
}

fn default_sync_header() -> String {
    "X-Sync".to_string()
}

fn default_topic_path() -> String {
    "{{/topic}}".to_string()
}

const fn default_stats_interval() -> u64 {
    300
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_delay_ms() -> u64 {
    125
}

const fn default_max_delay_ms() -> u64 {
    1000
}

const fn default_max_eval_depth() -> usize {
    16
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_to_empty_document() {
        let config: EelConfig = serde_json::from_value(json!({})).expect("empty config");
        assert_eq!(config.message_queue_depth, 1000);
        assert_eq!(config.worker_pool_size_for("any"), 100);
        assert_eq!(config.topic_path, "{{/topic}}");
        assert!(config.endpoint.is_empty());
    }

    #[test]
    fn endpoint_accepts_string_or_sequence() {
        let single: EelConfig =
            serde_json::from_value(json!({ "endpoint": "http://a" })).expect("single");
        assert_eq!(single.endpoint, vec!["http://a".to_string()]);

        let many: EelConfig =
            serde_json::from_value(json!({ "endpoint": ["http://a", "http://b"] })).expect("many");
        assert_eq!(many.endpoint.len(), 2);
    }

    #[test]
    fn tenant_pool_size_falls_back_to_default_entry() {
        let config: EelConfig = serde_json::from_value(json!({
            "workerPoolSize": { "": 4, "acme": 2 }
        }))
        .expect("pool sizes");
        assert_eq!(config.worker_pool_size_for("acme"), 2);
        assert_eq!(config.worker_pool_size_for("other"), 4);
    }
}
