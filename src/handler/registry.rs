use super::config::HandlerConfig;
use super::topic::{candidate_levels, canonical_topic};
use super::{ConfigWarning, HandlerLoadError};
use crate::context::EventContext;
use crate::jdoc::JDoc;
use crate::jtl;
use crate::transform;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const HANDLER_EXTENSION: &str = "json";

/// Handlers indexed by tenant. Built once per load and shared read-only;
/// reloads build a fresh registry and swap it in.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    topic_index: BTreeMap<String, HashMap<String, Vec<Arc<HandlerConfig>>>>,
    custom_index: BTreeMap<String, Vec<Arc<HandlerConfig>>>,
    names: BTreeMap<String, BTreeSet<String>>,
    warnings: Vec<ConfigWarning>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` file below the given directories. The directory
    /// holding a file names its tenant; files directly inside a root directory
    /// belong to the default (empty) tenant.
    pub fn load<P: AsRef<Path>>(dirs: &[P]) -> Result<Self, HandlerLoadError> {
        let mut registry = Self::new();
        for dir in dirs {
            let root = dir.as_ref();
            if !root.is_dir() {
                return Err(HandlerLoadError::MissingDirectory {
                    path: root.to_path_buf(),
                });
            }
            let mut files = Vec::new();
            collect_handler_files(root, &mut files)?;
            files.sort();
            for file in files {
                registry.load_file(root, &file);
            }
        }

        tracing::info!(
            target: "eel::handler",
            event = "handlers_loaded",
            handlers = registry.len(),
            tenants = registry.names.len(),
            warnings = registry.warnings.len()
        );
        Ok(registry)
    }

    fn load_file(&mut self, root: &Path, file: &Path) {
        let location = file.display().to_string();
        let raw = match fs::read_to_string(file) {
            Ok(raw) => raw,
            Err(err) => {
                self.warn(&location, "", format!("unreadable handler file: {err}"));
                return;
            }
        };
        let value: JsonValue = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                self.warn(&location, "", format!("handler file is not valid JSON: {err}"));
                return;
            }
        };
        let mut handler: HandlerConfig = match serde_json::from_value(value) {
            Ok(handler) => handler,
            Err(err) => {
                self.warn(&location, "", format!("handler file does not describe a handler: {err}"));
                return;
            }
        };

        let tenant = tenant_for(root, file);
        if !handler.tenant_id.is_empty() && handler.tenant_id != tenant {
            let marker = format!("/{}/", handler.tenant_id);
            if !location.replace('\\', "/").contains(&marker) {
                self.warn(
                    &location,
                    &handler.name,
                    format!(
                        "declared tenant `{}` does not match file location; using `{tenant}`",
                        handler.tenant_id
                    ),
                );
            }
        }
        handler.tenant_id = tenant;
        if handler.name.trim().is_empty() {
            let stem = file
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.warn(&location, &stem, "handler has no name; using the file name");
            handler.name = stem;
        }
        handler.file = Some(file.to_path_buf());

        if let Err(warning) = self.register(handler) {
            self.warnings.push(warning);
        }
    }

    /// Validates and indexes one handler. Non-fatal problems are kept as
    /// warnings; an unusable handler is rejected with the returned warning.
    pub fn register(&mut self, mut handler: HandlerConfig) -> Result<(), ConfigWarning> {
        handler.normalize();
        let location = handler
            .file
            .as_ref()
            .map(|file| file.display().to_string())
            .unwrap_or_default();
        let reject = |message: String| ConfigWarning {
            path: location.clone(),
            handler: handler.name.clone(),
            message,
        };

        if !handler.active {
            tracing::debug!(
                target: "eel::handler",
                event = "handler_inactive",
                tenant = %handler.tenant_id,
                handler = %handler.name
            );
            return Ok(());
        }

        if let Some(problem) = structural_problem(&handler) {
            return Err(reject(problem));
        }

        let names = self.names.entry(handler.tenant_id.clone()).or_default();
        if names.contains(&handler.name) {
            return Err(reject(format!(
                "duplicate handler name `{}` in tenant `{}`",
                handler.name, handler.tenant_id
            )));
        }
        names.insert(handler.name.clone());

        for message in advisory_problems(&handler) {
            self.warn(&location, &handler.name, message);
        }

        let tenant = handler.tenant_id.clone();
        if handler.is_topic_handler() {
            handler.topic = canonical_topic(&handler.topic);
            let topic = handler.topic.clone();
            self.topic_index
                .entry(tenant)
                .or_default()
                .entry(topic)
                .or_default()
                .push(Arc::new(handler));
        } else if handler.match_values.is_some() {
            self.custom_index
                .entry(tenant)
                .or_default()
                .push(Arc::new(handler));
        } else {
            // Neither topic nor match: the tenant's catch-all.
            self.topic_index
                .entry(tenant)
                .or_default()
                .entry(String::new())
                .or_default()
                .push(Arc::new(handler));
        }
        Ok(())
    }

    pub fn from_handlers(handlers: impl IntoIterator<Item = HandlerConfig>) -> Self {
        let mut registry = Self::new();
        for handler in handlers {
            if let Err(warning) = registry.register(handler) {
                registry.warnings.push(warning);
            }
        }
        registry
    }

    fn warn(&mut self, path: &str, handler: &str, message: impl Into<String>) {
        let warning = ConfigWarning {
            path: path.to_string(),
            handler: handler.to_string(),
            message: message.into(),
        };
        tracing::warn!(
            target: "eel::handler",
            event = "handler_warning",
            path = %warning.path,
            handler = %warning.handler,
            message = %warning.message
        );
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }

    pub fn tenants(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every registered handler of `tenant`: topic handlers first, then
    /// custom-match handlers in declaration order.
    pub fn handlers(&self, tenant: &str) -> Vec<Arc<HandlerConfig>> {
        let mut handlers: Vec<Arc<HandlerConfig>> = self
            .topic_index
            .get(tenant)
            .map(|topics| {
                let mut keys: Vec<&String> = topics.keys().collect();
                keys.sort();
                keys.into_iter()
                    .flat_map(|key| topics[key].iter().cloned())
                    .collect()
            })
            .unwrap_or_default();
        if let Some(custom) = self.custom_index.get(tenant) {
            handlers.extend(custom.iter().cloned());
        }
        handlers
    }

    pub fn find(&self, tenant: &str, name: &str) -> Option<Arc<HandlerConfig>> {
        self.handlers(tenant)
            .into_iter()
            .find(|handler| handler.name == name)
    }

    /// Handlers selected for `event`. With an empty context tenant every
    /// registered tenant is consulted and the results concatenate.
    pub fn match_handlers(&self, event: &JDoc, ctx: &EventContext) -> Vec<Arc<HandlerConfig>> {
        if ctx.tenant_id().is_empty() {
            self.names
                .keys()
                .flat_map(|tenant| self.match_tenant(tenant, event, ctx))
                .collect()
        } else {
            self.match_tenant(ctx.tenant_id(), event, ctx)
        }
    }

    fn match_tenant(&self, tenant: &str, event: &JDoc, ctx: &EventContext) -> Vec<Arc<HandlerConfig>> {
        let mut matched: Vec<Arc<HandlerConfig>> = Vec::new();

        if let Some(topics) = self.topic_index.get(tenant) {
            let topic = jtl::evaluate_text(&ctx.engine().config().topic_path, event, ctx);
            for level in candidate_levels(&topic) {
                for candidate in level {
                    if let Some(handlers) = topics.get(&candidate) {
                        matched.extend(handlers.iter().cloned());
                    }
                }
                if matched.iter().any(|handler| handler.terminate_on_match) {
                    return matched;
                }
            }
        }

        if let Some(custom) = self.custom_index.get(tenant) {
            let mut hits: Vec<(i32, &Arc<HandlerConfig>)> = custom
                .iter()
                .filter_map(|handler| {
                    let (matches, strength) = handler.matches_expected_values(event, ctx);
                    matches.then_some((strength, handler))
                })
                .collect();
            // Stable: equal strengths keep declaration order.
            hits.sort_by(|lhs, rhs| rhs.0.cmp(&lhs.0));
            for (_, handler) in hits {
                matched.push(Arc::clone(handler));
                if handler.terminate_on_match {
                    break;
                }
            }
        }

        matched
    }
}

fn collect_handler_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), HandlerLoadError> {
    let entries = fs::read_dir(dir).map_err(|source| HandlerLoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| HandlerLoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_handler_files(&path, files)?;
        } else if path
            .extension()
            .is_some_and(|extension| extension == HANDLER_EXTENSION)
        {
            files.push(path);
        }
    }
    Ok(())
}

fn tenant_for(root: &Path, file: &Path) -> String {
    match file.parent() {
        Some(parent) if parent != root => parent
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// Problems that make a handler unusable.
fn structural_problem(handler: &HandlerConfig) -> Option<String> {
    if let Some(transformation) = &handler.transformation {
        if !handler.transformation_by_example && !transformation.is_object() {
            return Some("by-path transformation must be a mapping".to_string());
        }
    }
    if let Some(expected) = &handler.match_values {
        if !handler.match_by_example && !expected.is_object() {
            return Some("match must be a mapping of path expressions to values".to_string());
        }
    }
    if let Some(filter) = &handler.filter {
        if !handler.filter_by_example && !filter.is_object() {
            return Some("filter must be a mapping of path expressions to values".to_string());
        }
    }
    for (index, filter) in handler.filters.iter().enumerate() {
        if !filter.filter_by_example && !filter.filter.is_object() {
            return Some(format!(
                "filters[{index}] must be a mapping of path expressions to values"
            ));
        }
    }
    None
}

/// Problems worth reporting that leave the handler usable.
fn advisory_problems(handler: &HandlerConfig) -> Vec<String> {
    let mut problems = Vec::new();
    if handler.version.trim().is_empty() {
        problems.push("handler has no version".to_string());
    }
    if handler.is_topic_handler() && handler.match_values.is_some() {
        problems.push("handler declares both topic and match; topic takes precedence".to_string());
    }

    if let Some(transformation) = &handler.transformation {
        if handler.transformation_by_example {
            problems.extend(transform::validate_template(transformation));
        } else {
            problems.extend(transform::validate_by_path(transformation));
        }
    }
    for (name, named) in &handler.named_transformations {
        let found = if named.transformation_by_example {
            transform::validate_template(&named.transformation)
        } else {
            transform::validate_by_path(&named.transformation)
        };
        problems.extend(
            found
                .into_iter()
                .map(|problem| format!("named transformation `{name}`: {problem}")),
        );
    }
    if let Some(JsonValue::Object(entries)) = &handler.match_values {
        if !handler.match_by_example {
            problems.extend(invalid_expressions(entries.keys().map(String::as_str)));
        }
    }

    let expressions = handler
        .filter_if_true
        .iter()
        .chain(&handler.filter_if_false)
        .chain(&handler.path)
        .chain(&handler.endpoint)
        .chain(handler.http_headers.values())
        .map(String::as_str);
    problems.extend(invalid_expressions(expressions));
    problems.extend(transform::validate_template(&JsonValue::Object(
        handler.custom_properties.clone(),
    )));
    problems
}

fn invalid_expressions<'a>(expressions: impl Iterator<Item = &'a str>) -> Vec<String> {
    expressions
        .filter_map(|expression| {
            jtl::validate(expression)
                .err()
                .map(|err| format!("invalid expression `{expression}`: {err}"))
        })
        .collect()
}
