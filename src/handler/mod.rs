//! Handler definitions, their on-disk loading and event matching.

pub mod config;
pub mod registry;
pub mod topic;

pub use config::{expected_values_match, FilterConfig, HandlerConfig, NamedTransformation};
pub use registry::HandlerRegistry;

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerLoadError {
    #[error("handler directory `{path}` does not exist")]
    MissingDirectory { path: PathBuf },
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Non-fatal problem found while loading handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigWarning {
    pub path: String,
    pub handler: String,
    pub message: String,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.path.is_empty(), self.handler.is_empty()) {
            (false, false) => write!(f, "{} ({}): {}", self.path, self.handler, self.message),
            (false, true) => write!(f, "{}: {}", self.path, self.message),
            (true, false) => write!(f, "{}: {}", self.handler, self.message),
            (true, true) => f.write_str(&self.message),
        }
    }
}
