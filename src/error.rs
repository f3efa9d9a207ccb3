//! Crate-level error for startup, reload and transport plumbing.
//!
//! Per-event problems never travel through this type; they are recorded as
//! [`EvalError`](crate::context::EvalError)s on the event context and the
//! event carries on.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("handler load error: {0}")]
    HandlerLoad(#[from] crate::handler::HandlerLoadError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] crate::dispatcher::DispatchError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid socket address: {0}")]
    Addr(#[from] std::net::AddrParseError),
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn msg<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::Message(message.into())
    }

    /// The innermost error below any layers of context.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// `anyhow`-style context for crate results.
pub trait Context<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    Error: From<E>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.map_err(|err| Error::Context {
            context: context.into(),
            source: Box::new(err.into()),
        })
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|err| Error::Context {
            context: f().into(),
            source: Box::new(err.into()),
        })
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Message(value)
    }
}

/// Formats an [`Error::Message`].
#[macro_export]
macro_rules! err {
    ($($arg:tt)+) => {
        $crate::error::Error::msg(format!($($arg)+))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn context_wraps_and_keeps_the_source() {
        let parsed: std::result::Result<std::net::SocketAddr, _> = "not-an-addr".parse();
        let err = parsed.context("invalid listen address").expect_err("parse fails");

        assert_eq!(err.to_string(), "invalid listen address");
        assert!(err.source().is_some());
        assert!(matches!(err.root_cause(), Error::Addr(_)));
    }

    #[test]
    fn err_macro_formats_messages() {
        let err = crate::err!("queue `{}` is gone", "acme");
        assert_eq!(err.to_string(), "queue `acme` is gone");
    }
}
