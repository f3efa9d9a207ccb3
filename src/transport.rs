//! Ingress transports. Each one feeds raw events into the shared
//! [`Ingress`](crate::ingress::Ingress) until it is told to stop.

use crate::error::Result;
use futures_util::future::BoxFuture;
use std::fmt;

pub mod http_server;
pub mod stdin;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransportKind {
    HttpIn,
    StdinIn,
}

impl TransportKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            TransportKind::HttpIn => "http-in",
            TransportKind::StdinIn => "stdin-in",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A started transport; `wait` resolves once it stops.
pub struct TransportRun {
    kind: TransportKind,
    running: BoxFuture<'static, Result<()>>,
}

impl TransportRun {
    pub fn new<F>(kind: TransportKind, running: F) -> Self
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            kind,
            running: Box::pin(running),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub async fn wait(self) -> Result<()> {
        self.running.await
    }
}
