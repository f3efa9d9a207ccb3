#![allow(clippy::result_large_err)]

pub mod app;
pub mod codec;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod dupcheck;
pub mod engine;
pub mod error;
pub mod handler;
pub mod ingress;
pub mod jdoc;
pub mod jtl;
pub mod logging;
pub mod pipeline;
pub mod publisher;
pub mod retry;
pub mod telemetry;
pub mod transform;

pub mod transport;
