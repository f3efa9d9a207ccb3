use crate::config::EelConfig;
use crate::dispatcher::{Dispatchers, PipelineWorkHandler, WorkHandler};
use crate::engine::Engine;
use crate::error::{Context, Result};
use crate::handler::HandlerRegistry;
use crate::ingress::Ingress;
use crate::transport::{http_server, stdin, TransportKind, TransportRun};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppOptions {
    /// Read events from standard input instead of serving HTTP.
    pub stdin: bool,
}

pub struct EelApp {
    engine: Arc<Engine>,
    ingress: Arc<Ingress>,
    work_handler: Arc<dyn WorkHandler>,
    options: AppOptions,
    shutdown: CancellationToken,
}

/// How the main loop ended.
enum Exit {
    Signal,
    TransportsDone,
}

impl EelApp {
    pub fn initialise(config: EelConfig, options: AppOptions) -> Result<Self> {
        let registry = HandlerRegistry::load(&config.handler_dirs)
            .context("failed to load handler configurations")?;
        let engine = Arc::new(Engine::new(config, registry).context("failed to construct engine")?);
        let work_handler: Arc<dyn WorkHandler> = Arc::new(PipelineWorkHandler);
        let dispatchers = Arc::new(Dispatchers::new(
            Arc::clone(&engine),
            Arc::clone(&work_handler),
        ));
        let ingress = Arc::new(Ingress::new(Arc::clone(&engine), dispatchers));

        Ok(Self {
            engine,
            ingress,
            work_handler,
            options,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn ingress(&self) -> &Arc<Ingress> {
        &self.ingress
    }

    /// Re-reads the handler directories and restarts the dispatchers. The
    /// previous dispatchers finish their queued work in the background. On
    /// failure the running handlers stay in place.
    pub async fn reload(&self) -> Result<usize> {
        let dirs = self.engine.config().handler_dirs.clone();
        let registry = tokio::task::spawn_blocking(move || HandlerRegistry::load(&dirs))
            .await?
            .context("failed to reload handler configurations")?;
        let handlers = registry.len();
        self.engine.swap_registry(registry);

        let next = Arc::new(Dispatchers::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.work_handler),
        ));
        let previous = self.ingress.swap_dispatchers(next);
        tokio::spawn(async move { previous.drain().await });

        tracing::info!(target: "eel::app", event = "handlers_reloaded", handlers);
        Ok(handlers)
    }

    fn transport(&self) -> Result<TransportRun> {
        let ingress = Arc::clone(&self.ingress);
        let shutdown = self.shutdown.clone();
        if self.options.stdin {
            return Ok(TransportRun::new(TransportKind::StdinIn, async move {
                stdin::run(ingress, shutdown).await.map(|_| ())
            }));
        }

        let addr: SocketAddr = self
            .engine
            .config()
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address `{}`", self.engine.config().listen_addr))?;
        Ok(TransportRun::new(TransportKind::HttpIn, async move {
            http_server::serve(ingress, addr, shutdown).await
        }))
    }

    fn spawn_stats(&self) -> Option<JoinHandle<()>> {
        let config = self.engine.config();
        if !config.log_stats {
            return None;
        }
        let period = Duration::from_secs(config.stats_interval_sec.max(1));
        let engine = Arc::clone(&self.engine);
        let shutdown = self.shutdown.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => engine.stats().snapshot().log(),
                }
            }
        }))
    }

    pub async fn run(self) -> Result<()> {
        let run = self.transport()?;
        let stats_task = self.spawn_stats();

        let mut transport_tasks = JoinSet::new();
        let kind = run.kind();
        transport_tasks.spawn(async move {
            let result = run.wait().await;
            match &result {
                Ok(()) => tracing::info!(transport = %kind, "transport runtime stopped"),
                Err(err) => tracing::error!(
                    transport = %kind,
                    error = %err,
                    "transport runtime terminated with error"
                ),
            }
            result
        });

        tracing::info!(
            handlers = self.engine.registry().len(),
            "eel service ready; press Ctrl+C to stop"
        );

        let mut hangup = reload_signal();
        let exit = loop {
            tokio::select! {
                res = transport_tasks.join_next() => {
                    match res {
                        Some(Ok(Ok(()))) | None => break Exit::TransportsDone,
                        Some(Ok(Err(err))) => {
                            self.shutdown.cancel();
                            self.ingress.dispatchers().shutdown().await;
                            return Err(err);
                        }
                        Some(Err(join_err)) => {
                            self.shutdown.cancel();
                            self.ingress.dispatchers().shutdown().await;
                            return Err(crate::err!(
                                "transport runtime supervisor join error: {join_err}"
                            ));
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                    break Exit::Signal;
                }
                _ = next_reload(&mut hangup) => {
                    if let Err(err) = self.reload().await {
                        tracing::error!(error = %err, "handler reload failed; keeping current handlers");
                    }
                }
            }
        };

        let dispatchers = self.ingress.dispatchers();
        match exit {
            Exit::TransportsDone => dispatchers.drain().await,
            Exit::Signal => {
                self.shutdown.cancel();
                dispatchers.shutdown().await;
            }
        }
        self.shutdown.cancel();

        while let Some(res) = transport_tasks.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(join_err) => {
                    tracing::warn!(error = %join_err, "transport monitor task cancelled");
                }
            }
        }
        if let Some(task) = stats_task {
            let _ = task.await;
        }
        self.engine.stats().snapshot().log();
        Ok(())
    }
}

#[cfg(unix)]
type ReloadSignal = Option<tokio::signal::unix::Signal>;

#[cfg(unix)]
fn reload_signal() -> ReloadSignal {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::hangup()) {
        Ok(stream) => Some(stream),
        Err(err) => {
            tracing::warn!(error = %err, "SIGHUP handler unavailable; reload disabled");
            None
        }
    }
}

#[cfg(unix)]
async fn next_reload(signal: &mut ReloadSignal) {
    if let Some(stream) = signal {
        if stream.recv().await.is_some() {
            tracing::info!("reload signal received");
            return;
        }
        // Stream ended; stop polling it.
        *signal = None;
    }
    std::future::pending::<()>().await
}

#[cfg(not(unix))]
type ReloadSignal = ();

#[cfg(not(unix))]
fn reload_signal() -> ReloadSignal {}

#[cfg(not(unix))]
async fn next_reload(_: &mut ReloadSignal) {
    std::future::pending::<()>().await
}
