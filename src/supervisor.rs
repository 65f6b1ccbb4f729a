//! Wires discovery, the change aggregator, and the broadcast server together.
//!
//! ```text
//! Initializing -> Running -> Draining -> Stopped
//! ```
//!
//! `initialize` does everything that can fail because of configuration, so a
//! bad webroot or port never gets as far as `Running`. `run` pulls batches
//! until shutdown or a fatal error, then drains the server.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::broadcast::{
    BroadcastScope, BroadcastServer, Payload, ServerError, SubscriptionRegistry,
};
use crate::config::Settings;
use crate::shutdown::Shutdown;
use crate::tile::{self, PathMatch};
use crate::watcher::{
    ChangeAggregator, ChangeBatch, ChangeSource, WatchError, WatchTarget, discover_targets,
};

/// How often draining checks whether every connection has closed.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Lifecycle of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("No webroot configured")]
    MissingWebroot,

    #[error("Cannot resolve webroot {path}: {source}")]
    Webroot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No tile folders to watch found below {webroot}")]
    NoWatchTargets { webroot: PathBuf },

    #[error("Cannot start watcher: {0}")]
    WatchSetup(#[source] WatchError),

    #[error("Cannot start server: {0}")]
    Bind(#[source] ServerError),

    #[error("Watcher failed: {0}")]
    Watch(#[source] WatchError),

    #[error("Server failed: {0}")]
    Server(#[source] ServerError),

    #[error("Server task ended unexpectedly: {0}")]
    ServerTask(String),

    #[error("Shutdown was forced before connections drained")]
    Forced,
}

impl SupervisorError {
    /// Process exit code for this error.
    ///
    /// 2 for configuration/initialization problems, 1 for runtime failures,
    /// 130 for a forced shutdown.
    pub fn exit_code(&self) -> u8 {
        match self {
            SupervisorError::MissingWebroot
            | SupervisorError::Webroot { .. }
            | SupervisorError::NoWatchTargets { .. }
            | SupervisorError::WatchSetup(_)
            | SupervisorError::Bind(_) => 2,
            SupervisorError::Watch(_)
            | SupervisorError::Server(_)
            | SupervisorError::ServerTask(_) => 1,
            SupervisorError::Forced => 130,
        }
    }
}

/// Owns every long-lived component between startup and exit.
pub struct Supervisor {
    webroot: PathBuf,
    targets: Vec<WatchTarget>,
    registry: Arc<SubscriptionRegistry>,
    server: BroadcastServer,
    source: Box<dyn ChangeSource>,
    shutdown: Shutdown,
    drain_timeout: Duration,
    state: watch::Sender<SupervisorState>,
}

impl Supervisor {
    /// Resolve the webroot, discover datasets, bind the server and start
    /// watching.
    pub async fn initialize(
        settings: &Settings,
        shutdown: Shutdown,
    ) -> Result<Self, SupervisorError> {
        crate::debug_event!("supervisor", "initializing");

        let configured = settings
            .webroot
            .as_ref()
            .ok_or(SupervisorError::MissingWebroot)?;
        let webroot = configured
            .canonicalize()
            .map_err(|source| SupervisorError::Webroot {
                path: configured.clone(),
                source,
            })?;
        crate::log_event!("supervisor", "watching webroot", "{}", webroot.display());

        let targets = discover_targets(&webroot).map_err(SupervisorError::WatchSetup)?;
        if targets.is_empty() {
            return Err(SupervisorError::NoWatchTargets { webroot });
        }
        crate::debug_event!(
            "supervisor",
            "found tile directories",
            "{:?}",
            targets.iter().map(|t| t.path.display().to_string()).collect::<Vec<_>>()
        );

        let registry = Arc::new(
            SubscriptionRegistry::new(
                settings.server.scope,
                targets.iter().map(|t| t.dataset.clone()),
            )
            .with_send_timeout(settings.send_timeout()),
        );

        let server = BroadcastServer::bind(
            &settings.server.bind,
            settings.server.port,
            registry.clone(),
            shutdown.graceful().clone(),
            settings.server.subscriber_buffer,
        )
        .await
        .map_err(SupervisorError::Bind)?;

        let aggregator = ChangeAggregator::builder()
            .roots(targets.iter().map(|t| t.path.clone()))
            .debounce_ms(settings.watch.debounce_ms)
            .cancel(shutdown.graceful().clone())
            .build()
            .map_err(SupervisorError::WatchSetup)?;

        Ok(Self::from_parts(
            webroot,
            targets,
            registry,
            server,
            Box::new(aggregator),
            shutdown,
            settings.drain_timeout(),
        ))
    }

    fn from_parts(
        webroot: PathBuf,
        targets: Vec<WatchTarget>,
        registry: Arc<SubscriptionRegistry>,
        server: BroadcastServer,
        source: Box<dyn ChangeSource>,
        shutdown: Shutdown,
        drain_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Initializing);
        Self {
            webroot,
            targets,
            registry,
            server,
            source,
            shutdown,
            drain_timeout,
            state,
        }
    }

    /// Address the broadcast server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.server.local_addr()
    }

    pub fn webroot(&self) -> &Path {
        &self.webroot
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }

    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        self.registry.clone()
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Run until shutdown or a fatal error, then drain.
    pub async fn run(self) -> Result<(), SupervisorError> {
        let Supervisor {
            webroot,
            targets,
            registry,
            server,
            mut source,
            shutdown,
            drain_timeout,
            state,
        } = self;

        state.send_replace(SupervisorState::Running);
        crate::log_event!("supervisor", "running", "{} datasets", targets.len());

        let mut server_task = tokio::spawn(server.run());
        let mut server_done = false;
        let mut outcome = Ok(());

        loop {
            tokio::select! {
                batch = source.next_batch() => match batch {
                    Ok(Some(batch)) => dispatch_batch(&webroot, &registry, batch).await,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("[supervisor] watcher failed: {e}");
                        outcome = Err(SupervisorError::Watch(e));
                        break;
                    }
                },

                joined = &mut server_task, if !server_done => {
                    server_done = true;
                    match joined {
                        Ok(Ok(())) if shutdown.graceful().is_cancelled() => break,
                        Ok(Ok(())) => {
                            outcome = Err(SupervisorError::ServerTask("server stopped".to_string()));
                        }
                        Ok(Err(e)) => outcome = Err(SupervisorError::Server(e)),
                        Err(e) => outcome = Err(SupervisorError::ServerTask(e.to_string())),
                    }
                    if let Err(e) = &outcome {
                        tracing::error!("[supervisor] {e}");
                    }
                    break;
                }
            }
        }

        state.send_replace(SupervisorState::Draining);
        crate::log_event!("supervisor", "draining");
        // Stop accepting batches and connections even when no signal arrived
        shutdown.graceful().cancel();
        drop(source);

        let abort = server_task.abort_handle();
        let drain = async {
            let joined = if server_done {
                None
            } else {
                Some(server_task.await)
            };
            while registry.total_subscribers() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
            joined
        };

        tokio::select! {
            joined = drain => match joined {
                Some(Ok(Err(e))) if outcome.is_ok() => outcome = Err(SupervisorError::Server(e)),
                Some(Err(e)) if outcome.is_ok() && !e.is_cancelled() => {
                    outcome = Err(SupervisorError::ServerTask(e.to_string()));
                }
                _ => {}
            },
            _ = shutdown.force().cancelled() => {
                abort.abort();
                tracing::warn!("[supervisor] forced shutdown");
                if outcome.is_ok() {
                    outcome = Err(SupervisorError::Forced);
                }
            }
            _ = tokio::time::sleep(drain_timeout) => {
                abort.abort();
                tracing::warn!("[supervisor] drain timed out after {drain_timeout:?}, closing anyway");
            }
        }

        state.send_replace(SupervisorState::Stopped);
        crate::log_event!("supervisor", "stopped");
        outcome
    }
}

/// Extract every change of a batch and broadcast the tiles that matched.
///
/// Broadcasts run one after another, so a partition sees tiles in batch order
/// and a burst is paced by its subscribers' queues.
async fn dispatch_batch(webroot: &Path, registry: &SubscriptionRegistry, batch: ChangeBatch) {
    let with_dataset = registry.scope() == BroadcastScope::Unscoped;

    for change in batch {
        let Ok(relative) = change.path.strip_prefix(webroot) else {
            crate::debug_event!("supervisor", "outside webroot", "{}", change.path.display());
            continue;
        };
        crate::debug_event!(
            "supervisor",
            "detected change",
            "{} ({})",
            relative.display(),
            change.kind.label()
        );

        match tile::extract(relative) {
            PathMatch::Matched(coord) => {
                crate::log_event!("supervisor", "tile changed", "{coord}");
                match coord.to_update(with_dataset).to_json() {
                    Ok(json) => {
                        registry.broadcast(&coord.dataset, Payload::from(json)).await;
                    }
                    Err(e) => tracing::error!("[supervisor] cannot serialize {coord}: {e}"),
                }
            }
            PathMatch::Unmatched(reason) => {
                crate::debug_event!(
                    "supervisor",
                    "failed to extract tile",
                    "'{}': {reason}",
                    relative.display()
                );
            }
        }
    }
}
