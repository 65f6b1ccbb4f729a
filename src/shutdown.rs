//! Two-phase shutdown signal.
//!
//! The first trigger asks for a graceful drain, the second one forces the
//! process down without waiting for connections.

use tokio_util::sync::CancellationToken;

/// Where shutdown stands after a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    Draining,
    Forced,
}

/// Cloneable handle shared by everything that needs to observe shutdown.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    graceful: CancellationToken,
    force: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Escalate one step: running -> draining -> forced.
    pub fn trigger(&self) -> ShutdownPhase {
        if !self.graceful.is_cancelled() {
            self.graceful.cancel();
            ShutdownPhase::Draining
        } else {
            self.force.cancel();
            ShutdownPhase::Forced
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        if self.force.is_cancelled() {
            ShutdownPhase::Forced
        } else if self.graceful.is_cancelled() {
            ShutdownPhase::Draining
        } else {
            ShutdownPhase::Running
        }
    }

    /// Token cancelled on the first trigger.
    pub fn graceful(&self) -> &CancellationToken {
        &self.graceful
    }

    /// Token cancelled on the second trigger.
    pub fn force(&self) -> &CancellationToken {
        &self.force
    }
}

/// Forward SIGINT/SIGTERM to `shutdown` until it is forced.
///
/// Handlers are installed once, here.
#[cfg(unix)]
pub async fn listen_for_signals(shutdown: Shutdown) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        if escalate(&shutdown) {
            return Ok(());
        }
    }
}

/// Forward Ctrl+C to `shutdown` until it is forced.
#[cfg(not(unix))]
pub async fn listen_for_signals(shutdown: Shutdown) -> std::io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        if escalate(&shutdown) {
            return Ok(());
        }
    }
}

/// Returns `true` once shutdown is forced.
fn escalate(shutdown: &Shutdown) -> bool {
    match shutdown.trigger() {
        ShutdownPhase::Forced => {
            tracing::error!("[shutdown] second signal, forcing shutdown");
            true
        }
        _ => {
            tracing::error!("[shutdown] handled signal, shutting down (send again to force)");
            false
        }
    }
}
