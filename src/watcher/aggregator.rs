//! Debounced change aggregator on top of `notify`.

use std::path::PathBuf;

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use super::debouncer::Debouncer;
use super::error::WatchError;
use super::source::{ChangeBatch, ChangeKind, ChangeSource};

/// Default debounce window.
pub const DEFAULT_DEBOUNCE_MS: u64 = 5_000;

/// Capacity of the notify -> tokio bridge channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Watches tile roots recursively and yields one deduplicated batch per
/// debounce window.
///
/// Cancellation ends the sequence with `Ok(None)`. Changes still waiting for
/// their window to close at that point are dropped.
pub struct ChangeAggregator {
    /// Watched roots; removal of any of them is fatal.
    roots: Vec<PathBuf>,
    /// Channel for receiving file events.
    event_rx: mpsc::Receiver<notify::Result<Event>>,
    debouncer: Debouncer,
    cancel: CancellationToken,
    /// The underlying file watcher, kept alive with the aggregator.
    _watcher: Option<notify::RecommendedWatcher>,
}

impl ChangeAggregator {
    /// Create a builder for configuring the aggregator.
    pub fn builder() -> ChangeAggregatorBuilder {
        ChangeAggregatorBuilder::new()
    }

    /// Aggregate events from an existing channel instead of a live watcher.
    ///
    /// Lets another backend (or a test) feed notify-shaped events.
    pub fn from_channel(
        roots: Vec<PathBuf>,
        event_rx: mpsc::Receiver<notify::Result<Event>>,
        debounce_ms: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            roots,
            event_rx,
            debouncer: Debouncer::new(debounce_ms),
            cancel,
            _watcher: None,
        }
    }

    /// Roots this aggregator watches.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Fold one notify event into the pending window.
    fn ingest(&mut self, event: Event) -> Result<(), WatchError> {
        if matches!(event.kind, EventKind::Remove(_)) {
            if let Some(root) = event.paths.iter().find(|p| self.roots.contains(p)) {
                return Err(WatchError::RootRemoved { path: root.clone() });
            }
        }

        // Backends that cannot tell rename sides apart (FSEvents) report
        // `Any`; whichever path still exists was moved into place.
        if let EventKind::Modify(ModifyKind::Name(mode @ (RenameMode::Any | RenameMode::Both))) =
            event.kind
        {
            let skip = if mode == RenameMode::Both { 1 } else { 0 };
            for path in event.paths.into_iter().skip(skip) {
                if path.exists() {
                    tracing::trace!("[watcher] renamed into place {}", path.display());
                    self.debouncer.record(path, ChangeKind::Created);
                }
            }
            return Ok(());
        }

        let kind = ChangeKind::from_event(&event.kind);
        if !kind.is_reported() {
            crate::debug_event!("watcher", "ignored", "{:?} {:?}", event.kind, event.paths);
            return Ok(());
        }

        for path in event.paths {
            tracing::trace!("[watcher] {} {}", kind.label(), path.display());
            self.debouncer.record(path, kind);
        }
        Ok(())
    }

    async fn pull(&mut self) -> Result<Option<ChangeBatch>, WatchError> {
        loop {
            let deadline = self.debouncer.deadline();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    let dropped = self.debouncer.discard();
                    if dropped > 0 {
                        crate::debug_event!("watcher", "cancelled", "dropping {dropped} pending changes");
                    } else {
                        crate::debug_event!("watcher", "cancelled");
                    }
                    return Ok(None);
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(batch) = self.debouncer.take_ready() {
                        crate::debug_event!("watcher", "flush", "{} changed paths", batch.len());
                        return Ok(Some(batch));
                    }
                }

                event = self.event_rx.recv() => {
                    match event {
                        Some(Ok(event)) => self.ingest(event)?,
                        Some(Err(e)) => {
                            return Err(WatchError::Backend { details: e.to_string() });
                        }
                        None => return Err(WatchError::ChannelClosed),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ChangeSource for ChangeAggregator {
    async fn next_batch(&mut self) -> Result<Option<ChangeBatch>, WatchError> {
        self.pull().await
    }
}

/// Builder for constructing a ChangeAggregator.
pub struct ChangeAggregatorBuilder {
    roots: Vec<PathBuf>,
    debounce_ms: u64,
    cancel: Option<CancellationToken>,
}

impl ChangeAggregatorBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            roots: Vec::new(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            cancel: None,
        }
    }

    /// Add a directory to watch recursively.
    pub fn root(mut self, path: PathBuf) -> Self {
        self.roots.push(path);
        self
    }

    /// Add several directories to watch recursively.
    pub fn roots(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.roots.extend(paths);
        self
    }

    /// Set the debounce window in milliseconds.
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Set the token that ends the batch sequence.
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Start the notify watcher on every root and build the aggregator.
    pub fn build(self) -> Result<ChangeAggregator, WatchError> {
        if self.roots.is_empty() {
            return Err(WatchError::InitFailed {
                reason: "At least one root is required".to_string(),
            });
        }

        let cancel = self.cancel.ok_or_else(|| WatchError::InitFailed {
            reason: "Cancellation token is required".to_string(),
        })?;

        // Create channel for events
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // notify calls back on its own thread
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;

        for root in &self.roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| WatchError::PathWatchFailed {
                    path: root.clone(),
                    reason: e.to_string(),
                })?;
            crate::debug_event!("watcher", "watching", "{}", root.display());
        }

        Ok(ChangeAggregator {
            roots: self.roots,
            event_rx: rx,
            debouncer: Debouncer::new(self.debounce_ms),
            cancel,
            _watcher: Some(watcher),
        })
    }
}

impl Default for ChangeAggregatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
