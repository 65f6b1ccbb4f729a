//! Window debouncing for tile change events.
//!
//! Renderers write many tiles in bursts. Instead of reporting each write, the
//! debouncer opens a window on the first unflushed change and hands out every
//! distinct path seen until the window closes as one batch.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use super::{ChangeBatch, ChangeKind, RawChange};

/// Collects changes into a batch that becomes ready one window after the
/// first change was recorded.
#[derive(Debug)]
pub struct Debouncer {
    /// Pending changes: path -> first kind observed in this window.
    pending: BTreeMap<PathBuf, ChangeKind>,
    /// When the current window opened, if any change is pending.
    window_start: Option<Instant>,
    /// Window length.
    duration: Duration,
}

impl Debouncer {
    /// Create a new debouncer with the given window in milliseconds.
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            pending: BTreeMap::new(),
            window_start: None,
            duration: Duration::from_millis(debounce_ms),
        }
    }

    /// Record a change. Opens the window if nothing is pending.
    ///
    /// A path already pending keeps its first kind, so a create followed by
    /// writes is reported once, as created.
    pub fn record(&mut self, path: PathBuf, kind: ChangeKind) {
        if self.window_start.is_none() {
            self.window_start = Some(Instant::now());
        }
        self.pending.entry(path).or_insert(kind);
    }

    /// When the pending batch becomes ready, if anything is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.window_start.map(|start| start + self.duration)
    }

    /// Take the pending batch if its window has closed.
    pub fn take_ready(&mut self) -> Option<ChangeBatch> {
        let deadline = self.deadline()?;
        if Instant::now() < deadline {
            return None;
        }
        self.window_start = None;
        let changes = std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(path, kind)| RawChange { path, kind })
            .collect();
        Some(ChangeBatch { changes })
    }

    /// Drop everything pending, returning how many paths were discarded.
    pub fn discard(&mut self) -> usize {
        self.window_start = None;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Check if there are any pending changes.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Get the number of pending changes.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
