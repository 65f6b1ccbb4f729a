//! Error types for the change aggregator.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
///
/// Every variant is fatal for the aggregator: once `next_batch` returns one,
/// the sequence is over.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("File system notifier failed: {details}")]
    Backend { details: String },

    #[error("Watched directory was removed: {path}")]
    RootRemoved { path: PathBuf },

    #[error("Cannot scan webroot {path}: {reason}")]
    Discovery { path: PathBuf, reason: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
