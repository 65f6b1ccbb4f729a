//! Debounced tile change detection.
//!
//! # Architecture
//!
//! ```text
//! notify::RecommendedWatcher (one per aggregator, recursive per root)
//!   - callback thread -> bounded mpsc
//!         |
//! ChangeAggregator
//!   - filters created/modified
//!   - Debouncer: one window, one deduplicated batch
//!         |
//! ChangeSource::next_batch()  (pulled by the supervisor)
//! ```

mod aggregator;
mod debouncer;
mod error;
mod source;
mod targets;

pub use aggregator::{ChangeAggregator, ChangeAggregatorBuilder, DEFAULT_DEBOUNCE_MS};
pub use debouncer::Debouncer;
pub use error::WatchError;
pub use source::{ChangeBatch, ChangeKind, ChangeSource, RawChange};
pub use targets::{WatchTarget, discover_targets};
