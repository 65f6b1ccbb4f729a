//! Log setup for the watcher.
//!
//! Lines look like `12:04:33.517  INFO tilewatch::supervisor: [supervisor] tile changed: 'overworld': lod=3 x=1 z=-2`.
//!
//! The level filter comes from, highest priority first:
//! 1. `RUST_LOG`, used verbatim when set
//! 2. `-v` on the command line, which replaces `logging.default`
//! 3. `[logging]` in `tilewatch.toml`, where `modules` adds per-target levels
//!
//! Nothing but errors is printed by default, so a healthy watcher is silent.
//! `info` shows connections and every broadcast tile; `debug` adds ignored
//! paths, rejected selectors and per-batch counts; `trace` shows raw notify
//! events.

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Local wall-clock time, `HH:MM:SS.mmm`.
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// `default[,target=level...]`, targets sorted so the result is stable.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut overrides: Vec<String> = config
        .modules
        .iter()
        .map(|(target, level)| format!("{target}={level}"))
        .collect();
    overrides.sort();

    std::iter::once(config.default.clone())
        .chain(overrides)
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Info-level `[component] event: detail` line.
///
/// ```ignore
/// crate::log_event!("server", "client subscribed", "{id} to '{key}'");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Same shape as [`log_event!`], at debug level.
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}
