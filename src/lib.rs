//! Watches a map renderer's webroot and pushes changed tile coordinates to
//! WebSocket subscribers, one partition per dataset.

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod logging;
pub mod shutdown;
pub mod supervisor;
pub mod tile;
pub mod watcher;

pub use broadcast::{BroadcastScope, BroadcastServer, SubscriptionRegistry};
pub use config::Settings;
pub use shutdown::{Shutdown, ShutdownPhase};
pub use supervisor::{Supervisor, SupervisorError, SupervisorState};
pub use tile::{TileCoordinate, TileUpdate};
pub use watcher::{ChangeAggregator, ChangeSource, WatchError};
