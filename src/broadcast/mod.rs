//! Fan-out of tile updates to WebSocket subscribers.
//!
//! [`SubscriptionRegistry`] owns the subscribers, partitioned by dataset;
//! [`BroadcastServer`] accepts connections and registers them.

pub mod registry;
pub mod server;

pub use registry::{BroadcastScope, Payload, RegistryError, SubscriberId, SubscriptionRegistry};
pub use server::{BroadcastServer, ServerError};
