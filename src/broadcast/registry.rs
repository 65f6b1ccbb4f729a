//! Subscriber bookkeeping and fan-out.
//!
//! Each partition (dataset key) owns its own lock, so broadcasts to different
//! datasets never wait on each other. Each connection reads from a bounded
//! queue. A broadcast waits for room in every queue of its partition, up to
//! the send timeout, so a burst only slows dispatch down. A subscriber whose
//! queue stays full past the timeout, or whose connection is gone, is dropped
//! from its partition.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// Serialized frame shared by every subscriber of a broadcast.
pub type Payload = Arc<str>;

/// How long a broadcast waits on one full queue before dropping it.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Partition key used for the single partition of unscoped mode.
const UNSCOPED_KEY: &str = "";

/// How subscribers are grouped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastScope {
    /// One partition per dataset; subscribers pick one by path.
    #[default]
    Partitioned,
    /// One implicit partition; every subscriber gets every event.
    Unscoped,
}

/// Handle for one registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown partition: '{0}'")]
    UnknownPartition(String),
}

#[derive(Debug, Default)]
struct Partition {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Payload>>>,
}

/// Live subscribers grouped by dataset key.
///
/// The set of partitions is fixed at construction; only their members change.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    scope: BroadcastScope,
    partitions: HashMap<String, Partition>,
    next_id: AtomicU64,
    send_timeout: Duration,
}

impl SubscriptionRegistry {
    /// Create a registry for the given datasets.
    ///
    /// In unscoped mode the dataset keys are ignored and a single partition
    /// is used.
    pub fn new(scope: BroadcastScope, datasets: impl IntoIterator<Item = String>) -> Self {
        let partitions = match scope {
            BroadcastScope::Partitioned => datasets
                .into_iter()
                .map(|key| (key, Partition::default()))
                .collect(),
            BroadcastScope::Unscoped => {
                HashMap::from([(UNSCOPED_KEY.to_string(), Partition::default())])
            }
        };

        Self {
            scope,
            partitions,
            next_id: AtomicU64::new(1),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Override how long a subscriber's queue may stay full.
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn scope(&self) -> BroadcastScope {
        self.scope
    }

    fn partition(&self, key: &str) -> Option<&Partition> {
        match self.scope {
            BroadcastScope::Partitioned => self.partitions.get(key),
            BroadcastScope::Unscoped => self.partitions.get(UNSCOPED_KEY),
        }
    }

    /// Whether a subscription to `key` would be accepted.
    pub fn accepts(&self, key: &str) -> bool {
        match self.scope {
            BroadcastScope::Partitioned => !key.is_empty() && self.partitions.contains_key(key),
            BroadcastScope::Unscoped => true,
        }
    }

    /// Register a subscriber's queue under `key`.
    pub fn subscribe(
        &self,
        key: &str,
        sender: mpsc::Sender<Payload>,
    ) -> Result<SubscriberId, RegistryError> {
        if !self.accepts(key) {
            return Err(RegistryError::UnknownPartition(key.to_string()));
        }
        let partition = self
            .partition(key)
            .ok_or_else(|| RegistryError::UnknownPartition(key.to_string()))?;

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        partition.subscribers.lock().insert(id, sender);
        crate::debug_event!("registry", "subscribed", "{id} to '{key}'");
        Ok(id)
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, key: &str, id: SubscriberId) -> bool {
        let removed = self
            .partition(key)
            .is_some_and(|partition| partition.subscribers.lock().remove(&id).is_some());
        if removed {
            crate::debug_event!("registry", "unsubscribed", "{id} from '{key}'");
        }
        removed
    }

    /// Queue `payload` for every subscriber of `key`.
    ///
    /// Waits for room in each queue, all subscribers concurrently. Returns how
    /// many subscribers it was queued for. A subscriber whose queue stays full
    /// for the send timeout, or is closed, is removed; its connection sees the
    /// closed queue and shuts down.
    pub async fn broadcast(&self, key: &str, payload: Payload) -> usize {
        let Some(partition) = self.partition(key) else {
            crate::debug_event!("registry", "no partition", "'{key}'");
            return 0;
        };

        // Snapshot so the lock is never held across an await
        let subscribers: Vec<(SubscriberId, mpsc::Sender<Payload>)> = partition
            .subscribers
            .lock()
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();

        let sends = subscribers.iter().map(|(id, sender)| {
            let payload = payload.clone();
            async move { (*id, sender.send_timeout(payload, self.send_timeout).await) }
        });

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, result) in join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!(
                        "[registry] dropping slow subscriber {id} from '{key}' after {:?}",
                        self.send_timeout
                    );
                    failed.push(id);
                }
                Err(SendTimeoutError::Closed(_)) => {
                    crate::debug_event!("registry", "dropping closed subscriber", "{id} from '{key}'");
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = partition.subscribers.lock();
            for id in failed {
                subscribers.remove(&id);
            }
        }

        crate::debug_event!("registry", "broadcast", "'{key}' to {delivered} subscribers");
        delivered
    }

    /// Number of subscribers currently registered under `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.partition(key)
            .map_or(0, |partition| partition.subscribers.lock().len())
    }

    /// Subscribers across every partition.
    pub fn total_subscribers(&self) -> usize {
        self.partitions
            .values()
            .map(|partition| partition.subscribers.lock().len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &str) -> Payload {
        Arc::from(text)
    }

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(
            BroadcastScope::Partitioned,
            ["overworld".to_string(), "nether".to_string()],
        )
    }

    #[test]
    fn test_partitioned_accepts_known_keys_only() {
        let registry = registry();
        assert!(registry.accepts("overworld"));
        assert!(!registry.accepts("the_end"));
        assert!(!registry.accepts(""));

        let (tx, _rx) = mpsc::channel(4);
        assert_eq!(
            registry.subscribe("the_end", tx),
            Err(RegistryError::UnknownPartition("the_end".to_string()))
        );
    }

    #[tokio::test]
    async fn test_broadcast_stays_in_partition() {
        let registry = registry();
        let (over_tx, mut over_rx) = mpsc::channel(4);
        let (nether_tx, mut nether_rx) = mpsc::channel(4);
        registry.subscribe("overworld", over_tx).unwrap();
        registry.subscribe("nether", nether_tx).unwrap();
        assert_eq!(registry.total_subscribers(), 2);

        assert_eq!(registry.broadcast("overworld", payload("a")).await, 1);

        assert_eq!(over_rx.try_recv().unwrap().as_ref(), "a");
        assert!(over_rx.try_recv().is_err());
        assert!(nether_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_payload_once() {
        let registry = registry();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = mpsc::channel(4);
            registry.subscribe("overworld", tx).unwrap();
            receivers.push(rx);
        }

        assert_eq!(registry.broadcast("overworld", payload("tile")).await, 3);

        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap().as_ref(), "tile");
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_final() {
        let registry = registry();
        let (tx, mut rx) = mpsc::channel(4);
        let id = registry.subscribe("overworld", tx).unwrap();

        assert!(registry.unsubscribe("overworld", id));
        assert!(!registry.unsubscribe("overworld", id));
        assert!(!registry.unsubscribe("nether", id));

        assert_eq!(registry.broadcast("overworld", payload("late")).await, 0);
        // Registry held the only sender, so the queue is closed and empty
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_failed_subscriber_is_isolated() {
        let registry = registry().with_send_timeout(Duration::from_millis(20));
        let (closed_tx, closed_rx) = mpsc::channel(4);
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (ok_tx, mut ok_rx) = mpsc::channel(4);
        registry.subscribe("overworld", closed_tx).unwrap();
        registry.subscribe("overworld", slow_tx).unwrap();
        registry.subscribe("overworld", ok_tx).unwrap();
        drop(closed_rx);

        assert_eq!(registry.broadcast("overworld", payload("1")).await, 2);
        assert_eq!(registry.subscriber_count("overworld"), 2);

        // Slow queue is full and nobody reads it, so the next broadcast
        // gives up on it after the timeout
        assert_eq!(registry.broadcast("overworld", payload("2")).await, 1);
        assert_eq!(registry.subscriber_count("overworld"), 1);

        assert_eq!(ok_rx.try_recv().unwrap().as_ref(), "1");
        assert_eq!(ok_rx.try_recv().unwrap().as_ref(), "2");
        assert_eq!(slow_rx.try_recv().unwrap().as_ref(), "1");
        assert!(matches!(
            slow_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_burst_larger_than_queue_waits_for_reader() {
        let registry = registry().with_send_timeout(Duration::from_secs(2));
        let (tx, mut rx) = mpsc::channel(4);
        registry.subscribe("overworld", tx).unwrap();

        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while seen.len() < 100 {
                match rx.recv().await {
                    Some(payload) => seen.push(payload.to_string()),
                    None => break,
                }
                // Slower than the producer, but well within the timeout
                tokio::task::yield_now().await;
            }
            seen
        });

        for i in 0..100 {
            assert_eq!(
                registry.broadcast("overworld", payload(&i.to_string())).await,
                1
            );
        }

        let seen = reader.await.unwrap();
        assert_eq!(seen, (0..100).map(|i| i.to_string()).collect::<Vec<_>>());
        assert_eq!(registry.subscriber_count("overworld"), 1);
    }

    #[tokio::test]
    async fn test_unscoped_single_partition() {
        let registry = SubscriptionRegistry::new(BroadcastScope::Unscoped, Vec::new());
        assert!(registry.accepts(""));
        assert!(registry.accepts("anything"));

        let (tx, mut rx) = mpsc::channel(4);
        let id = registry.subscribe("", tx).unwrap();

        assert_eq!(registry.broadcast("overworld", payload("o")).await, 1);
        assert_eq!(registry.broadcast("nether", payload("n")).await, 1);
        assert_eq!(rx.try_recv().unwrap().as_ref(), "o");
        assert_eq!(rx.try_recv().unwrap().as_ref(), "n");

        assert!(registry.unsubscribe("whatever", id));
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_partition_is_noop() {
        assert_eq!(registry().broadcast("the_end", payload("x")).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_churn_during_broadcast_never_fails() {
        let registry = Arc::new(registry());
        let (steady_tx, mut steady_rx) = mpsc::channel(1024);
        registry.subscribe("overworld", steady_tx).unwrap();

        let mut churners = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            churners.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let (tx, rx) = mpsc::channel(8);
                    let id = registry.subscribe("overworld", tx).unwrap();
                    tokio::task::yield_now().await;
                    registry.unsubscribe("overworld", id);
                    drop(rx);
                }
            }));
        }

        for i in 0..500 {
            registry.broadcast("overworld", payload(&i.to_string())).await;
            tokio::task::yield_now().await;
        }
        for churner in churners {
            churner.await.unwrap();
        }

        // The steady subscriber saw every broadcast, in order
        for i in 0..500 {
            assert_eq!(steady_rx.try_recv().unwrap().as_ref(), i.to_string());
        }
        assert_eq!(registry.subscriber_count("overworld"), 1);
    }
}
