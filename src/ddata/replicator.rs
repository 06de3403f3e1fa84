// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! An in-memory stand-in for the host runtime's cluster transport: a
//! replicated `NodeId -> Set<V>` map good enough to exercise the pub-sub
//! core end to end without a real CRDT/gossip transport. A production
//! embedding swaps this out behind the same read/write/subscribe shape.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_retry2::strategy::{jitter_range, ExponentialFactorBackoff};

use crate::ddata::WriteConsistency;
use crate::error::DDataError;
use crate::indel::IndelUpdate;
use crate::node_id::NodeId;

const HOP_BASE_MILLIS: u64 = 2;
const HOP_FACTOR: f64 = 1.0;

/// Per-node injected failures, consumed one at a time. A test registers a
/// count of upcoming failures for a node; `write` returns that error until
/// the count is exhausted, simulating transient replication trouble ahead
/// of a forced resync.
#[derive(Default)]
struct FaultInjector {
    pending: HashMap<NodeId, (DDataError, u32)>,
}

pub struct Replicator<V> {
    entries: RwLock<HashMap<NodeId, HashSet<V>>>,
    known_peers: AtomicUsize,
    faults: RwLock<FaultInjector>,
    changes: broadcast::Sender<NodeId>,
}

impl<V: Eq + Hash + Clone + Send + Sync + 'static> Replicator<V> {
    pub fn new() -> Arc<Self> {
        let (changes, _rx) = broadcast::channel(256);
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            known_peers: AtomicUsize::new(0),
            faults: RwLock::new(FaultInjector::default()),
            changes,
        })
    }

    /// Register a peer joining the simulated cluster, so `Majority`/`All`
    /// writes have something to be unreachable from.
    pub fn join(&self) {
        self.known_peers.fetch_add(1, Ordering::SeqCst);
    }

    /// Remove `node`'s entry entirely -- the cluster-departure transition in
    /// the node-entry state machine (`Advertised(Sn) -> Removed-by-cluster`).
    pub fn remove_node(&self, node: &NodeId) {
        self.entries.write().expect("replicator lock poisoned").remove(node);
    }

    /// Test hook: the next `count` writes from `node` fail with `error`.
    pub fn inject_failure(&self, node: NodeId, error: DDataError, count: u32) {
        self.faults.write().expect("replicator lock poisoned").pending.insert(node, (error, count));
    }

    fn take_injected_failure(&self, node: &NodeId) -> Option<DDataError> {
        let mut faults = self.faults.write().expect("replicator lock poisoned");
        let Some((error, remaining)) = faults.pending.get_mut(node) else {
            return None;
        };
        let error = error.clone();
        *remaining -= 1;
        if *remaining == 0 {
            faults.pending.remove(node);
        }
        Some(error)
    }

    /// Apply `update` to `node`'s entry at the requested `consistency`,
    /// bounded by `timeout`. A single fault-check attempt: an injected or
    /// transient failure is surfaced to the caller immediately rather than
    /// retried here, since the Update Loop already retries the whole tick
    /// on the next interval. The wait before applying simulates the extra
    /// hops `Majority`/`All` consistency demands, using this codebase's own
    /// jittered backoff strategy as a delay sequence rather than a retry
    /// driver.
    pub async fn write(
        &self,
        node: &NodeId,
        update: &IndelUpdate<V>,
        consistency: WriteConsistency,
        timeout: Duration,
    ) -> Result<(), DDataError> {
        let known_peers = self.known_peers.load(Ordering::SeqCst);
        if consistency != WriteConsistency::Local && known_peers == 0 {
            return Err(DDataError::ClusterUnreachable);
        }

        if let Some(error) = self.take_injected_failure(node) {
            return Err(error);
        }

        let hops = match consistency {
            WriteConsistency::Local => 1,
            WriteConsistency::Majority => known_peers / 2 + 1,
            WriteConsistency::All => known_peers.max(1),
        };
        let simulated_round_trip = ExponentialFactorBackoff::from_millis(HOP_BASE_MILLIS, HOP_FACTOR)
            .map(jitter_range(0.8, 1.2))
            .take(hops)
            .sum();

        if tokio::time::timeout(timeout, tokio::time::sleep(simulated_round_trip)).await.is_err() {
            return Err(DDataError::ReplicationTimeout);
        }

        let mut entries = self.entries.write().expect("replicator lock poisoned");
        let current = entries.entry(node.clone()).or_default();
        *current = update.apply_to(current);
        drop(entries);
        let _ = self.changes.send(node.clone());
        Ok(())
    }

    /// Latest locally observed replica state.
    pub fn read(&self) -> HashMap<NodeId, HashSet<V>> {
        self.entries.read().expect("replicator lock poisoned").clone()
    }

    /// A fresh listener notified (by `NodeId`) whenever any entry changes.
    /// Deduplication across repeated notifications for the same node is the
    /// listener's responsibility.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<NodeId> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(s: &str) -> NodeId {
        NodeId::new(s)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let replicator: Arc<Replicator<i32>> = Replicator::new();
        let mut update = IndelUpdate::new();
        update.insert(1);
        update.insert(2);

        replicator
            .write(&node("n1"), &update, WriteConsistency::Local, Duration::from_millis(100))
            .await
            .unwrap();

        let read = replicator.read();
        assert_eq!(read.get(&node("n1")).unwrap(), &HashSet::from([1, 2]));
    }

    #[tokio::test]
    async fn majority_write_fails_with_no_peers() {
        let replicator: Arc<Replicator<i32>> = Replicator::new();
        let update = IndelUpdate::new();
        let result = replicator
            .write(&node("n1"), &update, WriteConsistency::Majority, Duration::from_millis(100))
            .await;
        assert_eq!(result, Err(DDataError::ClusterUnreachable));
    }

    #[tokio::test]
    async fn injected_failure_is_consumed_once() {
        let replicator: Arc<Replicator<i32>> = Replicator::new();
        replicator.inject_failure(node("n1"), DDataError::ReplicationTimeout, 1);

        let update = IndelUpdate::new();
        let first = replicator
            .write(&node("n1"), &update, WriteConsistency::Local, Duration::from_millis(200))
            .await;
        assert!(first.is_err());

        let second = replicator
            .write(&node("n1"), &update, WriteConsistency::Local, Duration::from_millis(200))
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn changes_are_broadcast_on_successful_write() {
        let replicator: Arc<Replicator<i32>> = Replicator::new();
        let mut rx = replicator.subscribe_changes();
        let update = IndelUpdate::new();
        replicator
            .write(&node("n1"), &update, WriteConsistency::Local, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), node("n1"));
    }

    #[tokio::test]
    async fn remove_node_drops_its_entry() {
        let replicator: Arc<Replicator<i32>> = Replicator::new();
        let mut update = IndelUpdate::new();
        update.insert(1);
        replicator
            .write(&node("n1"), &update, WriteConsistency::Local, Duration::from_millis(100))
            .await
            .unwrap();
        replicator.remove_node(&node("n1"));
        assert!(replicator.read().get(&node("n1")).is_none());
    }
}
