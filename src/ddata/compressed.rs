// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! The replicated map from node identity to the set of 32-bit hash
//! fingerprints that node is interested in -- the compressed topic
//! advertisement scheme that bounds cluster-wide pub-sub memory to a
//! hash-family size rather than the full topic set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::ddata::replicator::Replicator;
use crate::ddata::WriteConsistency;
use crate::error::DDataError;
use crate::indel::IndelUpdate;
use crate::node_id::NodeId;

#[derive(Clone)]
pub struct CompressedDData {
    inner: Arc<Replicator<i32>>,
}

impl CompressedDData {
    pub fn new() -> Self {
        Self { inner: Replicator::new() }
    }

    pub fn join(&self) {
        self.inner.join();
    }

    pub fn remove_node(&self, node: &NodeId) {
        self.inner.remove_node(node);
    }

    pub fn inject_failure(&self, node: NodeId, error: DDataError, count: u32) {
        self.inner.inject_failure(node, error, count);
    }

    pub async fn write(
        &self,
        self_node_id: &NodeId,
        update: &IndelUpdate<i32>,
        consistency: WriteConsistency,
        timeout: Duration,
    ) -> Result<(), DDataError> {
        self.inner.write(self_node_id, update, consistency, timeout).await
    }

    pub fn read(&self) -> HashMap<NodeId, HashSet<i32>> {
        self.inner.read()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<NodeId> {
        self.inner.subscribe_changes()
    }
}

impl Default for CompressedDData {
    fn default() -> Self {
        Self::new()
    }
}
