// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! The publisher side of the pub-sub core: from a message, compute the
//! candidate destination node set from the replicated compressed view and
//! forward the message once to each candidate's Subscriber.
//!
//! Unlike the Update Loop and Subscriber, a Publisher holds no long-lived
//! mutable state of its own -- every read it performs is a cheap snapshot
//! of cluster-shared data -- so it needs no supervised task of its own.

use std::collections::HashSet;
use std::sync::Arc;

use crate::cluster::{Cluster, Envelope};
use crate::node_id::NodeId;

pub struct Publisher<T> {
    node_id: NodeId,
    cluster: Cluster<T>,
}

impl<T: Send + Sync + 'static> Publisher<T> {
    pub(crate) fn new(node_id: NodeId, cluster: Cluster<T>) -> Self {
        Self { node_id, cluster }
    }

    /// Compute `T = topicExtractor(message)`, form the candidate node set
    /// from the compressed replicated view, and forward once to each
    /// candidate. An empty topic set delivers nowhere and is not an error.
    /// Returns immediately -- publishers never await acknowledgement.
    pub fn publish(&self, message: T) {
        let message = Arc::new(message);
        let topics = self.cluster.topic_extractor.topics_of(&message);
        if topics.is_empty() {
            return;
        }

        let mut candidate_hashes: HashSet<i32> = HashSet::new();
        for topic in &topics {
            candidate_hashes.extend(self.cluster.hash_family.hashes(topic.as_str()));
        }

        let replicated = self.cluster.compressed.read();
        let targets: Vec<NodeId> = replicated
            .into_iter()
            .filter(|(_, hashes)| hashes.iter().any(|h| candidate_hashes.contains(h)))
            .map(|(node, _)| node)
            .collect();

        for node in targets {
            let Some(sender) = self.cluster.sender_for(&node) else {
                // The candidate node advertised hashes but hasn't (or no
                // longer) registered a live Subscriber mailbox -- a
                // transient gap during join/departure, not an error.
                continue;
            };
            let envelope = Envelope { message: Arc::clone(&message), from: self.node_id.clone() };
            if sender.try_send(envelope).is_err() {
                telemetrylib::PubSubTelemetry::incr_data_dropped();
            }
        }
    }
}

/// Public handle returned by [`crate::start_distributed_pub`].
#[derive(Clone)]
pub struct DistributedPub<T> {
    inner: Arc<Publisher<T>>,
}

impl<T: Send + Sync + 'static> DistributedPub<T> {
    pub(crate) fn new(node_id: NodeId, cluster: Cluster<T>) -> Self {
        Self { inner: Arc::new(Publisher::new(node_id, cluster)) }
    }

    pub fn publish(&self, message: T) {
        self.inner.publish(message);
    }
}
