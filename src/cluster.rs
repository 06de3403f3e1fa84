// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! The shared cluster-wide state a set of in-process nodes joins: the two
//! replicated maps (`CompressedDData`, `LiteralDData`) plus the in-memory
//! message bus that stands in for the host runtime's cluster transport
//! when routing a forwarded message to a remote node's Subscriber.
//!
//! A single [`Cluster`] is constructed once per simulated cluster (tests
//! build one and have every simulated node `join` it); a production
//! embedding would instead hand each node a client bound to the host's real
//! replicated-data and transport layers behind this same shape.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use crate::config::Config;
use crate::ddata::{CompressedDData, LiteralDData};
use crate::error::DDataError;
use crate::hash_family::HashFamily;
use crate::node_id::NodeId;
use crate::topic::Topic;

/// A message forwarded by a [`crate::publisher::Publisher`] to a remote
/// node's [`crate::subscriber::Subscriber`] mailbox.
pub struct Envelope<T> {
    pub message: Arc<T>,
    pub from: NodeId,
}

/// Extracts the set of topics a message belongs to. Supplied by the caller
/// at factory time and shared by every Publisher/Subscriber on a
/// [`Cluster`]; `id` names it for the `(topic_extractor_id, kind)`-keyed
/// delivery counters.
#[derive(Clone)]
pub struct TopicExtractor<T> {
    pub id: String,
    extract: Arc<dyn Fn(&T) -> HashSet<Topic> + Send + Sync>,
}

impl<T> TopicExtractor<T> {
    pub fn new(id: impl Into<String>, extract: impl Fn(&T) -> HashSet<Topic> + Send + Sync + 'static) -> Self {
        Self { id: id.into(), extract: Arc::new(extract) }
    }

    pub fn topics_of(&self, message: &T) -> HashSet<Topic> {
        (self.extract)(message)
    }
}

type Bus<T> = Arc<RwLock<HashMap<NodeId, mpsc::Sender<Envelope<T>>>>>;

pub struct Cluster<T> {
    pub(crate) config: Config,
    pub(crate) hash_family: HashFamily,
    pub(crate) compressed: CompressedDData,
    pub(crate) literal: LiteralDData,
    pub(crate) topic_extractor: TopicExtractor<T>,
    bus: Bus<T>,
}

impl<T> Clone for Cluster<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            hash_family: self.hash_family.clone(),
            compressed: self.compressed.clone(),
            literal: self.literal.clone(),
            topic_extractor: self.topic_extractor.clone(),
            bus: Arc::clone(&self.bus),
        }
    }
}

impl<T> Cluster<T> {
    pub fn new(config: Config, topic_extractor: TopicExtractor<T>) -> Self {
        let hash_family = HashFamily::new(config.seed.clone(), config.hash_family_size);
        Self {
            config,
            hash_family,
            compressed: CompressedDData::new(),
            literal: LiteralDData::new(),
            topic_extractor,
            bus: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `node` as a cluster participant for both replicated maps'
    /// `Majority`/`All` write consistency accounting.
    pub fn join(&self, node: &NodeId) {
        self.compressed.join();
        self.literal.join();
        let _ = node;
    }

    /// Remove a node's entries from both replicated maps, modeling the
    /// `Removed-by-cluster-on-departure` transition.
    pub fn depart(&self, node: &NodeId) {
        self.compressed.remove_node(node);
        self.literal.remove_node(node);
        self.unregister(node);
    }

    pub(crate) fn register(&self, node: NodeId, sender: mpsc::Sender<Envelope<T>>) {
        self.bus.write().expect("bus lock poisoned").insert(node, sender);
    }

    pub(crate) fn unregister(&self, node: &NodeId) {
        self.bus.write().expect("bus lock poisoned").remove(node);
    }

    pub(crate) fn sender_for(&self, node: &NodeId) -> Option<mpsc::Sender<Envelope<T>>> {
        self.bus.read().expect("bus lock poisoned").get(node).cloned()
    }

    /// Test/fault-injection hook: the next `count` writes `node` attempts
    /// against the compressed advertisement map fail with `error`, modeling
    /// a transient `ReplicationTimeout`/`ClusterUnreachable` ahead of the
    /// forced resync the Update Loop falls back to.
    pub fn inject_compressed_write_failure(&self, node: &NodeId, error: DDataError, count: u32) {
        self.compressed.inject_failure(node.clone(), error, count);
    }
}
