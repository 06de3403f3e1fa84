// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! Cluster-wide topic-based publish/subscribe, backed by a compressed,
//! replicated membership structure.
//!
//! Each node hosts an arbitrary set of local subscribers keyed by string
//! topics. A message published anywhere in the cluster is delivered to
//! exactly the local subscribers whose topics match, while the per-topic
//! memory advertised cluster-wide stays bounded by a hash-family size
//! rather than the full topic set.
//!
//! ```
//! use delta_pubsub::{start_distributed_pub, start_distributed_sub, Cluster, Config, NodeId, Topic, TopicExtractor};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let extractor = TopicExtractor::<String>::new("demo", |message: &String| {
//!     [Topic::new(message.as_str()).unwrap()].into_iter().collect()
//! });
//! let config = Config { update_interval: Duration::from_millis(5), ..Config::default() };
//! let cluster = Cluster::new(config, extractor);
//!
//! let pub_handle = start_distributed_pub(&cluster, NodeId::new("n1"));
//! let sub_handle = start_distributed_sub(&cluster, NodeId::new("n2"));
//!
//! let (handle, mut mailbox) = delta_pubsub::SubscriberHandle::new(16);
//! sub_handle.subscribe(handle, vec![Topic::new("weather").unwrap()]).await.unwrap();
//!
//! // Give the Update Loop a few ticks to flush the subscription into the
//! // replicated compressed view before publishing.
//! tokio::time::sleep(Duration::from_millis(50)).await;
//! pub_handle.publish("weather".to_string());
//!
//! let received = tokio::time::timeout(Duration::from_secs(1), mailbox.recv())
//!     .await
//!     .expect("message should arrive")
//!     .expect("mailbox should not be closed");
//! assert_eq!(*received.message, "weather");
//! assert_eq!(received.from, NodeId::new("n1"));
//! # }
//! ```

pub mod ack_label;
pub mod cluster;
pub mod config;
pub mod ddata;
pub mod error;
pub mod hash_family;
pub mod indel;
pub mod node_id;
pub mod publisher;
pub mod subscriber;
pub mod subscriptions;
pub mod supervisor;
pub mod topic;
pub mod update_loop;

pub use ack_label::AckLabelRegistry;
pub use cluster::{Cluster, TopicExtractor};
pub use config::Config;
pub use error::{DDataError, PubSubError};
pub use hash_family::HashFamily;
pub use node_id::NodeId;
pub use publisher::DistributedPub;
pub use subscriber::SharedReader;
pub use subscriptions::{Delivery, SubscriberHandle, SubscriptionsReader};
pub use topic::Topic;

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use update_loop::RegistryCommand;

/// Start the publisher side for `node_id` on `cluster`. Joins the cluster's
/// replicated maps (for `Majority`/`All` write-consistency accounting) and
/// returns a cheaply-cloneable handle whose `publish` never blocks.
pub fn start_distributed_pub<T: Send + Sync + 'static>(
    cluster: &Cluster<T>,
    node_id: NodeId,
) -> DistributedPub<T> {
    cluster.join(&node_id);
    DistributedPub::new(node_id, cluster.clone())
}

/// Start the subscriber side for `node_id` on `cluster`: the Subscriber
/// Supervisor spawns and supervises the Subscriber task and the Update Loop
/// task, and registers this node's mailbox in the cluster's message bus so
/// remote Publishers can find it.
pub fn start_distributed_sub<T: Send + Sync + 'static>(
    cluster: &Cluster<T>,
    node_id: NodeId,
) -> DistributedSub<T> {
    cluster.join(&node_id);

    let (bus_tx, bus_rx) = mpsc::channel(1024);
    cluster.register(node_id.clone(), bus_tx);

    let shared_reader = subscriber::new_shared_reader::<T>();
    let (registry_tx, registry_rx) = mpsc::channel(256);

    let restart_delay = cluster.config.restart_delay;
    let bus_rx = Arc::new(tokio::sync::Mutex::new(bus_rx));
    let registry_rx = Arc::new(tokio::sync::Mutex::new(registry_rx));
    let update_loop_state = update_loop::UpdateLoopState::<T>::new();

    let subscriber_supervisor = {
        let node_id = node_id.clone();
        let cluster = cluster.clone();
        let shared_reader = Arc::clone(&shared_reader);
        let bus_rx = Arc::clone(&bus_rx);
        supervisor::spawn_supervised("subscriber", restart_delay, move || {
            let node_id = node_id.clone();
            let cluster = cluster.clone();
            let shared_reader = Arc::clone(&shared_reader);
            let bus_rx = Arc::clone(&bus_rx);
            Box::pin(async move {
                let mut inbox = bus_rx.lock().await;
                subscriber::run(node_id, cluster, shared_reader, &mut inbox).await;
            })
        })
    };

    let update_loop_supervisor = {
        let node_id = node_id.clone();
        let cluster = cluster.clone();
        let shared_reader = Arc::clone(&shared_reader);
        let registry_rx = Arc::clone(&registry_rx);
        let update_loop_state = Arc::clone(&update_loop_state);
        supervisor::spawn_supervised("update-loop", restart_delay, move || {
            let node_id = node_id.clone();
            let cluster = cluster.clone();
            let shared_reader = Arc::clone(&shared_reader);
            let registry_rx = Arc::clone(&registry_rx);
            let update_loop_state = Arc::clone(&update_loop_state);
            Box::pin(async move {
                let mut commands = registry_rx.lock().await;
                update_loop::run(node_id, cluster, shared_reader, update_loop_state, &mut commands).await;
            })
        })
    };

    let ack_label = ack_label::AckLabelRegistry::new(node_id.clone(), cluster.literal.clone(), &cluster.config);
    let reconciliation_stop = ack_label.spawn_reconciliation();

    DistributedSub {
        node_id,
        cluster: cluster.clone(),
        registry_tx,
        ack_label,
        reconciliation_stop,
        subscriber_supervisor,
        update_loop_supervisor,
    }
}

/// Public handle returned by [`start_distributed_sub`]. `subscribe`,
/// `unsubscribe`, and `remove_subscriber` are mutations sent to the Update
/// Loop task, the sole owner of the local [`SubscriptionsRegistry`];
/// `declare_ack_labels` goes straight to the [`AckLabelRegistry`].
pub struct DistributedSub<T> {
    node_id: NodeId,
    cluster: Cluster<T>,
    registry_tx: mpsc::Sender<RegistryCommand<T>>,
    ack_label: Arc<AckLabelRegistry>,
    reconciliation_stop: mpsc::Sender<()>,
    subscriber_supervisor: tokio::task::JoinHandle<()>,
    update_loop_supervisor: tokio::task::JoinHandle<()>,
}

impl<T: Send + Sync + 'static> DistributedSub<T> {
    pub async fn subscribe(&self, handle: SubscriberHandle<T>, topics: Vec<Topic>) -> Result<(), PubSubError> {
        let (reply, reply_rx) = oneshot::channel();
        self.registry_tx
            .send(RegistryCommand::Subscribe { handle, topics, reply })
            .await
            .map_err(|_| PubSubError::ComponentUnavailable("update-loop"))?;
        reply_rx.await.map_err(|_| PubSubError::ComponentUnavailable("update-loop"))
    }

    pub async fn unsubscribe(&self, handle: SubscriberHandle<T>, topics: Vec<Topic>) -> Result<(), PubSubError> {
        let (reply, reply_rx) = oneshot::channel();
        self.registry_tx
            .send(RegistryCommand::Unsubscribe { handle, topics, reply })
            .await
            .map_err(|_| PubSubError::ComponentUnavailable("update-loop"))?;
        reply_rx.await.map_err(|_| PubSubError::ComponentUnavailable("update-loop"))
    }

    pub async fn remove_subscriber(&self, handle: SubscriberHandle<T>) -> Result<(), PubSubError> {
        let (reply, reply_rx) = oneshot::channel();
        self.registry_tx
            .send(RegistryCommand::RemoveSubscriber { handle, reply })
            .await
            .map_err(|_| PubSubError::ComponentUnavailable("update-loop"))?;
        reply_rx.await.map_err(|_| PubSubError::ComponentUnavailable("update-loop"))
    }

    pub async fn declare_ack_labels(&self, labels: Vec<String>) -> Result<(), PubSubError> {
        self.ack_label.declare(labels).await
    }

    pub async fn release_ack_labels(&self, labels: Vec<String>) -> Result<(), PubSubError> {
        self.ack_label.release(labels).await
    }

    pub fn owner_of_ack_label(&self, label: &str) -> Option<NodeId> {
        self.ack_label.owner_of(label)
    }

    /// Depart the cluster: unregisters this node's mailbox (ending the
    /// Subscriber task), stops the Update Loop task, stops the ack-label
    /// reconciliation task, and awaits every supervised task's exit.
    pub async fn shutdown(self) {
        let _ = self.registry_tx.send(RegistryCommand::Stop).await;
        self.cluster.depart(&self.node_id);
        drop(self.reconciliation_stop);
        let _ = self.update_loop_supervisor.await;
        let _ = self.subscriber_supervisor.await;
    }
}
