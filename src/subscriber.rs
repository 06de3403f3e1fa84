// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! The subscriber side: receives forwarded messages, consults the current
//! local [`SubscriptionsReader`], dispatches to true subscribers, and
//! counts false positives caused by hash collisions in the compressed
//! advertisement.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;

use crate::cluster::{Cluster, Envelope};
use crate::node_id::NodeId;
use crate::subscriptions::{Delivery, SubscriptionsReader};
use telemetrylib::CounterKind;

/// The pointer the Update Loop publishes a fresh [`SubscriptionsReader`]
/// into after every successful flush. Lock-free: the Subscriber loads it on
/// every delivered message without ever blocking on the Update Loop.
pub type SharedReader<T> = Arc<ArcSwap<SubscriptionsReader<T>>>;

pub fn new_shared_reader<T>() -> SharedReader<T> {
    Arc::new(ArcSwap::new(Arc::new(SubscriptionsReader::empty())))
}

/// Runs the Subscriber's receive loop until the bus mailbox closes (the
/// node departed, or the embedding dropped its `DistributedSub`). Spawned
/// under [`crate::supervisor::spawn_supervised`] by
/// [`crate::start_distributed_sub`].
pub async fn run<T: Send + Sync + 'static>(
    node_id: NodeId,
    cluster: Cluster<T>,
    shared_reader: SharedReader<T>,
    inbox: &mut mpsc::Receiver<Envelope<T>>,
) {
    let extractor_id = cluster.topic_extractor.id.clone();
    logger_core::log_debug("subscriber", format!("{node_id} subscriber online"));

    while let Some(envelope) = inbox.recv().await {
        let topics = cluster.topic_extractor.topics_of(&envelope.message);
        let reader = shared_reader.load();
        let targets = reader.subscribers_for(&topics);

        if targets.is_empty() {
            telemetrylib::PubSubTelemetry::incr_delivery(&extractor_id, CounterKind::FalsePositive);
            logger_core::log_debug(
                "subscriber",
                format!("{node_id} false positive from {}: no local subscriber for {topics:?}", envelope.from),
            );
            continue;
        }

        telemetrylib::PubSubTelemetry::incr_delivery(&extractor_id, CounterKind::TruePositive);
        for handle in &targets {
            let delivery = Delivery { message: Arc::clone(&envelope.message), from: envelope.from.clone() };
            if !handle.try_deliver(delivery) {
                telemetrylib::PubSubTelemetry::incr_data_dropped();
            }
        }
    }

    logger_core::log_debug("subscriber", format!("{node_id} subscriber mailbox closed, exiting"));
}
