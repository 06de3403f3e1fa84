// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! The timer-driven task that owns the local [`SubscriptionsRegistry`],
//! flushes its deltas into the [`CompressedDData`] replicated map, and
//! publishes a fresh [`SubscriptionsReader`] for the Subscriber to filter
//! against. Subscribe/unsubscribe/removeSubscriber requests from
//! `DistributedSub` are mutations sent to this task's mailbox, since it is
//! the sole owner of the registry. The registry itself lives in
//! [`UpdateLoopState`], held outside this function so a supervisor restart
//! after a panic only loses whatever was mid-tick, not the accumulated
//! subscriber set.

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::MissedTickBehavior;

use crate::cluster::Cluster;
use crate::ddata::WriteConsistency;
use crate::indel::IndelUpdate;
use crate::node_id::NodeId;
use crate::subscriber::SharedReader;
use crate::subscriptions::{SubscriberHandle, SubscriptionsRegistry};
use crate::topic::Topic;

/// The registry and bookkeeping a single node's Update Loop accumulates
/// between ticks, held in an `Arc<Mutex<_>>` that outlives any individual
/// run of [`run`]. A supervisor restart after a panic spawns a fresh `run`
/// call against the same `UpdateLoopState`, so only whatever was mid-tick
/// is lost -- every subscriber already registered via `DistributedSub`
/// survives the restart intact.
pub struct UpdateLoopState<T> {
    registry: SubscriptionsRegistry<T>,
    last_exported_topics: HashSet<Topic>,
    last_write_failed: bool,
}

impl<T> UpdateLoopState<T> {
    pub fn new() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            registry: SubscriptionsRegistry::new(),
            last_exported_topics: HashSet::new(),
            last_write_failed: false,
        }))
    }
}

pub enum RegistryCommand<T> {
    Subscribe {
        handle: SubscriberHandle<T>,
        topics: Vec<Topic>,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        handle: SubscriberHandle<T>,
        topics: Vec<Topic>,
        reply: oneshot::Sender<()>,
    },
    RemoveSubscriber {
        handle: SubscriberHandle<T>,
        reply: oneshot::Sender<()>,
    },
    Stop,
}

/// Runs until a [`RegistryCommand::Stop`] is received. Spawned under
/// [`crate::supervisor::spawn_supervised`] by [`crate::start_distributed_sub`],
/// which passes the same `state` across every restart -- a panic mid-tick
/// loses only whichever local variables lived on this function's own stack
/// frame, never the registry itself.
pub async fn run<T: Send + Sync + 'static>(
    node_id: NodeId,
    cluster: Cluster<T>,
    shared_reader: SharedReader<T>,
    state: Arc<Mutex<UpdateLoopState<T>>>,
    commands: &mut mpsc::Receiver<RegistryCommand<T>>,
) {
    let mut ticker = tokio::time::interval(cluster.config.update_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut state = state.lock().await;
                tick(&node_id, &cluster, &shared_reader, &mut state).await;
            }
            command = commands.recv() => {
                let mut state = state.lock().await;
                match command {
                    Some(RegistryCommand::Subscribe { handle, topics, reply }) => {
                        state.registry.subscribe(&handle, &topics);
                        let _ = reply.send(());
                    }
                    Some(RegistryCommand::Unsubscribe { handle, topics, reply }) => {
                        state.registry.unsubscribe(&handle, &topics);
                        let _ = reply.send(());
                    }
                    Some(RegistryCommand::RemoveSubscriber { handle, reply }) => {
                        state.registry.remove_subscriber(&handle);
                        let _ = reply.send(());
                    }
                    Some(RegistryCommand::Stop) | None => break,
                }
            }
        }
    }

    logger_core::log_debug("update-loop", format!("{node_id} update loop stopped"));
}

async fn tick<T: Send + Sync + 'static>(
    node_id: &NodeId,
    cluster: &Cluster<T>,
    shared_reader: &SharedReader<T>,
    state: &mut UpdateLoopState<T>,
) {
    state.registry.reap_gone_subscribers();

    let (added, removed) = state.registry.diff_since(&state.last_exported_topics);
    let current_topics = state.registry.current_topics();

    let force = state.last_write_failed || rand::thread_rng().gen_bool(cluster.config.force_update_probability);
    let has_delta = !added.is_empty() || !removed.is_empty();

    if !force && !has_delta {
        // Nothing changed and no forced resync is due: still publish a
        // fresh reader in case subscribers were reaped this tick, but skip
        // the replicated write entirely.
        shared_reader.store(Arc::new(state.registry.snapshot()));
        return;
    }

    let (update, consistency) = if force {
        let mut update = IndelUpdate::new();
        let mut hashes = HashSet::new();
        for topic in &current_topics {
            hashes.extend(cluster.hash_family.hashes(topic.as_str()));
        }
        update.replace_all(hashes);
        (update, WriteConsistency::All)
    } else {
        let old_hashes: HashSet<i32> = state
            .last_exported_topics
            .iter()
            .flat_map(|t| cluster.hash_family.hashes(t.as_str()))
            .collect();
        let new_hashes: HashSet<i32> = current_topics
            .iter()
            .flat_map(|t| cluster.hash_family.hashes(t.as_str()))
            .collect();

        let mut update = IndelUpdate::new();
        for h in new_hashes.difference(&old_hashes) {
            update.insert(*h);
        }
        // Collision-safe deletion: recomputed fresh from the full current
        // topic set every tick, so a hash still produced by any live topic
        // can never land in `deletes`.
        for h in old_hashes.difference(&new_hashes) {
            update.delete(*h);
        }
        (update, cluster.config.write_consistency)
    };

    let result = cluster
        .compressed
        .write(node_id, &update, consistency, cluster.config.write_timeout)
        .await;

    match result {
        Ok(()) => {
            state.last_write_failed = false;
            state.last_exported_topics = current_topics;
            shared_reader.store(Arc::new(state.registry.snapshot()));
        }
        Err(err) => {
            state.last_write_failed = true;
            telemetrylib::PubSubTelemetry::incr_replication_retry();
            logger_core::log_warn(
                "update-loop",
                format!("{node_id} replicated write failed ({err}), retrying next tick"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Cluster, TopicExtractor};
    use crate::config::Config;
    use crate::subscriber::new_shared_reader;
    use std::time::Duration;

    fn extractor() -> TopicExtractor<String> {
        TopicExtractor::new("test", |m: &String| {
            m.split(',').map(|t| Topic::new(t).unwrap()).collect::<HashSet<_>>()
        })
    }

    /// Simulates the `SupervisorCrash` restart path directly: a subscriber
    /// registered before the crash must still be visible to the Subscriber
    /// after a fresh `run` call is spawned against the *same* `UpdateLoopState`,
    /// without resending any `RegistryCommand`.
    #[tokio::test]
    async fn a_restarted_run_keeps_subscribers_registered_before_the_crash() {
        let config = Config {
            update_interval: Duration::from_millis(10),
            force_update_probability: 0.0,
            ..Config::default()
        };
        let cluster = Cluster::new(config, extractor());
        let node_id = NodeId::new("n1");
        cluster.join(&node_id);

        let state = UpdateLoopState::<String>::new();
        let (handle, _mailbox) = SubscriberHandle::new(8);
        {
            let mut guard = state.lock().await;
            guard.registry.subscribe(&handle, &[Topic::new("t").unwrap()]);
        }

        let (_tx, rx) = mpsc::channel::<RegistryCommand<String>>(8);
        let rx = Arc::new(Mutex::new(rx));
        let shared_reader = new_shared_reader::<String>();

        // First incarnation: ticks once (flushing the pre-existing
        // subscription into the compressed view), then is aborted to model a
        // panic mid-task.
        let first = {
            let node_id = node_id.clone();
            let cluster = cluster.clone();
            let shared_reader = Arc::clone(&shared_reader);
            let state = Arc::clone(&state);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                let mut commands = rx.lock().await;
                run(node_id, cluster, shared_reader, state, &mut commands).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        first.abort();
        let _ = first.await;

        // Second incarnation, same `state` and `rx`: no Subscribe command is
        // ever resent.
        let second = {
            let node_id = node_id.clone();
            let cluster = cluster.clone();
            let shared_reader = Arc::clone(&shared_reader);
            let state = Arc::clone(&state);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                let mut commands = rx.lock().await;
                run(node_id, cluster, shared_reader, state, &mut commands).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let reader = shared_reader.load();
        let found = reader.subscribers_for(&HashSet::from([Topic::new("t").unwrap()]));
        assert_eq!(found.len(), 1, "the subscriber registered before the crash must survive the restart");

        second.abort();
        let _ = second.await;
    }
}
