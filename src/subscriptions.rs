// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! The local, authoritative `Topic -> Set<SubscriberHandle>` registry and its
//! immutable read snapshot. Mutated only by the task that owns it (the
//! Update Loop, see [`crate::update_loop`]); every other component only ever
//! sees a [`SubscriptionsReader`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::node_id::NodeId;
use crate::topic::Topic;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// A message handed to a local subscriber, carrying the identity of the
/// node the original `publish` call ran on alongside the message itself, so
/// a reply can be routed back to the right node instead of just the right
/// topic.
pub struct Delivery<T> {
    pub message: Arc<T>,
    pub from: NodeId,
}

impl<T> Clone for Delivery<T> {
    fn clone(&self) -> Self {
        Self { message: Arc::clone(&self.message), from: self.from.clone() }
    }
}

/// An opaque, addressable reference to a local consumer. Equality and
/// hashing are identity-based (the generated id), never message-content
/// based, matching "it has identity equality and can receive a message" in
/// the data model. The subscriber owns itself (the receiving half of the
/// channel); the registry only ever holds this non-owning handle.
pub struct SubscriberHandle<T> {
    id: u64,
    sender: mpsc::Sender<Delivery<T>>,
}

impl<T> SubscriberHandle<T> {
    /// Create a fresh handle and the receiver the owning consumer should
    /// poll. `mailbox_capacity` bounds the per-handle backpressure queue;
    /// a full mailbox causes delivery to drop the message rather than
    /// block the delivering [`crate::subscriber::Subscriber`] task.
    pub fn new(mailbox_capacity: usize) -> (Self, mpsc::Receiver<Delivery<T>>) {
        let (sender, receiver) = mpsc::channel(mailbox_capacity.max(1));
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, sender }, receiver)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deliver without blocking. Returns `false` (and the caller should
    /// count a drop) if the handle's mailbox is full or its owner has
    /// already gone away.
    pub fn try_deliver(&self, delivery: Delivery<T>) -> bool {
        self.sender.try_send(delivery).is_ok()
    }

    /// `true` once the owning consumer has dropped its receiver -- the
    /// registry uses this to clean up dead handles on the next flush
    /// instead of waiting for an explicit `removeSubscriber`.
    pub fn is_gone(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<T> Clone for SubscriberHandle<T> {
    fn clone(&self) -> Self {
        Self { id: self.id, sender: self.sender.clone() }
    }
}

impl<T> PartialEq for SubscriberHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<T> Eq for SubscriberHandle<T> {}

impl<T> std::hash::Hash for SubscriberHandle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> std::fmt::Debug for SubscriberHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHandle").field("id", &self.id).finish()
    }
}

/// The local registry: `Topic -> Set<SubscriberHandle>` plus its inverse,
/// kept in agreement so `removeSubscriber` is O(degree) rather than a full
/// scan over every topic.
#[derive(Default)]
pub struct SubscriptionsRegistry<T> {
    by_topic: HashMap<Topic, HashSet<SubscriberHandle<T>>>,
    by_subscriber: HashMap<u64, (SubscriberHandle<T>, HashSet<Topic>)>,
}

impl<T> SubscriptionsRegistry<T> {
    pub fn new() -> Self {
        Self { by_topic: HashMap::new(), by_subscriber: HashMap::new() }
    }

    /// Idempotent: subscribing the same handle to a topic it already holds
    /// changes nothing and is not reflected in the next diff.
    pub fn subscribe(&mut self, sub: &SubscriberHandle<T>, topics: &[Topic]) {
        let reverse = self
            .by_subscriber
            .entry(sub.id())
            .or_insert_with(|| (sub.clone(), HashSet::new()));
        for topic in topics {
            if reverse.1.insert(topic.clone()) {
                self.by_topic.entry(topic.clone()).or_default().insert(sub.clone());
            }
        }
    }

    /// Removes `sub` from only the listed topics.
    pub fn unsubscribe(&mut self, sub: &SubscriberHandle<T>, topics: &[Topic]) {
        let Some((_, reverse_topics)) = self.by_subscriber.get_mut(&sub.id()) else {
            return;
        };
        for topic in topics {
            if reverse_topics.remove(topic) {
                if let Some(set) = self.by_topic.get_mut(topic) {
                    set.remove(sub);
                    if set.is_empty() {
                        self.by_topic.remove(topic);
                    }
                }
            }
        }
        if reverse_topics.is_empty() {
            self.by_subscriber.remove(&sub.id());
        }
    }

    /// Removes `sub` from every topic. Used both for an explicit
    /// `removeSubscriber` call and for the `SubscriberGone` cleanup path.
    pub fn remove_subscriber(&mut self, sub: &SubscriberHandle<T>) {
        if let Some((_, topics)) = self.by_subscriber.remove(&sub.id()) {
            for topic in topics {
                if let Some(set) = self.by_topic.get_mut(&topic) {
                    set.remove(sub);
                    if set.is_empty() {
                        self.by_topic.remove(&topic);
                    }
                }
            }
        }
    }

    /// Drops any handle whose owner has already disconnected. Called once
    /// per Update Loop tick before computing the diff, so a dead
    /// subscriber's topics stop being advertised within one interval
    /// without requiring the host runtime to signal termination explicitly.
    pub fn reap_gone_subscribers(&mut self) {
        let gone: Vec<SubscriberHandle<T>> = self
            .by_subscriber
            .values()
            .map(|(handle, _)| handle.clone())
            .filter(|handle| handle.is_gone())
            .collect();
        for handle in gone {
            self.remove_subscriber(&handle);
        }
    }

    pub fn current_topics(&self) -> HashSet<Topic> {
        self.by_topic.keys().cloned().collect()
    }

    /// Symmetric difference of the current topic set against
    /// `last_exported`: `(added, removed)`.
    pub fn diff_since(&self, last_exported: &HashSet<Topic>) -> (HashSet<Topic>, HashSet<Topic>) {
        let current = self.current_topics();
        let added = current.difference(last_exported).cloned().collect();
        let removed = last_exported.difference(&current).cloned().collect();
        (added, removed)
    }

    /// O(1) handoff: clones the per-topic map (cheap -- `HashSet` of
    /// cheaply-cloneable handles) into an immutable reader the Subscriber
    /// can hold onto independently of further registry mutation.
    pub fn snapshot(&self) -> SubscriptionsReader<T> {
        SubscriptionsReader { by_topic: self.by_topic.clone() }
    }
}

/// An immutable snapshot of the registry. Freely shareable; a subsequent
/// mutation of the live registry produces a new reader rather than mutating
/// this one.
#[derive(Default)]
pub struct SubscriptionsReader<T> {
    by_topic: HashMap<Topic, HashSet<SubscriberHandle<T>>>,
}

impl<T> SubscriptionsReader<T> {
    pub fn empty() -> Self {
        Self { by_topic: HashMap::new() }
    }

    /// Union of subscribers across every topic in `topics`.
    pub fn subscribers_for(&self, topics: &HashSet<Topic>) -> HashSet<SubscriberHandle<T>> {
        let mut out = HashSet::new();
        for topic in topics {
            if let Some(set) = self.by_topic.get(topic) {
                out.extend(set.iter().cloned());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(s: &str) -> Topic {
        Topic::new(s).unwrap()
    }

    #[test]
    fn subscribe_then_snapshot_finds_the_handle() {
        let mut registry: SubscriptionsRegistry<&'static str> = SubscriptionsRegistry::new();
        let (h, _rx) = SubscriberHandle::new(8);
        registry.subscribe(&h, &[topic("t")]);

        let reader = registry.snapshot();
        let found = reader.subscribers_for(&HashSet::from([topic("t")]));
        assert_eq!(found.len(), 1);
        assert!(found.contains(&h));
    }

    #[test]
    fn repeated_subscribe_is_idempotent() {
        let mut registry: SubscriptionsRegistry<&'static str> = SubscriptionsRegistry::new();
        let (h, _rx) = SubscriberHandle::new(8);
        let last_exported = HashSet::new();

        registry.subscribe(&h, &[topic("t")]);
        registry.subscribe(&h, &[topic("t")]);
        registry.subscribe(&h, &[topic("t")]);

        let (added, removed) = registry.diff_since(&last_exported);
        assert_eq!(added, HashSet::from([topic("t")]));
        assert!(removed.is_empty());
        assert_eq!(registry.by_topic.get(&topic("t")).unwrap().len(), 1);
    }

    #[test]
    fn unsubscribe_removes_only_listed_topics() {
        let mut registry: SubscriptionsRegistry<&'static str> = SubscriptionsRegistry::new();
        let (h, _rx) = SubscriberHandle::new(8);
        registry.subscribe(&h, &[topic("a"), topic("b")]);
        registry.unsubscribe(&h, &[topic("a")]);

        let reader = registry.snapshot();
        assert!(reader.subscribers_for(&HashSet::from([topic("a")])).is_empty());
        assert_eq!(reader.subscribers_for(&HashSet::from([topic("b")])).len(), 1);
    }

    #[test]
    fn remove_subscriber_clears_every_topic() {
        let mut registry: SubscriptionsRegistry<&'static str> = SubscriptionsRegistry::new();
        let (h, _rx) = SubscriberHandle::new(8);
        registry.subscribe(&h, &[topic("a"), topic("b")]);
        registry.remove_subscriber(&h);

        assert!(registry.current_topics().is_empty());
    }

    #[test]
    fn diff_since_is_symmetric_difference() {
        let mut registry: SubscriptionsRegistry<&'static str> = SubscriptionsRegistry::new();
        let (h, _rx) = SubscriberHandle::new(8);
        registry.subscribe(&h, &[topic("a"), topic("b")]);
        let last_exported = HashSet::from([topic("b"), topic("c")]);

        let (added, removed) = registry.diff_since(&last_exported);
        assert_eq!(added, HashSet::from([topic("a")]));
        assert_eq!(removed, HashSet::from([topic("c")]));
    }

    #[test]
    fn reap_gone_subscribers_drops_closed_handles() {
        let mut registry: SubscriptionsRegistry<&'static str> = SubscriptionsRegistry::new();
        let (h, rx) = SubscriberHandle::new(8);
        registry.subscribe(&h, &[topic("a")]);
        drop(rx);

        registry.reap_gone_subscribers();
        assert!(registry.current_topics().is_empty());
    }
}
