// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! Process-wide counters for the pub-sub core, observed by tests and
//! operators to diagnose hash-collision regressions and replication churn.
//! Shape mirrors this codebase's own telemetry singleton: a `lazy_static`
//! `RwLock`-guarded struct with `incr_*`/accessor pairs.

use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;

/// A subscriber-side delivery outcome, keyed alongside the identifier of the
/// `topicExtractor` that produced the topic set for the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CounterKind {
    /// The message matched at least one locally-registered subscriber.
    TruePositive,
    /// The message was forwarded here on a hash match but no local
    /// subscriber is actually registered for any of its topics.
    FalsePositive,
}

const MUTEX_WRITE_ERR: &str = "Failed to obtain write lock for mutex. Poisoned mutex";
const MUTEX_READ_ERR: &str = "Failed to obtain read lock for mutex. Poisoned mutex";

#[derive(Default)]
pub struct PubSubTelemetry {
    /// `pubsub-true-positive` / `pubsub-false-positive`, keyed by
    /// `(topic_extractor_id, kind)`.
    delivery_counters: HashMap<(String, CounterKind), u64>,
    /// Local messages dropped because a subscriber's mailbox was full.
    data_dropped: u64,
    /// Replication writes that failed with `ReplicationTimeout` or
    /// `ClusterUnreachable` and were left for the next tick to retry.
    replication_retry: u64,
    /// `declareAckLabels` calls rejected with `LabelConflict`.
    ack_label_conflict: u64,
}

lazy_static! {
    static ref TELEMETRY: StdRwLock<PubSubTelemetry> = StdRwLock::default();
}

impl PubSubTelemetry {
    /// Increment a delivery counter for `topic_extractor_id` and return the
    /// new value.
    pub fn incr_delivery(topic_extractor_id: &str, kind: CounterKind) -> u64 {
        let mut t = TELEMETRY.write().expect(MUTEX_WRITE_ERR);
        let entry = t
            .delivery_counters
            .entry((topic_extractor_id.to_string(), kind))
            .or_insert(0);
        *entry = entry.saturating_add(1);
        *entry
    }

    /// Current value of a delivery counter (0 if never incremented).
    pub fn delivery(topic_extractor_id: &str, kind: CounterKind) -> u64 {
        TELEMETRY
            .read()
            .expect(MUTEX_READ_ERR)
            .delivery_counters
            .get(&(topic_extractor_id.to_string(), kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn incr_data_dropped() -> u64 {
        let mut t = TELEMETRY.write().expect(MUTEX_WRITE_ERR);
        t.data_dropped = t.data_dropped.saturating_add(1);
        t.data_dropped
    }

    pub fn data_dropped() -> u64 {
        TELEMETRY.read().expect(MUTEX_READ_ERR).data_dropped
    }

    pub fn incr_replication_retry() -> u64 {
        let mut t = TELEMETRY.write().expect(MUTEX_WRITE_ERR);
        t.replication_retry = t.replication_retry.saturating_add(1);
        t.replication_retry
    }

    pub fn replication_retry() -> u64 {
        TELEMETRY.read().expect(MUTEX_READ_ERR).replication_retry
    }

    pub fn incr_ack_label_conflict() -> u64 {
        let mut t = TELEMETRY.write().expect(MUTEX_WRITE_ERR);
        t.ack_label_conflict = t.ack_label_conflict.saturating_add(1);
        t.ack_label_conflict
    }

    pub fn ack_label_conflict() -> u64 {
        TELEMETRY.read().expect(MUTEX_READ_ERR).ack_label_conflict
    }

    /// Reset the telemetry collected thus far. Intended for test isolation.
    pub fn reset() {
        *TELEMETRY.write().expect(MUTEX_WRITE_ERR) = PubSubTelemetry::default();
    }

    /// Snapshot the current counters as a JSON value, for operators wiring
    /// this crate's counters into a health/metrics endpoint that doesn't
    /// want a direct dependency on this crate's types. `delivery_counters`
    /// keys don't serialize as JSON object keys directly (a `(String,
    /// CounterKind)` tuple isn't a string), so they're flattened to
    /// `"{topic_extractor_id}:{kind}"` here rather than via `#[derive(Serialize)]`.
    pub fn snapshot_json() -> serde_json::Value {
        let t = TELEMETRY.read().expect(MUTEX_READ_ERR);
        let delivery: serde_json::Map<String, serde_json::Value> = t
            .delivery_counters
            .iter()
            .map(|((extractor_id, kind), count)| {
                let kind = serde_json::to_value(kind).unwrap_or(serde_json::Value::Null);
                let kind = kind.as_str().unwrap_or("unknown").to_string();
                (format!("{extractor_id}:{kind}"), serde_json::json!(count))
            })
            .collect();
        serde_json::json!({
            "deliveryCounters": delivery,
            "dataDropped": t.data_dropped,
            "replicationRetry": t.replication_retry,
            "ackLabelConflict": t.ack_label_conflict,
        })
    }
}
