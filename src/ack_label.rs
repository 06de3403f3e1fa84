// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! The declared-acknowledgement-label registry: an optional parallel
//! pipeline over [`LiteralDData`] used to locate the node owning a label.
//! Declaration is synchronously conflict-checked against the latest local
//! snapshot; true global uniqueness is only guaranteed after the
//! reconciliation task resolves concurrent declarations by lexicographic
//! `NodeId` precedence.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::ddata::{LiteralDData, WriteConsistency};
use crate::error::{label_conflict, PubSubError};
use crate::node_id::NodeId;

/// Local accumulator plus the handle used to talk to `LiteralDData`. Shared
/// (via `Arc`) between the public `declare`/`release` calls and the
/// background reconciliation task.
pub struct AckLabelRegistry {
    node_id: NodeId,
    literal: LiteralDData,
    write_timeout: Duration,
    declared: RwLock<HashSet<String>>,
}

impl AckLabelRegistry {
    pub fn new(node_id: NodeId, literal: LiteralDData, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            literal,
            write_timeout: config.write_timeout,
            declared: RwLock::new(HashSet::new()),
        })
    }

    /// Attempts to insert `labels` into this node's entry. Fails the entire
    /// declaration with `LabelConflict` if any label already appears under
    /// another node's entry in the latest snapshot.
    pub async fn declare(&self, labels: Vec<String>) -> Result<(), PubSubError> {
        let snapshot = self.literal.read();
        for label in &labels {
            for (owner, owned_labels) in &snapshot {
                if owner != &self.node_id && owned_labels.contains(label) {
                    telemetrylib::PubSubTelemetry::incr_ack_label_conflict();
                    return Err(label_conflict(label.clone()));
                }
            }
        }

        let mut update = crate::indel::IndelUpdate::new();
        for label in &labels {
            update.insert(label.clone());
        }
        self.literal
            .write(&self.node_id, &update, WriteConsistency::Majority, self.write_timeout)
            .await?;

        let mut declared = self.declared.write().expect("ack label lock poisoned");
        declared.extend(labels);
        Ok(())
    }

    /// Removes `labels` from this node's entry.
    pub async fn release(&self, labels: Vec<String>) -> Result<(), PubSubError> {
        let mut update = crate::indel::IndelUpdate::new();
        for label in &labels {
            update.delete(label.clone());
        }
        self.literal
            .write(&self.node_id, &update, WriteConsistency::Majority, self.write_timeout)
            .await?;

        let mut declared = self.declared.write().expect("ack label lock poisoned");
        for label in &labels {
            declared.remove(label);
        }
        Ok(())
    }

    /// Linear scan of the current snapshot for the node advertising `label`.
    pub fn owner_of(&self, label: &str) -> Option<NodeId> {
        self.literal
            .read()
            .into_iter()
            .find(|(_, labels)| labels.contains(label))
            .map(|(node, _)| node)
    }

    /// Spawn the reconciliation task: on every `LiteralDData` change,
    /// scan for labels simultaneously advertised by more than one node and
    /// have every losing node (the ones whose `NodeId` is not the
    /// lexicographically smallest) release it. Returns a shutdown sender;
    /// dropping it (or sending on it) stops the task.
    pub fn spawn_reconciliation(self: &Arc<Self>) -> mpsc::Sender<()> {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let registry = Arc::clone(self);
        let mut changes = registry.literal.subscribe_changes();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    changed = changes.recv() => {
                        if changed.is_err() {
                            break;
                        }
                        registry.reconcile_once().await;
                    }
                }
            }
        });

        stop_tx
    }

    async fn reconcile_once(&self) {
        let snapshot = self.literal.read();
        let mut owners: std::collections::HashMap<String, Vec<NodeId>> = std::collections::HashMap::new();
        for (node, labels) in &snapshot {
            for label in labels {
                owners.entry(label.clone()).or_default().push(node.clone());
            }
        }

        let mut to_release = Vec::new();
        for (label, mut nodes) in owners {
            if nodes.len() <= 1 {
                continue;
            }
            nodes.sort();
            let winner = nodes.first().cloned();
            if winner.as_ref() != Some(&self.node_id) && nodes.contains(&self.node_id) {
                to_release.push(label);
            }
        }

        if !to_release.is_empty() {
            logger_core::log_info(
                "ack-label",
                format!("releasing {} label(s) lost to a lexicographically smaller node", to_release.len()),
            );
            let _ = self.release(to_release).await;
        }
    }
}
