// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! Replicated key-value maps (`NodeId -> Set<V>`) with the cluster's
//! eventual-consistency model. [`replicator`] supplies the in-memory
//! stand-in cluster transport this crate ships so the module is
//! independently testable; a production embedding swaps it for the host's
//! actual CRDT/DData transport behind the same
//! read/write/subscribe-changes shape [`CompressedDData`] and
//! [`LiteralDData`] expose.

mod compressed;
mod literal;
pub mod replicator;

pub use compressed::CompressedDData;
pub use literal::LiteralDData;
pub use replicator::Replicator;

use serde::{Deserialize, Serialize};

/// Fan-out target requested for a single write. The in-memory replicator
/// models this as "how many of the simulated peer acks must land before the
/// write is considered successful", the same role `writeConsistency` plays
/// against a real CRDT transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum WriteConsistency {
    /// Acknowledged once the local replica applied the write.
    Local,
    /// Acknowledged once a majority of known peers applied the write.
    Majority,
    /// Acknowledged once every known peer applied the write. Used by the
    /// Update Loop for forced resyncs.
    All,
}
