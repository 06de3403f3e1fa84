// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! Cluster-unique node identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a single cluster participant. Ordering is lexicographic over
/// the inner string, which the ack-label reconciliation rule in
/// [`crate::ack_label`] relies on directly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh, practically-unique id for a node joining the
    /// cluster for the first time.
    pub fn generate() -> Self {
        Self(nanoid::nanoid!())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_lexicographic() {
        let a = NodeId::new("a");
        let b = NodeId::new("b");
        assert!(a < b);
    }

    #[test]
    fn generate_produces_distinct_ids() {
        assert_ne!(NodeId::generate(), NodeId::generate());
    }
}
