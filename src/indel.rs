// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! The batched `(inserts, deletes, replaceAll)` mutation handed to the
//! replicator. Mutation is confined to whichever task accumulates it (the
//! Update Loop for `CompressedDData`, the ack-label registry for
//! `LiteralDData`); the value handed across to the replicator is always a
//! by-value snapshot produced by [`IndelUpdate::export_and_reset`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

/// A buffered set mutation: `inserts`, `deletes`, and a `replaceAll` flag.
/// `inserts` and `deletes` are maintained disjoint by construction -- calling
/// [`insert`](Self::insert) strips the element from `deletes` and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "S: Eq + Hash + Serialize + for<'de2> Deserialize<'de2>")]
pub struct IndelUpdate<S: Eq + Hash> {
    pub inserts: HashSet<S>,
    pub deletes: HashSet<S>,
    pub replace_all: bool,
}

impl<S: Eq + Hash + Clone> Default for IndelUpdate<S> {
    fn default() -> Self {
        Self {
            inserts: HashSet::new(),
            deletes: HashSet::new(),
            replace_all: false,
        }
    }
}

impl<S: Eq + Hash + Clone> IndelUpdate<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an insertion of `x`, removing it from `deletes` if present.
    pub fn insert(&mut self, x: S) {
        self.deletes.remove(&x);
        self.inserts.insert(x);
    }

    /// Record a deletion of `x`, removing it from `inserts` if present.
    /// A no-op while `replace_all` is set: a full replacement already
    /// implies every absent element is deleted.
    pub fn delete(&mut self, x: S) {
        self.inserts.remove(&x);
        if !self.replace_all {
            self.deletes.insert(x);
        }
    }

    /// Discard any accumulated deltas and switch to a full-replacement
    /// write: the consumer's set becomes exactly `set`.
    pub fn replace_all(&mut self, set: HashSet<S>) {
        self.replace_all = true;
        self.inserts = set;
        self.deletes.clear();
    }

    /// Take the accumulated update by value and reset `self` to the empty,
    /// non-replacing state, ready to accumulate the next interval's deltas.
    pub fn export_and_reset(&mut self) -> IndelUpdate<S> {
        std::mem::replace(self, IndelUpdate::new())
    }

    pub fn is_empty(&self) -> bool {
        !self.replace_all && self.inserts.is_empty() && self.deletes.is_empty()
    }

    /// Apply `self` to `current`, producing the resulting set: `(if
    /// replace_all then {} else current) ∪ inserts \ deletes`.
    pub fn apply_to(&self, current: &HashSet<S>) -> HashSet<S> {
        let mut next = if self.replace_all {
            HashSet::new()
        } else {
            current.clone()
        };
        for d in &self.deletes {
            next.remove(d);
        }
        for i in &self.inserts {
            next.insert(i.clone());
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_delete_are_mutually_exclusive() {
        let mut u = IndelUpdate::new();
        u.insert(1);
        u.delete(1);
        assert!(!u.inserts.contains(&1));
        assert!(u.deletes.contains(&1));

        u.insert(1);
        assert!(u.inserts.contains(&1));
        assert!(!u.deletes.contains(&1));
    }

    #[test]
    fn export_and_reset_yields_empty_non_replacing_update() {
        let mut u = IndelUpdate::new();
        u.insert(1);
        u.delete(2);
        let exported = u.export_and_reset();
        assert_eq!(exported.inserts, HashSet::from([1]));
        assert_eq!(exported.deletes, HashSet::from([2]));
        assert!(u.is_empty());
    }

    #[test]
    fn replace_all_clears_deletes_and_sets_flag() {
        let mut u = IndelUpdate::new();
        u.delete(9);
        u.replace_all(HashSet::from([1, 2, 3]));
        assert!(u.replace_all);
        assert_eq!(u.inserts, HashSet::from([1, 2, 3]));
        assert!(u.deletes.is_empty());
    }

    #[test]
    fn delete_after_replace_all_is_a_no_op_for_deletes() {
        let mut u = IndelUpdate::new();
        u.replace_all(HashSet::from([1, 2]));
        u.delete(1);
        assert!(u.deletes.is_empty(), "a full replacement already excludes absent elements");
        assert_eq!(u.inserts, HashSet::from([2]));
    }

    #[test]
    fn wire_format_matches_the_documented_payload_shape() {
        // `{inserts: [i32], deletes: [i32], replaceAll: bool}` is the only
        // part of this crate with a stability requirement across versions,
        // since it crosses the cluster transport.
        let mut u: IndelUpdate<i32> = IndelUpdate::new();
        u.insert(1);
        u.delete(2);
        let json: serde_json::Value = serde_json::to_value(&u).unwrap();
        assert_eq!(json["inserts"], serde_json::json!([1]));
        assert_eq!(json["deletes"], serde_json::json!([2]));
        assert_eq!(json["replaceAll"], serde_json::json!(false));

        let round_tripped: IndelUpdate<i32> = serde_json::from_value(json).unwrap();
        assert_eq!(round_tripped, u);
    }

    #[test]
    fn apply_to_matches_the_documented_contract() {
        let current = HashSet::from([1, 2, 3]);
        let mut u = IndelUpdate::new();
        u.insert(4);
        u.delete(2);
        assert_eq!(u.apply_to(&current), HashSet::from([1, 3, 4]));

        let mut replace = IndelUpdate::new();
        replace.replace_all(HashSet::from([9]));
        assert_eq!(replace.apply_to(&current), HashSet::from([9]));
    }
}
