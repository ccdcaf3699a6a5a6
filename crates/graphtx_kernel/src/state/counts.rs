//! Node and relationship count deltas.

use crate::types::{LabelId, RelationshipTypeId};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

/// Key of a count entry. `None` components mean "any".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CountsKey {
    /// Nodes with the label, or all nodes.
    Node {
        /// Label filter.
        label: Option<LabelId>,
    },
    /// Relationships matching the pattern `(start)-[type]->(end)`.
    Relationship {
        /// Label of the start node.
        start_label: Option<LabelId>,
        /// Relationship type.
        rel_type: Option<RelationshipTypeId>,
        /// Label of the end node.
        end_label: Option<LabelId>,
    },
}

impl CountsKey {
    /// Key for nodes with `label`.
    #[must_use]
    pub const fn node(label: Option<LabelId>) -> Self {
        Self::Node { label }
    }

    /// Key for relationships matching the given pattern.
    #[must_use]
    pub const fn relationship(
        start_label: Option<LabelId>,
        rel_type: Option<RelationshipTypeId>,
        end_label: Option<LabelId>,
    ) -> Self {
        Self::Relationship {
            start_label,
            rel_type,
            end_label,
        }
    }
}

impl fmt::Display for CountsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map_or_else(String::new, ToString::to_string)
        }
        match self {
            Self::Node { label } => write!(f, "({})", opt(label)),
            Self::Relationship {
                start_label,
                rel_type,
                end_label,
            } => write!(
                f,
                "({})-[{}]->({})",
                opt(start_label),
                opt(rel_type),
                opt(end_label)
            ),
        }
    }
}

/// A disagreement between two count states for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Difference {
    /// The key that disagrees.
    pub key: CountsKey,
    /// Count before, in the expected state.
    pub expected_before: i64,
    /// Count after, in the expected state.
    pub expected_after: i64,
    /// Count before, in the actual state.
    pub actual_before: i64,
    /// Count after, in the actual state.
    pub actual_after: i64,
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {} -> {}, got {} -> {}",
            self.key, self.expected_before, self.expected_after, self.actual_before, self.actual_after
        )
    }
}

/// Accumulated count deltas keyed by [`CountsKey`].
///
/// Entries whose delta returns to zero are dropped, so two states holding
/// the same counts compare equal however they got there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountsRecordState {
    counts: BTreeMap<CountsKey, i64>,
}

impl CountsRecordState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to the count of nodes with `label`.
    pub fn increment_node_count(&mut self, label: Option<LabelId>, delta: i64) {
        self.increment(CountsKey::node(label), delta);
    }

    /// Adds `delta` to the count of relationships matching the pattern.
    pub fn increment_relationship_count(
        &mut self,
        start_label: Option<LabelId>,
        rel_type: Option<RelationshipTypeId>,
        end_label: Option<LabelId>,
        delta: i64,
    ) {
        self.increment(
            CountsKey::relationship(start_label, rel_type, end_label),
            delta,
        );
    }

    /// Adds `delta` to every relationship count a relationship of
    /// `rel_type` contributes to, given the labels of its endpoints.
    ///
    /// Patterns constrain at most one endpoint label.
    pub fn increment_relationship(
        &mut self,
        rel_type: RelationshipTypeId,
        start_labels: &[LabelId],
        end_labels: &[LabelId],
        delta: i64,
    ) {
        let rel_type = Some(rel_type);
        self.increment_relationship_count(None, None, None, delta);
        self.increment_relationship_count(None, rel_type, None, delta);
        for &label in start_labels {
            self.increment_relationship_count(Some(label), None, None, delta);
            self.increment_relationship_count(Some(label), rel_type, None, delta);
        }
        for &label in end_labels {
            self.increment_relationship_count(None, None, Some(label), delta);
            self.increment_relationship_count(None, rel_type, Some(label), delta);
        }
    }

    /// Adds `delta` to the entry for `key`.
    pub fn increment(&mut self, key: CountsKey, delta: i64) {
        if delta == 0 {
            return;
        }
        match self.counts.entry(key) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() += delta;
                if *entry.get() == 0 {
                    entry.remove();
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(delta);
            }
        }
    }

    /// Returns the count for `key`, zero when absent.
    #[must_use]
    pub fn get(&self, key: &CountsKey) -> i64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Returns the current node count for `label`.
    #[must_use]
    pub fn node_count(&self, label: Option<LabelId>) -> i64 {
        self.get(&CountsKey::node(label))
    }

    /// Returns the current relationship count for the pattern.
    #[must_use]
    pub fn relationship_count(
        &self,
        start_label: Option<LabelId>,
        rel_type: Option<RelationshipTypeId>,
        end_label: Option<LabelId>,
    ) -> i64 {
        self.get(&CountsKey::relationship(start_label, rel_type, end_label))
    }

    /// Iterates over non-zero entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (CountsKey, i64)> + '_ {
        self.counts
            .iter()
            .filter(|(_, &v)| v != 0)
            .map(|(&k, &v)| (k, v))
    }

    /// Returns `true` if every entry is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.values().all(|&v| v == 0)
    }

    /// Merges all deltas of `other` into this state.
    pub fn add_all(&mut self, other: &Self) {
        for (key, delta) in other.iter() {
            self.increment(key, delta);
        }
    }

    /// Compares this (expected) state with `actual`.
    ///
    /// Returns one [`Difference`] per key whose counts disagree, in key
    /// order. Both states are deltas over an empty base, so `before` is
    /// always zero.
    #[must_use]
    pub fn verify(&self, actual: &Self) -> Vec<Difference> {
        let mut keys: Vec<CountsKey> = self
            .counts
            .keys()
            .chain(actual.counts.keys())
            .copied()
            .collect();
        keys.sort_unstable();
        keys.dedup();

        keys.into_iter()
            .filter_map(|key| {
                let expected = self.get(&key);
                let got = actual.get(&key);
                (expected != got).then_some(Difference {
                    key,
                    expected_before: 0,
                    expected_after: expected,
                    actual_before: 0,
                    actual_after: got,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn label(id: u64) -> Option<LabelId> {
        Some(LabelId::new(id))
    }

    fn rel_type(id: u64) -> Option<RelationshipTypeId> {
        Some(RelationshipTypeId::new(id))
    }

    #[test]
    fn equal_states_verify_cleanly() {
        let mut oracle = CountsRecordState::new();
        let mut victim = CountsRecordState::new();
        for state in [&mut oracle, &mut victim] {
            state.increment_node_count(label(1), 17);
            state.increment_relationship_count(label(1), rel_type(2), None, 5);
        }
        assert!(oracle.verify(&victim).is_empty());
    }

    #[test]
    fn differences_carry_expected_and_actual() {
        let mut oracle = CountsRecordState::new();
        let mut victim = CountsRecordState::new();
        oracle.increment_node_count(label(17), 5);
        victim.increment_node_count(label(17), 5);
        oracle.increment_node_count(label(12), 2);
        victim.increment_node_count(label(12), 1);
        oracle.increment_relationship_count(label(1), rel_type(2), label(3), 19);
        victim.increment_relationship_count(None, rel_type(4), None, 22);

        let diffs = oracle.verify(&victim);

        assert_eq!(
            diffs,
            vec![
                Difference {
                    key: CountsKey::node(label(12)),
                    expected_before: 0,
                    expected_after: 2,
                    actual_before: 0,
                    actual_after: 1,
                },
                Difference {
                    key: CountsKey::relationship(None, rel_type(4), None),
                    expected_before: 0,
                    expected_after: 0,
                    actual_before: 0,
                    actual_after: 22,
                },
                Difference {
                    key: CountsKey::relationship(label(1), rel_type(2), label(3)),
                    expected_before: 0,
                    expected_after: 19,
                    actual_before: 0,
                    actual_after: 0,
                },
            ]
        );
    }

    #[test]
    fn entries_cancelling_to_zero_match_missing_entries() {
        let mut a = CountsRecordState::new();
        a.increment_node_count(None, 3);
        a.increment_node_count(None, -3);
        assert!(a.is_empty());
        assert!(a.verify(&CountsRecordState::new()).is_empty());
    }

    #[test]
    fn states_reaching_the_same_counts_are_equal() {
        let mut direct = CountsRecordState::new();
        direct.increment_node_count(None, 2);

        let mut roundabout = CountsRecordState::new();
        roundabout.increment_node_count(None, 2);
        roundabout.increment_relationship(RelationshipTypeId::new(0), &[], &[], 1);
        roundabout.increment_relationship(RelationshipTypeId::new(0), &[], &[], -1);

        let mut merged = CountsRecordState::new();
        merged.add_all(&roundabout);
        merged.increment_node_count(label(4), 1);
        merged.increment_node_count(label(4), -1);

        assert_eq!(roundabout, direct);
        assert_eq!(merged, direct);
        assert_eq!(roundabout.iter().count(), 1);
    }

    proptest! {
        #[test]
        fn verify_reports_exactly_the_differing_keys(
            oracle_deltas in prop::collection::vec((0u64..4, -5i64..5), 0..30),
            victim_deltas in prop::collection::vec((0u64..4, -5i64..5), 0..30),
        ) {
            let mut oracle = CountsRecordState::new();
            let mut victim = CountsRecordState::new();
            for (l, d) in &oracle_deltas {
                oracle.increment_node_count(label(*l), *d);
            }
            for (l, d) in &victim_deltas {
                victim.increment_node_count(label(*l), *d);
            }
            let diffs = oracle.verify(&victim);
            for l in 0..4 {
                let key = CountsKey::node(label(l));
                let differs = oracle.get(&key) != victim.get(&key);
                prop_assert_eq!(diffs.iter().any(|d| d.key == key), differs);
            }
            for d in diffs {
                prop_assert_eq!(d.expected_after, oracle.get(&d.key));
                prop_assert_eq!(d.actual_after, victim.get(&d.key));
            }
        }
    }
}
