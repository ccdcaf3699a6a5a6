//! Reversible add/remove delta over a base collection.

use std::collections::btree_set::{self, BTreeSet};
use std::fmt;

/// Added and removed elements relative to some base collection.
///
/// `added` and `removed` are always disjoint: adding an element that is
/// marked removed only cancels the removal, and vice versa.
#[derive(Clone, PartialEq, Eq)]
pub struct DiffSet<T: Ord> {
    added: BTreeSet<T>,
    removed: BTreeSet<T>,
}

impl<T: Ord> Default for DiffSet<T> {
    fn default() -> Self {
        Self {
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }
}

impl<T: Ord + fmt::Debug> fmt::Debug for DiffSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffSet")
            .field("added", &self.added)
            .field("removed", &self.removed)
            .finish()
    }
}

impl<T: Ord + Clone> DiffSet<T> {
    /// Creates an empty diff set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `elem` as added.
    ///
    /// Returns `true` if the diff set changed.
    pub fn add(&mut self, elem: T) -> bool {
        if self.removed.remove(&elem) {
            return true;
        }
        self.added.insert(elem)
    }

    /// Marks `elem` as removed.
    ///
    /// Returns `true` if the diff set changed.
    pub fn remove(&mut self, elem: T) -> bool {
        if self.added.remove(&elem) {
            return true;
        }
        self.removed.insert(elem)
    }

    /// Adds every element of `elems`.
    pub fn add_all(&mut self, elems: impl IntoIterator<Item = T>) {
        for elem in elems {
            self.add(elem);
        }
    }

    /// Removes every element of `elems`.
    pub fn remove_all(&mut self, elems: impl IntoIterator<Item = T>) {
        for elem in elems {
            self.remove(elem);
        }
    }

    /// Returns `true` if `elem` is marked added.
    #[must_use]
    pub fn is_added(&self, elem: &T) -> bool {
        self.added.contains(elem)
    }

    /// Returns `true` if `elem` is marked removed.
    #[must_use]
    pub fn is_removed(&self, elem: &T) -> bool {
        self.removed.contains(elem)
    }

    /// Iterates over added elements in ascending order.
    pub fn added(&self) -> btree_set::Iter<'_, T> {
        self.added.iter()
    }

    /// Iterates over removed elements in ascending order.
    pub fn removed(&self) -> btree_set::Iter<'_, T> {
        self.removed.iter()
    }

    /// Returns `true` if nothing is added or removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Net change in size this diff applies to a base collection.
    #[must_use]
    pub fn delta(&self) -> i64 {
        self.added.len() as i64 - self.removed.len() as i64
    }

    /// Stops tracking `elem` on either side.
    pub fn remove_from_tracking(&mut self, elem: &T) {
        if !self.added.remove(elem) {
            self.removed.remove(elem);
        }
    }

    /// Forgets all changes.
    pub fn clear(&mut self) {
        self.added.clear();
        self.removed.clear();
    }

    /// Lazily applies this diff on top of `source`.
    ///
    /// The returned iterator yields every element of `source` that is not
    /// removed, in source order, followed by every added element. It is
    /// single-pass and borrows the diff set until dropped.
    pub fn apply<I>(&self, source: I) -> DiffApply<'_, T, I::IntoIter>
    where
        I: IntoIterator<Item = T>,
    {
        DiffApply {
            source: source.into_iter(),
            removed: &self.removed,
            added: self.added.iter(),
            source_done: false,
        }
    }

    /// Returns a diff set whose added elements are restricted to `predicate`.
    ///
    /// Removed elements are carried over unfiltered: they record that
    /// something existed and is gone, independent of the filter.
    #[must_use]
    pub fn filter_added<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(&T) -> bool,
    {
        Self {
            added: self.added.iter().filter(|e| predicate(e)).cloned().collect(),
            removed: self.removed.clone(),
        }
    }
}

/// Iterator returned by [`DiffSet::apply`].
pub struct DiffApply<'a, T: Ord, I> {
    source: I,
    removed: &'a BTreeSet<T>,
    added: btree_set::Iter<'a, T>,
    source_done: bool,
}

impl<T, I> Iterator for DiffApply<'_, T, I>
where
    T: Ord + Clone,
    I: Iterator<Item = T>,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if !self.source_done {
            for elem in self.source.by_ref() {
                if !self.removed.contains(&elem) {
                    return Some(elem);
                }
            }
            self.source_done = true;
        }
        self.added.next().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn add_after_remove_cancels_removal() {
        let mut diff = DiffSet::new();
        diff.remove(1);
        assert!(diff.is_removed(&1));
        diff.add(1);
        assert!(!diff.is_removed(&1));
        assert!(!diff.is_added(&1));
        assert!(diff.is_empty());
    }

    #[test]
    fn remove_after_add_cancels_addition() {
        let mut diff = DiffSet::new();
        diff.add(7);
        diff.remove(7);
        assert!(diff.is_empty());
    }

    #[test]
    fn apply_on_empty_diff_yields_source() {
        let diff = DiffSet::<u64>::new();
        let out: Vec<_> = diff.apply(vec![5, 3, 9]).collect();
        assert_eq!(out, vec![5, 3, 9]);
    }

    #[test]
    fn apply_excludes_removed_and_appends_added() {
        let mut diff = DiffSet::new();
        diff.remove(3);
        diff.add(10);
        diff.add(8);
        let out: Vec<_> = diff.apply(vec![5, 3, 9]).collect();
        assert_eq!(out, vec![5, 9, 8, 10]);
    }

    #[test]
    fn filter_added_keeps_removed_unfiltered() {
        let mut diff = DiffSet::new();
        diff.add(1);
        diff.add(2);
        diff.remove(3);
        diff.remove(4);

        let filtered = diff.filter_added(|x| x % 2 == 1);

        assert_eq!(filtered.added().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(filtered.removed().copied().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn delta_counts_net_change() {
        let mut diff = DiffSet::new();
        diff.add_all([1, 2, 3]);
        diff.remove(9);
        assert_eq!(diff.delta(), 2);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8),
        Remove(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![any::<u8>().prop_map(Op::Add), any::<u8>().prop_map(Op::Remove)]
    }

    proptest! {
        #[test]
        fn added_and_removed_stay_disjoint(ops in prop::collection::vec(op_strategy(), 0..200)) {
            let mut diff = DiffSet::new();
            for op in ops {
                match op {
                    Op::Add(x) => { diff.add(x); }
                    Op::Remove(x) => { diff.remove(x); }
                }
                for x in diff.added() {
                    prop_assert!(!diff.is_removed(x));
                }
            }
        }

        #[test]
        fn apply_preserves_relative_source_order(
            source in prop::collection::vec(0u8..50, 0..40),
            removed in prop::collection::btree_set(0u8..50, 0..10),
        ) {
            let mut diff = DiffSet::new();
            diff.remove_all(removed.iter().copied());
            let expected: Vec<u8> = source.iter().copied().filter(|x| !removed.contains(x)).collect();
            let out: Vec<u8> = diff.apply(source.clone()).collect();
            prop_assert_eq!(out, expected);
        }
    }
}
