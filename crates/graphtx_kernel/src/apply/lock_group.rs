//! Entity locks held while a transaction is applied to storage.

use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Default)]
struct ApplyLocksInner {
    held: Mutex<HashSet<u64>>,
    released: Condvar,
}

/// Exclusive per-entity locks for concurrent appliers.
///
/// Distinct from transaction locks: these are only held while one
/// transaction's commands are being applied.
#[derive(Clone, Default)]
pub struct ApplyLocks {
    inner: Arc<ApplyLocksInner>,
}

impl ApplyLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock on `id` is free, then takes it.
    pub fn acquire(&self, id: u64) -> ApplyLock {
        let mut held = self.inner.held.lock();
        while held.contains(&id) {
            self.inner.released.wait(&mut held);
        }
        held.insert(id);
        ApplyLock {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Number of locks currently held.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.inner.held.lock().len()
    }
}

/// A held apply lock; released on drop.
pub struct ApplyLock {
    inner: Arc<ApplyLocksInner>,
    id: u64,
}

impl ApplyLock {
    /// The locked id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ApplyLock {
    fn drop(&mut self) {
        let mut held = self.inner.held.lock();
        held.remove(&self.id);
        self.inner.released.notify_all();
    }
}

/// Apply locks taken on behalf of one transaction.
#[derive(Default)]
pub struct LockGroup {
    locks: Vec<ApplyLock>,
}

impl LockGroup {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock on `id` unless this group already holds it.
    pub fn lock(&mut self, locks: &ApplyLocks, id: u64) {
        if self.locks.iter().any(|l| l.id == id) {
            return;
        }
        self.locks.push(locks.acquire(id));
    }

    /// Number of locks in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns `true` if the group holds no locks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Releases every lock in the group.
    pub fn close(&mut self) {
        self.locks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn group_takes_each_id_once() {
        let locks = ApplyLocks::new();
        let mut group = LockGroup::new();
        group.lock(&locks, 1);
        group.lock(&locks, 1);
        group.lock(&locks, 2);
        assert_eq!(group.len(), 2);
        assert_eq!(locks.held_count(), 2);
        group.close();
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn second_group_waits_for_first() {
        let locks = ApplyLocks::new();
        let mut first = LockGroup::new();
        first.lock(&locks, 7);

        let other = locks.clone();
        let handle = thread::spawn(move || {
            let mut second = LockGroup::new();
            second.lock(&other, 7);
            second.len()
        });

        thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());
        first.close();
        assert_eq!(handle.join().unwrap(), 1);
    }
}
