//! Commit-order gate for explicit index application.

use crate::error::{KernelError, KernelResult};
use crate::types::TransactionId;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Bounded queue of transaction ids that must be processed in order.
///
/// Ids are offered at append time, so they arrive in commit order. An
/// applier calls [`wait_for`](Self::wait_for) with its own id, which blocks
/// until every lower id has been removed, and then
/// [`remove_checked`](Self::remove_checked) when done. `offer` blocks while
/// the queue is at capacity.
pub struct IdOrderingQueue {
    ids: Mutex<VecDeque<TransactionId>>,
    changed: Condvar,
    capacity: usize,
}

impl IdOrderingQueue {
    /// Creates a queue holding at most `capacity` ids (minimum one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ids: Mutex::new(VecDeque::with_capacity(capacity)),
            changed: Condvar::new(),
            capacity,
        }
    }

    /// Enqueues `id`. Ids must be strictly increasing.
    pub fn offer(&self, id: TransactionId) -> KernelResult<()> {
        let mut ids = self.ids.lock();
        while ids.len() >= self.capacity {
            self.changed.wait(&mut ids);
        }
        if let Some(&last) = ids.back() {
            if id <= last {
                return Err(KernelError::invalid_operation(format!(
                    "{id} offered after {last}"
                )));
            }
        }
        ids.push_back(id);
        self.changed.notify_all();
        Ok(())
    }

    /// Blocks until `id` is at the head of the queue.
    pub fn wait_for(&self, id: TransactionId) -> KernelResult<()> {
        let mut ids = self.ids.lock();
        loop {
            match ids.front().copied() {
                Some(head) if head == id => return Ok(()),
                _ if !ids.contains(&id) => {
                    return Err(KernelError::invalid_operation(format!(
                        "{id} was never offered to the ordering queue"
                    )));
                }
                _ => self.changed.wait(&mut ids),
            }
        }
    }

    /// Removes `id`, which must be at the head.
    pub fn remove_checked(&self, id: TransactionId) -> KernelResult<()> {
        let mut ids = self.ids.lock();
        match ids.front().copied() {
            Some(head) if head == id => {
                ids.pop_front();
                self.changed.notify_all();
                Ok(())
            }
            head => Err(KernelError::invalid_operation(format!(
                "expected {id} at the head of the ordering queue, found {head:?}"
            ))),
        }
    }

    /// Removes `id` wherever it is queued. Used for ids whose transaction
    /// will never reach the explicit index applier. Returns whether it was
    /// queued.
    pub fn withdraw(&self, id: TransactionId) -> bool {
        let mut ids = self.ids.lock();
        let Some(at) = ids.iter().position(|&queued| queued == id) else {
            return false;
        };
        ids.remove(at);
        self.changed.notify_all();
        true
    }

    /// Returns `true` if no ids are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }

    /// Number of queued ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }
}
