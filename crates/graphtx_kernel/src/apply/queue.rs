//! Batches transactions before applying them together.

use crate::apply::command::TransactionToApply;
use crate::error::KernelResult;

/// Applies a batch of transactions in one call.
pub trait Applier {
    /// Applies `batch` in order.
    fn apply(&mut self, batch: Vec<TransactionToApply>) -> KernelResult<()>;
}

impl<F> Applier for F
where
    F: FnMut(Vec<TransactionToApply>) -> KernelResult<()>,
{
    fn apply(&mut self, batch: Vec<TransactionToApply>) -> KernelResult<()> {
        self(batch)
    }
}

/// Accumulates transactions and hands them to an [`Applier`] in batches.
///
/// A batch is applied as soon as it reaches `max_batch_size`, or when
/// [`empty`](Self::empty) is called. The queue is cleared before the
/// applier runs, so a failed batch is not retried.
pub struct TransactionQueue<A: Applier> {
    max_batch_size: usize,
    batch: Vec<TransactionToApply>,
    applier: A,
}

impl<A: Applier> TransactionQueue<A> {
    /// Creates a queue. A `max_batch_size` of zero is treated as one.
    pub fn new(max_batch_size: usize, applier: A) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            max_batch_size,
            batch: Vec::with_capacity(max_batch_size),
            applier,
        }
    }

    /// Adds a transaction, applying the batch if it became full.
    pub fn queue(&mut self, tx: TransactionToApply) -> KernelResult<()> {
        self.batch.push(tx);
        if self.batch.len() >= self.max_batch_size {
            self.empty()?;
        }
        Ok(())
    }

    /// Applies whatever is queued.
    pub fn empty(&mut self) -> KernelResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.max_batch_size));
        self.applier.apply(batch)
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Number of queued transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// First queued transaction.
    #[must_use]
    pub fn first(&self) -> Option<&TransactionToApply> {
        self.batch.first()
    }

    /// Last queued transaction.
    #[must_use]
    pub fn last(&self) -> Option<&TransactionToApply> {
        self.batch.last()
    }

    /// Returns the wrapped applier.
    pub fn into_applier(self) -> A {
        self.applier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::command::TransactionRepresentation;
    use crate::error::KernelError;
    use crate::types::TransactionId;

    fn tx(id: u64) -> TransactionToApply {
        TransactionToApply::with_id(TransactionRepresentation::default(), TransactionId::new(id))
    }

    #[test]
    fn applies_when_batch_is_full() {
        let mut batches: Vec<Vec<u64>> = Vec::new();
        let mut queue = TransactionQueue::new(2, |batch: Vec<TransactionToApply>| -> KernelResult<()> {
            batches.push(batch.iter().map(|t| t.tx_id().as_u64()).collect());
            Ok(())
        });

        queue.queue(tx(1)).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.first().map(TransactionToApply::tx_id), Some(TransactionId::new(1)));
        queue.queue(tx(2)).unwrap();
        assert!(queue.is_empty());
        queue.queue(tx(3)).unwrap();
        assert_eq!(queue.last().map(TransactionToApply::tx_id), Some(TransactionId::new(3)));
        queue.empty().unwrap();
        queue.empty().unwrap();
        drop(queue);

        assert_eq!(batches, vec![vec![1, 2], vec![3]]);
    }

    #[test]
    fn failed_batch_is_cleared() {
        let mut calls = 0;
        let mut queue = TransactionQueue::new(1, |_batch: Vec<TransactionToApply>| -> KernelResult<()> {
            calls += 1;
            Err(KernelError::invalid_operation("apply failed"))
        });
        assert!(queue.queue(tx(1)).is_err());
        assert!(queue.is_empty());
        drop(queue);
        assert_eq!(calls, 1);
    }
}
