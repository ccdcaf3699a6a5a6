//! Applier traits and the facades composing them.

use crate::apply::command::{CommandKind, StorageCommand, TransactionToApply};
use crate::apply::lock_group::LockGroup;
use crate::error::KernelResult;
use std::sync::Arc;

/// Applies the commands of one transaction.
///
/// `visit` dispatches each command to the method for its group; appliers
/// override only the groups they care about.
#[allow(unused_variables)]
pub trait TransactionApplier {
    /// Visits one command.
    fn visit(&mut self, command: &StorageCommand) -> KernelResult<()> {
        match command.kind() {
            CommandKind::Node => self.visit_node_command(command),
            CommandKind::Relationship => self.visit_relationship_command(command),
            CommandKind::Schema => self.visit_schema_command(command),
            CommandKind::ExplicitIndex => self.visit_explicit_index_command(command),
            CommandKind::Counts => self.visit_counts_command(command),
        }
    }

    /// Node record, label and property commands.
    fn visit_node_command(&mut self, command: &StorageCommand) -> KernelResult<()> {
        Ok(())
    }

    /// Relationship commands.
    fn visit_relationship_command(&mut self, command: &StorageCommand) -> KernelResult<()> {
        Ok(())
    }

    /// Index and constraint commands.
    fn visit_schema_command(&mut self, command: &StorageCommand) -> KernelResult<()> {
        Ok(())
    }

    /// Explicit index commands.
    fn visit_explicit_index_command(&mut self, command: &StorageCommand) -> KernelResult<()> {
        Ok(())
    }

    /// Count commands.
    fn visit_counts_command(&mut self, command: &StorageCommand) -> KernelResult<()> {
        Ok(())
    }

    /// Finishes this transaction.
    fn close(&mut self) -> KernelResult<()> {
        Ok(())
    }
}

/// Creates a [`TransactionApplier`] per transaction of a batch.
pub trait BatchTransactionApplier: Send + Sync {
    /// Starts applying `tx`.
    fn start_tx<'a>(
        &'a self,
        tx: &TransactionToApply,
        lock_group: &mut LockGroup,
    ) -> KernelResult<Box<dyn TransactionApplier + 'a>>;

    /// Finishes the batch.
    fn close(&self) -> KernelResult<()> {
        Ok(())
    }
}

/// Visits every command of `tx` with `applier`, then closes it.
///
/// The applier is closed even if a visit fails; the first error wins.
pub fn apply_commands(applier: &mut dyn TransactionApplier, tx: &TransactionToApply) -> KernelResult<()> {
    let mut result = Ok(());
    for command in &tx.representation().commands {
        result = applier.visit(command);
        if result.is_err() {
            break;
        }
    }
    let closed = applier.close();
    result.and(closed)
}

fn keep_first(first: &mut KernelResult<()>, next: KernelResult<()>) {
    if first.is_ok() {
        *first = next;
    }
}

/// Appliers of one transaction, started in order and closed in reverse.
pub struct TransactionApplierFacade<'a> {
    appliers: Vec<Box<dyn TransactionApplier + 'a>>,
}

impl<'a> TransactionApplierFacade<'a> {
    /// Wraps already-started appliers.
    #[must_use]
    pub fn new(appliers: Vec<Box<dyn TransactionApplier + 'a>>) -> Self {
        Self { appliers }
    }

    /// Number of wrapped appliers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.appliers.len()
    }

    /// Returns `true` if no appliers are wrapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.appliers.is_empty()
    }
}

impl TransactionApplier for TransactionApplierFacade<'_> {
    /// Every applier sees every command, in declared order.
    fn visit(&mut self, command: &StorageCommand) -> KernelResult<()> {
        let mut result = Ok(());
        for applier in &mut self.appliers {
            keep_first(&mut result, applier.visit(command));
        }
        result
    }

    /// Closes in reverse declared order; all appliers are closed.
    fn close(&mut self) -> KernelResult<()> {
        let mut result = Ok(());
        for applier in self.appliers.iter_mut().rev() {
            keep_first(&mut result, applier.close());
        }
        result
    }
}

/// Batch appliers composed in declared order.
#[derive(Clone, Default)]
pub struct BatchTransactionApplierFacade {
    appliers: Vec<Arc<dyn BatchTransactionApplier>>,
}

impl BatchTransactionApplierFacade {
    /// Composes `appliers` in the given order.
    #[must_use]
    pub fn new(appliers: Vec<Arc<dyn BatchTransactionApplier>>) -> Self {
        Self { appliers }
    }

    /// Starts `tx` on every applier in declared order.
    ///
    /// If one fails to start, those already started are closed in reverse
    /// order and the error is returned.
    pub fn start_tx_facade<'a>(
        &'a self,
        tx: &TransactionToApply,
        lock_group: &mut LockGroup,
    ) -> KernelResult<TransactionApplierFacade<'a>> {
        let mut started: Vec<Box<dyn TransactionApplier + 'a>> =
            Vec::with_capacity(self.appliers.len());
        for applier in &self.appliers {
            match applier.start_tx(tx, lock_group) {
                Ok(a) => started.push(a),
                Err(e) => {
                    for a in started.iter_mut().rev() {
                        let _ = a.close();
                    }
                    return Err(e);
                }
            }
        }
        Ok(TransactionApplierFacade::new(started))
    }
}

impl BatchTransactionApplier for BatchTransactionApplierFacade {
    fn start_tx<'a>(
        &'a self,
        tx: &TransactionToApply,
        lock_group: &mut LockGroup,
    ) -> KernelResult<Box<dyn TransactionApplier + 'a>> {
        Ok(Box::new(self.start_tx_facade(tx, lock_group)?))
    }

    /// Closes the batch on every applier in reverse order.
    fn close(&self) -> KernelResult<()> {
        let mut result = Ok(());
        for applier in self.appliers.iter().rev() {
            keep_first(&mut result, applier.close());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::command::TransactionRepresentation;
    use crate::error::KernelError;
    use crate::types::NodeId;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Named {
        name: &'static str,
        log: Log,
        fail_visit: bool,
        fail_close: bool,
    }

    impl Named {
        fn new(name: &'static str, log: &Log) -> Arc<dyn BatchTransactionApplier> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                fail_visit: false,
                fail_close: false,
            })
        }
    }

    struct NamedTx<'a> {
        owner: &'a Named,
    }

    impl BatchTransactionApplier for Named {
        fn start_tx<'a>(
            &'a self,
            _tx: &TransactionToApply,
            _lock_group: &mut LockGroup,
        ) -> KernelResult<Box<dyn TransactionApplier + 'a>> {
            self.log.lock().push(format!("start {}", self.name));
            Ok(Box::new(NamedTx { owner: self }))
        }

        fn close(&self) -> KernelResult<()> {
            self.log.lock().push(format!("batch close {}", self.name));
            Ok(())
        }
    }

    impl TransactionApplier for NamedTx<'_> {
        fn visit(&mut self, _command: &StorageCommand) -> KernelResult<()> {
            self.owner.log.lock().push(format!("visit {}", self.owner.name));
            if self.owner.fail_visit {
                return Err(KernelError::invalid_operation(self.owner.name));
            }
            Ok(())
        }

        fn close(&mut self) -> KernelResult<()> {
            self.owner.log.lock().push(format!("close {}", self.owner.name));
            if self.owner.fail_close {
                return Err(KernelError::invalid_operation(self.owner.name));
            }
            Ok(())
        }
    }

    fn one_command_tx() -> TransactionToApply {
        TransactionToApply::new(TransactionRepresentation {
            commands: vec![StorageCommand::NodeCreate { id: NodeId::new(1) }],
            ..Default::default()
        })
    }

    #[test]
    fn starts_forward_and_closes_in_reverse() {
        let log: Log = Arc::default();
        let facade = BatchTransactionApplierFacade::new(vec![
            Named::new("A", &log),
            Named::new("B", &log),
            Named::new("C", &log),
        ]);

        let mut group = LockGroup::new();
        let mut tx_facade = facade.start_tx_facade(&one_command_tx(), &mut group).unwrap();
        tx_facade.close().unwrap();

        assert_eq!(
            *log.lock(),
            vec!["start A", "start B", "start C", "close C", "close B", "close A"]
        );
    }

    #[test]
    fn every_applier_sees_every_command() {
        let log: Log = Arc::default();
        let failing: Arc<dyn BatchTransactionApplier> = Arc::new(Named {
            name: "A",
            log: Arc::clone(&log),
            fail_visit: true,
            fail_close: false,
        });
        let facade = BatchTransactionApplierFacade::new(vec![failing, Named::new("B", &log)]);

        let mut group = LockGroup::new();
        let mut applier = facade.start_tx(&one_command_tx(), &mut group).unwrap();
        let err = apply_commands(&mut *applier, &one_command_tx()).unwrap_err();

        assert!(matches!(err, KernelError::InvalidOperation { ref message } if message == "A"));
        assert_eq!(
            *log.lock(),
            vec!["start A", "start B", "visit A", "visit B", "close B", "close A"]
        );
    }

    #[test]
    fn close_failure_does_not_skip_remaining_appliers() {
        let log: Log = Arc::default();
        let failing: Arc<dyn BatchTransactionApplier> = Arc::new(Named {
            name: "C",
            log: Arc::clone(&log),
            fail_visit: false,
            fail_close: true,
        });
        let facade = BatchTransactionApplierFacade::new(vec![
            Named::new("A", &log),
            Named::new("B", &log),
            failing,
        ]);

        let mut group = LockGroup::new();
        let mut tx_facade = facade.start_tx_facade(&one_command_tx(), &mut group).unwrap();
        assert!(tx_facade.close().is_err());
        let log = log.lock();
        assert_eq!(&log[3..], ["close C", "close B", "close A"]);
    }

    #[test]
    fn batch_close_runs_in_reverse() {
        let log: Log = Arc::default();
        let facade =
            BatchTransactionApplierFacade::new(vec![Named::new("A", &log), Named::new("B", &log)]);
        BatchTransactionApplier::close(&facade).unwrap();
        assert_eq!(*log.lock(), vec!["batch close B", "batch close A"]);
    }
}
