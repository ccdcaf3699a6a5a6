//! The kernel facade.

use crate::apply::{
    IdOrderingQueue, TransactionApplicationMode, TransactionQueue, TransactionRepresentation,
    TransactionToApply,
};
use crate::commit::{
    decode_entries, encode_entry, BatchingTransactionAppender, CommitEvent, InMemoryLogWriter,
    InMemoryTransactionIdStore, TransactionCommitProcess, TransactionIdStore,
    TransactionLogWriter, TransactionRepresentationCommitProcess,
};
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::locking::LockManager;
use crate::state::Difference;
use crate::statement::Statement;
use crate::storage::StorageEngine;
use crate::store::{GraphStore, MemoryStorageEngine};
use crate::tokens::TokenRegistry;
use crate::transaction::{
    AccessMode, Clock, KernelTransaction, KernelTransactions, SystemClock, TimeoutMonitor,
    PageCursorTracer, TimeoutMonitorHandle, TransactionCounters, TransactionDependencies,
    TransactionMonitor,
};
use crate::types::TransactionId;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// An in-memory graph transaction kernel.
///
/// Wires the transaction pool, the lock manager, the reference store and the
/// commit pipeline together from a [`KernelConfig`].
///
/// ```rust,ignore
/// use graphtx_kernel::{AccessMode, Kernel, KernelConfig};
///
/// let kernel = Kernel::in_memory(KernelConfig::default());
/// let node = kernel.transaction(AccessMode::Write, |stmt| {
///     let person = stmt.label_get_or_create("Person")?;
///     let node = stmt.node_create()?;
///     stmt.node_add_label(node, person)?;
///     Ok(node)
/// })?;
/// ```
pub struct Kernel {
    config: KernelConfig,
    store: Arc<GraphStore>,
    storage: Arc<MemoryStorageEngine>,
    log: Arc<InMemoryLogWriter>,
    id_store: Arc<InMemoryTransactionIdStore>,
    commit_process: Arc<TransactionRepresentationCommitProcess>,
    transactions: Arc<KernelTransactions>,
    counters: Arc<TransactionCounters>,
    timeout_monitor: Mutex<Option<TimeoutMonitorHandle>>,
    is_open: RwLock<bool>,
}

impl Kernel {
    /// Creates a kernel using the system clock.
    #[must_use]
    pub fn in_memory(config: KernelConfig) -> Self {
        Self::in_memory_with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a kernel whose transaction start times and timeouts follow
    /// `clock`.
    #[must_use]
    pub fn in_memory_with_clock(config: KernelConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(GraphStore::new());
        let ordering = Arc::new(IdOrderingQueue::new(config.explicit_index_ordering_capacity));
        let storage = Arc::new(MemoryStorageEngine::new(
            Arc::clone(&store),
            Arc::clone(&ordering),
        ));
        let log = Arc::new(InMemoryLogWriter::new());
        let id_store = Arc::new(InMemoryTransactionIdStore::new());
        let appender = Arc::new(BatchingTransactionAppender::new(
            Arc::clone(&log) as Arc<dyn TransactionLogWriter>,
            Arc::clone(&id_store) as Arc<dyn TransactionIdStore>,
            ordering,
        ));
        let commit_process = Arc::new(TransactionRepresentationCommitProcess::new(
            appender,
            Arc::clone(&storage) as Arc<dyn StorageEngine>,
            Arc::clone(&id_store) as Arc<dyn TransactionIdStore>,
        ));
        let locks = Arc::new(LockManager::new(config.lock_acquisition_timeout));
        let counters = Arc::new(TransactionCounters::new());

        let deps = TransactionDependencies::new(
            Arc::clone(&storage) as Arc<dyn StorageEngine>,
            Arc::clone(&commit_process) as Arc<dyn TransactionCommitProcess>,
            locks,
            Arc::clone(&id_store) as Arc<dyn TransactionIdStore>,
        )
        .with_monitor(Arc::clone(&counters) as Arc<dyn TransactionMonitor>)
        .with_clock(clock)
        .with_page_cursor_tracer(Arc::clone(&store) as Arc<dyn PageCursorTracer>);
        let transactions = Arc::new(KernelTransactions::new(deps, config.clone()));

        Self {
            config,
            store,
            storage,
            log,
            id_store,
            commit_process,
            transactions,
            counters,
            timeout_monitor: Mutex::new(None),
            is_open: RwLock::new(true),
        }
    }

    fn ensure_open(&self) -> KernelResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(KernelError::Shutdown)
        }
    }

    // === Transactions ===

    /// Begins a transaction with the configured timeout.
    pub fn begin_transaction(&self, mode: AccessMode) -> KernelResult<Arc<KernelTransaction>> {
        self.ensure_open()?;
        self.transactions.begin(mode, None)
    }

    /// Begins a transaction with its own timeout.
    pub fn begin_transaction_with_timeout(
        &self,
        mode: AccessMode,
        timeout: Duration,
    ) -> KernelResult<Arc<KernelTransaction>> {
        self.ensure_open()?;
        self.transactions.begin(mode, Some(timeout))
    }

    /// Runs `f` in one statement of a new transaction.
    ///
    /// Commits if `f` returns `Ok`, rolls back otherwise.
    pub fn transaction<F, T>(&self, mode: AccessMode, f: F) -> KernelResult<T>
    where
        F: FnOnce(&mut Statement<'_>) -> KernelResult<T>,
    {
        let tx = self.begin_transaction(mode)?;
        let result = tx.acquire_statement().and_then(|mut statement| {
            let value = f(&mut statement)?;
            statement.close()?;
            Ok(value)
        });
        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(close_err) = tx.rollback() {
                    debug!(error = %close_err, "rollback after failed transaction body failed");
                }
                Err(err)
            }
        }
    }

    /// The transaction pool.
    #[must_use]
    pub fn transactions(&self) -> &Arc<KernelTransactions> {
        &self.transactions
    }

    /// Lifecycle counters.
    #[must_use]
    pub fn counters(&self) -> &Arc<TransactionCounters> {
        &self.counters
    }

    /// The token registry.
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenRegistry> {
        &self.transactions.dependencies().tokens
    }

    /// Starts the background timeout monitor. Does nothing if it runs
    /// already.
    pub fn start_timeout_monitor(&self) -> KernelResult<()> {
        self.ensure_open()?;
        let mut monitor = self.timeout_monitor.lock();
        if monitor.is_none() {
            let handle = TimeoutMonitor::new(Arc::clone(&self.transactions))
                .spawn(self.config.timeout_monitor_interval)?;
            *monitor = Some(handle);
        }
        Ok(())
    }

    /// Runs one timeout scan on the calling thread. Returns how many
    /// transactions were terminated.
    pub fn check_timeouts(&self) -> usize {
        TimeoutMonitor::new(Arc::clone(&self.transactions)).run()
    }

    // === Store ===

    /// The committed graph.
    #[must_use]
    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Compares stored counts with a recount of the records.
    #[must_use]
    pub fn verify_counts(&self) -> Vec<Difference> {
        self.store.verify_counts()
    }

    /// Highest committed transaction id.
    #[must_use]
    pub fn last_committed_transaction_id(&self) -> TransactionId {
        self.id_store.last_committed()
    }

    /// Highest transaction id up to which everything has been applied.
    #[must_use]
    pub fn last_closed_transaction_id(&self) -> TransactionId {
        self.id_store.last_closed()
    }

    /// A copy of the transaction log.
    #[must_use]
    pub fn log_bytes(&self) -> Vec<u8> {
        self.log.data()
    }

    /// Replays a transaction log produced by another kernel.
    ///
    /// Entries at or below the last committed id are skipped. Replayed
    /// transactions keep their ids, are copied into this kernel's log and
    /// are applied in recovery mode. Returns how many were replayed.
    pub fn recover(&self, log: &[u8]) -> KernelResult<usize> {
        self.ensure_open()?;
        if self.transactions.active_count() > 0 {
            return Err(KernelError::invalid_operation(
                "cannot recover while transactions are open",
            ));
        }
        let entries = decode_entries(log)?;
        let mut last = self.id_store.last_committed();
        let mut recovered = 0;
        let mut queue = TransactionQueue::new(
            self.config.transaction_queue_batch_size,
            |batch: Vec<TransactionToApply>| self.replay(batch),
        );
        for entry in entries {
            if entry.tx_id <= last {
                continue;
            }
            last = entry.tx_id;
            queue.queue(TransactionToApply::with_id(entry.representation, entry.tx_id))?;
            recovered += 1;
        }
        queue.empty()?;
        debug!(recovered, last_tx_id = %last, "transaction log replayed");
        Ok(recovered)
    }

    fn replay(&self, batch: Vec<TransactionToApply>) -> KernelResult<()> {
        for tx in &batch {
            self.log.append(&encode_entry(tx.tx_id(), tx.representation())?)?;
            self.id_store.transaction_committed(tx.tx_id());
        }
        self.log.flush()?;
        self.storage
            .apply(&batch, TransactionApplicationMode::Recovery)?;
        for tx in &batch {
            self.id_store.transaction_closed(tx.tx_id());
        }
        Ok(())
    }

    /// Commits transactions that were created elsewhere.
    ///
    /// They are batched by the configured queue size, capped at the explicit
    /// index ordering capacity, and committed in external mode. Returns the
    /// id of the last one.
    pub fn apply_external(
        &self,
        transactions: Vec<TransactionRepresentation>,
    ) -> KernelResult<TransactionId> {
        self.ensure_open()?;
        let batch_size = self
            .config
            .transaction_queue_batch_size
            .min(self.config.explicit_index_ordering_capacity);
        let mut last = TransactionId::READ_ONLY;
        {
            let mut queue = TransactionQueue::new(batch_size, |batch: Vec<TransactionToApply>| -> KernelResult<()> {
                let mut event = CommitEvent::default();
                last = self.commit_process.commit(
                    batch,
                    &mut event,
                    TransactionApplicationMode::External,
                )?;
                Ok(())
            });
            for representation in transactions {
                queue.queue(TransactionToApply::new(representation))?;
            }
            queue.empty()?;
        }
        Ok(last)
    }

    // === Lifecycle ===

    /// Returns `true` until [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Stops the timeout monitor, terminates open transactions and refuses
    /// new ones.
    pub fn shutdown(&self) -> KernelResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        if let Some(monitor) = self.timeout_monitor.lock().take() {
            monitor.stop();
        }
        self.transactions.shutdown();
        self.log.flush()?;
        *is_open = false;
        debug!("kernel shut down");
        Ok(())
    }

    /// Configuration of this kernel.
    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("is_open", &self.is_open())
            .field("active_transactions", &self.transactions.active_count())
            .field("last_committed", &self.last_committed_transaction_id())
            .finish_non_exhaustive()
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::FakeClock;
    use crate::types::Value;

    fn kernel() -> Kernel {
        Kernel::in_memory(KernelConfig::default())
    }

    #[test]
    fn committed_writes_are_visible_to_later_transactions() {
        let kernel = kernel();
        let (node, name) = kernel
            .transaction(AccessMode::Write, |stmt| {
                let name = stmt.property_key_get_or_create("name")?;
                let node = stmt.node_create()?;
                stmt.node_set_property(node, name, "ada")?;
                Ok((node, name))
            })
            .unwrap();

        let value = kernel
            .transaction(AccessMode::Read, |stmt| stmt.node_property(node, name))
            .unwrap();
        assert_eq!(value, Some(Value::from("ada")));
        assert_eq!(kernel.last_committed_transaction_id(), TransactionId::FIRST);
        assert_eq!(kernel.last_closed_transaction_id(), TransactionId::FIRST);
        assert!(kernel.verify_counts().is_empty());
    }

    #[test]
    fn failed_body_rolls_back() {
        let kernel = kernel();
        let err = kernel
            .transaction(AccessMode::Write, |stmt| {
                stmt.node_create()?;
                Err::<(), _>(KernelError::invalid_operation("boom"))
            })
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidOperation { .. }));
        assert_eq!(kernel.store().node_total(), 0);
        assert_eq!(kernel.counters().rolled_back(), 1);
        assert_eq!(kernel.transactions().active_count(), 0);
    }

    #[test]
    fn check_timeouts_uses_the_kernel_clock() {
        let clock = Arc::new(FakeClock::new(0));
        let kernel = Kernel::in_memory_with_clock(KernelConfig::default(), clock.clone());
        let tx = kernel
            .begin_transaction_with_timeout(AccessMode::Read, Duration::from_secs(1))
            .unwrap();

        assert_eq!(kernel.check_timeouts(), 0);
        clock.forward(Duration::from_secs(2));
        assert_eq!(kernel.check_timeouts(), 1);
        assert!(tx.reason_if_terminated().is_some());
        tx.rollback().unwrap();
    }

    #[test]
    fn shutdown_refuses_new_transactions() {
        let kernel = kernel();
        kernel.start_timeout_monitor().unwrap();
        kernel.shutdown().unwrap();
        assert!(!kernel.is_open());
        assert!(matches!(
            kernel.begin_transaction(AccessMode::Read),
            Err(KernelError::Shutdown)
        ));
    }
}
