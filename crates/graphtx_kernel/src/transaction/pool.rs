//! The transaction pool and registry.

use crate::commit::{TransactionCommitProcess, TransactionIdStore};
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::locking::Locks;
use crate::statement::StatementPipeline;
use crate::storage::StorageEngine;
use crate::tokens::TokenRegistry;
use crate::transaction::clock::{Clock, SystemClock};
use crate::transaction::handle::KernelTransactionHandle;
use crate::transaction::kernel_transaction::KernelTransaction;
use crate::transaction::monitor::{NoopTransactionMonitor, TransactionMonitor};
use crate::transaction::statistics::{
    CpuClock, HeapAllocationSampler, NoopCpuClock, NoopHeapAllocation, NoopPageCursorTracer,
    PageCursorTracer,
};
use crate::transaction::{AccessMode, TerminationReason};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::debug;

/// Collaborators shared by every transaction.
#[derive(Clone)]
pub struct TransactionDependencies {
    /// Storage engine.
    pub storage: Arc<dyn StorageEngine>,
    /// Commit process.
    pub commit_process: Arc<dyn TransactionCommitProcess>,
    /// Lock service.
    pub locks: Arc<dyn Locks>,
    /// Committed transaction ids.
    pub id_store: Arc<dyn TransactionIdStore>,
    /// Token registry.
    pub tokens: Arc<TokenRegistry>,
    /// Lifecycle monitor.
    pub monitor: Arc<dyn TransactionMonitor>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
    /// CPU time sampler.
    pub cpu_clock: Arc<dyn CpuClock>,
    /// Heap allocation sampler.
    pub heap_allocation: Arc<dyn HeapAllocationSampler>,
    /// Page cache tracer.
    pub page_cursor_tracer: Arc<dyn PageCursorTracer>,
}

impl TransactionDependencies {
    /// Creates dependencies with no-op monitors and the system clock.
    pub fn new(
        storage: Arc<dyn StorageEngine>,
        commit_process: Arc<dyn TransactionCommitProcess>,
        locks: Arc<dyn Locks>,
        id_store: Arc<dyn TransactionIdStore>,
    ) -> Self {
        Self {
            storage,
            commit_process,
            locks,
            id_store,
            tokens: Arc::new(TokenRegistry::new()),
            monitor: Arc::new(NoopTransactionMonitor),
            clock: Arc::new(SystemClock),
            cpu_clock: Arc::new(NoopCpuClock),
            heap_allocation: Arc::new(NoopHeapAllocation),
            page_cursor_tracer: Arc::new(NoopPageCursorTracer),
        }
    }

    /// Uses `tokens` as the token registry.
    #[must_use]
    pub fn with_tokens(mut self, tokens: Arc<TokenRegistry>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Uses `monitor` as the lifecycle monitor.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<dyn TransactionMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Uses `clock` as the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Uses `cpu_clock` for CPU time statistics.
    #[must_use]
    pub fn with_cpu_clock(mut self, cpu_clock: Arc<dyn CpuClock>) -> Self {
        self.cpu_clock = cpu_clock;
        self
    }

    /// Uses `heap` for heap allocation statistics.
    #[must_use]
    pub fn with_heap_allocation(mut self, heap: Arc<dyn HeapAllocationSampler>) -> Self {
        self.heap_allocation = heap;
        self
    }

    /// Uses `tracer` for page cache statistics.
    #[must_use]
    pub fn with_page_cursor_tracer(mut self, tracer: Arc<dyn PageCursorTracer>) -> Self {
        self.page_cursor_tracer = tracer;
        self
    }
}

#[derive(Default)]
struct Registry {
    free: Vec<usize>,
    active: BTreeSet<usize>,
    stopped: bool,
    shut_down: bool,
    blocked_by: Option<ThreadId>,
}

/// State shared between the pool and its transactions.
pub(crate) struct Services {
    pub(crate) deps: TransactionDependencies,
    pub(crate) config: KernelConfig,
    pub(crate) pipeline: StatementPipeline,
    registry: Mutex<Registry>,
    next_user_tx_id: AtomicU64,
}

impl Services {
    /// Returns a slot after its use ended. Returns `false` if the pool is
    /// shut down and the slot must be disposed.
    pub(crate) fn release(&self, slot: usize) -> bool {
        let mut registry = self.registry.lock();
        registry.active.remove(&slot);
        if registry.shut_down {
            return false;
        }
        registry.free.push(slot);
        true
    }
}

/// Transactions that were active at some point in time.
#[derive(Debug, Clone)]
pub struct TransactionsSnapshot {
    handles: Vec<KernelTransactionHandle>,
}

impl TransactionsSnapshot {
    /// Returns `true` once every transaction in the snapshot has ended.
    #[must_use]
    pub fn all_closed(&self) -> bool {
        self.handles.iter().all(|h| !h.is_open())
    }

    /// Number of transactions in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if no transactions were active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Pool and registry of kernel transactions.
///
/// Slots are created on demand up to `max_concurrent_transactions` and
/// reused after their transaction closes.
pub struct KernelTransactions {
    services: Arc<Services>,
    slots: RwLock<Vec<Arc<KernelTransaction>>>,
}

impl KernelTransactions {
    /// Creates a pool with the standard statement pipeline.
    pub fn new(deps: TransactionDependencies, config: KernelConfig) -> Self {
        let pipeline = StatementPipeline::standard(&config);
        Self::with_pipeline(deps, config, pipeline)
    }

    /// Creates a pool with a custom statement pipeline.
    pub fn with_pipeline(
        deps: TransactionDependencies,
        config: KernelConfig,
        pipeline: StatementPipeline,
    ) -> Self {
        Self {
            services: Arc::new(Services {
                deps,
                config,
                pipeline,
                registry: Mutex::new(Registry::default()),
                next_user_tx_id: AtomicU64::new(1),
            }),
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Shared collaborators.
    #[must_use]
    pub fn dependencies(&self) -> &TransactionDependencies {
        &self.services.deps
    }

    /// Begins a transaction. `timeout` overrides the configured default.
    pub fn begin(
        &self,
        mode: AccessMode,
        timeout: Option<Duration>,
    ) -> KernelResult<Arc<KernelTransaction>> {
        let slot = self.claim_slot()?;
        let tx = {
            let slots = self.slots.read();
            Arc::clone(&slots[slot])
        };
        let timeout = timeout.unwrap_or(self.services.config.transaction_timeout);
        let user_tx_id = self.services.next_user_tx_id.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = tx.initialize(mode, timeout, user_tx_id) {
            self.services.release(slot);
            return Err(e);
        }
        self.services.deps.monitor.transaction_started();
        debug!(slot, user_tx_id, %mode, "transaction started");
        Ok(tx)
    }

    fn claim_slot(&self) -> KernelResult<usize> {
        let mut registry = self.services.registry.lock();
        if registry.shut_down || registry.stopped {
            return Err(KernelError::Shutdown);
        }
        if let Some(owner) = registry.blocked_by {
            if owner != thread::current().id() {
                return Err(KernelError::NewTransactionsBlocked);
            }
        }
        let max = self.services.config.max_concurrent_transactions;
        if max > 0 && registry.active.len() >= max {
            return Err(KernelError::MaxActiveTransactionsReached { max });
        }
        let slot = match registry.free.pop() {
            Some(slot) => slot,
            None => {
                let mut slots = self.slots.write();
                let slot = slots.len();
                slots.push(Arc::new(KernelTransaction::new(
                    Arc::clone(&self.services),
                    slot,
                )));
                slot
            }
        };
        registry.active.insert(slot);
        Ok(slot)
    }

    /// Handles to every open transaction.
    #[must_use]
    pub fn active_transactions(&self) -> Vec<KernelTransactionHandle> {
        let active: Vec<usize> = self.services.registry.lock().active.iter().copied().collect();
        let slots = self.slots.read();
        active
            .into_iter()
            .filter_map(|slot| slots.get(slot))
            .map(KernelTransactionHandle::new)
            .filter(KernelTransactionHandle::is_open)
            .collect()
    }

    /// Number of open transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.services.registry.lock().active.len()
    }

    /// Number of slots created so far.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    /// Captures the currently open transactions.
    #[must_use]
    pub fn snapshot(&self) -> TransactionsSnapshot {
        TransactionsSnapshot {
            handles: self.active_transactions(),
        }
    }

    /// Terminates every open transaction. Returns how many were terminated.
    pub fn terminate_all(&self, reason: TerminationReason) -> usize {
        self.active_transactions()
            .iter()
            .filter(|h| h.mark_for_termination(reason))
            .count()
    }

    /// Refuses new transactions until [`start`](Self::start).
    pub fn stop(&self) {
        self.services.registry.lock().stopped = true;
    }

    /// Accepts new transactions again after [`stop`](Self::stop).
    pub fn start(&self) {
        self.services.registry.lock().stopped = false;
    }

    /// Terminates every open transaction and disposes of idle slots.
    ///
    /// Slots still in use are disposed when their transaction closes.
    pub fn shutdown(&self) {
        let free = {
            let mut registry = self.services.registry.lock();
            registry.stopped = true;
            registry.shut_down = true;
            std::mem::take(&mut registry.free)
        };
        let terminated = self.terminate_all(TerminationReason::DatabaseShutdown);
        let slots = self.slots.read();
        for slot in free {
            if let Some(tx) = slots.get(slot) {
                tx.dispose();
            }
        }
        debug!(terminated, "transaction pool shut down");
    }

    /// Blocks other threads from beginning transactions.
    pub fn block_new_transactions(&self) -> KernelResult<()> {
        let mut registry = self.services.registry.lock();
        let me = thread::current().id();
        match registry.blocked_by {
            Some(owner) if owner != me => Err(KernelError::invalid_operation(
                "new transactions are already blocked by another thread",
            )),
            _ => {
                registry.blocked_by = Some(me);
                Ok(())
            }
        }
    }

    /// Lifts a block set by the current thread.
    pub fn unblock_new_transactions(&self) -> KernelResult<()> {
        let mut registry = self.services.registry.lock();
        if registry.blocked_by != Some(thread::current().id()) {
            return Err(KernelError::invalid_operation(
                "new transactions can only be unblocked by the thread that blocked them",
            ));
        }
        registry.blocked_by = None;
        Ok(())
    }
}

impl std::fmt::Debug for KernelTransactions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelTransactions")
            .field("slots", &self.slot_count())
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;

    fn kernel(max: usize) -> Kernel {
        Kernel::in_memory(KernelConfig::default().max_concurrent_transactions(max))
    }

    #[test]
    fn closed_slots_are_reused() {
        let kernel = kernel(4);
        let pool = kernel.transactions();
        let first = pool.begin(AccessMode::Read, None).unwrap();
        first.close().unwrap();
        let second = pool.begin(AccessMode::Read, None).unwrap();

        assert_eq!(pool.slot_count(), 1);
        assert_eq!(second.slot(), first.slot());
        assert!(second.user_transaction_id() > 1);
        second.close().unwrap();
    }

    #[test]
    fn begin_fails_at_the_limit() {
        let kernel = kernel(2);
        let pool = kernel.transactions();
        let a = pool.begin(AccessMode::Read, None).unwrap();
        let _b = pool.begin(AccessMode::Read, None).unwrap();
        assert!(matches!(
            pool.begin(AccessMode::Read, None),
            Err(KernelError::MaxActiveTransactionsReached { max: 2 })
        ));

        a.close().unwrap();
        assert!(pool.begin(AccessMode::Read, None).is_ok());
    }

    #[test]
    fn zero_limit_means_unbounded() {
        let kernel = kernel(0);
        let txs: Vec<_> = (0..16)
            .map(|_| kernel.transactions().begin(AccessMode::Read, None).unwrap())
            .collect();
        assert_eq!(kernel.transactions().active_count(), 16);
        for tx in txs {
            tx.close().unwrap();
        }
    }

    #[test]
    fn timeout_override_wins_over_config() {
        let kernel = Kernel::in_memory(
            KernelConfig::default().transaction_timeout(Duration::from_secs(30)),
        );
        let pool = kernel.transactions();
        let default = pool.begin(AccessMode::Read, None).unwrap();
        let custom = pool
            .begin(AccessMode::Read, Some(Duration::from_millis(5)))
            .unwrap();
        assert_eq!(default.timeout(), Duration::from_secs(30));
        assert_eq!(custom.timeout(), Duration::from_millis(5));
        default.close().unwrap();
        custom.close().unwrap();
    }

    #[test]
    fn blocking_only_affects_other_threads() {
        let kernel = Arc::new(kernel(8));
        kernel.transactions().block_new_transactions().unwrap();
        kernel
            .transactions()
            .begin(AccessMode::Read, None)
            .unwrap()
            .close()
            .unwrap();

        let other = Arc::clone(&kernel);
        let refused = thread::spawn(move || {
            matches!(
                other.transactions().begin(AccessMode::Read, None),
                Err(KernelError::NewTransactionsBlocked)
            )
        })
        .join()
        .unwrap();
        assert!(refused);

        kernel.transactions().unblock_new_transactions().unwrap();
        assert!(kernel.transactions().unblock_new_transactions().is_err());
    }

    #[test]
    fn stop_and_start() {
        let kernel = kernel(8);
        let pool = kernel.transactions();
        pool.stop();
        assert!(matches!(
            pool.begin(AccessMode::Read, None),
            Err(KernelError::Shutdown)
        ));
        pool.start();
        pool.begin(AccessMode::Read, None).unwrap().close().unwrap();
    }

    #[test]
    fn snapshot_tracks_transactions_until_they_close() {
        let kernel = kernel(8);
        let pool = kernel.transactions();
        let a = pool.begin(AccessMode::Read, None).unwrap();
        let b = pool.begin(AccessMode::Write, None).unwrap();
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.len(), 2);

        a.close().unwrap();
        assert!(!snapshot.all_closed());
        b.close().unwrap();
        assert!(snapshot.all_closed());
        assert!(pool.snapshot().is_empty());
    }

    #[test]
    fn shutdown_terminates_open_transactions() {
        let kernel = kernel(8);
        let pool = kernel.transactions();
        let open = pool.begin(AccessMode::Write, None).unwrap();
        let idle = pool.begin(AccessMode::Read, None).unwrap();
        idle.close().unwrap();

        pool.shutdown();
        assert_eq!(
            open.reason_if_terminated(),
            Some(TerminationReason::DatabaseShutdown)
        );
        open.rollback().unwrap();
        assert!(open.is_closed());
        assert!(idle.is_closed());
        assert!(matches!(
            pool.begin(AccessMode::Read, None),
            Err(KernelError::Shutdown)
        ));
    }
}
