//! A pooled kernel transaction.

use crate::apply::{
    TransactionApplicationMode, TransactionHeader, TransactionRepresentation, TransactionToApply,
};
use crate::commit::CommitEvent;
use crate::error::{KernelError, KernelResult};
use crate::locking::LockClient;
use crate::state::TransactionState;
use crate::statement::{Statement, StatementCache};
use crate::storage::{CommandCreationContext, StorageReader};
use crate::transaction::pool::Services;
use crate::transaction::statistics::{StatisticsSnapshot, TransactionStatistics};
use crate::transaction::status::TransactionStatus;
use crate::transaction::{AccessMode, TerminationReason};
use crate::types::TransactionId;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Callback run when a transaction use ends.
pub type CloseListener = Box<dyn FnOnce(&CloseOutcome) + Send>;

/// How a transaction use ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Changes were committed under this id.
    Committed(TransactionId),
    /// Committed without changes; nothing was written.
    ReadOnly,
    /// Changes were discarded.
    RolledBack,
}

impl CloseOutcome {
    /// The committed id, or [`TransactionId::READ_ONLY`].
    #[must_use]
    pub fn tx_id(self) -> TransactionId {
        match self {
            Self::Committed(id) => id,
            Self::ReadOnly | Self::RolledBack => TransactionId::READ_ONLY,
        }
    }

    /// Returns `true` unless the transaction rolled back.
    #[must_use]
    pub fn is_committed(self) -> bool {
        !matches!(self, Self::RolledBack)
    }
}

/// Which kind of write a transaction has performed so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteState {
    None,
    Data,
    Schema,
}

/// State touched only by the thread running statements or closing.
pub(crate) struct TxInner {
    pub(crate) tx_state: TransactionState,
    pub(crate) reader: Arc<dyn StorageReader>,
    pub(crate) ids: Box<dyn CommandCreationContext>,
    pub(crate) write_state: WriteState,
    pub(crate) cache: StatementCache,
}

struct Meta {
    access_mode: AccessMode,
    metadata: HashMap<String, String>,
    status_details: String,
}

/// One pooled transaction.
///
/// A `KernelTransaction` lives in a slot of [`KernelTransactions`] and is
/// reused. Each use starts with `initialize` and ends with `close`; the
/// reuse count is bumped when the use ends. Termination may be requested
/// from any thread through a [`KernelTransactionHandle`] and never waits for
/// a running statement.
///
/// [`KernelTransactions`]: crate::transaction::KernelTransactions
/// [`KernelTransactionHandle`]: crate::transaction::KernelTransactionHandle
pub struct KernelTransaction {
    services: Arc<Services>,
    slot: usize,
    reuse_count: AtomicU64,
    status: Mutex<TransactionStatus>,
    lock_client: Mutex<Option<Arc<dyn LockClient>>>,

    success: AtomicBool,
    failure: AtomicBool,
    has_written: AtomicBool,
    start_millis: AtomicU64,
    timeout_micros: AtomicU64,
    user_tx_id: AtomicU64,
    last_committed_at_start: AtomicU64,

    inner: Mutex<TxInner>,
    statistics: TransactionStatistics,
    close_listeners: Mutex<Vec<CloseListener>>,
    meta: Mutex<Meta>,
}

impl KernelTransaction {
    pub(crate) fn new(services: Arc<Services>, slot: usize) -> Self {
        let deps = &services.deps;
        let statistics = TransactionStatistics::new(
            Arc::clone(&deps.cpu_clock),
            Arc::clone(&deps.heap_allocation),
            Arc::clone(&deps.page_cursor_tracer),
            services.config.track_cpu_time,
            services.config.track_heap_allocation,
        );
        let inner = TxInner {
            tx_state: TransactionState::new(),
            reader: deps.storage.new_reader(),
            ids: deps.storage.allocate_command_creation_context(),
            write_state: WriteState::None,
            cache: StatementCache::default(),
        };
        Self {
            slot,
            reuse_count: AtomicU64::new(0),
            status: Mutex::new(TransactionStatus::new()),
            lock_client: Mutex::new(None),
            success: AtomicBool::new(false),
            failure: AtomicBool::new(false),
            has_written: AtomicBool::new(false),
            start_millis: AtomicU64::new(0),
            timeout_micros: AtomicU64::new(0),
            user_tx_id: AtomicU64::new(0),
            last_committed_at_start: AtomicU64::new(0),
            inner: Mutex::new(inner),
            statistics,
            close_listeners: Mutex::new(Vec::new()),
            meta: Mutex::new(Meta {
                access_mode: AccessMode::Read,
                metadata: HashMap::new(),
                status_details: String::new(),
            }),
            services,
        }
    }

    /// Starts a new use of this slot.
    pub(crate) fn initialize(
        &self,
        mode: AccessMode,
        timeout: Duration,
        user_tx_id: u64,
    ) -> KernelResult<()> {
        let deps = &self.services.deps;
        {
            let mut inner = self.inner.lock();
            inner.tx_state.clear();
            inner.reader = deps.storage.new_reader();
            inner.ids = deps.storage.allocate_command_creation_context();
            inner.write_state = WriteState::None;
            inner.cache.clear();
        }
        {
            let mut meta = self.meta.lock();
            meta.access_mode = mode;
            meta.metadata.clear();
            meta.status_details.clear();
        }
        self.success.store(false, Ordering::SeqCst);
        self.failure.store(false, Ordering::SeqCst);
        self.has_written.store(false, Ordering::SeqCst);
        self.start_millis.store(deps.clock.millis(), Ordering::SeqCst);
        self.timeout_micros
            .store(timeout.as_micros() as u64, Ordering::SeqCst);
        self.user_tx_id.store(user_tx_id, Ordering::SeqCst);
        self.last_committed_at_start
            .store(deps.id_store.last_committed().as_u64(), Ordering::SeqCst);
        self.statistics.init();

        let mut status = self.status.lock();
        status.init()?;
        *self.lock_client.lock() = Some(deps.locks.new_client());
        Ok(())
    }

    /// Disposes of a slot that is not in use.
    pub(crate) fn dispose(&self) {
        self.status.lock().shutdown();
    }

    // === Accessors ===

    /// Arena slot of this transaction.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Number of completed uses of this slot.
    #[must_use]
    pub fn reuse_count(&self) -> u64 {
        self.reuse_count.load(Ordering::SeqCst)
    }

    /// Id handed out by the pool when this use began.
    #[must_use]
    pub fn user_transaction_id(&self) -> u64 {
        self.user_tx_id.load(Ordering::SeqCst)
    }

    /// Start time in milliseconds.
    #[must_use]
    pub fn start_millis(&self) -> u64 {
        self.start_millis.load(Ordering::SeqCst)
    }

    /// Timeout of this use; zero means none.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_micros(self.timeout_micros.load(Ordering::SeqCst))
    }

    /// Access mode of this use.
    #[must_use]
    pub fn access_mode(&self) -> AccessMode {
        self.meta.lock().access_mode
    }

    /// Returns `true` between begin and close.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status.lock().is_open()
    }

    /// Returns `true` once the use has been closed or the slot disposed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status.lock().is_closed()
    }

    /// Why this use was terminated, if it was.
    #[must_use]
    pub fn reason_if_terminated(&self) -> Option<TerminationReason> {
        self.status.lock().termination_reason()
    }

    /// Returns `true` once a data or schema write succeeded.
    #[must_use]
    pub fn has_written(&self) -> bool {
        self.has_written.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_written(&self) {
        self.has_written.store(true, Ordering::SeqCst);
    }

    pub(crate) fn services(&self) -> &Services {
        &self.services
    }

    pub(crate) fn lock_tracer(&self) -> &TransactionStatistics {
        &self.statistics
    }

    /// Resource usage of this use so far.
    #[must_use]
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    /// Locks currently held by this use.
    #[must_use]
    pub fn active_lock_count(&self) -> usize {
        self.lock_client
            .lock()
            .as_ref()
            .map_or(0, |c| c.active_lock_count())
    }

    /// Attaches user metadata.
    pub fn set_metadata(&self, metadata: HashMap<String, String>) {
        self.meta.lock().metadata = metadata;
    }

    /// User metadata of this use.
    #[must_use]
    pub fn metadata(&self) -> HashMap<String, String> {
        self.meta.lock().metadata.clone()
    }

    /// Sets a free-form status description.
    pub fn set_status_details(&self, details: impl Into<String>) {
        self.meta.lock().status_details = details.into();
    }

    /// Free-form status description.
    #[must_use]
    pub fn status_details(&self) -> String {
        self.meta.lock().status_details.clone()
    }

    /// Registers a callback for the end of this use.
    pub fn register_close_listener(&self, listener: CloseListener) {
        self.close_listeners.lock().push(listener);
    }

    // === Statements ===

    /// Fails unless the transaction is open and not terminated.
    pub fn assert_open(&self) -> KernelResult<()> {
        let status = self.status.lock();
        if let Some(reason) = status.termination_reason() {
            return Err(KernelError::terminated(reason));
        }
        if !status.is_open() {
            return Err(KernelError::TransactionNotOpen);
        }
        Ok(())
    }

    /// Opens a statement. Only one statement can be open at a time.
    pub fn acquire_statement(&self) -> KernelResult<Statement<'_>> {
        self.assert_open()?;
        let inner = self.inner.try_lock().ok_or_else(|| {
            KernelError::invalid_operation("a statement is already open on this transaction")
        })?;
        let locks = self
            .lock_client
            .lock()
            .clone()
            .ok_or(KernelError::TransactionNotOpen)?;
        Ok(Statement::new(self, inner, locks))
    }

    /// Maps a stopped lock client to the termination that stopped it.
    pub(crate) fn translate_error(&self, err: KernelError) -> KernelError {
        match (err, self.reason_if_terminated()) {
            (KernelError::LockClientStopped, Some(reason)) => KernelError::terminated(reason),
            (err, _) => err,
        }
    }

    // === Lifecycle ===

    /// Marks the transaction to be committed on close.
    pub fn success(&self) {
        self.success.store(true, Ordering::SeqCst);
    }

    /// Marks the transaction to be rolled back on close.
    pub fn failure(&self) {
        self.failure.store(true, Ordering::SeqCst);
    }

    /// Terminates the use identified by `reuse_count`.
    ///
    /// Returns `false` if that use has already ended, the transaction was
    /// already terminated, or it has passed its commit point. Running
    /// statements observe termination at their next lock acquisition or
    /// operation; rollback happens when the owner closes.
    pub fn mark_for_termination(&self, reuse_count: u64, reason: TerminationReason) -> bool {
        if self.reuse_count() != reuse_count {
            return false;
        }
        {
            let mut status = self.status.lock();
            if self.reuse_count() != reuse_count || !status.terminate(reason) {
                return false;
            }
            self.failure.store(true, Ordering::SeqCst);
            if let Some(client) = self.lock_client.lock().as_ref() {
                client.stop();
            }
        }
        self.services
            .deps
            .monitor
            .transaction_terminated(self.has_written());
        debug!(
            slot = self.slot,
            user_tx_id = self.user_transaction_id(),
            %reason,
            "transaction marked for termination"
        );
        true
    }

    /// Marks success and closes.
    pub fn commit(&self) -> KernelResult<CloseOutcome> {
        self.success();
        self.close()
    }

    /// Marks failure and closes. Does nothing if already closed.
    pub fn rollback(&self) -> KernelResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.failure();
        self.close().map(|_| ())
    }

    /// Ends this use: commits if marked successful and nothing prevents it,
    /// otherwise rolls back.
    ///
    /// Locks are released and the slot is returned to the pool whatever the
    /// outcome.
    pub fn close(&self) -> KernelResult<CloseOutcome> {
        let inner = self.inner.try_lock().ok_or_else(|| {
            KernelError::invalid_operation("cannot close a transaction while a statement is open")
        })?;
        let termination = {
            let mut status = self.status.lock();
            status.closing()?;
            status.termination_reason()
        };
        let success = self.success.load(Ordering::SeqCst);
        let failure = self.failure.load(Ordering::SeqCst);
        let is_write = self.has_written();

        let result = if success && !failure && termination.is_none() {
            self.commit_changes(&inner)
        } else {
            self.rollback_result(success, failure, termination)
        };
        if let Err(err) = &result {
            debug!(slot = self.slot, error = %err, "transaction rolled back");
        }

        let committed = matches!(result, Ok(outcome) if outcome.is_committed());
        self.services
            .deps
            .monitor
            .transaction_finished(committed, is_write);
        self.release(inner, &result);
        result
    }

    fn rollback_result(
        &self,
        success: bool,
        failure: bool,
        termination: Option<TerminationReason>,
    ) -> KernelResult<CloseOutcome> {
        match termination {
            Some(reason) if success => {
                warn!(slot = self.slot, %reason, "terminated transaction rolled back instead of committing");
                Err(KernelError::terminated(reason))
            }
            _ if success && failure => Err(KernelError::TransactionMarkedAsFailed),
            _ => {
                debug!(slot = self.slot, "transaction rolled back");
                Ok(CloseOutcome::RolledBack)
            }
        }
    }

    fn commit_changes(&self, inner: &TxInner) -> KernelResult<CloseOutcome> {
        self.status.lock().begin_commit()?;
        if !inner.tx_state.has_changes() {
            return Ok(CloseOutcome::ReadOnly);
        }

        let deps = &self.services.deps;
        let locks = self
            .lock_client
            .lock()
            .clone()
            .ok_or(KernelError::TransactionNotOpen)?;
        let last_committed =
            TransactionId::new(self.last_committed_at_start.load(Ordering::SeqCst));

        let mut commands = Vec::new();
        deps.storage.create_commands(
            &mut commands,
            &inner.tx_state,
            &*inner.reader,
            &*locks,
            last_committed,
        )?;
        let header = TransactionHeader {
            start_millis: self.start_millis(),
            commit_millis: deps.clock.millis(),
            last_committed_at_start: last_committed,
        };
        let batch = vec![TransactionToApply::new(TransactionRepresentation::new(
            commands, header,
        ))];

        let mut event = CommitEvent::default();
        let tx_id = deps
            .commit_process
            .commit(batch, &mut event, TransactionApplicationMode::Internal)?;
        debug!(slot = self.slot, %tx_id, "transaction committed");
        Ok(CloseOutcome::Committed(tx_id))
    }

    fn release(&self, mut inner: MutexGuard<'_, TxInner>, result: &KernelResult<CloseOutcome>) {
        let outcome = match result {
            Ok(outcome) => *outcome,
            Err(_) => CloseOutcome::RolledBack,
        };
        let listeners = std::mem::take(&mut *self.close_listeners.lock());
        for listener in listeners {
            listener(&outcome);
        }

        if let Some(client) = self.lock_client.lock().take() {
            client.close();
        }
        inner.tx_state.clear();
        inner.cache.clear();
        drop(inner);
        self.statistics.reset();

        let mut status = self.status.lock();
        self.reuse_count.fetch_add(1, Ordering::SeqCst);
        if self.services.release(self.slot) {
            status.closed();
        } else {
            status.shutdown();
        }
    }
}

impl std::fmt::Debug for KernelTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelTransaction")
            .field("slot", &self.slot)
            .field("reuse_count", &self.reuse_count())
            .field("status", &*self.status.lock())
            .finish_non_exhaustive()
    }
}
