//! Kernel fixtures and recording doubles.
//!
//! Provides kernels whose clock only moves when a test says so, plus
//! monitors and appliers that record what the kernel asked of them.

use graphtx_kernel::apply::{BatchTransactionApplier, LockGroup, StorageCommand, TransactionApplier, TransactionToApply};
use graphtx_kernel::transaction::{FakeClock, TransactionMonitor};
use graphtx_kernel::{AccessMode, Kernel, KernelConfig, KernelResult, NodeId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A kernel on a [`FakeClock`].
pub struct TestKernel {
    /// The kernel instance.
    pub kernel: Kernel,
    /// The clock the kernel's transactions read.
    pub clock: Arc<FakeClock>,
}

impl TestKernel {
    /// Creates a kernel with the default configuration.
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    /// Creates a kernel with `config`.
    pub fn with_config(config: KernelConfig) -> Self {
        let clock = Arc::new(FakeClock::new(0));
        Self {
            kernel: Kernel::in_memory_with_clock(config, clock.clone()),
            clock,
        }
    }

    /// Moves the kernel's clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.forward(by);
    }
}

impl Default for TestKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestKernel {
    type Target = Kernel;

    fn deref(&self) -> &Self::Target {
        &self.kernel
    }
}

/// Runs a test against a fresh kernel.
///
/// # Example
///
/// ```rust,ignore
/// use graphtx_testkit::with_kernel;
///
/// #[test]
/// fn my_test() {
///     with_kernel(|kernel| {
///         let tx = kernel.begin_transaction(AccessMode::Write).unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_kernel<F, R>(f: F) -> R
where
    F: FnOnce(&TestKernel) -> R,
{
    let kernel = TestKernel::new();
    f(&kernel)
}

/// Commits `count` nodes labelled `Item`, each in its own transaction.
pub fn populate(kernel: &Kernel, count: usize) -> Vec<NodeId> {
    (0..count)
        .map(|i| {
            kernel
                .transaction(AccessMode::Write, |stmt| {
                    let label = stmt.label_get_or_create("Item")?;
                    let key = stmt.property_key_get_or_create("index")?;
                    let node = stmt.node_create()?;
                    stmt.node_add_label(node, label)?;
                    stmt.node_set_property(node, key, i as i64)?;
                    Ok(node)
                })
                .expect("Failed to create node")
        })
        .collect()
}

/// Commits one relationship of type `LINK` between every consecutive pair
/// of `nodes`.
pub fn chain(kernel: &Kernel, nodes: &[NodeId]) {
    for pair in nodes.windows(2) {
        kernel
            .transaction(AccessMode::Write, |stmt| {
                let link = stmt.relationship_type_get_or_create("LINK")?;
                stmt.relationship_create(link, pair[0], pair[1])?;
                Ok(())
            })
            .expect("Failed to create relationship");
    }
}

/// A lifecycle callback seen by a [`RecordingMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// A transaction began.
    Started,
    /// A transaction ended.
    Finished {
        /// Whether it committed.
        committed: bool,
        /// Whether it wrote.
        is_write: bool,
    },
    /// A transaction was marked for termination.
    Terminated {
        /// Whether it wrote.
        is_write: bool,
    },
}

/// A [`TransactionMonitor`] that keeps every callback.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<MonitorEvent>>,
}

impl RecordingMonitor {
    /// Creates an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events so far, oldest first.
    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().clone()
    }
}

impl TransactionMonitor for RecordingMonitor {
    fn transaction_started(&self) {
        self.events.lock().push(MonitorEvent::Started);
    }

    fn transaction_finished(&self, committed: bool, is_write: bool) {
        self.events
            .lock()
            .push(MonitorEvent::Finished { committed, is_write });
    }

    fn transaction_terminated(&self, is_write: bool) {
        self.events.lock().push(MonitorEvent::Terminated { is_write });
    }
}

/// Shared, ordered log of applier calls.
pub type ApplierLog = Arc<Mutex<Vec<String>>>;

/// A [`BatchTransactionApplier`] that logs its calls as `"<name>:<call>"`.
///
/// Calls are `start:<tx>`, `visit:<tx>`, `close:<tx>` and `batch-close`.
pub struct RecordingApplier {
    name: &'static str,
    log: ApplierLog,
    fail_on_start: bool,
}

impl RecordingApplier {
    /// Creates an applier writing to `log`.
    pub fn new(name: &'static str, log: ApplierLog) -> Self {
        Self {
            name,
            log,
            fail_on_start: false,
        }
    }

    /// Creates an applier that refuses to start any transaction.
    pub fn failing(name: &'static str, log: ApplierLog) -> Self {
        Self {
            fail_on_start: true,
            ..Self::new(name, log)
        }
    }

    fn record(&self, call: String) {
        self.log.lock().push(format!("{}:{}", self.name, call));
    }
}

impl BatchTransactionApplier for RecordingApplier {
    fn start_tx<'a>(
        &'a self,
        tx: &TransactionToApply,
        _lock_group: &mut LockGroup,
    ) -> KernelResult<Box<dyn TransactionApplier + 'a>> {
        let tx_id = tx.tx_id().as_u64();
        if self.fail_on_start {
            self.record(format!("refuse:{tx_id}"));
            return Err(graphtx_kernel::KernelError::invalid_operation("applier refused"));
        }
        self.record(format!("start:{tx_id}"));
        Ok(Box::new(RecordingTxApplier {
            parent: self,
            tx_id,
        }))
    }

    fn close(&self) -> KernelResult<()> {
        self.record("batch-close".to_string());
        Ok(())
    }
}

struct RecordingTxApplier<'a> {
    parent: &'a RecordingApplier,
    tx_id: u64,
}

impl TransactionApplier for RecordingTxApplier<'_> {
    fn visit(&mut self, _command: &StorageCommand) -> KernelResult<()> {
        self.parent.record(format!("visit:{}", self.tx_id));
        Ok(())
    }

    fn close(&mut self) -> KernelResult<()> {
        self.parent.record(format!("close:{}", self.tx_id));
        Ok(())
    }
}
