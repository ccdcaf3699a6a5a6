//! Integration tests for the transaction lifecycle and the pool.

use graphtx_kernel::apply::IdOrderingQueue;
use graphtx_kernel::commit::{
    BatchingTransactionAppender, InMemoryLogWriter, InMemoryTransactionIdStore,
    TransactionRepresentationCommitProcess,
};
use graphtx_kernel::locking::LockManager;
use graphtx_kernel::store::{GraphStore, MemoryStorageEngine};
use graphtx_kernel::transaction::TransactionDependencies;
use graphtx_kernel::schema::SchemaDescriptor;
use graphtx_kernel::{
    AccessMode, CloseOutcome, Kernel, KernelConfig, KernelError, KernelTransactions, LabelId,
    PropertyKeyId, TerminationReason,
};
use graphtx_testkit::prelude::*;
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

/// A pool wired by hand so the monitor can be observed.
fn pool_with_monitor(monitor: Arc<RecordingMonitor>) -> KernelTransactions {
    let store = Arc::new(GraphStore::new());
    let ordering = Arc::new(IdOrderingQueue::new(16));
    let ids = Arc::new(InMemoryTransactionIdStore::new());
    let storage = Arc::new(MemoryStorageEngine::new(store, Arc::clone(&ordering)));
    let appender = Arc::new(BatchingTransactionAppender::new(
        Arc::new(InMemoryLogWriter::new()),
        ids.clone(),
        ordering,
    ));
    let commit = Arc::new(TransactionRepresentationCommitProcess::new(
        appender,
        storage.clone(),
        ids.clone(),
    ));
    let deps = TransactionDependencies::new(storage, commit, Arc::new(LockManager::default()), ids)
        .with_monitor(monitor);
    KernelTransactions::new(deps, KernelConfig::default())
}

#[test]
fn monitor_sees_every_outcome() {
    init_test_logging();
    let monitor = Arc::new(RecordingMonitor::new());
    let pool = pool_with_monitor(monitor.clone());

    let writer = pool.begin(AccessMode::Write, None).unwrap();
    {
        let mut stmt = writer.acquire_statement().unwrap();
        stmt.node_create().unwrap();
        stmt.close().unwrap();
    }
    assert!(matches!(writer.commit().unwrap(), CloseOutcome::Committed(_)));

    let reader = pool.begin(AccessMode::Read, None).unwrap();
    assert_eq!(reader.commit().unwrap(), CloseOutcome::ReadOnly);

    let doomed = pool.begin(AccessMode::Write, None).unwrap();
    {
        let mut stmt = doomed.acquire_statement().unwrap();
        stmt.node_create().unwrap();
        stmt.close().unwrap();
    }
    assert!(doomed.mark_for_termination(doomed.reuse_count(), TerminationReason::Terminated));
    doomed.rollback().unwrap();

    assert_eq!(
        monitor.events(),
        vec![
            MonitorEvent::Started,
            MonitorEvent::Finished {
                committed: true,
                is_write: true
            },
            MonitorEvent::Started,
            MonitorEvent::Finished {
                committed: true,
                is_write: false
            },
            MonitorEvent::Started,
            MonitorEvent::Terminated { is_write: true },
            MonitorEvent::Finished {
                committed: false,
                is_write: true
            },
        ]
    );
}

#[test]
fn close_listeners_see_the_outcome() {
    let kernel = TestKernel::new();
    let tx = kernel.begin_transaction(AccessMode::Write).unwrap();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    tx.register_close_listener(Box::new(move |outcome| sink.lock().push(*outcome)));
    {
        let mut stmt = tx.acquire_statement().unwrap();
        stmt.node_create().unwrap();
        stmt.close().unwrap();
    }
    let outcome = tx.commit().unwrap();

    assert_eq!(*seen.lock(), vec![outcome]);
    // listeners are dropped with the use they were registered on
    let next = kernel.begin_transaction(AccessMode::Read).unwrap();
    next.close().unwrap();
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn a_closed_transaction_cannot_be_used() {
    let kernel = TestKernel::new();
    let tx = kernel.begin_transaction(AccessMode::Write).unwrap();
    tx.close().unwrap();

    assert!(matches!(
        tx.acquire_statement(),
        Err(KernelError::TransactionNotOpen)
    ));
    assert!(tx.close().is_err());
    tx.rollback().unwrap();
}

#[test]
fn uncommitted_changes_stay_private() {
    let kernel = TestKernel::new();
    let nodes = populate(&kernel, 1);

    let writer = kernel.begin_transaction(AccessMode::Write).unwrap();
    let mut stmt = writer.acquire_statement().unwrap();
    let fresh = stmt.node_create().unwrap();
    assert_eq!(stmt.count_nodes(None).unwrap(), 2);

    let seen_elsewhere = kernel
        .transaction(AccessMode::Read, |other| {
            Ok((other.node_exists(fresh)?, other.count_nodes(None)?))
        })
        .unwrap();
    assert_eq!(seen_elsewhere, (false, 1));

    stmt.node_delete(nodes[0]).unwrap();
    stmt.close().unwrap();
    writer.commit().unwrap();

    let after = kernel
        .transaction(AccessMode::Read, |stmt| stmt.nodes())
        .unwrap();
    assert_eq!(after, vec![fresh]);
    assert!(kernel.verify_counts().is_empty());
}

#[test]
fn shutdown_refuses_new_work() {
    let kernel = TestKernel::new();
    let open = kernel.begin_transaction(AccessMode::Write).unwrap();
    kernel.shutdown().unwrap();

    assert!(!kernel.is_open());
    assert_eq!(
        open.reason_if_terminated(),
        Some(TerminationReason::DatabaseShutdown)
    );
    assert!(matches!(
        kernel.begin_transaction(AccessMode::Read),
        Err(KernelError::Shutdown)
    ));
    open.rollback().unwrap();
    kernel.shutdown().unwrap();
}

#[test]
fn counters_add_up_after_a_workload() {
    let kernel = TestKernel::new();
    let nodes = populate(&kernel, 5);
    chain(&kernel, &nodes);
    let failed = kernel.transaction(AccessMode::Write, |stmt| stmt.node_delete(nodes[2]));
    assert!(failed.is_err());

    let counters = kernel.counters().snapshot();
    assert_eq!(counters.started, 10);
    assert_eq!(counters.active, 0);
    assert_eq!(counters.committed_write, 9);
    assert_eq!(counters.rolled_back_write + counters.rolled_back_read, 1);
    assert!(kernel.verify_counts().is_empty());
}

#[test]
fn crossed_schema_upgrades_fail_one_transaction_and_commit_the_other() {
    let kernel = Arc::new(Kernel::in_memory(KernelConfig::default()));
    let barrier = Arc::new(Barrier::new(2));
    let (done, results) = mpsc::channel();

    for key in 0..2u64 {
        let kernel = Arc::clone(&kernel);
        let barrier = Arc::clone(&barrier);
        let done = done.clone();
        thread::spawn(move || {
            let schema = SchemaDescriptor::for_label(LabelId::new(0), [PropertyKeyId::new(key)]);
            let result = kernel.transaction(AccessMode::Full, |stmt| {
                assert!(stmt.index_for_schema(&schema)?.is_none());
                barrier.wait();
                stmt.index_create(schema.clone())
            });
            let _ = done.send(result);
        });
    }

    let outcomes: Vec<_> = (0..2)
        .map(|_| {
            results
                .recv_timeout(Duration::from_secs(5))
                .expect("schema writers deadlocked")
        })
        .collect();
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(KernelError::DeadlockDetected { .. }))));
    assert_eq!(kernel.transactions().active_count(), 0);
}
