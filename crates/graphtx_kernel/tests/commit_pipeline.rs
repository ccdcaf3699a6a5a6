//! Integration tests for appending, ordering and applying commits.

use graphtx_kernel::apply::{
    apply_commands, BatchTransactionApplier, BatchTransactionApplierFacade, IdOrderingQueue,
    LockGroup, StorageCommand, TransactionRepresentation, TransactionToApply,
};
use graphtx_kernel::commit::{
    BatchingTransactionAppender, InMemoryTransactionIdStore, TransactionIdStore,
    TransactionLogWriter, TransactionRepresentationCommitProcess,
};
use graphtx_kernel::locking::LockManager;
use graphtx_kernel::state::{CountsKey, ExplicitIndexChange};
use graphtx_kernel::storage::StorageReader;
use graphtx_kernel::store::{GraphStore, MemoryStorageEngine};
use graphtx_kernel::transaction::TransactionDependencies;
use graphtx_kernel::{
    AccessMode, EntityRef, Kernel, KernelConfig, KernelError, KernelResult, KernelTransactions,
    NodeId, TransactionId, Value,
};
use graphtx_testkit::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

fn with_id(commands: Vec<StorageCommand>, id: u64) -> TransactionToApply {
    TransactionToApply::with_id(
        TransactionRepresentation {
            commands,
            ..Default::default()
        },
        TransactionId::new(id),
    )
}

#[test]
fn appliers_start_in_order_and_close_in_reverse() {
    let log = ApplierLog::default();
    let facade = BatchTransactionApplierFacade::new(vec![
        Arc::new(RecordingApplier::new("a", log.clone())) as Arc<dyn BatchTransactionApplier>,
        Arc::new(RecordingApplier::new("b", log.clone())),
    ]);

    for tx in [
        with_id(vec![StorageCommand::NodeCreate { id: NodeId::new(1) }], 1),
        with_id(Vec::new(), 2),
    ] {
        let mut locks = LockGroup::new();
        let mut applier = facade.start_tx_facade(&tx, &mut locks).unwrap();
        apply_commands(&mut applier, &tx).unwrap();
    }
    BatchTransactionApplier::close(&facade).unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "a:start:1",
            "b:start:1",
            "a:visit:1",
            "b:visit:1",
            "b:close:1",
            "a:close:1",
            "a:start:2",
            "b:start:2",
            "b:close:2",
            "a:close:2",
            "b:batch-close",
            "a:batch-close",
        ]
    );
}

#[test]
fn failed_start_closes_the_started_appliers() {
    let log = ApplierLog::default();
    let facade = BatchTransactionApplierFacade::new(vec![
        Arc::new(RecordingApplier::new("a", log.clone())) as Arc<dyn BatchTransactionApplier>,
        Arc::new(RecordingApplier::failing("b", log.clone())),
        Arc::new(RecordingApplier::new("c", log.clone())),
    ]);

    let tx = with_id(Vec::new(), 7);
    assert!(facade.start_tx_facade(&tx, &mut LockGroup::new()).is_err());
    assert_eq!(*log.lock(), vec!["a:start:7", "b:refuse:7", "a:close:7"]);
}

#[test]
fn concurrent_explicit_index_commits_are_all_applied() {
    let kernel = Arc::new(Kernel::in_memory(
        KernelConfig::default().explicit_index_ordering_capacity(4),
    ));
    let config = StressConfig::quick();
    let result = stress_concurrent_writers(&kernel, &config);

    assert_eq!(result.failed, 0);
    for t in 0..config.threads {
        for i in 0..config.transactions_per_thread {
            let hits = kernel
                .store()
                .explicit_index_get("stress", "thread", &Value::from(format!("{t}-{i}")));
            assert_eq!(hits.len(), 1, "entry {t}-{i}");
        }
    }
    assert_eq!(
        kernel.last_closed_transaction_id(),
        kernel.last_committed_transaction_id()
    );
}

struct FailingWriter;

impl TransactionLogWriter for FailingWriter {
    fn append(&self, _bytes: &[u8]) -> KernelResult<u64> {
        Err(KernelError::Io(std::io::Error::other("disk full")))
    }

    fn flush(&self) -> KernelResult<()> {
        Ok(())
    }
}

/// A commit stack over `writer`, with direct access to its parts.
struct Pipeline {
    store: Arc<GraphStore>,
    ordering: Arc<IdOrderingQueue>,
    ids: Arc<InMemoryTransactionIdStore>,
    pool: KernelTransactions,
}

fn pipeline(writer: Arc<dyn TransactionLogWriter>) -> Pipeline {
    let store = Arc::new(GraphStore::new());
    let ordering = Arc::new(IdOrderingQueue::new(4));
    let ids = Arc::new(InMemoryTransactionIdStore::new());
    let storage = Arc::new(MemoryStorageEngine::new(store.clone(), Arc::clone(&ordering)));
    let appender = Arc::new(BatchingTransactionAppender::new(
        writer,
        ids.clone(),
        ordering.clone(),
    ));
    let commit = Arc::new(TransactionRepresentationCommitProcess::new(
        appender,
        storage.clone(),
        ids.clone(),
    ));
    let pool = KernelTransactions::new(
        TransactionDependencies::new(storage, commit, Arc::new(LockManager::default()), ids.clone()),
        KernelConfig::default(),
    );
    Pipeline {
        store,
        ordering,
        ids,
        pool,
    }
}

fn commit_indexed_node(pool: &KernelTransactions, name: &str) -> KernelResult<TransactionId> {
    let tx = pool.begin(AccessMode::Write, None)?;
    {
        let mut stmt = tx.acquire_statement()?;
        let node = stmt.node_create()?;
        stmt.node_explicit_index_add("people", node, "name", name)?;
        stmt.close()?;
    }
    Ok(tx.commit()?.tx_id())
}

/// Runs `f` on another thread, failing the test if it does not finish.
fn within_deadline<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    let (done, result) = mpsc::channel();
    thread::spawn(move || {
        let _ = done.send(f());
    });
    result
        .recv_timeout(Duration::from_secs(5))
        .expect("operation did not finish")
}

#[test]
fn append_failure_rolls_the_transaction_back() {
    let p = pipeline(Arc::new(FailingWriter));

    let err = commit_indexed_node(&p.pool, "ada").unwrap_err();

    assert!(matches!(err, KernelError::AppendFailed { .. }));
    assert_eq!(p.store.node_total(), 0);
    assert!(p.ordering.is_empty());
    assert_eq!(p.ids.last_closed(), TransactionId::FIRST);
    assert_eq!(p.pool.active_count(), 0);
}

/// Accepts every append and fails the first flush.
#[derive(Default)]
struct FailsFirstFlush {
    failed: AtomicBool,
}

impl TransactionLogWriter for FailsFirstFlush {
    fn append(&self, bytes: &[u8]) -> KernelResult<u64> {
        Ok(bytes.len() as u64)
    }

    fn flush(&self) -> KernelResult<()> {
        if self.failed.swap(true, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KernelError::Io(std::io::Error::other("flush failed")))
        }
    }
}

#[test]
fn explicit_index_commits_continue_after_a_failed_flush() {
    let p = Arc::new(pipeline(Arc::new(FailsFirstFlush::default())));

    let err = commit_indexed_node(&p.pool, "ada").unwrap_err();
    assert!(matches!(
        err,
        KernelError::AppendFailed { tx_id, .. } if tx_id == TransactionId::FIRST
    ));
    assert!(p.ordering.is_empty());
    assert_eq!(p.ids.last_closed(), TransactionId::FIRST);

    let next = Arc::clone(&p);
    let committed = within_deadline(move || commit_indexed_node(&next.pool, "grace")).unwrap();
    assert_eq!(committed, TransactionId::new(2));
    assert_eq!(
        p.store
            .explicit_index_get("people", "name", &Value::from("grace"))
            .len(),
        1
    );
    assert_eq!(p.ids.last_closed(), committed);
}

#[test]
fn external_transactions_are_committed_in_batches() {
    let kernel = Kernel::in_memory(
        KernelConfig::default()
            .transaction_queue_batch_size(8)
            .explicit_index_ordering_capacity(2),
    );
    let node = |id| StorageCommand::NodeCreate { id: NodeId::new(id) };
    let transactions = (1..=5)
        .map(|id| TransactionRepresentation {
            commands: vec![
                node(id),
                StorageCommand::ExplicitIndex(ExplicitIndexChange::Add {
                    index: "remote".into(),
                    entity: EntityRef::Node(NodeId::new(id)),
                    key: "origin".into(),
                    value: Value::from("replica"),
                }),
                StorageCommand::Counts(vec![(CountsKey::node(None), 1)]),
            ],
            ..Default::default()
        })
        .collect();

    let last = kernel.apply_external(transactions).unwrap();
    assert_eq!(last, TransactionId::new(5));
    assert_eq!(kernel.last_closed_transaction_id(), last);
    assert_eq!(kernel.store().node_count(None), 5);
    assert_eq!(
        kernel
            .store()
            .explicit_index_get("remote", "origin", &Value::from("replica"))
            .len(),
        5
    );
    assert!(kernel.verify_counts().is_empty());

    // local commits continue after the external ids
    let outcome = kernel
        .begin_transaction(AccessMode::Write)
        .and_then(|tx| {
            {
                let mut stmt = tx.acquire_statement()?;
                stmt.node_create()?;
                stmt.close()?;
            }
            tx.commit()
        })
        .unwrap();
    assert_eq!(outcome.tx_id(), TransactionId::new(6));
}

#[test]
fn explicit_index_commits_continue_after_a_failed_external_batch() {
    let kernel = Arc::new(Kernel::in_memory(
        KernelConfig::default().transaction_queue_batch_size(4),
    ));
    let indexed = TransactionRepresentation {
        commands: vec![
            StorageCommand::NodeCreate { id: NodeId::new(100) },
            StorageCommand::ExplicitIndex(ExplicitIndexChange::Add {
                index: "remote".into(),
                entity: EntityRef::Node(NodeId::new(100)),
                key: "origin".into(),
                value: Value::from("replica"),
            }),
        ],
        ..Default::default()
    };
    let broken = TransactionRepresentation {
        commands: vec![StorageCommand::NodeDelete { id: NodeId::new(77) }],
        ..Default::default()
    };

    let err = kernel.apply_external(vec![broken, indexed]).unwrap_err();
    assert!(matches!(
        err,
        KernelError::ApplyFailed { tx_id, .. } if tx_id == TransactionId::new(1)
    ));

    let local = Arc::clone(&kernel);
    let node = within_deadline(move || {
        local.transaction(AccessMode::Write, |stmt| {
            let node = stmt.node_create()?;
            stmt.node_explicit_index_add("people", node, "name", "ada")?;
            Ok(node)
        })
    })
    .unwrap();
    assert_eq!(
        kernel
            .store()
            .explicit_index_get("people", "name", &Value::from("ada")),
        vec![EntityRef::Node(node)]
    );
}
