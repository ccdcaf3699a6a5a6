//! Integration tests for log replay.

use graphtx_kernel::{AccessMode, Kernel, KernelConfig, KernelError};
use graphtx_testkit::prelude::*;
use proptest::prelude::*;

fn assert_same_graph(a: &Kernel, b: &Kernel) {
    assert_eq!(a.store().node_total(), b.store().node_total());
    assert_eq!(a.store().relationship_total(), b.store().relationship_total());
    assert_eq!(a.store().counts(), b.store().counts());
    assert_eq!(
        a.last_committed_transaction_id(),
        b.last_committed_transaction_id()
    );
}

#[test]
fn replayed_log_rebuilds_the_graph() {
    init_test_logging();
    let source = TestKernel::new();
    let nodes = populate(&source, 6);
    chain(&source, &nodes);

    let replica = Kernel::in_memory(KernelConfig::default().transaction_queue_batch_size(4));
    let replayed = replica.recover(&source.log_bytes()).unwrap();

    assert_eq!(replayed, 11);
    assert_same_graph(&source, &replica);
    assert_eq!(
        replica.last_closed_transaction_id(),
        replica.last_committed_transaction_id()
    );
    assert!(replica.verify_counts().is_empty());
    assert_eq!(replica.log_bytes(), source.log_bytes());
}

#[test]
fn replay_skips_what_is_already_there() {
    let source = TestKernel::new();
    populate(&source, 3);
    let replica = Kernel::in_memory(KernelConfig::default());
    assert_eq!(replica.recover(&source.log_bytes()).unwrap(), 3);

    populate(&source, 2);
    assert_eq!(replica.recover(&source.log_bytes()).unwrap(), 2);
    assert_eq!(replica.recover(&source.log_bytes()).unwrap(), 0);
    assert_same_graph(&source, &replica);
}

#[test]
fn replay_refuses_while_transactions_are_open() {
    let source = TestKernel::new();
    populate(&source, 1);
    let replica = Kernel::in_memory(KernelConfig::default());
    let open = replica.begin_transaction(AccessMode::Read).unwrap();

    assert!(matches!(
        replica.recover(&source.log_bytes()),
        Err(KernelError::InvalidOperation { .. })
    ));
    open.close().unwrap();
    assert_eq!(replica.recover(&source.log_bytes()).unwrap(), 1);
}

#[test]
fn truncated_log_is_rejected() {
    let source = TestKernel::new();
    populate(&source, 2);
    let mut log = source.log_bytes();
    log.truncate(log.len() - 3);

    let replica = Kernel::in_memory(KernelConfig::default());
    assert!(replica.recover(&log).is_err());
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn counts_stay_consistent_and_replay_matches(workload in graph_workload_strategy(12, 6)) {
        let source = TestKernel::new();
        let report = run_graph_workload(&source, &workload);
        prop_assert_eq!(report.committed + report.rolled_back, workload.len());
        prop_assert!(source.verify_counts().is_empty());

        let replica = Kernel::in_memory(KernelConfig::default().transaction_queue_batch_size(3));
        prop_assert!(replica.recover(&source.log_bytes()).unwrap() <= report.committed);
        prop_assert_eq!(
            replica.last_committed_transaction_id(),
            source.last_committed_transaction_id()
        );
        prop_assert_eq!(replica.store().counts(), source.store().counts());
        prop_assert_eq!(replica.store().node_total(), source.store().node_total());
        prop_assert!(replica.verify_counts().is_empty());
    }
}
