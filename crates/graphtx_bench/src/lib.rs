//! Benchmark utilities.

use graphtx_kernel::{AccessMode, Kernel, KernelConfig, NodeId};
use rand::seq::SliceRandom;
use rand::Rng;

/// Random element ids in `0..domain`.
pub fn random_ids(count: usize, domain: u64) -> Vec<u64> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(0..domain)).collect()
}

/// `0..count` in random order.
pub fn shuffled(count: u64) -> Vec<u64> {
    let mut ids: Vec<u64> = (0..count).collect();
    ids.shuffle(&mut rand::thread_rng());
    ids
}

/// A kernel holding `count` committed nodes, created in one transaction.
pub fn kernel_with_nodes(config: KernelConfig, count: usize) -> (Kernel, Vec<NodeId>) {
    let kernel = Kernel::in_memory(config);
    let nodes = kernel
        .transaction(AccessMode::Write, |stmt| {
            (0..count).map(|_| stmt.node_create()).collect()
        })
        .expect("Failed to populate kernel");
    (kernel, nodes)
}
