//! Concurrent stress drivers for the kernel.
//!
//! These drive many threads through the transaction lifecycle at once and
//! report how the runs ended.

use graphtx_kernel::{AccessMode, Kernel, KernelError, NodeId, TerminationReason};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Transactions that committed.
    pub committed: usize,
    /// Transactions that failed or were rolled back.
    pub failed: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Total transactions attempted.
    pub fn total(&self) -> usize {
        self.committed + self.failed
    }

    /// Transactions per second.
    pub fn tx_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total() as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Committed: {}", self.committed);
        println!("Failed: {}", self.failed);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} tx/sec", self.tx_per_second());
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Transactions per thread.
    pub transactions_per_thread: usize,
    /// Number of concurrent threads.
    pub threads: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            transactions_per_thread: 200,
            threads: 4,
        }
    }
}

impl StressConfig {
    /// A small run for unit tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            transactions_per_thread: 25,
            threads: 4,
        }
    }
}

fn join_all(handles: Vec<thread::JoinHandle<(usize, usize)>>) -> (usize, usize) {
    handles
        .into_iter()
        .map(|h| h.join().expect("stress thread panicked"))
        .fold((0, 0), |(c, f), (dc, df)| (c + dc, f + df))
}

/// Every thread creates one labelled node per transaction and indexes it in
/// the explicit index `stress`, so all commits pass through the ordering
/// queue.
pub fn stress_concurrent_writers(kernel: &Arc<Kernel>, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let handles = (0..config.threads)
        .map(|t| {
            let kernel = Arc::clone(kernel);
            let count = config.transactions_per_thread;
            thread::spawn(move || {
                let mut committed = 0;
                let mut failed = 0;
                for i in 0..count {
                    let result = kernel.transaction(AccessMode::Write, |stmt| {
                        let label = stmt.label_get_or_create("Stress")?;
                        let node = stmt.node_create()?;
                        stmt.node_add_label(node, label)?;
                        stmt.node_explicit_index_add("stress", node, "thread", format!("{t}-{i}"))?;
                        Ok(())
                    });
                    match result {
                        Ok(()) => committed += 1,
                        Err(_) => failed += 1,
                    }
                }
                (committed, failed)
            })
        })
        .collect();
    let (committed, failed) = join_all(handles);
    StressTestResult {
        committed,
        failed,
        duration: start.elapsed(),
    }
}

/// Writers repeatedly update one shared node while a terminator thread
/// terminates every open transaction it sees.
///
/// Returns the result and how many transactions failed with a termination
/// error, as opposed to other failures.
pub fn stress_termination(kernel: &Arc<Kernel>, config: &StressConfig) -> (StressTestResult, usize) {
    let shared: NodeId = kernel
        .transaction(AccessMode::Write, |stmt| stmt.node_create())
        .expect("Failed to create shared node");
    let done = Arc::new(AtomicBool::new(false));
    let terminated = Arc::new(AtomicUsize::new(0));

    let terminator = {
        let kernel = Arc::clone(kernel);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                kernel.transactions().terminate_all(TerminationReason::Terminated);
                thread::yield_now();
            }
        })
    };

    let start = Instant::now();
    let handles = (0..config.threads)
        .map(|_| {
            let kernel = Arc::clone(kernel);
            let terminated = Arc::clone(&terminated);
            let count = config.transactions_per_thread;
            thread::spawn(move || {
                let mut committed = 0;
                let mut failed = 0;
                for i in 0..count {
                    let result = kernel.transaction(AccessMode::Write, |stmt| {
                        let key = stmt.property_key_get_or_create("counter")?;
                        stmt.node_set_property(shared, key, i as i64)?;
                        Ok(())
                    });
                    match result {
                        Ok(()) => committed += 1,
                        Err(KernelError::TransactionTerminated { .. }) => {
                            terminated.fetch_add(1, Ordering::SeqCst);
                            failed += 1;
                        }
                        Err(_) => failed += 1,
                    }
                }
                (committed, failed)
            })
        })
        .collect();
    let (committed, failed) = join_all(handles);
    done.store(true, Ordering::SeqCst);
    terminator.join().expect("terminator thread panicked");

    (
        StressTestResult {
            committed,
            failed,
            duration: start.elapsed(),
        },
        terminated.load(Ordering::SeqCst),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphtx_kernel::KernelConfig;

    #[test]
    fn test_concurrent_writers_all_commit() {
        let kernel = Arc::new(Kernel::in_memory(KernelConfig::default()));
        let config = StressConfig::quick();
        let result = stress_concurrent_writers(&kernel, &config);
        assert_eq!(result.committed, config.threads * config.transactions_per_thread);
        assert_eq!(result.failed, 0);
        assert_eq!(kernel.last_closed_transaction_id(), kernel.last_committed_transaction_id());
        assert!(kernel.verify_counts().is_empty());
    }
}
