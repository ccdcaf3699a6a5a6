//! Terminates transactions that run past their timeout.

use crate::transaction::pool::KernelTransactions;
use crate::transaction::TerminationReason;
use parking_lot::{Condvar, Mutex};
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Scans open transactions and terminates the ones that timed out.
#[derive(Debug, Clone)]
pub struct TimeoutMonitor {
    transactions: Arc<KernelTransactions>,
}

impl TimeoutMonitor {
    /// Creates a monitor over `transactions`, using their clock.
    #[must_use]
    pub fn new(transactions: Arc<KernelTransactions>) -> Self {
        Self { transactions }
    }

    /// Runs one scan. Returns how many transactions were terminated.
    pub fn run(&self) -> usize {
        let now = self.transactions.dependencies().clock.millis();
        let mut terminated = 0;
        for handle in self.transactions.active_transactions() {
            // Round up so a sub-millisecond timeout is not read as disabled.
            let timeout = handle.timeout().as_micros().div_ceil(1000) as u64;
            if timeout == 0 {
                continue;
            }
            let elapsed = now.saturating_sub(handle.start_millis());
            if elapsed > timeout && handle.mark_for_termination(TerminationReason::TransactionTimedOut)
            {
                warn!(
                    user_tx_id = handle.user_transaction_id(),
                    elapsed_ms = elapsed,
                    timeout_ms = timeout,
                    "transaction timed out and was marked for termination"
                );
                terminated += 1;
            }
        }
        terminated
    }

    /// Runs a scan every `interval` on a background thread.
    pub fn spawn(self, interval: Duration) -> io::Result<TimeoutMonitorHandle> {
        let shared = Arc::new(StopSignal::default());
        let signal = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("graphtx-timeout-monitor".to_string())
            .spawn(move || {
                let mut stopped = signal.stopped.lock();
                while !*stopped {
                    signal.wake.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    let scan = std::panic::catch_unwind(AssertUnwindSafe(|| self.run()));
                    if let Err(panic) = scan {
                        error!(?panic, "transaction timeout scan panicked");
                    }
                    stopped = signal.stopped.lock();
                }
                debug!("transaction timeout monitor stopped");
            })?;
        Ok(TimeoutMonitorHandle {
            signal: shared,
            thread: Some(thread),
        })
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Owns the timeout monitor thread; stops and joins it on drop.
pub struct TimeoutMonitorHandle {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl TimeoutMonitorHandle {
    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
            self.signal.wake.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            if let Err(panic) = thread.join() {
                error!(?panic, "transaction timeout monitor thread panicked");
            }
        }
    }
}

impl Drop for TimeoutMonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
