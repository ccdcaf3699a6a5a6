//! Per-transaction resource statistics.

use crate::locking::{LockMode, LockTracer, ResourceType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Samples CPU time consumed so far.
pub trait CpuClock: Send + Sync {
    /// CPU time in nanoseconds, or `None` if unsupported.
    fn cpu_time_nanos(&self) -> Option<u64>;
}

/// Samples bytes allocated so far.
pub trait HeapAllocationSampler: Send + Sync {
    /// Allocated bytes, or `None` if unsupported.
    fn allocated_bytes(&self) -> Option<u64>;
}

/// Cumulative page cache hit/fault counters.
pub trait PageCursorTracer: Send + Sync {
    /// Pages found in cache.
    fn hits(&self) -> u64;
    /// Pages loaded from storage.
    fn faults(&self) -> u64;
}

/// CPU clock that is never available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCpuClock;

impl CpuClock for NoopCpuClock {
    fn cpu_time_nanos(&self) -> Option<u64> {
        None
    }
}

/// Heap sampler that is never available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHeapAllocation;

impl HeapAllocationSampler for NoopHeapAllocation {
    fn allocated_bytes(&self) -> Option<u64> {
        None
    }
}

/// Page tracer that always reports zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPageCursorTracer;

impl PageCursorTracer for NoopPageCursorTracer {
    fn hits(&self) -> u64 {
        0
    }

    fn faults(&self) -> u64 {
        0
    }
}

const UNAVAILABLE: u64 = u64::MAX;

/// Resource usage of the current use of a transaction.
///
/// Samplers are read at `init` and again at `snapshot`; the difference is
/// what this use consumed. Lock waits are accumulated through the
/// [`LockTracer`] impl.
pub struct TransactionStatistics {
    cpu_clock: Arc<dyn CpuClock>,
    heap: Arc<dyn HeapAllocationSampler>,
    page_tracer: Arc<dyn PageCursorTracer>,
    track_cpu: bool,
    track_heap: bool,

    cpu_start: AtomicU64,
    heap_start: AtomicU64,
    hits_start: AtomicU64,
    faults_start: AtomicU64,
    lock_wait_nanos: AtomicU64,
}

impl TransactionStatistics {
    /// Creates statistics backed by the given samplers.
    pub fn new(
        cpu_clock: Arc<dyn CpuClock>,
        heap: Arc<dyn HeapAllocationSampler>,
        page_tracer: Arc<dyn PageCursorTracer>,
        track_cpu: bool,
        track_heap: bool,
    ) -> Self {
        Self {
            cpu_clock,
            heap,
            page_tracer,
            track_cpu,
            track_heap,
            cpu_start: AtomicU64::new(UNAVAILABLE),
            heap_start: AtomicU64::new(UNAVAILABLE),
            hits_start: AtomicU64::new(0),
            faults_start: AtomicU64::new(0),
            lock_wait_nanos: AtomicU64::new(0),
        }
    }

    /// Records baselines for a new use.
    pub fn init(&self) {
        let cpu = if self.track_cpu {
            self.cpu_clock.cpu_time_nanos()
        } else {
            None
        };
        let heap = if self.track_heap {
            self.heap.allocated_bytes()
        } else {
            None
        };
        self.cpu_start
            .store(cpu.unwrap_or(UNAVAILABLE), Ordering::Relaxed);
        self.heap_start
            .store(heap.unwrap_or(UNAVAILABLE), Ordering::Relaxed);
        self.hits_start
            .store(self.page_tracer.hits(), Ordering::Relaxed);
        self.faults_start
            .store(self.page_tracer.faults(), Ordering::Relaxed);
        self.lock_wait_nanos.store(0, Ordering::Relaxed);
    }

    /// Clears everything on release.
    pub fn reset(&self) {
        self.cpu_start.store(UNAVAILABLE, Ordering::Relaxed);
        self.heap_start.store(UNAVAILABLE, Ordering::Relaxed);
        self.hits_start.store(0, Ordering::Relaxed);
        self.faults_start.store(0, Ordering::Relaxed);
        self.lock_wait_nanos.store(0, Ordering::Relaxed);
    }

    /// CPU time consumed by this use.
    pub fn cpu_time(&self) -> Option<Duration> {
        let start = self.cpu_start.load(Ordering::Relaxed);
        if start == UNAVAILABLE {
            return None;
        }
        let now = self.cpu_clock.cpu_time_nanos()?;
        Some(Duration::from_nanos(now.saturating_sub(start)))
    }

    /// Bytes allocated by this use.
    pub fn heap_allocated_bytes(&self) -> Option<u64> {
        let start = self.heap_start.load(Ordering::Relaxed);
        if start == UNAVAILABLE {
            return None;
        }
        Some(self.heap.allocated_bytes()?.saturating_sub(start))
    }

    /// Page cache hits during this use.
    pub fn page_hits(&self) -> u64 {
        self.page_tracer
            .hits()
            .saturating_sub(self.hits_start.load(Ordering::Relaxed))
    }

    /// Page cache faults during this use.
    pub fn page_faults(&self) -> u64 {
        self.page_tracer
            .faults()
            .saturating_sub(self.faults_start.load(Ordering::Relaxed))
    }

    /// Total time spent waiting for locks.
    pub fn lock_wait_time(&self) -> Duration {
        Duration::from_nanos(self.lock_wait_nanos.load(Ordering::Relaxed))
    }

    /// Returns a snapshot of all statistics.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            cpu_time: self.cpu_time(),
            heap_allocated_bytes: self.heap_allocated_bytes(),
            page_hits: self.page_hits(),
            page_faults: self.page_faults(),
            lock_wait_time: self.lock_wait_time(),
        }
    }
}

impl LockTracer for TransactionStatistics {
    fn lock_waited(&self, _resource: ResourceType, _mode: LockMode, waited: Duration) {
        self.lock_wait_nanos
            .fetch_add(waited.as_nanos() as u64, Ordering::Relaxed);
    }
}

/// A point-in-time copy of [`TransactionStatistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatisticsSnapshot {
    /// CPU time, if tracked and available.
    pub cpu_time: Option<Duration>,
    /// Heap allocation, if tracked and available.
    pub heap_allocated_bytes: Option<u64>,
    /// Page cache hits.
    pub page_hits: u64,
    /// Page cache faults.
    pub page_faults: u64,
    /// Time spent waiting for locks.
    pub lock_wait_time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(AtomicU64);

    impl CpuClock for Counter {
        fn cpu_time_nanos(&self) -> Option<u64> {
            Some(self.0.load(Ordering::Relaxed))
        }
    }

    impl PageCursorTracer for Counter {
        fn hits(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
        fn faults(&self) -> u64 {
            self.0.load(Ordering::Relaxed) / 2
        }
    }

    #[test]
    fn unavailable_samplers_report_none() {
        let stats = TransactionStatistics::new(
            Arc::new(NoopCpuClock),
            Arc::new(NoopHeapAllocation),
            Arc::new(NoopPageCursorTracer),
            true,
            true,
        );
        stats.init();
        let snap = stats.snapshot();
        assert_eq!(snap.cpu_time, None);
        assert_eq!(snap.heap_allocated_bytes, None);
        assert_eq!(snap.page_hits, 0);
    }

    #[test]
    fn deltas_are_relative_to_init() {
        let counter = Arc::new(Counter(AtomicU64::new(100)));
        let stats = TransactionStatistics::new(
            counter.clone(),
            Arc::new(NoopHeapAllocation),
            counter.clone(),
            true,
            false,
        );
        stats.init();
        counter.0.store(160, Ordering::Relaxed);

        assert_eq!(stats.cpu_time(), Some(Duration::from_nanos(60)));
        assert_eq!(stats.page_hits(), 60);
        assert_eq!(stats.page_faults(), 30);
    }

    #[test]
    fn untracked_cpu_is_none_even_if_available() {
        let counter = Arc::new(Counter(AtomicU64::new(1)));
        let stats = TransactionStatistics::new(
            counter.clone(),
            Arc::new(NoopHeapAllocation),
            counter,
            false,
            false,
        );
        stats.init();
        assert_eq!(stats.cpu_time(), None);
    }

    #[test]
    fn lock_waits_accumulate_and_reset() {
        let stats = TransactionStatistics::new(
            Arc::new(NoopCpuClock),
            Arc::new(NoopHeapAllocation),
            Arc::new(NoopPageCursorTracer),
            false,
            false,
        );
        stats.init();
        stats.lock_waited(ResourceType::Node, LockMode::Exclusive, Duration::from_millis(3));
        stats.lock_waited(ResourceType::Schema, LockMode::Shared, Duration::from_millis(2));
        assert_eq!(stats.lock_wait_time(), Duration::from_millis(5));
        stats.reset();
        assert_eq!(stats.lock_wait_time(), Duration::ZERO);
    }
}
