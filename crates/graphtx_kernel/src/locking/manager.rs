//! Blocking in-memory lock manager.

use crate::error::{KernelError, KernelResult};
use crate::locking::{LockClient, LockMode, LockTracer, Locks, ResourceType};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type LockKey = (ResourceType, u64);

#[derive(Debug, Default)]
struct LockEntry {
    /// Exclusive holder and its reentrancy count.
    exclusive: Option<(u64, usize)>,
    /// Shared holders and their reentrancy counts.
    shared: HashMap<u64, usize>,
}

impl LockEntry {
    fn can_grant(&self, client: u64, mode: LockMode) -> bool {
        let exclusive_ok = self.exclusive.map_or(true, |(holder, _)| holder == client);
        match mode {
            LockMode::Shared => exclusive_ok,
            // Upgrade is allowed when we are the only shared holder.
            LockMode::Exclusive => exclusive_ok && self.shared.keys().all(|&h| h == client),
        }
    }

    fn grant(&mut self, client: u64, mode: LockMode) {
        match mode {
            LockMode::Shared => *self.shared.entry(client).or_insert(0) += 1,
            LockMode::Exclusive => match &mut self.exclusive {
                Some((_, count)) => *count += 1,
                None => self.exclusive = Some((client, 1)),
            },
        }
    }

    /// Drops `times` holds; returns how many were actually dropped.
    fn release(&mut self, client: u64, mode: LockMode, times: usize) -> usize {
        match mode {
            LockMode::Shared => {
                let Some(count) = self.shared.get_mut(&client) else {
                    return 0;
                };
                let dropped = times.min(*count);
                *count -= dropped;
                if *count == 0 {
                    self.shared.remove(&client);
                }
                dropped
            }
            LockMode::Exclusive => match &mut self.exclusive {
                Some((holder, count)) if *holder == client => {
                    let dropped = times.min(*count);
                    *count -= dropped;
                    if *count == 0 {
                        self.exclusive = None;
                    }
                    dropped
                }
                _ => 0,
            },
        }
    }

    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }

    /// Clients whose holds keep `client` from getting `mode`.
    fn blockers(&self, client: u64, mode: LockMode) -> Vec<u64> {
        let mut blockers: Vec<u64> = self
            .exclusive
            .iter()
            .map(|&(holder, _)| holder)
            .filter(|&holder| holder != client)
            .collect();
        if mode == LockMode::Exclusive {
            blockers.extend(self.shared.keys().copied().filter(|&h| h != client));
        }
        blockers
    }
}

/// Granted locks plus what each blocked client is waiting for.
#[derive(Debug, Default)]
struct LockTable {
    entries: HashMap<LockKey, LockEntry>,
    waiting: HashMap<u64, (LockKey, LockMode)>,
}

impl LockTable {
    /// Returns `true` if `client` waiting for `key` in `mode` would close a
    /// cycle in the wait-for graph.
    fn would_deadlock(&self, client: u64, key: LockKey, mode: LockMode) -> bool {
        let mut pending = self
            .entries
            .get(&key)
            .map(|entry| entry.blockers(client, mode))
            .unwrap_or_default();
        let mut visited = HashSet::new();
        while let Some(other) = pending.pop() {
            if other == client {
                return true;
            }
            if !visited.insert(other) {
                continue;
            }
            if let Some(&(waited, waited_mode)) = self.waiting.get(&other) {
                if let Some(entry) = self.entries.get(&waited) {
                    pending.extend(entry.blockers(other, waited_mode));
                }
            }
        }
        false
    }

    fn release(&mut self, client: u64, key: LockKey, mode: LockMode, times: usize) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.release(client, mode, times);
            if entry.is_free() {
                self.entries.remove(&key);
            }
        }
    }
}

struct Shared {
    table: Mutex<LockTable>,
    released: Condvar,
    next_client: AtomicU64,
    acquisition_timeout: Option<Duration>,
}

impl Shared {
    fn release(&self, client: u64, key: LockKey, mode: LockMode, times: usize) {
        self.table.lock().release(client, key, mode, times);
        self.released.notify_all();
    }
}

/// Lock service granting reentrant shared/exclusive locks.
///
/// Waiters block on a condition variable until the lock becomes grantable,
/// their client is stopped, or the configured acquisition timeout passes.
/// A client whose wait would close a cycle of waiting clients gets
/// [`KernelError::DeadlockDetected`] instead of blocking.
#[derive(Clone)]
pub struct LockManager {
    shared: Arc<Shared>,
}

impl LockManager {
    /// Creates a lock manager. `acquisition_timeout` of `None` waits forever.
    #[must_use]
    pub fn new(acquisition_timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(LockTable::default()),
                released: Condvar::new(),
                next_client: AtomicU64::new(1),
                acquisition_timeout,
            }),
        }
    }

    /// Number of locks currently held by any client.
    #[must_use]
    pub fn held_lock_count(&self) -> usize {
        self.shared.table.lock().entries.len()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Locks for LockManager {
    fn new_client(&self) -> Arc<dyn LockClient> {
        let id = self.shared.next_client.fetch_add(1, Ordering::Relaxed);
        Arc::new(ManagerClient {
            id,
            shared: Arc::clone(&self.shared),
            stopped: AtomicBool::new(false),
            held: Mutex::new(HashMap::new()),
        })
    }
}

struct ManagerClient {
    id: u64,
    shared: Arc<Shared>,
    stopped: AtomicBool,
    held: Mutex<HashMap<(LockKey, LockMode), usize>>,
}

impl ManagerClient {
    fn acquire(
        &self,
        tracer: &dyn LockTracer,
        resource: ResourceType,
        ids: &[u64],
        mode: LockMode,
    ) -> KernelResult<()> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        for id in sorted {
            self.acquire_one(tracer, (resource, id), mode)?;
        }
        Ok(())
    }

    fn acquire_one(&self, tracer: &dyn LockTracer, key: LockKey, mode: LockMode) -> KernelResult<()> {
        let mut table = self.shared.table.lock();
        let mut wait_started: Option<Instant> = None;
        let acquired = loop {
            if self.stopped.load(Ordering::Acquire) {
                break Err(KernelError::LockClientStopped);
            }
            let entry = table.entries.entry(key).or_default();
            if entry.can_grant(self.id, mode) {
                entry.grant(self.id, mode);
                break Ok(());
            }
            if table.would_deadlock(self.id, key, mode) {
                break Err(KernelError::DeadlockDetected {
                    resource: key.0,
                    id: key.1,
                });
            }
            table.waiting.insert(self.id, (key, mode));

            let started = *wait_started.get_or_insert_with(Instant::now);
            match self.shared.acquisition_timeout {
                Some(timeout) => {
                    let deadline = started + timeout;
                    if Instant::now() >= deadline {
                        break Err(KernelError::LockAcquisitionTimeout {
                            resource: key.0,
                            id: key.1,
                            waited_millis: started.elapsed().as_millis() as u64,
                        });
                    }
                    self.shared.released.wait_until(&mut table, deadline);
                }
                None => self.shared.released.wait(&mut table),
            }
        };
        table.waiting.remove(&self.id);
        drop(table);

        acquired?;
        *self.held.lock().entry((key, mode)).or_insert(0) += 1;
        if let Some(started) = wait_started {
            tracer.lock_waited(key.0, mode, started.elapsed());
        }
        Ok(())
    }

    fn release(&self, resource: ResourceType, ids: &[u64], mode: LockMode) {
        for &id in ids {
            let key = (resource, id);
            {
                let mut held = self.held.lock();
                match held.get_mut(&(key, mode)) {
                    Some(count) if *count > 1 => *count -= 1,
                    Some(_) => {
                        held.remove(&(key, mode));
                    }
                    None => continue,
                }
            }
            self.shared.release(self.id, key, mode, 1);
        }
    }
}

impl LockClient for ManagerClient {
    fn acquire_shared(
        &self,
        tracer: &dyn LockTracer,
        resource: ResourceType,
        ids: &[u64],
    ) -> KernelResult<()> {
        self.acquire(tracer, resource, ids, LockMode::Shared)
    }

    fn acquire_exclusive(
        &self,
        tracer: &dyn LockTracer,
        resource: ResourceType,
        ids: &[u64],
    ) -> KernelResult<()> {
        self.acquire(tracer, resource, ids, LockMode::Exclusive)
    }

    fn release_shared(&self, resource: ResourceType, ids: &[u64]) {
        self.release(resource, ids, LockMode::Shared);
    }

    fn release_exclusive(&self, resource: ResourceType, ids: &[u64]) {
        self.release(resource, ids, LockMode::Exclusive);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        // Taking the table lock guarantees a waiter is either inside wait()
        // or has not yet checked the stopped flag.
        let _table = self.shared.table.lock();
        self.shared.released.notify_all();
    }

    fn close(&self) {
        self.stopped.store(true, Ordering::Release);
        let held: Vec<_> = self.held.lock().drain().collect();
        if held.is_empty() {
            return;
        }
        let mut table = self.shared.table.lock();
        for ((key, mode), times) in held {
            table.release(self.id, key, mode, times);
        }
        self.shared.released.notify_all();
    }

    fn active_lock_count(&self) -> usize {
        self.held.lock().len()
    }
}
