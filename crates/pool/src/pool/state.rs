//! Shared pool internals.
//!
//! Everything that mutates `{available, in_use, size, opening}` lives here and
//! runs under the single state mutex. Connector calls (open, probe, close) are
//! always made with the lock released.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ConfigWarning, PoolConfig};
use crate::connector::{ConnectParams, Connector};
use crate::error::{Error, Result};
use crate::pooled::Entry;

use super::stats::PoolStats;

pub(crate) type Slot<C> = Arc<Entry<<C as Connector>::Connection>>;

/// Result of probing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    Alive,
    Dead,
    /// The probe itself failed; already logged.
    Unknown,
}

/// What `check_in` decided for a returned connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckIn {
    /// Back in `available`, a permit was published.
    Readmitted,
    /// Owned by the pool but not kept; the caller must close it.
    Discard,
    /// The pool is closed; the caller must close it.
    Closed,
    /// Not on loan from this pool; the caller must close it.
    Foreign,
}

#[derive(Debug, Default)]
struct Counters {
    created: u64,
    destroyed: u64,
    acquired: u64,
    released: u64,
    reaped: u64,
    timeouts: u64,
}

struct State<T> {
    capacity: usize,
    available: VecDeque<Arc<Entry<T>>>,
    in_use: HashMap<Uuid, Arc<Entry<T>>>,
    /// Always `available.len() + in_use.len()` when the lock is released.
    size: usize,
    /// Creations in flight; `size + opening <= capacity`.
    opening: usize,
    counters: Counters,
}

pub(crate) struct Shared<C: Connector> {
    pub(crate) connector: C,
    pub(crate) params: ConnectParams,
    pub(crate) config: PoolConfig,
    pub(crate) warnings: Vec<ConfigWarning>,
    state: Mutex<State<C::Connection>>,
    /// One permit per entry in `available`.
    pub(crate) ready: Semaphore,
    /// Written only while holding `state`.
    closed: AtomicBool,
    pub(crate) cancel: CancellationToken,
    pub(crate) reaper: Mutex<Option<JoinHandle<()>>>,
    /// Held for the whole of every reaper scan; `close` takes it before draining.
    pub(crate) scans: AsyncMutex<()>,
}

impl<C: Connector> Shared<C> {
    pub(crate) fn new(
        connector: C,
        params: ConnectParams,
        config: PoolConfig,
        warnings: Vec<ConfigWarning>,
        initial: Vec<C::Connection>,
    ) -> Self {
        let capacity = config.capacity;
        let available: VecDeque<_> = initial.into_iter().map(Entry::new).collect();
        let size = available.len();
        Self {
            connector,
            params,
            config,
            warnings,
            ready: Semaphore::new(size),
            state: Mutex::new(State {
                capacity,
                available,
                in_use: HashMap::with_capacity(capacity),
                size,
                opening: 0,
                counters: Counters {
                    created: size as u64,
                    ..Counters::default()
                },
            }),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            reaper: Mutex::new(None),
            scans: AsyncMutex::new(()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.connector.name()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Move the oldest idle entry to `in_use`.
    ///
    /// The caller must already hold (and have forgotten) a `ready` permit.
    pub(crate) fn take_available(&self) -> Option<Slot<C>> {
        let mut state = self.state.lock();
        if self.is_closed() {
            return None;
        }
        let entry = state.available.pop_front()?;
        state.in_use.insert(entry.id(), Arc::clone(&entry));
        Some(entry)
    }

    /// Reserve room for one new connection.
    pub(crate) fn try_reserve(&self) -> bool {
        let mut state = self.state.lock();
        if self.is_closed() || state.size + state.opening >= state.capacity {
            return false;
        }
        state.opening += 1;
        true
    }

    /// Open a connection into a slot reserved by [`try_reserve`](Self::try_reserve).
    pub(crate) async fn open_reserved(&self) -> Result<Slot<C>> {
        let conn = match self.connector.open(&self.params).await {
            Ok(conn) => conn,
            Err(e) => {
                self.state.lock().opening -= 1;
                tracing::warn!(pool = self.name(), error = %e, "failed to open connection");
                return Err(Error::creation(self.name(), e));
            }
        };

        let entry = Entry::new(conn);
        let admitted = {
            let mut state = self.state.lock();
            state.opening -= 1;
            if self.is_closed() {
                false
            } else {
                state.size += 1;
                state.counters.created += 1;
                state.counters.acquired += 1;
                state.in_use.insert(entry.id(), Arc::clone(&entry));
                tracing::debug!(
                    pool = self.name(),
                    id = %entry.id(),
                    size = state.size,
                    "opened connection"
                );
                true
            }
        };
        if !admitted {
            self.close_entry(&entry).await;
            return Err(Error::PoolClosed);
        }
        Ok(entry)
    }

    /// Probe an entry that was just checked out and keep it only if usable.
    ///
    /// Returns `Ok(None)` when the entry was dead and has been discarded.
    pub(crate) async fn ensure_alive(&self, entry: Slot<C>) -> Result<Option<Slot<C>>> {
        let usable = self.probe(&entry).await == Liveness::Alive;
        if !usable {
            tracing::debug!(
                pool = self.name(),
                id = %entry.id(),
                "discarding dead idle connection"
            );
            if self.evict(&entry) {
                self.close_entry(&entry).await;
            }
            return Ok(None);
        }
        if self.is_closed() {
            self.evict(&entry);
            self.close_entry(&entry).await;
            return Err(Error::PoolClosed);
        }
        self.state.lock().counters.acquired += 1;
        Ok(Some(entry))
    }

    pub(crate) fn record_timeout(&self) {
        self.state.lock().counters.timeouts += 1;
    }

    // -----------------------------------------------------------------------
    // Return and eviction
    // -----------------------------------------------------------------------

    /// Take a returned entry back.
    ///
    /// Exactly one of "entry goes to `available`" or "`size` is decremented"
    /// happens for an entry that was on loan.
    pub(crate) fn check_in(&self, entry: &Slot<C>) -> CheckIn {
        self.check_in_locked(self.state.lock(), entry)
    }

    /// Check in a loan nobody holds any more.
    ///
    /// `entry` must be the caller's only reference besides the `in_use` map.
    /// Returns `None` without touching anything if the entry is not on loan
    /// or some caller still holds it.
    pub(crate) fn reclaim_abandoned(&self, entry: &Slot<C>) -> Option<CheckIn> {
        let state = self.state.lock();
        let booked = state
            .in_use
            .get(&entry.id())
            .is_some_and(|booked| Arc::ptr_eq(booked, entry));
        if !booked || Arc::strong_count(entry) > 2 {
            return None;
        }
        Some(self.check_in_locked(state, entry))
    }

    fn check_in_locked(
        &self,
        mut state: MutexGuard<'_, State<C::Connection>>,
        entry: &Slot<C>,
    ) -> CheckIn {
        if self.is_closed() {
            if state.in_use.remove(&entry.id()).is_some() {
                state.size -= 1;
            }
            return CheckIn::Closed;
        }
        if state.in_use.remove(&entry.id()).is_none() {
            return CheckIn::Foreign;
        }
        state.counters.released += 1;

        if state.size > state.capacity || state.available.len() >= state.capacity {
            state.size -= 1;
            tracing::debug!(
                pool = self.name(),
                id = %entry.id(),
                size = state.size,
                capacity = state.capacity,
                "capacity exceeded, not re-admitting connection"
            );
            return CheckIn::Discard;
        }

        state.available.push_back(Arc::clone(entry));
        drop(state);
        self.ready.add_permits(1);
        CheckIn::Readmitted
    }

    /// Drop an on-loan entry from the books. Returns `false` if it was not on loan.
    pub(crate) fn evict(&self, entry: &Slot<C>) -> bool {
        let mut state = self.state.lock();
        if state.in_use.remove(&entry.id()).is_some() {
            state.size -= 1;
            true
        } else {
            false
        }
    }

    /// Physically close an entry unless some other path already did.
    ///
    /// Returns `false` only when the connector reported a close failure.
    pub(crate) async fn close_entry(&self, entry: &Slot<C>) -> bool {
        if !entry.retire() {
            return true;
        }
        self.state.lock().counters.destroyed += 1;
        match self.connector.close(entry.conn()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    pool = self.name(),
                    id = %entry.id(),
                    error = %e,
                    "failed to close connection"
                );
                false
            }
        }
    }

    /// Probe liveness. Shared by acquire and the reaper so both agree on "dead".
    pub(crate) async fn probe(&self, entry: &Slot<C>) -> Liveness {
        if entry.is_retired() {
            return Liveness::Dead;
        }
        match self.connector.is_alive(entry.conn()).await {
            Ok(true) => Liveness::Alive,
            Ok(false) => Liveness::Dead,
            Err(e) => {
                tracing::warn!(
                    pool = self.name(),
                    id = %entry.id(),
                    error = %e,
                    "liveness probe failed"
                );
                Liveness::Unknown
            }
        }
    }

    pub(crate) fn record_reaped(&self, count: usize) {
        self.state.lock().counters.reaped += count as u64;
    }

    // -----------------------------------------------------------------------
    // Shutdown and resizing
    // -----------------------------------------------------------------------

    /// Flip `closed`. Returns `false` if the pool was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        let _state = self.state.lock();
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Empty both collections, idle entries first.
    pub(crate) fn drain(&self) -> Vec<Slot<C>> {
        let mut state = self.state.lock();
        let mut drained: Vec<_> = state.available.drain(..).collect();
        drained.extend(state.in_use.drain().map(|(_, entry)| entry));
        state.size = 0;
        drained
    }

    /// Change capacity, handing back idle entries that no longer fit.
    pub(crate) fn set_capacity(&self, capacity: usize) -> Vec<Slot<C>> {
        let mut state = self.state.lock();
        state.capacity = capacity;
        let mut excess = Vec::new();
        while state.size > capacity {
            let Ok(permit) = self.ready.try_acquire() else {
                break;
            };
            permit.forget();
            let Some(entry) = state.available.pop_back() else {
                break;
            };
            state.size -= 1;
            excess.push(entry);
        }
        excess
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub(crate) fn in_use_snapshot(&self) -> Vec<Slot<C>> {
        self.state.lock().in_use.values().cloned().collect()
    }

    pub(crate) fn contains(&self, id: Uuid) -> bool {
        let state = self.state.lock();
        state.in_use.contains_key(&id) || state.available.iter().any(|e| e.id() == id)
    }

    pub(crate) fn size(&self) -> usize {
        self.state.lock().size
    }

    pub(crate) fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub(crate) fn available_count(&self) -> usize {
        self.state.lock().available.len()
    }

    pub(crate) fn in_use_count(&self) -> usize {
        self.state.lock().in_use.len()
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            capacity: state.capacity,
            size: state.size,
            available: state.available.len(),
            in_use: state.in_use.len(),
            opening: state.opening,
            created: state.counters.created,
            destroyed: state.counters.destroyed,
            acquired: state.counters.acquired,
            released: state.counters.released,
            reaped: state.counters.reaped,
            timeouts: state.counters.timeouts,
        }
    }
}

impl<C: Connector> Drop for Shared<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
