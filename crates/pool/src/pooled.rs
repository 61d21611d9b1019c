//! Loan handles for pooled connections

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use uuid::Uuid;

/// A connection owned by the pool, shared between the pool's bookkeeping and
/// at most one caller-held [`Pooled`] loan.
pub(crate) struct Entry<T> {
    id: Uuid,
    conn: T,
    created_at: Instant,
    retired: AtomicBool,
}

impl<T> Entry<T> {
    pub(crate) fn new(conn: T) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            conn,
            created_at: Instant::now(),
            retired: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn conn(&self) -> &T {
        &self.conn
    }

    /// Mark the entry for physical close. Returns `true` exactly once.
    pub(crate) fn retire(&self) -> bool {
        !self.retired.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

/// A connection on loan from a pool.
///
/// Hand it back with [`Pool::release`](crate::Pool::release). A loan dropped
/// without release is reclaimed by the reaper on its next scan.
pub struct Pooled<T> {
    entry: Arc<Entry<T>>,
}

impl<T> Pooled<T> {
    pub(crate) fn from_entry(entry: Arc<Entry<T>>) -> Self {
        Self { entry }
    }

    pub(crate) fn into_entry(self) -> Arc<Entry<T>> {
        self.entry
    }

    /// Wrap a connection that was never checked out of a pool.
    ///
    /// Releasing it to any pool closes it and reports
    /// [`Error::ForeignResource`](crate::Error::ForeignResource).
    pub fn detached(conn: T) -> Self {
        Self {
            entry: Entry::new(conn),
        }
    }

    /// Identifier of the loan, unique across all pools.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.entry.id
    }

    /// Time since the underlying connection was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.entry.created_at.elapsed()
    }
}

impl<T> std::ops::Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entry.conn
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.entry.id)
            .field("conn", &self.entry.conn)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_deref() {
        let pooled = Pooled::detached(42u32);
        assert_eq!(*pooled, 42);
    }

    #[test]
    fn detached_loans_have_distinct_ids() {
        let a = Pooled::detached("a");
        let b = Pooled::detached("a");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn retire_fires_once() {
        let entry = Entry::new(String::from("conn"));
        assert!(entry.retire());
        assert!(!entry.retire());
    }
}
