//! Pool statistics

use std::fmt;

/// Point-in-time snapshot of a pool.
///
/// Gauges (`size`, `available`, `in_use`, `opening`) are read under one lock,
/// so `size == available + in_use` holds for every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Current hard capacity.
    pub capacity: usize,
    /// Connections owned by the pool.
    pub size: usize,
    /// Idle connections ready to hand out.
    pub available: usize,
    /// Connections currently on loan.
    pub in_use: usize,
    /// Connections being opened right now.
    pub opening: usize,
    /// Total connections ever opened.
    pub created: u64,
    /// Total connections ever closed by the pool.
    pub destroyed: u64,
    /// Total successful acquisitions.
    pub acquired: u64,
    /// Total releases accepted back into the pool's bookkeeping.
    pub released: u64,
    /// Loans recovered by the reaper (dead or abandoned).
    pub reaped: u64,
    /// Acquires that ran out their wait budget.
    pub timeouts: u64,
}

/// Renders the capacity report written to debug logs on exhaustion.
impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "size {}/{} (available {}, in use {}, opening {})",
            self.size, self.capacity, self.available, self.in_use, self.opening
        )
    }
}
