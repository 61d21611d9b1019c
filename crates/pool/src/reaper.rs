//! Background reclamation of leaked loans.
//!
//! Callers that let a connection die, or drop their [`Pooled`](crate::Pooled)
//! handle, without releasing it would otherwise shrink the pool's effective
//! capacity for good. The reaper periodically scans the loans and hands that
//! capacity back:
//!
//! - a loan whose connection is dead is force-discarded (closed, `size - 1`)
//! - a loan nobody holds any more is released back to the pool if alive
//!
//! It stops when the pool's cancellation token fires or the pool is dropped.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::connector::Connector;
use crate::pool::{CheckIn, Liveness, Shared, Slot};

/// Summary of one reaper scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Loans examined.
    pub scanned: usize,
    /// Dead loans discarded.
    pub evicted: usize,
    /// Abandoned live loans returned to the pool.
    pub reclaimed: usize,
    /// Loans skipped because the probe itself failed.
    pub failed: usize,
}

impl ReapReport {
    /// Whether the scan changed anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evicted == 0 && self.reclaimed == 0 && self.failed == 0
    }
}

/// Spawn the reaper loop for `shared`.
///
/// The task keeps only a weak reference, so it never extends the pool's life.
pub(crate) fn spawn<C: Connector>(shared: &Arc<Shared<C>>) -> JoinHandle<()> {
    let weak: Weak<Shared<C>> = Arc::downgrade(shared);
    let cancel = shared.cancel.clone();
    let period = shared.config.reap_interval;
    let name = shared.name().to_owned();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(pool = %name, period_ms = period.as_millis() as u64, "reaper started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(shared) = weak.upgrade() else {
                break;
            };
            if shared.is_closed() {
                break;
            }
            let report = scan(&shared).await;
            if !report.is_empty() {
                tracing::debug!(
                    pool = %name,
                    scanned = report.scanned,
                    evicted = report.evicted,
                    reclaimed = report.reclaimed,
                    failed = report.failed,
                    "reaper scan"
                );
            }
        }

        tracing::debug!(pool = %name, "reaper stopped");
    })
}

/// Scan a snapshot of the current loans once.
///
/// Loans handed out after the snapshot was taken wait for the next scan. A
/// probe failure on one loan is logged and the scan moves on. Scans run one
/// at a time and stop at the next loan once the pool is closed.
pub(crate) async fn scan<C: Connector>(shared: &Shared<C>) -> ReapReport {
    let _scan = shared.scans.lock().await;
    if shared.is_closed() {
        return ReapReport::default();
    }
    let snapshot = shared.in_use_snapshot();
    let mut report = ReapReport {
        scanned: snapshot.len(),
        ..ReapReport::default()
    };

    for entry in snapshot {
        if shared.is_closed() {
            break;
        }
        match shared.probe(&entry).await {
            Liveness::Dead => {
                if shared.evict(&entry) {
                    shared.close_entry(&entry).await;
                    report.evicted += 1;
                    tracing::debug!(
                        pool = shared.name(),
                        id = %entry.id(),
                        "reaped dead connection"
                    );
                }
            }
            Liveness::Alive => {
                if reclaim(shared, &entry).await {
                    report.reclaimed += 1;
                    tracing::debug!(
                        pool = shared.name(),
                        id = %entry.id(),
                        "reclaimed abandoned connection"
                    );
                }
            }
            Liveness::Unknown => report.failed += 1,
        }
    }

    shared.record_reaped(report.evicted + report.reclaimed);
    report
}

/// Release a live loan through the normal check-in path if nobody holds it.
///
/// Whether the loan is abandoned is decided under the state lock, after the
/// probe, so a loan released and re-acquired while it was being probed stays
/// with its new holder.
async fn reclaim<C: Connector>(shared: &Shared<C>, entry: &Slot<C>) -> bool {
    match shared.reclaim_abandoned(entry) {
        Some(CheckIn::Readmitted) => true,
        Some(CheckIn::Discard) => {
            shared.close_entry(entry).await;
            true
        }
        Some(CheckIn::Closed) => {
            shared.close_entry(entry).await;
            false
        }
        // Still held, or already released, evicted or drained.
        Some(CheckIn::Foreign) | None => false,
    }
}
