//! Connection pool: bounded, capacity-first admission over a [`Connector`].
//!
//! `acquire` prefers an idle connection, then opening a new one while under
//! capacity, and only then waits. `release` re-admits or discards, never both.
//! `close` stops admission, joins the reaper and drains every connection.

mod state;
mod stats;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::TryAcquireError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigWarning, PoolConfig};
use crate::connector::{ConnectParams, Connector};
use crate::error::{Error, Result};
use crate::pooled::Pooled;
use crate::reaper::{self, ReapReport};

pub(crate) use state::{CheckIn, Liveness, Shared, Slot};
pub use stats::PoolStats;

/// Outcome of [`Pool::close`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseReport {
    /// Connections drained by this call.
    pub drained: usize,
    /// Drained connections whose close reported an error.
    pub failed: usize,
}

/// Bounded pool of connections opened by `C`.
///
/// Cloning is cheap; clones share the same pool.
pub struct Pool<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> std::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("connector", &self.shared.name())
            .field("closed", &self.shared.is_closed())
            .field("stats", &self.shared.stats())
            .finish()
    }
}

impl<C: Connector> Pool<C> {
    /// Build a pool and open its initial connections.
    ///
    /// The configuration is normalized first (see [`PoolConfig::normalize`]).
    /// Must be called inside a Tokio runtime when reaping is enabled.
    ///
    /// # Errors
    /// [`Error::ConfigurationInvalid`] if `connector` cannot serve `params`;
    /// the connector's error if an initial connection fails to open.
    pub async fn new(connector: C, params: ConnectParams, config: PoolConfig) -> Result<Self> {
        if !connector.accepts(&params) {
            return Err(Error::configuration(format!(
                "connector '{}' cannot handle '{}' urls",
                connector.name(),
                params.scheme()
            )));
        }
        let (config, warnings) = config.normalize();

        let mut initial = Vec::with_capacity(config.initial_size);
        for _ in 0..config.initial_size {
            match connector.open(&params).await {
                Ok(conn) => initial.push(conn),
                Err(e) => {
                    for conn in &initial {
                        if let Err(close_err) = connector.close(conn).await {
                            tracing::warn!(
                                pool = connector.name(),
                                error = %close_err,
                                "failed to close initial connection"
                            );
                        }
                    }
                    return Err(Error::creation(connector.name(), e));
                }
            }
        }

        let shared = Arc::new(Shared::new(connector, params, config, warnings, initial));
        if shared.config.reap_enabled {
            let handle = reaper::spawn(&shared);
            *shared.reaper.lock() = Some(handle);
        } else {
            tracing::info!(pool = shared.name(), "reaper disabled");
        }
        tracing::debug!(pool = shared.name(), stats = %shared.stats(), "pool ready");

        Ok(Self { shared })
    }

    /// Acquire a connection, waiting at most `config().max_wait`.
    pub async fn acquire(&self) -> Result<Pooled<C::Connection>> {
        self.acquire_timeout(self.shared.config.max_wait).await
    }

    /// Acquire a connection, waiting at most `timeout` once capacity is reached.
    ///
    /// The wait ends only when a connection is released back to the idle set
    /// (or on close). Capacity freed by a discard or an eviction while the
    /// caller waits does not wake it; a later acquire opens the fresh
    /// connection instead.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Pooled<C::Connection>> {
        self.admit(timeout, None).await
    }

    /// Like [`acquire_timeout`](Self::acquire_timeout), but gives up with
    /// [`Error::Interrupted`] as soon as `cancel` fires during the wait.
    pub async fn acquire_cancellable(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Pooled<C::Connection>> {
        self.admit(timeout, Some(cancel)).await
    }

    async fn admit(
        &self,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Pooled<C::Connection>> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(Error::PoolClosed);
        }

        // Idle connection, no waiting.
        match shared.ready.try_acquire() {
            Ok(permit) => {
                permit.forget();
                if let Some(entry) = shared.take_available() {
                    if let Some(entry) = shared.ensure_alive(entry).await? {
                        return Ok(Pooled::from_entry(entry));
                    }
                } else if shared.is_closed() {
                    return Err(Error::PoolClosed);
                }
            }
            Err(TryAcquireError::Closed) => return Err(Error::PoolClosed),
            Err(TryAcquireError::NoPermits) => {}
        }

        // Fresh connection while under capacity.
        if shared.try_reserve() {
            return shared.open_reserved().await.map(Pooled::from_entry);
        }

        // Wait for a release.
        let started = Instant::now();
        let wait = tokio::time::timeout(timeout, shared.ready.acquire());
        let waited = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => {
                    return Err(Error::Interrupted { waited: started.elapsed() });
                }
                res = wait => res,
            },
            None => wait.await,
        };
        let permit = match waited {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => return Err(Error::PoolClosed),
            Err(_elapsed) => {
                shared.record_timeout();
                tracing::debug!(
                    pool = shared.name(),
                    stats = %shared.stats(),
                    "timed out waiting for a connection"
                );
                return Err(Error::Timeout { waited: timeout });
            }
        };
        permit.forget();

        if shared.is_closed() {
            return Err(Error::PoolClosed);
        }
        let exhausted = || {
            let stats = shared.stats();
            tracing::debug!(pool = shared.name(), %stats, "no usable connection after waiting");
            Error::PoolExhausted {
                size: stats.size,
                capacity: stats.capacity,
            }
        };
        let Some(entry) = shared.take_available() else {
            return Err(if shared.is_closed() {
                Error::PoolClosed
            } else {
                exhausted()
            });
        };
        match shared.ensure_alive(entry).await? {
            Some(entry) => Ok(Pooled::from_entry(entry)),
            None => Err(exhausted()),
        }
    }

    /// Return a loan to the pool.
    ///
    /// After `close`, the connection is closed instead of re-admitted.
    ///
    /// # Errors
    /// [`Error::ForeignResource`] if the loan is not from this pool (or was
    /// already reclaimed). The connection is closed and pool counters are
    /// left untouched.
    pub async fn release(&self, conn: Pooled<C::Connection>) -> Result<()> {
        let shared = &self.shared;
        let entry = conn.into_entry();
        match shared.check_in(&entry) {
            CheckIn::Readmitted => Ok(()),
            CheckIn::Discard | CheckIn::Closed => {
                shared.close_entry(&entry).await;
                Ok(())
            }
            CheckIn::Foreign => {
                tracing::warn!(
                    pool = shared.name(),
                    id = %entry.id(),
                    "release of a connection this pool does not own, closing it"
                );
                shared.close_entry(&entry).await;
                Err(Error::ForeignResource { id: entry.id() })
            }
        }
    }

    /// Shut the pool down. Idempotent.
    ///
    /// Stops admission, waits for the reaper and any
    /// [`reap_now`](Self::reap_now) scan to finish, then closes every
    /// connection, idle ones first. Connections still on loan are closed
    /// underneath their holders. Close failures are logged and counted, never
    /// propagated.
    pub async fn close(&self) -> CloseReport {
        let shared = &self.shared;
        if !shared.mark_closed() {
            return CloseReport::default();
        }
        shared.ready.close();
        shared.cancel.cancel();

        let reaper = shared.reaper.lock().take();
        if let Some(handle) = reaper
            && let Err(e) = handle.await
        {
            tracing::error!(pool = shared.name(), error = %e, "reaper task failed");
        }

        // Wait out any on-demand scan still probing; later scans see `closed`.
        let _scans = shared.scans.lock().await;

        let mut report = CloseReport::default();
        for entry in shared.drain() {
            report.drained += 1;
            if !shared.close_entry(&entry).await {
                report.failed += 1;
            }
        }
        tracing::info!(
            pool = shared.name(),
            drained = report.drained,
            failed = report.failed,
            "pool closed"
        );
        report
    }

    /// Run one reaper scan now, independent of the background schedule.
    pub async fn reap_now(&self) -> ReapReport {
        if self.shared.is_closed() {
            return ReapReport::default();
        }
        reaper::scan(&self.shared).await
    }

    /// Change the hard capacity.
    ///
    /// Shrinking closes idle connections that no longer fit; connections on
    /// loan above the new capacity are discarded as they are released.
    ///
    /// # Errors
    /// [`Error::ConfigurationInvalid`] for a zero capacity,
    /// [`Error::PoolClosed`] after `close`.
    pub async fn resize(&self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(Error::configuration("capacity must be greater than 0"));
        }
        if self.shared.is_closed() {
            return Err(Error::PoolClosed);
        }
        for entry in self.shared.set_capacity(capacity) {
            self.shared.close_entry(&entry).await;
        }
        Ok(())
    }

    /// Connections owned by the pool (idle + on loan).
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.size()
    }

    /// Current hard capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Idle connections.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.shared.available_count()
    }

    /// Connections on loan.
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.shared.in_use_count()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Whether `conn` is owned by this pool.
    #[must_use]
    pub fn contains(&self, conn: &Pooled<C::Connection>) -> bool {
        self.shared.contains(conn.id())
    }

    /// The normalized configuration in effect.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Corrections applied to the configuration at construction.
    #[must_use]
    pub fn config_warnings(&self) -> &[ConfigWarning] {
        &self.shared.warnings
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }
}
