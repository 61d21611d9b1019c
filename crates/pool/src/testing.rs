//! Testing utilities: an in-memory connector with scriptable failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connector::{ConnectParams, Connector};

/// Error reported by [`MockConnector`].
#[derive(Debug, thiserror::Error)]
pub enum MockError {
    #[error("mock open refused")]
    OpenRefused,
    #[error("mock probe failed")]
    ProbeFailed,
    #[error("mock close failed")]
    CloseFailed,
}

#[derive(Debug, Default)]
struct ConnState {
    dead: AtomicBool,
    close_calls: AtomicU32,
}

/// A fake physical connection.
///
/// Clones observe the same underlying state, so a test can keep a handle to
/// a connection it has released and still kill it.
#[derive(Debug, Clone)]
pub struct MockConnection {
    serial: u64,
    state: Arc<ConnState>,
}

impl MockConnection {
    /// Order in which the connector opened this connection, from zero.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Simulate the peer dropping the connection.
    pub fn kill(&self) {
        self.state.dead.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.state.dead.load(Ordering::SeqCst)
    }

    /// How many times the connector closed this connection.
    #[must_use]
    pub fn close_calls(&self) -> u32 {
        self.state.close_calls.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Behavior {
    fail_opens: AtomicBool,
    /// Refuse opens once this many have succeeded (0 = never).
    open_limit: AtomicU64,
    fail_probes: AtomicBool,
    fail_closes: AtomicBool,
    open_latency: Mutex<Duration>,
    probe_latency: Mutex<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    opened: AtomicU64,
    closed: AtomicU64,
    probes: AtomicU64,
    behavior: Behavior,
    connections: Mutex<Vec<MockConnection>>,
}

/// In-memory [`Connector`] serving `mock://` urls.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    inner: Arc<Inner>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent open fail (or succeed again).
    pub fn fail_opens(&self, fail: bool) {
        self.inner.behavior.fail_opens.store(fail, Ordering::SeqCst);
    }

    /// Let `n` opens succeed in total, then refuse the rest.
    pub fn fail_opens_after(&self, n: u64) {
        self.inner.behavior.open_limit.store(n, Ordering::SeqCst);
    }

    /// Make liveness probes return an error.
    pub fn fail_probes(&self, fail: bool) {
        self.inner.behavior.fail_probes.store(fail, Ordering::SeqCst);
    }

    /// Make closes report an error (the connection still counts as closed).
    pub fn fail_closes(&self, fail: bool) {
        self.inner.behavior.fail_closes.store(fail, Ordering::SeqCst);
    }

    /// Delay each open by `latency`.
    pub fn set_open_latency(&self, latency: Duration) {
        *self.inner.behavior.open_latency.lock() = latency;
    }

    /// Delay each liveness probe by `latency`.
    pub fn set_probe_latency(&self, latency: Duration) {
        *self.inner.behavior.probe_latency.lock() = latency;
    }

    /// Connections opened so far.
    #[must_use]
    pub fn opened(&self) -> u64 {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Close calls made so far.
    #[must_use]
    pub fn closed(&self) -> u64 {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Liveness probes made so far.
    #[must_use]
    pub fn probes(&self) -> u64 {
        self.inner.probes.load(Ordering::SeqCst)
    }

    /// The `serial`-th connection this connector opened.
    #[must_use]
    pub fn connection(&self, serial: u64) -> Option<MockConnection> {
        self.inner
            .connections
            .lock()
            .iter()
            .find(|c| c.serial == serial)
            .cloned()
    }

    /// Every connection this connector opened, in order.
    #[must_use]
    pub fn connections(&self) -> Vec<MockConnection> {
        self.inner.connections.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;
    type Error = MockError;

    fn name(&self) -> &str {
        "mock"
    }

    fn accepts(&self, params: &ConnectParams) -> bool {
        params.scheme() == "mock"
    }

    async fn open(&self, _params: &ConnectParams) -> Result<MockConnection, MockError> {
        let behavior = &self.inner.behavior;
        let latency = *behavior.open_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let limit = behavior.open_limit.load(Ordering::SeqCst);
        if behavior.fail_opens.load(Ordering::SeqCst)
            || (limit > 0 && self.inner.opened.load(Ordering::SeqCst) >= limit)
        {
            return Err(MockError::OpenRefused);
        }

        let conn = MockConnection {
            serial: self.inner.opened.fetch_add(1, Ordering::SeqCst),
            state: Arc::new(ConnState::default()),
        };
        self.inner.connections.lock().push(conn.clone());
        Ok(conn)
    }

    async fn is_alive(&self, conn: &MockConnection) -> Result<bool, MockError> {
        self.inner.probes.fetch_add(1, Ordering::SeqCst);
        let latency = *self.inner.behavior.probe_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.inner.behavior.fail_probes.load(Ordering::SeqCst) {
            return Err(MockError::ProbeFailed);
        }
        Ok(conn.is_alive())
    }

    async fn close(&self, conn: &MockConnection) -> Result<(), MockError> {
        self.inner.closed.fetch_add(1, Ordering::SeqCst);
        conn.state.close_calls.fetch_add(1, Ordering::SeqCst);
        conn.kill();
        if self.inner.behavior.fail_closes.load(Ordering::SeqCst) {
            return Err(MockError::CloseFailed);
        }
        Ok(())
    }
}
