//! Release paths: re-admission, foreign loans and dead idle replacement.

use std::time::Duration;

use pretty_assertions::assert_eq;
use reservoir_pool::testing::MockConnector;
use reservoir_pool::{ConnectParams, Connector, Error, Pool, PoolConfig, Pooled};

fn params() -> ConnectParams {
    ConnectParams::new("mock://localhost/release").unwrap()
}

fn config(capacity: usize, initial_size: usize) -> PoolConfig {
    PoolConfig {
        capacity,
        initial_size,
        max_wait: Duration::from_secs(1),
        reap_enabled: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn released_connection_is_reused() {
    let connector = MockConnector::new();
    let pool = Pool::new(connector.clone(), params(), config(2, 0)).await.unwrap();

    let first = pool.acquire().await.unwrap();
    let serial = first.serial();
    pool.release(first).await.unwrap();

    let again = pool.acquire().await.unwrap();
    assert_eq!(again.serial(), serial);
    assert_eq!(connector.opened(), 1);
}

#[tokio::test]
async fn detached_loan_is_rejected_and_closed() {
    let connector = MockConnector::new();
    let pool = Pool::new(connector.clone(), params(), config(3, 2)).await.unwrap();
    let _held = pool.acquire().await.unwrap();
    let before = pool.stats();

    let stranger = connector.open(&params()).await.unwrap();
    let loan = Pooled::detached(stranger.clone());
    assert!(!pool.contains(&loan));

    let err = pool.release(loan).await.unwrap_err();
    assert!(matches!(err, Error::ForeignResource { .. }), "got: {err:?}");
    assert_eq!(stranger.close_calls(), 1);

    let after = pool.stats();
    assert_eq!(
        (after.size, after.available, after.in_use),
        (before.size, before.available, before.in_use)
    );
}

#[tokio::test]
async fn loan_from_another_pool_is_foreign() {
    let a = Pool::new(MockConnector::new(), params(), config(2, 1)).await.unwrap();
    let b = Pool::new(MockConnector::new(), params(), config(2, 1)).await.unwrap();

    let from_a = a.acquire().await.unwrap();
    let err = b.release(from_a).await.unwrap_err();
    assert!(matches!(err, Error::ForeignResource { .. }));
    assert_eq!((b.size(), b.available_count()), (1, 1));
    // `a` still books the loan until its reaper notices.
    assert_eq!(a.in_use_count(), 1);
}

#[tokio::test]
async fn release_of_reaped_loan_changes_nothing() {
    let connector = MockConnector::new();
    let pool = Pool::new(connector.clone(), params(), config(2, 0)).await.unwrap();

    let conn = pool.acquire().await.unwrap();
    connector.connection(conn.serial()).unwrap().kill();

    let report = pool.reap_now().await;
    assert_eq!(report.evicted, 1);
    assert_eq!(pool.size(), 0);
    assert!(!pool.contains(&conn));

    let err = pool.release(conn).await.unwrap_err();
    assert!(matches!(err, Error::ForeignResource { .. }));
    assert_eq!((pool.size(), pool.available_count(), pool.in_use_count()), (0, 0, 0));
    // Already closed by the reaper; the rejected release does not close twice.
    assert_eq!(connector.closed(), 1);
}

#[tokio::test]
async fn dead_idle_connection_is_replaced() {
    let connector = MockConnector::new();
    let pool = Pool::new(connector.clone(), params(), config(1, 1)).await.unwrap();
    connector.connection(0).unwrap().kill();

    let conn = pool.acquire().await.expect("replacement should be opened");
    assert_eq!(conn.serial(), 1);
    assert_eq!(connector.opened(), 2);
    assert_eq!(connector.connection(0).unwrap().close_calls(), 1);
    assert_eq!(pool.size(), 1);
}

#[tokio::test]
async fn idle_connection_failing_its_probe_is_replaced() {
    let connector = MockConnector::new();
    let pool = Pool::new(connector.clone(), params(), config(2, 1)).await.unwrap();

    connector.fail_probes(true);
    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.serial(), 1);
    assert_eq!(pool.size(), 1);
    assert_eq!(pool.stats().destroyed, 1);
}

#[tokio::test]
async fn idle_order_is_first_in_first_out() {
    let pool = Pool::new(MockConnector::new(), params(), config(3, 0)).await.unwrap();

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    let (sa, sb) = (a.serial(), b.serial());
    pool.release(b).await.unwrap();
    pool.release(a).await.unwrap();

    assert_eq!(pool.acquire().await.unwrap().serial(), sb);
    assert_eq!(pool.acquire().await.unwrap().serial(), sa);
}

#[tokio::test]
async fn counters_track_round_trips() {
    let pool = Pool::new(MockConnector::new(), params(), config(2, 0)).await.unwrap();
    for _ in 0..3 {
        let conn = pool.acquire().await.unwrap();
        pool.release(conn).await.unwrap();
    }
    let stats = pool.stats();
    assert_eq!((stats.created, stats.acquired, stats.released), (1, 3, 3));
    assert_eq!(stats.to_string(), "size 1/2 (available 1, in use 0, opening 0)");
}
