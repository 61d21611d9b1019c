//! Background reaper: dead loans, abandoned loans and failing probes.

use std::time::Duration;

use reservoir_pool::testing::MockConnector;
use reservoir_pool::{ConnectParams, Pool, PoolConfig};

const INTERVAL: Duration = Duration::from_secs(1);

fn params() -> ConnectParams {
    ConnectParams::new("mock://localhost/reaper").unwrap()
}

fn reaping(capacity: usize) -> PoolConfig {
    PoolConfig {
        capacity,
        initial_size: 0,
        max_wait: INTERVAL * 3,
        reap_enabled: true,
        reap_interval: INTERVAL,
    }
}

/// Sleep just past the next reaper tick.
async fn next_tick() {
    tokio::time::sleep(INTERVAL + Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn dead_loan_is_discarded_within_one_interval() {
    let connector = MockConnector::new();
    let pool = Pool::new(connector.clone(), params(), reaping(2)).await.unwrap();

    let conn = pool.acquire().await.unwrap();
    let mock = connector.connection(conn.serial()).unwrap();
    mock.kill();
    assert_eq!(pool.size(), 1);

    next_tick().await;

    assert_eq!(pool.size(), 0);
    assert_eq!(pool.in_use_count(), 0);
    assert!(!pool.contains(&conn));
    assert_eq!(mock.close_calls(), 1);
    assert_eq!(pool.stats().reaped, 1);
}

#[tokio::test(start_paused = true)]
async fn abandoned_loan_is_returned_to_the_pool() {
    let connector = MockConnector::new();
    let pool = Pool::new(connector.clone(), params(), reaping(1)).await.unwrap();

    let conn = pool.acquire().await.unwrap();
    drop(conn);
    assert_eq!((pool.available_count(), pool.in_use_count()), (0, 1));

    next_tick().await;

    assert_eq!((pool.available_count(), pool.in_use_count()), (1, 0));
    let again = pool.acquire_timeout(Duration::ZERO).await.unwrap();
    assert_eq!(again.serial(), 0);
    assert_eq!(connector.opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn held_live_loan_is_left_alone() {
    let connector = MockConnector::new();
    let pool = Pool::new(connector.clone(), params(), reaping(2)).await.unwrap();

    let conn = pool.acquire().await.unwrap();
    next_tick().await;
    next_tick().await;

    assert!(pool.contains(&conn));
    assert_eq!(pool.in_use_count(), 1);
    assert!(connector.probes() >= 2);
    pool.release(conn).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failing_probe_skips_the_loan_and_keeps_scanning() {
    let connector = MockConnector::new();
    let pool = Pool::new(connector.clone(), params(), reaping(2)).await.unwrap();

    let _a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    connector.fail_probes(true);

    let report = pool.reap_now().await;
    assert_eq!((report.scanned, report.failed), (2, 2));
    assert_eq!(pool.in_use_count(), 2);

    // The reaper survives probe failures and acts once probes recover.
    next_tick().await;
    connector.fail_probes(false);
    connector.connection(b.serial()).unwrap().kill();
    next_tick().await;
    assert_eq!(pool.in_use_count(), 1);
    assert_eq!(pool.size(), 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_reaper_never_probes() {
    let connector = MockConnector::new();
    let pool = Pool::new(
        connector.clone(),
        params(),
        PoolConfig {
            reap_enabled: false,
            ..reaping(2)
        },
    )
    .await
    .unwrap();

    let conn = pool.acquire().await.unwrap();
    connector.connection(conn.serial()).unwrap().kill();
    tokio::time::sleep(INTERVAL * 5).await;

    assert_eq!(connector.probes(), 0);
    assert_eq!(pool.in_use_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reaper_stops_after_close() {
    let connector = MockConnector::new();
    let pool = Pool::new(connector.clone(), params(), reaping(2)).await.unwrap();
    let _conn = pool.acquire().await.unwrap();

    next_tick().await;
    let probes = connector.probes();
    pool.close().await;

    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(connector.probes(), probes);
}

#[tokio::test(start_paused = true)]
async fn reaper_stops_when_every_handle_is_dropped() {
    let connector = MockConnector::new();
    let pool = Pool::new(connector.clone(), params(), reaping(2)).await.unwrap();
    let conn = pool.acquire().await.unwrap();
    drop(pool);

    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(connector.probes(), 0);
    assert!(conn.is_alive());
}

#[tokio::test(start_paused = true)]
async fn unsafe_reap_interval_is_reset() {
    let pool = Pool::new(
        MockConnector::new(),
        params(),
        PoolConfig {
            max_wait: Duration::from_secs(2),
            reap_interval: Duration::from_secs(1),
            ..reaping(2)
        },
    )
    .await
    .unwrap();

    assert_eq!(pool.config().reap_interval, Duration::from_secs(10));
    assert_eq!(pool.config().max_wait, Duration::from_secs(30));
    assert_eq!(pool.config_warnings().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn loan_reacquired_during_scan_stays_with_its_holder() {
    let connector = MockConnector::new();
    let config = PoolConfig {
        reap_enabled: false,
        ..reaping(2)
    };
    let pool = Pool::new(connector.clone(), params(), config).await.unwrap();
    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    connector.set_probe_latency(Duration::from_millis(100));

    let scan = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.reap_now().await })
    };
    tokio::task::yield_now().await;

    // Both loans go idle while the scan is probing, then are handed out again.
    pool.release(a).await.unwrap();
    pool.release(b).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let (x, y) = tokio::join!(pool.acquire(), pool.acquire());
    let (x, y) = (x.unwrap(), y.unwrap());

    let report = scan.await.unwrap();
    assert_eq!(report.reclaimed, 0, "a held loan was reclaimed: {report:?}");
    assert_eq!((pool.in_use_count(), pool.available_count()), (2, 0));
    assert!(pool.contains(&x) && pool.contains(&y));
    assert!(
        pool.acquire_timeout(Duration::ZERO).await.is_err(),
        "a connection on loan was handed out twice"
    );

    pool.release(x).await.unwrap();
    pool.release(y).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn close_waits_for_an_in_flight_scan() {
    let connector = MockConnector::new();
    let config = PoolConfig {
        reap_enabled: false,
        ..reaping(3)
    };
    let pool = Pool::new(connector.clone(), params(), config).await.unwrap();
    let _a = pool.acquire().await.unwrap();
    let _b = pool.acquire().await.unwrap();
    let _c = pool.acquire().await.unwrap();
    connector.set_probe_latency(Duration::from_millis(100));

    let scan = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.reap_now().await })
    };
    tokio::task::yield_now().await;

    pool.close().await;
    let probes = connector.probes();
    assert!(scan.is_finished(), "scan still running after close returned");

    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(connector.probes(), probes);
    // The scan stopped at the loan after the one it was probing.
    assert_eq!(probes, 1);

    let report = scan.await.unwrap();
    assert_eq!((report.scanned, report.evicted, report.reclaimed), (3, 0, 0));
    assert_eq!(connector.closed(), 3);
}
