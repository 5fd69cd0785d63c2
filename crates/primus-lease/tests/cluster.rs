//! Multi-node election scenarios against a shared SQLite database.
//!
//! Every "node" here is an independent `DistributedLease` with its own
//! connections, exactly as separate processes would look to the database.

use std::time::Duration;

use sqlx::AnyConnection;
use sqlx::{Connection, Row};

use primus_lease::db::DistributedLease;
use primus_lease::{DbLeaseConfig, Lease};

fn config_for(file: &tempfile::NamedTempFile) -> DbLeaseConfig {
    let mut cfg = DbLeaseConfig::new(format!("sqlite://{}?mode=rwc", file.path().display()));
    cfg.lock_delay_ms = 50;
    cfg
}

#[tokio::test]
async fn test_cold_standby_takes_over_on_release() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut a = DistributedLease::connect(config_for(&file)).await;
    let mut b = DistributedLease::connect(config_for(&file)).await;

    // A boots first and becomes master; B stays cold.
    assert!(a.acquire().await.unwrap());
    assert!(!b.acquire().await.unwrap());

    // A renews for a while; B keeps polling and never gets in.
    for _ in 0..3 {
        assert!(a.is_alive().await.unwrap());
        assert!(!b.acquire().await.unwrap());
    }

    // Orderly shutdown of A hands the lease to B on its next poll.
    a.release().await;
    assert!(b.acquire().await.unwrap());
    assert!(b.is_alive().await.unwrap());

    // A restarts as the standby now.
    assert!(!a.acquire().await.unwrap());
}

#[tokio::test]
async fn test_standby_takes_over_after_master_crash() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut a = DistributedLease::connect(config_for(&file)).await;
    let mut b = DistributedLease::connect(config_for(&file)).await;

    assert!(a.acquire().await.unwrap());
    // B observes the holder and starts its staleness clock.
    assert!(!b.acquire().await.unwrap());

    // A "crashes": no release, no further renewals. After twice A's declared
    // 50ms interval, B presumes it dead and steals.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(b.acquire().await.unwrap());

    // A coming back finds its renewal predicate no longer matches.
    assert!(!a.is_alive().await.unwrap());
}

#[tokio::test]
async fn test_at_most_one_master_among_three_nodes() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut nodes = Vec::new();
    for _ in 0..3 {
        nodes.push(DistributedLease::connect(config_for(&file)).await);
    }

    // Several poll rounds: exactly one node ever answers true.
    for _ in 0..4 {
        let mut masters = Vec::new();
        for node in nodes.iter_mut() {
            if node.acquire().await.unwrap() {
                masters.push(node.node_id());
            }
        }
        assert_eq!(masters.len(), 1);
        assert_eq!(masters[0], nodes[0].node_id());
    }
}

#[tokio::test]
async fn test_node_ids_unique_across_restarts() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let a = DistributedLease::connect(config_for(&file)).await;
    let b = DistributedLease::connect(config_for(&file)).await;
    // A restarted instance is a new node and gets a fresh id.
    let a2 = DistributedLease::connect(config_for(&file)).await;

    assert_eq!(a.node_id(), 1);
    assert_eq!(b.node_id(), 2);
    assert_eq!(a2.node_id(), 3);
}

#[tokio::test]
async fn test_steal_refused_when_holder_renews_in_time() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut a = DistributedLease::connect(config_for(&file)).await;
    let mut b = DistributedLease::connect(config_for(&file)).await;

    assert!(a.acquire().await.unwrap());
    assert!(!b.acquire().await.unwrap());

    // A renews just inside every staleness window, so B must never steal no
    // matter how long it keeps trying.
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(a.is_alive().await.unwrap());
        assert!(!b.acquire().await.unwrap());
    }
}

#[tokio::test]
async fn test_renewal_between_read_and_steal_defeats_the_steal() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let cfg = config_for(&file);
    let mut a = DistributedLease::connect(cfg.clone()).await;
    assert!(a.acquire().await.unwrap());

    // A rival reads the lease row, as the first half of a steal attempt.
    let mut conn = AnyConnection::connect(&cfg.url).await.unwrap();
    let row = sqlx::query("SELECT ID, STATE FROM KARAF_LOCK")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    let holder: i64 = row.try_get(0).unwrap();
    let stale_epoch: i64 = row.try_get(1).unwrap();
    assert_eq!(holder, a.node_id());

    // The holder renews before the rival writes.
    assert!(a.is_alive().await.unwrap());

    // The steal is conditioned on the epoch the rival read, so it must now
    // match no row.
    let steal = format!(
        "UPDATE KARAF_LOCK SET ID = 99, STATE = 1, LOCK_DELAY = 50 \
         WHERE (ID = 0 OR ID = {holder}) AND STATE = {stale_epoch}"
    );
    let result = sqlx::query(&steal).execute(&mut conn).await.unwrap();
    assert_eq!(result.rows_affected(), 0);
    assert!(a.is_alive().await.unwrap());
}

#[tokio::test]
async fn test_release_by_non_holder_changes_nothing() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut a = DistributedLease::connect(config_for(&file)).await;
    let mut b = DistributedLease::connect(config_for(&file)).await;

    assert!(a.acquire().await.unwrap());
    b.release().await;
    b.release().await;
    assert!(a.is_alive().await.unwrap());
    assert!(!b.acquire().await.unwrap());
}
