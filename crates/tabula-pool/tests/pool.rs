//! Pool behaviour over mock-backed client connections.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;
use tabula_client::ConnectParams;
use tabula_driver::BackendError;
use tabula_pool::{ClientManager, ConnectionPool, PoolError, ScopedConnection};
use tabula_testing::MockServer;

fn manager(server: &MockServer) -> ClientManager {
    let server = server.clone();
    ClientManager::new(
        ConnectParams::new().server("db.internal").database("shop"),
        move || server.backend(),
    )
}

fn pool(server: &MockServer) -> ConnectionPool<ClientManager> {
    ConnectionPool::builder(manager(server)).build().unwrap()
}

#[test]
fn concurrent_grabs_get_distinct_connections() {
    tabula_testing::init_tracing();
    let server = MockServer::new();
    let pool = pool(&server);

    let a = pool.grab().unwrap();
    let b = pool.grab().unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(server.live_sessions(), 2);

    pool.release(a).unwrap();
    pool.release(b).unwrap();
    let status = pool.status();
    assert_eq!(status.available, 2);
    assert_eq!(status.in_use, 0);
}

#[test]
fn released_connection_is_reused() {
    let server = MockServer::new();
    let pool = pool(&server);

    let mut conn = pool.grab().unwrap();
    conn.execute("UPDATE stock SET qty = 0").unwrap();
    let id = conn.id();
    pool.release(conn).unwrap();

    let conn = pool.grab().unwrap();
    assert_eq!(conn.id(), id);
    assert_eq!(server.connect_count(), 1);
    assert_eq!(pool.metrics().reuses, 1);
    pool.release(conn).unwrap();
}

#[test]
fn most_recently_released_is_preferred() {
    let server = MockServer::new();
    let pool = pool(&server);

    let older = pool.grab().unwrap();
    let newer = pool.grab().unwrap();
    let (older_id, newer_id) = (older.id(), newer.id());
    pool.release(older).unwrap();
    thread::sleep(Duration::from_millis(2));
    pool.release(newer).unwrap();

    let conn = pool.grab().unwrap();
    assert_eq!(conn.id(), newer_id);
    assert_ne!(conn.id(), older_id);
    pool.release(conn).unwrap();
}

#[test]
fn idle_connections_are_evicted() {
    let server = MockServer::new();
    let pool = ConnectionPool::builder(manager(&server))
        .max_idle_time(Duration::from_millis(20))
        .build()
        .unwrap();

    let conn = pool.grab().unwrap();
    pool.release(conn).unwrap();
    assert_eq!(pool.status().available, 1);

    thread::sleep(Duration::from_millis(60));
    let conn = pool.grab().unwrap();
    assert_eq!(server.connect_count(), 2);
    assert_eq!(server.live_sessions(), 1);
    assert_eq!(pool.metrics().idle_evictions, 1);
    pool.release(conn).unwrap();
}

#[test]
fn manager_idle_time_overrides_config() {
    let server = MockServer::new();
    let pool = ConnectionPool::builder(manager(&server).max_idle_time(Duration::from_millis(10)))
        .max_idle_time(Duration::from_secs(3600))
        .build()
        .unwrap();
    assert_eq!(pool.max_idle_time(), Some(Duration::from_millis(10)));

    let conn = pool.grab().unwrap();
    pool.release(conn).unwrap();
    thread::sleep(Duration::from_millis(40));
    assert_eq!(pool.sweep(), 1);
    assert!(pool.is_empty());
}

#[test]
fn no_eviction_without_idle_limit() {
    let server = MockServer::new();
    let pool = pool(&server);
    assert_eq!(pool.max_idle_time(), None);

    let conn = pool.grab().unwrap();
    pool.release(conn).unwrap();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(pool.sweep(), 0);
    assert_eq!(pool.status().available, 1);
}

#[test]
fn shrink_drops_only_free_connections() {
    let server = MockServer::new();
    let pool = pool(&server);

    let kept = pool.grab().unwrap();
    let a = pool.grab().unwrap();
    let b = pool.grab().unwrap();
    pool.release(a).unwrap();
    pool.release(b).unwrap();

    pool.shrink();
    let status = pool.status();
    assert_eq!(status.available, 0);
    assert_eq!(status.in_use, 1);
    assert_eq!(server.live_sessions(), 1);

    pool.release(kept).unwrap();
}

#[test]
fn dropping_the_pool_closes_idle_connections() {
    let server = MockServer::new();
    {
        let pool = pool(&server);
        let a = pool.grab().unwrap();
        let b = pool.grab().unwrap();
        pool.release(a).unwrap();
        pool.release(b).unwrap();
        assert_eq!(server.live_sessions(), 2);
    }
    assert_eq!(server.live_sessions(), 0);
}

#[test]
fn create_failure_reaches_the_caller() {
    let server = MockServer::new();
    server.refuse_connections(Some(BackendError::with_code(1040, "Too many connections")));
    let pool = pool(&server);

    let err = pool.grab().unwrap_err();
    let PoolError::Create(client_err) = err else {
        panic!("expected a creation error");
    };
    assert_eq!(client_err.errnum(), 1040);
    assert!(pool.is_empty());
    assert_eq!(pool.metrics().checkouts_failed, 1);

    // No retry happened.
    server.refuse_connections(None);
    assert_eq!(server.connect_count(), 0);
}

#[test]
fn safe_grab_replaces_dead_connections() {
    let server = MockServer::new();
    let pool = pool(&server);

    let conn = pool.grab().unwrap();
    let stale_id = conn.id();
    pool.release(conn).unwrap();
    server.kill_all();

    let mut conn = pool.safe_grab().unwrap();
    assert_ne!(conn.id(), stale_id);
    assert!(conn.ping());
    assert_eq!(server.connect_count(), 2);
    assert_eq!(pool.status().total, 1);
    pool.release(conn).unwrap();
}

#[test]
fn plain_grab_does_not_validate() {
    let server = MockServer::new();
    let pool = pool(&server);

    let conn = pool.grab().unwrap();
    let id = conn.id();
    pool.release(conn).unwrap();
    server.kill_all();

    let mut conn = pool.grab().unwrap();
    assert_eq!(conn.id(), id);
    assert!(!conn.ping());

    let mut fresh = pool.exchange(conn).unwrap();
    assert!(fresh.ping());
    assert_eq!(pool.status().total, 1);
    pool.release(fresh).unwrap();
}

#[test]
fn remove_from_the_wrong_pool_keeps_owner_capacity() {
    let server = MockServer::new();
    let owner = ConnectionPool::builder(manager(&server))
        .max_connections(1)
        .acquire_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let other = pool(&server);

    let err = other.remove(owner.grab().unwrap()).unwrap_err();
    assert!(matches!(err, PoolError::ForeignConnection));
    assert!(owner.is_empty());
    assert_eq!(owner.metrics().abandoned, 1);
    assert_eq!(other.metrics().connections_closed, 0);

    let conn = owner.grab().unwrap();
    owner.release(conn).unwrap();
}

#[test]
fn bounded_pool_times_out() {
    let server = MockServer::new();
    let pool = ConnectionPool::builder(manager(&server))
        .max_connections(1)
        .acquire_timeout(Duration::from_millis(30))
        .build()
        .unwrap();

    let held = pool.grab().unwrap();
    assert!(pool.status().is_at_capacity());
    assert!(matches!(pool.grab(), Err(PoolError::Timeout)));

    pool.release(held).unwrap();
    let conn = pool.grab().unwrap();
    pool.release(conn).unwrap();
}

#[test]
fn bounded_pool_wakes_waiters() {
    let server = MockServer::new();
    let pool = Arc::new(
        ConnectionPool::builder(manager(&server))
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .build()
            .unwrap(),
    );

    let held = pool.grab().unwrap();
    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let conn = pool.grab().unwrap();
            let id = conn.id();
            pool.release(conn).unwrap();
            id
        })
    };
    thread::sleep(Duration::from_millis(20));
    let held_id = held.id();
    pool.release(held).unwrap();

    assert_eq!(waiter.join().unwrap(), held_id);
    assert_eq!(server.connect_count(), 1);
}

#[test]
fn scoped_connection_releases_on_scope_exit() {
    let server = MockServer::new();
    let pool = pool(&server);

    let id = {
        let mut conn = ScopedConnection::new(&pool, false).unwrap();
        conn.execute("DELETE FROM carts").unwrap();
        assert_eq!(pool.status().in_use, 1);
        conn.id()
    };
    assert_eq!(pool.status().available, 1);

    let conn = ScopedConnection::new(&pool, true).unwrap();
    assert_eq!(conn.id(), id);
}

#[test]
fn scoped_connection_releases_during_panic() {
    let server = MockServer::new();
    let pool = pool(&server);

    let result = catch_unwind(AssertUnwindSafe(|| {
        let _conn = ScopedConnection::new(&pool, false).unwrap();
        panic!("request handler failed");
    }));
    assert!(result.is_err());

    let status = pool.status();
    assert_eq!(status.available, 1);
    assert_eq!(status.in_use, 0);
    assert_eq!(pool.metrics().abandoned, 0);
    assert_eq!(server.live_sessions(), 1);
}

#[test]
fn abandoned_handle_is_destroyed() {
    let server = MockServer::new();
    let pool = pool(&server);

    drop(pool.grab().unwrap());
    assert!(pool.is_empty());
    assert_eq!(server.live_sessions(), 0);
    assert_eq!(pool.metrics().abandoned, 1);
}

#[test]
fn threads_never_share_a_connection() {
    let server = MockServer::new();
    let pool = Arc::new(pool(&server));
    let in_use = Arc::new(Mutex::new(HashSet::new()));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let in_use = Arc::clone(&in_use);
            thread::spawn(move || {
                for _ in 0..50 {
                    let mut conn = pool.grab().unwrap();
                    assert!(in_use.lock().insert(conn.id()), "connection handed out twice");
                    conn.execute("SELECT 1").unwrap();
                    assert!(in_use.lock().remove(&conn.id()));
                    pool.release(conn).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert!(status.total <= 8);
    assert_eq!(pool.metrics().checkouts_successful, 400);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn handed_out_ids_are_unique(ops in prop::collection::vec(any::<bool>(), 1..60)) {
        let server = MockServer::new();
        let pool = pool(&server);
        let mut held = Vec::new();

        for grab in ops {
            if grab || held.is_empty() {
                held.push(pool.grab().unwrap());
            } else {
                pool.release(held.swap_remove(0)).unwrap();
            }
            let ids: HashSet<u64> = held.iter().map(|c| c.id()).collect();
            prop_assert_eq!(ids.len(), held.len());
            prop_assert_eq!(pool.status().in_use, held.len());
        }

        for conn in held {
            pool.release(conn).unwrap();
        }
        prop_assert_eq!(pool.status().in_use, 0);
    }
}
