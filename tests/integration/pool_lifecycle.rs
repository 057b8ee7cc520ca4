#![allow(missing_docs)]

use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::TempDir;
use umbra::{
    CloseKind, ConnectionPool, DbUrl, GraphFactory, HandleState, StorageConfig, UmbraError,
    STORAGE_ENCRYPTION_KEY,
};

const K1: &str = "T1JJRU5UREJfSVNfQ09PTA==";

fn url_in(dir: &TempDir, name: &str) -> DbUrl {
    DbUrl::plocal(dir.path().join(name))
}

#[test]
fn acquire_release_close_idle() {
    let dir = TempDir::new().expect("tempdir");
    let pool = ConnectionPool::plocal();
    let url = url_in(&dir, "a");
    let config = StorageConfig::default();

    let first = pool.acquire(&url, &config).expect("open");
    let second = pool.acquire(&url, &config).expect("reuse");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.ref_count(), 2);

    assert!(!pool.close_idle(&url).expect("busy"));
    pool.release(&first);
    pool.release(&second);
    assert_eq!(first.ref_count(), 0);
    // Extra releases never underflow.
    pool.release(&first);
    assert_eq!(first.ref_count(), 0);
    assert!(first.is_open());

    assert!(pool.close_idle(&url).expect("idle"));
    assert_eq!(first.state(), HandleState::Closed(CloseKind::Graceful));
    assert!(!pool.close_idle(&url).expect("nothing left"));
}

#[test]
fn close_all_shuts_every_storage() {
    let dir = TempDir::new().expect("tempdir");
    let pool = ConnectionPool::plocal();
    let handles: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|name| {
            pool.acquire(&url_in(&dir, name), &StorageConfig::default())
                .expect("open")
        })
        .collect();
    assert_eq!(pool.len(), 3);
    pool.close_all().expect("close all");
    assert!(pool.is_empty());
    for handle in &handles {
        assert!(handle.is_closed());
        assert!(matches!(handle.flush(), Err(UmbraError::StorageClosed)));
    }
}

#[test]
fn forced_close_under_live_sessions() {
    let dir = TempDir::new().expect("tempdir");
    let pool = Arc::new(ConnectionPool::plocal());
    let url = format!("plocal:{}", dir.path().join("forced").display());
    let fc = GraphFactory::with_pool(&url, Arc::clone(&pool)).expect("factory");
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);

    let mut a = fc.get_database().expect("a");
    let b = fc.get_no_tx().expect("b");
    a.command("create class P").expect("create");

    b.storage().close_forced(false, false).expect("forced");
    b.storage().close_forced(false, false).expect("idempotent");
    assert_eq!(
        a.storage().state(),
        HandleState::Closed(CloseKind::Forced)
    );
    assert!(matches!(a.query("select from P"), Err(UmbraError::StorageClosed)));
    assert!(matches!(b.query("select from P"), Err(UmbraError::StorageClosed)));

    let c = fc.get_database().expect("fresh generation");
    assert!(c.storage().is_open());
    assert!(c.query("select from P").expect("class survived").is_empty());
}

#[test]
fn concurrent_acquire_opens_once() {
    let dir = TempDir::new().expect("tempdir");
    let pool = Arc::new(ConnectionPool::plocal());
    let url = url_in(&dir, "shared");
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let ids: Vec<u64> = (0..threads)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let url = url.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let handle = pool.acquire(&url, &StorageConfig::default()).expect("acquire");
                handle.id()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|t| t.join().expect("thread"))
        .collect();

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    let handle = pool.lookup(&url).expect("cached");
    assert_eq!(handle.ref_count(), threads);
}

#[test]
fn concurrent_sessions_write_through_one_handle() {
    let dir = TempDir::new().expect("tempdir");
    let pool = Arc::new(ConnectionPool::plocal());
    let url = format!("plocal:{}", dir.path().join("writers").display());
    let fc = Arc::new(GraphFactory::with_pool(&url, Arc::clone(&pool)).expect("factory"));
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    fc.get_no_tx()
        .expect("setup")
        .command("create class P")
        .expect("create");

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let fc = Arc::clone(&fc);
            thread::spawn(move || {
                let mut db = fc.get_no_tx().expect("session");
                for i in 0..25 {
                    db.command(&format!("insert into P set worker = {worker}, i = {i}"))
                        .expect("insert");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    let db = fc.get_no_tx().expect("reader");
    assert_eq!(db.query("select from P").expect("query").len(), 100);
    assert_eq!(
        db.query("select from P where worker = 2").expect("query").len(),
        25
    );
}

#[test]
fn distinct_urls_get_distinct_handles() {
    let dir = TempDir::new().expect("tempdir");
    let pool = ConnectionPool::plocal();
    let a = pool
        .acquire(&url_in(&dir, "x"), &StorageConfig::default())
        .expect("x");
    let b = pool
        .acquire(&url_in(&dir, "y"), &StorageConfig::default())
        .expect("y");
    assert_ne!(a.id(), b.id());
    assert_ne!(a.url(), b.url());
}

#[test]
fn second_pool_cannot_open_storage_held_by_first() {
    let dir = TempDir::new().expect("tempdir");
    let url = format!("plocal:{}", dir.path().join("contended").display());
    let pool_a = Arc::new(ConnectionPool::plocal());
    let pool_b = Arc::new(ConnectionPool::plocal());

    let fa = GraphFactory::with_pool(&url, Arc::clone(&pool_a)).expect("factory a");
    let mut a = fa.get_no_tx().expect("a");
    a.command("create class T").expect("create");
    a.command("insert into T set who = 'a'").expect("insert a");

    let fb = GraphFactory::with_pool(&url, Arc::clone(&pool_b)).expect("factory b");
    let err = fb.get_no_tx().unwrap_err();
    assert!(matches!(err, UmbraError::Locked(_)), "{err:?}");
    assert!(pool_b.is_empty());

    a.close();
    fa.close().expect("close a");

    let mut b = fb.get_no_tx().expect("b after a closed");
    b.command("insert into T set who = 'b'").expect("insert b");
    assert_eq!(b.query("select from T").expect("query").len(), 2);
}
