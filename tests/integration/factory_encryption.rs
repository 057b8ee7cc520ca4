#![allow(missing_docs)]
#![allow(deprecated)]

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tempfile::TempDir;
use umbra::{
    ConnectionPool, EncryptionMethod, GraphConfig, GraphFactory, UmbraError,
    STORAGE_ENCRYPTION_KEY, STORAGE_ENCRYPTION_METHOD,
};

const K1: &str = "T1JJRU5UREJfSVNfQ09PTA==";
const K2: &str = "AAECAwQFBgcICQoLDA0ODw==";

fn setup(name: &str) -> (TempDir, String, Arc<ConnectionPool>) {
    let dir = TempDir::new().expect("tempdir");
    let url = format!("plocal:{}", dir.path().join(name).display());
    (dir, url, Arc::new(ConnectionPool::plocal()))
}

fn factory(url: &str, pool: &Arc<ConnectionPool>) -> GraphFactory {
    GraphFactory::with_pool(url, Arc::clone(pool)).expect("factory")
}

fn seed(fc: &GraphFactory) {
    let mut db = fc.get_database().expect("open for seeding");
    db.command("create class TestEncryption").expect("create class");
    db.command("insert into TestEncryption set name = 'Jay'")
        .expect("insert");
    assert_eq!(db.query("select from TestEncryption").expect("query").len(), 1);
    db.close();
}

fn count(fc: &GraphFactory) -> usize {
    let db = fc.get_database().expect("open for counting");
    db.query("select from TestEncryption").expect("query").len()
}

/// Forces the factory's current storage closed, like an abrupt shutdown that
/// still flushes.
fn force_close(fc: &GraphFactory) {
    let db = fc.get_database().expect("open");
    let storage = Arc::clone(db.storage());
    drop(db);
    storage.close_forced(true, false).expect("forced close");
}

#[test]
fn aes_key_is_visible_through_every_session_kind() {
    let (_dir, url, pool) = setup("aes_cluster");
    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);

    let mut db = fc.get_database().expect("tx");
    assert_eq!(db.property(STORAGE_ENCRYPTION_KEY), Some(K1));
    assert_eq!(
        db.storage().config().encryption.method(),
        EncryptionMethod::Aes
    );
    db.close();

    let mut db = fc.get_no_tx().expect("no tx");
    assert_eq!(db.property(STORAGE_ENCRYPTION_KEY), Some(K1));
    db.close();

    let mut db = fc.get_raw_graph().expect("raw");
    assert_eq!(db.property(STORAGE_ENCRYPTION_KEY), Some(K1));
    db.close();

    fc.close().expect("close");
}

#[test]
fn des_encrypted_storage_answers_queries() {
    let (_dir, url, pool) = setup("des_query");
    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_METHOD, "des");
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    seed(&fc);
    fc.close().expect("close");
}

#[test]
fn aes_round_trip_across_factories() {
    let (_dir, url, pool) = setup("aes_roundtrip");
    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    seed(&fc);
    fc.close().expect("close");
    assert!(pool.lookup(&url.parse().expect("url")).is_none());

    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    assert_eq!(count(&fc), 1);
}

#[test]
fn des_survives_forced_close_with_flush() {
    let (_dir, url, pool) = setup("des_forced");
    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_METHOD, "des");
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    seed(&fc);
    force_close(&fc);
    assert_eq!(count(&fc), 1);
}

#[test]
fn wrong_keys_are_rejected_and_storage_survives() {
    let (_dir, url, pool) = setup("wrong_key");
    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_METHOD, "des");
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    seed(&fc);
    force_close(&fc);

    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    assert_eq!(count(&fc), 1);
    force_close(&fc);

    // Not base64 at all: rejected before any I/O, as a key format error.
    for bad in ["invalid", "invalidPassword"] {
        fc.set_property(STORAGE_ENCRYPTION_KEY, bad);
        let err = fc.get_database().unwrap_err();
        assert!(err.is_key_rejection(), "{err:?}");
        assert!(matches!(err, UmbraError::KeyFormat(_)), "{err:?}");
    }

    // Broken padding.
    fc.set_property(STORAGE_ENCRYPTION_KEY, "T1JJRU5UREJfSVNfQ09PTA=-");
    let err = fc.get_database().unwrap_err();
    assert!(err.is_key_rejection(), "{err:?}");

    // Well formed but wrong: the storage itself refuses it.
    fc.set_property(STORAGE_ENCRYPTION_KEY, K2);
    let err = fc.get_database().unwrap_err();
    assert!(matches!(err, UmbraError::Security(_)), "{err:?}");

    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    assert_eq!(count(&fc), 1);
    fc.close().expect("close");
}

#[test]
fn des_rejects_keys_sharing_its_effective_bytes() {
    let (_dir, url, pool) = setup("des_exact_key");
    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_METHOD, "des");
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    seed(&fc);
    fc.close().expect("close");

    let same_prefix = STANDARD.encode(b"ORIENTDBxxxxxxxx");
    let mut parity = *b"ORIENTDB_IS_COOL";
    for byte in &mut parity[..8] {
        *byte ^= 1;
    }
    let parity = STANDARD.encode(parity);

    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_METHOD, "des");
    for key in [same_prefix.as_str(), parity.as_str()] {
        fc.set_property(STORAGE_ENCRYPTION_KEY, key);
        let err = fc.get_database().unwrap_err();
        assert!(matches!(err, UmbraError::Security(_)), "{key}: {err:?}");
    }

    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    assert_eq!(count(&fc), 1);
}

#[test]
fn repeated_wrong_key_fails_identically() {
    let (_dir, url, pool) = setup("retry");
    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    seed(&fc);
    fc.close().expect("close");

    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_KEY, K2);
    let messages: Vec<String> = (0..3)
        .map(|_| {
            let err = fc.get_database().unwrap_err();
            assert!(matches!(err, UmbraError::Security(_)), "{err:?}");
            err.to_string()
        })
        .collect();
    assert!(messages.windows(2).all(|w| w[0] == w[1]));
    assert!(pool.is_empty());

    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    assert_eq!(count(&fc), 1);
}

#[test]
fn method_mismatch_is_security_error_both_ways() {
    let (_dir, url, pool) = setup("plain");
    let fc = factory(&url, &pool);
    let mut db = fc.get_database().expect("plain storage");
    db.command("create class TestEncryption").expect("create");
    // Session-level properties never reach the open storage.
    db.set_property(STORAGE_ENCRYPTION_METHOD, "des");
    db.set_property(STORAGE_ENCRYPTION_KEY, K1);
    db.close();
    fc.close().expect("close");

    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_METHOD, "des");
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    let err = fc.get_database().unwrap_err();
    assert!(matches!(err, UmbraError::Security(_)), "{err:?}");
    fc.close().expect("close");

    let (_dir2, enc_url, pool) = setup("encrypted");
    let fc = factory(&enc_url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    seed(&fc);
    fc.close().expect("close");

    let fc = factory(&enc_url, &pool);
    let err = fc.get_database().unwrap_err();
    assert!(matches!(err, UmbraError::Security(_)), "{err:?}");
    fc.set_property(STORAGE_ENCRYPTION_METHOD, "des");
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    let err = fc.get_database().unwrap_err();
    assert!(matches!(err, UmbraError::Security(_)), "{err:?}");
}

#[test]
fn property_changes_do_not_affect_open_sessions() {
    let (_dir, url, pool) = setup("snapshot");
    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    seed(&fc);

    let db = fc.get_database().expect("open");
    fc.set_property(STORAGE_ENCRYPTION_KEY, K2);
    assert_eq!(db.query("select from TestEncryption").expect("query").len(), 1);

    // The pooled storage is still open, so the next session reuses it.
    let again = fc.get_database().expect("reuse");
    assert!(Arc::ptr_eq(db.storage(), again.storage()));
}

#[test]
fn key_change_applies_after_storage_generation_ends() {
    let (_dir, url, pool) = setup("generation");
    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    seed(&fc);
    fc.set_property(STORAGE_ENCRYPTION_KEY, K2);
    force_close(&fc);
    assert!(matches!(
        fc.get_database().unwrap_err(),
        UmbraError::Security(_)
    ));
}

#[test]
fn bulk_config_opens_same_storage_as_setters() {
    let (_dir, url, pool) = setup("bulk");
    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_METHOD, "des");
    fc.set_property(STORAGE_ENCRYPTION_KEY, K1);
    seed(&fc);
    fc.close().expect("close");

    let fc = factory(&url, &pool);
    fc.apply_config(&GraphConfig::default().with_method("DES").with_key(K1));
    assert_eq!(count(&fc), 1);
}

#[test]
fn method_without_key_opens_unencrypted() {
    let (_dir, url, pool) = setup("method_only");
    let fc = factory(&url, &pool);
    fc.set_property(STORAGE_ENCRYPTION_METHOD, "aes");
    let db = fc.get_database().expect("open");
    assert_eq!(
        db.storage().config().encryption.method(),
        EncryptionMethod::None
    );
}

#[test]
fn closed_factory_refuses_sessions() {
    let (_dir, url, pool) = setup("closed");
    let fc = factory(&url, &pool);
    fc.close().expect("close");
    fc.close().expect("close again");
    assert!(matches!(fc.get_no_tx(), Err(UmbraError::FactoryClosed)));
}
