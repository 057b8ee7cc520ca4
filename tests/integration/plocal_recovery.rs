#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use tempfile::TempDir;
use umbra::engine::{PlocalEngine, Storage, StorageEngine, DATA_FILE};
use umbra::{
    DbUrl, EncryptionConfig, EncryptionKey, EncryptionMethod, Statement, StorageConfig,
    SyncMode, UmbraError,
};

fn config(method: EncryptionMethod, sync_mode: SyncMode) -> StorageConfig {
    let key = match method {
        EncryptionMethod::None => None,
        _ => Some(EncryptionKey::from_base64("T1JJRU5UREJfSVNfQ09PTA==").expect("key")),
    };
    StorageConfig {
        encryption: EncryptionConfig::new(method, key).expect("config"),
        sync_mode,
    }
}

fn fresh(dir: &TempDir, config: &StorageConfig) -> (DbUrl, Box<dyn Storage>) {
    let url = DbUrl::plocal(dir.path().join("db"));
    let engine = PlocalEngine::new();
    engine.create(&url, config).expect("create");
    let storage = engine.open(&url, config).expect("open");
    (url, storage)
}

fn reopen(url: &DbUrl, config: &StorageConfig) -> umbra::Result<Box<dyn Storage>> {
    PlocalEngine::new().open(url, config)
}

fn run(storage: &dyn Storage, sql: &str) -> u64 {
    storage
        .command(&Statement::parse(sql).expect("parse"))
        .expect("command")
}

fn count(storage: &dyn Storage, class: &str) -> usize {
    storage
        .query(&Statement::parse(&format!("select from {class}")).expect("parse"))
        .expect("query")
        .len()
}

fn data_file(url: &DbUrl) -> PathBuf {
    url.path().join(DATA_FILE)
}

#[test]
fn off_mode_loses_unflushed_commits_on_forced_close() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config(EncryptionMethod::Aes, SyncMode::Off);
    let (url, storage) = fresh(&dir, &cfg);
    run(storage.as_ref(), "create class P");
    storage.flush().expect("flush");
    run(storage.as_ref(), "insert into P set name = 'Jay'");
    assert_eq!(storage.stats().frames_pending, 1);
    storage.close_forced(false, false).expect("forced");

    let storage = reopen(&url, &cfg).expect("reopen");
    assert_eq!(count(storage.as_ref(), "P"), 0);
    run(storage.as_ref(), "insert into P set name = 'Ann'");
    storage.close().expect("close");

    let storage = reopen(&url, &cfg).expect("reopen");
    assert_eq!(count(storage.as_ref(), "P"), 1);
}

#[test]
fn off_mode_keeps_commits_on_graceful_close() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config(EncryptionMethod::Des, SyncMode::Off);
    let (url, storage) = fresh(&dir, &cfg);
    run(storage.as_ref(), "create class P");
    run(storage.as_ref(), "insert into P set name = 'Jay'");
    storage.close().expect("close");

    let storage = reopen(&url, &cfg).expect("reopen");
    assert_eq!(count(storage.as_ref(), "P"), 1);
}

#[test]
fn panic_close_recovers_on_next_open() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config(EncryptionMethod::Des, SyncMode::Normal);
    let (url, storage) = fresh(&dir, &cfg);
    run(storage.as_ref(), "create class P");
    run(storage.as_ref(), "insert into P set name = 'Jay'");
    storage.close_forced(true, true).expect("panic close");

    let storage = reopen(&url, &cfg).expect("recover");
    let stats = storage.stats();
    assert!(stats.recovered);
    assert_eq!(stats.frames_replayed, 2);
    assert_eq!(count(storage.as_ref(), "P"), 1);
    storage.close().expect("close");

    let storage = reopen(&url, &cfg).expect("clean reopen");
    assert!(!storage.stats().recovered);
}

#[test]
fn torn_tail_is_truncated_after_crash() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config(EncryptionMethod::Aes, SyncMode::Full);
    let (url, storage) = fresh(&dir, &cfg);
    run(storage.as_ref(), "create class P");
    run(storage.as_ref(), "insert into P set name = 'Jay'");
    storage.close_forced(true, true).expect("panic close");
    drop(storage);

    let path = data_file(&url);
    let intact_len = fs::metadata(&path).expect("meta").len();
    let mut file = OpenOptions::new().append(true).open(&path).expect("append");
    file.write_all(&[0x00, 0x00, 0x01, 0x00, 0xAB, 0xCD]).expect("garbage");
    drop(file);

    let storage = reopen(&url, &cfg).expect("recover");
    assert_eq!(count(storage.as_ref(), "P"), 1);
    assert_eq!(fs::metadata(&path).expect("meta").len(), intact_len);
}

#[test]
fn garbage_after_clean_shutdown_is_corruption() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config(EncryptionMethod::None, SyncMode::Full);
    let (url, storage) = fresh(&dir, &cfg);
    run(storage.as_ref(), "create class P");
    storage.close().expect("close");
    drop(storage);

    let mut file = OpenOptions::new()
        .append(true)
        .open(data_file(&url))
        .expect("append");
    file.write_all(b"trailing junk").expect("junk");
    drop(file);

    let err = reopen(&url, &cfg).err().expect("must fail");
    assert!(matches!(err, UmbraError::Corruption(_)), "{err:?}");
}

#[test]
fn damaged_meta_page_is_corruption_not_security() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config(EncryptionMethod::Aes, SyncMode::Full);
    let (url, storage) = fresh(&dir, &cfg);
    storage.close().expect("close");
    drop(storage);

    let path = data_file(&url);
    let mut bytes = fs::read(&path).expect("read");
    bytes[40] ^= 0xFF;
    fs::write(&path, &bytes).expect("write");

    let err = reopen(&url, &cfg).err().expect("must fail");
    assert!(matches!(err, UmbraError::Corruption(_)), "{err:?}");
}

#[test]
fn records_are_unreadable_on_disk_when_encrypted() {
    for method in [EncryptionMethod::Aes, EncryptionMethod::Des, EncryptionMethod::None] {
        let dir = TempDir::new().expect("tempdir");
        let cfg = config(method, SyncMode::Full);
        let (url, storage) = fresh(&dir, &cfg);
        run(storage.as_ref(), "create class TestEncryption");
        run(
            storage.as_ref(),
            "insert into TestEncryption set name = 'Jay'",
        );
        storage.close().expect("close");

        let bytes = fs::read(data_file(&url)).expect("read");
        let visible = bytes
            .windows(b"TestEncryption".len())
            .any(|w| w == b"TestEncryption");
        assert_eq!(visible, method == EncryptionMethod::None, "{method}");
        assert!(!bytes.windows(16).any(|w| w == b"ORIENTDB_IS_COOL"), "{method}");
    }
}

#[test]
fn rejected_open_does_not_modify_file() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config(EncryptionMethod::Des, SyncMode::Full);
    let (url, storage) = fresh(&dir, &cfg);
    run(storage.as_ref(), "create class P");
    storage.close_forced(true, true).expect("unclean close");
    drop(storage);
    let before = fs::read(data_file(&url)).expect("read");

    let wrong = StorageConfig {
        encryption: EncryptionConfig::new(
            EncryptionMethod::Des,
            Some(EncryptionKey::from_bytes(b"WRONGKEY")),
        )
        .expect("config"),
        sync_mode: SyncMode::Full,
    };
    for _ in 0..2 {
        let err = reopen(&url, &wrong).err().expect("must fail");
        assert!(matches!(err, UmbraError::Security(_)), "{err:?}");
    }
    assert_eq!(fs::read(data_file(&url)).expect("read"), before);

    let storage = reopen(&url, &cfg).expect("right key");
    assert!(storage.stats().recovered);
}
