mod common;

use common::{file_config, open, thermostat_attrs, THERMOSTAT};
use hivestore_core::{DbError, LockWait};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[test]
fn held_lock_is_unavailable_to_other_connections() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    let mut first = open(&config);
    let mut second = open(&config);

    first.acquire_lock("nightly-sync", 0).unwrap();
    assert!(first.holds_lock("nightly-sync"));

    let err = second.acquire_lock("nightly-sync", 0).unwrap_err();
    assert_eq!(
        err,
        DbError::LockUnavailable {
            name: "nightly-sync".to_string()
        }
    );
    assert_eq!(err.code(), "lock_unavailable");

    first.release_lock("nightly-sync").unwrap();
    second.acquire_lock("nightly-sync", 0).unwrap();
}

#[test]
fn release_distinguishes_not_owned_from_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    let mut owner = open(&config);
    let mut other = open(&config);

    owner.acquire_lock("report", 0).unwrap();

    assert_eq!(
        other.release_lock("report").unwrap_err(),
        DbError::LockNotOwned {
            name: "report".to_string()
        }
    );
    assert_eq!(
        other.release_lock("never-taken").unwrap_err(),
        DbError::LockNotFound {
            name: "never-taken".to_string()
        }
    );

    owner.release_lock("report").unwrap();
    assert_eq!(
        owner.release_lock("report").unwrap_err(),
        DbError::LockNotFound {
            name: "report".to_string()
        }
    );
}

#[test]
fn dropping_connection_releases_its_locks() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());

    let mut first = open(&config);
    first.acquire_lock("import", 0).unwrap();
    drop(first);

    let mut second = open(&config);
    second.acquire_lock("import", 0).unwrap();
}

#[test]
fn waiting_acquire_succeeds_once_holder_releases() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    let holder_config = config.clone();
    let (acquired_tx, acquired_rx) = mpsc::channel();

    let holder = thread::spawn(move || {
        let mut conn = open(&holder_config);
        conn.acquire_lock("rollup", LockWait::Immediate).unwrap();
        acquired_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(300));
        conn.release_lock("rollup").unwrap();
    });

    acquired_rx.recv().unwrap();
    let mut waiter = open(&config);
    assert!(matches!(
        waiter.acquire_lock("rollup", LockWait::Immediate),
        Err(DbError::LockUnavailable { .. })
    ));
    waiter
        .acquire_lock("rollup", LockWait::For(Duration::from_secs(5)))
        .unwrap();
    holder.join().unwrap();
}

#[test]
fn with_advisory_lock_releases_after_success_and_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    let mut conn = open(&config);
    let mut observer = open(&config);

    let created = conn
        .with_advisory_lock("provision", 0, |conn| {
            assert!(conn.holds_lock("provision"));
            conn.create(&THERMOSTAT, thermostat_attrs("L-1"))
        })
        .unwrap();
    assert_eq!(created["serial"], serde_json::json!("L-1"));
    assert!(!conn.holds_lock("provision"));

    let err = conn
        .with_advisory_lock("provision", 0, |conn| {
            conn.create(&THERMOSTAT, thermostat_attrs("L-1"))
        })
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicateEntry { .. }));
    assert!(!conn.holds_lock("provision"));

    observer.acquire_lock("provision", 0).unwrap();
}

#[test]
fn invalid_lock_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = open(&file_config(dir.path()));

    assert!(matches!(
        conn.acquire_lock("", 0),
        Err(DbError::InvalidLockName(_))
    ));
}
