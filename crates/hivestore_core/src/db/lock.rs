//! Named advisory locks for cross-process serialization.
//!
//! # Responsibility
//! - Acquire and release named exclusive locks scoped to one connection.
//!
//! # Invariants
//! - Lock names are namespaced by the connection's schema.
//! - Only the manager that acquired a lock can release it.
//! - Dropping the manager releases every lock it holds; the operating system
//!   releases them if the process dies.
//!
//! Each lock is a small SQLite database in the lock directory. Holding the lock
//! means holding an open `BEGIN EXCLUSIVE` transaction on it, so contention,
//! timeouts and crash cleanup are all delegated to SQLite's file locking.
//!
//! Lock files are kept after release, one per distinct `(schema, name)` pair,
//! so the directory grows with the set of lock names ever used. They are never
//! unlinked here: a process still holding the old file open would keep its
//! lock on an orphaned inode while a new file let a second holder in. Clear
//! the directory only while no process uses it.

use crate::db::driver::{DriverError, DriverErrorKind};
use crate::db::{DbError, DbResult};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_LOCK_NAME_BYTES: usize = 64;
const INDEFINITE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const LOCK_FILE_EXTENSION: &str = "lock";

/// How long [`AdvisoryLockManager::acquire`] may wait for a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    Immediate,
    For(Duration),
    Indefinitely,
}

impl From<i64> for LockWait {
    /// Seconds: `0` fails fast, negative waits forever.
    fn from(seconds: i64) -> Self {
        match seconds {
            0 => Self::Immediate,
            s if s < 0 => Self::Indefinitely,
            s => Self::For(Duration::from_secs(s.unsigned_abs())),
        }
    }
}

/// Advisory locks owned by one connection.
pub struct AdvisoryLockManager {
    namespace: String,
    directory: PathBuf,
    held: HashMap<String, rusqlite::Connection>,
}

impl AdvisoryLockManager {
    pub fn new(namespace: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            namespace: namespace.into(),
            directory: directory.into(),
            held: HashMap::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.contains_key(name)
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Acquires `name`, waiting according to `wait`.
    ///
    /// Re-acquiring a lock this manager already holds succeeds immediately.
    pub fn acquire(&mut self, name: &str, wait: LockWait) -> DbResult<()> {
        validate_name(name)?;
        if self.held.contains_key(name) {
            return Ok(());
        }

        std::fs::create_dir_all(&self.directory).map_err(|err| DbError::LockFailed {
            name: name.to_string(),
            source: DriverError::other(format!(
                "failed to create lock directory `{}`: {err}",
                self.directory.display()
            )),
        })?;

        match try_lock(&self.lock_path(name), name, wait)? {
            Some(conn) => {
                self.held.insert(name.to_string(), conn);
                info!("event=lock_acquire module=db status=ok name_len={}", name.len());
                Ok(())
            }
            None => {
                info!(
                    "event=lock_acquire module=db status=error error_code=lock_unavailable name_len={}",
                    name.len()
                );
                Err(DbError::LockUnavailable {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Releases `name`.
    ///
    /// Fails with `LockNotOwned` when another connection holds it and
    /// `LockNotFound` when nobody does.
    ///
    /// Telling the two apart takes the lock for an instant when it is free, so
    /// a concurrent `acquire` with [`LockWait::Immediate`] elsewhere may see
    /// `LockUnavailable` during that window. Waiting acquires are unaffected.
    pub fn release(&mut self, name: &str) -> DbResult<()> {
        validate_name(name)?;
        if let Some(conn) = self.held.remove(name) {
            close_lock(conn, name);
            info!("event=lock_release module=db status=ok name_len={}", name.len());
            return Ok(());
        }

        let path = self.lock_path(name);
        if !path.exists() {
            return Err(DbError::LockNotFound {
                name: name.to_string(),
            });
        }

        match try_lock(&path, name, LockWait::Immediate)? {
            Some(check) => {
                close_lock(check, name);
                Err(DbError::LockNotFound {
                    name: name.to_string(),
                })
            }
            None => Err(DbError::LockNotOwned {
                name: name.to_string(),
            }),
        }
    }

    /// Releases every held lock.
    pub fn release_all(&mut self) {
        for (name, conn) in self.held.drain() {
            close_lock(conn, &name);
        }
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        let key = format!("{}:{name}", self.namespace);
        let mut file_name = String::with_capacity(key.len() * 2 + LOCK_FILE_EXTENSION.len() + 1);
        for byte in key.as_bytes() {
            let _ = write!(file_name, "{byte:02x}");
        }
        file_name.push('.');
        file_name.push_str(LOCK_FILE_EXTENSION);
        self.directory.join(file_name)
    }
}

impl Drop for AdvisoryLockManager {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            debug!(
                "event=lock_release_all module=db status=start count={}",
                self.held.len()
            );
        }
        self.release_all();
    }
}

fn validate_name(name: &str) -> DbResult<()> {
    if name.is_empty() || name.len() > MAX_LOCK_NAME_BYTES {
        return Err(DbError::InvalidLockName(name.to_string()));
    }
    Ok(())
}

fn try_lock(path: &Path, name: &str, wait: LockWait) -> DbResult<Option<rusqlite::Connection>> {
    let failed = |source: DriverError| DbError::LockFailed {
        name: name.to_string(),
        source,
    };

    let conn = rusqlite::Connection::open(path).map_err(|err| failed(err.into()))?;
    let timeout = match wait {
        LockWait::Immediate => Duration::ZERO,
        LockWait::For(duration) => duration,
        LockWait::Indefinitely => INDEFINITE_POLL_INTERVAL,
    };
    conn.busy_timeout(timeout)
        .map_err(|err| failed(err.into()))?;

    loop {
        match conn.execute_batch("BEGIN EXCLUSIVE;") {
            Ok(()) => return Ok(Some(conn)),
            Err(err) => {
                let err = DriverError::from(err);
                if err.kind != DriverErrorKind::Busy {
                    return Err(failed(err));
                }
                if wait != LockWait::Indefinitely {
                    return Ok(None);
                }
                debug!("event=lock_wait module=db status=retry name_len={}", name.len());
            }
        }
    }
}

fn close_lock(conn: rusqlite::Connection, name: &str) {
    if let Err(err) = conn.execute_batch("ROLLBACK;") {
        warn!(
            "event=lock_release module=db status=error name_len={} error={}",
            name.len(),
            err
        );
    }
    if let Err((_, err)) = conn.close() {
        warn!(
            "event=lock_close module=db status=error name_len={} error={}",
            name.len(),
            err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{AdvisoryLockManager, LockWait};
    use crate::db::DbError;
    use std::time::{Duration, Instant};

    #[test]
    fn wait_from_seconds() {
        assert_eq!(LockWait::from(0), LockWait::Immediate);
        assert_eq!(LockWait::from(-1), LockWait::Indefinitely);
        assert_eq!(LockWait::from(3), LockWait::For(Duration::from_secs(3)));
    }

    #[test]
    fn second_manager_cannot_take_held_lock() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = AdvisoryLockManager::new("main", dir.path());
        let mut second = AdvisoryLockManager::new("main", dir.path());

        first.acquire("sync", LockWait::Immediate).unwrap();
        first.acquire("sync", LockWait::Immediate).unwrap();
        assert!(first.is_held("sync"));

        let started = Instant::now();
        let err = second
            .acquire("sync", LockWait::For(Duration::from_millis(200)))
            .unwrap_err();
        assert_eq!(
            err,
            DbError::LockUnavailable {
                name: "sync".to_string()
            }
        );
        assert!(started.elapsed() >= Duration::from_millis(150));

        first.release("sync").unwrap();
        second.acquire("sync", LockWait::Immediate).unwrap();
    }

    #[test]
    fn namespaces_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let mut main = AdvisoryLockManager::new("main", dir.path());
        let mut archive = AdvisoryLockManager::new("archive", dir.path());

        main.acquire("sync", LockWait::Immediate).unwrap();
        archive.acquire("sync", LockWait::Immediate).unwrap();
    }

    #[test]
    fn dropping_manager_releases_locks() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = AdvisoryLockManager::new("main", dir.path());
        first.acquire("a", LockWait::Immediate).unwrap();
        first.acquire("b", LockWait::Immediate).unwrap();
        assert_eq!(first.held_count(), 2);
        drop(first);

        let mut second = AdvisoryLockManager::new("main", dir.path());
        second.acquire("a", LockWait::Immediate).unwrap();
        second.acquire("b", LockWait::Immediate).unwrap();
    }

    #[test]
    fn lock_files_outlive_release_and_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = AdvisoryLockManager::new("main", dir.path());

        manager.acquire("sync", LockWait::Immediate).unwrap();
        manager.release("sync").unwrap();
        manager.acquire("sync", LockWait::Immediate).unwrap();
        manager.release_all();

        let files = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "lock"))
            .count();
        assert_eq!(files, 1);
    }

    #[test]
    fn release_check_on_free_lock_leaves_it_acquirable() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = AdvisoryLockManager::new("main", dir.path());
        let mut second = AdvisoryLockManager::new("main", dir.path());

        first.acquire("sync", LockWait::Immediate).unwrap();
        first.release("sync").unwrap();

        assert!(matches!(
            second.release("sync"),
            Err(DbError::LockNotFound { .. })
        ));
        first.acquire("sync", LockWait::Immediate).unwrap();
    }

    #[test]
    fn rejects_empty_and_oversized_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = AdvisoryLockManager::new("main", dir.path());

        assert!(matches!(
            manager.acquire("", LockWait::Immediate),
            Err(DbError::InvalidLockName(_))
        ));
        assert!(matches!(
            manager.acquire(&"x".repeat(65), LockWait::Immediate),
            Err(DbError::InvalidLockName(_))
        ));
    }
}
