//! Transaction lifecycle for one connection.
//!
//! # Invariants
//! - At most one transaction is active at a time.
//! - `start` while active and `commit`/`rollback` while idle are no-ops.
//! - After any failure the controller is idle.

use crate::db::driver::Driver;
use crate::db::{DbError, DbResult};
use log::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    Active,
}

/// Tracks and drives BEGIN/COMMIT/ROLLBACK for one connection.
#[derive(Debug, Default)]
pub struct TransactionController {
    state: TransactionState,
}

impl TransactionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Begins a transaction unless one is already active.
    pub fn start<D: Driver + ?Sized>(&mut self, driver: &mut D) -> DbResult<()> {
        if self.is_active() {
            return Ok(());
        }

        driver.execute_batch("BEGIN;").map_err(|err| {
            error!(
                "event=transaction_start module=db status=error error_code=transaction_start_failed"
            );
            DbError::TransactionStartFailed(err)
        })?;
        self.state = TransactionState::Active;
        debug!("event=transaction_start module=db status=ok");
        Ok(())
    }

    /// Commits the active transaction; a failed commit is rolled back.
    pub fn commit<D: Driver + ?Sized>(&mut self, driver: &mut D) -> DbResult<()> {
        if !self.is_active() {
            return Ok(());
        }

        match driver.execute_batch("COMMIT;") {
            Ok(()) => {
                self.state = TransactionState::Idle;
                debug!("event=transaction_commit module=db status=ok");
                Ok(())
            }
            Err(err) => {
                error!("event=transaction_commit module=db status=error error_code=commit_failed");
                self.force_rollback(driver);
                Err(DbError::CommitFailed(err))
            }
        }
    }

    /// Rolls back the active transaction.
    ///
    /// The controller returns to idle even when the store reports a failure,
    /// since SQLite has already abandoned the transaction in that case.
    pub fn rollback<D: Driver + ?Sized>(&mut self, driver: &mut D) -> DbResult<()> {
        if !self.is_active() {
            return Ok(());
        }

        self.state = TransactionState::Idle;
        match driver.execute_batch("ROLLBACK;") {
            Ok(()) => {
                debug!("event=transaction_rollback module=db status=ok");
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=transaction_rollback module=db status=error error_code=rollback_failed"
                );
                Err(DbError::RollbackFailed(err))
            }
        }
    }

    /// Rolls back after a statement failure, swallowing rollback errors so the
    /// original failure is the one surfaced.
    pub fn force_rollback<D: Driver + ?Sized>(&mut self, driver: &mut D) {
        if let Err(err) = self.rollback(driver) {
            warn!(
                "event=transaction_rollback module=db status=error reason=forced error_code={}",
                err.code()
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{TransactionController, TransactionState};
    use crate::db::driver::{Driver, DriverError, ResultSet};
    use crate::db::DbError;

    /// Driver double that records statements and fails on demand.
    #[derive(Default)]
    pub(crate) struct RecordingDriver {
        pub statements: Vec<String>,
        pub fail_on: Option<&'static str>,
    }

    impl RecordingDriver {
        fn run(&mut self, sql: &str) -> Result<(), DriverError> {
            self.statements.push(sql.to_string());
            match self.fail_on {
                Some(fragment) if sql.contains(fragment) => Err(DriverError::other("boom")),
                _ => Ok(()),
            }
        }
    }

    impl Driver for RecordingDriver {
        fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
            self.run(sql).map(|()| 1)
        }

        fn execute_batch(&mut self, sql: &str) -> Result<(), DriverError> {
            self.run(sql)
        }

        fn query(&mut self, sql: &str) -> Result<ResultSet, DriverError> {
            self.run(sql).map(|()| ResultSet::default())
        }

        fn last_insert_id(&self) -> i64 {
            1
        }
    }

    #[test]
    fn start_is_idempotent() {
        let mut driver = RecordingDriver::default();
        let mut tx = TransactionController::new();

        tx.start(&mut driver).unwrap();
        tx.start(&mut driver).unwrap();

        assert_eq!(driver.statements, vec!["BEGIN;"]);
        assert_eq!(tx.state(), TransactionState::Active);
    }

    #[test]
    fn commit_and_rollback_are_noops_while_idle() {
        let mut driver = RecordingDriver::default();
        let mut tx = TransactionController::new();

        tx.commit(&mut driver).unwrap();
        tx.rollback(&mut driver).unwrap();

        assert!(driver.statements.is_empty());
        assert_eq!(tx.state(), TransactionState::Idle);
    }

    #[test]
    fn commit_returns_to_idle() {
        let mut driver = RecordingDriver::default();
        let mut tx = TransactionController::new();

        tx.start(&mut driver).unwrap();
        tx.commit(&mut driver).unwrap();

        assert_eq!(driver.statements, vec!["BEGIN;", "COMMIT;"]);
        assert!(!tx.is_active());
    }

    #[test]
    fn failed_start_leaves_controller_idle() {
        let mut driver = RecordingDriver {
            fail_on: Some("BEGIN"),
            ..RecordingDriver::default()
        };
        let mut tx = TransactionController::new();

        let err = tx.start(&mut driver).unwrap_err();
        assert_eq!(err, DbError::TransactionStartFailed(DriverError::other("boom")));
        assert!(!tx.is_active());
    }

    #[test]
    fn failed_commit_forces_rollback() {
        let mut driver = RecordingDriver {
            fail_on: Some("COMMIT"),
            ..RecordingDriver::default()
        };
        let mut tx = TransactionController::new();

        tx.start(&mut driver).unwrap();
        let err = tx.commit(&mut driver).unwrap_err();

        assert!(matches!(err, DbError::CommitFailed(_)));
        assert_eq!(driver.statements, vec!["BEGIN;", "COMMIT;", "ROLLBACK;"]);
        assert!(!tx.is_active());
    }

    #[test]
    fn failed_rollback_still_returns_to_idle() {
        let mut driver = RecordingDriver {
            fail_on: Some("ROLLBACK"),
            ..RecordingDriver::default()
        };
        let mut tx = TransactionController::new();

        tx.start(&mut driver).unwrap();
        assert!(matches!(
            tx.rollback(&mut driver),
            Err(DbError::RollbackFailed(_))
        ));
        assert!(!tx.is_active());
    }
}
