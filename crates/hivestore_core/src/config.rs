//! Connection settings supplied by the settings provider.
//!
//! # Invariants
//! - `schema` and every attach alias are valid identifiers.
//! - `schema` is `main` or one of the attach aliases.

use crate::db::escape::is_valid_identifier;
use crate::db::{DbError, DbResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_SCHEMA: &str = "main";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const IN_MEMORY_LOCK_DIR: &str = "hivestore-locks";

/// Settings for one [`crate::db::Connection`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database file; `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    /// Database the resource tables live in.
    pub schema: String,
    /// Extra database files attached under the given alias.
    pub attach: BTreeMap<String, PathBuf>,
    /// Start a transaction automatically before the first write.
    pub use_transactions: bool,
    /// Demo mode: writes are simulated and never persisted.
    pub read_only: bool,
    pub busy_timeout_ms: u64,
    /// Directory for advisory lock files.
    pub lock_dir: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            schema: DEFAULT_SCHEMA.to_string(),
            attach: BTreeMap::new(),
            use_transactions: true,
            read_only: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            lock_dir: None,
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Parses settings from JSON, filling omitted fields with defaults.
    pub fn from_json_str(json: &str) -> DbResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| DbError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DbResult<()> {
        if !is_valid_identifier(&self.schema) {
            return Err(DbError::InvalidConfig(format!(
                "schema `{}` is not a valid identifier",
                self.schema
            )));
        }
        for alias in self.attach.keys() {
            if !is_valid_identifier(alias) {
                return Err(DbError::InvalidConfig(format!(
                    "attach alias `{alias}` is not a valid identifier"
                )));
            }
            if alias == DEFAULT_SCHEMA || alias.eq_ignore_ascii_case("temp") {
                return Err(DbError::InvalidConfig(format!(
                    "attach alias `{alias}` is reserved"
                )));
            }
        }
        Ok(())
    }

    /// Lock directory, derived from the database path when not configured.
    pub fn resolved_lock_dir(&self) -> PathBuf {
        if let Some(dir) = &self.lock_dir {
            return dir.clone();
        }
        match &self.path {
            Some(path) => {
                let mut dir = path.clone().into_os_string();
                dir.push(".locks");
                PathBuf::from(dir)
            }
            None => std::env::temp_dir().join(IN_MEMORY_LOCK_DIR),
        }
    }

    /// Human-readable connection target for logs and errors.
    pub fn target(&self) -> String {
        self.path
            .as_ref()
            .map_or_else(|| ":memory:".to_string(), |path| path.display().to_string())
    }
}
