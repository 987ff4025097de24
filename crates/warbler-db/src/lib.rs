pub mod config;
pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod relations;

pub use config::{DatabaseConfig, DeletePolicy, StoreLocation};
pub use error::{DbError, Result};
pub use models::{Follow, Like, Message, NewMessage, NewUser, UpdateProfile, User};

use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// Handle to the relational store. Passed explicitly into every operation.
pub struct Database {
    conn: Mutex<Connection>,
    delete_policy: DeletePolicy,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::init(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Private, empty store that disappears with the handle. Used by tests and
    /// by `sqlite::memory:` configurations.
    pub fn open_in_memory() -> Result<Self> {
        let db = Self::init(Connection::open_in_memory()?)?;
        info!("In-memory database opened");
        Ok(db)
    }

    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let db = match &config.location {
            StoreLocation::Memory => Self::open_in_memory()?,
            StoreLocation::File(path) => Self::open(path)?,
        };
        Ok(db.with_delete_policy(config.delete_policy))
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            delete_policy: DeletePolicy::default(),
        })
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    /// Run `f` against the connection in autocommit mode: every statement is
    /// committed as soon as it completes.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` as one unit of work. Commits when `f` returns `Ok`; any error
    /// drops the transaction, which rolls it back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }
}
