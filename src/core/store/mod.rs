//! SQLite-backed transactional data store
//!
//! [`Store`] owns one connection. Every workflow call runs inside a single
//! IMMEDIATE transaction, so the write lock is taken at BEGIN and concurrent
//! writers (other connections or processes on the same file) serialize
//! instead of interleaving read-then-write sequences. Row-level helpers live
//! in the submodules and take a plain `&Connection`, which a `Transaction`
//! derefs to.

pub mod batches;
pub mod bins;
pub mod events;
pub mod items;
pub mod notifications;
pub mod orders;
mod schema;
mod serialize;


pub use events::{DomainEvent, EventRefs, EventType};
pub use serialize::Json;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

/// Errors from the data store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("json serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

/// Connection tuning
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a writer waits for another writer's transaction to finish
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5_000),
        }
    }
}

#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) a database file and apply the schema
    pub fn open(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::configure(conn, options)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn, &StoreOptions::default())
    }

    fn configure(conn: Connection, options: &StoreOptions) -> Result<Self, StoreError> {
        conn.busy_timeout(options.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(schema::SCHEMA)?;
        Ok(())
    }

    /// Read access outside a transaction
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin an IMMEDIATE transaction
    ///
    /// Dropping the returned transaction without committing rolls it back.
    /// Callers must not nest transactions on the same store.
    pub fn begin(&self) -> Result<Transaction<'_>, StoreError> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}
