//! # Persistent store
//!
//! A SQLite database shared by every service process.
//! SQLite serialises writers, every mutating sequence runs in an immediate transaction through [`Database::transaction`].
//! Rows that are mutated together are still locked in ascending primary key order, see [`models::Package::lock`].
//!
//! Queries live on the models and take a plain [`Connection`](rusqlite::Connection) so they work the same inside or outside a transaction.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::config::DatabaseConfig;

pub mod models;
pub use models::*;

mod sql;
pub use sql::DependencyKeys;

mod lock;
pub use lock::AdvisoryLock;

pub struct Database {
	connection: Connection,
	lock_lease: chrono::Duration,
	/// Identifies the advisory locks held through this connection.
	owner: String,
}

impl Database {
	/// Opens or creates the database at `path` and brings the schema up to date.
	pub fn open(path: impl AsRef<Path>, config: &DatabaseConfig) -> crate::Result<Self> {
		let path = path.as_ref();
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		log::debug!("Opening database {}", path.display());
		let connection = Connection::open(path)?;
		connection.pragma_update(None, "journal_mode", "WAL")?;
		Self::init(connection, config)
	}

	/// A private database, used by tests and one-off runs.
	pub fn open_in_memory() -> crate::Result<Self> {
		Self::init(Connection::open_in_memory()?, &DatabaseConfig::default())
	}

	fn init(connection: Connection, config: &DatabaseConfig) -> crate::Result<Self> {
		connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
		connection.pragma_update(None, "foreign_keys", "ON")?;
		connection.execute_batch(include_str!("db/schema.sql"))?;

		Ok(Self {
			connection,
			lock_lease: chrono::Duration::seconds(config.lock_lease_secs),
			owner: lock::new_owner_id(),
		})
	}

	/// The underlying connection, for read-only queries.
	pub fn connection(&self) -> &Connection {
		&self.connection
	}

	/// Runs `f` inside a `BEGIN IMMEDIATE` transaction.
	///
	/// Committed when `f` returns `Ok`, rolled back when it returns an error or unwinds.
	pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> crate::Result<T>) -> crate::Result<T> {
		let tx = Transaction::new_unchecked(&self.connection, TransactionBehavior::Immediate)?;
		let value = f(&tx)?;
		tx.commit()?;
		Ok(value)
	}

	/// Takes the advisory lock `(namespace, key)` without waiting.
	///
	/// # Returns
	/// `None` when another connection holds it. The lock is released when the guard drops.
	pub fn try_advisory_lock(&self, namespace: i64, key: i64) -> crate::Result<Option<AdvisoryLock<'_>>> {
		lock::try_lock(self, namespace, key)
	}
}

impl Drop for Database {
	fn drop(&mut self) {
		if let Err(e) = lock::release_all(&self.connection, &self.owner) {
			log::warn!("Failed to release advisory locks: {}", e);
		}
	}
}

/// Rolls back to the savepoint unless released.
struct SavepointGuard<'c> {
	connection: &'c Connection,
	released: bool,
}

impl Drop for SavepointGuard<'_> {
	fn drop(&mut self) {
		if !self.released {
			if let Err(e) = self.connection.execute_batch("ROLLBACK TO koschei_savepoint; RELEASE koschei_savepoint") {
				log::error!("Failed to roll back savepoint: {}", e);
			}
		}
	}
}

/// Runs `f` in a nested sub-transaction, a failure only rolls back what `f` did.
pub fn savepoint<T>(connection: &Connection, f: impl FnOnce(&Connection) -> crate::Result<T>) -> crate::Result<T> {
	connection.execute_batch("SAVEPOINT koschei_savepoint")?;
	let mut guard = SavepointGuard { connection, released: false };
	let value = f(connection)?;
	connection.execute_batch("RELEASE koschei_savepoint")?;
	guard.released = true;
	Ok(value)
}

/// Checks for a uniqueness or foreign key failure, the usual sign of a concurrent insert.
pub fn is_constraint_violation(e: &crate::Error) -> bool {
	matches!(
		e,
		crate::Error::Sqlite(rusqlite::Error::SqliteFailure(f, _)) if f.code == rusqlite::ErrorCode::ConstraintViolation
	)
}
