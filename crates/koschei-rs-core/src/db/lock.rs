//! Advisory locks, non-blocking mutual exclusion between service processes.
//!
//! A lock is a row in `advisory_lock`. Rows older than the lease belong to a holder that crashed and are taken over.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rusqlite::{params, Connection};

use super::Database;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(0);

pub(super) fn new_owner_id() -> String {
	format!("{}-{}-{}", std::process::id(), Utc::now().timestamp_nanos_opt().unwrap_or_default(), NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
}

/// Held advisory lock, released on drop.
pub struct AdvisoryLock<'db> {
	db: &'db Database,
	namespace: i64,
	key: i64,
}

impl std::fmt::Debug for AdvisoryLock<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "AdvisoryLock({}, {})", self.namespace, self.key)
	}
}

pub(super) fn try_lock(db: &Database, namespace: i64, key: i64) -> crate::Result<Option<AdvisoryLock<'_>>> {
	let now = Utc::now();
	let expired = now - db.lock_lease;
	let acquired = db.transaction(|conn| {
		let reclaimed = conn.execute(
			"DELETE FROM advisory_lock WHERE namespace = ?1 AND key = ?2 AND acquired < ?3",
			params![namespace, key, expired],
		)?;
		if reclaimed > 0 {
			log::warn!("Reclaimed abandoned advisory lock ({}, {})", namespace, key);
		}
		let inserted = conn.execute(
			"INSERT OR IGNORE INTO advisory_lock (namespace, key, owner, acquired) VALUES (?1, ?2, ?3, ?4)",
			params![namespace, key, db.owner, now],
		)?;
		Ok(inserted == 1)
	})?;

	if acquired {
		log::trace!("Took advisory lock ({}, {})", namespace, key);
		Ok(Some(AdvisoryLock { db, namespace, key }))
	} else {
		Ok(None)
	}
}

pub(super) fn release_all(connection: &Connection, owner: &str) -> crate::Result<()> {
	connection.execute("DELETE FROM advisory_lock WHERE owner = ?1", params![owner])?;
	Ok(())
}

impl Drop for AdvisoryLock<'_> {
	fn drop(&mut self) {
		let r = self.db.connection().execute(
			"DELETE FROM advisory_lock WHERE namespace = ?1 AND key = ?2 AND owner = ?3",
			params![self.namespace, self.key, self.db.owner],
		);
		if let Err(e) = r {
			log::warn!("Failed to release advisory lock ({}, {}): {}", self.namespace, self.key, e);
		}
	}
}
