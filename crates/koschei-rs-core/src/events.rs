//! State change notifications.
//!
//! Handlers are called synchronously after the transaction making a change durable has committed,
//! and only when the state actually changed.

use std::collections::BTreeMap;

use rusqlite::Connection;

use crate::db::{Collection, CollectionState, Package, PackageState};

pub trait EventHandler: Send + Sync {
	fn package_state_change(&self, package: &Package, prev: PackageState, new: PackageState);
	fn collection_state_change(&self, collection: &Collection, prev: CollectionState, new: CollectionState);
}

/// Logs every change at `info`.
#[derive(Debug, Default)]
pub struct LogEventHandler;

impl EventHandler for LogEventHandler {
	fn package_state_change(&self, package: &Package, prev: PackageState, new: PackageState) {
		log::info!("Package {} (collection {}) changed state from {} to {}", package.name, package.collection_id, prev, new);
	}

	fn collection_state_change(&self, collection: &Collection, prev: CollectionState, new: CollectionState) {
		log::info!("Collection {} changed state from {} to {}", collection.name, prev, new);
	}
}

/// Package states captured before a transaction, compared against the committed ones afterwards.
#[derive(Debug, Default)]
pub struct PackageStates {
	before: BTreeMap<i64, PackageState>,
}

impl PackageStates {
	pub fn new() -> Self {
		Self::default()
	}

	/// Remembers the state of `package` unless already recorded.
	pub fn record(&mut self, package: &Package) {
		self.before.entry(package.id).or_insert_with(|| package.state());
	}

	/// Notifies `handler` of every recorded package whose state changed, in id order.
	///
	/// Packages deleted in the meantime are skipped.
	pub fn emit(self, conn: &Connection, handler: &dyn EventHandler) -> crate::Result<()> {
		for (id, prev) in self.before {
			let Some(package) = Package::get(conn, id)? else {
				continue;
			};
			let new = package.state();
			if new != prev {
				handler.package_state_change(&package, prev, new);
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::Database;
	use parking_lot::Mutex;

	#[derive(Default)]
	struct Recorder(Mutex<Vec<(String, PackageState, PackageState)>>);

	impl EventHandler for Recorder {
		fn package_state_change(&self, package: &Package, prev: PackageState, new: PackageState) {
			self.0.lock().push((package.name.clone(), prev, new));
		}
		fn collection_state_change(&self, _collection: &Collection, _prev: CollectionState, _new: CollectionState) {}
	}

	#[test]
	fn only_changed_packages_are_reported() {
		let db = Database::open_in_memory().unwrap();
		let mut c = Collection::new("f39", "f39-build", "f39");
		c.insert(db.connection()).unwrap();
		let mut a = Package::new("a", c.id);
		a.insert(db.connection()).unwrap();
		let mut b = Package::new("b", c.id);
		b.insert(db.connection()).unwrap();

		let mut states = PackageStates::new();
		states.record(&a);
		states.record(&b);
		Package::set_resolved(db.connection(), b.id, Some(false)).unwrap();
		Package::set_resolved(db.connection(), a.id, Some(true)).unwrap();

		let recorder = Recorder::default();
		states.emit(db.connection(), &recorder).unwrap();
		assert_eq!(*recorder.0.lock(), vec![("b".to_string(), PackageState::Unknown, PackageState::Unresolved)]);
	}
}
