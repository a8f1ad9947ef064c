//! LRU cache of [`Dependency`] rows.
//!
//! A resolution run sees the same few thousand dependencies for every package, the cache saves a query for each of them.
//! Entries are indexed by id and by NEVRA, both indices always hold the same entries.

use std::collections::{BTreeMap, HashMap, HashSet};

use rusqlite::Connection;

use crate::db::{self, Dependency};
use crate::repodata::Nevra;

pub struct DependencyCache {
	capacity: usize,
	by_id: HashMap<i64, (Dependency, u64)>,
	by_nevra: HashMap<Nevra, i64>,
	/// Last use tick to id, oldest first.
	recency: BTreeMap<u64, i64>,
	tick: u64,
}

impl DependencyCache {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity,
			by_id: HashMap::new(),
			by_nevra: HashMap::new(),
			recency: BTreeMap::new(),
			tick: 0,
		}
	}

	pub fn len(&self) -> usize {
		self.by_id.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_id.is_empty()
	}

	fn next_tick(&mut self) -> u64 {
		self.tick += 1;
		self.tick
	}

	/// Marks a cached entry most recently used.
	fn touch(&mut self, id: i64) -> Option<Dependency> {
		let tick = self.next_tick();
		let (dep, used) = self.by_id.get_mut(&id)?;
		self.recency.remove(used);
		*used = tick;
		self.recency.insert(tick, id);
		Some(dep.clone())
	}

	fn add(&mut self, dep: Dependency) {
		if self.capacity == 0 || self.touch(dep.id).is_some() {
			return;
		}
		let tick = self.next_tick();
		self.recency.insert(tick, dep.id);
		self.by_nevra.insert(dep.nevra.clone(), dep.id);
		self.by_id.insert(dep.id, (dep, tick));

		while self.by_id.len() > self.capacity {
			let Some((_, oldest)) = self.recency.pop_first() else {
				break;
			};
			if let Some((evicted, _)) = self.by_id.remove(&oldest) {
				self.by_nevra.remove(&evicted.nevra);
			}
		}
	}

	/// Finds the dependency row for `nevra`, inserting it when there's none.
	pub fn get_or_create_nevra(&mut self, conn: &Connection, nevra: &Nevra) -> crate::Result<Dependency> {
		if let Some(&id) = self.by_nevra.get(nevra) {
			if let Some(dep) = self.touch(id) {
				return Ok(dep);
			}
		}
		let dep = match Dependency::find_by_nevra(conn, nevra)? {
			Some(dep) => dep,
			None => create(conn, nevra)?,
		};
		self.add(dep.clone());
		Ok(dep)
	}

	pub fn get_or_create_nevras<'n>(&mut self, conn: &Connection, nevras: impl IntoIterator<Item = &'n Nevra>) -> crate::Result<Vec<Dependency>> {
		nevras.into_iter().map(|n| self.get_or_create_nevra(conn, n)).collect()
	}

	/// Fetches dependencies by id, querying the ones not cached in one batch.
	///
	/// The result is in no particular order and has one entry per distinct id.
	///
	/// # Panics
	/// When an id has no row, the ids come from stored builds so this means the database is inconsistent.
	pub fn get_by_ids(&mut self, conn: &Connection, ids: &[i64]) -> crate::Result<Vec<Dependency>> {
		let mut seen = HashSet::with_capacity(ids.len());
		let mut result = Vec::with_capacity(ids.len());
		let mut missing = Vec::new();
		for &id in ids {
			if !seen.insert(id) {
				continue;
			}
			match self.touch(id) {
				Some(dep) => result.push(dep),
				None => missing.push(id),
			}
		}

		if !missing.is_empty() {
			let found = Dependency::find_by_ids(conn, &missing)?;
			assert_eq!(found.len(), missing.len(), "dependency rows missing for ids {:?}", missing);
			for dep in found {
				self.add(dep.clone());
				result.push(dep);
			}
		}

		assert!(ids.is_empty() || !result.is_empty());
		Ok(result)
	}
}

/// Inserts the row, a concurrent insert of the same NEVRA by another process wins and its row is returned.
fn create(conn: &Connection, nevra: &Nevra) -> crate::Result<Dependency> {
	match db::savepoint(conn, |conn| Dependency::insert(conn, nevra)) {
		Ok(dep) => Ok(dep),
		Err(e) if db::is_constraint_violation(&e) => {
			log::debug!("Dependency {} was inserted concurrently", nevra);
			Dependency::find_by_nevra(conn, nevra)?
				.ok_or_else(|| crate::Error::StaleRow(format!("dependency {}", nevra)))
		},
		Err(e) => Err(e),
	}
}
