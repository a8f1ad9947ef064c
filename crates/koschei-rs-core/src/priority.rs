//! # Priority plugins
//!
//! Each [`PriorityQuery`] contributes a share of a package's scheduling priority.
//! The scheduler adds the shares of every registered query to the static and manual priorities.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::config::PriorityConfig;
use crate::db::{self, Build, BuildState, Collection, Package};
use crate::resolver::change_weight;

/// A source of priority for the packages of a collection.
pub trait PriorityQuery: Send + Sync {
	fn name(&self) -> &str;

	/// Priority of each package of `packages` this query has an opinion on, keyed by package id.
	///
	/// Packages missing from the result contribute nothing.
	fn priorities(&self, conn: &Connection, collection: &Collection, packages: &[Package]) -> crate::Result<HashMap<i64, f64>>;
}

/// Priority from dependency changes that haven't been built yet.
///
/// A change at distance `d` contributes `package_update / d`, unreachable changes count as far away.
#[derive(Debug, Clone)]
pub struct DependencyPriority {
	pub package_update: f64,
}

impl PriorityQuery for DependencyPriority {
	fn name(&self) -> &str {
		"dependency"
	}

	fn priorities(&self, conn: &Connection, collection: &Collection, _packages: &[Package]) -> crate::Result<HashMap<i64, f64>> {
		let mut result = HashMap::new();
		for (package_id, distance) in db::unapplied_distances(conn, collection.id)? {
			*result.entry(package_id).or_insert(0.0) += change_weight(self.package_update, distance);
		}
		Ok(result)
	}
}

/// Priority growing logarithmically with the time since the last build started.
///
/// `t1 * ln(hours / t0)`, zero before `t0` hours have passed.
/// Packages never built get nothing, the dependency changes of their first resolution drive them.
#[derive(Debug, Clone)]
pub struct TimePriority {
	pub t0: f64,
	pub t1: f64,
}

impl TimePriority {
	pub fn priority_at(&self, last_started: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
		let hours = (now - last_started).num_seconds() as f64 / 3600.0;
		if hours <= self.t0 {
			return 0.0;
		}
		(self.t1 * (hours / self.t0).ln()).max(0.0)
	}
}

impl PriorityQuery for TimePriority {
	fn name(&self) -> &str {
		"time"
	}

	fn priorities(&self, conn: &Connection, collection: &Collection, _packages: &[Package]) -> crate::Result<HashMap<i64, f64>> {
		let now = Utc::now();
		Ok(Build::last_started(conn, collection.id)?
			.into_iter()
			.map(|(id, started)| (id, self.priority_at(started, now)))
			.filter(|(_, p)| *p > 0.0)
			.collect())
	}
}

/// Constant bonus for packages whose last complete build failed.
#[derive(Debug, Clone)]
pub struct FailedBuildPriority {
	pub priority: f64,
}

impl PriorityQuery for FailedBuildPriority {
	fn name(&self) -> &str {
		"failed-build"
	}

	fn priorities(&self, _conn: &Connection, _collection: &Collection, packages: &[Package]) -> crate::Result<HashMap<i64, f64>> {
		Ok(packages.iter()
			.filter(|p| p.last_complete_state == Some(BuildState::Failed))
			.map(|p| (p.id, self.priority))
			.collect())
	}
}

/// The built-in queries configured from `config`.
pub fn default_queries(config: &PriorityConfig) -> Vec<Box<dyn PriorityQuery>> {
	vec![
		Box::new(DependencyPriority { package_update: config.package_update }),
		Box::new(TimePriority { t0: config.t0, t1: config.t1 }),
		Box::new(FailedBuildPriority { priority: config.failed_build_priority }),
	]
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::Database;
	use crate::repodata::Evr;
	use crate::resolver::DependencyChange;

	fn collection(db: &Database) -> Collection {
		let mut c = Collection::new("f22", "f22-build", "f22");
		c.insert(db.connection()).unwrap();
		c
	}

	#[test]
	fn time_priority_starts_after_t0() {
		let query = TimePriority { t0: 6.0, t1: 7.0 };
		let now = Utc::now();
		assert_eq!(query.priority_at(now - chrono::Duration::hours(2), now), 0.0);
		assert_eq!(query.priority_at(now - chrono::Duration::hours(6), now), 0.0);
		let p = query.priority_at(now - chrono::Duration::hours(12), now);
		assert!((p - 7.0 * 2f64.ln()).abs() < 1e-9);
	}

	#[test]
	fn dependency_priority_sums_weighted_changes() {
		let db = Database::open_in_memory().unwrap();
		let c = collection(&db);
		let mut p = Package::new("rnv", c.id);
		p.insert(db.connection()).unwrap();
		let mut b = Build::new(p.id, BuildState::Complete);
		b.insert(db.connection()).unwrap();

		let change = |name: &str, distance| DependencyChange {
			dep_name: name.to_string(),
			prev: Some(Evr::new(0, "1", "1")),
			curr: Some(Evr::new(0, "2", "1")),
			distance,
		};
		db::replace_unapplied_changes(db.connection(), p.id, b.id, &[change("a", Some(1)), change("b", Some(2)), change("c", None)]).unwrap();

		let query = DependencyPriority { package_update: 20.0 };
		let priorities = query.priorities(db.connection(), &c, &[]).unwrap();
		assert!((priorities[&p.id] - (20.0 + 10.0 + 2.5)).abs() < 1e-9);
	}

	#[test]
	fn failed_build_priority_only_for_failures() {
		let db = Database::open_in_memory().unwrap();
		let c = collection(&db);
		let mut ok = Package::new("ok", c.id);
		ok.insert(db.connection()).unwrap();
		Build::new(ok.id, BuildState::Complete).insert(db.connection()).unwrap();
		let mut failing = Package::new("failing", c.id);
		failing.insert(db.connection()).unwrap();
		Build::new(failing.id, BuildState::Failed).insert(db.connection()).unwrap();

		let packages = Package::by_collection(db.connection(), c.id).unwrap();
		let query = FailedBuildPriority { priority: 200.0 };
		let priorities = query.priorities(db.connection(), &c, &packages).unwrap();
		assert_eq!(priorities, HashMap::from([(failing.id, 200.0)]));
	}
}
