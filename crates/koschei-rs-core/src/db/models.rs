//! Rows of the persistent store and the queries over them.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Serialize, Deserialize};

use super::DependencyKeys;
use crate::repo_cache::RepoDescriptor;
use crate::repodata::{Evr, Nevra};
use crate::resolver::DependencyChange;

/// SQLite's default limit on bound parameters is 999.
const ID_CHUNK: usize = 500;

fn id_placeholders(n: usize) -> String {
	vec!["?"; n].join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionState {
	Ok,
	Unresolved,
	Unknown,
}

impl CollectionState {
	pub fn as_str(&self) -> &'static str {
		match self {
			CollectionState::Ok => "ok",
			CollectionState::Unresolved => "unresolved",
			CollectionState::Unknown => "unknown",
		}
	}
}

impl std::fmt::Display for CollectionState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageState {
	Ignored,
	Blocked,
	Unresolved,
	Ok,
	Failing,
	Unknown,
}

impl PackageState {
	pub fn as_str(&self) -> &'static str {
		match self {
			PackageState::Ignored => "ignored",
			PackageState::Blocked => "blocked",
			PackageState::Unresolved => "unresolved",
			PackageState::Ok => "ok",
			PackageState::Failing => "failing",
			PackageState::Unknown => "unknown",
		}
	}
}

impl std::fmt::Display for PackageState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildState {
	Running,
	Complete,
	Canceled,
	Failed,
}

impl BuildState {
	/// Finished with a result, either way.
	pub fn is_complete(&self) -> bool {
		matches!(self, BuildState::Complete | BuildState::Failed)
	}
}

/// Why the scheduler stopped considering a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
	/// The build system has no source artifact for it.
	NoSource,
	/// None of the package's arches can be built.
	NoArches,
}

/// A set of packages built from one build tag into one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
	pub id: i64,
	pub name: String,
	pub display_name: String,
	pub build_tag: String,
	pub target: String,
	pub build_group: String,
	/// Repository source the tag's repositories are fetched from.
	pub repo_source: String,
	pub priority_coefficient: f64,
	pub latest_repo_id: Option<i64>,
	/// `None` until a repository generation has been resolved.
	pub latest_repo_resolved: Option<bool>,
}

const COLLECTION_COLUMNS: &str = "id, name, display_name, build_tag, target, build_group, repo_source, priority_coefficient, latest_repo_id, latest_repo_resolved";

impl Collection {
	pub fn new(name: impl Into<String>, build_tag: impl Into<String>, target: impl Into<String>) -> Self {
		let name = name.into();
		Self {
			id: 0,
			display_name: name.clone(),
			name,
			build_tag: build_tag.into(),
			target: target.into(),
			build_group: "build".to_string(),
			repo_source: "primary".to_string(),
			priority_coefficient: 1.0,
			latest_repo_id: None,
			latest_repo_resolved: None,
		}
	}

	fn from_row(r: &Row) -> rusqlite::Result<Self> {
		Ok(Self {
			id: r.get(0)?,
			name: r.get(1)?,
			display_name: r.get(2)?,
			build_tag: r.get(3)?,
			target: r.get(4)?,
			build_group: r.get(5)?,
			repo_source: r.get(6)?,
			priority_coefficient: r.get(7)?,
			latest_repo_id: r.get(8)?,
			latest_repo_resolved: r.get(9)?,
		})
	}

	/// Inserts the collection and sets its id.
	pub fn insert(&mut self, conn: &Connection) -> crate::Result<()> {
		if !RepoDescriptor::is_valid_source(&self.repo_source) {
			return Err(crate::Error::Validation(format!("collection {} has invalid repository source \"{}\"", self.name, self.repo_source)));
		}
		conn.execute(
			"INSERT INTO collection (name, display_name, build_tag, target, build_group, repo_source, priority_coefficient, latest_repo_id, latest_repo_resolved)
			VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
			params![self.name, self.display_name, self.build_tag, self.target, self.build_group, self.repo_source, self.priority_coefficient, self.latest_repo_id, self.latest_repo_resolved],
		)?;
		self.id = conn.last_insert_rowid();
		Ok(())
	}

	pub fn get(conn: &Connection, id: i64) -> crate::Result<Option<Self>> {
		Ok(conn.query_row(
			&format!("SELECT {} FROM collection WHERE id = ?1", COLLECTION_COLUMNS),
			params![id],
			Self::from_row,
		).optional()?)
	}

	/// Every collection, ordered by id.
	pub fn all(conn: &Connection) -> crate::Result<Vec<Self>> {
		let mut stmt = conn.prepare(&format!("SELECT {} FROM collection ORDER BY id", COLLECTION_COLUMNS))?;
		let rows = stmt.query_map([], Self::from_row)?;
		Ok(rows.collect::<rusqlite::Result<_>>()?)
	}

	pub fn state(&self) -> CollectionState {
		match self.latest_repo_resolved {
			Some(true) => CollectionState::Ok,
			Some(false) => CollectionState::Unresolved,
			None => CollectionState::Unknown,
		}
	}

	pub fn repo_descriptor(&self, repo_id: i64) -> RepoDescriptor {
		RepoDescriptor::new(self.repo_source.clone(), self.build_tag.clone(), repo_id)
	}

	pub fn set_latest_repo(conn: &Connection, id: i64, repo_id: i64, resolved: Option<bool>) -> crate::Result<()> {
		let n = conn.execute(
			"UPDATE collection SET latest_repo_id = ?2, latest_repo_resolved = ?3 WHERE id = ?1",
			params![id, repo_id, resolved],
		)?;
		if n == 0 {
			return Err(crate::Error::StaleRow(format!("collection {}", id)));
		}
		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
	pub id: i64,
	pub name: String,
	pub collection_id: i64,
	pub tracked: bool,
	pub blocked: bool,
	pub static_priority: i64,
	pub manual_priority: i64,
	/// Space separated arches to build on instead of the tag's.
	pub arch_override: Option<String>,
	pub skip_reason: Option<SkipReason>,
	pub resolved: Option<bool>,
	pub last_build_id: Option<i64>,
	pub last_complete_build_id: Option<i64>,
	/// State of the build `last_complete_build_id` points to.
	pub last_complete_state: Option<BuildState>,
}

const PACKAGE_SELECT: &str = "SELECT p.id, p.name, p.collection_id, p.tracked, p.blocked, p.static_priority, p.manual_priority,
	p.arch_override, p.skip_reason, p.resolved, p.last_build_id, p.last_complete_build_id, lc.state
	FROM package p LEFT JOIN build lc ON lc.id = p.last_complete_build_id";

impl Package {
	pub fn new(name: impl Into<String>, collection_id: i64) -> Self {
		Self {
			id: 0,
			name: name.into(),
			collection_id,
			tracked: true,
			blocked: false,
			static_priority: 0,
			manual_priority: 0,
			arch_override: None,
			skip_reason: None,
			resolved: None,
			last_build_id: None,
			last_complete_build_id: None,
			last_complete_state: None,
		}
	}

	fn from_row(r: &Row) -> rusqlite::Result<Self> {
		Ok(Self {
			id: r.get(0)?,
			name: r.get(1)?,
			collection_id: r.get(2)?,
			tracked: r.get(3)?,
			blocked: r.get(4)?,
			static_priority: r.get(5)?,
			manual_priority: r.get(6)?,
			arch_override: r.get(7)?,
			skip_reason: r.get(8)?,
			resolved: r.get(9)?,
			last_build_id: r.get(10)?,
			last_complete_build_id: r.get(11)?,
			last_complete_state: r.get(12)?,
		})
	}

	/// Inserts the package and sets its id.
	pub fn insert(&mut self, conn: &Connection) -> crate::Result<()> {
		conn.execute(
			"INSERT INTO package (name, collection_id, tracked, blocked, static_priority, manual_priority, arch_override, skip_reason, resolved)
			VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
			params![self.name, self.collection_id, self.tracked, self.blocked, self.static_priority, self.manual_priority, self.arch_override, self.skip_reason, self.resolved],
		)?;
		self.id = conn.last_insert_rowid();
		Ok(())
	}

	pub fn get(conn: &Connection, id: i64) -> crate::Result<Option<Self>> {
		Ok(conn.query_row(&format!("{} WHERE p.id = ?1", PACKAGE_SELECT), params![id], Self::from_row).optional()?)
	}

	pub fn by_name(conn: &Connection, collection_id: i64, name: &str) -> crate::Result<Option<Self>> {
		Ok(conn.query_row(
			&format!("{} WHERE p.collection_id = ?1 AND p.name = ?2", PACKAGE_SELECT),
			params![collection_id, name],
			Self::from_row,
		).optional()?)
	}

	/// Packages of a collection ordered by id.
	pub fn by_collection(conn: &Connection, collection_id: i64) -> crate::Result<Vec<Self>> {
		let mut stmt = conn.prepare(&format!("{} WHERE p.collection_id = ?1 ORDER BY p.id", PACKAGE_SELECT))?;
		let rows = stmt.query_map(params![collection_id], Self::from_row)?;
		Ok(rows.collect::<rusqlite::Result<_>>()?)
	}

	/// Locks the package rows about to be mutated, in ascending id order.
	///
	/// The surrounding immediate transaction already excludes other writers.
	/// Walking the rows in order keeps the same discipline a row-locking store needs to avoid deadlocks.
	///
	/// # Returns
	/// The ids that still exist.
	pub fn lock(conn: &Connection, ids: &[i64]) -> crate::Result<Vec<i64>> {
		let mut ids = ids.to_vec();
		ids.sort_unstable();
		ids.dedup();
		let mut stmt = conn.prepare_cached("SELECT id FROM package WHERE id = ?1")?;
		let mut found = Vec::with_capacity(ids.len());
		for id in ids {
			if let Some(id) = stmt.query_row(params![id], |r| r.get::<_, i64>(0)).optional()? {
				found.push(id);
			}
		}
		Ok(found)
	}

	/// The state shown to users and sent in notifications.
	pub fn state(&self) -> PackageState {
		if !self.tracked {
			return PackageState::Ignored;
		}
		if self.blocked {
			return PackageState::Blocked;
		}
		if self.resolved == Some(false) {
			return PackageState::Unresolved;
		}
		match self.last_complete_state {
			Some(BuildState::Complete) => PackageState::Ok,
			Some(BuildState::Failed) => PackageState::Failing,
			_ => PackageState::Unknown,
		}
	}

	/// Arches from `arch_override`, empty when there is no override.
	pub fn arch_override_list(&self) -> Vec<String> {
		self.arch_override.as_deref()
			.map(|a| a.split_whitespace().map(str::to_string).collect())
			.unwrap_or_default()
	}

	pub fn set_resolved(conn: &Connection, id: i64, resolved: Option<bool>) -> crate::Result<()> {
		let n = conn.execute("UPDATE package SET resolved = ?2 WHERE id = ?1", params![id, resolved])?;
		if n == 0 {
			return Err(crate::Error::StaleRow(format!("package {}", id)));
		}
		Ok(())
	}

	pub fn set_skip_reason(conn: &Connection, id: i64, reason: Option<SkipReason>) -> crate::Result<()> {
		conn.execute("UPDATE package SET skip_reason = ?2 WHERE id = ?1", params![id, reason])?;
		Ok(())
	}

	/// Makes every skipped package of the collection a scheduling candidate again.
	pub fn clear_skip_reasons(conn: &Connection, collection_id: i64) -> crate::Result<usize> {
		Ok(conn.execute(
			"UPDATE package SET skip_reason = NULL WHERE collection_id = ?1 AND skip_reason IS NOT NULL",
			params![collection_id],
		)?)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
	pub id: i64,
	pub package_id: i64,
	pub state: BuildState,
	pub task_id: Option<i64>,
	pub started: DateTime<Utc>,
	pub finished: Option<DateTime<Utc>>,
	pub epoch: Option<i32>,
	pub version: Option<String>,
	pub release: Option<String>,
	/// Repository generation the build ran against.
	pub repo_id: Option<i64>,
	/// `None` until the build resolver processed it.
	pub deps_resolved: Option<bool>,
	pub dependency_keys: Option<DependencyKeys>,
}

const BUILD_COLUMNS: &str = "b.id, b.package_id, b.state, b.task_id, b.started, b.finished, b.epoch, b.version, b.release, b.repo_id, b.deps_resolved, b.dependency_keys";

impl Build {
	pub fn new(package_id: i64, state: BuildState) -> Self {
		Self {
			id: 0,
			package_id,
			state,
			task_id: None,
			started: Utc::now(),
			finished: None,
			epoch: None,
			version: None,
			release: None,
			repo_id: None,
			deps_resolved: None,
			dependency_keys: None,
		}
	}

	fn from_row(r: &Row) -> rusqlite::Result<Self> {
		Ok(Self {
			id: r.get(0)?,
			package_id: r.get(1)?,
			state: r.get(2)?,
			task_id: r.get(3)?,
			started: r.get(4)?,
			finished: r.get(5)?,
			epoch: r.get(6)?,
			version: r.get(7)?,
			release: r.get(8)?,
			repo_id: r.get(9)?,
			deps_resolved: r.get(10)?,
			dependency_keys: r.get(11)?,
		})
	}

	/// Inserts the build, sets its id and updates the package's latest build pointers.
	pub fn insert(&mut self, conn: &Connection) -> crate::Result<()> {
		conn.execute(
			"INSERT INTO build (package_id, state, task_id, started, finished, epoch, version, release, repo_id, deps_resolved, dependency_keys)
			VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
			params![
				self.package_id, self.state, self.task_id, self.started, self.finished,
				self.epoch, self.version, self.release, self.repo_id, self.deps_resolved, self.dependency_keys,
			],
		)?;
		self.id = conn.last_insert_rowid();

		conn.execute(
			"UPDATE package SET last_build_id = ?2 WHERE id = ?1 AND (last_build_id IS NULL OR last_build_id < ?2)",
			params![self.package_id, self.id],
		)?;
		if self.state.is_complete() {
			conn.execute(
				"UPDATE package SET last_complete_build_id = ?2 WHERE id = ?1 AND (last_complete_build_id IS NULL OR last_complete_build_id < ?2)",
				params![self.package_id, self.id],
			)?;
		}
		Ok(())
	}

	pub fn get(conn: &Connection, id: i64) -> crate::Result<Option<Self>> {
		Ok(conn.query_row(
			&format!("SELECT {} FROM build b WHERE b.id = ?1", BUILD_COLUMNS),
			params![id],
			Self::from_row,
		).optional()?)
	}

	/// Finished builds of a collection the build resolver hasn't processed yet, oldest repository first.
	pub fn unprocessed(conn: &Connection, collection_id: i64, limit: usize) -> crate::Result<Vec<Self>> {
		let mut stmt = conn.prepare(&format!(
			"SELECT {} FROM build b JOIN package p ON p.id = b.package_id
			WHERE p.collection_id = ?1 AND b.deps_resolved IS NULL AND b.repo_id IS NOT NULL AND b.state IN (?3, ?4)
			ORDER BY b.repo_id, b.id LIMIT ?2",
			BUILD_COLUMNS,
		))?;
		let rows = stmt.query_map(params![collection_id, limit as i64, BuildState::Complete, BuildState::Failed], Self::from_row)?;
		Ok(rows.collect::<rusqlite::Result<_>>()?)
	}

	/// The build new dependencies are compared against.
	///
	/// The most recent build with resolved dependencies, older than `before` when given.
	/// Builds with unresolved or unprocessed dependencies in between are skipped.
	pub fn baseline(conn: &Connection, package_id: i64, before: Option<i64>) -> crate::Result<Option<Self>> {
		Ok(conn.query_row(
			&format!(
				"SELECT {} FROM build b WHERE b.package_id = ?1 AND b.deps_resolved = 1 AND (?2 IS NULL OR b.id < ?2)
				ORDER BY b.id DESC LIMIT 1",
				BUILD_COLUMNS,
			),
			params![package_id, before],
			Self::from_row,
		).optional()?)
	}

	/// Records the build resolver's result.
	///
	/// # Errors
	/// [`StaleRow`](crate::Error::StaleRow) when the build was deleted or already processed by someone else.
	pub fn set_deps_resolved(conn: &Connection, id: i64, resolved: bool, keys: Option<&DependencyKeys>) -> crate::Result<()> {
		let n = conn.execute(
			"UPDATE build SET deps_resolved = ?2, dependency_keys = ?3 WHERE id = ?1 AND deps_resolved IS NULL",
			params![id, resolved, keys],
		)?;
		if n == 0 {
			return Err(crate::Error::StaleRow(format!("build {}", id)));
		}
		Ok(())
	}

	/// Moves a running build to its final state.
	///
	/// `repo_id` replaces the generation recorded at submission when the build system reports the one actually used.
	/// A complete or failed build becomes the package's latest complete build.
	///
	/// # Errors
	/// [`StaleRow`](crate::Error::StaleRow) when the build was deleted or already finished by someone else.
	pub fn finish(conn: &Connection, id: i64, state: BuildState, repo_id: Option<i64>, finished: DateTime<Utc>) -> crate::Result<()> {
		let n = conn.execute(
			"UPDATE build SET state = ?2, repo_id = COALESCE(?3, repo_id), finished = ?4 WHERE id = ?1 AND state = ?5",
			params![id, state, repo_id, finished, BuildState::Running],
		)?;
		if n == 0 {
			return Err(crate::Error::StaleRow(format!("build {}", id)));
		}
		if state.is_complete() {
			conn.execute(
				"UPDATE package SET last_complete_build_id = ?1
				WHERE id = (SELECT package_id FROM build WHERE id = ?1) AND (last_complete_build_id IS NULL OR last_complete_build_id < ?1)",
				params![id],
			)?;
		}
		Ok(())
	}

	/// Running builds, oldest first.
	pub fn running(conn: &Connection) -> crate::Result<Vec<Self>> {
		let mut stmt = conn.prepare(&format!("SELECT {} FROM build b WHERE b.state = ?1 ORDER BY b.id", BUILD_COLUMNS))?;
		let rows = stmt.query_map(params![BuildState::Running], Self::from_row)?;
		Ok(rows.collect::<rusqlite::Result<_>>()?)
	}

	pub fn running_count(conn: &Connection) -> crate::Result<i64> {
		Ok(conn.query_row("SELECT COUNT(*) FROM build WHERE state = ?1", params![BuildState::Running], |r| r.get(0))?)
	}

	/// Packages with a build currently running.
	pub fn running_package_ids(conn: &Connection) -> crate::Result<HashSet<i64>> {
		let mut stmt = conn.prepare("SELECT DISTINCT package_id FROM build WHERE state = ?1")?;
		let rows = stmt.query_map(params![BuildState::Running], |r| r.get::<_, i64>(0))?;
		Ok(rows.collect::<rusqlite::Result<_>>()?)
	}

	/// Start time of each package's most recent build in the collection.
	pub fn last_started(conn: &Connection, collection_id: i64) -> crate::Result<HashMap<i64, DateTime<Utc>>> {
		let mut stmt = conn.prepare(
			"SELECT b.package_id, MAX(b.started) FROM build b JOIN package p ON p.id = b.package_id
			WHERE p.collection_id = ?1 GROUP BY b.package_id",
		)?;
		let rows = stmt.query_map(params![collection_id], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, DateTime<Utc>>(1)?)))?;
		Ok(rows.collect::<rusqlite::Result<_>>()?)
	}

	pub fn evr(&self) -> Option<Evr> {
		match (&self.version, &self.release) {
			(Some(v), Some(r)) => Some(Evr::new(self.epoch.unwrap_or(0), v.clone(), r.clone())),
			_ => None,
		}
	}
}

/// A package artifact some build had installed, identified by a durable id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
	pub id: i64,
	pub nevra: Nevra,
}

const DEPENDENCY_COLUMNS: &str = "id, name, epoch, version, release, arch";

impl Dependency {
	fn from_row(r: &Row) -> rusqlite::Result<Self> {
		Ok(Self {
			id: r.get(0)?,
			nevra: Nevra {
				name: r.get(1)?,
				epoch: r.get(2)?,
				version: r.get(3)?,
				release: r.get(4)?,
				arch: r.get(5)?,
			},
		})
	}

	pub fn find_by_nevra(conn: &Connection, nevra: &Nevra) -> crate::Result<Option<Self>> {
		let mut stmt = conn.prepare_cached(&format!(
			"SELECT {} FROM dependency WHERE name = ?1 AND epoch = ?2 AND version = ?3 AND release = ?4 AND arch = ?5",
			DEPENDENCY_COLUMNS,
		))?;
		Ok(stmt.query_row(
			params![nevra.name, nevra.epoch, nevra.version, nevra.release, nevra.arch],
			Self::from_row,
		).optional()?)
	}

	/// The dependencies with the given ids, in no particular order. Unknown ids are left out.
	pub fn find_by_ids(conn: &Connection, ids: &[i64]) -> crate::Result<Vec<Self>> {
		let mut found = Vec::with_capacity(ids.len());
		for chunk in ids.chunks(ID_CHUNK) {
			let mut stmt = conn.prepare(&format!(
				"SELECT {} FROM dependency WHERE id IN ({})",
				DEPENDENCY_COLUMNS,
				id_placeholders(chunk.len()),
			))?;
			let rows = stmt.query_map(params_from_iter(chunk.iter()), Self::from_row)?;
			for row in rows {
				found.push(row?);
			}
		}
		Ok(found)
	}

	/// # Errors
	/// A constraint violation when another process inserted the same NEVRA first.
	pub fn insert(conn: &Connection, nevra: &Nevra) -> crate::Result<Self> {
		conn.execute(
			"INSERT INTO dependency (name, epoch, version, release, arch) VALUES (?1, ?2, ?3, ?4, ?5)",
			params![nevra.name, nevra.epoch, nevra.version, nevra.release, nevra.arch],
		)?;
		Ok(Self {
			id: conn.last_insert_rowid(),
			nevra: nevra.clone(),
		})
	}
}

const CHANGE_COLUMNS: &str = "dep_name, prev_epoch, prev_version, prev_release, curr_epoch, curr_version, curr_release, distance";

fn change_from_row(r: &Row) -> rusqlite::Result<DependencyChange> {
	let evr = |epoch: Option<i32>, version: Option<String>, release: Option<String>| {
		version.map(|v| Evr::new(epoch.unwrap_or(0), v, release.unwrap_or_default()))
	};
	Ok(DependencyChange {
		dep_name: r.get(0)?,
		prev: evr(r.get(1)?, r.get(2)?, r.get(3)?),
		curr: evr(r.get(4)?, r.get(5)?, r.get(6)?),
		distance: r.get(7)?,
	})
}

fn insert_changes(conn: &Connection, sql: &str, owner_id: i64, prev_build_id: Option<i64>, changes: &[DependencyChange]) -> crate::Result<()> {
	let mut stmt = conn.prepare_cached(sql)?;
	for c in changes {
		stmt.execute(params![
			owner_id,
			prev_build_id,
			c.dep_name,
			c.prev.as_ref().map(|e| e.epoch),
			c.prev.as_ref().map(|e| &e.version),
			c.prev.as_ref().map(|e| &e.release),
			c.curr.as_ref().map(|e| e.epoch),
			c.curr.as_ref().map(|e| &e.version),
			c.curr.as_ref().map(|e| &e.release),
			c.distance,
		])?;
	}
	Ok(())
}

/// Replaces the package's pending dependency changes with `changes`, computed against `prev_build_id`.
pub fn replace_unapplied_changes(conn: &Connection, package_id: i64, prev_build_id: i64, changes: &[DependencyChange]) -> crate::Result<()> {
	clear_unapplied_changes(conn, package_id)?;
	insert_changes(
		conn,
		&format!("INSERT INTO unapplied_change (package_id, prev_build_id, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)", CHANGE_COLUMNS),
		package_id,
		Some(prev_build_id),
		changes,
	)
}

pub fn clear_unapplied_changes(conn: &Connection, package_id: i64) -> crate::Result<()> {
	conn.execute("DELETE FROM unapplied_change WHERE package_id = ?1", params![package_id])?;
	Ok(())
}

/// Pending dependency changes of a package, ordered by name.
pub fn unapplied_changes(conn: &Connection, package_id: i64) -> crate::Result<Vec<DependencyChange>> {
	let mut stmt = conn.prepare(&format!("SELECT {} FROM unapplied_change WHERE package_id = ?1 ORDER BY dep_name, id", CHANGE_COLUMNS))?;
	let rows = stmt.query_map(params![package_id], change_from_row)?;
	Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Drops pending changes computed against a build older than `build_id`.
pub fn drop_outdated_unapplied_changes(conn: &Connection, package_id: i64, build_id: i64) -> crate::Result<usize> {
	Ok(conn.execute(
		"DELETE FROM unapplied_change WHERE package_id = ?1 AND prev_build_id < ?2",
		params![package_id, build_id],
	)?)
}

/// Distances of the pending changes of every package in a collection.
pub fn unapplied_distances(conn: &Connection, collection_id: i64) -> crate::Result<Vec<(i64, Option<u32>)>> {
	let mut stmt = conn.prepare(
		"SELECT c.package_id, c.distance FROM unapplied_change c JOIN package p ON p.id = c.package_id
		WHERE p.collection_id = ?1 ORDER BY c.package_id",
	)?;
	let rows = stmt.query_map(params![collection_id], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, Option<u32>>(1)?)))?;
	Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Records the changes a build brought against `prev_build_id`.
pub fn insert_applied_changes(conn: &Connection, build_id: i64, prev_build_id: Option<i64>, changes: &[DependencyChange]) -> crate::Result<()> {
	insert_changes(
		conn,
		&format!("INSERT INTO applied_change (build_id, prev_build_id, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)", CHANGE_COLUMNS),
		build_id,
		prev_build_id,
		changes,
	)
}

pub fn applied_changes(conn: &Connection, build_id: i64) -> crate::Result<Vec<DependencyChange>> {
	let mut stmt = conn.prepare(&format!("SELECT {} FROM applied_change WHERE build_id = ?1 ORDER BY dep_name, id", CHANGE_COLUMNS))?;
	let rows = stmt.query_map(params![build_id], change_from_row)?;
	Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// A change of a package's resolution result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionChange {
	pub id: i64,
	pub package_id: i64,
	pub timestamp: DateTime<Utc>,
	pub resolved: bool,
	/// Sorted.
	pub problems: Vec<String>,
}

impl ResolutionChange {
	/// The package's most recent resolution change with its problems.
	pub fn latest(conn: &Connection, package_id: i64) -> crate::Result<Option<Self>> {
		let change = conn.query_row(
			"SELECT id, package_id, timestamp, resolved FROM resolution_change WHERE package_id = ?1 ORDER BY id DESC LIMIT 1",
			params![package_id],
			|r| Ok(Self {
				id: r.get(0)?,
				package_id: r.get(1)?,
				timestamp: r.get(2)?,
				resolved: r.get(3)?,
				problems: Vec::new(),
			}),
		).optional()?;

		let Some(mut change) = change else {
			return Ok(None);
		};
		let mut stmt = conn.prepare_cached("SELECT problem FROM resolution_problem WHERE resolution_id = ?1 ORDER BY problem")?;
		let problems = stmt.query_map(params![change.id], |r| r.get::<_, String>(0))?;
		change.problems = problems.collect::<rusqlite::Result<_>>()?;
		Ok(Some(change))
	}

	/// Stores a new resolution change, `problems` should be sorted.
	pub fn insert(conn: &Connection, package_id: i64, resolved: bool, problems: &[String]) -> crate::Result<i64> {
		conn.execute(
			"INSERT INTO resolution_change (package_id, timestamp, resolved) VALUES (?1, ?2, ?3)",
			params![package_id, Utc::now(), resolved],
		)?;
		let id = conn.last_insert_rowid();
		let mut stmt = conn.prepare_cached("INSERT INTO resolution_problem (resolution_id, problem) VALUES (?1, ?2)")?;
		for p in problems {
			stmt.execute(params![id, p])?;
		}
		Ok(id)
	}

	pub fn count(conn: &Connection, package_id: i64) -> crate::Result<i64> {
		Ok(conn.query_row("SELECT COUNT(*) FROM resolution_change WHERE package_id = ?1", params![package_id], |r| r.get(0))?)
	}
}

pub fn replace_buildroot_problems(conn: &Connection, collection_id: i64, problems: &[String]) -> crate::Result<()> {
	conn.execute("DELETE FROM buildroot_problem WHERE collection_id = ?1", params![collection_id])?;
	let mut stmt = conn.prepare_cached("INSERT INTO buildroot_problem (collection_id, problem) VALUES (?1, ?2)")?;
	for p in problems {
		stmt.execute(params![collection_id, p])?;
	}
	Ok(())
}

pub fn buildroot_problems(conn: &Connection, collection_id: i64) -> crate::Result<Vec<String>> {
	let mut stmt = conn.prepare("SELECT problem FROM buildroot_problem WHERE collection_id = ?1 ORDER BY id")?;
	let rows = stmt.query_map(params![collection_id], |r| r.get::<_, String>(0))?;
	Ok(rows.collect::<rusqlite::Result<_>>()?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::Database;

	fn setup() -> (Database, Collection, Package) {
		let db = Database::open_in_memory().unwrap();
		let mut c = Collection::new("f39", "f39-build", "f39");
		c.insert(db.connection()).unwrap();
		let mut p = Package::new("rnv", c.id);
		p.insert(db.connection()).unwrap();
		(db, c, p)
	}

	fn build(db: &Database, package_id: i64, deps_resolved: Option<bool>) -> Build {
		let mut b = Build::new(package_id, BuildState::Complete);
		b.repo_id = Some(100);
		b.deps_resolved = deps_resolved;
		b.insert(db.connection()).unwrap();
		b
	}

	#[test]
	fn collection_source_must_format_unambiguously() {
		let (db, _, _) = setup();
		let mut c = Collection::new("epel9", "epel9-build", "epel9");
		c.repo_source = "fedora-mirror".to_string();
		assert!(matches!(c.insert(db.connection()), Err(crate::Error::Validation(_))));
		assert_eq!(Collection::all(db.connection()).unwrap().len(), 1);
	}

	#[test]
	fn package_state_follows_builds() {
		let (db, _, p) = setup();
		assert_eq!(Package::get(db.connection(), p.id).unwrap().unwrap().state(), PackageState::Unknown);

		let mut failed = Build::new(p.id, BuildState::Failed);
		failed.insert(db.connection()).unwrap();
		assert_eq!(Package::get(db.connection(), p.id).unwrap().unwrap().state(), PackageState::Failing);

		Package::set_resolved(db.connection(), p.id, Some(false)).unwrap();
		assert_eq!(Package::get(db.connection(), p.id).unwrap().unwrap().state(), PackageState::Unresolved);
	}

	#[test]
	fn running_build_is_not_complete() {
		let (db, _, p) = setup();
		let mut b = Build::new(p.id, BuildState::Running);
		b.insert(db.connection()).unwrap();
		let p = Package::get(db.connection(), p.id).unwrap().unwrap();
		assert_eq!(p.last_build_id, Some(b.id));
		assert_eq!(p.last_complete_build_id, None);
		assert_eq!(Build::running_count(db.connection()).unwrap(), 1);
	}

	#[test]
	fn finished_build_becomes_latest_complete() {
		let (db, c, p) = setup();
		let mut b = Build::new(p.id, BuildState::Running);
		b.repo_id = Some(100);
		b.insert(db.connection()).unwrap();
		assert!(Build::unprocessed(db.connection(), c.id, 10).unwrap().is_empty());
		assert_eq!(Build::running(db.connection()).unwrap().len(), 1);

		Build::finish(db.connection(), b.id, BuildState::Complete, Some(101), Utc::now()).unwrap();
		let finished = Build::get(db.connection(), b.id).unwrap().unwrap();
		assert_eq!(finished.state, BuildState::Complete);
		assert_eq!(finished.repo_id, Some(101));
		assert!(finished.finished.is_some());
		let p = Package::get(db.connection(), p.id).unwrap().unwrap();
		assert_eq!(p.last_complete_build_id, Some(b.id));
		assert_eq!(p.state(), PackageState::Ok);
		assert_eq!(Build::running_count(db.connection()).unwrap(), 0);
		assert_eq!(Build::unprocessed(db.connection(), c.id, 10).unwrap().len(), 1);

		assert!(matches!(Build::finish(db.connection(), b.id, BuildState::Failed, None, Utc::now()), Err(crate::Error::StaleRow(_))));
	}

	#[test]
	fn canceled_build_keeps_previous_result() {
		let (db, c, p) = setup();
		let done = build(&db, p.id, Some(true));
		let mut b = Build::new(p.id, BuildState::Running);
		b.repo_id = Some(100);
		b.insert(db.connection()).unwrap();

		Build::finish(db.connection(), b.id, BuildState::Canceled, None, Utc::now()).unwrap();
		let p = Package::get(db.connection(), p.id).unwrap().unwrap();
		assert_eq!(p.last_complete_build_id, Some(done.id));
		assert_eq!(Build::get(db.connection(), b.id).unwrap().unwrap().repo_id, Some(100));
		assert!(Build::unprocessed(db.connection(), c.id, 10).unwrap().is_empty());
	}

	#[test]
	fn baseline_skips_unresolved_builds() {
		let (db, _, p) = setup();
		let first = build(&db, p.id, Some(true));
		let _unresolved = build(&db, p.id, Some(false));
		let current = build(&db, p.id, None);
		assert_eq!(Build::baseline(db.connection(), p.id, Some(current.id)).unwrap().unwrap().id, first.id);
		assert_eq!(Build::baseline(db.connection(), p.id, Some(first.id)).unwrap(), None);
		assert_eq!(Build::unprocessed(db.connection(), p.collection_id, 10).unwrap().len(), 1);
	}

	#[test]
	fn processed_build_is_stale() {
		let (db, _, p) = setup();
		let b = build(&db, p.id, None);
		let keys = DependencyKeys(vec![1, 2, 3]);
		Build::set_deps_resolved(db.connection(), b.id, true, Some(&keys)).unwrap();
		assert_eq!(Build::get(db.connection(), b.id).unwrap().unwrap().dependency_keys, Some(keys));
		assert!(matches!(Build::set_deps_resolved(db.connection(), b.id, true, None), Err(crate::Error::StaleRow(_))));
	}

	#[test]
	fn dependencies_by_ids() {
		let (db, _, _) = setup();
		let a = Dependency::insert(db.connection(), &Nevra::new("A", 0, "1", "1.fc22", "x86_64")).unwrap();
		let b = Dependency::insert(db.connection(), &Nevra::new("B", 0, "4.1", "1.fc22", "x86_64")).unwrap();
		assert!(Dependency::insert(db.connection(), &a.nevra).is_err());
		let mut found = Dependency::find_by_ids(db.connection(), &[b.id, a.id, 999]).unwrap();
		found.sort_by_key(|d| d.id);
		assert_eq!(found, vec![a.clone(), b]);
		assert_eq!(Dependency::find_by_nevra(db.connection(), &a.nevra).unwrap(), Some(a));
	}

	#[test]
	fn unapplied_changes_are_replaced() {
		let (db, _, p) = setup();
		let b = build(&db, p.id, Some(true));
		let change = DependencyChange {
			dep_name: "C".to_string(),
			prev: Some(Evr::new(1, "3", "1.fc22")),
			curr: None,
			distance: None,
		};
		replace_unapplied_changes(db.connection(), p.id, b.id, &[change.clone()]).unwrap();
		replace_unapplied_changes(db.connection(), p.id, b.id, &[change.clone()]).unwrap();
		assert_eq!(unapplied_changes(db.connection(), p.id).unwrap(), vec![change]);
		assert_eq!(unapplied_distances(db.connection(), p.collection_id).unwrap(), vec![(p.id, None)]);
		assert_eq!(drop_outdated_unapplied_changes(db.connection(), p.id, b.id + 1).unwrap(), 1);
	}

	#[test]
	fn latest_resolution_change_has_problems() {
		let (db, _, p) = setup();
		assert!(ResolutionChange::latest(db.connection(), p.id).unwrap().is_none());
		ResolutionChange::insert(db.connection(), p.id, false, &["a".to_string(), "b".to_string()]).unwrap();
		let latest = ResolutionChange::latest(db.connection(), p.id).unwrap().unwrap();
		assert!(!latest.resolved);
		assert_eq!(latest.problems, vec!["a".to_string(), "b".to_string()]);
	}

	#[test]
	fn skip_reasons_are_cleared() {
		let (db, c, p) = setup();
		Package::set_skip_reason(db.connection(), p.id, Some(SkipReason::NoSource)).unwrap();
		assert_eq!(Package::get(db.connection(), p.id).unwrap().unwrap().skip_reason, Some(SkipReason::NoSource));
		assert_eq!(Package::clear_skip_reasons(db.connection(), c.id).unwrap(), 1);
		assert_eq!(Package::lock(db.connection(), &[p.id, 999, p.id]).unwrap(), vec![p.id]);
	}
}
