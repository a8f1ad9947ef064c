//! # Resolvers
//!
//! Two services resolve build dependencies against repository generations:
//! - [`RepoResolver`] resolves every package of a collection when a new repository generation appears,
//!   storing whether it is installable and how its dependencies changed since its last resolved build.
//! - [`BuildResolver`] resolves the dependencies each finished build was built with, so later builds can be compared to it.
//!
//! Only one process resolves a given repository generation at a time, guarded by an advisory lock.

use std::collections::{BTreeMap, HashSet};

use rusqlite::Connection;
use serde::{Serialize, Deserialize};

use crate::build_system::{BuildSystem, RemoteResult};
use crate::db::{self, Build, Collection, Package, ResolutionChange};
use crate::dependency_cache::DependencyCache;
use crate::repodata::{Evr, Nevra, Reldep, Sack};
use crate::solver::BuildrootSolution;

mod repo;
pub use repo::RepoResolver;

mod build;
pub use build::BuildResolver;

/// Advisory lock namespace of the repo resolver, keyed by repository generation.
pub const REPO_LOCK_NAMESPACE: i64 = 1;
/// Advisory lock namespace of the build resolver, keyed by repository generation.
pub const BUILD_LOCK_NAMESPACE: i64 = 2;

/// Distance used for weighting changes of dependencies too far away, or unreachable.
const UNREACHABLE_DISTANCE: u32 = 8;

/// A dependency that appeared, disappeared or changed version between two resolutions.
///
/// At least one of `prev` and `curr` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyChange {
	pub dep_name: String,
	/// `None` when the dependency is new.
	pub prev: Option<Evr>,
	/// `None` when the dependency was removed.
	pub curr: Option<Evr>,
	/// Distance from the build requirements, `None` when unknown.
	pub distance: Option<u32>,
}

impl DependencyChange {
	/// Priority this change adds to its package, `update_weight / (distance or 8)`.
	pub fn weight(&self, update_weight: f64) -> f64 {
		change_weight(update_weight, self.distance)
	}
}

pub fn change_weight(update_weight: f64, distance: Option<u32>) -> f64 {
	update_weight / f64::from(distance.unwrap_or(UNREACHABLE_DISTANCE).max(1))
}

/// Result of resolving one package.
#[derive(Debug, Clone)]
pub struct ResolutionOutput {
	pub package_id: i64,
	pub resolved: bool,
	pub problems: Vec<String>,
	pub changes: Vec<DependencyChange>,
	/// Build the changes were computed against.
	pub baseline_build_id: Option<i64>,
	/// The package's latest build when resolution started, a different one at persist time means it raced with a new build.
	pub last_build_id: Option<i64>,
}

fn same_evr(a: &Evr, b: &Evr) -> bool {
	a.epoch == b.epoch && a.version == b.version && a.release == b.release
}

/// Compares two dependency sets by package name.
///
/// Packages named in `exclude` are ignored, so are both sets when either is empty since there is nothing to compare.
/// When several arches of a name are installed the highest version stands for the name.
///
/// # Returns
/// The changes ordered by name, with the distance of the current dependency.
pub fn compute_dependency_changes(prev: &[Nevra], curr: &[(Nevra, Option<u32>)], exclude: &HashSet<String>) -> Vec<DependencyChange> {
	if prev.is_empty() || curr.is_empty() {
		return Vec::new();
	}

	let mut before = BTreeMap::<&str, Evr>::new();
	for n in prev.iter().filter(|n| !exclude.contains(&n.name)) {
		let evr = n.evr();
		match before.get(n.name.as_str()) {
			Some(existing) if existing >= &evr => {},
			_ => { before.insert(&n.name, evr); },
		}
	}
	let mut after = BTreeMap::<&str, (Evr, Option<u32>)>::new();
	for (n, distance) in curr.iter().filter(|(n, _)| !exclude.contains(&n.name)) {
		let evr = n.evr();
		match after.get(n.name.as_str()) {
			Some((existing, _)) if existing >= &evr => {},
			_ => { after.insert(&n.name, (evr, *distance)); },
		}
	}

	let names: std::collections::BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();
	names.into_iter().filter_map(|name| {
		let prev = before.get(name);
		let curr = after.get(name);
		match (prev, curr) {
			(Some(p), Some((c, _))) if same_evr(p, c) => None,
			_ => Some(DependencyChange {
				dep_name: name.to_string(),
				prev: prev.cloned(),
				curr: curr.map(|(c, _)| c.clone()),
				distance: curr.and_then(|(_, d)| *d),
			}),
		}
	}).collect()
}

/// Outcome of resolving a package's requirements on top of a buildroot.
pub struct Resolution {
	pub resolved: bool,
	pub problems: Vec<String>,
	/// Installed packages with their distance, empty when unresolved.
	pub dependencies: Vec<(Nevra, Option<u32>)>,
}

pub fn resolve_requires(buildroot: &BuildrootSolution<'_>, requires: &[Reldep], max_distance: u32) -> Resolution {
	let solution = buildroot.builddep(requires);
	if !solution.resolved() {
		return Resolution {
			resolved: false,
			problems: solution.problems().to_vec(),
			dependencies: Vec::new(),
		};
	}
	Resolution {
		resolved: true,
		problems: Vec::new(),
		dependencies: solution.dependencies(max_distance),
	}
}

/// Members of the collection's build group.
///
/// The build system's definition wins, the repository's `group.json` is the fallback.
pub fn build_group(build_system: &dyn BuildSystem, sack: &Sack, collection: &Collection, repo_id: i64) -> RemoteResult<Vec<String>> {
	match build_system.build_group(&collection.build_tag, &collection.build_group, repo_id) {
		RemoteResult::NotFound => match sack.group(&collection.build_group) {
			Some(members) => {
				log::debug!("Using build group {} from repository metadata", collection.build_group);
				RemoteResult::Found(members.to_vec())
			},
			None => RemoteResult::NotFound,
		},
		r => r,
	}
}

/// Dependencies stored for `build`, empty when it has none.
pub fn build_dependencies(conn: &Connection, cache: &mut DependencyCache, build: &Build) -> crate::Result<Vec<Nevra>> {
	match &build.dependency_keys {
		Some(keys) if !keys.0.is_empty() => Ok(cache.get_by_ids(conn, &keys.0)?.into_iter().map(|d| d.nevra).collect()),
		_ => Ok(Vec::new()),
	}
}

/// Stores a package's resolution result.
///
/// A resolution change is only recorded when the result differs from the previous one, rerunning a resolution changes nothing.
pub fn store_resolution(conn: &Connection, package_id: i64, resolved: bool, problems: &[String]) -> crate::Result<()> {
	let mut problems = problems.to_vec();
	problems.sort();
	problems.dedup();

	let changed = match ResolutionChange::latest(conn, package_id)? {
		Some(latest) => latest.resolved != resolved || latest.problems != problems,
		None => true,
	};
	if changed {
		ResolutionChange::insert(conn, package_id, resolved, &problems)?;
	}
	Package::set_resolved(conn, package_id, Some(resolved))
}

/// Persists the output of one package, within the caller's transaction.
///
/// # Errors
/// [`StaleRow`](crate::Error::StaleRow) when the package was deleted or got a new build since resolution started.
pub fn persist_output(conn: &Connection, output: &ResolutionOutput) -> crate::Result<()> {
	let package = Package::get(conn, output.package_id)?
		.ok_or_else(|| crate::Error::StaleRow(format!("package {}", output.package_id)))?;
	if package.last_build_id != output.last_build_id {
		return Err(crate::Error::StaleRow(format!("package {} got a new build", package.name)));
	}

	store_resolution(conn, output.package_id, output.resolved, &output.problems)?;
	match output.baseline_build_id {
		Some(baseline) if output.resolved => db::replace_unapplied_changes(conn, output.package_id, baseline, &output.changes),
		_ => db::clear_unapplied_changes(conn, output.package_id),
	}
}
