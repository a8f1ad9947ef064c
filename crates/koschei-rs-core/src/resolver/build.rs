use std::collections::{BTreeMap, HashMap, HashSet};

use super::*;
use crate::build_system::SourceNvr;
use crate::db::{AdvisoryLock, DependencyKeys};
use crate::repodata::Sack;
use crate::solver::{self, parse_requires};
use crate::Session;

/// Resolves the dependencies builds were built with, for comparing later resolutions against them.
pub struct BuildResolver<'s> {
	session: &'s Session,
	dep_cache: DependencyCache,
}

impl<'s> BuildResolver<'s> {
	pub fn new(session: &'s Session) -> Self {
		Self {
			session,
			dep_cache: DependencyCache::new(session.config().dependency.dependency_cache_capacity),
		}
	}

	/// One pass over every collection.
	pub fn run(&mut self) -> crate::Result<()> {
		for collection in Collection::all(self.session.db().connection())? {
			match self.process_collection(&collection) {
				Err(e) if e.is_transient() => log::info!("Skipping builds of collection {} this cycle: {}", collection.name, e),
				r => r?,
			}
		}
		Ok(())
	}

	/// Processes up to a chunk of unprocessed builds of `collection`.
	///
	/// All repositories involved are prefetched up front so downloads overlap with resolution.
	pub fn process_collection(&mut self, collection: &Collection) -> crate::Result<()> {
		let session = self.session;
		let db = session.db();
		let chunk = session.config().dependency.build_resolver_chunk_size.max(1);
		let builds = Build::unprocessed(db.connection(), collection.id, chunk)?;
		if builds.is_empty() {
			return Ok(());
		}

		let mut by_repo = BTreeMap::<i64, Vec<Build>>::new();
		for build in builds {
			if let Some(repo_id) = build.repo_id {
				by_repo.entry(repo_id).or_default().push(build);
			}
		}

		let mut locked = Vec::<(i64, Vec<Build>, AdvisoryLock<'_>)>::new();
		for (repo_id, builds) in by_repo {
			match db.try_advisory_lock(BUILD_LOCK_NAMESPACE, repo_id)? {
				Some(lock) => locked.push((repo_id, builds, lock)),
				None => log::info!("Builds of repo {} are being resolved by another process", repo_id),
			}
		}

		let cache = session.repo_cache();
		for (repo_id, _, _) in &locked {
			cache.prefetch_repo(collection.repo_descriptor(*repo_id));
		}

		/* Every prefetched repo is consumed, even after a failure, to keep the prefetch order */
		let mut failure = None;
		for (repo_id, builds, _lock) in &locked {
			let repo = collection.repo_descriptor(*repo_id);
			if failure.is_some() {
				let _ = cache.get_sack(&repo, |_| ());
				continue;
			}
			let r = cache.get_sack(&repo, |sack| match sack {
				Some(sack) => self.resolve_builds(collection, *repo_id, sack, builds),
				None => {
					log::info!("Repo {} is gone, builds against it can't be resolved", repo);
					self.mark_unresolved(builds)
				},
			}).and_then(|r| r);
			match r {
				Err(e) if e.is_transient() => log::info!("Skipping builds of repo {} this cycle: {}", repo, e),
				Err(e) => failure = Some(e),
				Ok(()) => {},
			}
		}

		match failure {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}

	fn resolve_builds(&mut self, collection: &Collection, repo_id: i64, sack: &Sack, builds: &[Build]) -> crate::Result<()> {
		let session = self.session;
		let build_system = session.build_system();

		let group = match build_group(build_system, sack, collection, repo_id) {
			RemoteResult::Found(group) => group,
			RemoteResult::NotFound => {
				log::warn!("Build group {} of collection {} not found", collection.build_group, collection.name);
				return self.mark_unresolved(builds);
			},
			RemoteResult::TransientError(e) => {
				log::info!("Can't get build group of collection {}: {}", collection.name, e);
				return Ok(());
			},
		};
		let buildroot = solver::buildroot(sack, &group);
		if !buildroot.resolved() {
			log::info!("Buildroot of repo {} is not installable, its builds stay unresolved", repo_id);
			return self.mark_unresolved(builds);
		}
		let exclude: HashSet<String> = group.into_iter().collect();

		let packages: HashMap<i64, Package> = Package::by_collection(session.db().connection(), collection.id)?
			.into_iter()
			.map(|p| (p.id, p))
			.collect();
		let mut sources = Vec::new();
		let mut with_source = Vec::new();
		for build in builds {
			match (packages.get(&build.package_id), &build.version, &build.release) {
				(Some(package), Some(version), Some(release)) => {
					sources.push(SourceNvr {
						name: package.name.clone(),
						version: version.clone(),
						release: release.clone(),
					});
					with_source.push(build);
				},
				_ => {
					log::debug!("Build {} has no source NVR", build.id);
					self.mark_unresolved(std::slice::from_ref(build))?;
				},
			}
		}

		let max_distance = session.config().dependency.max_distance;
		let results = build_system.build_requires(&sources);
		for ((build, nvr), result) in with_source.into_iter().zip(&sources).zip(results) {
			let requires = match result {
				RemoteResult::Found(requires) => requires,
				RemoteResult::NotFound => {
					log::info!("Source {} of build {} is gone", nvr, build.id);
					self.mark_unresolved(std::slice::from_ref(build))?;
					continue;
				},
				RemoteResult::TransientError(e) => {
					log::info!("Can't get build requires of {}: {}", nvr, e);
					continue;
				},
			};
			let resolution = resolve_requires(&buildroot, &parse_requires(&requires), max_distance);
			match self.store_build(build, resolution, &exclude) {
				Err(e) if e.is_transient() => log::info!("Not storing dependencies of build {}: {}", build.id, e),
				r => r?,
			}
		}
		Ok(())
	}

	/// Stores the build's dependencies and the changes against the build before it.
	fn store_build(&mut self, build: &Build, resolution: Resolution, exclude: &HashSet<String>) -> crate::Result<()> {
		let conn = self.session.db().connection();

		/* Created outside the transaction so a rollback can't leave ids in the cache that were never committed */
		let keys = if resolution.resolved {
			let deps = self.dep_cache.get_or_create_nevras(conn, resolution.dependencies.iter().map(|(n, _)| n))?;
			let mut ids: Vec<i64> = deps.into_iter().map(|d| d.id).collect();
			ids.sort_unstable();
			ids.dedup();
			Some(DependencyKeys(ids))
		} else {
			None
		};

		let baseline = Build::baseline(conn, build.package_id, Some(build.id))?;
		let changes = match &baseline {
			Some(b) if resolution.resolved => {
				let prev = build_dependencies(conn, &mut self.dep_cache, b)?;
				compute_dependency_changes(&prev, &resolution.dependencies, exclude)
			},
			_ => Vec::new(),
		};

		self.session.db().transaction(|conn| {
			if Package::lock(conn, &[build.package_id])?.is_empty() {
				return Err(crate::Error::StaleRow(format!("package {}", build.package_id)));
			}
			Build::set_deps_resolved(conn, build.id, resolution.resolved, keys.as_ref())?;
			if resolution.resolved {
				db::insert_applied_changes(conn, build.id, baseline.as_ref().map(|b| b.id), &changes)?;
				let dropped = db::drop_outdated_unapplied_changes(conn, build.package_id, build.id)?;
				if dropped > 0 {
					log::debug!("Dropped {} outdated dependency changes of package {}", dropped, build.package_id);
				}
			}
			Ok(())
		})?;
		log::debug!("Build {} dependencies resolved: {}, {} changes", build.id, resolution.resolved, changes.len());
		Ok(())
	}

	/// Marks builds whose dependencies can't be resolved, they never serve as a baseline.
	///
	/// # Errors
	/// Any non transient database error. Builds changed concurrently are skipped.
	fn mark_unresolved(&self, builds: &[Build]) -> crate::Result<()> {
		for build in builds {
			match self.session.db().transaction(|conn| Build::set_deps_resolved(conn, build.id, false, None)) {
				Err(e) if e.is_transient() => log::info!("Can't mark build {} unresolved: {}", build.id, e),
				r => r?,
			}
		}
		Ok(())
	}
}
