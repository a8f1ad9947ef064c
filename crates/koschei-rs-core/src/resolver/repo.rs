use std::collections::{HashMap, HashSet};

use super::*;
use crate::events::PackageStates;
use crate::repodata::Sack;
use crate::solver;
use crate::Session;

/// Resolves the packages of each collection against its newest repository generation.
pub struct RepoResolver<'s> {
	session: &'s Session,
	dep_cache: DependencyCache,
}

impl<'s> RepoResolver<'s> {
	pub fn new(session: &'s Session) -> Self {
		Self {
			session,
			dep_cache: DependencyCache::new(session.config().dependency.dependency_cache_capacity),
		}
	}

	/// One pass over every collection.
	///
	/// # Errors
	/// Only faults that aren't transient, a collection failing transiently is retried on the next pass.
	pub fn run(&mut self) -> crate::Result<()> {
		for collection in Collection::all(self.session.db().connection())? {
			match self.process_collection(&collection) {
				Err(e) if e.is_transient() => log::info!("Skipping collection {} this cycle: {}", collection.name, e),
				r => r?,
			}
		}
		Ok(())
	}

	/// Resolves `collection` if the build system has a repository generation it hasn't seen.
	pub fn process_collection(&mut self, collection: &Collection) -> crate::Result<()> {
		let session = self.session;
		let info = match session.build_system().latest_repo(&collection.build_tag) {
			RemoteResult::Found(info) => info,
			RemoteResult::NotFound => {
				log::info!("No repo for tag {} of collection {} yet", collection.build_tag, collection.name);
				return Ok(());
			},
			RemoteResult::TransientError(e) => {
				log::info!("Can't get latest repo of collection {}: {}", collection.name, e);
				return Ok(());
			},
		};
		if collection.latest_repo_id.map_or(false, |id| id >= info.id) {
			log::debug!("Collection {} is up to date with repo {}", collection.name, info.id);
			return Ok(());
		}

		let db = session.db();
		let Some(_lock) = db.try_advisory_lock(REPO_LOCK_NAMESPACE, info.id)? else {
			log::info!("Repo {} is being resolved by another process", info.id);
			return Ok(());
		};
		/* Another process may have finished it before we got the lock */
		let collection = Collection::get(db.connection(), collection.id)?
			.ok_or_else(|| crate::Error::StaleRow(format!("collection {}", collection.name)))?;
		if collection.latest_repo_id.map_or(false, |id| id >= info.id) {
			return Ok(());
		}

		let repo = collection.repo_descriptor(info.id);
		log::info!("Resolving repo {} for collection {}", repo, collection.name);
		let cache = session.repo_cache();
		cache.prefetch_repo(repo.clone());
		cache.get_sack(&repo, |sack| match sack {
			Some(sack) => self.resolve_repo(&collection, info.id, sack),
			None => {
				log::info!("Repo {} is not available, will retry", repo);
				Ok(())
			},
		})?
	}

	fn resolve_repo(&mut self, collection: &Collection, repo_id: i64, sack: &Sack) -> crate::Result<()> {
		let group = match build_group(self.session.build_system(), sack, collection, repo_id) {
			RemoteResult::Found(group) => group,
			RemoteResult::NotFound => {
				let problem = format!("Build group {} not found", collection.build_group);
				return self.finish_repo(collection, repo_id, vec![problem]);
			},
			RemoteResult::TransientError(e) => {
				log::info!("Can't get build group of collection {}: {}", collection.name, e);
				return Ok(());
			},
		};

		let buildroot = solver::buildroot(sack, &group);
		if !buildroot.resolved() {
			log::info!("Buildroot of collection {} is not installable in repo {}", collection.name, repo_id);
			return self.finish_repo(collection, repo_id, buildroot.problems().to_vec());
		}

		let exclude: HashSet<String> = group.into_iter().collect();
		let packages: Vec<Package> = Package::by_collection(self.session.db().connection(), collection.id)?
			.into_iter()
			.filter(|p| p.tracked && !p.blocked)
			.collect();
		let chunk_size = self.session.config().dependency.repo_chunk_size.max(1);

		let mut resolved = 0;
		for chunk in packages.chunks(chunk_size) {
			let mut outputs = Vec::with_capacity(chunk.len());
			for package in chunk {
				match self.resolve_package(sack, &buildroot, &exclude, package) {
					Ok(Some(output)) => outputs.push(output),
					Ok(None) => {},
					Err(e) if e.is_transient() => log::info!("Skipping package {} this cycle: {}", package.name, e),
					Err(e) => return Err(e),
				}
			}
			resolved += outputs.iter().filter(|o| o.resolved).count();
			self.persist_outputs(&outputs)?;
		}

		log::info!("Repo {} of collection {} resolved, {} of {} packages installable", repo_id, collection.name, resolved, packages.len());
		self.finish_repo(collection, repo_id, Vec::new())
	}

	fn resolve_package(&mut self, sack: &Sack, buildroot: &BuildrootSolution<'_>, exclude: &HashSet<String>, package: &Package) -> crate::Result<Option<ResolutionOutput>> {
		let Some(source) = sack.source(&package.name) else {
			log::debug!("Package {} has no source package in the repo", package.name);
			return Ok(None);
		};
		let resolution = resolve_requires(buildroot, &source.requires, self.session.config().dependency.max_distance);

		let conn = self.session.db().connection();
		let baseline = Build::baseline(conn, package.id, None)?;
		let changes = match &baseline {
			Some(b) if resolution.resolved => {
				let prev = build_dependencies(conn, &mut self.dep_cache, b)?;
				compute_dependency_changes(&prev, &resolution.dependencies, exclude)
			},
			_ => Vec::new(),
		};

		Ok(Some(ResolutionOutput {
			package_id: package.id,
			resolved: resolution.resolved,
			problems: resolution.problems,
			changes,
			baseline_build_id: baseline.map(|b| b.id),
			last_build_id: package.last_build_id,
		}))
	}

	/// Stores a chunk of outputs in one transaction, packages in ascending id order.
	fn persist_outputs(&self, outputs: &[ResolutionOutput]) -> crate::Result<()> {
		if outputs.is_empty() {
			return Ok(());
		}
		let by_id: HashMap<i64, &ResolutionOutput> = outputs.iter().map(|o| (o.package_id, o)).collect();
		let ids: Vec<i64> = by_id.keys().copied().collect();
		let mut states = PackageStates::new();

		let db = self.session.db();
		db.transaction(|conn| {
			for id in Package::lock(conn, &ids)? {
				if let Some(package) = Package::get(conn, id)? {
					states.record(&package);
				}
				match db::savepoint(conn, |conn| persist_output(conn, by_id[&id])) {
					Err(e) if e.is_transient() => log::info!("Not storing resolution of package {}: {}", id, e),
					r => r?,
				}
			}
			Ok(())
		})?;
		states.emit(db.connection(), self.session.events())
	}

	/// Marks the repository generation as processed, `problems` are the buildroot's.
	fn finish_repo(&self, collection: &Collection, repo_id: i64, problems: Vec<String>) -> crate::Result<()> {
		let db = self.session.db();
		db.transaction(|conn| {
			db::replace_buildroot_problems(conn, collection.id, &problems)?;
			Collection::set_latest_repo(conn, collection.id, repo_id, Some(problems.is_empty()))?;
			let cleared = Package::clear_skip_reasons(conn, collection.id)?;
			if cleared > 0 {
				log::debug!("Cleared skip reasons of {} packages", cleared);
			}
			Ok(())
		})?;
		notify_collection(db.connection(), self.session.events(), collection)
	}
}

/// Emits a collection state change if the committed state differs from `before`.
pub(crate) fn notify_collection(conn: &rusqlite::Connection, events: &dyn crate::events::EventHandler, before: &Collection) -> crate::Result<()> {
	if let Some(after) = Collection::get(conn, before.id)? {
		if after.state() != before.state() {
			events.collection_state_change(&after, before.state(), after.state());
		}
	}
	Ok(())
}
