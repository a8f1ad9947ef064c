//! # Scheduler
//!
//! Picks the next package to build.
//!
//! A pass computes the priority of every eligible package, walks them from the highest and submits a build of the first one
//! that has a source and architectures to build on. At most one build is submitted per pass.

use std::cmp::Ordering;

use crate::build_system::{RemoteResult, SourceArtifact};
use crate::db::{Build, BuildState, Collection, CollectionState, Package, SkipReason};
use crate::priority::{default_queries, PriorityQuery};
use crate::Session;

/// A package eligible for scheduling and its total priority.
#[derive(Debug, Clone)]
pub struct Candidate {
	pub package: Package,
	pub collection: usize,
	pub priority: f64,
}

/// Outcome of trying to build one candidate.
enum Attempt {
	Submitted(i64),
	/// The package can't be built now, the next candidate is tried.
	Skipped,
	/// The build system is unavailable, the pass ends.
	Stop,
}

pub struct Scheduler<'s> {
	session: &'s Session,
	queries: Vec<Box<dyn PriorityQuery>>,
}

impl<'s> Scheduler<'s> {
	/// Scheduler with the built-in priority queries.
	pub fn new(session: &'s Session) -> Self {
		Self::with_queries(session, default_queries(&session.config().priorities))
	}

	pub fn with_queries(session: &'s Session, queries: Vec<Box<dyn PriorityQuery>>) -> Self {
		Self { session, queries }
	}

	/// One scheduling pass.
	///
	/// # Returns
	/// The id of the build submitted, if any.
	pub fn run(&self) -> crate::Result<Option<i64>> {
		if !self.may_schedule()? {
			return Ok(None);
		}

		let collections = Collection::all(self.session.db().connection())?;
		let candidates = self.candidates(&collections)?;
		let threshold = self.session.config().priorities.build_threshold;

		for candidate in &candidates {
			if candidate.priority <= threshold {
				log::debug!("No package above the priority threshold {}", threshold);
				break;
			}
			let collection = &collections[candidate.collection];
			match self.try_build(collection, candidate) {
				Ok(Attempt::Submitted(id)) => return Ok(Some(id)),
				Ok(Attempt::Skipped) => {},
				Ok(Attempt::Stop) => return Ok(None),
				Err(e) if e.is_transient() => {
					log::info!("Scheduling of {} interrupted: {}", candidate.package.name, e);
					return Ok(None);
				},
				Err(e) => return Err(e),
			}
		}
		Ok(None)
	}

	/// Checks the global running build cap and the build host load.
	fn may_schedule(&self) -> crate::Result<bool> {
		let config = self.session.config();
		let running = Build::running_count(self.session.db().connection())?;
		if running >= config.build_system.max_builds {
			log::debug!("{} builds running, not scheduling more", running);
			return Ok(false);
		}

		let Some(threshold) = config.build_system.load_threshold else {
			return Ok(true);
		};
		match self.session.build_system().build_load(&config.repo_cache.arches) {
			RemoteResult::Found(load) if load > threshold => {
				log::debug!("Build system load {:.2} is above {:.2}", load, threshold);
				Ok(false)
			},
			RemoteResult::Found(_) | RemoteResult::NotFound => Ok(true),
			RemoteResult::TransientError(e) => {
				log::info!("Can't get build system load: {}", e);
				Ok(false)
			},
		}
	}

	/// Eligible packages of every collection, highest priority first.
	///
	/// Ties are broken by package id so passes are reproducible.
	pub fn candidates(&self, collections: &[Collection]) -> crate::Result<Vec<Candidate>> {
		let conn = self.session.db().connection();
		let running = Build::running_package_ids(conn)?;

		let mut candidates = Vec::new();
		for (index, collection) in collections.iter().enumerate() {
			if collection.state() == CollectionState::Unresolved {
				log::debug!("Collection {} has an unresolvable buildroot, not scheduling from it", collection.name);
				continue;
			}
			let packages: Vec<Package> = Package::by_collection(conn, collection.id)?
				.into_iter()
				.filter(|p| p.tracked && !p.blocked && p.skip_reason.is_none() && p.resolved != Some(false))
				.filter(|p| !running.contains(&p.id))
				.collect();
			if packages.is_empty() {
				continue;
			}

			let mut plugin_priorities = Vec::with_capacity(self.queries.len());
			for query in &self.queries {
				plugin_priorities.push(query.priorities(conn, collection, &packages)?);
			}
			for package in packages {
				let plugins: f64 = plugin_priorities.iter().filter_map(|p| p.get(&package.id)).sum();
				let priority = (package.static_priority as f64 + package.manual_priority as f64 + plugins) * collection.priority_coefficient;
				candidates.push(Candidate { package, collection: index, priority });
			}
		}

		candidates.sort_by(|a, b| match b.priority.total_cmp(&a.priority) {
			Ordering::Equal => a.package.id.cmp(&b.package.id),
			o => o,
		});
		Ok(candidates)
	}

	fn try_build(&self, collection: &Collection, candidate: &Candidate) -> crate::Result<Attempt> {
		let package = &candidate.package;
		let build_system = self.session.build_system();

		let arches = match self.arches(collection, package) {
			RemoteResult::Found(arches) if !arches.is_empty() => arches,
			RemoteResult::Found(_) | RemoteResult::NotFound => {
				log::info!("Package {} has no architectures to build on, skipping it", package.name);
				self.skip(package, SkipReason::NoArches)?;
				return Ok(Attempt::Skipped);
			},
			RemoteResult::TransientError(e) => {
				log::info!("Can't get build arches of {}: {}", collection.build_tag, e);
				return Ok(Attempt::Stop);
			},
		};

		let source = match build_system.latest_source(&collection.build_tag, &package.name) {
			RemoteResult::Found(source) => source,
			RemoteResult::NotFound => {
				log::info!("Package {} has no source in {}, skipping it", package.name, collection.build_tag);
				self.skip(package, SkipReason::NoSource)?;
				return Ok(Attempt::Skipped);
			},
			RemoteResult::TransientError(e) => {
				log::info!("Can't get latest source of {}: {}", package.name, e);
				return Ok(Attempt::Stop);
			},
		};

		match build_system.submit_build(&collection.target, &source, &arches) {
			RemoteResult::Found(task_id) => {
				let id = self.register_build(collection, package, &source, task_id)?;
				log::info!("Submitted build of {} (priority {:.1}), task {}", source.nvr, candidate.priority, task_id);
				Ok(Attempt::Submitted(id))
			},
			RemoteResult::NotFound => {
				log::info!("Source {} disappeared before submission, skipping it", source.nvr);
				self.skip(package, SkipReason::NoSource)?;
				Ok(Attempt::Skipped)
			},
			RemoteResult::TransientError(e) => {
				log::info!("Can't submit build of {}: {}", source.nvr, e);
				Ok(Attempt::Stop)
			},
		}
	}

	/// The arch override of the package, otherwise the arches of the build tag.
	fn arches(&self, collection: &Collection, package: &Package) -> RemoteResult<Vec<String>> {
		let overridden = package.arch_override_list();
		if !overridden.is_empty() {
			return RemoteResult::Found(overridden);
		}
		self.session.build_system().build_arches(&collection.build_tag)
	}

	fn skip(&self, package: &Package, reason: SkipReason) -> crate::Result<()> {
		self.session.db().transaction(|conn| Package::set_skip_reason(conn, package.id, Some(reason)))
	}

	fn register_build(&self, collection: &Collection, package: &Package, source: &SourceArtifact, task_id: i64) -> crate::Result<i64> {
		let mut build = Build::new(package.id, BuildState::Running);
		build.task_id = Some(task_id);
		build.epoch = Some(source.epoch);
		build.version = Some(source.nvr.version.clone());
		build.release = Some(source.nvr.release.clone());
		build.repo_id = collection.latest_repo_id;

		self.session.db().transaction(|conn| {
			if Package::lock(conn, &[package.id])?.is_empty() {
				return Err(crate::Error::StaleRow(format!("package {}", package.name)));
			}
			build.insert(conn)
		})?;
		Ok(build.id)
	}
}
