//! # Build poller
//!
//! Follows the tasks of running builds on the build system and records their outcome.
//! A finished build stops counting against the running build cap, becomes the package's latest complete build
//! and is picked up by the build resolver.

use crate::build_system::{RemoteResult, TaskInfo, TaskState};
use crate::db::{Build, BuildState, Package};
use crate::events::PackageStates;
use crate::Session;

pub struct BuildPoller<'s> {
	session: &'s Session,
}

impl<'s> BuildPoller<'s> {
	pub fn new(session: &'s Session) -> Self {
		Self { session }
	}

	/// One pass over every running build.
	///
	/// # Returns
	/// The number of builds that finished.
	pub fn run(&self) -> crate::Result<usize> {
		let running: Vec<Build> = Build::running(self.session.db().connection())?
			.into_iter()
			.filter(|b| {
				if b.task_id.is_none() {
					log::warn!("Running build {} has no task, it can't be followed", b.id);
				}
				b.task_id.is_some()
			})
			.collect();
		if running.is_empty() {
			return Ok(0);
		}

		let task_ids: Vec<i64> = running.iter().filter_map(|b| b.task_id).collect();
		let infos = self.session.build_system().task_info(&task_ids);

		let mut finished = 0;
		for (build, info) in running.iter().zip(infos) {
			let (state, info) = match info {
				RemoteResult::Found(info) => match info.state {
					TaskState::Open => continue,
					TaskState::Closed => (BuildState::Complete, Some(info)),
					TaskState::Failed => (BuildState::Failed, Some(info)),
					TaskState::Canceled => (BuildState::Canceled, Some(info)),
				},
				RemoteResult::NotFound => {
					log::info!("Task of build {} disappeared, considering it canceled", build.id);
					(BuildState::Canceled, None)
				},
				RemoteResult::TransientError(e) => {
					log::info!("Can't get state of build {}: {}", build.id, e);
					continue;
				},
			};
			match self.finish(build, state, info.as_ref()) {
				Ok(()) => finished += 1,
				Err(e) if e.is_transient() => log::info!("Not recording the end of build {}: {}", build.id, e),
				Err(e) => return Err(e),
			}
		}
		Ok(finished)
	}

	fn finish(&self, build: &Build, state: BuildState, info: Option<&TaskInfo>) -> crate::Result<()> {
		let db = self.session.db();
		let mut states = PackageStates::new();
		if let Some(package) = Package::get(db.connection(), build.package_id)? {
			states.record(&package);
		}

		let repo_id = info.and_then(|i| i.repo_id);
		let finished = info.and_then(|i| i.finished).unwrap_or_else(chrono::Utc::now);
		db.transaction(|conn| {
			if Package::lock(conn, &[build.package_id])?.is_empty() {
				return Err(crate::Error::StaleRow(format!("package {}", build.package_id)));
			}
			Build::finish(conn, build.id, state, repo_id, finished)
		})?;
		log::info!("Build {} (task {:?}) finished as {:?}", build.id, build.task_id, state);

		states.emit(db.connection(), self.session.events())
	}
}
