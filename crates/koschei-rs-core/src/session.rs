//! Process-wide context the services borrow.

use std::sync::Arc;

use crate::build_system::{BuildSystem, HttpBuildSystem, HttpRepoFetcher, RepoFetcher};
use crate::db::Database;
use crate::events::{EventHandler, LogEventHandler};
use crate::repo_cache::RepoCache;
use crate::Config;

/// Owns everything a service process shares between passes: the configuration, the database connection,
/// the repository cache and the collaborators talking to the outside world.
pub struct Session {
	config: Config,
	db: Database,
	repo_cache: RepoCache,
	build_system: Arc<dyn BuildSystem>,
	events: Arc<dyn EventHandler>,
}

impl Session {
	/// Session talking to the configured hub and mirrors, logging state changes.
	///
	/// # Errors
	/// When the database can't be opened, the cache directory can't be created or the HTTP clients can't be built.
	pub fn new(config: Config) -> crate::Result<Self> {
		let db = Database::open(config.database_path(), &config.database)?;
		let build_system = Arc::new(HttpBuildSystem::new(&config.build_system)?);
		let fetcher = Arc::new(HttpRepoFetcher::new(&config.build_system)?);
		Self::with_components(config, db, build_system, fetcher, Arc::new(LogEventHandler))
	}

	/// Session with explicit collaborators.
	pub fn with_components(
		config: Config,
		db: Database,
		build_system: Arc<dyn BuildSystem>,
		fetcher: Arc<dyn RepoFetcher>,
		events: Arc<dyn EventHandler>,
	) -> crate::Result<Self> {
		let repo_cache = RepoCache::new(&config, fetcher)?;
		Ok(Self {
			config,
			db,
			repo_cache,
			build_system,
			events,
		})
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn db(&self) -> &Database {
		&self.db
	}

	pub fn repo_cache(&self) -> &RepoCache {
		&self.repo_cache
	}

	pub fn build_system(&self) -> &dyn BuildSystem {
		self.build_system.as_ref()
	}

	pub fn events(&self) -> &dyn EventHandler {
		self.events.as_ref()
	}

	/// Stops the repository cache workers.
	pub fn close(self) {
		log::debug!("Closing session");
		self.repo_cache.cleanup();
	}
}
