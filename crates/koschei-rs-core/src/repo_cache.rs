//! # Repository cache
//!
//! Two [`CacheManager`] banks specialised for repositories:
//! - bank 0 holds loaded [`Sack`]s.
//! - bank 1 holds repository metadata downloaded into `{cache_dir}/{source}-{tag}-{id}/`.
//!
//! Repositories are consumed in the order they were prefetched:
//! ```ignore
//! cache.prefetch_repo(a.clone());
//! cache.prefetch_repo(b.clone());
//! cache.get_sack(&a, |sack| resolve(sack))?;
//! cache.get_sack(&b, |sack| resolve(sack))?;
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::build_system::RepoFetcher;
use crate::cache_manager::{BankStats, CacheManager};
use crate::repodata::Sack;

mod descriptor;
pub use descriptor::RepoDescriptor;

mod disk;
pub use disk::DiskRepoFactory;

mod memory;
pub use memory::SackFactory;

pub struct RepoCache {
	manager: CacheManager<RepoDescriptor>,
	/// Prefetched descriptors not yet handed out by [`RepoCache::get_sack`].
	order: Mutex<VecDeque<RepoDescriptor>>,
}

/// Releases the acquired repository when the scope ends, unwinding included.
struct AcquiredRepo<'a> {
	manager: &'a CacheManager<RepoDescriptor>,
	repo: &'a RepoDescriptor,
}

impl Drop for AcquiredRepo<'_> {
	fn drop(&mut self) {
		self.manager.release(self.repo);
	}
}

impl RepoCache {
	/// Creates the cache directory and starts the cache workers.
	///
	/// Repositories left in the cache directory by a previous run are reused.
	pub fn new(config: &crate::Config, fetcher: Arc<dyn RepoFetcher>) -> crate::Result<Self> {
		let rc = &config.repo_cache;
		let cache_dir = config.directories.cache_dir.clone();
		std::fs::create_dir_all(&cache_dir)?;

		let manager = CacheManager::new(rc.cache_threads)?;
		manager.add_bank(
			SackFactory {
				arches: rc.arches.clone(),
				do_validation: rc.validate_repodata,
			},
			rc.cache_l1_capacity,
			rc.cache_l1_threads,
		);
		manager.add_bank(
			DiskRepoFactory {
				cache_dir,
				arches: rc.arches.clone(),
				fetcher,
				verify_checksums: rc.verify_checksums,
				stale_download_age: std::time::Duration::from_secs(rc.stale_download_secs),
			},
			rc.cache_l2_capacity,
			rc.cache_l2_threads,
		);

		Ok(Self {
			manager,
			order: Mutex::new(VecDeque::new()),
		})
	}

	/// Starts preparing `repo` in the background.
	pub fn prefetch_repo(&self, repo: RepoDescriptor) {
		log::debug!("Prefetching repo {}", repo);
		self.order.lock().push_back(repo.clone());
		self.manager.prefetch(repo);
	}

	/// Waits for the sack of `repo` and runs `f` with it, `None` when the repository is unavailable.
	///
	/// # Errors
	/// - [`CachePreparation`](crate::Error::CachePreparation) when downloading the repository failed.
	/// - [`CacheExhausted`](crate::Error::CacheExhausted) when the cache is too small for the number of repositories held.
	///
	/// # Panics
	/// When `repo` isn't the oldest prefetched repository not yet consumed.
	pub fn get_sack<T>(&self, repo: &RepoDescriptor, f: impl FnOnce(Option<&Sack>) -> T) -> crate::Result<T> {
		let expected = self.order.lock().pop_front();
		assert_eq!(expected.as_ref(), Some(repo), "get_sack called out of prefetch order");

		let acquired = match self.manager.acquire::<Sack>(repo) {
			Err(e @ crate::Error::CacheExhausted { .. }) => return Err(e),
			r => r,
		};
		let _guard = AcquiredRepo { manager: &self.manager, repo };
		let sack = acquired?;
		Ok(f(sack.as_deref()))
	}

	pub fn stats(&self) -> Vec<BankStats> {
		self.manager.bank_stats()
	}

	/// Stops the cache workers and removes everything cached.
	pub fn cleanup(&self) {
		self.manager.terminate();
	}
}
