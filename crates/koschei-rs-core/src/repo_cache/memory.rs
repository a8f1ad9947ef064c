//! The in-memory bank, sacks loaded from the disk bank's directories.

use std::path::PathBuf;

use super::RepoDescriptor;
use crate::cache_manager::CacheFactory;
use crate::repodata::{Sack, import};

pub struct SackFactory {
	pub arches: Vec<String>,
	pub do_validation: bool,
}

impl CacheFactory<RepoDescriptor> for SackFactory {
	type Value = Sack;
	type Lower = PathBuf;

	/// A repository that fails to load is treated the same as a missing one.
	fn create(&self, repo: &RepoDescriptor, lower: Option<&PathBuf>) -> crate::Result<Option<Sack>> {
		let Some(dir) = lower else {
			return Ok(None);
		};
		match import::load_repo(dir, &self.arches, self.do_validation) {
			Ok(sack) => {
				log::info!("Loaded repo {}, {} packages", repo, sack.len());
				Ok(Some(sack))
			},
			Err(e) => {
				log::warn!("Failed to load repo {}: {}", repo, e);
				Ok(None)
			},
		}
	}
}
