//! The on-disk bank, downloaded repository metadata.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::RepoDescriptor;
use crate::build_system::{RemoteResult, RepoFetcher};
use crate::cache_manager::CacheFactory;
use crate::repodata::import::{RepoMd, REPOMD};

/// Temporary download directories start with this, they are never valid descriptors.
const DOWNLOAD_PREFIX: &str = ".download-";

pub struct DiskRepoFactory {
	pub cache_dir: PathBuf,
	pub arches: Vec<String>,
	pub fetcher: Arc<dyn RepoFetcher>,
	pub verify_checksums: bool,
	/// Download directories untouched for this long belong to a process that is gone.
	pub stale_download_age: Duration,
}

impl DiskRepoFactory {
	/// Whether nothing under the download directory `path` was written to for `stale_download_age`.
	fn is_stale_download(&self, path: &Path) -> bool {
		let modified = last_modified(path);
		let age = SystemTime::now().duration_since(modified).unwrap_or_default();
		age >= self.stale_download_age
	}

	fn fetch(&self, repo: &RepoDescriptor, arch: &str, location: &str) -> crate::Result<Option<Vec<u8>>> {
		self.fetcher.fetch(repo, arch, location).into_result()
	}

	/// Downloads every file listed in the arch's `repomd.json` into `dir`.
	///
	/// # Returns
	/// `false` when the mirror doesn't have the repository.
	fn download_arch(&self, repo: &RepoDescriptor, arch: &str, dir: &Path) -> crate::Result<bool> {
		let repomd_location = format!("repodata/{}", REPOMD);
		let Some(repomd_data) = self.fetch(repo, arch, &repomd_location)? else {
			return Ok(false);
		};
		let repomd = RepoMd::from_slice(&repomd_data)?;
		write_file(&dir.join(&repomd_location), &repomd_data)?;

		for entry in repomd.entries() {
			if !Path::new(&entry.location).components().all(|c| matches!(c, Component::Normal(_))) {
				return Err(crate::Error::Validation(format!("{} {} lists file outside the repository: {}", repo, arch, entry.location)));
			}
			let Some(data) = self.fetch(repo, arch, &entry.location)? else {
				return Ok(false);
			};
			if self.verify_checksums && !entry.sha256.is_empty() {
				let digest = sha256::digest(data.as_slice());
				if digest != entry.sha256 {
					return Err(crate::Error::Validation(format!("checksum of {} {} {} doesn't match repomd", repo, arch, entry.location)));
				}
			}
			write_file(&dir.join(&entry.location), &data)?;
		}
		Ok(true)
	}
}

/// Latest modification time of `path` or anything below it.
fn last_modified(path: &Path) -> SystemTime {
	let mut latest = std::fs::symlink_metadata(path).and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
	if let Ok(entries) = std::fs::read_dir(path) {
		for entry in entries.flatten() {
			latest = latest.max(last_modified(&entry.path()));
		}
	}
	latest
}

fn write_file(path: &Path, data: &[u8]) -> crate::Result<()> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	std::fs::write(path, data)?;
	Ok(())
}

impl CacheFactory<RepoDescriptor> for DiskRepoFactory {
	type Value = PathBuf;
	type Lower = ();

	/// Downloads into a temporary directory next to the cache and renames it into place once complete.
	///
	/// A directory only appears under its final name once complete, so one already there
	/// (renamed into place by another process sharing the cache directory) is used as is.
	fn create(&self, repo: &RepoDescriptor, _lower: Option<&()>) -> crate::Result<Option<PathBuf>> {
		let dest = self.cache_dir.join(repo.to_string());
		if dest.is_dir() {
			log::debug!("Repo {} is already on disk", repo);
			return Ok(Some(dest));
		}
		let tmp = tempfile::Builder::new()
			.prefix(DOWNLOAD_PREFIX)
			.tempdir_in(&self.cache_dir)?;

		log::info!("Downloading repo {}", repo);
		for arch in &self.arches {
			if !self.download_arch(repo, arch, &tmp.path().join(arch))? {
				log::info!("Repo {} is not available for {}", repo, arch);
				return Ok(None);
			}
		}

		if let Err(e) = std::fs::rename(tmp.path(), &dest) {
			if dest.is_dir() {
				/* Lost the race, the guard removes our copy */
				log::debug!("Repo {} was downloaded meanwhile by someone else", repo);
				return Ok(Some(dest));
			}
			return Err(e.into());
		}
		/* Renamed away, nothing left for the guard to clean up */
		let _ = tmp.into_path();

		log::info!("Repo {} downloaded", repo);
		Ok(Some(dest))
	}

	fn destroy(&self, repo: &RepoDescriptor, path: &PathBuf) {
		log::debug!("Removing repo {}", repo);
		if let Err(e) = std::fs::remove_dir_all(path) {
			log::warn!("Failed to remove {}: {}", path.display(), e);
		}
	}

	/// Picks up repositories downloaded by a previous run, anything else in the cache directory is removed.
	///
	/// Download directories are only removed once stale, a recent one may still be written by a live process.
	fn populate_cache(&self) -> Vec<(RepoDescriptor, PathBuf)> {
		let entries = match std::fs::read_dir(&self.cache_dir) {
			Ok(e) => e,
			Err(e) => {
				log::warn!("Can't read repo cache {}: {}", self.cache_dir.display(), e);
				return Vec::new();
			},
		};

		let mut found = Vec::new();
		for entry in entries.flatten() {
			let path = entry.path();
			let parsed = entry.file_name().to_str().and_then(|n| n.parse::<RepoDescriptor>().ok());
			match parsed {
				Some(repo) if path.is_dir() => {
					log::debug!("Found cached repo {}", repo);
					found.push((repo, path));
				},
				_ if is_download(&entry.file_name()) && !self.is_stale_download(&path) => {
					log::debug!("Leaving recent download {} alone", path.display());
				},
				_ => {
					log::info!("Removing unrecognized cache entry {}", path.display());
					let removed = if path.is_dir() { std::fs::remove_dir_all(&path) } else { std::fs::remove_file(&path) };
					if let Err(e) = removed {
						log::warn!("Failed to remove {}: {}", path.display(), e);
					}
				},
			}
		}
		found.sort();
		found
	}
}

fn is_download(name: &std::ffi::OsStr) -> bool {
	name.to_str().is_some_and(|n| n.starts_with(DOWNLOAD_PREFIX))
}

#[cfg(test)]
mod tests {
	use super::*;

	struct NoFetcher;

	impl RepoFetcher for NoFetcher {
		fn fetch(&self, _repo: &RepoDescriptor, _arch: &str, _location: &str) -> RemoteResult<Vec<u8>> {
			RemoteResult::NotFound
		}
	}

	fn factory(dir: &Path) -> DiskRepoFactory {
		DiskRepoFactory {
			cache_dir: dir.to_path_buf(),
			arches: vec!["x86_64".to_string()],
			fetcher: Arc::new(NoFetcher),
			verify_checksums: true,
			stale_download_age: Duration::from_secs(3600),
		}
	}

	fn entries(dir: &Path) -> Vec<String> {
		let mut names: Vec<String> = std::fs::read_dir(dir).unwrap()
			.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
			.collect();
		names.sort();
		names
	}

	#[test]
	fn populate_keeps_repos_and_removes_junk() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::create_dir_all(dir.path().join("primary-f39-build-12/x86_64")).unwrap();
		std::fs::create_dir_all(dir.path().join(".download-ab12cd/x86_64")).unwrap();
		std::fs::create_dir_all(dir.path().join("garbage")).unwrap();
		std::fs::write(dir.path().join("primary-f39-build-13"), b"not a directory").unwrap();

		let mut f = factory(dir.path());
		f.stale_download_age = Duration::ZERO;
		let found = f.populate_cache();
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].0, RepoDescriptor::new("primary", "f39-build", 12));
		assert_eq!(entries(dir.path()), vec!["primary-f39-build-12"]);
	}

	#[test]
	fn recent_download_is_left_to_its_owner() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::create_dir_all(dir.path().join(".download-ab12cd/x86_64/repodata")).unwrap();
		std::fs::create_dir_all(dir.path().join("garbage")).unwrap();

		assert!(factory(dir.path()).populate_cache().is_empty());
		assert_eq!(entries(dir.path()), vec![".download-ab12cd"]);
	}

	#[test]
	fn existing_repo_dir_is_reused() {
		let dir = tempfile::tempdir().unwrap();
		let repo = RepoDescriptor::new("primary", "f39-build", 12);
		let marker = dir.path().join("primary-f39-build-12/x86_64/repodata/repomd.json");
		write_file(&marker, b"{}").unwrap();

		/* The fetcher has nothing, so this can only succeed without downloading */
		let r = factory(dir.path()).create(&repo, None).unwrap();
		assert_eq!(r, Some(dir.path().join("primary-f39-build-12")));
		assert!(marker.exists());
		assert_eq!(entries(dir.path()), vec!["primary-f39-build-12"]);
	}

	#[test]
	fn missing_repo_is_unavailable() {
		let dir = tempfile::tempdir().unwrap();
		let r = factory(dir.path()).create(&RepoDescriptor::new("primary", "f39-build", 12), None).unwrap();
		assert!(r.is_none());
		/* The temporary directory is cleaned up */
		assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
	}
}
