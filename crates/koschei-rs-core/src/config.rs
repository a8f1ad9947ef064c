//! Process configuration.
//!
//! Loaded from a JSON file, every section is optional and falls back to its defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::repo_cache::RepoDescriptor;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub directories: DirectoriesConfig,
	pub database: DatabaseConfig,
	pub build_system: BuildSystemConfig,
	pub repo_cache: RepoCacheConfig,
	pub dependency: DependencyConfig,
	pub priorities: PriorityConfig,
	pub services: ServicesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoriesConfig {
	/// Downloaded repositories live here, one directory per repo generation.
	pub cache_dir: PathBuf,
	pub data_dir: PathBuf,
}

impl Default for DirectoriesConfig {
	fn default() -> Self {
		Self {
			cache_dir: {
				let path = if let Ok(e) = std::env::var("XDG_CACHE_HOME") {
					PathBuf::from(e)
				} else {
					home_dir().join(".cache")
				};
				path.join("koschei-rs").join("repodata")
			},
			data_dir: {
				let path = if let Ok(e) = std::env::var("XDG_DATA_HOME") {
					PathBuf::from(e)
				} else {
					home_dir().join(".local/share")
				};
				path.join("koschei-rs")
			},
		}
	}
}

fn home_dir() -> PathBuf {
	/* Fall back to the working directory rather than panicking in service environments without HOME */
	std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
	/// `None` places the database in the data directory.
	pub path: Option<PathBuf>,
	pub busy_timeout_ms: u64,
	/// Advisory locks older than this are treated as abandoned by a crashed holder.
	pub lock_lease_secs: i64,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		Self {
			path: None,
			busy_timeout_ms: 30_000,
			lock_lease_secs: 6 * 3600,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSystemConfig {
	pub hub_url: String,
	pub https_only: bool,
	/// Repository source id to the top URL repositories are downloaded from.
	pub sources: HashMap<String, String>,
	/// Group used for the buildroot when a collection doesn't name its own.
	pub build_group: String,
	/// Maximum number of builds running at once, the scheduler idles above this.
	pub max_builds: i64,
	/// Fraction of busy build host capacity above which nothing is scheduled.
	pub load_threshold: Option<f64>,
	pub build_opts: BuildOptions,
}

impl Default for BuildSystemConfig {
	fn default() -> Self {
		Self {
			hub_url: "https://koji.fedoraproject.org/kojihub".to_string(),
			https_only: true,
			sources: HashMap::from([("primary".to_string(), "https://kojipkgs.fedoraproject.org".to_string())]),
			build_group: "build".to_string(),
			max_builds: 30,
			load_threshold: Some(0.75),
			build_opts: Default::default(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
	pub scratch: bool,
	pub priority: i64,
}

impl Default for BuildOptions {
	fn default() -> Self {
		Self { scratch: true, priority: 5 }
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoCacheConfig {
	/// Architectures dependencies are resolved for, a repo is downloaded once per arch.
	pub arches: Vec<String>,
	/// Number of loaded sacks kept in memory.
	pub cache_l1_capacity: usize,
	/// Number of repositories kept on disk.
	pub cache_l2_capacity: usize,
	pub cache_l1_threads: usize,
	pub cache_l2_threads: usize,
	/// Size of the worker pool shared by both banks.
	pub cache_threads: usize,
	pub validate_repodata: bool,
	pub verify_checksums: bool,
	/// Leftover download directories older than this are removed on startup.
	pub stale_download_secs: u64,
}

impl Default for RepoCacheConfig {
	fn default() -> Self {
		Self {
			arches: vec!["x86_64".to_string()],
			cache_l1_capacity: 4,
			cache_l2_capacity: 8,
			cache_l1_threads: 1,
			cache_l2_threads: 2,
			cache_threads: 2,
			validate_repodata: false,
			verify_checksums: true,
			stale_download_secs: 3600,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
	pub dependency_cache_capacity: usize,
	/// Dependencies further than this from the requirement roots get no distance.
	pub max_distance: u32,
	/// Number of packages resolved per commit by the repo resolver.
	pub repo_chunk_size: usize,
	/// Number of builds resolved per cycle by the build resolver.
	pub build_resolver_chunk_size: usize,
}

impl Default for DependencyConfig {
	fn default() -> Self {
		Self {
			dependency_cache_capacity: 100_000,
			max_distance: 4,
			repo_chunk_size: 100,
			build_resolver_chunk_size: 10,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
	/// Packages below this priority are never scheduled.
	pub build_threshold: f64,
	/// Weight of a single dependency change at distance 1.
	pub package_update: f64,
	pub failed_build_priority: f64,
	/// Hours after the last build at which the time priority starts growing.
	pub t0: f64,
	/// Scale of the time priority.
	pub t1: f64,
}

impl Default for PriorityConfig {
	fn default() -> Self {
		Self {
			build_threshold: 256.0,
			package_update: 20.0,
			failed_build_priority: 200.0,
			t0: 6.0,
			t1: 7.0,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
	pub repo_resolver_interval_secs: u64,
	pub build_resolver_interval_secs: u64,
	pub scheduler_interval_secs: u64,
	pub poller_interval_secs: u64,
}

impl Default for ServicesConfig {
	fn default() -> Self {
		Self {
			repo_resolver_interval_secs: 30,
			build_resolver_interval_secs: 30,
			scheduler_interval_secs: 10,
			poller_interval_secs: 20,
		}
	}
}

impl Config {
	/// Location of the config file, `$KOSCHEI_CONFIG` overrides the XDG location.
	pub fn default_path() -> PathBuf {
		if let Ok(p) = std::env::var("KOSCHEI_CONFIG") {
			return PathBuf::from(p);
		}
		let base = if let Ok(e) = std::env::var("XDG_CONFIG_HOME") {
			PathBuf::from(e)
		} else {
			home_dir().join(".config")
		};
		base.join("koschei-rs").join("config.json")
	}

	pub fn load_from_disk() -> crate::Result<Self> {
		Self::load_from_file(Self::default_path())
	}

	pub fn load_from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
		let path = path.as_ref();
		log::debug!("Reading config from {}", path.display());
		let data = std::fs::read(path)?;
		let config: Config = serde_json::from_slice(&data)?;
		config.validate()?;
		Ok(config)
	}

	/// Checks values serde can't.
	pub fn validate(&self) -> crate::Result<()> {
		use crate::Error::Config as ConfigError;

		let rc = &self.repo_cache;
		if rc.arches.is_empty() {
			return Err(ConfigError("repo_cache.arches must not be empty".to_string()));
		}
		if rc.cache_l1_capacity == 0 || rc.cache_l2_capacity == 0 {
			return Err(ConfigError("repo cache capacities must be at least 1".to_string()));
		}
		if rc.cache_threads == 0 || rc.cache_l1_threads == 0 || rc.cache_l2_threads == 0 {
			return Err(ConfigError("repo cache thread counts must be at least 1".to_string()));
		}
		if self.dependency.dependency_cache_capacity == 0 {
			return Err(ConfigError("dependency.dependency_cache_capacity must be at least 1".to_string()));
		}
		if self.priorities.t0 <= 0.0 {
			return Err(ConfigError("priorities.t0 must be positive".to_string()));
		}
		if let Some(threshold) = self.build_system.load_threshold {
			if !(0.0..=1.0).contains(&threshold) {
				return Err(ConfigError("build_system.load_threshold must be between 0 and 1".to_string()));
			}
		}
		if let Some(source) = self.build_system.sources.keys().find(|s| !RepoDescriptor::is_valid_source(s)) {
			return Err(ConfigError(format!("repository source \"{}\" must be non-empty and can't contain '-'", source)));
		}
		Ok(())
	}

	pub fn database_path(&self) -> PathBuf {
		self.database.path.clone().unwrap_or_else(|| self.directories.data_dir.join("koschei.sqlite3"))
	}

	/// Top URL repositories of `source` are downloaded from.
	pub fn source_url(&self, source: &str) -> Option<&str> {
		self.build_system.sources.get(source).map(|s| s.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn partial_config_uses_defaults() {
		let config: Config = serde_json::from_str(r#"{ "priorities": { "build_threshold": 30.0 } }"#).unwrap();
		assert_eq!(config.priorities.build_threshold, 30.0);
		assert_eq!(config.priorities.package_update, 20.0);
		assert_eq!(config.dependency.max_distance, 4);
		config.validate().unwrap();
	}

	#[test]
	fn empty_arches_are_rejected() {
		let config: Config = serde_json::from_str(r#"{ "repo_cache": { "arches": [] } }"#).unwrap();
		assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
	}

	#[test]
	fn dashed_source_names_are_rejected() {
		let config: Config = serde_json::from_str(r#"{ "build_system": { "sources": { "fedora-mirror": "https://mirror.example.org" } } }"#).unwrap();
		assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
		let config: Config = serde_json::from_str(r#"{ "build_system": { "sources": { "mirror": "https://mirror.example.org" } } }"#).unwrap();
		config.validate().unwrap();
	}

	#[test]
	fn database_defaults_to_data_dir() {
		let mut config = Config::default();
		config.directories.data_dir = PathBuf::from("/srv/koschei");
		assert_eq!(config.database_path(), PathBuf::from("/srv/koschei/koschei.sqlite3"));
	}
}
