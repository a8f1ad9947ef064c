//! # Remote build system
//!
//! Explicit interface to the operations the resolvers and the scheduler use on the build system hub,
//! and to the mirror repositories are downloaded from.
//!
//! Every call reports a missing object separately from a transport fault with [`RemoteResult`].

use serde::{Serialize, Deserialize};

use crate::repo_cache::RepoDescriptor;

mod http;
pub use http::HttpBuildSystem;

mod fetch;
pub use fetch::HttpRepoFetcher;

/// Result of a remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteResult<T> {
	Found(T),
	/// The object doesn't exist, or no longer does.
	NotFound,
	/// The call may succeed if retried later.
	TransientError(String),
}

impl<T> RemoteResult<T> {
	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RemoteResult<U> {
		match self {
			RemoteResult::Found(v) => RemoteResult::Found(f(v)),
			RemoteResult::NotFound => RemoteResult::NotFound,
			RemoteResult::TransientError(e) => RemoteResult::TransientError(e),
		}
	}

	pub fn found(self) -> Option<T> {
		match self {
			RemoteResult::Found(v) => Some(v),
			_ => None,
		}
	}

	/// `NotFound` becomes `None`, a transient error becomes [`Remote`](crate::Error::Remote).
	pub fn into_result(self) -> crate::Result<Option<T>> {
		match self {
			RemoteResult::Found(v) => Ok(Some(v)),
			RemoteResult::NotFound => Ok(None),
			RemoteResult::TransientError(e) => Err(crate::Error::Remote(e)),
		}
	}
}

/// A repository generation of a build tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
	pub id: i64,
	pub tag: String,
	pub create_time: chrono::DateTime<chrono::Utc>,
}

/// Name, version and release of a source package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceNvr {
	pub name: String,
	pub version: String,
	pub release: String,
}

impl std::fmt::Display for SourceNvr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}-{}-{}", self.name, self.version, self.release)
	}
}

/// The latest source package of a package in a tag, what a build is submitted from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceArtifact {
	pub nvr: SourceNvr,
	#[serde(default)]
	pub epoch: i32,
	/// Location the build system fetches the source package from.
	pub url: String,
}

/// State of a build task on the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
	/// Queued or building.
	Open,
	/// Finished successfully.
	Closed,
	Failed,
	Canceled,
}

/// What the hub knows about a build task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
	pub state: TaskState,
	/// Repository generation the build ran against, once it started.
	#[serde(default)]
	pub repo_id: Option<i64>,
	#[serde(default)]
	pub finished: Option<chrono::DateTime<chrono::Utc>>,
}

/// Operations on the build system hub.
pub trait BuildSystem: Send + Sync {
	/// Latest ready repository generation of `build_tag`.
	fn latest_repo(&self, build_tag: &str) -> RemoteResult<RepoInfo>;

	/// Package names of `group` in the given generation of `build_tag`.
	fn build_group(&self, build_tag: &str, group: &str, repo_id: i64) -> RemoteResult<Vec<String>>;

	/// Build requirement strings of each source package, in the same order.
	fn build_requires(&self, sources: &[SourceNvr]) -> Vec<RemoteResult<Vec<String>>>;

	/// Architectures packages of `build_tag` are built for.
	fn build_arches(&self, build_tag: &str) -> RemoteResult<Vec<String>>;

	/// Fraction of the build hosts of `arches` that are busy.
	fn build_load(&self, arches: &[String]) -> RemoteResult<f64>;

	fn latest_source(&self, build_tag: &str, package: &str) -> RemoteResult<SourceArtifact>;

	/// Submits a build of `source` into `target`.
	///
	/// # Returns
	/// The build system's task id.
	fn submit_build(&self, target: &str, source: &SourceArtifact, arches: &[String]) -> RemoteResult<i64>;

	/// State of each task, in the same order.
	fn task_info(&self, task_ids: &[i64]) -> Vec<RemoteResult<TaskInfo>>;
}

/// Supplies repository metadata files.
pub trait RepoFetcher: Send + Sync {
	/// Reads `location`, a path relative to the arch directory such as `repodata/repomd.json`.
	fn fetch(&self, repo: &RepoDescriptor, arch: &str, location: &str) -> RemoteResult<Vec<u8>>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test] fn not_found_is_none() { assert!(RemoteResult::<i32>::NotFound.into_result().unwrap().is_none()) }
	#[test] fn transient_is_an_error() { assert!(matches!(RemoteResult::<i32>::TransientError("timeout".into()).into_result(), Err(crate::Error::Remote(_)))) }
	#[test] fn map_keeps_found() { assert_eq!(RemoteResult::Found(2).map(|v| v * 2), RemoteResult::Found(4)) }
	#[test] fn nvr_display() { assert_eq!(SourceNvr { name: "rnv".into(), version: "1.7.11".into(), release: "9.fc24".into() }.to_string(), "rnv-1.7.11-9.fc24") }
}
