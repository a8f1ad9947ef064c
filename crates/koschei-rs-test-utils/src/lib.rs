//! Various helpers for testing
//!
//! An in-memory build system and repository mirror, plus sessions backed by temporary directories.
//! Functions in this module should use results and not panic to avoid confusion in callers.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use koschei_rs_core::build_system::{BuildSystem, RemoteResult, RepoFetcher, RepoInfo, SourceArtifact, SourceNvr, TaskInfo, TaskState};
use koschei_rs_core::db::{Collection, CollectionState, Database, Package, PackageState};
use koschei_rs_core::events::EventHandler;
use koschei_rs_core::repo_cache::RepoDescriptor;
use koschei_rs_core::repodata::import::{FilelistEntry, GroupFile, PrimaryEntry, RepoMd, RepoMdEntry, REPOMD};
use koschei_rs_core::{Config, Session};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("koschei-rs error: {0}")]
	Core(#[from] koschei_rs_core::Error),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	SerdeJSON(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A binary package for a fixture repository.
///
/// # Parameters
/// - `evr` - `[epoch:]version-release`
pub fn package(name: &str, evr: &str, arch: &str) -> PrimaryEntry {
	let (epoch, rest) = match evr.split_once(':') {
		Some((e, rest)) => (e.parse().unwrap_or(0), rest),
		None => (0, evr),
	};
	let (version, release) = rest.rsplit_once('-').unwrap_or((rest, ""));
	PrimaryEntry {
		name: name.to_string(),
		epoch,
		version: version.to_string(),
		release: release.to_string(),
		arch: arch.to_string(),
		provides: vec![name.to_string()],
		requires: Vec::new(),
		conflicts: Vec::new(),
	}
}

/// A source package whose build requirements are `requires`.
pub fn source_package(name: &str, evr: &str, requires: &[&str]) -> PrimaryEntry {
	let mut p = package(name, evr, "src");
	p.provides.clear();
	p.requires = requires.iter().map(|r| r.to_string()).collect();
	p
}

/// Contents of one repository generation.
#[derive(Debug, Clone, Default)]
pub struct FixtureRepo {
	pub packages: Vec<PrimaryEntry>,
	pub groups: HashMap<String, Vec<String>>,
}

impl FixtureRepo {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, package: PrimaryEntry) -> Self {
		self.packages.push(package);
		self
	}

	pub fn with_group(mut self, id: &str, members: &[&str]) -> Self {
		self.groups.insert(id.to_string(), members.iter().map(|m| m.to_string()).collect());
		self
	}

	/// The metadata files of the repository keyed by location, `repodata/repomd.json` included.
	pub fn files(&self) -> Result<HashMap<String, Vec<u8>>> {
		let filelists: Vec<FilelistEntry> = self.packages.iter().map(|p| FilelistEntry {
			name: p.name.clone(),
			epoch: p.epoch,
			version: p.version.clone(),
			release: p.release.clone(),
			arch: p.arch.clone(),
			files: Vec::new(),
		}).collect();

		let mut files = HashMap::new();
		files.insert("repodata/primary.json.gz".to_string(), gzip(&serde_json::to_vec(&self.packages)?)?);
		files.insert("repodata/filelists.json.gz".to_string(), gzip(&serde_json::to_vec(&filelists)?)?);
		files.insert("repodata/group.json".to_string(), serde_json::to_vec(&GroupFile { groups: self.groups.clone() })?);

		let mut entries: Vec<RepoMdEntry> = files.iter().map(|(location, data)| RepoMdEntry {
			kind: kind_of(location).to_string(),
			location: location.clone(),
			sha256: sha256::digest(data.as_slice()),
		}).collect();
		entries.sort_by(|a, b| a.location.cmp(&b.location));
		files.insert(format!("repodata/{}", REPOMD), serde_json::to_vec(&RepoMd(entries))?);
		Ok(files)
	}
}

fn kind_of(location: &str) -> &str {
	let file = location.rsplit('/').next().unwrap_or(location);
	file.split('.').next().unwrap_or(file)
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
	let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
	gz.write_all(data)?;
	Ok(gz.finish()?)
}

/// Serves repositories from memory, every arch gets the same files.
#[derive(Default)]
pub struct FixtureRepoFetcher {
	repos: Mutex<HashMap<(String, i64), HashMap<String, Vec<u8>>>>,
	fetches: AtomicUsize,
}

impl FixtureRepoFetcher {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_repo(&self, build_tag: &str, repo_id: i64, repo: &FixtureRepo) -> Result<()> {
		self.repos.lock().insert((build_tag.to_string(), repo_id), repo.files()?);
		Ok(())
	}

	pub fn remove_repo(&self, build_tag: &str, repo_id: i64) {
		self.repos.lock().remove(&(build_tag.to_string(), repo_id));
	}

	/// Number of files served so far.
	pub fn fetches(&self) -> usize {
		self.fetches.load(Ordering::SeqCst)
	}
}

impl RepoFetcher for FixtureRepoFetcher {
	fn fetch(&self, repo: &RepoDescriptor, _arch: &str, location: &str) -> RemoteResult<Vec<u8>> {
		self.fetches.fetch_add(1, Ordering::SeqCst);
		let repos = self.repos.lock();
		match repos.get(&(repo.build_tag.clone(), repo.repo_id)).and_then(|files| files.get(location)) {
			Some(data) => RemoteResult::Found(data.clone()),
			None => RemoteResult::NotFound,
		}
	}
}

/// A build submitted to the [`FixtureBuildSystem`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedBuild {
	pub task_id: i64,
	pub target: String,
	pub source: SourceArtifact,
	pub arches: Vec<String>,
}

#[derive(Default)]
struct BuildSystemState {
	latest_repos: HashMap<String, i64>,
	groups: HashMap<(String, String), Vec<String>>,
	build_requires: HashMap<SourceNvr, Vec<String>>,
	arches: HashMap<String, Vec<String>>,
	load: f64,
	sources: HashMap<(String, String), SourceArtifact>,
	submitted: Vec<SubmittedBuild>,
	tasks: HashMap<i64, TaskInfo>,
	unavailable: bool,
}

/// A build system hub kept in memory.
///
/// Everything not configured is reported as not found.
#[derive(Default)]
pub struct FixtureBuildSystem {
	state: Mutex<BuildSystemState>,
}

impl FixtureBuildSystem {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_latest_repo(&self, build_tag: &str, repo_id: i64) {
		self.state.lock().latest_repos.insert(build_tag.to_string(), repo_id);
	}

	pub fn set_build_group(&self, build_tag: &str, group: &str, members: &[&str]) {
		self.state.lock().groups.insert((build_tag.to_string(), group.to_string()), members.iter().map(|m| m.to_string()).collect());
	}

	pub fn set_build_requires(&self, name: &str, version: &str, release: &str, requires: &[&str]) {
		let nvr = SourceNvr { name: name.to_string(), version: version.to_string(), release: release.to_string() };
		self.state.lock().build_requires.insert(nvr, requires.iter().map(|r| r.to_string()).collect());
	}

	pub fn set_arches(&self, build_tag: &str, arches: &[&str]) {
		self.state.lock().arches.insert(build_tag.to_string(), arches.iter().map(|a| a.to_string()).collect());
	}

	pub fn set_load(&self, load: f64) {
		self.state.lock().load = load;
	}

	pub fn add_source(&self, build_tag: &str, name: &str, epoch: i32, version: &str, release: &str) {
		let source = SourceArtifact {
			nvr: SourceNvr { name: name.to_string(), version: version.to_string(), release: release.to_string() },
			epoch,
			url: format!("cli-build/{}-{}-{}.src.rpm", name, version, release),
		};
		self.state.lock().sources.insert((build_tag.to_string(), name.to_string()), source);
	}

	/// Makes every call fail transiently until switched back.
	pub fn set_unavailable(&self, unavailable: bool) {
		self.state.lock().unavailable = unavailable;
	}

	/// Moves a submitted task to `state`, built against `repo_id` when given.
	pub fn set_task_state(&self, task_id: i64, state: TaskState, repo_id: Option<i64>) {
		let finished = match state {
			TaskState::Open => None,
			_ => Some(chrono::Utc::now()),
		};
		self.state.lock().tasks.insert(task_id, TaskInfo { state, repo_id, finished });
	}

	/// Makes the hub forget a task.
	pub fn remove_task(&self, task_id: i64) {
		self.state.lock().tasks.remove(&task_id);
	}

	pub fn submitted(&self) -> Vec<SubmittedBuild> {
		self.state.lock().submitted.clone()
	}

	fn call<T>(&self, f: impl FnOnce(&mut BuildSystemState) -> RemoteResult<T>) -> RemoteResult<T> {
		let mut state = self.state.lock();
		if state.unavailable {
			return RemoteResult::TransientError("hub unavailable".to_string());
		}
		f(&mut state)
	}
}

fn found<T: Clone>(v: Option<&T>) -> RemoteResult<T> {
	match v {
		Some(v) => RemoteResult::Found(v.clone()),
		None => RemoteResult::NotFound,
	}
}

impl BuildSystem for FixtureBuildSystem {
	fn latest_repo(&self, build_tag: &str) -> RemoteResult<RepoInfo> {
		self.call(|s| found(s.latest_repos.get(build_tag)).map(|id| RepoInfo {
			id,
			tag: build_tag.to_string(),
			create_time: chrono::Utc::now(),
		}))
	}

	fn build_group(&self, build_tag: &str, group: &str, _repo_id: i64) -> RemoteResult<Vec<String>> {
		self.call(|s| found(s.groups.get(&(build_tag.to_string(), group.to_string()))))
	}

	fn build_requires(&self, sources: &[SourceNvr]) -> Vec<RemoteResult<Vec<String>>> {
		sources.iter().map(|nvr| self.call(|s| found(s.build_requires.get(nvr)))).collect()
	}

	fn build_arches(&self, build_tag: &str) -> RemoteResult<Vec<String>> {
		self.call(|s| found(s.arches.get(build_tag)))
	}

	fn build_load(&self, _arches: &[String]) -> RemoteResult<f64> {
		self.call(|s| RemoteResult::Found(s.load))
	}

	fn latest_source(&self, build_tag: &str, package: &str) -> RemoteResult<SourceArtifact> {
		self.call(|s| found(s.sources.get(&(build_tag.to_string(), package.to_string()))))
	}

	fn submit_build(&self, target: &str, source: &SourceArtifact, arches: &[String]) -> RemoteResult<i64> {
		self.call(|s| {
			let task_id = 1000 + s.submitted.len() as i64;
			s.submitted.push(SubmittedBuild {
				task_id,
				target: target.to_string(),
				source: source.clone(),
				arches: arches.to_vec(),
			});
			s.tasks.insert(task_id, TaskInfo { state: TaskState::Open, repo_id: None, finished: None });
			RemoteResult::Found(task_id)
		})
	}

	fn task_info(&self, task_ids: &[i64]) -> Vec<RemoteResult<TaskInfo>> {
		task_ids.iter().map(|id| self.call(|s| found(s.tasks.get(id)))).collect()
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
	Package { name: String, prev: PackageState, new: PackageState },
	Collection { name: String, prev: CollectionState, new: CollectionState },
}

/// Remembers every state change in order.
#[derive(Default)]
pub struct RecordingEventHandler {
	events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventHandler {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn events(&self) -> Vec<RecordedEvent> {
		self.events.lock().clone()
	}

	/// Returns the events recorded so far and forgets them.
	pub fn take(&self) -> Vec<RecordedEvent> {
		std::mem::take(&mut *self.events.lock())
	}
}

impl EventHandler for RecordingEventHandler {
	fn package_state_change(&self, package: &Package, prev: PackageState, new: PackageState) {
		self.events.lock().push(RecordedEvent::Package { name: package.name.clone(), prev, new });
	}

	fn collection_state_change(&self, collection: &Collection, prev: CollectionState, new: CollectionState) {
		self.events.lock().push(RecordedEvent::Collection { name: collection.name.clone(), prev, new });
	}
}

/// Config with every directory inside `dir` and a single `x86_64` arch.
pub fn test_config(dir: &Path) -> Config {
	let mut config = Config::default();
	config.directories.cache_dir = dir.join("cache");
	config.directories.data_dir = dir.join("data");
	config.database.path = Some(dir.join("data").join("koschei.sqlite3"));
	config.repo_cache.arches = vec!["x86_64".to_string()];
	config.repo_cache.validate_repodata = true;
	config
}

/// A session on fixture collaborators, its files are removed when dropped.
pub struct TestSession {
	pub session: Session,
	pub build_system: Arc<FixtureBuildSystem>,
	pub fetcher: Arc<FixtureRepoFetcher>,
	pub events: Arc<RecordingEventHandler>,
	/* Dropped last, the session still has files open */
	pub dir: tempfile::TempDir,
}

impl TestSession {
	pub fn new() -> Result<Self> {
		Self::with_config(|_| {})
	}

	/// # Parameters
	/// - `configure` - Adjusts the [`test_config`] before the session starts.
	pub fn with_config(configure: impl FnOnce(&mut Config)) -> Result<Self> {
		let dir = tempfile::tempdir()?;
		let mut config = test_config(dir.path());
		configure(&mut config);

		let build_system = Arc::new(FixtureBuildSystem::new());
		let fetcher = Arc::new(FixtureRepoFetcher::new());
		let events = Arc::new(RecordingEventHandler::new());
		let db = Database::open(config.database_path(), &config.database)?;
		let session = Session::with_components(config, db, build_system.clone(), fetcher.clone(), events.clone())?;
		Ok(Self { session, build_system, fetcher, events, dir })
	}

	/// Adds a collection building from `build_tag` into `target`.
	pub fn add_collection(&self, name: &str, build_tag: &str, target: &str) -> Result<Collection> {
		let mut collection = Collection::new(name, build_tag, target);
		collection.insert(self.session.db().connection())?;
		Ok(collection)
	}

	/// Adds tracked packages to a collection.
	pub fn add_packages(&self, collection: &Collection, names: &[&str]) -> Result<Vec<Package>> {
		let mut packages = Vec::with_capacity(names.len());
		for name in names {
			let mut package = Package::new(*name, collection.id);
			package.insert(self.session.db().connection())?;
			packages.push(package);
		}
		Ok(packages)
	}
}

