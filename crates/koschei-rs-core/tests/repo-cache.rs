use std::path::Path;
use std::sync::Arc;

use koschei_rs_core::db::Database;
use koschei_rs_core::repo_cache::RepoDescriptor;
use koschei_rs_core::Session;
use koschei_rs_test_utils::*;

fn init() {
	let _ = env_logger::builder().is_test(true).try_init();
}

fn repo(version: &str) -> FixtureRepo {
	FixtureRepo::new()
		.with(package("gcc", &format!("{}-1.fc22", version), "x86_64"))
		.with(source_package("gcc", &format!("{}-1.fc22", version), &["make"]))
		.with(package("make", "4.3-1.fc22", "x86_64"))
		.with_group("build", &["gcc"])
}

#[test]
fn downloaded_repo_is_loaded() {
	init();
	let env = TestSession::new().unwrap();
	env.fetcher.add_repo("f22-build", 7, &repo("12")).unwrap();
	let descriptor = RepoDescriptor::new("primary", "f22-build", 7);

	let cache = env.session.repo_cache();
	cache.prefetch_repo(descriptor.clone());
	let (names, source, group) = cache.get_sack(&descriptor, |sack| {
		let sack = sack.expect("repo should be available");
		let mut names: Vec<String> = sack.packages().map(|(_, p)| p.to_string()).collect();
		names.sort();
		(names, sack.source("gcc").map(|p| p.to_string()), sack.group("build").map(|g| g.to_vec()))
	}).unwrap();
	/* Source packages are kept apart from the installable ones */
	assert_eq!(names, vec!["gcc-12-1.fc22.x86_64", "make-4.3-1.fc22.x86_64"]);
	assert_eq!(source.as_deref(), Some("gcc-12-1.fc22.src"));
	assert_eq!(group, Some(vec!["gcc".to_string()]));

	let arch_dir = env.dir.path().join("cache").join("primary-f22-build-7").join("x86_64");
	assert!(arch_dir.join("repodata").join("repomd.json").is_file());
	assert!(arch_dir.join("repodata").join("primary.json.gz").is_file());
	assert!(arch_dir.join("cache").join("sack.bin").is_file());
}

#[test]
fn missing_repo_yields_none() {
	init();
	let env = TestSession::new().unwrap();
	let descriptor = RepoDescriptor::new("primary", "f22-build", 99);

	let cache = env.session.repo_cache();
	cache.prefetch_repo(descriptor.clone());
	assert!(cache.get_sack(&descriptor, |sack| sack.is_none()).unwrap());
	assert!(!env.dir.path().join("cache").join("primary-f22-build-99").exists());
}

#[test]
fn repos_are_consumed_in_prefetch_order() {
	init();
	let env = TestSession::new().unwrap();
	env.fetcher.add_repo("f22-build", 1, &repo("11")).unwrap();
	env.fetcher.add_repo("f22-build", 2, &repo("12")).unwrap();
	let first = RepoDescriptor::new("primary", "f22-build", 1);
	let second = RepoDescriptor::new("primary", "f22-build", 2);

	let cache = env.session.repo_cache();
	cache.prefetch_repo(first.clone());
	cache.prefetch_repo(second.clone());
	let gcc = |sack: Option<&koschei_rs_core::repodata::Sack>| sack.and_then(|s| s.source("gcc")).map(|p| p.evr.version.clone());
	assert_eq!(cache.get_sack(&first, gcc).unwrap().as_deref(), Some("11"));
	assert_eq!(cache.get_sack(&second, gcc).unwrap().as_deref(), Some("12"));
}

fn copy_dir(from: &Path, to: &Path) {
	std::fs::create_dir_all(to).unwrap();
	for entry in std::fs::read_dir(from).unwrap() {
		let entry = entry.unwrap();
		let dest = to.join(entry.file_name());
		if entry.path().is_dir() {
			copy_dir(&entry.path(), &dest);
		} else {
			std::fs::copy(entry.path(), dest).unwrap();
		}
	}
}

#[test]
fn closing_removes_downloads() {
	init();
	let env = TestSession::new().unwrap();
	env.fetcher.add_repo("f22-build", 3, &repo("12")).unwrap();
	let descriptor = RepoDescriptor::new("primary", "f22-build", 3);
	env.session.repo_cache().prefetch_repo(descriptor.clone());
	assert!(env.session.repo_cache().get_sack(&descriptor, |sack| sack.is_some()).unwrap());

	let TestSession { session, dir, .. } = env;
	session.close();
	assert!(!dir.path().join("cache").join("primary-f22-build-3").exists());
}

#[test]
fn repos_left_by_a_crashed_process_are_reused() {
	init();
	let env = TestSession::new().unwrap();
	env.fetcher.add_repo("f22-build", 3, &repo("12")).unwrap();
	let descriptor = RepoDescriptor::new("primary", "f22-build", 3);
	env.session.repo_cache().prefetch_repo(descriptor.clone());
	assert!(env.session.repo_cache().get_sack(&descriptor, |sack| sack.is_some()).unwrap());

	/* What a process killed at this point leaves behind */
	let other = tempfile::tempdir().unwrap();
	copy_dir(&env.dir.path().join("cache").join("primary-f22-build-3"), &other.path().join("cache").join("primary-f22-build-3"));
	std::fs::create_dir_all(other.path().join("cache").join(".download-x1y2z3")).unwrap();

	/* The new mirror knows nothing, the repo has to come from the cache directory */
	let mut config = test_config(other.path());
	config.repo_cache.stale_download_secs = 0;
	let db = Database::open(config.database_path(), &config.database).unwrap();
	let fetcher = Arc::new(FixtureRepoFetcher::new());
	let session = Session::with_components(config, db, Arc::new(FixtureBuildSystem::new()), fetcher.clone(), Arc::new(RecordingEventHandler::new())).unwrap();

	session.repo_cache().prefetch_repo(descriptor.clone());
	assert!(session.repo_cache().get_sack(&descriptor, |sack| sack.is_some()).unwrap());
	assert_eq!(fetcher.fetches(), 0);
	/* The interrupted download is stale and gone */
	assert!(!other.path().join("cache").join(".download-x1y2z3").exists());
	session.close();
}
