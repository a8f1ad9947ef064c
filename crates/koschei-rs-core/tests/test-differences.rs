use koschei_rs_core::db::{self, Build, BuildState, Collection, Package, PackageState, ResolutionChange};
use koschei_rs_core::repodata::Evr;
use koschei_rs_core::resolver::{BuildResolver, DependencyChange, RepoResolver};
use koschei_rs_test_utils::*;

fn init() {
	let _ = env_logger::builder().is_test(true).try_init();
}

fn dep(name: &str, evr: &str, requires: &[&str]) -> koschei_rs_core::repodata::import::PrimaryEntry {
	let mut p = package(name, evr, "x86_64");
	p.requires = requires.iter().map(|r| r.to_string()).collect();
	p
}

/// The repository the previous build was resolved in.
fn old_repo() -> FixtureRepo {
	FixtureRepo::new()
		.with(dep("A", "1-1.fc22", &["B", "C"]))
		.with(dep("B", "4.1-1.fc22", &["D"]))
		.with(dep("C", "1:3-1.fc22", &[]))
		.with(dep("D", "2:8.b-1.fc22", &[]))
		.with(dep("F", "1-1.fc22", &[]))
		.with(dep("R", "3.3-1.fc22", &[]))
		.with(source_package("foo", "4-1.fc22", &["A", "F"]))
		.with_group("build", &["R"])
}

/// C got downgraded and A started requiring E.
fn new_repo() -> FixtureRepo {
	FixtureRepo::new()
		.with(dep("A", "1-1.fc22", &["B", "C", "E"]))
		.with(dep("B", "4.1-1.fc22", &["D"]))
		.with(dep("C", "1:2-1.fc22", &[]))
		.with(dep("D", "2:8.b-1.fc22", &[]))
		.with(dep("E", "0.1-1.fc22", &[]))
		.with(dep("F", "1-1.fc22", &[]))
		.with(dep("R", "3.3-1.fc22", &[]))
		.with(source_package("foo", "4-1.fc22", &["A", "F"]))
		.with_group("build", &["R"])
}

struct Scenario {
	env: TestSession,
	collection: Collection,
	foo: Package,
	build: Build,
}

/// A complete build of foo in repo 1, resolved by the build resolver, with repo 2 being the latest.
fn scenario() -> Scenario {
	init();
	let env = TestSession::new().unwrap();
	env.fetcher.add_repo("f22-build", 1, &old_repo()).unwrap();
	env.fetcher.add_repo("f22-build", 2, &new_repo()).unwrap();
	env.build_system.set_build_requires("foo", "4", "1.fc22", &["A", "F"]);

	let collection = env.add_collection("f22", "f22-build", "f22").unwrap();
	let foo = env.add_packages(&collection, &["foo"]).unwrap().remove(0);

	let mut build = Build::new(foo.id, BuildState::Complete);
	build.epoch = Some(0);
	build.version = Some("4".to_string());
	build.release = Some("1.fc22".to_string());
	build.repo_id = Some(1);
	build.insert(env.session.db().connection()).unwrap();

	BuildResolver::new(&env.session).run().unwrap();
	env.build_system.set_latest_repo("f22-build", 2);

	Scenario { env, collection, foo, build }
}

#[test]
fn build_dependencies_are_stored() {
	let s = scenario();
	let conn = s.env.session.db().connection();
	let build = Build::get(conn, s.build.id).unwrap().unwrap();
	assert_eq!(build.deps_resolved, Some(true));
	/* A, B, C, D, F and R */
	assert_eq!(build.dependency_keys.unwrap().0.len(), 6);
	/* Nothing to compare the first build against */
	assert!(db::applied_changes(conn, s.build.id).unwrap().is_empty());
}

#[test]
fn test_differences() {
	let s = scenario();
	RepoResolver::new(&s.env.session).run().unwrap();

	let conn = s.env.session.db().connection();
	let changes = db::unapplied_changes(conn, s.foo.id).unwrap();
	assert_eq!(changes, vec![
		DependencyChange {
			dep_name: "C".to_string(),
			prev: Some(Evr::new(1, "3", "1.fc22")),
			curr: Some(Evr::new(1, "2", "1.fc22")),
			distance: Some(2),
		},
		DependencyChange {
			dep_name: "E".to_string(),
			prev: None,
			curr: Some(Evr::new(0, "0.1", "1.fc22")),
			distance: Some(2),
		},
	]);

	let foo = Package::get(conn, s.foo.id).unwrap().unwrap();
	assert_eq!(foo.resolved, Some(true));
	assert_eq!(foo.state(), PackageState::Ok);

	let collection = Collection::get(conn, s.collection.id).unwrap().unwrap();
	assert_eq!(collection.latest_repo_id, Some(2));
	assert_eq!(collection.latest_repo_resolved, Some(true));
	assert!(db::buildroot_problems(conn, s.collection.id).unwrap().is_empty());
}

#[test]
fn repeated_resolution_changes_nothing() {
	let s = scenario();
	RepoResolver::new(&s.env.session).run().unwrap();

	let conn = s.env.session.db().connection();
	let changes = db::unapplied_changes(conn, s.foo.id).unwrap();
	let resolution_changes = ResolutionChange::count(conn, s.foo.id).unwrap();

	/* Pretend repo 2 was never processed so it's resolved again against the same baseline */
	Collection::set_latest_repo(conn, s.collection.id, 1, Some(true)).unwrap();
	RepoResolver::new(&s.env.session).run().unwrap();

	assert_eq!(db::unapplied_changes(conn, s.foo.id).unwrap(), changes);
	assert_eq!(ResolutionChange::count(conn, s.foo.id).unwrap(), resolution_changes);
	assert_eq!(Collection::get(conn, s.collection.id).unwrap().unwrap().latest_repo_id, Some(2));
}

#[test]
fn up_to_date_collection_is_skipped() {
	let s = scenario();
	RepoResolver::new(&s.env.session).run().unwrap();
	let fetches = s.env.fetcher.fetches();

	RepoResolver::new(&s.env.session).run().unwrap();
	assert_eq!(s.env.fetcher.fetches(), fetches);
}

#[test]
fn new_build_applies_changes() {
	let s = scenario();
	RepoResolver::new(&s.env.session).run().unwrap();

	let conn = s.env.session.db().connection();
	let mut rebuild = Build::new(s.foo.id, BuildState::Complete);
	rebuild.version = Some("4".to_string());
	rebuild.release = Some("1.fc22".to_string());
	rebuild.repo_id = Some(2);
	rebuild.insert(conn).unwrap();

	BuildResolver::new(&s.env.session).run().unwrap();

	let applied = db::applied_changes(conn, rebuild.id).unwrap();
	let names: Vec<&str> = applied.iter().map(|c| c.dep_name.as_str()).collect();
	assert_eq!(names, vec!["C", "E"]);
	/* Computed against the older build, superseded by the new one */
	assert!(db::unapplied_changes(conn, s.foo.id).unwrap().is_empty());
	assert_eq!(Build::get(conn, rebuild.id).unwrap().unwrap().deps_resolved, Some(true));
}

#[test]
fn unresolvable_package_reports_problems() {
	init();
	let env = TestSession::new().unwrap();
	let repo = new_repo().with(source_package("bar", "1-1.fc22", &["missing-dep"]));
	env.fetcher.add_repo("f22-build", 2, &repo).unwrap();
	env.build_system.set_latest_repo("f22-build", 2);
	let collection = env.add_collection("f22", "f22-build", "f22").unwrap();
	let bar = env.add_packages(&collection, &["bar"]).unwrap().remove(0);

	RepoResolver::new(&env.session).run().unwrap();

	let conn = env.session.db().connection();
	let bar = Package::get(conn, bar.id).unwrap().unwrap();
	assert_eq!(bar.state(), PackageState::Unresolved);
	let latest = ResolutionChange::latest(conn, bar.id).unwrap().unwrap();
	assert!(!latest.resolved);
	assert_eq!(latest.problems, vec!["No package found for: missing-dep".to_string()]);
	assert!(env.events.events().contains(&RecordedEvent::Package {
		name: "bar".to_string(),
		prev: PackageState::Unknown,
		new: PackageState::Unresolved,
	}));
}

#[test]
fn broken_buildroot_marks_collection_unresolved() {
	init();
	let env = TestSession::new().unwrap();
	let repo = new_repo().with_group("build", &["R", "not-in-repo"]).with(dep("R2", "1-1", &["nothing"]));
	env.fetcher.add_repo("f22-build", 2, &repo).unwrap();
	env.build_system.set_latest_repo("f22-build", 2);
	env.build_system.set_build_group("f22-build", "build", &["R", "R2"]);
	let collection = env.add_collection("f22", "f22-build", "f22").unwrap();

	RepoResolver::new(&env.session).run().unwrap();

	let conn = env.session.db().connection();
	let collection = Collection::get(conn, collection.id).unwrap().unwrap();
	assert_eq!(collection.latest_repo_resolved, Some(false));
	assert!(!db::buildroot_problems(conn, collection.id).unwrap().is_empty());
	assert_eq!(env.events.events(), vec![RecordedEvent::Collection {
		name: "f22".to_string(),
		prev: koschei_rs_core::db::CollectionState::Unknown,
		new: koschei_rs_core::db::CollectionState::Unresolved,
	}]);
}

#[test]
fn failure_to_mark_a_build_unresolved_aborts_the_pass() {
	init();
	let env = TestSession::new().unwrap();
	let collection = env.add_collection("f22", "f22-build", "f22").unwrap();
	let foo = env.add_packages(&collection, &["foo"]).unwrap().remove(0);

	let conn = env.session.db().connection();
	/* Repo 5 was never published, the build can only be marked unresolved */
	let mut build = Build::new(foo.id, BuildState::Complete);
	build.version = Some("4".to_string());
	build.release = Some("1.fc22".to_string());
	build.repo_id = Some(5);
	build.insert(conn).unwrap();
	conn.execute_batch(
		"CREATE TRIGGER build_frozen BEFORE UPDATE OF deps_resolved ON build
		BEGIN SELECT RAISE(ABORT, 'build table is frozen'); END;",
	).unwrap();

	let e = BuildResolver::new(&env.session).run().unwrap_err();
	assert!(!e.is_transient());
	assert_eq!(Build::get(conn, build.id).unwrap().unwrap().deps_resolved, None);

	conn.execute_batch("DROP TRIGGER build_frozen").unwrap();
	BuildResolver::new(&env.session).run().unwrap();
	assert_eq!(Build::get(conn, build.id).unwrap().unwrap().deps_resolved, Some(false));
}
