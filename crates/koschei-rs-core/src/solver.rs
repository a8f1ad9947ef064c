//! Dependency resolution against a [`Sack`].
//!
//! # Usage
//! 1. [`buildroot()`] installs the build group.
//! 1. [`BuildrootSolution::builddep()`] installs a source package's build requirements on top of it.
//! 1. [`BuilddepSolution::dependencies()`] lists what got installed and how far each package is from the requirements.
//!
//! Provider choice is greedy and deterministic: a requirement already satisfied by an installed package stays that way,
//! otherwise the provider named like the requirement wins, then the highest EVR, then the lowest name.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::prelude::*;

use crate::repodata::{Nevra, PackageId, Reldep, RepoPackage, Sack};

/// Requirement graph of an installed package set, edges point from a package to the providers of its requires.
pub type DependencyGraph = DiGraph<PackageId, ()>;

/// Parses requirement strings, dropping rich dependencies the solver can't express.
pub fn parse_requires(requires: &[String]) -> Vec<Reldep> {
	requires.iter().filter_map(|r| match Reldep::parse(r) {
		Ok(r) => Some(r),
		Err(e) => {
			log::debug!("Ignoring requirement: {}", e);
			None
		},
	}).collect()
}

/// Packages being installed, shared by both resolution steps.
struct Transaction<'s> {
	sack: &'s Sack,
	installed: Vec<PackageId>,
	installed_set: HashSet<PackageId>,
	names: HashMap<&'s str, PackageId>,
	problems: Vec<String>,
}

impl<'s> Transaction<'s> {
	fn new(sack: &'s Sack) -> Self {
		Self {
			sack,
			installed: Vec::new(),
			installed_set: HashSet::new(),
			names: HashMap::new(),
			problems: Vec::new(),
		}
	}

	fn with_installed(sack: &'s Sack, installed: &[PackageId]) -> Self {
		let mut t = Self::new(sack);
		for &id in installed {
			t.install(id);
		}
		t
	}

	fn install(&mut self, id: PackageId) {
		if self.installed_set.insert(id) {
			self.installed.push(id);
			self.names.insert(self.sack.get(id).name.as_str(), id);
		}
	}

	fn installed_providers(&self, req: &Reldep) -> Vec<PackageId> {
		self.sack.what_provides(req).into_iter().filter(|id| self.installed_set.contains(id)).collect()
	}

	/// Describes the first conflict between `candidate` and the installed packages.
	fn conflict(&self, candidate: PackageId) -> Option<String> {
		let c = self.sack.get(candidate);
		for &i in &self.installed {
			let p = self.sack.get(i);
			if let Some(con) = c.conflicts.iter().find(|con| p.provides_reldep(con)) {
				return Some(format!("package {} conflicts with {} provided by {}", c, con, p));
			}
			if let Some(con) = p.conflicts.iter().find(|con| c.provides_reldep(con)) {
				return Some(format!("package {} conflicts with {} provided by {}", p, con, c));
			}
		}
		None
	}

	/// Picks the provider of `req` to install.
	///
	/// # Errors
	/// A problem string when every candidate conflicts with the installed set.
	fn choose(&self, req: &Reldep, candidates: Vec<PackageId>) -> Result<PackageId, String> {
		let mut usable = Vec::<PackageId>::new();
		let mut first_problem = None;
		for id in candidates {
			let pkg = self.sack.get(id);
			if let Some(&other) = self.names.get(pkg.name.as_str()) {
				if other != id {
					first_problem.get_or_insert_with(|| format!("package {} can't be installed next to {}", pkg, self.sack.get(other)));
					continue;
				}
			}
			match self.conflict(id) {
				Some(problem) => { first_problem.get_or_insert(problem); },
				None => usable.push(id),
			}
		}

		let sack = self.sack;
		usable.into_iter().min_by(|&a, &b| {
			let (pa, pb) = (sack.get(a), sack.get(b));
			(pb.name == req.name).cmp(&(pa.name == req.name))
				.then_with(|| pb.evr.cmp(&pa.evr))
				.then_with(|| pa.name.cmp(&pb.name))
				.then_with(|| pa.arch.cmp(&pb.arch))
		}).ok_or_else(|| first_problem.unwrap_or_else(|| format!("none of the providers of {} can be installed", req)))
	}

	/// Installs the requires of `start` and everything they pull in.
	fn install_closure(&mut self, start: Vec<PackageId>) {
		let mut queue = VecDeque::from(start);
		while let Some(id) = queue.pop_front() {
			let pkg = self.sack.get(id);
			for req in &pkg.requires {
				if !self.installed_providers(req).is_empty() {
					continue;
				}
				let candidates = self.sack.what_provides(req);
				if candidates.is_empty() {
					self.problems.push(format!("nothing provides {} needed by {}", req, pkg));
					continue;
				}
				match self.choose(req, candidates) {
					Ok(provider) => {
						self.install(provider);
						queue.push_back(provider);
					},
					Err(problem) => self.problems.push(problem),
				}
			}
		}
	}
}

/// The build group installed into an empty root.
pub struct BuildrootSolution<'s> {
	sack: &'s Sack,
	installed: Vec<PackageId>,
	problems: Vec<String>,
}

/// Installs the members of a build group and their requires.
///
/// Group members with no package of that name in the repository are skipped silently, the same as package managers do.
pub fn buildroot<'s>(sack: &'s Sack, group: &[String]) -> BuildrootSolution<'s> {
	let mut t = Transaction::new(sack);
	let mut start = Vec::new();
	for name in group {
		let candidates = sack.by_name(name).to_vec();
		if candidates.is_empty() {
			log::debug!("Build group member {} isn't in the repo", name);
			continue;
		}
		if t.names.contains_key(name.as_str()) {
			continue;
		}
		match t.choose(&Reldep::unversioned(name.clone()), candidates) {
			Ok(id) => {
				t.install(id);
				start.push(id);
			},
			Err(problem) => t.problems.push(problem),
		}
	}
	t.install_closure(start);

	BuildrootSolution {
		sack,
		installed: t.installed,
		problems: t.problems,
	}
}

impl<'s> BuildrootSolution<'s> {
	pub fn resolved(&self) -> bool {
		self.problems.is_empty()
	}

	pub fn problems(&self) -> &[String] {
		&self.problems
	}

	pub fn installed(&self) -> impl Iterator<Item = &'s RepoPackage> + '_ {
		self.installed.iter().map(|&id| self.sack.get(id))
	}

	/// Installs `requires` on top of the buildroot.
	///
	/// A requirement nothing in the repository provides fails the resolution straight away
	/// with `No package found for: {req}` and nothing gets installed.
	pub fn builddep(&self, requires: &[Reldep]) -> BuilddepSolution<'s> {
		let missing: Vec<String> = requires.iter()
			.filter(|r| self.sack.what_provides(r).is_empty())
			.map(|r| format!("No package found for: {}", r))
			.collect();
		if !missing.is_empty() {
			return BuilddepSolution {
				sack: self.sack,
				problems: missing,
				installed: Vec::new(),
				roots: Vec::new(),
			};
		}

		let mut t = Transaction::with_installed(self.sack, &self.installed);
		let mut roots = Vec::<PackageId>::new();
		let mut start = Vec::new();
		for req in requires {
			let providers = t.installed_providers(req);
			if !providers.is_empty() {
				roots.extend(providers);
				continue;
			}
			match t.choose(req, self.sack.what_provides(req)) {
				Ok(id) => {
					t.install(id);
					start.push(id);
					roots.push(id);
				},
				Err(problem) => t.problems.push(problem),
			}
		}
		t.install_closure(start);

		let mut seen = HashSet::new();
		roots.retain(|r| seen.insert(*r));

		BuilddepSolution {
			sack: self.sack,
			problems: t.problems,
			installed: t.installed,
			roots,
		}
	}
}

/// The buildroot plus the build requirements of one package.
pub struct BuilddepSolution<'s> {
	sack: &'s Sack,
	problems: Vec<String>,
	installed: Vec<PackageId>,
	/// Direct providers of the requirements.
	roots: Vec<PackageId>,
}

impl<'s> BuilddepSolution<'s> {
	pub fn resolved(&self) -> bool {
		self.problems.is_empty()
	}

	pub fn problems(&self) -> &[String] {
		&self.problems
	}

	pub fn installed(&self) -> impl Iterator<Item = &'s RepoPackage> + '_ {
		self.installed.iter().map(|&id| self.sack.get(id))
	}

	/// Builds the requires graph of the installed set.
	///
	/// # Returns
	/// The graph and the nodes of the requirement roots.
	pub fn dependency_graph(&self) -> (DependencyGraph, Vec<NodeIndex>) {
		let mut graph = DependencyGraph::new();
		let mut nodes = HashMap::<PackageId, NodeIndex>::new();
		for &id in &self.installed {
			nodes.insert(id, graph.add_node(id));
		}
		for &id in &self.installed {
			let from = nodes[&id];
			for req in &self.sack.get(id).requires {
				for provider in self.sack.what_provides(req) {
					if provider == id {
						continue;
					}
					if let Some(&to) = nodes.get(&provider) {
						graph.update_edge(from, to, ());
					}
				}
			}
		}
		let roots = self.roots.iter().filter_map(|r| nodes.get(r).copied()).collect();
		(graph, roots)
	}

	/// Every installed package with its distance from the requirements, ordered by NEVRA.
	pub fn dependencies(&self, max_level: u32) -> Vec<(Nevra, Option<u32>)> {
		let (graph, roots) = self.dependency_graph();
		let mut deps: Vec<(Nevra, Option<u32>)> = compute_dependency_distances(&graph, &roots, max_level).into_iter()
			.map(|(id, distance)| (self.sack.get(id).nevra(), distance))
			.collect();
		deps.sort_by(|a, b| a.0.cmp(&b.0));
		deps
	}
}

/// Labels every node with its distance from the closest root, roots being at distance 1.
///
/// Nodes further than `max_level` hops, or not reachable at all, get `None`.
pub fn compute_dependency_distances(graph: &DependencyGraph, roots: &[NodeIndex], max_level: u32) -> Vec<(PackageId, Option<u32>)> {
	let mut distance = HashMap::<NodeIndex, u32>::new();
	let mut queue = VecDeque::<NodeIndex>::new();

	if max_level >= 1 {
		for &r in roots {
			if distance.insert(r, 1).is_none() {
				queue.push_back(r);
			}
		}
	}

	while let Some(node) = queue.pop_front() {
		let d = distance[&node];
		if d >= max_level {
			continue;
		}
		for next in graph.neighbors_directed(node, Outgoing) {
			if let std::collections::hash_map::Entry::Vacant(e) = distance.entry(next) {
				e.insert(d + 1);
				queue.push_back(next);
			}
		}
	}

	graph.node_indices().map(|n| (graph[n], distance.get(&n).copied())).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::repodata::Evr;

	fn pkg(name: &str, evr: &str, requires: &[&str], conflicts: &[&str]) -> RepoPackage {
		RepoPackage {
			name: name.to_string(),
			evr: Evr::parse(evr).unwrap(),
			arch: "x86_64".to_string(),
			provides: vec![],
			requires: requires.iter().map(|r| Reldep::parse(r).unwrap()).collect(),
			conflicts: conflicts.iter().map(|r| Reldep::parse(r).unwrap()).collect(),
			files: vec![],
		}
	}

	fn reqs(r: &[&str]) -> Vec<Reldep> {
		r.iter().map(|r| Reldep::parse(r).unwrap()).collect()
	}

	/// The repository of the dependency difference scenario.
	fn scenario() -> Sack {
		let mut d = pkg("D", "2:8.b-1.fc22", &[], &[]);
		d.files.push("/usr/bin/d".to_string());
		Sack::new(vec![
			pkg("A", "1-1.fc22", &["B", "C"], &[]),
			pkg("B", "4.1-1.fc22", &[], &[]),
			pkg("C", "1:2-1.fc22", &["/usr/bin/d"], &[]),
			d,
			pkg("E", "0.1-1.fc22", &[], &[]),
			pkg("F", "1-1.fc22", &["E"], &[]),
			pkg("R", "3.3-1.fc22", &[], &[]),
		], HashMap::new())
	}

	fn distances(sack: &Sack, group: &[&str], requires: &[&str]) -> HashMap<String, Option<u32>> {
		let group: Vec<String> = group.iter().map(|g| g.to_string()).collect();
		let solution = buildroot(sack, &group).builddep(&reqs(requires));
		assert!(solution.resolved(), "{:?}", solution.problems());
		solution.dependencies(4).into_iter().map(|(n, d)| (n.name, d)).collect()
	}

	#[test]
	fn distances_follow_requires() {
		let d = distances(&scenario(), &["R"], &["F", "A"]);
		assert_eq!(d["A"], Some(1));
		assert_eq!(d["F"], Some(1));
		assert_eq!(d["B"], Some(2));
		assert_eq!(d["C"], Some(2));
		assert_eq!(d["E"], Some(2));
		assert_eq!(d["D"], Some(3));
		assert_eq!(d["R"], None);
		assert_eq!(d.len(), 7);
	}

	#[test]
	fn distances_are_capped() {
		let d = distances(&scenario(), &[], &["A"]);
		assert_eq!(d["D"], Some(3));
		assert_eq!(d.len(), 4);
		let sack = scenario();
		let solution = buildroot(&sack, &[]).builddep(&reqs(&["A"]));
		let capped: HashMap<String, Option<u32>> = solution.dependencies(2).into_iter().map(|(n, d)| (n.name, d)).collect();
		assert_eq!(capped["C"], Some(2));
		assert_eq!(capped["D"], None);
	}

	#[test]
	fn empty_requirements() {
		let sack = scenario();
		let solution = buildroot(&sack, &["R".to_string()]).builddep(&[]);
		assert!(solution.resolved());
		let deps = solution.dependencies(4);
		assert_eq!(deps.len(), 1);
		assert_eq!(deps[0].0.name, "R");
		assert_eq!(deps[0].1, None);
		assert!(compute_dependency_distances(&DependencyGraph::new(), &[], 4).is_empty());
	}

	#[test]
	fn missing_group_members_are_skipped() {
		let sack = scenario();
		let root = buildroot(&sack, &["R".to_string(), "does-not-exist".to_string()]);
		assert!(root.resolved());
		assert_eq!(root.installed().count(), 1);
	}

	#[test]
	fn unknown_requirement_short_circuits() {
		let sack = scenario();
		let solution = buildroot(&sack, &[]).builddep(&reqs(&["A", "nonexistent >= 2"]));
		assert!(!solution.resolved());
		assert_eq!(solution.problems(), &["No package found for: nonexistent >= 2".to_string()]);
		assert_eq!(solution.installed().count(), 0);
	}

	#[test]
	fn broken_dependency_is_a_solver_problem() {
		let sack = Sack::new(vec![pkg("foo-devel", "1-1", &["libfoo = 2"], &[]), pkg("libfoo", "1-1", &[], &[])], HashMap::new());
		let solution = buildroot(&sack, &[]).builddep(&reqs(&["foo-devel"]));
		assert!(!solution.resolved());
		assert_eq!(solution.problems(), &["nothing provides libfoo = 2 needed by foo-devel-1-1.x86_64".to_string()]);
	}

	#[test]
	fn conflicts_are_reported() {
		let sack = Sack::new(vec![
			pkg("gcc", "12-1", &[], &[]),
			pkg("oldtool", "1-1", &[], &["gcc >= 10"]),
		], HashMap::new());
		let root = buildroot(&sack, &["gcc".to_string()]);
		let solution = root.builddep(&reqs(&["oldtool"]));
		assert!(!solution.resolved());
		assert_eq!(solution.problems(), &["package oldtool-1-1.x86_64 conflicts with gcc >= 10 provided by gcc-12-1.x86_64".to_string()]);
	}

	#[test]
	fn installed_provider_is_preferred() {
		let mut alt = pkg("alt-make", "9-1", &[], &[]);
		alt.provides.push(Reldep::unversioned("make"));
		let sack = Sack::new(vec![pkg("make", "4-1", &[], &[]), alt], HashMap::new());
		let root = buildroot(&sack, &["alt-make".to_string()]);
		let solution = root.builddep(&reqs(&["make"]));
		assert_eq!(solution.installed().map(|p| p.name.as_str()).collect::<Vec<_>>(), vec!["alt-make"]);
	}

	#[test]
	fn highest_version_is_chosen() {
		let sack = Sack::new(vec![pkg("lib", "1.10-1", &[], &[]), pkg("lib", "1.9-1", &[], &[])], HashMap::new());
		let solution = buildroot(&sack, &[]).builddep(&reqs(&["lib"]));
		assert_eq!(solution.installed().next().unwrap().evr.version, "1.10");
	}

	#[test]
	fn rich_requirements_are_dropped() {
		assert_eq!(parse_requires(&["gcc".to_string(), "(a if b)".to_string()]).len(), 1);
	}
}
