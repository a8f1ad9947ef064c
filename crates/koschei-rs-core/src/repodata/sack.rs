//! In-memory index over the binary packages of a repository.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Serialize, Deserialize};

use super::*;

/// Index of a package inside a [`Sack`]. Only valid for the sack that returned it.
pub type PackageId = usize;

/// Repository packages indexed for provides, file and name lookups.
///
/// Built once per repository generation and shared read-only between resolutions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sack {
	packages: Vec<RepoPackage>,
	by_provide: HashMap<String, Vec<PackageId>>,
	by_file: HashMap<String, Vec<PackageId>>,
	by_name: HashMap<String, Vec<PackageId>>,
	/// Newest source package of each name, their requires are build requires.
	sources: HashMap<String, RepoPackage>,
	groups: HashMap<String, Vec<String>>,
}

impl Sack {
	/// Builds the indices.
	///
	/// Source packages are kept apart, they can't be installed into a buildroot.
	/// A package present in several arch directories (`noarch`) is only kept once.
	pub fn new(packages: impl IntoIterator<Item = RepoPackage>, groups: HashMap<String, Vec<String>>) -> Self {
		let mut sack = Sack {
			groups,
			..Default::default()
		};

		let mut seen = HashSet::<Nevra>::new();
		for pkg in packages {
			if pkg.is_source() {
				match sack.sources.get(&pkg.name) {
					Some(existing) if existing.evr >= pkg.evr => {},
					_ => { sack.sources.insert(pkg.name.clone(), pkg); },
				}
				continue;
			}
			if !seen.insert(pkg.nevra()) {
				continue;
			}
			let id = sack.packages.len();
			sack.by_name.entry(pkg.name.clone()).or_default().push(id);
			sack.by_provide.entry(pkg.name.clone()).or_default().push(id);
			for p in &pkg.provides {
				let ids = sack.by_provide.entry(p.name.clone()).or_default();
				if ids.last() != Some(&id) {
					ids.push(id);
				}
			}
			for f in &pkg.files {
				sack.by_file.entry(f.clone()).or_default().push(id);
			}
			sack.packages.push(pkg);
		}

		log::trace!("Indexed {} packages", sack.packages.len());
		sack
	}

	/// Combines the per-arch sacks of a repository into one.
	pub fn merge(sacks: impl IntoIterator<Item = Sack>) -> Self {
		let mut packages = Vec::<RepoPackage>::new();
		let mut groups = HashMap::<String, Vec<String>>::new();
		for sack in sacks {
			packages.extend(sack.packages);
			packages.extend(sack.sources.into_values());
			for (id, members) in sack.groups {
				let merged = groups.entry(id).or_default();
				for m in members {
					if !merged.contains(&m) {
						merged.push(m);
					}
				}
			}
		}
		Sack::new(packages, groups)
	}

	pub fn len(&self) -> usize {
		self.packages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.packages.is_empty()
	}

	/// # Panics
	/// When `id` did not come from this sack.
	pub fn get(&self, id: PackageId) -> &RepoPackage {
		&self.packages[id]
	}

	pub fn packages(&self) -> impl Iterator<Item = (PackageId, &RepoPackage)> {
		self.packages.iter().enumerate()
	}

	/// Packages named exactly `name`.
	pub fn by_name(&self, name: &str) -> &[PackageId] {
		self.by_name.get(name).map(|v| v.as_slice()).unwrap_or_default()
	}

	/// Packages satisfying `req` through their name or provides.
	///
	/// An unversioned absolute path with no provider falls back to the file lists.
	pub fn what_provides(&self, req: &Reldep) -> Vec<PackageId> {
		let mut ids: Vec<PackageId> = self.by_provide.get(&req.name)
			.map(|ids| ids.iter().copied().filter(|&id| {
				let pkg = &self.packages[id];
				pkg.self_provide().satisfies(req) || pkg.provides.iter().any(|p| p.satisfies(req))
			}).collect())
			.unwrap_or_default();

		if ids.is_empty() && req.is_file() && req.constraint.is_none() {
			ids = self.by_file.get(&req.name).cloned().unwrap_or_default();
		}
		ids
	}

	/// Newest source package named `name`.
	pub fn source(&self, name: &str) -> Option<&RepoPackage> {
		self.sources.get(name)
	}

	/// Member package names of the comps group `id`.
	pub fn group(&self, id: &str) -> Option<&[String]> {
		self.groups.get(id).map(|v| v.as_slice())
	}

	/// Reads a sack written by [`Sack::save_to_disk`].
	///
	/// # Errors
	/// - [`IO`](crate::error::Error::IO) when opening the file.
	/// - [`Bincode`](crate::error::Error::Bincode) when the file is truncated or from an incompatible version.
	pub fn load_from_disk(path: impl AsRef<Path>) -> crate::Result<Self> {
		let file = std::io::BufReader::new(std::fs::File::open(path)?);
		Ok(bincode::deserialize_from(file)?)
	}

	/// Writes the sack next to the metadata it was built from so it can be loaded without parsing.
	///
	/// The file is written under a temporary name first, a reader never sees half a sack.
	pub fn save_to_disk(&self, path: impl AsRef<Path>) -> crate::Result<()> {
		let path = path.as_ref();
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let tmp = path.with_extension("bin.part");
		{
			let file = std::io::BufWriter::new(std::fs::File::create(&tmp)?);
			bincode::serialize_into(file, self)?;
		}
		std::fs::rename(&tmp, path)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pkg(name: &str, version: &str, arch: &str, provides: &[&str], files: &[&str]) -> RepoPackage {
		RepoPackage {
			name: name.to_string(),
			evr: Evr::new(0, version, "1"),
			arch: arch.to_string(),
			provides: provides.iter().map(|p| Reldep::parse(p).unwrap()).collect(),
			requires: vec![],
			conflicts: vec![],
			files: files.iter().map(|f| f.to_string()).collect(),
		}
	}

	fn sack() -> Sack {
		Sack::new(vec![
			pkg("gcc", "12", "x86_64", &["cc"], &["/usr/bin/gcc"]),
			pkg("gcc", "12", "src", &[], &[]),
			pkg("clang", "15", "x86_64", &["cc"], &["/usr/bin/clang"]),
			pkg("setup", "2", "noarch", &[], &["/etc/passwd"]),
			pkg("setup", "2", "noarch", &[], &["/etc/passwd"]),
		], HashMap::from([("build".to_string(), vec!["gcc".to_string()])]))
	}

	#[test] fn source_packages_are_excluded() { assert_eq!(sack().by_name("gcc").len(), 1) }
	#[test] fn source_packages_are_kept_apart() { assert_eq!(sack().source("gcc").unwrap().arch, "src") }
	#[test] fn noarch_duplicates_are_merged() { assert_eq!(sack().len(), 3) }
	#[test] fn virtual_provides_match_every_provider() { assert_eq!(sack().what_provides(&Reldep::unversioned("cc")).len(), 2) }
	#[test] fn versioned_provides_filter() { assert!(sack().what_provides(&Reldep::parse("gcc >= 13").unwrap()).is_empty()) }
	#[test] fn files_are_a_fallback() { assert_eq!(sack().what_provides(&Reldep::unversioned("/etc/passwd")), vec![2]) }
	#[test] fn unknown_requirement() { assert!(sack().what_provides(&Reldep::unversioned("/usr/bin/ld")).is_empty()) }
	#[test] fn groups_are_kept() { assert_eq!(sack().group("build"), Some(&["gcc".to_string()][..])) }

	#[test]
	fn merge_dedupes_noarch_and_groups() {
		let other = Sack::new(vec![
			pkg("setup", "2", "noarch", &[], &["/etc/passwd"]),
			pkg("glibc", "2.36", "i686", &[], &[]),
		], HashMap::from([("build".to_string(), vec!["gcc".to_string(), "glibc".to_string()])]));
		let merged = Sack::merge(vec![sack(), other]);
		assert_eq!(merged.len(), 4);
		assert_eq!(merged.group("build").unwrap().len(), 2);
	}

	#[test]
	fn save_and_load() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("cache").join("sack.bin");
		sack().save_to_disk(&path).unwrap();
		let loaded = Sack::load_from_disk(&path).unwrap();
		assert_eq!(loaded.len(), 3);
		assert_eq!(loaded.what_provides(&Reldep::unversioned("cc")).len(), 2);
	}
}
