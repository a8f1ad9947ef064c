//! Loading repository metadata files into a [`Sack`].

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::{Serialize, Deserialize, de::DeserializeOwned};

use super::*;

/// Name of the index file every arch directory starts with, it lists the remaining files.
pub const REPOMD: &str = "repomd.json";

/// One metadata file listed in `repomd.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMdEntry {
	/// `primary`, `filelists` or `group`.
	#[serde(rename = "type")]
	pub kind: String,
	/// Path relative to the arch directory, `repodata/primary.json.gz`
	pub location: String,
	pub sha256: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoMd(pub Vec<RepoMdEntry>);

impl RepoMd {
	pub fn from_slice(data: &[u8]) -> crate::Result<Self> {
		Ok(serde_json::from_slice(data)?)
	}

	pub fn entry(&self, kind: &str) -> Option<&RepoMdEntry> {
		self.0.iter().find(|e| e.kind == kind)
	}

	pub fn entries(&self) -> impl Iterator<Item = &RepoMdEntry> {
		self.0.iter()
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryEntry {
	pub name: String,
	#[serde(default)]
	pub epoch: i32,
	pub version: String,
	#[serde(default)]
	pub release: String,
	pub arch: String,
	#[serde(default)]
	pub provides: Vec<String>,
	#[serde(default)]
	pub requires: Vec<String>,
	#[serde(default)]
	pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilelistEntry {
	pub name: String,
	#[serde(default)]
	pub epoch: i32,
	pub version: String,
	#[serde(default)]
	pub release: String,
	pub arch: String,
	#[serde(default)]
	pub files: Vec<String>,
}

impl FilelistEntry {
	fn nevra(&self) -> Nevra {
		Nevra::new(self.name.clone(), self.epoch, self.version.clone(), self.release.clone(), self.arch.clone())
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupFile {
	#[serde(default)]
	pub groups: HashMap<String, Vec<String>>,
}

/// Parses requirement strings, dropping the ones the solver can't express.
fn parse_reldeps(package: &str, deps: &[String]) -> Vec<Reldep> {
	deps.iter().filter_map(|d| match Reldep::parse(d) {
		Ok(r) => Some(r),
		Err(e) => {
			log::debug!("Ignoring dependency of {}: {}", package, e);
			None
		},
	}).collect()
}

impl PrimaryEntry {
	pub fn into_package(self, files: Vec<String>) -> RepoPackage {
		RepoPackage {
			provides: parse_reldeps(&self.name, &self.provides),
			requires: parse_reldeps(&self.name, &self.requires),
			conflicts: parse_reldeps(&self.name, &self.conflicts),
			evr: Evr::new(self.epoch, self.version, self.release),
			name: self.name,
			arch: self.arch,
			files,
		}
	}
}

/// Reads a gzip compressed JSON document.
pub fn read_gz_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> crate::Result<T> {
	let file = std::io::BufReader::new(std::fs::File::open(path)?);
	let mut gz = flate2::bufread::GzDecoder::new(file);
	let mut v = Vec::<u8>::new();
	gz.read_to_end(&mut v)?;
	Ok(serde_json::from_slice(&v)?)
}

fn primary_schema() -> jsonschema::JSONSchema {
	jsonschema::JSONSchema::compile(&serde_json::from_str(include_str!("primary.schema.json")).expect("schema isn't valid json")).expect("schema is a valid draft 7 schema")
}

/// Reads the primary, filelists and group metadata of one arch directory.
///
/// # Parameters
/// - `arch_dir` - Directory holding `repodata/`.
/// - `do_validation` - Check every primary entry against the schema, entries that don't match are skipped.
///
/// # Errors
/// - [`IO`](crate::error::Error::IO) when a listed file is missing.
/// - [`Parse`](crate::error::Error::Parse) when `repomd.json` doesn't list primary metadata.
pub fn load_arch(arch_dir: &Path, do_validation: bool) -> crate::Result<Sack> {
	let repodata = arch_dir.join("repodata");
	let repomd = RepoMd::from_slice(&std::fs::read(repodata.join(REPOMD))?)?;

	let primary = repomd.entry("primary")
		.ok_or_else(|| crate::Error::Parse(format!("{} has no primary metadata", arch_dir.display())))?;

	let entries: Vec<PrimaryEntry> = if do_validation {
		let schema = primary_schema();
		let raw: Vec<serde_json::Value> = read_gz_json(arch_dir.join(&primary.location))?;
		raw.into_iter().enumerate().filter_map(|(i, v)| {
			if !schema.is_valid(&v) {
				log::warn!("Couldn't process entry {} in {}, does not match schema", i, primary.location);
				return None;
			}
			match serde_json::from_value(v) {
				Ok(e) => Some(e),
				Err(e) => {
					log::warn!("Couldn't process entry {} in {}: {}", i, primary.location, e);
					None
				},
			}
		}).collect()
	} else {
		read_gz_json(arch_dir.join(&primary.location))?
	};

	let mut files = HashMap::<Nevra, Vec<String>>::new();
	if let Some(filelists) = repomd.entry("filelists") {
		let lists: Vec<FilelistEntry> = read_gz_json(arch_dir.join(&filelists.location))?;
		for l in lists {
			files.insert(l.nevra(), l.files);
		}
	}

	let groups = match repomd.entry("group") {
		Some(group) => serde_json::from_slice::<GroupFile>(&std::fs::read(arch_dir.join(&group.location))?)?.groups,
		None => HashMap::new(),
	};

	let packages = entries.into_iter().map(|e| {
		let nevra = Nevra::new(e.name.clone(), e.epoch, e.version.clone(), e.release.clone(), e.arch.clone());
		let pkg_files = files.remove(&nevra).unwrap_or_default();
		e.into_package(pkg_files)
	});

	Ok(Sack::new(packages, groups))
}

/// Location of the parsed index of an arch directory.
pub fn sack_cache_path(arch_dir: &Path) -> std::path::PathBuf {
	arch_dir.join("cache").join("sack.bin")
}

/// Loads one arch directory, using the cached index when present and writing it when not.
pub fn load_arch_cached(arch_dir: &Path, do_validation: bool) -> crate::Result<Sack> {
	let cache = sack_cache_path(arch_dir);
	if cache.exists() {
		match Sack::load_from_disk(&cache) {
			Ok(sack) => return Ok(sack),
			Err(e) => log::warn!("Discarding unreadable sack cache {}: {}", cache.display(), e),
		}
	}

	let sack = load_arch(arch_dir, do_validation)?;
	if let Err(e) = sack.save_to_disk(&cache) {
		/* The sack is still usable, the next load just parses again */
		log::warn!("Failed to write sack cache {}: {}", cache.display(), e);
	}
	Ok(sack)
}

/// Loads every arch of a downloaded repository into a single sack.
pub fn load_repo(repo_dir: &Path, arches: &[String], do_validation: bool) -> crate::Result<Sack> {
	let mut sacks = Vec::with_capacity(arches.len());
	for arch in arches {
		sacks.push(load_arch_cached(&repo_dir.join(arch), do_validation)?);
	}
	Ok(Sack::merge(sacks))
}
