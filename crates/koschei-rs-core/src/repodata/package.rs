//! Various types associated with packages in a repository.

use std::cmp::Ordering;
use std::sync::OnceLock;

use serde::{Serialize, Deserialize};

use super::Evr;

/// Name, epoch, version, release and arch. The identity of a package artifact.
///
/// Unlike [`Evr`] equality is on the literal strings, two builds of `1.01` and `1.1` are different artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Nevra {
	pub name: String,
	pub epoch: i32,
	pub version: String,
	pub release: String,
	pub arch: String,
}

impl Nevra {
	pub fn new(name: impl Into<String>, epoch: i32, version: impl Into<String>, release: impl Into<String>, arch: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			epoch,
			version: version.into(),
			release: release.into(),
			arch: arch.into(),
		}
	}

	pub fn evr(&self) -> Evr {
		Evr::new(self.epoch, self.version.clone(), self.release.clone())
	}
}

impl std::fmt::Display for Nevra {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}-{}.{}", self.name, self.evr(), self.arch)
	}
}

/// Comparison operator of a versioned requirement or provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelOp {
	Eq,
	Lt,
	Le,
	Gt,
	Ge,
}

impl RelOp {
	fn parse(s: &str) -> Option<Self> {
		match s {
			"=" | "==" => Some(RelOp::Eq),
			"<" => Some(RelOp::Lt),
			"<=" => Some(RelOp::Le),
			">" => Some(RelOp::Gt),
			">=" => Some(RelOp::Ge),
			_ => None,
		}
	}

	fn has_less(self) -> bool { matches!(self, RelOp::Lt | RelOp::Le) }
	fn has_greater(self) -> bool { matches!(self, RelOp::Gt | RelOp::Ge) }
	fn has_equal(self) -> bool { matches!(self, RelOp::Eq | RelOp::Le | RelOp::Ge) }
}

impl std::fmt::Display for RelOp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			RelOp::Eq => "=",
			RelOp::Lt => "<",
			RelOp::Le => "<=",
			RelOp::Gt => ">",
			RelOp::Ge => ">=",
		})
	}
}

/// A relational dependency such as `glibc-devel >= 2.30` or `/usr/bin/make`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reldep {
	pub name: String,
	pub constraint: Option<(RelOp, Evr)>,
}

fn reldep_regex() -> &'static regex::Regex {
	static RE: OnceLock<regex::Regex> = OnceLock::new();
	RE.get_or_init(|| {
		regex::Regex::new(r"^\s*([^\s(<>=][^\s<>=]*)(?:\s*(<=|>=|==|=|<|>)\s*(\S+))?\s*$").expect("reldep regex is valid")
	})
}

impl Reldep {
	pub fn unversioned(name: impl Into<String>) -> Self {
		Self { name: name.into(), constraint: None }
	}

	pub fn versioned(name: impl Into<String>, op: RelOp, evr: Evr) -> Self {
		Self { name: name.into(), constraint: Some((op, evr)) }
	}

	/// Parses `name [op evr]`.
	///
	/// # Errors
	/// [`Parse`](crate::Error::Parse) for rich (boolean) dependencies and anything else that isn't a simple reldep.
	pub fn parse(s: &str) -> crate::Result<Self> {
		let caps = reldep_regex().captures(s)
			.ok_or_else(|| crate::Error::Parse(format!("unsupported requirement \"{}\"", s)))?;

		let name = caps[1].to_string();
		let constraint = match (caps.get(2), caps.get(3)) {
			(Some(op), Some(evr)) => {
				let op = RelOp::parse(op.as_str()).ok_or_else(|| crate::Error::Parse(format!("invalid operator in \"{}\"", s)))?;
				Some((op, Evr::parse(evr.as_str())?))
			},
			_ => None,
		};
		Ok(Self { name, constraint })
	}

	/// File requirements are matched against file lists when no package provides them.
	pub fn is_file(&self) -> bool {
		self.name.starts_with('/')
	}

	/// Checks if this provide satisfies the requirement `req`.
	///
	/// Follows rpm's range overlap rules, an unversioned side matches any version.
	pub fn satisfies(&self, req: &Reldep) -> bool {
		if self.name != req.name {
			return false;
		}

		let ((pop, pevr), (rop, revr)) = match (&self.constraint, &req.constraint) {
			(Some(p), Some(r)) => (p, r),
			_ => return true,
		};

		match pevr.cmp_for_match(revr) {
			Ordering::Less => pop.has_greater() || rop.has_less(),
			Ordering::Greater => pop.has_less() || rop.has_greater(),
			Ordering::Equal => {
				(pop.has_equal() && rop.has_equal())
					|| (pop.has_less() && rop.has_less())
					|| (pop.has_greater() && rop.has_greater())
			},
		}
	}
}

impl std::fmt::Display for Reldep {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match &self.constraint {
			Some((op, evr)) => write!(f, "{} {} {}", self.name, op, evr),
			None => f.write_str(&self.name),
		}
	}
}

impl std::str::FromStr for Reldep {
	type Err = crate::Error;
	fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

/// A binary or source package as listed in repository metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoPackage {
	pub name: String,
	pub evr: Evr,
	pub arch: String,
	pub provides: Vec<Reldep>,
	pub requires: Vec<Reldep>,
	pub conflicts: Vec<Reldep>,
	pub files: Vec<String>,
}

impl RepoPackage {
	pub fn nevra(&self) -> Nevra {
		Nevra::new(self.name.clone(), self.evr.epoch, self.evr.version.clone(), self.evr.release.clone(), self.arch.clone())
	}

	/// `name = evr`, every package provides itself.
	pub fn self_provide(&self) -> Reldep {
		Reldep::versioned(self.name.clone(), RelOp::Eq, self.evr.clone())
	}

	/// Checks the package's provides (including its own name) and files against `req`.
	pub fn provides_reldep(&self, req: &Reldep) -> bool {
		if self.self_provide().satisfies(req) {
			return true;
		}
		if self.provides.iter().any(|p| p.satisfies(req)) {
			return true;
		}
		req.is_file() && req.constraint.is_none() && self.files.iter().any(|f| f == &req.name)
	}

	pub fn is_source(&self) -> bool {
		self.arch == "src" || self.arch == "nosrc"
	}
}

impl std::hash::Hash for RepoPackage {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.nevra().hash(state);
	}
}

impl PartialEq for RepoPackage {
	fn eq(&self, other: &Self) -> bool {
		self.nevra() == other.nevra()
	}
}

impl Eq for RepoPackage {}

impl std::fmt::Display for RepoPackage {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}-{}.{}", self.name, self.evr, self.arch)
	}
}
