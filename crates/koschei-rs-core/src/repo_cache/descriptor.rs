use std::cmp::Ordering;

use serde::{Serialize, Deserialize};

/// Identifies one generation of a build tag's repository at a repository source.
///
/// Formats as `{source}-{tag}-{id}`, which is also the name of its cache directory.
/// The source id can't contain `-`, the tag may.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoDescriptor {
	pub source: String,
	pub build_tag: String,
	pub repo_id: i64,
}

impl RepoDescriptor {
	pub fn new(source: impl Into<String>, build_tag: impl Into<String>, repo_id: i64) -> Self {
		Self {
			source: source.into(),
			build_tag: build_tag.into(),
			repo_id,
		}
	}

	/// Whether descriptors of `source` survive formatting and parsing back.
	pub fn is_valid_source(source: &str) -> bool {
		!source.is_empty() && !source.contains('-')
	}
}

/// Generations sort first, source and tag only break ties.
impl Ord for RepoDescriptor {
	fn cmp(&self, other: &Self) -> Ordering {
		self.repo_id.cmp(&other.repo_id)
			.then_with(|| self.source.cmp(&other.source))
			.then_with(|| self.build_tag.cmp(&other.build_tag))
	}
}

impl PartialOrd for RepoDescriptor {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl std::fmt::Display for RepoDescriptor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}-{}-{}", self.source, self.build_tag, self.repo_id)
	}
}

impl std::str::FromStr for RepoDescriptor {
	type Err = crate::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let invalid = || crate::Error::Parse(format!("\"{}\" is not a repository descriptor", s));

		let (rest, id) = s.rsplit_once('-').ok_or_else(invalid)?;
		if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
			return Err(invalid());
		}
		let (source, tag) = rest.split_once('-').ok_or_else(invalid)?;
		if source.is_empty() || tag.is_empty() {
			return Err(invalid());
		}
		let repo_id = id.parse::<i64>().map_err(|_| invalid())?;

		Ok(Self::new(source, tag, repo_id))
	}
}
