//! Epoch-version-release triples and their ordering.
//!
//! Versions are compared segment by segment the same way `rpmvercmp` does it:
//! - the string is split into runs of digits and runs of letters, everything else only separates runs.
//! - numeric runs compare as numbers (leading zeroes are ignored) and are newer than alpha runs.
//! - `~` sorts before anything, even the end of the string. `1.0~rc1 < 1.0`
//! - `^` sorts after the end of the string but before any other run. `1.0 < 1.0^git1 < 1.0.1`

use std::cmp::Ordering;

use serde::{Serialize, Deserialize};

/// Compares two version (or release) strings.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
	if a == b {
		return Ordering::Equal;
	}

	let a = a.as_bytes();
	let b = b.as_bytes();
	let (mut one, mut two) = (0usize, 0usize);

	fn is_separator(c: u8) -> bool {
		!c.is_ascii_alphanumeric() && c != b'~' && c != b'^'
	}

	while one < a.len() || two < b.len() {
		while one < a.len() && is_separator(a[one]) { one += 1; }
		while two < b.len() && is_separator(b[two]) { two += 1; }

		let c1 = a.get(one).copied();
		let c2 = b.get(two).copied();

		/* Tilde sorts before everything else */
		if c1 == Some(b'~') || c2 == Some(b'~') {
			if c1 != Some(b'~') { return Ordering::Greater; }
			if c2 != Some(b'~') { return Ordering::Less; }
			one += 1;
			two += 1;
			continue;
		}

		/* Caret is like tilde except a base version ending here is the lower one */
		if c1 == Some(b'^') || c2 == Some(b'^') {
			if c1.is_none() { return Ordering::Less; }
			if c2.is_none() { return Ordering::Greater; }
			if c1 != Some(b'^') { return Ordering::Greater; }
			if c2 != Some(b'^') { return Ordering::Less; }
			one += 1;
			two += 1;
			continue;
		}

		if c1.is_none() || c2.is_none() {
			break;
		}

		let (mut end1, mut end2) = (one, two);
		let is_num = a[one].is_ascii_digit();
		if is_num {
			while end1 < a.len() && a[end1].is_ascii_digit() { end1 += 1; }
			while end2 < b.len() && b[end2].is_ascii_digit() { end2 += 1; }
		} else {
			while end1 < a.len() && a[end1].is_ascii_alphabetic() { end1 += 1; }
			while end2 < b.len() && b[end2].is_ascii_alphabetic() { end2 += 1; }
		}

		/* Segments of different types, numeric is always newer */
		if end2 == two {
			return if is_num { Ordering::Greater } else { Ordering::Less };
		}

		let mut seg1 = &a[one..end1];
		let mut seg2 = &b[two..end2];

		if is_num {
			while seg1.first() == Some(&b'0') { seg1 = &seg1[1..]; }
			while seg2.first() == Some(&b'0') { seg2 = &seg2[1..]; }

			/* The longer number wins without looking at the digits */
			match seg1.len().cmp(&seg2.len()) {
				Ordering::Equal => {},
				ord => return ord,
			}
		}

		match seg1.cmp(seg2) {
			Ordering::Equal => {},
			ord => return ord,
		}

		one = end1;
		two = end2;
	}

	/* Every segment compared equal, only the separators differed */
	if one >= a.len() && two >= b.len() {
		return Ordering::Equal;
	}

	/* Whichever still has characters left is newer */
	if one >= a.len() { Ordering::Less } else { Ordering::Greater }
}

/// Epoch, version and release of a package.
///
/// # Eq & Ord
/// Equality follows the ordering so `1.01` and `1.1` are equal versions.
/// For exact identity of a package use [`Nevra`](super::Nevra) which compares the raw strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evr {
	pub epoch: i32,
	pub version: String,
	/// Empty when unknown, an empty release matches any release when checking requirements.
	pub release: String,
}

impl Evr {
	pub fn new(epoch: i32, version: impl Into<String>, release: impl Into<String>) -> Self {
		Self { epoch, version: version.into(), release: release.into() }
	}

	/// Parses `[epoch:]version[-release]`
	pub fn parse(s: &str) -> crate::Result<Self> {
		let s = s.trim();
		if s.is_empty() {
			return Err(crate::Error::Parse("empty EVR".to_string()));
		}

		let (epoch, rest) = match s.split_once(':') {
			Some((e, rest)) => {
				let epoch = e.parse::<i32>().map_err(|_| crate::Error::Parse(format!("invalid epoch in \"{}\"", s)))?;
				(epoch, rest)
			},
			None => (0, s),
		};

		let (version, release) = match rest.rsplit_once('-') {
			Some((v, r)) => (v, r),
			None => (rest, ""),
		};

		if version.is_empty() {
			return Err(crate::Error::Parse(format!("missing version in \"{}\"", s)));
		}

		Ok(Self::new(epoch, version, release))
	}

	/// Compares only what both sides define, a missing release on either side is ignored.
	pub fn cmp_for_match(&self, other: &Self) -> Ordering {
		match self.epoch.cmp(&other.epoch) {
			Ordering::Equal => {},
			ord => return ord,
		}
		match rpmvercmp(&self.version, &other.version) {
			Ordering::Equal => {},
			ord => return ord,
		}
		if self.release.is_empty() || other.release.is_empty() {
			Ordering::Equal
		} else {
			rpmvercmp(&self.release, &other.release)
		}
	}
}

impl Ord for Evr {
	fn cmp(&self, other: &Self) -> Ordering {
		self.epoch.cmp(&other.epoch)
			.then_with(|| rpmvercmp(&self.version, &other.version))
			.then_with(|| rpmvercmp(&self.release, &other.release))
	}
}

impl PartialOrd for Evr {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl PartialEq for Evr {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Evr {}

impl std::fmt::Display for Evr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.epoch != 0 {
			write!(f, "{}:", self.epoch)?;
		}
		write!(f, "{}", self.version)?;
		if !self.release.is_empty() {
			write!(f, "-{}", self.release)?;
		}
		Ok(())
	}
}

impl std::str::FromStr for Evr {
	type Err = crate::Error;
	fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Acceptance table of rpm's own `rpmvercmp` tests.
	const RPMVERCMP_CASES: &[(&str, &str, i32)] = &[
		("1.0", "1.0", 0),
		("1.0", "2.0", -1),
		("2.0", "1.0", 1),

		("2.0.1", "2.0.1", 0),
		("2.0", "2.0.1", -1),
		("2.0.1", "2.0", 1),

		("2.0.1a", "2.0.1a", 0),
		("2.0.1a", "2.0.1", 1),
		("2.0.1", "2.0.1a", -1),

		("5.5p1", "5.5p1", 0),
		("5.5p1", "5.5p2", -1),
		("5.5p2", "5.5p1", 1),

		("5.5p10", "5.5p10", 0),
		("5.5p1", "5.5p10", -1),
		("5.5p10", "5.5p1", 1),

		("10xyz", "10.1xyz", -1),
		("10.1xyz", "10xyz", 1),

		("xyz10", "xyz10", 0),
		("xyz10", "xyz10.1", -1),
		("xyz10.1", "xyz10", 1),

		("xyz.4", "xyz.4", 0),
		("xyz.4", "8", -1),
		("8", "xyz.4", 1),
		("xyz.4", "2", -1),
		("2", "xyz.4", 1),

		("5.5p2", "5.6p1", -1),
		("5.6p1", "5.5p2", 1),

		("5.6p1", "6.5p1", -1),
		("6.5p1", "5.6p1", 1),

		("6.0.rc1", "6.0", 1),
		("6.0", "6.0.rc1", -1),

		("10b2", "10a1", 1),
		("10a2", "10b2", -1),

		("1.0aa", "1.0aa", 0),
		("1.0a", "1.0aa", -1),
		("1.0aa", "1.0a", 1),

		("10.0001", "10.0001", 0),
		("10.0001", "10.1", 0),
		("10.1", "10.0001", 0),
		("10.0001", "10.0039", -1),
		("10.0039", "10.0001", 1),

		("4.999.9", "5.0", -1),
		("5.0", "4.999.9", 1),

		("20101121", "20101121", 0),
		("20101121", "20101122", -1),
		("20101122", "20101121", 1),

		("2_0", "2_0", 0),
		("2.0", "2_0", 0),
		("2_0", "2.0", 0),

		("a", "a", 0),
		("a+", "a+", 0),
		("a+", "a_", 0),
		("a_", "a+", 0),
		("+a", "+a", 0),
		("+a", "_a", 0),
		("_a", "+a", 0),
		("+_", "+_", 0),
		("_+", "+_", 0),
		("_+", "_", 0),
		("+", "_", 0),
		("_", "+", 0),

		("1.0~rc1", "1.0~rc1", 0),
		("1.0~rc1", "1.0", -1),
		("1.0", "1.0~rc1", 1),
		("1.0~rc1", "1.0~rc2", -1),
		("1.0~rc2", "1.0~rc1", 1),
		("1.0~rc1~git123", "1.0~rc1~git123", 0),
		("1.0~rc1~git123", "1.0~rc1", -1),
		("1.0~rc1", "1.0~rc1~git123", 1),

		("1.0^", "1.0^", 0),
		("1.0^", "1.0", 1),
		("1.0", "1.0^", -1),
		("1.0^git1", "1.0^git1", 0),
		("1.0^git1", "1.0", 1),
		("1.0", "1.0^git1", -1),
		("1.0^git1", "1.0^git2", -1),
		("1.0^git2", "1.0^git1", 1),
		("1.0^git1", "1.01", -1),
		("1.01", "1.0^git1", 1),
		("1.0^20160101", "1.0^20160101", 0),
		("1.0^20160101", "1.0.1", -1),
		("1.0.1", "1.0^20160101", 1),
		("1.0^20160101^git1", "1.0^20160101^git1", 0),
		("1.0^20160102", "1.0^20160101^git1", 1),
		("1.0^20160101^git1", "1.0^20160102", -1),
		("1.0~rc1^git1", "1.0~rc1^git1", 0),
		("1.0~rc1^git1", "1.0~rc1", 1),
		("1.0~rc1", "1.0~rc1^git1", -1),
		("1.0^git1~pre", "1.0^git1~pre", 0),
		("1.0^git1", "1.0^git1~pre", 1),
		("1.0^git1~pre", "1.0^git1", -1),

		("1.1.\u{3b1}", "1.1.\u{3b1}", 0),
		("1.1.\u{3b1}", "1.1.\u{3b2}", 0),
		("1.1.\u{3b2}", "1.1.\u{3b1}", 0),
		("1.1.\u{3b1}\u{3b1}", "1.1.\u{3b1}", 0),
		("1.1.\u{3b1}", "1.1.\u{3b2}\u{3b2}", 0),
		("1.1.\u{3b1}\u{3b1}", "1.1.\u{3b2}\u{3b2}", 0),
	];

	fn ordering(n: i32) -> Ordering {
		n.cmp(&0)
	}

	#[test]
	fn rpmvercmp_table() {
		for (a, b, expected) in RPMVERCMP_CASES {
			assert_eq!(rpmvercmp(a, b), ordering(*expected), "rpmvercmp({:?}, {:?})", a, b);
		}
	}

	#[test]
	fn rpmvercmp_is_antisymmetric() {
		for (a, b, _) in RPMVERCMP_CASES {
			assert_eq!(rpmvercmp(a, b), rpmvercmp(b, a).reverse(), "rpmvercmp({:?}, {:?})", a, b);
		}
	}

	#[test]
	fn rpmvercmp_is_reflexive() {
		for (a, b, _) in RPMVERCMP_CASES {
			assert_eq!(rpmvercmp(a, a), Ordering::Equal);
			assert_eq!(rpmvercmp(b, b), Ordering::Equal);
		}
	}

	#[test] fn evr_epoch_wins() { assert!(Evr::parse("1:1.0-1").unwrap() > Evr::parse("9.9-9").unwrap()) }
	#[test] fn evr_release_breaks_ties() { assert!(Evr::parse("1.0-2").unwrap() > Evr::parse("1.0-1").unwrap()) }
	#[test] fn evr_parse_without_release() { assert_eq!(Evr::parse("2:8.b").unwrap().release, "") }
	#[test] fn evr_parse_rejects_bad_epoch() { assert!(Evr::parse("x:1.0").is_err()) }
	#[test] fn evr_display_omits_zero_epoch() { assert_eq!(Evr::new(0, "1.0", "1.fc22").to_string(), "1.0-1.fc22") }
	#[test] fn evr_display_keeps_epoch() { assert_eq!(Evr::new(2, "8.b", "").to_string(), "2:8.b") }
	#[test] fn evr_match_ignores_missing_release() { assert_eq!(Evr::parse("1.0").unwrap().cmp_for_match(&Evr::parse("1.0-5").unwrap()), Ordering::Equal) }
}
