//! # Repository metadata
//!
//! Package metadata of a repository generation as downloaded from the build system's mirror,
//! and the [`Sack`] index dependency resolution queries.
//!
//! Each architecture of a repository lives in its own directory:
//! ```text
//! {arch}/repodata/repomd.json
//! {arch}/repodata/primary.json.gz
//! {arch}/repodata/filelists.json.gz
//! {arch}/repodata/group.json
//! {arch}/cache/sack.bin
//! ```

mod evr;
pub use evr::Evr;
pub use evr::rpmvercmp;

mod package;
pub use package::Nevra;
pub use package::RelOp;
pub use package::Reldep;
pub use package::RepoPackage;

mod sack;
pub use sack::Sack;
pub use sack::PackageId;

pub mod import;
