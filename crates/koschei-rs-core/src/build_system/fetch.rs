//! Downloads repository metadata from the mirror of a repository source.

use std::collections::HashMap;

use super::*;
use crate::config::BuildSystemConfig;

pub struct HttpRepoFetcher {
	client: reqwest::blocking::Client,
	/// Source id to the top URL of its repositories.
	sources: HashMap<String, String>,
}

impl HttpRepoFetcher {
	pub fn new(config: &BuildSystemConfig) -> crate::Result<Self> {
		let client = reqwest::blocking::Client::builder()
			.https_only(config.https_only)
			.build()?;
		Ok(Self {
			client,
			sources: config.sources.clone(),
		})
	}

	/// `{top}/repos/{tag}/{id}/{arch}/{location}`
	pub fn url(&self, repo: &RepoDescriptor, arch: &str, location: &str) -> Option<String> {
		let top = self.sources.get(&repo.source)?;
		Some(format!("{}/repos/{}/{}/{}/{}", top.trim_end_matches('/'), repo.build_tag, repo.repo_id, arch, location))
	}
}

impl RepoFetcher for HttpRepoFetcher {
	fn fetch(&self, repo: &RepoDescriptor, arch: &str, location: &str) -> RemoteResult<Vec<u8>> {
		let Some(url) = self.url(repo, arch, location) else {
			return RemoteResult::TransientError(format!("no URL configured for repository source {}", repo.source));
		};

		log::debug!("Downloading {}", url);
		let response = match self.client.get(&url).send() {
			Ok(r) => r,
			Err(e) => return RemoteResult::TransientError(e.to_string()),
		};
		match response.status() {
			reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::GONE => RemoteResult::NotFound,
			s if !s.is_success() => RemoteResult::TransientError(format!("{} returned HTTP {}", url, s)),
			_ => match response.bytes() {
				Ok(b) => RemoteResult::Found(b.to_vec()),
				Err(e) => RemoteResult::TransientError(e.to_string()),
			},
		}
	}
}
