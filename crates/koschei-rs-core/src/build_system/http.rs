//! JSON-RPC client for the build system hub.
//!
//! Every call is a `POST` of `{"method": ..., "params": [...]}` answered by either `{"result": ...}` or
//! `{"fault": {"code": ..., "message": ...}}`. Batches use the `multiCall` method whose result holds one answer per call.

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::json;

use super::*;
use crate::config::{BuildOptions, BuildSystemConfig};

const NOT_FOUND_FAULT: &str = "not_found";
const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct Fault {
	code: String,
	#[serde(default)]
	message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
	#[serde(default)]
	result: Option<serde_json::Value>,
	#[serde(default)]
	fault: Option<Fault>,
}

impl RpcResponse {
	fn decode<T: DeserializeOwned>(self, method: &str) -> RemoteResult<T> {
		match (self.fault, self.result) {
			(Some(fault), _) if fault.code == NOT_FOUND_FAULT => RemoteResult::NotFound,
			(Some(fault), _) => RemoteResult::TransientError(format!("{} fault {}: {}", method, fault.code, fault.message)),
			(None, None) => RemoteResult::NotFound,
			(None, Some(value)) => match serde_json::from_value(value) {
				Ok(v) => RemoteResult::Found(v),
				Err(e) => RemoteResult::TransientError(format!("{} returned an unexpected result: {}", method, e)),
			},
		}
	}
}

pub struct HttpBuildSystem {
	client: reqwest::blocking::Client,
	hub_url: String,
	opts: BuildOptions,
}

impl HttpBuildSystem {
	/// # Errors
	/// - [`Reqwest`](crate::error::Error::Reqwest) when the HTTP client can't be created.
	pub fn new(config: &BuildSystemConfig) -> crate::Result<Self> {
		let client = reqwest::blocking::Client::builder()
			.https_only(config.https_only)
			.timeout(TIMEOUT)
			.build()?;
		Ok(Self {
			client,
			hub_url: config.hub_url.clone(),
			opts: config.build_opts.clone(),
		})
	}

	fn send(&self, method: &str, params: serde_json::Value) -> RemoteResult<RpcResponse> {
		log::trace!("Calling {} on {}", method, self.hub_url);
		let response = match self.client.post(&self.hub_url).json(&json!({ "method": method, "params": params })).send() {
			Ok(r) => r,
			Err(e) => return RemoteResult::TransientError(format!("{}: {}", method, e)),
		};

		let status = response.status();
		if status == reqwest::StatusCode::NOT_FOUND {
			return RemoteResult::NotFound;
		}
		if !status.is_success() {
			return RemoteResult::TransientError(format!("{} returned HTTP {}", method, status));
		}

		match response.json::<RpcResponse>() {
			Ok(r) => RemoteResult::Found(r),
			Err(e) => RemoteResult::TransientError(format!("{}: {}", method, e)),
		}
	}

	fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> RemoteResult<T> {
		match self.send(method, params) {
			RemoteResult::Found(r) => r.decode(method),
			RemoteResult::NotFound => RemoteResult::NotFound,
			RemoteResult::TransientError(e) => RemoteResult::TransientError(e),
		}
	}

	/// Sends every call in one request.
	fn multicall<T: DeserializeOwned>(&self, method: &str, params: Vec<serde_json::Value>) -> Vec<RemoteResult<T>> {
		if params.is_empty() {
			return Vec::new();
		}
		let count = params.len();
		let calls: Vec<serde_json::Value> = params.into_iter().map(|p| json!({ "method": method, "params": p })).collect();

		match self.call::<Vec<RpcResponse>>("multiCall", json!([calls])) {
			RemoteResult::Found(responses) if responses.len() == count => {
				responses.into_iter().map(|r| r.decode(method)).collect()
			},
			RemoteResult::Found(responses) => {
				let e = format!("multiCall of {} returned {} results for {} calls", method, responses.len(), count);
				(0..count).map(|_| RemoteResult::TransientError(e.clone())).collect()
			},
			RemoteResult::NotFound => (0..count).map(|_| RemoteResult::NotFound).collect(),
			RemoteResult::TransientError(e) => (0..count).map(|_| RemoteResult::TransientError(e.clone())).collect(),
		}
	}
}

impl BuildSystem for HttpBuildSystem {
	fn latest_repo(&self, build_tag: &str) -> RemoteResult<RepoInfo> {
		self.call("getRepo", json!([build_tag, { "state": "ready" }]))
	}

	fn build_group(&self, build_tag: &str, group: &str, repo_id: i64) -> RemoteResult<Vec<String>> {
		self.call("getBuildGroup", json!([build_tag, group, repo_id]))
	}

	fn build_requires(&self, sources: &[SourceNvr]) -> Vec<RemoteResult<Vec<String>>> {
		self.multicall("getBuildRequires", sources.iter().map(|s| json!([s.to_string()])).collect())
	}

	fn build_arches(&self, build_tag: &str) -> RemoteResult<Vec<String>> {
		self.call("getBuildArches", json!([build_tag]))
	}

	fn build_load(&self, arches: &[String]) -> RemoteResult<f64> {
		self.call("getLoad", json!([arches]))
	}

	fn latest_source(&self, build_tag: &str, package: &str) -> RemoteResult<SourceArtifact> {
		self.call("getLatestSource", json!([build_tag, package]))
	}

	fn submit_build(&self, target: &str, source: &SourceArtifact, arches: &[String]) -> RemoteResult<i64> {
		self.call("build", json!([
			source.url,
			target,
			{
				"scratch": self.opts.scratch,
				"priority": self.opts.priority,
				"arch_override": arches.join(" "),
			},
		]))
	}

	fn task_info(&self, task_ids: &[i64]) -> Vec<RemoteResult<TaskInfo>> {
		self.multicall("getTaskInfo", task_ids.iter().map(|id| json!([id])).collect())
	}
}
