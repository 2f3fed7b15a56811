//! HTTP client for the remote peer gateway.
//!
//! The peer speaks the same `/v2/*` JSON contract this gateway serves, so
//! its responses merge directly with local source responses. The peer is
//! always last-priority aux input; a peer failure fails the request like
//! any other source failure.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::errors::{Result, ServiceError};
use crate::model::{
	NodeRequest, NodeResponse, NodeSearchRequest, NodeSearchResponse, ObservationRequest,
	ObservationResponse, ResolveRequest, ResolveResponse,
};
use crate::observability::metrics;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RemoteMixer {
	base_url: Url,
	client: reqwest::Client,
}

impl RemoteMixer {
	/// Build a client for the given peer domain, e.g.
	/// `https://api.datahub.example.org`.
	pub fn new(domain: &str) -> Result<Self> {
		let base_url = Url::parse(domain).map_err(|e| {
			ServiceError::InvalidArgument(format!("bad remote mixer domain {:?}: {}", domain, e))
		})?;
		let client = reqwest::Client::builder()
			.timeout(DEFAULT_TIMEOUT)
			.build()
			.map_err(|e| ServiceError::Internal(format!("failed to build HTTP client: {}", e)))?;
		Ok(Self { base_url, client })
	}

	pub async fn observation(&self, req: &ObservationRequest) -> Result<ObservationResponse> {
		self.post("/v2/observation", req).await
	}

	pub async fn node(&self, req: &NodeRequest) -> Result<NodeResponse> {
		self.post("/v2/node", req).await
	}

	pub async fn node_search(&self, req: &NodeSearchRequest) -> Result<NodeSearchResponse> {
		self.post("/v2/node_search", req).await
	}

	pub async fn resolve(&self, req: &ResolveRequest) -> Result<ResolveResponse> {
		self.post("/v2/resolve", req).await
	}

	async fn post<Req, Resp>(&self, path: &str, req: &Req) -> Result<Resp>
	where
		Req: Serialize + Sync,
		Resp: DeserializeOwned,
	{
		let url = self.base_url.join(path).map_err(|e| {
			ServiceError::Internal(format!("bad remote mixer path {:?}: {}", path, e))
		})?;
		metrics::record_remote_call();

		let response = self
			.client
			.post(url.clone())
			.json(req)
			.send()
			.await
			.map_err(|e| {
				metrics::record_remote_failure();
				ServiceError::Unavailable(format!("remote mixer {}: {}", url, e))
			})?;

		let status = response.status();
		if !status.is_success() {
			metrics::record_remote_failure();
			return Err(ServiceError::Unavailable(format!(
				"remote mixer {} returned {}",
				url, status
			)));
		}

		response.json::<Resp>().await.map_err(|e| {
			metrics::record_remote_failure();
			ServiceError::Unavailable(format!("remote mixer {} sent bad body: {}", url, e))
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_bad_domain() {
		assert!(matches!(
			RemoteMixer::new("not a url"),
			Err(ServiceError::InvalidArgument(_))
		));
	}

	#[test]
	fn joins_endpoint_paths() {
		let mixer = RemoteMixer::new("https://peer.example.org").expect("client");
		let url = mixer.base_url.join("/v2/observation").expect("join");
		assert_eq!(url.as_str(), "https://peer.example.org/v2/observation");
	}
}
