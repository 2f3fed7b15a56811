//! HTTP client for the embeddings sidecar.
//!
//! The sidecar ranks statistical variables against free-text descriptions.
//! Its JSON contract is fixed; this module maps the sidecar's ranked lists
//! into resolve candidates.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{Result, ServiceError};
use crate::model::{ResolveCandidate, ResolveEntity, ResolveResponse};

const SEARCH_VARS_PATH: &str = "/api/search_vars";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct SearchVarsRequest<'a> {
	queries: &'a [String],
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SentenceScore {
	#[serde(default)]
	pub sentence: String,
	#[serde(default)]
	pub score: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResult {
	#[serde(rename = "SV", default)]
	pub sv: Vec<String>,
	#[serde(rename = "CosineScore", default)]
	pub cosine_score: Vec<f64>,
	#[serde(rename = "SV_to_Sentences", default)]
	pub sv_to_sentences: BTreeMap<String, Vec<SentenceScore>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SearchVarsResponse {
	#[serde(rename = "queryResults", default)]
	query_results: BTreeMap<String, QueryResult>,
}

pub struct EmbeddingsClient {
	url: Url,
	client: reqwest::Client,
}

impl EmbeddingsClient {
	pub fn new(base_url: &str) -> Result<Self> {
		let url = Url::parse(base_url)
			.and_then(|u| u.join(SEARCH_VARS_PATH))
			.map_err(|e| {
				ServiceError::InvalidArgument(format!(
					"bad embeddings URL {:?}: {}",
					base_url, e
				))
			})?;
		let client = reqwest::Client::builder()
			.timeout(DEFAULT_TIMEOUT)
			.build()
			.map_err(|e| ServiceError::Internal(format!("failed to build HTTP client: {}", e)))?;
		Ok(Self { url, client })
	}

	/// Resolve free-text descriptions to ranked variable candidates.
	pub async fn search_vars(&self, queries: &[String]) -> Result<ResolveResponse> {
		let response = self
			.client
			.post(self.url.clone())
			.json(&SearchVarsRequest { queries })
			.send()
			.await
			.map_err(|e| {
				ServiceError::Unavailable(format!("embeddings sidecar {}: {}", self.url, e))
			})?;
		let status = response.status();
		if !status.is_success() {
			return Err(ServiceError::Unavailable(format!(
				"embeddings sidecar {} returned {}",
				self.url, status
			)));
		}
		let body: SearchVarsResponse = response.json().await.map_err(|e| {
			ServiceError::Unavailable(format!(
				"embeddings sidecar {} sent bad body: {}",
				self.url, e
			))
		})?;

		// Entity order follows the request's query order.
		let mut entities = Vec::with_capacity(queries.len());
		for query in queries {
			let result = body.query_results.get(query).cloned().unwrap_or_default();
			entities.push(to_resolve_entity(query, &result));
		}
		Ok(ResolveResponse { entities })
	}
}

/// Map one ranked sidecar result into a resolve entity. Candidates keep
/// the sidecar's rank order; each carries its cosine score and top
/// matching sentence as metadata.
pub fn to_resolve_entity(query: &str, result: &QueryResult) -> ResolveEntity {
	let mut candidates = Vec::with_capacity(result.sv.len());
	for (index, dcid) in result.sv.iter().enumerate() {
		let mut metadata = BTreeMap::new();
		if let Some(score) = result.cosine_score.get(index) {
			metadata.insert("score".to_string(), format!("{:.6}", score));
		}
		if let Some(sentence) = result
			.sv_to_sentences
			.get(dcid)
			.and_then(|sentences| sentences.first())
		{
			metadata.insert("sentence".to_string(), sentence.sentence.clone());
		}
		let type_of = if dcid.contains("/topic/") {
			vec!["Topic".to_string()]
		} else {
			vec!["StatisticalVariable".to_string()]
		};
		candidates.push(ResolveCandidate {
			dcid: dcid.clone(),
			type_of,
			metadata,
			..Default::default()
		});
	}
	ResolveEntity {
		node: query.to_string(),
		candidates,
	}
}
