//! Request handlers: thin orchestration over the dispatcher, calculator,
//! recognizer, and sidecar clients. Each handler picks the data path from
//! the request shape and leaves the heavy lifting to the subsystems.

pub mod fetch;

use axum::extract::State;
use axum::Json;

use crate::calc;
use crate::errors::{Result, ServiceError};
use crate::model::{
	DcidOrExpression, NodeRequest, NodeResponse, NodeSearchRequest, NodeSearchResponse,
	ObservationRequest, ObservationResponse, RecognizePlacesRequest, RecognizePlacesResponse,
	ResolveRequest, ResolveResponse,
};
use crate::observability::metrics;
use crate::parse;
use crate::recognize;
use crate::state::AppState;

/// Default node page size when the request does not set a limit.
const DEFAULT_PAGE_SIZE: i32 = 500;

pub async fn observation(
	State(state): State<AppState>,
	Json(req): Json<ObservationRequest>,
) -> Result<Json<ObservationResponse>> {
	metrics::record_request("observation");

	// A formula-shaped variable is a derived-series request: fetch the
	// formula's leaf variables and evaluate, labeling the result with the
	// formula itself.
	if !req.variable.expression.is_empty() {
		let formula = calc::parse_formula(&req.variable.expression)?;
		let leaf_req = ObservationRequest {
			variable: DcidOrExpression::from_dcids(formula.stat_vars.clone()),
			..req.clone()
		};
		let leaf_resp = fetch::observation(&state, &leaf_req).await?;
		let evaluated = calc::evaluate(&formula.root, &leaf_resp)?;
		let result = calc::finalize(
			evaluated,
			&req.variable.expression,
			state.facet_ranker.as_ref(),
		);
		return Ok(Json(result));
	}

	let response = fetch::observation(&state, &req).await?;
	let fetcher = fetch::DispatchFetcher::new(state.clone());
	let filled = calc::fill_observation_holes(
		&fetcher,
		&state.cache.sv_formulas,
		state.facet_ranker.as_ref(),
		&req,
		response,
	)
	.await?;
	Ok(Json(filled))
}

pub async fn resolve(
	State(state): State<AppState>,
	Json(req): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>> {
	metrics::record_request("resolve");

	if req.nodes.is_empty() {
		return Err(ServiceError::InvalidArgument(
			"resolve request needs at least one node".into(),
		));
	}
	let id_property = req
		.property
		.trim()
		.strip_prefix("<-")
		.and_then(|p| p.strip_suffix("->dcid"))
		.ok_or_else(|| {
			ServiceError::InvalidArgument(format!(
				"invalid resolve property {:?}",
				req.property
			))
		})?;

	match id_property {
		"description" => {
			let embeddings = state.embeddings.as_ref().ok_or_else(|| {
				ServiceError::Unavailable("embeddings sidecar not configured".into())
			})?;
			Ok(Json(embeddings.search_vars(&req.nodes).await?))
		}
		"geoCoordinate" => {
			// Reject bad coordinate literals before fanning out.
			for node in &req.nodes {
				parse::parse_coordinate_literal(node)?;
			}
			Ok(Json(state.dispatcher.resolve(&req).await?))
		}
		_ => Ok(Json(state.dispatcher.resolve(&req).await?)),
	}
}

pub async fn node(
	State(state): State<AppState>,
	Json(req): Json<NodeRequest>,
) -> Result<Json<NodeResponse>> {
	metrics::record_request("node");

	if req.nodes.is_empty() {
		return Err(ServiceError::InvalidArgument(
			"node request needs at least one node".into(),
		));
	}
	if !req.property.starts_with("->") && !req.property.starts_with("<-") {
		return Err(ServiceError::InvalidArgument(format!(
			"invalid node property {:?}",
			req.property
		)));
	}
	let page_size = if req.limit > 0 {
		req.limit
	} else {
		DEFAULT_PAGE_SIZE
	};
	Ok(Json(state.dispatcher.node(&req, page_size).await?))
}

pub async fn node_search(
	State(state): State<AppState>,
	Json(req): Json<NodeSearchRequest>,
) -> Result<Json<NodeSearchResponse>> {
	metrics::record_request("node_search");

	if req.query.trim().is_empty() {
		return Err(ServiceError::InvalidArgument(
			"node search needs a query".into(),
		));
	}
	Ok(Json(state.dispatcher.node_search(&req).await?))
}

pub async fn recognize_places(
	State(state): State<AppState>,
	Json(req): Json<RecognizePlacesRequest>,
) -> Result<Json<RecognizePlacesResponse>> {
	metrics::record_request("recognize_places");
	Ok(Json(
		recognize::recognize_places(state.recog_store.clone(), &req).await,
	))
}

pub async fn health() -> &'static str {
	"OK"
}

pub async fn metrics_text() -> String {
	metrics::metrics_text()
}
