//! Observation fetch path shared by the handler and the calculator.
//!
//! This is the dispatcher-only fetch: it validates the request, expands
//! contained-in entity expressions into per-entity series fetches under
//! the series cap, and merges source responses. It never invokes the
//! calculator, which is what makes it safe as the calculator's recursive
//! fetch target.

use async_trait::async_trait;

use crate::calc::ObservationFetcher;
use crate::dispatch;
use crate::errors::{Result, ServiceError};
use crate::model::{
	DcidOrExpression, EntityObservation, FacetObservation, NodeRequest, ObservationRequest,
	ObservationResponse, SELECT_ENTITY, SELECT_VALUE, SELECT_VARIABLE,
};
use crate::parse;
use crate::state::AppState;

pub async fn observation(
	state: &AppState,
	req: &ObservationRequest,
) -> Result<ObservationResponse> {
	if req.variable.is_empty() {
		return Err(ServiceError::InvalidArgument(
			"observation request must select a variable".into(),
		));
	}
	if req.entity.is_empty() {
		return Err(ServiceError::InvalidArgument(
			"observation request must select an entity".into(),
		));
	}
	if !req.select.is_empty() && (!req.selects(SELECT_VARIABLE) || !req.selects(SELECT_ENTITY)) {
		return Err(ServiceError::InvalidArgument(
			"select must include variable and entity".into(),
		));
	}

	if req.entity.expression.is_empty() {
		dispatch::check_series_cap(
			req.variable.dcids.len(),
			req.entity.dcids.len(),
			state.max_series,
		)?;
		return state.dispatcher.observation(req).await;
	}

	// Contained-in expansion: resolve the child entities, then fetch the
	// cross-product as a plain dcid query.
	let contained = parse::parse_contained_in(&req.entity.expression)?;
	let property = format!("<-containedInPlace+{{typeOf: {}}}", contained.child_type);
	let node_req = NodeRequest {
		nodes: vec![contained.ancestor.clone()],
		property: property.clone(),
		..Default::default()
	};
	let node_resp = state.dispatcher.node(&node_req, 0).await?;
	let children: Vec<String> = node_resp
		.data
		.get(&contained.ancestor)
		.and_then(|graph| graph.arcs.get(&property))
		.map(|nodes| {
			nodes
				.nodes
				.iter()
				.map(|n| n.dcid.clone())
				.filter(|dcid| !dcid.is_empty())
				.collect()
		})
		.unwrap_or_default();
	log::debug!(
		"contained-in {} expands to {} entities",
		req.entity.expression,
		children.len()
	);
	if children.is_empty() {
		return Ok(ObservationResponse::default());
	}

	dispatch::check_series_cap(req.variable.dcids.len(), children.len(), state.max_series)?;

	let expanded = ObservationRequest {
		entity: DcidOrExpression::from_dcids(children),
		..req.clone()
	};
	let response = state.dispatcher.observation(&expanded).await?;

	if !req.select.is_empty() && !req.selects(SELECT_VALUE) {
		return Ok(summarize_facets(response));
	}
	Ok(response)
}

/// Collapse a facet-only contained-in response to the reserved
/// empty-string entity key holding the facets available per variable
/// overall, in order of first appearance across the (sorted) entities.
fn summarize_facets(response: ObservationResponse) -> ObservationResponse {
	let mut out = ObservationResponse {
		facets: response.facets,
		..Default::default()
	};
	for (variable, var_obs) in response.by_variable {
		let mut ordered_facets: Vec<FacetObservation> = Vec::new();
		for entity_obs in var_obs.by_entity.values() {
			for facet_obs in &entity_obs.ordered_facets {
				if !ordered_facets.iter().any(|f| f.facet_id == facet_obs.facet_id) {
					ordered_facets.push(FacetObservation {
						facet_id: facet_obs.facet_id.clone(),
						..Default::default()
					});
				}
			}
		}
		let var = out.by_variable.entry(variable).or_default();
		var.by_entity
			.insert(String::new(), EntityObservation { ordered_facets });
	}
	out
}

/// The calculator's view of the fetch path.
pub struct DispatchFetcher {
	state: AppState,
}

impl DispatchFetcher {
	pub fn new(state: AppState) -> Self {
		Self { state }
	}
}

#[async_trait]
impl ObservationFetcher for DispatchFetcher {
	async fn fetch(&self, req: &ObservationRequest) -> Result<ObservationResponse> {
		observation(&self.state, req).await
	}
}
