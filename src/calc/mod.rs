//! Observation calculator.
//!
//! Fills gaps in observation responses by evaluating per-variable formulas
//! registered in the cache. A hole is a (variable, entity) pair the data
//! sources returned nothing for; for each hole the calculator issues a
//! recursive observation query for a formula's leaf variables, evaluates
//! the tree, and appends the derived cells after the primary response so
//! pre-existing cells are never overwritten.

pub mod eval;
pub mod parser;
pub mod rank;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

pub use eval::{evaluate, finalize, INTERMEDIATE_NODE};
pub use parser::{parse_formula, FacetFilter, Formula, FormulaNode, FormulaOp, LeafNode};
pub use rank::{FacetRank, PreferredImports};

use crate::errors::Result;
use crate::merge;
use crate::model::{DcidOrExpression, ObservationRequest, ObservationResponse};
use crate::observability::metrics;

/// The recursive fetch seam. Hole filling issues plain observation queries
/// through this trait so the calculator never re-enters itself: the
/// recursive query is served by the dispatcher alone.
#[async_trait]
pub trait ObservationFetcher: Send + Sync {
	async fn fetch(&self, req: &ObservationRequest) -> Result<ObservationResponse>;
}

/// Find the (variable, entities) pairs still missing after the merged
/// source responses. Requests that are themselves formula-shaped are never
/// filled (no nesting). For an entity expression the response cannot be
/// subdivided, so a hole exists only when the whole variable came back
/// empty.
pub fn find_observation_response_holes(
	req: &ObservationRequest,
	resp: &ObservationResponse,
) -> BTreeMap<String, DcidOrExpression> {
	let mut holes = BTreeMap::new();
	if !req.variable.expression.is_empty() {
		return holes;
	}

	for variable in &req.variable.dcids {
		let var_obs = resp.by_variable.get(variable);
		if !req.entity.expression.is_empty() {
			let empty = var_obs.map(|v| v.by_entity.is_empty()).unwrap_or(true);
			if empty {
				holes.insert(
					variable.clone(),
					DcidOrExpression::from_expression(req.entity.expression.clone()),
				);
			}
			continue;
		}

		let missing: Vec<String> = req
			.entity
			.dcids
			.iter()
			.filter(|entity| {
				var_obs
					.and_then(|v| v.by_entity.get(*entity))
					.map(|e| e.ordered_facets.is_empty())
					.unwrap_or(true)
			})
			.cloned()
			.collect();
		if !missing.is_empty() {
			holes.insert(variable.clone(), DcidOrExpression::from_dcids(missing));
		}
	}
	holes
}

/// Fill holes in `resp` using the formulas registered per variable,
/// trying formulas in registration order. The first formula that produces
/// data wins for the entities it covers; remaining entities fall through
/// to the next formula. A formula that fails to evaluate is skipped, not
/// fatal.
pub async fn fill_observation_holes(
	fetcher: &dyn ObservationFetcher,
	formulas: &BTreeMap<String, Vec<Formula>>,
	ranker: &dyn FacetRank,
	req: &ObservationRequest,
	mut resp: ObservationResponse,
) -> Result<ObservationResponse> {
	let holes = find_observation_response_holes(req, &resp);
	for (variable, hole) in holes {
		let Some(var_formulas) = formulas.get(&variable) else {
			continue;
		};
		let mut remaining: BTreeSet<String> = hole.dcids.iter().cloned().collect();

		for formula in var_formulas {
			let entity = if hole.expression.is_empty() {
				DcidOrExpression::from_dcids(remaining.iter().cloned().collect())
			} else {
				DcidOrExpression::from_expression(hole.expression.clone())
			};
			let leaf_req = ObservationRequest {
				variable: DcidOrExpression::from_dcids(formula.stat_vars.clone()),
				entity,
				date: req.date.clone(),
				value: req.value.clone(),
				select: req.select.clone(),
				filter: req.filter.clone(),
			};

			let leaf_resp = fetcher.fetch(&leaf_req).await?;
			let evaluated = match evaluate(&formula.root, &leaf_resp) {
				Ok(evaluated) => evaluated,
				Err(e) => {
					log::warn!(
						"formula {:?} failed for {}: {}",
						formula.expression,
						variable,
						e
					);
					continue;
				}
			};
			let filled = finalize(evaluated, &variable, ranker);
			if filled.is_empty() {
				continue;
			}

			let covered: Vec<String> = filled
				.by_variable
				.get(&variable)
				.map(|v| v.by_entity.keys().cloned().collect())
				.unwrap_or_default();
			log::debug!(
				"filled {} entities for {} via {:?}",
				covered.len(),
				variable,
				formula.expression
			);
			metrics::record_calc_fill(covered.len() as u64);
			resp = merge::merge_observation(resp, filled);

			if hole.expression.is_empty() {
				for entity in covered {
					remaining.remove(&entity);
				}
				if remaining.is_empty() {
					break;
				}
			} else {
				// An expression hole cannot be split; first data wins.
				break;
			}
		}
	}
	Ok(resp)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{
		EntityObservation, Facet, FacetObservation, PointStat, SELECT_ENTITY, SELECT_VARIABLE,
	};

	fn request(variables: &[&str], entities: &[&str]) -> ObservationRequest {
		ObservationRequest {
			variable: DcidOrExpression::from_dcids(
				variables.iter().map(|s| s.to_string()).collect(),
			),
			entity: DcidOrExpression::from_dcids(entities.iter().map(|s| s.to_string()).collect()),
			select: vec![SELECT_VARIABLE.into(), SELECT_ENTITY.into()],
			..Default::default()
		}
	}

	fn response_with(variable: &str, entity: &str, facet: &Facet) -> ObservationResponse {
		let mut resp = ObservationResponse::default();
		let var = resp.by_variable.entry(variable.to_string()).or_default();
		var.by_entity.insert(
			entity.to_string(),
			EntityObservation {
				ordered_facets: vec![FacetObservation::new(
					facet.id(),
					vec![PointStat {
						date: "2020".into(),
						value: 5.0,
					}],
				)],
			},
		);
		resp.facets.insert(facet.id(), facet.clone());
		resp
	}

	#[test]
	fn holes_for_missing_variable_and_entity() {
		let req = request(&["Count_Person", "Count_Farm"], &["geoId/06", "geoId/48"]);
		let facet = Facet {
			import_name: "TestImport".into(),
			..Default::default()
		};
		let resp = response_with("Count_Person", "geoId/06", &facet);

		let holes = find_observation_response_holes(&req, &resp);
		assert_eq!(
			holes["Count_Person"],
			DcidOrExpression::from_dcids(vec!["geoId/48".into()])
		);
		assert_eq!(
			holes["Count_Farm"],
			DcidOrExpression::from_dcids(vec!["geoId/06".into(), "geoId/48".into()])
		);
	}

	#[test]
	fn formula_requests_are_never_filled() {
		let mut req = request(&[], &["geoId/06"]);
		req.variable = DcidOrExpression::from_expression("SV_1 - SV_2");
		let holes = find_observation_response_holes(&req, &ObservationResponse::default());
		assert!(holes.is_empty());
	}

	#[test]
	fn expression_entity_holes_require_fully_empty_variable() {
		let mut req = request(&["Count_Person"], &[]);
		req.entity = DcidOrExpression::from_expression(
			"country/USA<-containedInPlace+{typeOf: State}",
		);
		let facet = Facet {
			import_name: "TestImport".into(),
			..Default::default()
		};

		// One entity present: no hole.
		let resp = response_with("Count_Person", "geoId/06", &facet);
		assert!(find_observation_response_holes(&req, &resp).is_empty());

		// Nothing present: the whole expression is a hole.
		let holes = find_observation_response_holes(&req, &ObservationResponse::default());
		assert_eq!(
			holes["Count_Person"],
			DcidOrExpression::from_expression("country/USA<-containedInPlace+{typeOf: State}")
		);
	}

	struct FixedFetcher {
		response: ObservationResponse,
	}

	#[async_trait]
	impl ObservationFetcher for FixedFetcher {
		async fn fetch(&self, _req: &ObservationRequest) -> Result<ObservationResponse> {
			Ok(self.response.clone())
		}
	}

	#[tokio::test]
	async fn fills_hole_from_formula() {
		let facet = Facet {
			import_name: "TestImport".into(),
			..Default::default()
		};
		// Leaf data: SV_1=10, SV_2=4 for the missing entity.
		let mut leaf_resp = response_with("SV_1", "geoId/48", &facet);
		let sv2 = response_with("SV_2", "geoId/48", &facet);
		leaf_resp = merge::merge_observation(leaf_resp, sv2);
		leaf_resp
			.by_variable
			.get_mut("SV_1")
			.expect("var")
			.by_entity
			.get_mut("geoId/48")
			.expect("entity")
			.ordered_facets[0]
			.observations[0]
			.value = 10.0;
		leaf_resp
			.by_variable
			.get_mut("SV_2")
			.expect("var")
			.by_entity
			.get_mut("geoId/48")
			.expect("entity")
			.ordered_facets[0]
			.observations[0]
			.value = 4.0;

		let fetcher = FixedFetcher {
			response: leaf_resp,
		};
		let mut formulas = BTreeMap::new();
		formulas.insert(
			"Count_Person".to_string(),
			vec![parse_formula("SV_1 - SV_2").expect("parse")],
		);

		let req = request(&["Count_Person"], &["geoId/06", "geoId/48"]);
		let primary = response_with("Count_Person", "geoId/06", &facet);
		let before = primary.by_variable["Count_Person"].by_entity["geoId/06"].clone();

		let filled = fill_observation_holes(
			&fetcher,
			&formulas,
			&PreferredImports::default(),
			&req,
			primary,
		)
		.await
		.expect("fill");

		// The hole is filled with the derived value.
		let derived = &filled.by_variable["Count_Person"].by_entity["geoId/48"];
		assert_eq!(derived.ordered_facets[0].observations[0].value, 6.0);

		// Pre-existing cells are untouched.
		assert_eq!(
			filled.by_variable["Count_Person"].by_entity["geoId/06"],
			before
		);

		// Facet closure still holds.
		for entity_obs in filled.by_variable["Count_Person"].by_entity.values() {
			for facet_obs in &entity_obs.ordered_facets {
				assert!(filled.facets.contains_key(&facet_obs.facet_id));
			}
		}
	}

	#[tokio::test]
	async fn unmatched_formula_leaves_hole_open() {
		let fetcher = FixedFetcher {
			response: ObservationResponse::default(),
		};
		let mut formulas = BTreeMap::new();
		formulas.insert(
			"Count_Person".to_string(),
			vec![parse_formula("SV_1 - SV_2").expect("parse")],
		);

		let req = request(&["Count_Person"], &["geoId/48"]);
		let filled = fill_observation_holes(
			&fetcher,
			&formulas,
			&PreferredImports::default(),
			&req,
			ObservationResponse::default(),
		)
		.await
		.expect("fill");
		assert!(filled.is_empty());
	}
}
