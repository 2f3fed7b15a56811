//! Formula evaluation over observation responses.
//!
//! Evaluation is a recursive descent over the compiled tree. Partial
//! results live under the fixed placeholder variable [`INTERMEDIATE_NODE`]
//! until [`finalize`] relabels them to the target variable and rewrites the
//! produced facets as aggregates.

use crate::errors::Result;
use crate::model::{
	EntityObservation, FacetObservation, ObservationResponse, PointStat, VariableObservation,
};

use super::parser::{FormulaNode, FormulaOp, LeafNode};
use super::rank::FacetRank;

/// Variable key carrying partial results inside the evaluator.
pub const INTERMEDIATE_NODE: &str = "INTERMEDIATE_NODE";

/// Evaluate a formula tree against an input response holding series for
/// the formula's leaf variables. The output keeps all surviving series
/// under [`INTERMEDIATE_NODE`].
pub fn evaluate(node: &FormulaNode, input: &ObservationResponse) -> Result<ObservationResponse> {
	match node {
		FormulaNode::Leaf(leaf) => Ok(project_leaf(leaf, input)),
		FormulaNode::Binary { op, left, right } => {
			let x = evaluate(left, input)?;
			let y = evaluate(right, input)?;
			Ok(eval_binary_expr(&x, &y, *op))
		}
	}
}

/// Project the input down to one leaf variable, keeping only facets that
/// match the leaf's filter, relabelled under the placeholder variable.
fn project_leaf(leaf: &LeafNode, input: &ObservationResponse) -> ObservationResponse {
	let mut out = ObservationResponse::default();
	let Some(var_obs) = input.by_variable.get(&leaf.stat_var) else {
		return out;
	};

	let mut projected = VariableObservation::default();
	for (entity, entity_obs) in &var_obs.by_entity {
		let kept: Vec<FacetObservation> = entity_obs
			.ordered_facets
			.iter()
			.filter(|fo| match &leaf.facet {
				Some(filter) => input
					.facets
					.get(&fo.facet_id)
					.map(|facet| filter.matches(facet))
					.unwrap_or(false),
				None => true,
			})
			.cloned()
			.collect();
		if kept.is_empty() {
			continue;
		}
		for fo in &kept {
			if let Some(facet) = input.facets.get(&fo.facet_id) {
				out.facets.insert(fo.facet_id.clone(), facet.clone());
			}
		}
		projected.by_entity.insert(
			entity.clone(),
			EntityObservation {
				ordered_facets: kept,
			},
		);
	}

	if !projected.by_entity.is_empty() {
		out.by_variable
			.insert(INTERMEDIATE_NODE.to_string(), projected);
	}
	out
}

/// Combine two partial results. Cells exist only for entities present on
/// both sides and facet ids present on both sides; a division by zero
/// fails that one cell and the rest of the response is kept.
fn eval_binary_expr(
	x: &ObservationResponse,
	y: &ObservationResponse,
	op: FormulaOp,
) -> ObservationResponse {
	let mut out = ObservationResponse::default();
	let (Some(x_var), Some(y_var)) = (
		x.by_variable.get(INTERMEDIATE_NODE),
		y.by_variable.get(INTERMEDIATE_NODE),
	) else {
		return out;
	};

	let mut combined = VariableObservation::default();
	for (entity, x_entity) in &x_var.by_entity {
		let Some(y_entity) = y_var.by_entity.get(entity) else {
			continue;
		};
		let mut ordered_facets = Vec::new();
		for x_facet in &x_entity.ordered_facets {
			for y_facet in &y_entity.ordered_facets {
				if x_facet.facet_id != y_facet.facet_id {
					continue;
				}
				let Some(points) =
					merge_point_stat(&x_facet.observations, &y_facet.observations, op)
				else {
					log::debug!(
						"dropping cell ({}, {}): division by zero",
						entity,
						x_facet.facet_id
					);
					continue;
				};
				if points.is_empty() {
					continue;
				}
				if let Some(facet) = x.facets.get(&x_facet.facet_id) {
					out.facets.insert(x_facet.facet_id.clone(), facet.clone());
				}
				ordered_facets.push(FacetObservation::new(x_facet.facet_id.clone(), points));
			}
		}
		if !ordered_facets.is_empty() {
			combined
				.by_entity
				.insert(entity.clone(), EntityObservation { ordered_facets });
		}
	}

	if !combined.by_entity.is_empty() {
		out.by_variable
			.insert(INTERMEDIATE_NODE.to_string(), combined);
	}
	out
}

/// Inner-join two date-ascending series on date, applying `op` to each
/// matched pair. Returns `None` when the operation divides by zero, which
/// fails the whole cell.
fn merge_point_stat(x: &[PointStat], y: &[PointStat], op: FormulaOp) -> Option<Vec<PointStat>> {
	let mut out = Vec::new();
	let (mut i, mut j) = (0, 0);
	while i < x.len() && j < y.len() {
		let xp = &x[i];
		let yp = &y[j];
		if xp.date == yp.date {
			let value = match op {
				FormulaOp::Add => xp.value + yp.value,
				FormulaOp::Sub => xp.value - yp.value,
				FormulaOp::Mul => xp.value * yp.value,
				FormulaOp::Div => {
					if yp.value == 0.0 {
						return None;
					}
					xp.value / yp.value
				}
			};
			out.push(PointStat {
				date: xp.date.clone(),
				value,
			});
			i += 1;
			j += 1;
		} else if xp.date < yp.date {
			i += 1;
		} else {
			j += 1;
		}
	}
	Some(out)
}

/// Relabel an evaluated result to its target variable and rewrite every
/// produced facet as a DC aggregate. Rewriting changes each facet's hash,
/// so facet ids and all references are recomputed together. Facets per
/// entity are ordered by the supplied ranking policy.
pub fn finalize(
	result: ObservationResponse,
	variable: &str,
	ranker: &dyn FacetRank,
) -> ObservationResponse {
	let mut out = ObservationResponse::default();
	let Some(partial) = result.by_variable.get(INTERMEDIATE_NODE) else {
		return out;
	};

	let mut relabelled = VariableObservation::default();
	for (entity, entity_obs) in &partial.by_entity {
		let mut ordered_facets = Vec::new();
		for facet_obs in &entity_obs.ordered_facets {
			let Some(facet) = result.facets.get(&facet_obs.facet_id) else {
				continue;
			};
			let mut aggregate = facet.clone();
			aggregate.is_dc_aggregate = true;
			let new_id = aggregate.id();
			ordered_facets.push(FacetObservation::new(
				new_id.clone(),
				facet_obs.observations.clone(),
			));
			out.facets.insert(new_id, aggregate);
		}
		ordered_facets.sort_by_key(|fo| {
			out.facets
				.get(&fo.facet_id)
				.map(|facet| ranker.rank_key(&fo.facet_id, facet))
				.unwrap_or((usize::MAX, fo.facet_id.clone()))
		});
		if !ordered_facets.is_empty() {
			relabelled
				.by_entity
				.insert(entity.clone(), EntityObservation { ordered_facets });
		}
	}

	if !relabelled.by_entity.is_empty() {
		out.by_variable.insert(variable.to_string(), relabelled);
	}
	out
}
