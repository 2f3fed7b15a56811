//! Response-merger algebra.
//!
//! Each merge takes an ordered pair of responses of the same type: the
//! first argument is the primary and wins on conflict. Multi-way variants
//! fold left over a priority-ordered list, so the dispatcher's configured
//! source order is the merge priority. Map keys are `BTreeMap`-ordered,
//! which keeps merged output byte-stable across runs.

use std::collections::HashSet;

use crate::errors::Result;
use crate::model::{
	EntityInfo, NodeResponse, NodeSearchResponse, ObservationResponse, ResolveResponse,
};
use crate::pagination;

/// Hard cap on merged node-search results.
pub const MAX_SEARCH_RESULTS: usize = 100;

/// Merge two resolve responses. Candidate lists are unioned per node,
/// deduplicated by dcid with the primary's candidates first; entity order
/// is the order of first appearance across both inputs.
pub fn merge_resolve(primary: ResolveResponse, aux: ResolveResponse) -> ResolveResponse {
	let mut entities = primary.entities;
	for aux_entity in aux.entities {
		match entities.iter_mut().find(|e| e.node == aux_entity.node) {
			Some(existing) => {
				let seen: HashSet<String> = existing
					.candidates
					.iter()
					.map(|c| c.dcid.clone())
					.collect();
				for candidate in aux_entity.candidates {
					if !seen.contains(&candidate.dcid) {
						existing.candidates.push(candidate);
					}
				}
			}
			None => entities.push(aux_entity),
		}
	}
	ResolveResponse { entities }
}

pub fn merge_multi_resolve(responses: Vec<ResolveResponse>) -> ResolveResponse {
	responses
		.into_iter()
		.reduce(merge_resolve)
		.unwrap_or_default()
}

/// Merge two node responses. Per property, node lists are unioned by dcid
/// (falling back to the literal value), primary first. The pagination
/// cursors are combined into one record: the primary's local cursor plus
/// the aux side's entire cursor in the remote slot, so the next page can
/// be routed to both sides again.
pub fn merge_node(primary: NodeResponse, aux: NodeResponse) -> Result<NodeResponse> {
	let mut data = primary.data;
	for (node, aux_graph) in aux.data {
		let graph = data.entry(node).or_default();
		for (property, aux_nodes) in aux_graph.arcs {
			let nodes = graph.arcs.entry(property).or_default();
			let mut seen: HashSet<String> = nodes
				.nodes
				.iter()
				.map(|n| n.merge_key().to_string())
				.collect();
			for entry in aux_nodes.nodes {
				if seen.insert(entry.merge_key().to_string()) {
					nodes.nodes.push(entry);
				}
			}
		}
	}

	let next_token = if !aux.next_token.is_empty() {
		let aux_info = pagination::decode(&aux.next_token)?;
		let merged = if primary.next_token.is_empty() {
			pagination::wrap_remote(aux_info)
		} else {
			let mut local = pagination::decode(&primary.next_token)?;
			local.remote_pagination_info = Some(Box::new(aux_info));
			local
		};
		pagination::encode(&merged)?
	} else {
		primary.next_token
	};

	Ok(NodeResponse { data, next_token })
}

pub fn merge_multi_node(responses: Vec<NodeResponse>) -> Result<NodeResponse> {
	let mut iter = responses.into_iter();
	let mut merged = match iter.next() {
		Some(first) => first,
		None => return Ok(NodeResponse::default()),
	};
	for response in iter {
		merged = merge_node(merged, response)?;
	}
	Ok(merged)
}

/// Merge two observation responses. Aux facets are appended after the
/// primary's per (variable, entity) with no dedup: a higher-priority
/// source's facets stay in front. The facet maps are unioned with the
/// primary winning on key collisions.
pub fn merge_observation(
	primary: ObservationResponse,
	aux: ObservationResponse,
) -> ObservationResponse {
	let mut by_variable = primary.by_variable;
	for (variable, aux_var) in aux.by_variable {
		let var = by_variable.entry(variable).or_default();
		for (entity, aux_entity) in aux_var.by_entity {
			var.by_entity
				.entry(entity)
				.or_default()
				.ordered_facets
				.extend(aux_entity.ordered_facets);
		}
	}

	let mut facets = primary.facets;
	for (facet_id, facet) in aux.facets {
		facets.entry(facet_id).or_insert(facet);
	}

	ObservationResponse {
		by_variable,
		facets,
	}
}

pub fn merge_multi_observation(responses: Vec<ObservationResponse>) -> ObservationResponse {
	responses
		.into_iter()
		.reduce(merge_observation)
		.unwrap_or_default()
}

/// Merge node-search result lists by round-robin interleaving in priority
/// order, deduplicating by dcid, up to [`MAX_SEARCH_RESULTS`]. A full pass
/// over all lists that yields no novel result ends the merge.
pub fn merge_multi_node_search(responses: Vec<NodeSearchResponse>) -> NodeSearchResponse {
	let mut queues: Vec<std::collections::VecDeque<EntityInfo>> = responses
		.into_iter()
		.map(|r| r.results.into())
		.collect();
	let mut seen: HashSet<String> = HashSet::new();
	let mut results: Vec<EntityInfo> = Vec::new();

	loop {
		let mut novel_in_pass = false;
		for queue in queues.iter_mut() {
			// Exactly one draw per list per pass; a duplicate still
			// consumes its draw and is discarded.
			if let Some(candidate) = queue.pop_front() {
				if seen.insert(candidate.merge_key().to_string()) {
					results.push(candidate);
					novel_in_pass = true;
				}
			}
			if results.len() >= MAX_SEARCH_RESULTS {
				return NodeSearchResponse { results };
			}
		}
		if !novel_in_pass {
			return NodeSearchResponse { results };
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{
		EntityObservation, Facet, FacetObservation, LinkedGraph, Nodes, PointStat,
		ResolveCandidate, ResolveEntity, VariableObservation,
	};

	fn candidate(dcid: &str) -> ResolveCandidate {
		ResolveCandidate {
			dcid: dcid.into(),
			..Default::default()
		}
	}

	fn resolve_response(pairs: &[(&str, &[&str])]) -> ResolveResponse {
		ResolveResponse {
			entities: pairs
				.iter()
				.map(|(node, dcids)| ResolveEntity {
					node: (*node).into(),
					candidates: dcids.iter().map(|d| candidate(d)).collect(),
				})
				.collect(),
		}
	}

	fn facet_obs(facet_id: &str) -> FacetObservation {
		FacetObservation::new(
			facet_id.into(),
			vec![PointStat {
				date: "2020".into(),
				value: 1.0,
			}],
		)
	}

	fn observation_response(
		variable: &str,
		entity: &str,
		facet_ids: &[&str],
	) -> ObservationResponse {
		let mut response = ObservationResponse::default();
		let mut var = VariableObservation::default();
		var.by_entity.insert(
			entity.into(),
			EntityObservation {
				ordered_facets: facet_ids.iter().map(|f| facet_obs(f)).collect(),
			},
		);
		response.by_variable.insert(variable.into(), var);
		for facet_id in facet_ids {
			response.facets.insert(
				(*facet_id).into(),
				Facet {
					import_name: format!("import_{}", facet_id),
					..Default::default()
				},
			);
		}
		response
	}

	#[test]
	fn resolve_union_is_deterministic() {
		// Primary carries node1 with two candidates; aux adds one novel
		// candidate for node1 and an entirely new node2.
		let primary = resolve_response(&[("node1", &["id1.1", "id1.3"])]);
		let aux = resolve_response(&[("node1", &["id1.2"]), ("node2", &["id2.1"])]);

		let merged = merge_resolve(primary, aux);
		assert_eq!(merged.entities.len(), 2);
		assert_eq!(merged.entities[0].node, "node1");
		let dcids: Vec<&str> = merged.entities[0]
			.candidates
			.iter()
			.map(|c| c.dcid.as_str())
			.collect();
		assert_eq!(dcids, vec!["id1.1", "id1.3", "id1.2"]);
		assert_eq!(merged.entities[1].node, "node2");
	}

	#[test]
	fn resolve_merge_is_idempotent() {
		let response = resolve_response(&[("node1", &["id1.1", "id1.2"])]);
		let merged = merge_resolve(response.clone(), response.clone());
		assert_eq!(merged, response);
	}

	#[test]
	fn resolve_conflicting_aux_candidate_is_discarded() {
		let primary = resolve_response(&[("node1", &["id1.1"])]);
		let aux = resolve_response(&[("node1", &["id1.1"])]);
		let merged = merge_resolve(primary, aux);
		assert_eq!(merged.entities[0].candidates.len(), 1);
	}

	#[test]
	fn observation_appends_aux_facets_after_primary() {
		let primary = observation_response("var1", "entity1", &["facet1", "facet2"]);
		let aux = observation_response("var1", "entity1", &["facet3"]);

		let merged = merge_observation(primary, aux);
		let facet_ids: Vec<&str> = merged.by_variable["var1"].by_entity["entity1"]
			.ordered_facets
			.iter()
			.map(|f| f.facet_id.as_str())
			.collect();
		assert_eq!(facet_ids, vec!["facet1", "facet2", "facet3"]);
		assert_eq!(merged.facets.len(), 3);
	}

	#[test]
	fn observation_facet_closure_holds_after_merge() {
		let primary = observation_response("var1", "entity1", &["facet1"]);
		let aux = observation_response("var2", "entity2", &["facet2"]);

		let merged = merge_observation(primary, aux);
		let referenced: HashSet<&str> = merged
			.by_variable
			.values()
			.flat_map(|v| v.by_entity.values())
			.flat_map(|e| e.ordered_facets.iter())
			.map(|f| f.facet_id.as_str())
			.collect();
		let keys: HashSet<&str> = merged.facets.keys().map(|k| k.as_str()).collect();
		assert_eq!(referenced, keys);
	}

	#[test]
	fn observation_primary_wins_facet_map_collision() {
		let mut primary = observation_response("var1", "entity1", &["facet1"]);
		primary
			.facets
			.insert("shared".into(), Facet {
				import_name: "primary_import".into(),
				..Default::default()
			});
		let mut aux = observation_response("var1", "entity2", &["facet2"]);
		aux.facets.insert("shared".into(), Facet {
			import_name: "aux_import".into(),
			..Default::default()
		});

		let merged = merge_observation(primary, aux);
		assert_eq!(merged.facets["shared"].import_name, "primary_import");
	}

	#[test]
	fn node_union_preserves_primary_order() {
		let mut primary = NodeResponse::default();
		let mut graph = LinkedGraph::default();
		graph.arcs.insert(
			"containedInPlace".into(),
			Nodes {
				nodes: vec![
					EntityInfo {
						dcid: "geoId/06085".into(),
						..Default::default()
					},
					EntityInfo {
						dcid: "geoId/06".into(),
						..Default::default()
					},
				],
			},
		);
		primary.data.insert("geoId/0649670".into(), graph);

		let mut aux = NodeResponse::default();
		let mut aux_graph = LinkedGraph::default();
		aux_graph.arcs.insert(
			"containedInPlace".into(),
			Nodes {
				nodes: vec![
					EntityInfo {
						dcid: "geoId/06".into(),
						..Default::default()
					},
					EntityInfo {
						dcid: "country/USA".into(),
						..Default::default()
					},
				],
			},
		);
		aux.data.insert("geoId/0649670".into(), aux_graph);

		let merged = merge_node(primary, aux).expect("merge");
		let dcids: Vec<&str> = merged.data["geoId/0649670"].arcs["containedInPlace"]
			.nodes
			.iter()
			.map(|n| n.dcid.as_str())
			.collect();
		assert_eq!(dcids, vec!["geoId/06085", "geoId/06", "country/USA"]);
	}

	#[test]
	fn node_merge_combines_cursors() {
		let local_info = pagination::PaginationInfo {
			cursor_groups: vec![pagination::CursorGroup {
				keys: vec!["geoId/06".into()],
				cursors: vec![pagination::Cursor {
					import_group: 0,
					page: 1,
					item: 5,
				}],
			}],
			remote_pagination_info: None,
		};
		let remote_info = pagination::PaginationInfo {
			cursor_groups: vec![pagination::CursorGroup {
				keys: vec!["country/USA".into()],
				cursors: vec![pagination::Cursor {
					import_group: 0,
					page: 7,
					item: 0,
				}],
			}],
			remote_pagination_info: None,
		};

		let primary = NodeResponse {
			next_token: pagination::encode(&local_info).expect("encode"),
			..Default::default()
		};
		let aux = NodeResponse {
			next_token: pagination::encode(&remote_info).expect("encode"),
			..Default::default()
		};

		let merged = merge_node(primary, aux).expect("merge");
		let decoded = pagination::decode(&merged.next_token).expect("decode");
		assert_eq!(decoded.cursor_groups, local_info.cursor_groups);
		assert_eq!(
			*decoded.remote_pagination_info.expect("remote slot"),
			remote_info
		);
	}

	#[test]
	fn node_merge_wraps_lone_aux_cursor() {
		// Only the aux side has data and a cursor: its cursor must come back
		// wrapped in the remote slot of a fresh record so it round-trips.
		let remote_info = pagination::PaginationInfo {
			cursor_groups: vec![pagination::CursorGroup {
				keys: vec!["country/USA".into()],
				..Default::default()
			}],
			remote_pagination_info: None,
		};
		let aux = NodeResponse {
			data: [("country/USA".to_string(), LinkedGraph::default())]
				.into_iter()
				.collect(),
			next_token: pagination::encode(&remote_info).expect("encode"),
		};

		let merged = merge_node(NodeResponse::default(), aux).expect("merge");
		let decoded = pagination::decode(&merged.next_token).expect("decode");
		assert!(decoded.cursor_groups.is_empty());
		assert_eq!(
			*decoded.remote_pagination_info.expect("remote slot"),
			remote_info
		);
	}

	fn search_results(prefix: &str, count: usize) -> NodeSearchResponse {
		NodeSearchResponse {
			results: (0..count)
				.map(|i| EntityInfo {
					dcid: format!("{}/{}", prefix, i),
					..Default::default()
				})
				.collect(),
		}
	}

	#[test]
	fn node_search_round_robin_caps_at_one_hundred() {
		let merged = merge_multi_node_search(vec![
			search_results("a", 60),
			search_results("b", 60),
			search_results("c", 60),
		]);
		assert_eq!(merged.results.len(), MAX_SEARCH_RESULTS);
		// Round-robin draw: the first three results come one from each list.
		assert_eq!(merged.results[0].dcid, "a/0");
		assert_eq!(merged.results[1].dcid, "b/0");
		assert_eq!(merged.results[2].dcid, "c/0");
	}

	#[test]
	fn node_search_dedups_across_lists() {
		let duplicated = search_results("a", 3);
		let merged =
			merge_multi_node_search(vec![duplicated.clone(), duplicated, search_results("b", 2)]);
		let dcids: Vec<&str> = merged.results.iter().map(|r| r.dcid.as_str()).collect();
		assert_eq!(dcids, vec!["a/0", "b/0", "a/1", "b/1", "a/2"]);
	}

	#[test]
	fn node_search_stops_when_no_novel_results() {
		let merged = merge_multi_node_search(vec![search_results("a", 2), search_results("a", 2)]);
		assert_eq!(merged.results.len(), 2);
	}

	#[test]
	fn multi_merge_of_empty_list_is_default() {
		assert_eq!(merge_multi_resolve(Vec::new()), ResolveResponse::default());
		assert_eq!(
			merge_multi_observation(Vec::new()),
			ObservationResponse::default()
		);
		assert!(merge_multi_node(Vec::new()).expect("merge").data.is_empty());
	}
}
