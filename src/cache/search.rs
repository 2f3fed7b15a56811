//! Full-text index over the stat-variable-group hierarchy.
//!
//! Built once from the blocklisted hierarchy and queried by the
//! node-search handler. Matching is conjunctive over query tokens; ranking
//! favors shorter (more specific) display names and ties break on dcid so
//! results are deterministic.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::model::EntityInfo;

#[derive(Debug, Clone)]
struct IndexedNode {
	name: String,
	type_of: String,
}

#[derive(Debug, Default)]
pub struct SearchIndex {
	token_to_dcids: HashMap<String, BTreeSet<String>>,
	nodes: BTreeMap<String, IndexedNode>,
}

impl SearchIndex {
	/// Register a node under its display name and any extra search names.
	pub fn add(&mut self, dcid: &str, name: &str, type_of: &str, extra_names: &[String]) {
		if dcid.is_empty() || name.is_empty() {
			return;
		}
		self.nodes.insert(
			dcid.to_string(),
			IndexedNode {
				name: name.to_string(),
				type_of: type_of.to_string(),
			},
		);
		for source in std::iter::once(name).chain(extra_names.iter().map(String::as_str)) {
			for token in tokenize(source) {
				self.token_to_dcids
					.entry(token)
					.or_default()
					.insert(dcid.to_string());
			}
		}
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	/// Find nodes matching every query token, best first.
	pub fn search(&self, query: &str, limit: usize) -> Vec<EntityInfo> {
		let tokens = tokenize(query);
		if tokens.is_empty() {
			return Vec::new();
		}

		let mut matched: Option<BTreeSet<String>> = None;
		for token in &tokens {
			let Some(dcids) = self.token_to_dcids.get(token) else {
				return Vec::new();
			};
			matched = Some(match matched {
				None => dcids.clone(),
				Some(current) => current.intersection(dcids).cloned().collect(),
			});
		}

		let mut hits: Vec<(&String, &IndexedNode)> = matched
			.unwrap_or_default()
			.into_iter()
			.filter_map(|dcid| self.nodes.get_key_value(&dcid))
			.collect();
		hits.sort_by(|(a_dcid, a), (b_dcid, b)| {
			a.name
				.len()
				.cmp(&b.name.len())
				.then_with(|| a_dcid.cmp(b_dcid))
		});
		hits.into_iter()
			.take(limit)
			.map(|(dcid, node)| EntityInfo {
				dcid: dcid.clone(),
				name: node.name.clone(),
				types: vec![node.type_of.clone()],
				..Default::default()
			})
			.collect()
	}
}

fn tokenize(text: &str) -> Vec<String> {
	text.split(|c: char| !c.is_alphanumeric())
		.filter(|t| !t.is_empty())
		.map(|t| t.to_lowercase())
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn index() -> SearchIndex {
		let mut index = SearchIndex::default();
		index.add(
			"Count_Person",
			"Population",
			"StatisticalVariable",
			&["people count".to_string()],
		);
		index.add(
			"Count_Person_Female",
			"Female Population",
			"StatisticalVariable",
			&[],
		);
		index.add("dc/g/Demographics", "Demographics", "StatVarGroup", &[]);
		index
	}

	#[test]
	fn conjunctive_match_over_tokens() {
		let index = index();
		let hits = index.search("female population", 10);
		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].dcid, "Count_Person_Female");
	}

	#[test]
	fn shorter_names_rank_first() {
		let index = index();
		let hits = index.search("population", 10);
		assert_eq!(hits[0].dcid, "Count_Person");
		assert_eq!(hits[1].dcid, "Count_Person_Female");
	}

	#[test]
	fn extra_search_names_are_indexed() {
		let index = index();
		let hits = index.search("people", 10);
		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].dcid, "Count_Person");
	}

	#[test]
	fn unmatched_token_yields_nothing() {
		let index = index();
		assert!(index.search("population of mars", 10).is_empty());
		assert!(index.search("", 10).is_empty());
	}
}
