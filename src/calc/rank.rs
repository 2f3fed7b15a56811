//! Facet ranking for calculator output.
//!
//! When a formula evaluation produces several facets for the same entity,
//! their order in `OrderedFacets` expresses preference. The policy is
//! pluggable; [`PreferredImports`] is the default, ranking facets by a
//! curated import-name preference list and breaking ties by facet id so
//! output order is deterministic.

use crate::model::Facet;

pub trait FacetRank: Send + Sync {
	/// Sort key for a facet; lower keys rank earlier.
	fn rank_key(&self, facet_id: &str, facet: &Facet) -> (usize, String);
}

/// Default ranking policy: curated import-name preference order, then
/// facet id.
pub struct PreferredImports {
	preferred: Vec<String>,
}

impl PreferredImports {
	pub fn new(preferred: Vec<String>) -> Self {
		Self { preferred }
	}
}

impl Default for PreferredImports {
	fn default() -> Self {
		Self::new(
			[
				"CensusACS5YearSurvey",
				"CensusPEP",
				"USDecennialCensus",
				"CDC_Mortality_UnderlyingCause",
				"WorldDevelopmentIndicators",
				"WikidataPopulation",
				"OECDRegionalStatistics",
			]
			.into_iter()
			.map(String::from)
			.collect(),
		)
	}
}

impl FacetRank for PreferredImports {
	fn rank_key(&self, facet_id: &str, facet: &Facet) -> (usize, String) {
		let position = self
			.preferred
			.iter()
			.position(|name| *name == facet.import_name)
			.unwrap_or(self.preferred.len());
		(position, facet_id.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn preferred_import_ranks_before_unknown() {
		let ranker = PreferredImports::default();
		let census = Facet {
			import_name: "CensusPEP".into(),
			..Default::default()
		};
		let unknown = Facet {
			import_name: "SomeNewImport".into(),
			..Default::default()
		};
		assert!(ranker.rank_key("1", &census) < ranker.rank_key("1", &unknown));
	}

	#[test]
	fn ties_break_by_facet_id() {
		let ranker = PreferredImports::default();
		let facet = Facet::default();
		assert!(ranker.rank_key("100", &facet) < ranker.rank_key("200", &facet));
	}
}
