//! Process-wide read-mostly cache.
//!
//! Built once at startup from the data sources' bulk handles and published
//! immutably; readers take no lock. Only the sections requested by the
//! option set are populated, so a deployment without a SQL tier skips that
//! work entirely.

pub mod search;

use std::collections::{BTreeMap, HashSet, VecDeque};

use async_trait::async_trait;

pub use search::SearchIndex;

use crate::calc::{parse_formula, Formula};
use crate::errors::{Result, ServiceError};
use crate::model::Facet;

const BLOCKLIST_SVGS_JSON: &str = include_str!("data/blocklist_svgs.json");

/// One interior node of the stat-variable hierarchy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatVarGroupNode {
	pub name: String,
	pub child_svgs: Vec<String>,
	pub child_stat_vars: Vec<StatVarInfo>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatVarInfo {
	pub dcid: String,
	pub display_name: String,
	pub search_names: Vec<String>,
}

/// Which cache sections to populate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
	pub fetch_svg: bool,
	pub search_svg: bool,
	pub cache_sql: bool,
	pub cache_sv_formula: bool,
}

impl CacheOptions {
	pub fn all() -> Self {
		Self {
			fetch_svg: true,
			search_svg: true,
			cache_sql: true,
			cache_sv_formula: true,
		}
	}
}

/// Bulk handle the cache build reads from. Implemented by the local store
/// backing the deployment's custom imports.
#[async_trait]
pub trait CacheStore: Send + Sync {
	/// The raw stat-variable-group hierarchy, keyed by group dcid.
	async fn raw_svgs(&self) -> Result<BTreeMap<String, StatVarGroupNode>>;

	/// Facets living in the SQL tier, keyed by facet id.
	async fn sql_provenances(&self) -> Result<BTreeMap<String, Facet>>;

	/// The (entity, variable) pairs present in the SQL tier.
	async fn sql_existence(&self) -> Result<HashSet<(String, String)>>;

	/// Registered formula strings per derived variable, in priority order.
	async fn sv_formula_strings(&self) -> Result<BTreeMap<String, Vec<String>>>;
}

pub struct Cache {
	/// Child (group or variable) to its parent groups.
	pub parent_svgs: BTreeMap<String, Vec<String>>,
	pub raw_svgs: BTreeMap<String, StatVarGroupNode>,
	pub svg_search_index: SearchIndex,
	pub sql_provenances: BTreeMap<String, Facet>,
	pub sql_existence: HashSet<(String, String)>,
	/// Parsed formulas per variable; registration order is evaluation order.
	pub sv_formulas: BTreeMap<String, Vec<Formula>>,
}

impl Cache {
	pub fn empty() -> Self {
		Self {
			parent_svgs: BTreeMap::new(),
			raw_svgs: BTreeMap::new(),
			svg_search_index: SearchIndex::default(),
			sql_provenances: BTreeMap::new(),
			sql_existence: HashSet::new(),
			sv_formulas: BTreeMap::new(),
		}
	}
}

/// Build the cache sections requested by `options`. Formulas are parsed
/// here so a bad registered formula fails startup instead of a query.
pub async fn build(store: &dyn CacheStore, options: &CacheOptions) -> Result<Cache> {
	let mut cache = Cache::empty();

	if options.fetch_svg {
		let mut raw_svgs = store.raw_svgs().await?;
		let blocklist = load_blocklist()?;
		remove_blocklisted(&mut raw_svgs, &blocklist);
		cache.parent_svgs = derive_parents(&raw_svgs);
		cache.raw_svgs = raw_svgs;
		log::info!(
			"cache: {} stat var groups after blocklisting",
			cache.raw_svgs.len()
		);

		if options.search_svg {
			let mut index = SearchIndex::default();
			for (dcid, node) in &cache.raw_svgs {
				index.add(dcid, &node.name, "StatVarGroup", &[]);
				for stat_var in &node.child_stat_vars {
					index.add(
						&stat_var.dcid,
						&stat_var.display_name,
						"StatisticalVariable",
						&stat_var.search_names,
					);
				}
			}
			cache.svg_search_index = index;
		}
	}

	if options.cache_sql {
		cache.sql_provenances = store.sql_provenances().await?;
		cache.sql_existence = store.sql_existence().await?;
		log::info!(
			"cache: {} SQL facets, {} existence pairs",
			cache.sql_provenances.len(),
			cache.sql_existence.len()
		);
	}

	if options.cache_sv_formula {
		for (variable, expressions) in store.sv_formula_strings().await? {
			let mut formulas = Vec::with_capacity(expressions.len());
			for expression in expressions {
				// Structural error: a registered formula must parse.
				let formula = parse_formula(&expression).map_err(|e| {
					ServiceError::Internal(format!(
						"registered formula {:?} for {} does not parse: {}",
						expression, variable, e
					))
				})?;
				formulas.push(formula);
			}
			cache.sv_formulas.insert(variable, formulas);
		}
		log::info!("cache: formulas for {} variables", cache.sv_formulas.len());
	}

	Ok(cache)
}

/// Adapter serving the cached stat-variable search index through the
/// data-source interface, so the dispatcher merges local variable search
/// results like any other source's. The remaining operations are empty:
/// the cache holds no arcs or observations.
pub struct CacheDataSource {
	cache: std::sync::Arc<Cache>,
}

impl CacheDataSource {
	pub fn new(cache: std::sync::Arc<Cache>) -> Self {
		Self { cache }
	}
}

#[async_trait]
impl crate::dispatch::DataSource for CacheDataSource {
	fn id(&self) -> String {
		"cache".to_string()
	}

	async fn node(
		&self,
		_req: &crate::model::NodeRequest,
		_page_size: i32,
	) -> Result<crate::model::NodeResponse> {
		Ok(crate::model::NodeResponse::default())
	}

	async fn observation(
		&self,
		_req: &crate::model::ObservationRequest,
	) -> Result<crate::model::ObservationResponse> {
		Ok(crate::model::ObservationResponse::default())
	}

	async fn node_search(
		&self,
		req: &crate::model::NodeSearchRequest,
	) -> Result<crate::model::NodeSearchResponse> {
		let mut results = self
			.cache
			.svg_search_index
			.search(&req.query, crate::merge::MAX_SEARCH_RESULTS);
		if !req.types.is_empty() {
			results.retain(|r| r.types.iter().any(|t| req.types.contains(t)));
		}
		Ok(crate::model::NodeSearchResponse { results })
	}

	async fn resolve(
		&self,
		_req: &crate::model::ResolveRequest,
	) -> Result<crate::model::ResolveResponse> {
		Ok(crate::model::ResolveResponse::default())
	}
}

fn load_blocklist() -> Result<Vec<String>> {
	serde_json::from_str(BLOCKLIST_SVGS_JSON)
		.map_err(|e| ServiceError::Internal(format!("bad embedded svg blocklist: {}", e)))
}

/// Remove each blocked root and all of its descendants, then scrub any
/// dangling references from surviving nodes.
fn remove_blocklisted(raw_svgs: &mut BTreeMap<String, StatVarGroupNode>, blocklist: &[String]) {
	let mut blocked: HashSet<String> = HashSet::new();
	let mut queue: VecDeque<String> = blocklist.iter().cloned().collect();
	while let Some(dcid) = queue.pop_front() {
		if !blocked.insert(dcid.clone()) {
			continue;
		}
		if let Some(node) = raw_svgs.get(&dcid) {
			for child in &node.child_svgs {
				queue.push_back(child.clone());
			}
		}
	}

	raw_svgs.retain(|dcid, _| !blocked.contains(dcid));
	for node in raw_svgs.values_mut() {
		node.child_svgs.retain(|child| !blocked.contains(child));
	}
}

fn derive_parents(raw_svgs: &BTreeMap<String, StatVarGroupNode>) -> BTreeMap<String, Vec<String>> {
	let mut parents: BTreeMap<String, Vec<String>> = BTreeMap::new();
	for (dcid, node) in raw_svgs {
		for child in &node.child_svgs {
			parents.entry(child.clone()).or_default().push(dcid.clone());
		}
		for stat_var in &node.child_stat_vars {
			parents
				.entry(stat_var.dcid.clone())
				.or_default()
				.push(dcid.clone());
		}
	}
	parents
}

#[cfg(test)]
mod tests {
	use super::*;

	struct FixtureStore;

	#[async_trait]
	impl CacheStore for FixtureStore {
		async fn raw_svgs(&self) -> Result<BTreeMap<String, StatVarGroupNode>> {
			let mut svgs = BTreeMap::new();
			svgs.insert(
				"dc/g/Root".to_string(),
				StatVarGroupNode {
					name: "All variables".into(),
					child_svgs: vec!["dc/g/Demographics".into(), "dc/g/Internal".into()],
					child_stat_vars: Vec::new(),
				},
			);
			svgs.insert(
				"dc/g/Demographics".to_string(),
				StatVarGroupNode {
					name: "Demographics".into(),
					child_svgs: Vec::new(),
					child_stat_vars: vec![StatVarInfo {
						dcid: "Count_Person".into(),
						display_name: "Population".into(),
						search_names: vec!["people count".into()],
					}],
				},
			);
			svgs.insert(
				"dc/g/Internal".to_string(),
				StatVarGroupNode {
					name: "Internal".into(),
					child_svgs: vec!["dc/g/Internal_Debug".into()],
					child_stat_vars: Vec::new(),
				},
			);
			svgs.insert(
				"dc/g/Internal_Debug".to_string(),
				StatVarGroupNode {
					name: "Debug".into(),
					child_svgs: Vec::new(),
					child_stat_vars: Vec::new(),
				},
			);
			Ok(svgs)
		}

		async fn sql_provenances(&self) -> Result<BTreeMap<String, Facet>> {
			let facet = Facet {
				import_name: "CustomImport".into(),
				..Default::default()
			};
			Ok([(facet.id(), facet)].into_iter().collect())
		}

		async fn sql_existence(&self) -> Result<HashSet<(String, String)>> {
			Ok([("geoId/06".to_string(), "Count_Person".to_string())]
				.into_iter()
				.collect())
		}

		async fn sv_formula_strings(&self) -> Result<BTreeMap<String, Vec<String>>> {
			Ok([(
				"Count_Person_Male".to_string(),
				vec!["Count_Person - Count_Person_Female".to_string()],
			)]
			.into_iter()
			.collect())
		}
	}

	#[tokio::test]
	async fn build_populates_requested_sections_only() {
		let cache = build(
			&FixtureStore,
			&CacheOptions {
				cache_sql: true,
				..Default::default()
			},
		)
		.await
		.expect("build");
		assert!(cache.raw_svgs.is_empty());
		assert!(cache.sv_formulas.is_empty());
		assert_eq!(cache.sql_provenances.len(), 1);
		assert_eq!(cache.sql_existence.len(), 1);
	}

	#[tokio::test]
	async fn blocklisted_subtree_is_removed() {
		let cache = build(&FixtureStore, &CacheOptions::all())
			.await
			.expect("build");
		assert!(!cache.raw_svgs.contains_key("dc/g/Internal"));
		assert!(!cache.raw_svgs.contains_key("dc/g/Internal_Debug"));
		assert!(cache.raw_svgs.contains_key("dc/g/Demographics"));
		// The surviving root no longer references the blocked child.
		assert_eq!(
			cache.raw_svgs["dc/g/Root"].child_svgs,
			vec!["dc/g/Demographics".to_string()]
		);
		assert!(!cache.parent_svgs.contains_key("dc/g/Internal_Debug"));
	}

	#[tokio::test]
	async fn parents_derived_for_groups_and_variables() {
		let cache = build(&FixtureStore, &CacheOptions::all())
			.await
			.expect("build");
		assert_eq!(
			cache.parent_svgs["dc/g/Demographics"],
			vec!["dc/g/Root".to_string()]
		);
		assert_eq!(
			cache.parent_svgs["Count_Person"],
			vec!["dc/g/Demographics".to_string()]
		);
	}

	#[tokio::test]
	async fn search_index_built_after_blocklisting() {
		let cache = build(&FixtureStore, &CacheOptions::all())
			.await
			.expect("build");
		let hits = cache.svg_search_index.search("population", 10);
		assert_eq!(hits[0].dcid, "Count_Person");
		assert!(cache.svg_search_index.search("debug", 10).is_empty());
	}

	#[tokio::test]
	async fn formulas_parse_at_build_time() {
		let cache = build(&FixtureStore, &CacheOptions::all())
			.await
			.expect("build");
		let formulas = &cache.sv_formulas["Count_Person_Male"];
		assert_eq!(formulas.len(), 1);
		assert_eq!(
			formulas[0].stat_vars,
			vec!["Count_Person".to_string(), "Count_Person_Female".to_string()]
		);
	}

	struct BadFormulaStore;

	#[async_trait]
	impl CacheStore for BadFormulaStore {
		async fn raw_svgs(&self) -> Result<BTreeMap<String, StatVarGroupNode>> {
			Ok(BTreeMap::new())
		}

		async fn sql_provenances(&self) -> Result<BTreeMap<String, Facet>> {
			Ok(BTreeMap::new())
		}

		async fn sql_existence(&self) -> Result<HashSet<(String, String)>> {
			Ok(HashSet::new())
		}

		async fn sv_formula_strings(&self) -> Result<BTreeMap<String, Vec<String>>> {
			Ok([("X".to_string(), vec!["SV_1 +".to_string()])]
				.into_iter()
				.collect())
		}
	}

	#[tokio::test]
	async fn unparseable_registered_formula_fails_build() {
		let result = build(
			&BadFormulaStore,
			&CacheOptions {
				cache_sv_formula: true,
				..Default::default()
			},
		)
		.await;
		assert!(matches!(result, Err(ServiceError::Internal(_))));
	}
}
