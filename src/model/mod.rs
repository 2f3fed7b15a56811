//! Shared request and response types exchanged between handlers, data
//! sources, and the remote peer. These are the JSON wire shapes: a Bifrost
//! instance answering `/v2/*` speaks exactly these types, which is what lets
//! one instance serve as another's remote mixer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Provenance attributes distinguishing one source of a variable's series
/// from another. Two facets with identical fields hash to the same id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Facet {
	#[serde(skip_serializing_if = "String::is_empty")]
	pub import_name: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub provenance_url: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub measurement_method: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub observation_period: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub unit: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub scaling_factor: String,
	#[serde(skip_serializing_if = "std::ops::Not::not")]
	pub is_dc_aggregate: bool,
	#[serde(skip_serializing_if = "std::ops::Not::not")]
	pub is_dc_imputed: bool,
}

impl Facet {
	/// Stable identifier derived from the facet's fields. The id is a hash,
	/// so rewriting any field (e.g. marking a derived facet as an aggregate)
	/// produces a new id and all references must be rewritten with it.
	pub fn id(&self) -> String {
		let mut hasher = Sha256::new();
		for part in [
			&self.import_name,
			&self.provenance_url,
			&self.measurement_method,
			&self.observation_period,
			&self.unit,
			&self.scaling_factor,
		] {
			hasher.update(part.as_bytes());
			hasher.update(b"\x1f");
		}
		hasher.update([u8::from(self.is_dc_aggregate), u8::from(self.is_dc_imputed)]);
		let digest = hasher.finalize();
		let tag = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
		tag.to_string()
	}
}

/// One dated value in a series. Dates are ISO prefixes (`YYYY`, `YYYY-MM`,
/// `YYYY-MM-DD`), so string order coincides with chronological order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PointStat {
	pub date: String,
	pub value: f64,
}

/// A series under a single facet, sorted ascending by date, with derived
/// summary fields kept consistent with the list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FacetObservation {
	pub facet_id: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub observations: Vec<PointStat>,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub earliest_date: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub latest_date: String,
	#[serde(skip_serializing_if = "is_zero")]
	pub obs_count: i32,
}

fn is_zero(n: &i32) -> bool {
	*n == 0
}

impl FacetObservation {
	/// Build a facet observation from an already date-sorted point list,
	/// filling in the derived summary fields.
	pub fn new(facet_id: String, observations: Vec<PointStat>) -> Self {
		let earliest_date = observations
			.first()
			.map(|p| p.date.clone())
			.unwrap_or_default();
		let latest_date = observations
			.last()
			.map(|p| p.date.clone())
			.unwrap_or_default();
		let obs_count = observations.len() as i32;
		Self {
			facet_id,
			observations,
			earliest_date,
			latest_date,
			obs_count,
		}
	}
}

/// All facets observed for one (variable, entity) pair. The order expresses
/// preference: index 0 is the highest-ranked facet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityObservation {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub ordered_facets: Vec<FacetObservation>,
}

/// Entity-keyed observations for one variable. The empty-string entity key
/// is reserved for "facets available for this variable overall" when a
/// facet-only query runs over a contained-in expansion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariableObservation {
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub by_entity: BTreeMap<String, EntityObservation>,
}

/// Merged observation result. Invariant: every facet id referenced by any
/// `FacetObservation` keys an entry in `facets`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObservationResponse {
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub by_variable: BTreeMap<String, VariableObservation>,
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub facets: BTreeMap<String, Facet>,
}

impl ObservationResponse {
	/// True if no variable carries any entity data.
	pub fn is_empty(&self) -> bool {
		self.by_variable
			.values()
			.all(|v| v.by_entity.is_empty())
	}
}

/// Variables or entities in an observation request: either a plain dcid
/// list or an expression (a formula for variables, a contained-in
/// expression for entities).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DcidOrExpression {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub dcids: Vec<String>,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub expression: String,
}

impl DcidOrExpression {
	pub fn from_dcids(dcids: Vec<String>) -> Self {
		Self {
			dcids,
			expression: String::new(),
		}
	}

	pub fn from_expression(expression: impl Into<String>) -> Self {
		Self {
			dcids: Vec::new(),
			expression: expression.into(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.dcids.is_empty() && self.expression.is_empty()
	}
}

/// Facet filter applied to observation lookups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObservationFilter {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub facet_ids: Vec<String>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub domains: Vec<String>,
}

/// Fields a caller may select in an observation request.
pub const SELECT_VARIABLE: &str = "variable";
pub const SELECT_ENTITY: &str = "entity";
pub const SELECT_DATE: &str = "date";
pub const SELECT_VALUE: &str = "value";
pub const SELECT_FACET: &str = "facet";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObservationRequest {
	pub variable: DcidOrExpression,
	pub entity: DcidOrExpression,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub date: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub value: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub select: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub filter: Option<ObservationFilter>,
}

impl ObservationRequest {
	pub fn selects(&self, field: &str) -> bool {
		self.select.iter().any(|s| s == field)
	}
}

/// A single node reference in arcs, search results, and resolve output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityInfo {
	#[serde(skip_serializing_if = "String::is_empty")]
	pub name: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub types: Vec<String>,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub dcid: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub provenance_id: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub value: String,
}

impl EntityInfo {
	/// Dedup key for node-arc and search merging: dcid when present,
	/// otherwise the literal value.
	pub fn merge_key(&self) -> &str {
		if self.dcid.is_empty() {
			&self.value
		} else {
			&self.dcid
		}
	}
}

/// Values of one property arc.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Nodes {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub nodes: Vec<EntityInfo>,
}

/// Property-keyed arcs out of (or into) a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkedGraph {
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub arcs: BTreeMap<String, Nodes>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeRequest {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub nodes: Vec<String>,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub property: String,
	#[serde(skip_serializing_if = "is_zero")]
	pub limit: i32,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub next_token: String,
}

/// Node traversal result. `next_token` is an opaque pagination cursor;
/// callers pass it back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeResponse {
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub data: BTreeMap<String, LinkedGraph>,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub next_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeSearchRequest {
	#[serde(skip_serializing_if = "String::is_empty")]
	pub query: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeSearchResponse {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub results: Vec<EntityInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveRequest {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub nodes: Vec<String>,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub property: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveCandidate {
	#[serde(skip_serializing_if = "String::is_empty")]
	pub dcid: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub dominant_type: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub type_of: Vec<String>,
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub metadata: BTreeMap<String, String>,
}

/// Resolution result for one input node, candidates ordered by the
/// resolution path's priority rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveEntity {
	#[serde(skip_serializing_if = "String::is_empty")]
	pub node: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub candidates: Vec<ResolveCandidate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveResponse {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub entities: Vec<ResolveEntity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecognizePlacesRequest {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub queries: Vec<String>,
	#[serde(skip_serializing_if = "std::ops::Not::not")]
	pub resolve_bogus_name: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecognizedPlace {
	#[serde(skip_serializing_if = "String::is_empty")]
	pub dcid: String,
}

/// One segment of a recognized query: either a run of free text or a place
/// span with its candidate dcids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecognizedItem {
	#[serde(skip_serializing_if = "String::is_empty")]
	pub span: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub places: Vec<RecognizedPlace>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecognizedItems {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub items: Vec<RecognizedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecognizePlacesResponse {
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub query_items: BTreeMap<String, RecognizedItems>,
}
