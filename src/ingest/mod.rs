//! CSV bulk import.
//!
//! A custom import directory holds up to three files: `observations.csv`
//! (`entity,variable,date,value`), `triples.csv`
//! (`subject,predicate,object_id,object_value`), and `formulas.csv`
//! (`variable,formula`). The loaded store serves the data-source interface
//! for local queries and the bulk cache-build interface, which is exactly
//! the role the SQL tier plays in a full deployment.
//!
//! A triple's `object_value` may be a complex-value literal such as
//! `[Years 10 20]` or `[LatLong 37.4N 122.1W]`; those are resolved into
//! node references at load time.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;

use async_trait::async_trait;

use crate::cache::{CacheStore, StatVarGroupNode, StatVarInfo};
use crate::dispatch::DataSource;
use crate::errors::{Result, ServiceError};
use crate::model::{
	EntityInfo, EntityObservation, Facet, FacetObservation, LinkedGraph, NodeRequest,
	NodeResponse, NodeSearchRequest, NodeSearchResponse, Nodes, ObservationRequest,
	ObservationResponse, PointStat, ResolveCandidate, ResolveEntity, ResolveRequest,
	ResolveResponse, SELECT_VALUE,
};
use crate::parse;

const OBSERVATIONS_FILE: &str = "observations.csv";
const TRIPLES_FILE: &str = "triples.csv";
const FORMULAS_FILE: &str = "formulas.csv";

/// One loaded triple. Exactly one of `object_id` and `object_value` is set.
#[derive(Debug, Clone, Default)]
struct Triple {
	subject: String,
	predicate: String,
	object_id: String,
	object_value: String,
}

/// In-memory store over one imported CSV directory.
pub struct CsvStore {
	import_name: String,
	facet: Facet,
	facet_id: String,
	/// (variable, entity) to date-ascending points.
	observations: BTreeMap<(String, String), Vec<PointStat>>,
	triples: Vec<Triple>,
	/// subject -> predicate -> objects.
	out_arcs: BTreeMap<String, BTreeMap<String, Vec<EntityInfo>>>,
	/// object id -> predicate -> subject dcids.
	in_arcs: BTreeMap<String, BTreeMap<String, Vec<String>>>,
	formulas: BTreeMap<String, Vec<String>>,
}

impl CsvStore {
	/// Load an import directory. Missing files are simply empty sections.
	pub fn open(dir: &Path) -> Result<Self> {
		let import_name = dir
			.file_name()
			.and_then(|n| n.to_str())
			.unwrap_or("custom")
			.to_string();
		let facet = Facet {
			import_name: import_name.clone(),
			provenance_url: format!("file://{}", dir.display()),
			..Default::default()
		};
		let facet_id = facet.id();

		let mut store = Self {
			import_name,
			facet,
			facet_id,
			observations: BTreeMap::new(),
			triples: Vec::new(),
			out_arcs: BTreeMap::new(),
			in_arcs: BTreeMap::new(),
			formulas: BTreeMap::new(),
		};

		let observations_path = dir.join(OBSERVATIONS_FILE);
		if observations_path.exists() {
			store.load_observations(&observations_path)?;
		}
		let triples_path = dir.join(TRIPLES_FILE);
		if triples_path.exists() {
			store.load_triples(&triples_path)?;
		}
		let formulas_path = dir.join(FORMULAS_FILE);
		if formulas_path.exists() {
			store.load_formulas(&formulas_path)?;
		}

		log::info!(
			"import {}: {} series, {} triples, {} formula variables",
			store.import_name,
			store.observations.len(),
			store.triples.len(),
			store.formulas.len()
		);
		Ok(store)
	}

	fn load_observations(&mut self, path: &Path) -> Result<()> {
		let mut reader = csv_reader(path)?;
		for record in reader.records() {
			let record = record.map_err(|e| bad_file(path, e))?;
			let entity = get(&record, 0);
			let variable = get(&record, 1);
			let date = get(&record, 2);
			let raw_value = get(&record, 3);
			if entity.is_empty() || variable.is_empty() || date.is_empty() {
				return Err(bad_file(path, "observation row missing entity/variable/date"));
			}
			let value: f64 = raw_value
				.parse()
				.map_err(|_| bad_file(path, format!("bad value {:?}", raw_value)))?;
			self.observations
				.entry((variable, entity))
				.or_default()
				.push(PointStat { date, value });
		}
		for points in self.observations.values_mut() {
			points.sort_by(|a, b| a.date.cmp(&b.date));
			points.dedup_by(|a, b| a.date == b.date);
		}
		Ok(())
	}

	fn load_triples(&mut self, path: &Path) -> Result<()> {
		let mut reader = csv_reader(path)?;
		for record in reader.records() {
			let record = record.map_err(|e| bad_file(path, e))?;
			let subject = get(&record, 0);
			let predicate = get(&record, 1);
			let mut object_id = get(&record, 2);
			let mut object_value = get(&record, 3);
			if subject.is_empty() || predicate.is_empty() {
				return Err(bad_file(path, "triple row missing subject/predicate"));
			}
			// Complex-value literals resolve into node references.
			if object_id.is_empty() && object_value.starts_with('[') {
				object_id = parse::parse_complex_value(&object_value)?;
				object_value = String::new();
			}
			if object_id.is_empty() == object_value.is_empty() {
				return Err(bad_file(
					path,
					format!(
						"triple ({}, {}) needs exactly one of object_id/object_value",
						subject, predicate
					),
				));
			}
			self.triples.push(Triple {
				subject,
				predicate,
				object_id,
				object_value,
			});
		}

		for triple in &self.triples {
			let object = if triple.object_id.is_empty() {
				EntityInfo {
					value: triple.object_value.clone(),
					provenance_id: self.facet_id.clone(),
					..Default::default()
				}
			} else {
				EntityInfo {
					dcid: triple.object_id.clone(),
					provenance_id: self.facet_id.clone(),
					..Default::default()
				}
			};
			self.out_arcs
				.entry(triple.subject.clone())
				.or_default()
				.entry(triple.predicate.clone())
				.or_default()
				.push(object);
			if !triple.object_id.is_empty() {
				self.in_arcs
					.entry(triple.object_id.clone())
					.or_default()
					.entry(triple.predicate.clone())
					.or_default()
					.push(triple.subject.clone());
			}
		}
		Ok(())
	}

	fn load_formulas(&mut self, path: &Path) -> Result<()> {
		let mut reader = csv_reader(path)?;
		for record in reader.records() {
			let record = record.map_err(|e| bad_file(path, e))?;
			let variable = get(&record, 0);
			let formula = get(&record, 1);
			if variable.is_empty() || formula.is_empty() {
				return Err(bad_file(path, "formula row missing variable/formula"));
			}
			self.formulas.entry(variable).or_default().push(formula);
		}
		Ok(())
	}

	fn name_of(&self, dcid: &str) -> String {
		self.out_arcs
			.get(dcid)
			.and_then(|arcs| arcs.get("name"))
			.and_then(|nodes| nodes.first())
			.map(|n| n.value.clone())
			.unwrap_or_default()
	}

	fn types_of(&self, dcid: &str) -> Vec<String> {
		self.out_arcs
			.get(dcid)
			.and_then(|arcs| arcs.get("typeOf"))
			.map(|nodes| nodes.iter().map(|n| n.dcid.clone()).collect())
			.unwrap_or_default()
	}

	/// All transitive contained-in descendants of `ancestor` with the given
	/// type, in stable order.
	fn contained_in_children(&self, ancestor: &str, child_type: &str) -> Vec<String> {
		let mut seen: HashSet<String> = HashSet::new();
		let mut matched = Vec::new();
		let mut queue: VecDeque<String> = VecDeque::from([ancestor.to_string()]);
		while let Some(current) = queue.pop_front() {
			let Some(children) = self
				.in_arcs
				.get(&current)
				.and_then(|arcs| arcs.get("containedInPlace"))
			else {
				continue;
			};
			for child in children {
				if !seen.insert(child.clone()) {
					continue;
				}
				if self.types_of(child).iter().any(|t| t == child_type) {
					matched.push(child.clone());
				}
				queue.push_back(child.clone());
			}
		}
		matched.sort();
		matched
	}

	fn coordinate_candidates(&self, latitude: f64, longitude: f64) -> Vec<ResolveCandidate> {
		let wanted = (
			(latitude * 1e5).round() as i64,
			(longitude * 1e5).round() as i64,
		);
		let mut candidates = Vec::new();
		for (dcid, arcs) in &self.out_arcs {
			let coordinate = |key: &str| {
				arcs.get(key)
					.and_then(|nodes| nodes.first())
					.and_then(|n| n.value.parse::<f64>().ok())
			};
			let (Some(lat), Some(lng)) = (coordinate("latitude"), coordinate("longitude"))
			else {
				continue;
			};
			if ((lat * 1e5).round() as i64, (lng * 1e5).round() as i64) == wanted {
				candidates.push(ResolveCandidate {
					dcid: dcid.clone(),
					dominant_type: self.types_of(dcid).first().cloned().unwrap_or_default(),
					..Default::default()
				});
			}
		}
		candidates
	}
}

fn csv_reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
	csv::ReaderBuilder::new()
		.has_headers(true)
		.trim(csv::Trim::All)
		.from_path(path)
		.map_err(|e| bad_file(path, e))
}

fn get(record: &csv::StringRecord, index: usize) -> String {
	record.get(index).unwrap_or("").to_string()
}

fn bad_file(path: &Path, e: impl std::fmt::Display) -> ServiceError {
	ServiceError::InvalidArgument(format!("import file {}: {}", path.display(), e))
}

#[async_trait]
impl DataSource for CsvStore {
	fn id(&self) -> String {
		format!("csv/{}", self.import_name)
	}

	async fn node(&self, req: &NodeRequest, _page_size: i32) -> Result<NodeResponse> {
		let mut response = NodeResponse::default();
		for node in &req.nodes {
			let mut graph = LinkedGraph::default();
			if let Ok(contained) =
				parse::parse_contained_in(&format!("{}{}", node, req.property))
			{
				let children =
					self.contained_in_children(&contained.ancestor, &contained.child_type);
				if !children.is_empty() {
					graph.arcs.insert(
						req.property.clone(),
						Nodes {
							nodes: children
								.into_iter()
								.map(|dcid| EntityInfo {
									name: self.name_of(&dcid),
									dcid,
									..Default::default()
								})
								.collect(),
						},
					);
				}
			} else if let Some(property) = req.property.strip_prefix("->") {
				if let Some(arcs) = self.out_arcs.get(node) {
					if property.is_empty() {
						for (predicate, nodes) in arcs {
							graph.arcs.insert(
								format!("->{}", predicate),
								Nodes {
									nodes: nodes.clone(),
								},
							);
						}
					} else if let Some(nodes) = arcs.get(property) {
						graph.arcs.insert(
							req.property.clone(),
							Nodes {
								nodes: nodes.clone(),
							},
						);
					}
				}
			} else if let Some(property) = req.property.strip_prefix("<-") {
				if let Some(subjects) =
					self.in_arcs.get(node).and_then(|arcs| arcs.get(property))
				{
					graph.arcs.insert(
						req.property.clone(),
						Nodes {
							nodes: subjects
								.iter()
								.map(|dcid| EntityInfo {
									name: self.name_of(dcid),
									dcid: dcid.clone(),
									..Default::default()
								})
								.collect(),
						},
					);
				}
			} else {
				return Err(ServiceError::InvalidArgument(format!(
					"invalid node property {:?}",
					req.property
				)));
			}
			if !graph.arcs.is_empty() {
				response.data.insert(node.clone(), graph);
			}
		}
		Ok(response)
	}

	async fn observation(&self, req: &ObservationRequest) -> Result<ObservationResponse> {
		let mut response = ObservationResponse::default();
		if let Some(filter) = &req.filter {
			if !filter.facet_ids.is_empty() && !filter.facet_ids.contains(&self.facet_id) {
				return Ok(response);
			}
		}
		let with_values = req.select.is_empty() || req.selects(SELECT_VALUE);

		let mut used_facet = false;
		for variable in &req.variable.dcids {
			for entity in &req.entity.dcids {
				let Some(points) = self.observations.get(&(variable.clone(), entity.clone()))
				else {
					continue;
				};
				let selected: Vec<PointStat> = if req.date.is_empty() {
					points.clone()
				} else {
					points.iter().filter(|p| p.date == req.date).cloned().collect()
				};
				if selected.is_empty() && !req.date.is_empty() {
					continue;
				}
				let facet_observation = if with_values {
					FacetObservation::new(self.facet_id.clone(), selected)
				} else {
					FacetObservation {
						facet_id: self.facet_id.clone(),
						..Default::default()
					}
				};
				used_facet = true;
				response
					.by_variable
					.entry(variable.clone())
					.or_default()
					.by_entity
					.insert(
						entity.clone(),
						EntityObservation {
							ordered_facets: vec![facet_observation],
						},
					);
			}
		}
		if used_facet {
			response
				.facets
				.insert(self.facet_id.clone(), self.facet.clone());
		}
		Ok(response)
	}

	async fn node_search(&self, req: &NodeSearchRequest) -> Result<NodeSearchResponse> {
		let tokens: Vec<String> = req
			.query
			.split_whitespace()
			.map(|t| t.to_lowercase())
			.collect();
		if tokens.is_empty() {
			return Ok(NodeSearchResponse::default());
		}

		let mut results = Vec::new();
		for (dcid, arcs) in &self.out_arcs {
			let Some(name) = arcs
				.get("name")
				.and_then(|nodes| nodes.first())
				.map(|n| n.value.clone())
			else {
				continue;
			};
			let lowered = name.to_lowercase();
			if !tokens.iter().all(|t| lowered.contains(t.as_str())) {
				continue;
			}
			let types = self.types_of(dcid);
			if !req.types.is_empty() && !types.iter().any(|t| req.types.contains(t)) {
				continue;
			}
			results.push(EntityInfo {
				name,
				types,
				dcid: dcid.clone(),
				..Default::default()
			});
		}
		results.sort_by(|a, b| {
			a.name
				.len()
				.cmp(&b.name.len())
				.then_with(|| a.dcid.cmp(&b.dcid))
		});
		Ok(NodeSearchResponse { results })
	}

	async fn resolve(&self, req: &ResolveRequest) -> Result<ResolveResponse> {
		let property = req.property.trim();
		let Some(id_property) = property
			.strip_prefix("<-")
			.and_then(|p| p.strip_suffix("->dcid"))
		else {
			return Err(ServiceError::InvalidArgument(format!(
				"invalid resolve property {:?}",
				req.property
			)));
		};

		let mut entities = Vec::new();
		for node in &req.nodes {
			let mut candidates = Vec::new();
			if id_property == "geoCoordinate" {
				let (latitude, longitude) = parse::parse_coordinate_literal(node)?;
				candidates = self.coordinate_candidates(latitude, longitude);
			} else {
				for triple in &self.triples {
					if triple.predicate == id_property && triple.object_value == *node {
						candidates.push(ResolveCandidate {
							dcid: triple.subject.clone(),
							..Default::default()
						});
					}
				}
				candidates.sort_by(|a, b| a.dcid.cmp(&b.dcid));
			}
			entities.push(ResolveEntity {
				node: node.clone(),
				candidates,
			});
		}
		Ok(ResolveResponse { entities })
	}
}

#[async_trait]
impl CacheStore for CsvStore {
	async fn raw_svgs(&self) -> Result<BTreeMap<String, StatVarGroupNode>> {
		let mut svgs: BTreeMap<String, StatVarGroupNode> = BTreeMap::new();
		for (dcid, _) in self
			.out_arcs
			.iter()
			.filter(|(dcid, _)| self.types_of(dcid).iter().any(|t| t == "StatVarGroup"))
		{
			let child_svgs = self
				.in_arcs
				.get(dcid)
				.and_then(|arcs| arcs.get("specializationOf"))
				.cloned()
				.unwrap_or_default();
			let child_stat_vars = self
				.in_arcs
				.get(dcid)
				.and_then(|arcs| arcs.get("memberOf"))
				.map(|members| {
					members
						.iter()
						.map(|sv| StatVarInfo {
							dcid: sv.clone(),
							display_name: self.name_of(sv),
							search_names: self
								.out_arcs
								.get(sv)
								.and_then(|arcs| arcs.get("searchName"))
								.map(|nodes| nodes.iter().map(|n| n.value.clone()).collect())
								.unwrap_or_default(),
						})
						.collect()
				})
				.unwrap_or_default();
			svgs.insert(
				dcid.clone(),
				StatVarGroupNode {
					name: self.name_of(dcid),
					child_svgs,
					child_stat_vars,
				},
			);
		}
		Ok(svgs)
	}

	async fn sql_provenances(&self) -> Result<BTreeMap<String, Facet>> {
		if self.observations.is_empty() {
			return Ok(BTreeMap::new());
		}
		Ok([(self.facet_id.clone(), self.facet.clone())]
			.into_iter()
			.collect())
	}

	async fn sql_existence(&self) -> Result<HashSet<(String, String)>> {
		Ok(self
			.observations
			.keys()
			.map(|(variable, entity)| (entity.clone(), variable.clone()))
			.collect())
	}

	async fn sv_formula_strings(&self) -> Result<BTreeMap<String, Vec<String>>> {
		Ok(self.formulas.clone())
	}
}
