//! In-memory place index for the recognizer.
//!
//! The reference data (place names, abbreviations, bogus names, adjectival
//! names) is compiled into the binary via `include_str!` and parsed once at
//! startup. Nothing on the query path touches the filesystem.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::errors::{Result, ServiceError};

const RECOG_PLACES_CSV: &str = include_str!("data/recog_places.csv");
const ABBREVIATED_NAMES_CSV: &str = include_str!("data/abbreviated_names.csv");
const BOGUS_PLACE_NAMES_CSV: &str = include_str!("data/bogus_place_names.csv");
const ADJECTIVAL_NAMES_CSV: &str = include_str!("data/adjectival_names.csv");

/// One recognizable place. Names are stored as lowercased token sequences
/// so span matching can compare token-by-token without re-splitting.
#[derive(Debug, Clone)]
pub struct RecogPlace {
	pub dcid: String,
	pub names: Vec<Vec<String>>,
	pub containing_places: Vec<String>,
	pub population: i64,
}

/// The full recognizer index, published immutably after load.
pub struct RecogPlaceStore {
	/// Lowercased first name token to the places carrying such a name.
	pub recog_place_map: HashMap<String, Vec<Arc<RecogPlace>>>,
	/// Case-sensitive abbreviation (e.g. "CA") to places.
	pub abbreviated_name_to_places: HashMap<String, Vec<Arc<RecogPlace>>>,
	/// Common English words that accidentally name a place.
	pub bogus_place_names: HashSet<String>,
	/// Adjectival forms with a recognized suffix, e.g. "american states".
	pub adjectival_names_with_suffix: HashSet<String>,
}

impl RecogPlaceStore {
	/// Build the store from the embedded reference data.
	pub fn load_embedded() -> Result<Self> {
		Self::load(
			RECOG_PLACES_CSV,
			ABBREVIATED_NAMES_CSV,
			BOGUS_PLACE_NAMES_CSV,
			ADJECTIVAL_NAMES_CSV,
		)
	}

	fn load(
		places_csv: &str,
		abbreviations_csv: &str,
		bogus_csv: &str,
		adjectival_csv: &str,
	) -> Result<Self> {
		let mut by_dcid: HashMap<String, Arc<RecogPlace>> = HashMap::new();
		let mut recog_place_map: HashMap<String, Vec<Arc<RecogPlace>>> = HashMap::new();

		let mut reader = csv::ReaderBuilder::new()
			.has_headers(true)
			.trim(csv::Trim::All)
			.from_reader(places_csv.as_bytes());
		for record in reader.records() {
			let record = record.map_err(bad_data)?;
			let dcid = field(&record, 0);
			let names: Vec<Vec<String>> = field(&record, 1)
				.split(';')
				.filter(|n| !n.trim().is_empty())
				.map(|name| {
					name.split_whitespace()
						.map(|t| t.to_lowercase())
						.collect()
				})
				.collect();
			if dcid.is_empty() || names.is_empty() {
				return Err(bad_data(format!("place row missing dcid or names: {:?}", record)));
			}
			let containing_places: Vec<String> = field(&record, 2)
				.split(';')
				.filter(|c| !c.is_empty())
				.map(String::from)
				.collect();
			let population = field(&record, 3).parse::<i64>().unwrap_or(0);

			let place = Arc::new(RecogPlace {
				dcid: dcid.clone(),
				names,
				containing_places,
				population,
			});
			for name in &place.names {
				if let Some(first) = name.first() {
					let bucket = recog_place_map.entry(first.clone()).or_default();
					if !bucket.iter().any(|p| p.dcid == place.dcid) {
						bucket.push(place.clone());
					}
				}
			}
			by_dcid.insert(dcid, place);
		}

		let mut abbreviated_name_to_places: HashMap<String, Vec<Arc<RecogPlace>>> = HashMap::new();
		let mut reader = csv::ReaderBuilder::new()
			.has_headers(true)
			.trim(csv::Trim::All)
			.from_reader(abbreviations_csv.as_bytes());
		for record in reader.records() {
			let record = record.map_err(bad_data)?;
			let abbreviation = field(&record, 0);
			let dcid = field(&record, 1);
			let place = by_dcid.get(&dcid).ok_or_else(|| {
				bad_data(format!("abbreviation {:?} references unknown place {:?}", abbreviation, dcid))
			})?;
			abbreviated_name_to_places
				.entry(abbreviation)
				.or_default()
				.push(place.clone());
		}

		Ok(Self {
			recog_place_map,
			abbreviated_name_to_places,
			bogus_place_names: load_name_set(bogus_csv)?,
			adjectival_names_with_suffix: load_name_set(adjectival_csv)?,
		})
	}
}

fn load_name_set(data: &str) -> Result<HashSet<String>> {
	let mut out = HashSet::new();
	let mut reader = csv::ReaderBuilder::new()
		.has_headers(true)
		.trim(csv::Trim::All)
		.from_reader(data.as_bytes());
	for record in reader.records() {
		let record = record.map_err(bad_data)?;
		let name = field(&record, 0);
		if !name.is_empty() {
			out.insert(name.to_lowercase());
		}
	}
	Ok(out)
}

fn field(record: &csv::StringRecord, index: usize) -> String {
	record.get(index).unwrap_or("").to_string()
}

fn bad_data(e: impl std::fmt::Display) -> ServiceError {
	ServiceError::Internal(format!("bad embedded place data: {}", e))
}
