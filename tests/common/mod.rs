//! Shared fixtures for integration tests: a small CSV import directory and
//! an application state built over it.

use std::io::Write;
use std::path::Path;

use bifrost::config::Settings;
use bifrost::state::AppState;

/// Write a small import: two states with population series, a female
/// population series, a registered formula for the missing male series,
/// and the formula inputs for a compound derived request.
pub fn write_import_fixture(dir: &Path) {
	let mut observations =
		std::fs::File::create(dir.join("observations.csv")).expect("create observations");
	writeln!(observations, "entity,variable,date,value").expect("write");
	for row in [
		"geoId/06,Count_Person,2019,39000000",
		"geoId/06,Count_Person,2020,39538223",
		"geoId/48,Count_Person,2020,29145505",
		"geoId/06,Count_Person_Female,2020,19700000",
		"geoId/48,Count_Person_Female,2020,14500000",
		"geoId/06,SV_1,1,10",
		"geoId/06,SV_2,1,4",
		"geoId/06,SV_3,1,2",
	] {
		writeln!(observations, "{}", row).expect("write");
	}

	let mut triples = std::fs::File::create(dir.join("triples.csv")).expect("create triples");
	writeln!(triples, "subject,predicate,object_id,object_value").expect("write");
	for row in [
		"country/USA,name,,United States",
		"geoId/06,typeOf,State,",
		"geoId/06,name,,California",
		"geoId/06,containedInPlace,country/USA,",
		"geoId/06,wikidataId,,Q99",
		"geoId/48,typeOf,State,",
		"geoId/48,name,,Texas",
		"geoId/48,containedInPlace,country/USA,",
		"dc/g/Demographics,typeOf,StatVarGroup,",
		"dc/g/Demographics,name,,Demographics",
		"Count_Person,memberOf,dc/g/Demographics,",
		"Count_Person,name,,Population",
		"Count_Person,searchName,,people count",
	] {
		writeln!(triples, "{}", row).expect("write");
	}

	let mut formulas = std::fs::File::create(dir.join("formulas.csv")).expect("create formulas");
	writeln!(formulas, "variable,formula").expect("write");
	writeln!(formulas, "Count_Person_Male,Count_Person - Count_Person_Female").expect("write");
}

/// Build application state over a fixture import directory.
pub async fn app_state(import_dir: &Path) -> AppState {
	let settings = Settings {
		import_dir: Some(import_dir.display().to_string()),
		..Default::default()
	};
	bifrost::build_state(&settings).await.expect("build state")
}
