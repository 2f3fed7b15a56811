use axum::extract::State;
use axum::Json;
use bifrost::handlers;
use bifrost::model::ResolveRequest;

mod common;

#[cfg(feature = "integration-tests")]
mod integration_tests {
	use super::*;

	#[tokio::test]
	async fn resolves_external_identifier() {
		let dir = tempfile::tempdir().expect("tempdir");
		common::write_import_fixture(dir.path());
		let state = common::app_state(dir.path()).await;

		let Json(response) = handlers::resolve(
			State(state),
			Json(ResolveRequest {
				nodes: vec!["Q99".into()],
				property: "<-wikidataId->dcid".into(),
			}),
		)
		.await
		.expect("resolve");

		assert_eq!(response.entities[0].node, "Q99");
		assert_eq!(response.entities[0].candidates[0].dcid, "geoId/06");
	}

	#[tokio::test]
	async fn bad_coordinate_literal_is_invalid_argument() {
		let dir = tempfile::tempdir().expect("tempdir");
		common::write_import_fixture(dir.path());
		let state = common::app_state(dir.path()).await;

		let result = handlers::resolve(
			State(state),
			Json(ResolveRequest {
				nodes: vec!["not-a-coordinate".into()],
				property: "<-geoCoordinate->dcid".into(),
			}),
		)
		.await;
		assert!(matches!(
			result,
			Err(bifrost::errors::ServiceError::InvalidArgument(_))
		));
	}

	#[tokio::test]
	async fn unknown_property_shape_is_invalid_argument() {
		let dir = tempfile::tempdir().expect("tempdir");
		common::write_import_fixture(dir.path());
		let state = common::app_state(dir.path()).await;

		let result = handlers::resolve(
			State(state),
			Json(ResolveRequest {
				nodes: vec!["x".into()],
				property: "wikidataId".into(),
			}),
		)
		.await;
		assert!(matches!(
			result,
			Err(bifrost::errors::ServiceError::InvalidArgument(_))
		));
	}

	#[tokio::test]
	async fn description_resolution_requires_sidecar() {
		let dir = tempfile::tempdir().expect("tempdir");
		common::write_import_fixture(dir.path());
		let state = common::app_state(dir.path()).await;

		let result = handlers::resolve(
			State(state),
			Json(ResolveRequest {
				nodes: vec!["how many people live in california".into()],
				property: "<-description->dcid".into(),
			}),
		)
		.await;
		assert!(matches!(
			result,
			Err(bifrost::errors::ServiceError::Unavailable(_))
		));
	}

	#[tokio::test]
	async fn variable_search_uses_cached_index() {
		let dir = tempfile::tempdir().expect("tempdir");
		common::write_import_fixture(dir.path());
		let state = common::app_state(dir.path()).await;

		let Json(response) = handlers::node_search(
			State(state),
			Json(bifrost::model::NodeSearchRequest {
				query: "population".into(),
				types: vec!["StatisticalVariable".into()],
			}),
		)
		.await
		.expect("node search");

		assert!(response
			.results
			.iter()
			.any(|r| r.dcid == "Count_Person"));
	}
}
