use axum::extract::State;
use axum::Json;
use bifrost::handlers;
use bifrost::model::RecognizePlacesRequest;

mod common;

#[cfg(feature = "integration-tests")]
mod integration_tests {
	use super::*;

	#[tokio::test]
	async fn segments_query_with_containment_disambiguation() {
		let dir = tempfile::tempdir().expect("tempdir");
		common::write_import_fixture(dir.path());
		let state = common::app_state(dir.path()).await;

		let Json(response) = handlers::recognize_places(
			State(state),
			Json(RecognizePlacesRequest {
				queries: vec!["Really? Mountain View, Santa Clara County!?".into()],
				resolve_bogus_name: false,
			}),
		)
		.await
		.expect("recognize");

		let items = &response.query_items["Really? Mountain View, Santa Clara County!?"].items;
		assert_eq!(items.len(), 3);

		assert_eq!(items[0].span, "Really?");
		assert!(items[0].places.is_empty());

		// Containment narrows the span to the Santa Clara County city.
		assert_eq!(items[1].span, "Mountain View , Santa Clara County");
		assert_eq!(items[1].places.len(), 1);
		assert_eq!(items[1].places[0].dcid, "geoId/0649670");

		assert_eq!(items[2].span, "!?");
		assert!(items[2].places.is_empty());
	}

	#[tokio::test]
	async fn batch_queries_are_recognized_independently() {
		let dir = tempfile::tempdir().expect("tempdir");
		common::write_import_fixture(dir.path());
		let state = common::app_state(dir.path()).await;

		let Json(response) = handlers::recognize_places(
			State(state),
			Json(RecognizePlacesRequest {
				queries: vec![
					"american states by population".into(),
					"nothing recognizable here".into(),
				],
				resolve_bogus_name: false,
			}),
		)
		.await
		.expect("recognize");

		// The adjectival span keeps the country on "american" and frees
		// the suffix back into the surrounding text.
		let adjectival = &response.query_items["american states by population"].items;
		assert_eq!(adjectival[0].span, "american");
		assert_eq!(adjectival[0].places[0].dcid, "country/USA");
		assert_eq!(adjectival[1].span, "states by population");

		let unrecognized = &response.query_items["nothing recognizable here"].items;
		assert_eq!(unrecognized.len(), 1);
		assert!(unrecognized[0].places.is_empty());
	}
}
