//! Place recognition over free-text queries.
//!
//! Produces a segmentation of each query into alternating place spans and
//! free-text spans. Recognition never fails: a query with nothing
//! recognizable comes back as a single non-place item.

pub mod spans;
pub mod store;
pub mod tokens;

use std::sync::Arc;

use crate::model::{
	RecognizePlacesRequest, RecognizePlacesResponse, RecognizedItems,
};

pub use store::{RecogPlace, RecogPlaceStore};

/// Recognize places in one query.
pub fn recognize_query(
	store: &RecogPlaceStore,
	query: &str,
	resolve_bogus_name: bool,
) -> RecognizedItems {
	let tokens = tokens::tokenize(query);
	let matched = spans::match_spans(store, &tokens);
	let collapsed = spans::collapse_containment(matched);
	let filtered = spans::filter_bogus_names(collapsed, store, resolve_bogus_name);
	let split = spans::split_adjectival_suffixes(filtered, store);
	let ranked = spans::rank_and_trim(split);
	RecognizedItems {
		items: spans::format_items(ranked),
	}
}

/// Recognize places in a batch of queries, one task per query.
pub async fn recognize_places(
	store: Arc<RecogPlaceStore>,
	req: &RecognizePlacesRequest,
) -> RecognizePlacesResponse {
	let mut handles = Vec::with_capacity(req.queries.len());
	for query in &req.queries {
		let store = store.clone();
		let query = query.clone();
		let resolve_bogus_name = req.resolve_bogus_name;
		handles.push(tokio::spawn(async move {
			let items = recognize_query(&store, &query, resolve_bogus_name);
			(query, items)
		}));
	}

	let mut response = RecognizePlacesResponse::default();
	for handle in handles {
		match handle.await {
			Ok((query, items)) => {
				response.query_items.insert(query, items);
			}
			Err(e) => {
				// Recognition has no error path; a panicked task only loses
				// its own query's segmentation.
				log::error!("recognize task failed: {}", e);
			}
		}
	}
	response
}
