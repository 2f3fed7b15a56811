use std::sync::Arc;

use crate::cache::Cache;
use crate::calc::PreferredImports;
use crate::dispatch::Dispatcher;
use crate::embeddings::EmbeddingsClient;
use crate::recognize::RecogPlaceStore;

/// Application state passed to handlers via Axum's `State` extractor.
///
/// Everything here is built once at startup and shared read-only across
/// requests; handlers own no cross-request mutable state.
#[derive(Clone)]
pub struct AppState {
	pub dispatcher: Arc<Dispatcher>,
	pub cache: Arc<Cache>,
	pub recog_store: Arc<RecogPlaceStore>,
	pub embeddings: Option<Arc<EmbeddingsClient>>,
	pub facet_ranker: Arc<PreferredImports>,
	pub max_series: usize,
}
