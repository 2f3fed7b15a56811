pub mod cache;
pub mod calc;
pub mod config;
pub mod dispatch;
pub mod embeddings;
pub mod errors;
pub mod handlers;
pub mod ingest;
pub mod merge;
pub mod model;
pub mod observability;
pub mod pagination;
pub mod parse;
pub mod recognize;
pub mod remote;
pub mod state;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::cache::CacheOptions;
use crate::calc::PreferredImports;
use crate::dispatch::{DataSource, Dispatcher};
use crate::embeddings::EmbeddingsClient;
use crate::recognize::RecogPlaceStore;
use crate::remote::RemoteMixer;
use crate::state::AppState;

/// Build the shared application state from settings: load imports, build
/// the cache, assemble the dispatcher's source list (configured order is
/// merge priority), and construct the sidecar clients.
pub async fn build_state(settings: &config::Settings) -> anyhow::Result<AppState> {
	let mut sources: Vec<Arc<dyn DataSource>> = Vec::new();

	let cache = match &settings.import_dir {
		Some(dir) => {
			let store = Arc::new(ingest::CsvStore::open(Path::new(dir))?);
			let cache = cache::build(store.as_ref(), &CacheOptions::all()).await?;
			sources.push(store);
			Arc::new(cache)
		}
		None => Arc::new(cache::Cache::empty()),
	};
	sources.push(Arc::new(cache::CacheDataSource::new(cache.clone())));

	let remote = match &settings.remote_mixer_domain {
		Some(domain) => {
			log::info!("remote mixer configured: {}", domain);
			Some(Arc::new(RemoteMixer::new(domain)?))
		}
		None => None,
	};

	let embeddings = match &settings.embeddings_url {
		Some(url) => {
			log::info!("embeddings sidecar configured: {}", url);
			Some(Arc::new(EmbeddingsClient::new(url)?))
		}
		None => None,
	};

	Ok(AppState {
		dispatcher: Arc::new(Dispatcher::new(sources, remote)),
		cache,
		recog_store: Arc::new(RecogPlaceStore::load_embedded()?),
		embeddings,
		facet_ranker: Arc::new(PreferredImports::default()),
		max_series: settings.max_series,
	})
}

/// Build the `/v2` router over the shared state.
pub fn router(app_state: AppState) -> Router {
	Router::new()
		.route("/v2/observation", post(handlers::observation))
		.route("/v2/resolve", post(handlers::resolve))
		.route("/v2/node", post(handlers::node))
		.route("/v2/node_search", post(handlers::node_search))
		.route("/v2/recognize_places", post(handlers::recognize_places))
		.route("/health", get(handlers::health))
		.route("/metrics", get(handlers::metrics_text))
		.layer(TraceLayer::new_for_http())
		.with_state(app_state)
}

/// Start the gateway.
///
/// This function intentionally logs errors rather than returning them so
/// the simple `main` runner can call it without changing its signature.
pub async fn run() {
	// Load settings (fall back to defaults on error)
	let settings = match config::load() {
		Ok(s) => s,
		Err(e) => {
			eprintln!("warning: failed to load config: {}", e);
			config::Settings::default()
		}
	};

	if let Err(e) =
		observability::init_observability(settings.log_level.as_deref().unwrap_or("info"))
	{
		eprintln!("warning: failed to initialize observability: {}", e);
	}

	let app_state = match build_state(&settings).await {
		Ok(state) => state,
		Err(e) => {
			log::error!("failed to build application state: {}", e);
			return;
		}
	};
	let app = router(app_state);

	let bind_addr: SocketAddr = match format!("{}:{}", settings.host, settings.port).parse() {
		Ok(a) => a,
		Err(e) => {
			log::error!("invalid listen address: {}", e);
			return;
		}
	};
	let listener = match tokio::net::TcpListener::bind(bind_addr).await {
		Ok(l) => l,
		Err(e) => {
			log::error!("failed to bind {}: {}", bind_addr, e);
			return;
		}
	};

	log::info!(
		"bifrost serving http://{} (POST /v2/observation, /v2/resolve, /v2/node, /v2/node_search, /v2/recognize_places)",
		bind_addr
	);
	if let Err(e) = axum::serve(listener, app).await {
		log::error!("server error: {}", e);
	}
}
