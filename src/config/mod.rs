use anyhow::Result;
use serde::Deserialize;

use crate::dispatch::DEFAULT_MAX_SERIES;

/// Runtime configuration for Bifrost.
///
/// Values are loaded from (in order): `config` file (optional) and environment
/// variables prefixed with `BFR_` (e.g. `BFR_PORT`). This is a small,
/// intentionally conservative bootstrap for the service's configuration.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Settings {
	pub host: String,
	pub port: u16,
	/// Directory of custom CSV imports served as a local data source.
	pub import_dir: Option<String>,
	/// Peer gateway merged as last-priority aux, e.g.
	/// `https://api.datahub.example.org`.
	pub remote_mixer_domain: Option<String>,
	/// Embeddings sidecar base URL for description resolution.
	pub embeddings_url: Option<String>,
	/// Cap on |variables| x |entities| for one observation request.
	pub max_series: usize,
	pub log_level: Option<String>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: 8081,
			import_dir: None,
			remote_mixer_domain: None,
			embeddings_url: None,
			max_series: DEFAULT_MAX_SERIES,
			log_level: Some("info".to_string()),
		}
	}
}

/// Partial settings used to overlay environment/file values on top of defaults.
#[derive(Debug, Deserialize)]
struct PartialSettings {
	host: Option<String>,
	port: Option<u16>,
	import_dir: Option<String>,
	remote_mixer_domain: Option<String>,
	embeddings_url: Option<String>,
	max_series: Option<usize>,
	log_level: Option<String>,
}

/// Load settings from config file (optional) and environment variables.
pub fn load() -> Result<Settings> {
	let builder = config::Config::builder()
		.add_source(config::File::with_name("config").required(false))
		// Use a double-underscore separator so single-underscore env names like
		// `BFR_IMPORT_DIR` map to `import_dir` instead of nested `import.dir`.
		.add_source(config::Environment::with_prefix("BFR").separator("__"));

	let cfg = builder.build()?;
	let partial: PartialSettings = cfg.try_deserialize()?;

	let mut s = Settings::default();
	if let Some(host) = partial.host {
		s.host = host;
	}
	if let Some(port) = partial.port {
		s.port = port;
	}
	if let Some(dir) = partial.import_dir {
		s.import_dir = Some(dir);
	}
	if let Some(domain) = partial.remote_mixer_domain {
		s.remote_mixer_domain = Some(domain);
	}
	if let Some(url) = partial.embeddings_url {
		s.embeddings_url = Some(url);
	}
	if let Some(max_series) = partial.max_series {
		s.max_series = max_series;
	}
	if let Some(level) = partial.log_level {
		s.log_level = Some(level);
	}

	// Explicitly prefer direct environment variables when present. Some
	// environments (CI, test harnesses) may set env vars in ways that the
	// `config` crate doesn't map as expected; read them directly to ensure
	// explicit overrides take effect.
	if let Ok(h) = std::env::var("BFR_HOST") {
		if !h.is_empty() {
			s.host = h;
		}
	}
	if let Ok(p) = std::env::var("BFR_PORT") {
		if let Ok(pn) = p.parse::<u16>() {
			s.port = pn;
		}
	}
	if let Ok(dir) = std::env::var("BFR_IMPORT_DIR") {
		if !dir.is_empty() {
			s.import_dir = Some(dir);
		}
	}
	if let Ok(domain) = std::env::var("BFR_REMOTE_MIXER_DOMAIN") {
		if !domain.is_empty() {
			s.remote_mixer_domain = Some(domain);
		}
	}
	if let Ok(url) = std::env::var("BFR_EMBEDDINGS_URL") {
		if !url.is_empty() {
			s.embeddings_url = Some(url);
		}
	}
	if let Ok(m) = std::env::var("BFR_MAX_SERIES") {
		if let Ok(mn) = m.parse::<usize>() {
			s.max_series = mn;
		}
	}
	if let Ok(l) = std::env::var("BFR_LOG_LEVEL") {
		if !l.is_empty() {
			s.log_level = Some(l);
		}
	}

	Ok(s)
}
