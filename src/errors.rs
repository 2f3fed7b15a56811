use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Service-level error taxonomy shared by handlers, the dispatcher, and the
/// calculator. Empty result sets are not errors anywhere in the gateway;
/// they come back as empty responses.
#[derive(Debug, Error)]
pub enum ServiceError {
	/// Malformed request content: bad expressions, missing required fields,
	/// cross-products over the series cap, bad coordinate literals.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// Broken internal state: malformed pagination cursors, unparseable
	/// cached formulas, serialization failures.
	#[error("internal: {0}")]
	Internal(String),

	/// A data source, the remote peer, or the embeddings sidecar failed.
	#[error("unavailable: {0}")]
	Unavailable(String),
}

impl ServiceError {
	/// HTTP status the error maps to at the service boundary.
	pub fn status_code(&self) -> StatusCode {
		match self {
			ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
			ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
			ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
		}
	}
}

impl IntoResponse for ServiceError {
	fn into_response(self) -> Response {
		let status = self.status_code();
		if status.is_server_error() {
			log::error!("request failed: {}", self);
		} else {
			log::debug!("request rejected: {}", self);
		}
		(status, self.to_string()).into_response()
	}
}

pub type Result<T> = std::result::Result<T, ServiceError>;
