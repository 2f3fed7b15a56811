//! Opaque pagination cursors for node traversal.
//!
//! A cursor is a structured record serialized to JSON and wrapped in
//! URL-safe base64. Callers must treat the token as a bytestring and pass
//! it back unchanged. All fields are optional-with-default so new slots
//! (such as the remote cursor) can be added without breaking old tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ServiceError};

/// Position within one import group's paged key space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Cursor {
	pub import_group: i32,
	pub page: i32,
	pub item: i32,
}

/// Cursors for a group of keys fetched together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CursorGroup {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub keys: Vec<String>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub cursors: Vec<Cursor>,
}

/// The full pagination record: this gateway's own cursor groups plus an
/// optional slot holding the remote peer's cursor verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaginationInfo {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub cursor_groups: Vec<CursorGroup>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub remote_pagination_info: Option<Box<PaginationInfo>>,
}

impl PaginationInfo {
	pub fn is_empty(&self) -> bool {
		self.cursor_groups.is_empty() && self.remote_pagination_info.is_none()
	}
}

/// Serialize a pagination record into an opaque token.
pub fn encode(info: &PaginationInfo) -> Result<String> {
	let bytes = serde_json::to_vec(info)
		.map_err(|e| ServiceError::Internal(format!("failed to encode pagination info: {}", e)))?;
	Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Decode an opaque token back into a pagination record. A malformed token
/// is an internal error: tokens are produced only by this gateway and its
/// peers, so corruption means a broken cursor round-trip.
pub fn decode(token: &str) -> Result<PaginationInfo> {
	let bytes = URL_SAFE_NO_PAD
		.decode(token)
		.map_err(|e| ServiceError::Internal(format!("invalid pagination token: {}", e)))?;
	serde_json::from_slice(&bytes)
		.map_err(|e| ServiceError::Internal(format!("invalid pagination token: {}", e)))
}

/// Wrap a remote peer's cursor in a fresh record. Used when only the remote
/// side of a merged node response carries data: the peer's cursor must
/// round-trip through our token so the next page reaches the peer again.
pub fn wrap_remote(remote: PaginationInfo) -> PaginationInfo {
	PaginationInfo {
		cursor_groups: Vec::new(),
		remote_pagination_info: Some(Box::new(remote)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> PaginationInfo {
		PaginationInfo {
			cursor_groups: vec![CursorGroup {
				keys: vec!["geoId/06".into()],
				cursors: vec![Cursor {
					import_group: 1,
					page: 2,
					item: 30,
				}],
			}],
			remote_pagination_info: None,
		}
	}

	#[test]
	fn token_round_trip() {
		let info = sample();
		let token = encode(&info).expect("encode");
		assert_eq!(decode(&token).expect("decode"), info);
	}

	#[test]
	fn wrapped_remote_round_trip() {
		let wrapped = wrap_remote(sample());
		let token = encode(&wrapped).expect("encode");
		let back = decode(&token).expect("decode");
		assert!(back.cursor_groups.is_empty());
		assert_eq!(*back.remote_pagination_info.expect("remote slot"), sample());
	}

	#[test]
	fn malformed_token_is_internal_error() {
		assert!(matches!(
			decode("not a token!"),
			Err(crate::errors::ServiceError::Internal(_))
		));
	}

	#[test]
	fn decode_tolerates_unknown_fields() {
		// Tokens minted by a newer build may carry extra slots.
		let json = r#"{"cursorGroups":[],"futureSlot":42}"#;
		let token = URL_SAFE_NO_PAD.encode(json);
		assert!(decode(&token).expect("decode").is_empty());
	}
}
