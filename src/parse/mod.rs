//! Small fixed parsers for request expressions and CSV value literals.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{Result, ServiceError};

/// A parsed contained-in entity expression:
/// `<ancestorDcid><-containedInPlace+{typeOf: <Type>}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainedInPlace {
	pub ancestor: String,
	pub child_type: String,
}

static CONTAINED_IN_RE: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"^(?P<ancestor>[^<>{}]+)<-containedInPlace\+\{typeOf:\s*(?P<type>[A-Za-z0-9_]+)\}$")
		.expect("contained-in pattern is valid")
});

/// Parse a contained-in expression; any other form is an invalid argument.
pub fn parse_contained_in(expression: &str) -> Result<ContainedInPlace> {
	let captures = CONTAINED_IN_RE.captures(expression.trim()).ok_or_else(|| {
		ServiceError::InvalidArgument(format!(
			"invalid contained-in expression {:?}",
			expression
		))
	})?;
	Ok(ContainedInPlace {
		ancestor: captures["ancestor"].to_string(),
		child_type: captures["type"].to_string(),
	})
}

/// Parse a complex value literal from CSV ingestion into its node string:
///
/// - `[<unit> <val>]` or `[<val> <unit>]` becomes `<unit><val>`
/// - `[<unit> <a> <b>]` becomes `<unit><a>To<b>`
/// - `[<unit> - <b>]` becomes `<unit>Upto<b>`
/// - `[<unit> <a> -]` becomes `<unit><a>Onwards`
/// - `[LatLong <lat> <lng>]` becomes `latLong/<round(lat*1e5)>_<round(lng*1e5)>`
///   with `N`/`S`/`E`/`W` suffixes flipping sign
pub fn parse_complex_value(literal: &str) -> Result<String> {
	let trimmed = literal.trim();
	let body = trimmed
		.strip_prefix('[')
		.and_then(|s| s.strip_suffix(']'))
		.ok_or_else(|| {
			ServiceError::InvalidArgument(format!("complex value must be bracketed: {:?}", literal))
		})?;
	let parts: Vec<&str> = body.split_whitespace().collect();

	match parts.as_slice() {
		[a, b] => {
			if is_number(a) && !is_number(b) {
				Ok(format!("{}{}", b, a))
			} else if is_number(b) && !is_number(a) {
				Ok(format!("{}{}", a, b))
			} else {
				Err(ServiceError::InvalidArgument(format!(
					"complex value needs one unit and one number: {:?}",
					literal
				)))
			}
		}
		[head, a, b] if head.eq_ignore_ascii_case("LatLong") => {
			let latitude = parse_coordinate(a, 'N', 'S')?;
			let longitude = parse_coordinate(b, 'E', 'W')?;
			if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
				return Err(ServiceError::InvalidArgument(format!(
					"coordinate out of range: {:?}",
					literal
				)));
			}
			Ok(format!(
				"latLong/{}_{}",
				(latitude * 1e5).round() as i64,
				(longitude * 1e5).round() as i64
			))
		}
		[unit, "-", b] if is_number(b) => Ok(format!("{}Upto{}", unit, b)),
		[unit, a, "-"] if is_number(a) => Ok(format!("{}{}Onwards", unit, a)),
		[unit, a, b] if is_number(a) && is_number(b) => Ok(format!("{}{}To{}", unit, a, b)),
		_ => Err(ServiceError::InvalidArgument(format!(
			"unrecognized complex value: {:?}",
			literal
		))),
	}
}

/// Parse a `lat#lng` coordinate literal from a resolve request node.
pub fn parse_coordinate_literal(node: &str) -> Result<(f64, f64)> {
	let (lat, lng) = node.split_once('#').ok_or_else(|| {
		ServiceError::InvalidArgument(format!("coordinate literal must be lat#lng: {:?}", node))
	})?;
	let latitude: f64 = lat.trim().parse().map_err(|_| {
		ServiceError::InvalidArgument(format!("bad latitude in {:?}", node))
	})?;
	let longitude: f64 = lng.trim().parse().map_err(|_| {
		ServiceError::InvalidArgument(format!("bad longitude in {:?}", node))
	})?;
	if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
		return Err(ServiceError::InvalidArgument(format!(
			"coordinate out of range: {:?}",
			node
		)));
	}
	Ok((latitude, longitude))
}

fn is_number(s: &str) -> bool {
	s.parse::<f64>().is_ok()
}

fn parse_coordinate(s: &str, positive: char, negative: char) -> Result<f64> {
	let (body, sign) = match s.chars().last() {
		Some(c) if c == positive => (&s[..s.len() - 1], 1.0),
		Some(c) if c == negative => (&s[..s.len() - 1], -1.0),
		_ => (s, 1.0),
	};
	let value: f64 = body.parse().map_err(|_| {
		ServiceError::InvalidArgument(format!("bad coordinate literal: {:?}", s))
	})?;
	Ok(value * sign)
}
