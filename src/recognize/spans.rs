//! Span matching and post-processing for place recognition.

use std::sync::Arc;

use crate::model::{RecognizedItem, RecognizedPlace};

use super::store::{RecogPlace, RecogPlaceStore};

/// Keep at most this many candidates per span.
const MAX_PLACE_CANDIDATES: usize = 15;
/// Candidates ranked below the cap survive only at or above this population.
const MIN_POPULATION_OVER_MAX_PLACE_CANDIDATES: i64 = 2000;

/// One segment of the tokenized query.
#[derive(Debug, Clone)]
pub enum Span {
	Place {
		tokens: Vec<String>,
		places: Vec<Arc<RecogPlace>>,
	},
	Text(String),
}

/// Left-to-right scan matching token runs against the place index.
/// Case-sensitive abbreviations match first on a single token; otherwise
/// the longest case-insensitive name match wins, with ties at the maximum
/// width combining their candidates into one span.
pub fn match_spans(store: &RecogPlaceStore, tokens: &[String]) -> Vec<Span> {
	let mut spans = Vec::new();
	let mut index = 0;
	while index < tokens.len() {
		let token = &tokens[index];
		if let Some(places) = store.abbreviated_name_to_places.get(token) {
			spans.push(Span::Place {
				tokens: vec![token.clone()],
				places: places.clone(),
			});
			index += 1;
			continue;
		}

		let mut best_width = 0;
		let mut best_places: Vec<Arc<RecogPlace>> = Vec::new();
		if let Some(candidates) = store.recog_place_map.get(&token.to_lowercase()) {
			for place in candidates {
				for name in &place.names {
					if !name_matches_at(name, tokens, index) {
						continue;
					}
					if name.len() > best_width {
						best_width = name.len();
						best_places = vec![place.clone()];
					} else if name.len() == best_width
						&& !best_places.iter().any(|p| p.dcid == place.dcid)
					{
						best_places.push(place.clone());
					}
				}
			}
		}

		if best_width > 0 {
			let mut span_tokens = tokens[index..index + best_width].to_vec();
			// A matched span sheds trailing punctuation on its last token
			// ("County!?" matched as "county"); the residue rejoins the
			// free text after the span.
			let last = &tokens[index + best_width - 1];
			let (core, residue) = split_trailing_punct(last);
			if let Some(slot) = span_tokens.last_mut() {
				*slot = core.to_string();
			}
			spans.push(Span::Place {
				tokens: span_tokens,
				places: best_places,
			});
			if !residue.is_empty() {
				spans.push(Span::Text(residue.to_string()));
			}
			index += best_width;
		} else {
			spans.push(Span::Text(token.clone()));
			index += 1;
		}
	}
	spans
}

fn name_matches_at(name: &[String], tokens: &[String], index: usize) -> bool {
	if name.is_empty() || index + name.len() > tokens.len() {
		return false;
	}
	name.iter().enumerate().all(|(offset, name_token)| {
		let token = &tokens[index + offset];
		// Only the name's last token may carry trailing punctuation.
		let compared = if offset == name.len() - 1 {
			split_trailing_punct(token).0
		} else {
			token.as_str()
		};
		*name_token == compared.to_lowercase()
	})
}

/// Split a token into its alphanumeric core and any trailing punctuation.
fn split_trailing_punct(token: &str) -> (&str, &str) {
	let core_len = token
		.trim_end_matches(|c: char| !c.is_alphanumeric())
		.len();
	token.split_at(core_len)
}

/// Collapse `<place1> <place2>` and `<place1> , <place2>` pairs: the first
/// span keeps only candidates contained in some candidate of the second
/// span, and the two spans (with the comma) become one. Collapsing repeats
/// so "Mountain View, Santa Clara County, California" narrows twice.
pub fn collapse_containment(spans: Vec<Span>) -> Vec<Span> {
	let mut out = Vec::new();
	let mut index = 0;
	while index < spans.len() {
		match spans[index].clone() {
			Span::Place {
				mut tokens,
				mut places,
			} => {
				loop {
					let (next_index, with_comma) = match peek_place(&spans, index) {
						Some(found) => found,
						None => break,
					};
					let Span::Place {
						tokens: next_tokens,
						places: next_places,
					} = &spans[next_index]
					else {
						break;
					};
					let retained: Vec<Arc<RecogPlace>> = places
						.iter()
						.filter(|place| {
							next_places.iter().any(|container| {
								place.containing_places.contains(&container.dcid)
							})
						})
						.cloned()
						.collect();
					if retained.is_empty() {
						break;
					}
					places = retained;
					if with_comma {
						tokens.push(",".to_string());
					}
					tokens.extend(next_tokens.clone());
					index = next_index;
				}
				out.push(Span::Place { tokens, places });
				index += 1;
			}
			text => {
				out.push(text);
				index += 1;
			}
		}
	}
	out
}

/// Locate the place span directly adjacent to `index`, or separated from
/// it by exactly one lone comma token.
fn peek_place(spans: &[Span], index: usize) -> Option<(usize, bool)> {
	match spans.get(index + 1) {
		Some(Span::Place { .. }) => Some((index + 1, false)),
		Some(Span::Text(token)) if token == "," => match spans.get(index + 2) {
			Some(Span::Place { .. }) => Some((index + 2, true)),
			_ => None,
		},
		_ => None,
	}
}

/// Drop candidates of spans whose joined form is a bogus name: a common
/// English word that happens to name a place. A span that survived
/// containment collapsing has a multi-token joined form and passes.
pub fn filter_bogus_names(spans: Vec<Span>, store: &RecogPlaceStore, resolve_bogus_name: bool) -> Vec<Span> {
	if resolve_bogus_name {
		return spans;
	}
	spans
		.into_iter()
		.flat_map(|span| match span {
			Span::Place { tokens, places } => {
				if store
					.bogus_place_names
					.contains(&joined_lowercase(&tokens))
				{
					tokens.into_iter().map(Span::Text).collect()
				} else {
					vec![Span::Place { tokens, places }]
				}
			}
			text => vec![text],
		})
		.collect()
}

/// Split the suffix off adjectival spans: "american states" keeps the
/// country candidate on "american" while "states" rejoins the free text.
/// Applies only to multi-token spans with exactly one candidate.
pub fn split_adjectival_suffixes(spans: Vec<Span>, store: &RecogPlaceStore) -> Vec<Span> {
	spans
		.into_iter()
		.flat_map(|span| match span {
			Span::Place { mut tokens, places }
				if tokens.len() > 1
					&& places.len() == 1
					&& store
						.adjectival_names_with_suffix
						.contains(&joined_lowercase(&tokens)) =>
			{
				let suffix = tokens.pop().unwrap_or_default();
				vec![Span::Place { tokens, places }, Span::Text(suffix)]
			}
			other => vec![other],
		})
		.collect()
}

/// Order candidates by descending population and trim: the top
/// [`MAX_PLACE_CANDIDATES`] always survive, lower ranks only with a
/// population at or above the floor.
pub fn rank_and_trim(spans: Vec<Span>) -> Vec<Span> {
	spans
		.into_iter()
		.map(|span| match span {
			Span::Place { tokens, mut places } => {
				places.sort_by(|a, b| {
					b.population
						.cmp(&a.population)
						.then_with(|| a.dcid.cmp(&b.dcid))
				});
				places = places
					.into_iter()
					.enumerate()
					.filter(|(rank, place)| {
						*rank < MAX_PLACE_CANDIDATES
							|| place.population >= MIN_POPULATION_OVER_MAX_PLACE_CANDIDATES
					})
					.map(|(_, place)| place)
					.collect();
				Span::Place { tokens, places }
			}
			text => text,
		})
		.collect()
}

/// Render spans as response items, coalescing consecutive non-place spans
/// into one space-joined item.
pub fn format_items(spans: Vec<Span>) -> Vec<RecognizedItem> {
	let mut items: Vec<RecognizedItem> = Vec::new();
	let mut pending_text: Vec<String> = Vec::new();
	for span in spans {
		match span {
			Span::Text(token) => pending_text.push(token),
			Span::Place { tokens, places } => {
				if places.is_empty() {
					// A span stripped of all candidates reads as free text.
					pending_text.extend(tokens);
					continue;
				}
				if !pending_text.is_empty() {
					items.push(RecognizedItem {
						span: pending_text.join(" "),
						places: Vec::new(),
					});
					pending_text.clear();
				}
				items.push(RecognizedItem {
					span: tokens.join(" "),
					places: places
						.iter()
						.map(|place| RecognizedPlace {
							dcid: place.dcid.clone(),
						})
						.collect(),
				});
			}
		}
	}
	if !pending_text.is_empty() {
		items.push(RecognizedItem {
			span: pending_text.join(" "),
			places: Vec::new(),
		});
	}
	items
}

fn joined_lowercase(tokens: &[String]) -> String {
	tokens
		.iter()
		.map(|t| t.to_lowercase())
		.collect::<Vec<_>>()
		.join(" ")
}
