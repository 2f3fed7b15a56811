//! Query tokenization for place recognition.

/// Split a free-text query into tokens. Whitespace separates tokens and
/// commas are first-class tokens of their own: a comma marks a potential
/// containment boundary ("Mountain View, Santa Clara County"), so it must
/// survive tokenization rather than vanish as punctuation.
pub fn tokenize(query: &str) -> Vec<String> {
	let mut tokens = Vec::new();
	for part in query.split_whitespace() {
		for (i, segment) in part.split(',').enumerate() {
			if i > 0 {
				tokens.push(",".to_string());
			}
			if !segment.is_empty() {
				tokens.push(segment.to_string());
			}
		}
	}
	tokens
}
