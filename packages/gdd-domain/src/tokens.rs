use unicode_segmentation::UnicodeSegmentation;

pub const TRUNCATION_MARKER: &str = " […]";

/// Heuristic token count; providers bill roughly one token per `chars_per_token` characters.
pub fn estimate_tokens(text: &str, chars_per_token: f32) -> u32 {
	if chars_per_token <= 0.0 || !chars_per_token.is_finite() {
		return 0;
	}

	let chars = text.chars().count();

	if chars == 0 {
		return 0;
	}

	(chars as f32 / chars_per_token).ceil() as u32
}

pub fn truncate_to_tokens(text: &str, max_tokens: u32, chars_per_token: f32) -> String {
	if estimate_tokens(text, chars_per_token) <= max_tokens {
		return text.to_string();
	}

	let max_chars = (max_tokens as f32 * chars_per_token).floor() as usize;

	truncate_chars(text, max_chars)
}

/// Cuts `text` to at most `max_chars` characters including the marker, on a grapheme boundary and,
/// when one is close enough, on whitespace.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
	if text.chars().count() <= max_chars {
		return text.to_string();
	}

	let marker_chars = TRUNCATION_MARKER.chars().count();

	if max_chars <= marker_chars {
		return String::new();
	}

	let budget = max_chars - marker_chars;
	let mut used = 0_usize;
	let mut end = 0_usize;
	let mut last_space = None;

	for (offset, grapheme) in text.grapheme_indices(true) {
		let width = grapheme.chars().count();

		if used + width > budget {
			break;
		}
		if grapheme.chars().all(char::is_whitespace) {
			last_space = Some(offset);
		}

		used += width;
		end = offset + grapheme.len();
	}

	if let Some(space) = last_space
		&& space * 2 >= end
	{
		end = space;
	}

	let mut out = text[..end].trim_end().to_string();

	out.push_str(TRUNCATION_MARKER);

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn estimates_with_ceiling() {
		assert_eq!(estimate_tokens("", 4.0), 0);
		assert_eq!(estimate_tokens("abcd", 4.0), 1);
		assert_eq!(estimate_tokens("abcd efgh", 4.0), 3);
		assert_eq!(estimate_tokens("éèà", 1.5), 2);
	}

	#[test]
	fn short_text_is_untouched() {
		assert_eq!(truncate_to_tokens("Une cité.", 10, 4.0), "Une cité.");
	}

	#[test]
	fn truncates_on_word_boundary_within_budget() {
		let text = "Les marchands de la cité haute vendent des épices rares.";
		let out = truncate_to_tokens(text, 6, 4.0);

		assert!(out.ends_with(TRUNCATION_MARKER));
		assert!(out.chars().count() <= 24, "too long: {out}");
		assert!(out.starts_with("Les marchands"));
		assert!(!out.contains("cit "));
	}

	#[test]
	fn keeps_combined_graphemes_whole() {
		let text = "e\u{301}e\u{301}e\u{301}e\u{301}e\u{301}e\u{301}e\u{301}e\u{301}";
		let out = truncate_chars(text, 9);

		assert_eq!(out, format!("e\u{301}e\u{301}{TRUNCATION_MARKER}"));
	}

	#[test]
	fn tiny_budget_yields_empty_text() {
		assert_eq!(truncate_chars("abcdefgh", 3), "");
	}
}
