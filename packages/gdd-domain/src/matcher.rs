use std::{cmp::Ordering, collections::HashSet};

use serde::{Deserialize, Serialize};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

const BASE_WEIGHT: f32 = 0.45;
const OVERLAP_WEIGHT: f32 = 0.35;
const FIRST_WORD_WEIGHT: f32 = 0.20;
const SUBSTRING_BONUS: f32 = 0.15;
const PREFIX_BONUS: f32 = 0.10;
/// Two words closer than this are treated as the same word with a typo.
const TYPO_WORD_SIMILARITY: f64 = 0.92;
const MIN_MENTION_CHARS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyMatch {
	pub id: String,
	pub title: String,
	pub score: f32,
}

/// Lowercased, accent-free, punctuation-free form used for every comparison.
pub fn normalize_name(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());
	let mut pending_space = false;

	for ch in raw.nfd().filter(|ch| !is_combining_mark(*ch)) {
		let folded: &str = match ch {
			'œ' | 'Œ' => "oe",
			'æ' | 'Æ' => "ae",
			'ß' => "ss",
			_ => "",
		};

		if !folded.is_empty() {
			if pending_space && !out.is_empty() {
				out.push(' ');
			}

			pending_space = false;

			out.push_str(folded);

			continue;
		}
		if ch.is_alphanumeric() {
			if pending_space && !out.is_empty() {
				out.push(' ');
			}

			pending_space = false;

			out.extend(ch.to_lowercase());
		} else {
			pending_space = true;
		}
	}

	out
}

/// Similarity in `[0, 1]` between a free-text query and a candidate name.
pub fn score(query: &str, candidate: &str) -> f32 {
	score_normalized(&normalize_name(query), &normalize_name(candidate))
}

fn score_normalized(query: &str, candidate: &str) -> f32 {
	if query.is_empty() || candidate.is_empty() {
		return 0.0;
	}
	if query == candidate {
		return 1.0;
	}

	let base = strsim::normalized_levenshtein(query, candidate) as f32;
	let query_words: Vec<&str> = query.split(' ').collect();
	let candidate_words: Vec<&str> = candidate.split(' ').collect();
	let overlap = word_overlap(&query_words, &candidate_words);
	let first_word = strsim::jaro_winkler(query_words[0], candidate_words[0]) as f32;
	let mut total =
		BASE_WEIGHT * base + OVERLAP_WEIGHT * overlap + FIRST_WORD_WEIGHT * first_word;

	if contains_words(candidate, query) || contains_words(query, candidate) {
		total += SUBSTRING_BONUS;
	}
	if candidate.starts_with(query) || query.starts_with(candidate) {
		total += PREFIX_BONUS;
	}

	total.min(1.0)
}

fn word_overlap(query: &[&str], candidate: &[&str]) -> f32 {
	let query_set: HashSet<&str> = query.iter().copied().collect();
	let candidate_set: HashSet<&str> = candidate.iter().copied().collect();
	let denominator = query_set.len().max(candidate_set.len());

	if denominator == 0 {
		return 0.0;
	}

	let shared = query_set
		.iter()
		.filter(|word| {
			candidate_set.contains(**word)
				|| candidate_set
					.iter()
					.any(|other| strsim::jaro_winkler(word, other) >= TYPO_WORD_SIMILARITY)
		})
		.count();

	shared as f32 / denominator as f32
}

fn contains_words(haystack: &str, needle: &str) -> bool {
	format!(" {haystack} ").contains(&format!(" {needle} "))
}

/// Ranks `(id, title)` candidates against `query`, best first.
pub fn rank<'a, I>(query: &str, candidates: I, min_score: f32, limit: usize) -> Vec<FuzzyMatch>
where
	I: IntoIterator<Item = (&'a str, &'a str)>,
{
	let normalized_query = normalize_name(query);

	if normalized_query.is_empty() || limit == 0 {
		return Vec::new();
	}

	let mut seen = HashSet::new();
	let mut out: Vec<FuzzyMatch> = candidates
		.into_iter()
		.filter(|(id, _)| seen.insert(*id))
		.filter_map(|(id, title)| {
			let score = score_normalized(&normalized_query, &normalize_name(title));

			(score >= min_score).then(|| FuzzyMatch {
				id: id.to_string(),
				title: title.to_string(),
				score,
			})
		})
		.collect();

	out.sort_by(|a, b| {
		b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then_with(|| a.title.cmp(&b.title))
	});
	out.truncate(limit);

	out
}

pub fn best_match<'a, I>(query: &str, candidates: I, min_score: f32) -> Option<FuzzyMatch>
where
	I: IntoIterator<Item = (&'a str, &'a str)>,
{
	rank(query, candidates, min_score, 1).into_iter().next()
}

/// Candidates whose full name appears in `text` as a whole-word sequence.
pub fn find_mentions<'a, I>(text: &str, candidates: I) -> Vec<FuzzyMatch>
where
	I: IntoIterator<Item = (&'a str, &'a str)>,
{
	let normalized_text = normalize_name(text);

	if normalized_text.is_empty() {
		return Vec::new();
	}

	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for (id, title) in candidates {
		let normalized_title = normalize_name(title);

		if normalized_title.chars().count() < MIN_MENTION_CHARS {
			continue;
		}
		if contains_words(&normalized_text, &normalized_title) && seen.insert(id) {
			out.push(FuzzyMatch { id: id.to_string(), title: title.to_string(), score: 1.0 });
		}
	}

	out
}
