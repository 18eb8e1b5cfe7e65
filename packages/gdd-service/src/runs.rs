use std::{
	fs,
	path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use time::macros::format_description;

use crate::{Error, GddService, Result, pipeline::GenerationResult};
use gdd_domain::normalize_name;

const MAX_SLUG_CHARS: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFiles {
	pub json: PathBuf,
	pub markdown: PathBuf,
}

impl GddService {
	/// Saves `result` under the configured output directory. Returns `None` when none is set.
	pub fn save_run(&self, result: &GenerationResult) -> Result<Option<RunFiles>> {
		match self.cfg.service.output_dir.as_deref() {
			Some(dir) => save_run(dir, result).map(Some),
			None => Ok(None),
		}
	}
}

/// Writes `<timestamp>_<domain>_<slug>.json` (the full result) and `.md` (the final draft).
pub fn save_run(output_dir: &Path, result: &GenerationResult) -> Result<RunFiles> {
	fs::create_dir_all(output_dir)?;

	let stem = run_stem(result)?;
	let json = output_dir.join(format!("{stem}.json"));
	let markdown = output_dir.join(format!("{stem}.md"));

	fs::write(&json, serde_json::to_vec_pretty(result)?)?;
	fs::write(&markdown, format!("{}\n", result.draft_markdown.trim_end()))?;

	tracing::info!(json = %json.display(), markdown = %markdown.display(), "Run saved.");

	Ok(RunFiles { json, markdown })
}

fn run_stem(result: &GenerationResult) -> Result<String> {
	let timestamp = result
		.created_at
		.format(format_description!("[year][month][day]-[hour][minute][second]"))
		.map_err(|err| Error::InvalidRequest {
			message: format!("Cannot format the run timestamp: {err}."),
		})?;
	let title = if result.draft.title.trim().is_empty() { &result.brief } else { &result.draft.title };

	Ok(format!("{timestamp}_{}_{}", result.domain.key(), slug(title)))
}

/// Lowercase ASCII words joined by `-`, at most `MAX_SLUG_CHARS` long.
pub fn slug(raw: &str) -> String {
	let normalized = normalize_name(raw);
	let mut out = String::new();

	for word in normalized.split(|ch: char| !ch.is_ascii_alphanumeric()).filter(|w| !w.is_empty()) {
		let needed = if out.is_empty() { word.len() } else { word.len() + 1 };

		if out.len() + needed > MAX_SLUG_CHARS {
			if out.is_empty() {
				out.push_str(&word[..MAX_SLUG_CHARS]);
			}

			break;
		}
		if !out.is_empty() {
			out.push('-');
		}

		out.push_str(word);
	}

	if out.is_empty() { "sans-titre".to_string() } else { out }
}
