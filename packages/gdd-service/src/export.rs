use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
	Error, GddService, Result,
	relations::{RelationReport, RelationResolution},
};
use gdd_domain::Draft;
use gdd_notion::client::MAX_CHILDREN_PER_REQUEST;

/// Notion's limit for a single rich text object.
pub const MAX_RICH_TEXT_CHARS: usize = 2_000;

const EXTRA_PROPERTIES_HEADING: &str = "Autres propriétés";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportReport {
	pub dry_run: bool,
	pub database_id: String,
	pub page_id: Option<String>,
	pub url: Option<String>,
	pub blocks: usize,
	/// `append_block_children` calls needed after `create_page`.
	pub append_batches: usize,
	pub unresolved: Vec<RelationResolution>,
	/// The `create_page` body; only set on dry runs.
	pub request: Option<Value>,
}

impl GddService {
	/// Creates a page for `draft` in its domain's sandbox database. Main databases are never
	/// written to.
	pub async fn export_draft(
		&self,
		draft: &Draft,
		relations: &RelationReport,
		dry_run: bool,
	) -> Result<ExportReport> {
		let sandbox = gdd_notion::normalize_id(self.sandbox_database(draft.domain)?)?;
		let main = gdd_notion::normalize_id(self.main_database(draft.domain)?)?;

		if sandbox == main {
			return Err(Error::WriteDenied {
				message: format!("The sandbox of {} is its main database.", draft.domain.key()),
			});
		}
		if draft.title.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "Cannot export a draft without a title.".to_string(),
			});
		}

		let (properties, extras) = page_properties(draft, relations);
		let blocks = draft_blocks(draft, &extras);
		let first_len = blocks.len().min(MAX_CHILDREN_PER_REQUEST);
		let (first, rest) = blocks.split_at(first_len);
		let body = json!({
			"parent": { "database_id": sandbox },
			"properties": properties,
			"children": first,
		});
		let append_batches = rest.len().div_ceil(MAX_CHILDREN_PER_REQUEST);
		let unresolved: Vec<RelationResolution> =
			relations.unresolved().into_iter().cloned().collect();

		if dry_run {
			tracing::info!(
				database_id = %sandbox,
				blocks = blocks.len(),
				append_batches,
				"Dry run; nothing sent to Notion."
			);

			return Ok(ExportReport {
				dry_run: true,
				database_id: sandbox,
				page_id: None,
				url: None,
				blocks: blocks.len(),
				append_batches,
				unresolved,
				request: Some(body),
			});
		}

		let created = self.notion.create_page(&body).await?;
		let page_id = created.get("id").and_then(Value::as_str).map(str::to_string).ok_or_else(
			|| Error::Notion { message: "create_page response has no id.".to_string() },
		)?;
		let url = created.get("url").and_then(Value::as_str).map(str::to_string);

		for batch in rest.chunks(MAX_CHILDREN_PER_REQUEST) {
			self.notion.append_block_children(&page_id, batch).await?;
		}

		let dropped = self.cache.invalidate_database(&sandbox);

		tracing::info!(
			page_id = %page_id,
			database_id = %sandbox,
			blocks = blocks.len(),
			append_batches,
			invalidated = dropped,
			"Draft exported."
		);

		Ok(ExportReport {
			dry_run: false,
			database_id: sandbox,
			page_id: Some(page_id),
			url,
			blocks: blocks.len(),
			append_batches,
			unresolved,
			request: None,
		})
	}
}

/// Notion properties for the draft, plus `(name, value)` pairs the schema does not know about.
pub fn page_properties(
	draft: &Draft,
	relations: &RelationReport,
) -> (Map<String, Value>, Vec<(String, String)>) {
	let schema = draft.domain.schema();
	let mut properties = Map::new();
	let mut extras = Vec::new();

	properties.insert(schema.title_property.to_string(), json!({ "title": rich_text(&draft.title) }));

	for (name, value) in &draft.properties {
		if schema.relation(name).is_some() {
			continue;
		}

		match schema.canonical_property(name) {
			Some(canonical) if canonical != schema.title_property => {
				properties.insert(canonical.to_string(), json!({ "rich_text": rich_text(value) }));
			},
			Some(_) => {},
			None => extras.push((name.clone(), value.clone())),
		}
	}

	for field in schema.relations {
		let mut ids = relations.page_ids(field.property);

		if !field.multiple {
			ids.truncate(1);
		}
		if ids.is_empty() {
			continue;
		}

		let items: Vec<Value> = ids.into_iter().map(|id| json!({ "id": id })).collect();

		properties.insert(field.property.to_string(), json!({ "relation": items }));
	}

	(properties, extras)
}

pub fn draft_blocks(draft: &Draft, extras: &[(String, String)]) -> Vec<Value> {
	let mut blocks = Vec::new();

	if !extras.is_empty() {
		blocks.push(text_block("heading_2", EXTRA_PROPERTIES_HEADING));

		for (name, value) in extras {
			blocks.push(text_block("bulleted_list_item", &format!("{name}: {value}")));
		}
	}

	blocks.extend(markdown_blocks(&draft.preamble));

	for section in &draft.sections {
		blocks.push(text_block("heading_2", &section.heading));
		blocks.extend(markdown_blocks(&section.body));
	}

	blocks
}

/// Converts section markdown into Notion blocks: paragraphs, sub-headings, list items, quotes,
/// dividers, and fenced code.
pub fn markdown_blocks(markdown: &str) -> Vec<Value> {
	let mut blocks = Vec::new();
	let mut paragraph: Vec<&str> = Vec::new();
	let mut code: Option<(String, Vec<&str>)> = None;

	for line in markdown.lines() {
		let trimmed = line.trim();

		if let Some((language, body)) = code.as_mut() {
			if trimmed.starts_with("```") {
				blocks.push(code_block(language, &body.join("\n")));

				code = None;
			} else {
				body.push(line);
			}

			continue;
		}
		if let Some(language) = trimmed.strip_prefix("```") {
			flush_paragraph(&mut paragraph, &mut blocks);

			code = Some((language.trim().to_string(), Vec::new()));

			continue;
		}

		let block = if trimmed.is_empty() {
			None
		} else if let Some(text) = trimmed.strip_prefix("### ") {
			Some(text_block("heading_3", text))
		} else if let Some(text) =
			["- ", "* ", "+ "].iter().find_map(|marker| trimmed.strip_prefix(marker))
		{
			Some(text_block("bulleted_list_item", text))
		} else if let Some(text) = numbered_item(trimmed) {
			Some(text_block("numbered_list_item", text))
		} else if let Some(text) = trimmed.strip_prefix("> ") {
			Some(text_block("quote", text))
		} else if trimmed == "---" {
			Some(json!({ "object": "block", "type": "divider", "divider": {} }))
		} else {
			paragraph.push(trimmed);

			continue;
		};

		flush_paragraph(&mut paragraph, &mut blocks);
		blocks.extend(block);
	}

	if let Some((language, body)) = code {
		blocks.push(code_block(&language, &body.join("\n")));
	}

	flush_paragraph(&mut paragraph, &mut blocks);

	blocks
}

/// Rich text array for `text`, split into objects of at most `MAX_RICH_TEXT_CHARS` characters.
pub fn rich_text(text: &str) -> Vec<Value> {
	chunk_chars(text, MAX_RICH_TEXT_CHARS)
		.into_iter()
		.map(|chunk| json!({ "type": "text", "text": { "content": chunk } }))
		.collect()
}

fn chunk_chars(text: &str, max_chars: usize) -> Vec<String> {
	let mut chunks = Vec::new();
	let mut current = String::new();
	let mut count = 0;

	for ch in text.chars() {
		if count == max_chars {
			chunks.push(std::mem::take(&mut current));

			count = 0;
		}

		current.push(ch);

		count += 1;
	}

	if !current.is_empty() {
		chunks.push(current);
	}

	chunks
}

fn text_block(kind: &str, text: &str) -> Value {
	let mut block = json!({ "object": "block", "type": kind });

	block[kind] = json!({ "rich_text": rich_text(text) });

	block
}

fn code_block(language: &str, text: &str) -> Value {
	let language = if language.is_empty() { "plain text" } else { language };

	json!({
		"object": "block",
		"type": "code",
		"code": { "rich_text": rich_text(text), "language": language },
	})
}

fn flush_paragraph(paragraph: &mut Vec<&str>, blocks: &mut Vec<Value>) {
	if paragraph.is_empty() {
		return;
	}

	blocks.push(text_block("paragraph", &paragraph.join("\n")));
	paragraph.clear();
}

fn numbered_item(line: &str) -> Option<&str> {
	let (number, text) = line.split_once(". ")?;

	(!number.is_empty() && number.chars().all(|ch| ch.is_ascii_digit())).then_some(text)
}
