//! Plain-text rendering of Notion properties and blocks for prompt injection.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::Block;

const INDENT: &str = "  ";

pub fn rich_text(value: &Value) -> String {
	value
		.as_array()
		.map(|parts| {
			parts
				.iter()
				.filter_map(|part| {
					part.get("plain_text")
						.or_else(|| part.get("text").and_then(|text| text.get("content")))
						.and_then(Value::as_str)
				})
				.collect::<String>()
		})
		.unwrap_or_default()
}

/// Text of the page's `title` property, whatever it is named.
pub fn page_title(page: &Value) -> String {
	let Some(properties) = page.get("properties").and_then(Value::as_object) else {
		return String::new();
	};

	properties
		.values()
		.find(|prop| prop.get("type").and_then(Value::as_str) == Some("title"))
		.and_then(|prop| prop.get("title"))
		.map(|title| rich_text(title).trim().to_string())
		.unwrap_or_default()
}

/// Non-empty, non-title properties rendered as text, keyed by property name.
pub fn page_properties(page: &Value) -> BTreeMap<String, String> {
	let mut out = BTreeMap::new();
	let Some(properties) = page.get("properties").and_then(Value::as_object) else {
		return out;
	};

	for (name, prop) in properties {
		if prop.get("type").and_then(Value::as_str) == Some("title") {
			continue;
		}
		if let Some(text) = property_text(prop).filter(|text| !text.trim().is_empty()) {
			out.insert(name.clone(), text);
		}
	}

	out
}

pub fn relation_ids(prop: &Value) -> Vec<String> {
	prop.get("relation")
		.and_then(Value::as_array)
		.map(|items| {
			items
				.iter()
				.filter_map(|item| item.get("id").and_then(Value::as_str).map(str::to_string))
				.collect()
		})
		.unwrap_or_default()
}

pub fn property_text(prop: &Value) -> Option<String> {
	let kind = prop.get("type").and_then(Value::as_str)?;
	let value = prop.get(kind)?;

	typed_value_text(kind, value, prop)
}

fn typed_value_text(kind: &str, value: &Value, prop: &Value) -> Option<String> {
	match kind {
		"title" | "rich_text" => Some(rich_text(value)),
		"select" | "status" => value.get("name").and_then(Value::as_str).map(str::to_string),
		"multi_select" => Some(join_names(value)),
		"number" => value.as_f64().map(format_number),
		"checkbox" => value.as_bool().map(|flag| if flag { "oui" } else { "non" }.to_string()),
		"url" | "email" | "phone_number" => value.as_str().map(str::to_string),
		"date" => date_text(value),
		"people" => Some(join_names(value)),
		"relation" => {
			let ids = relation_ids(prop);

			(!ids.is_empty()).then(|| format!("{} page(s): {}", ids.len(), ids.join(", ")))
		},
		"formula" => {
			let inner = value.get("type").and_then(Value::as_str)?;

			match inner {
				"string" => value.get("string").and_then(Value::as_str).map(str::to_string),
				"number" => value.get("number").and_then(Value::as_f64).map(format_number),
				"boolean" => value
					.get("boolean")
					.and_then(Value::as_bool)
					.map(|flag| if flag { "oui" } else { "non" }.to_string()),
				"date" => value.get("date").and_then(date_text),
				_ => None,
			}
		},
		"rollup" => {
			let inner = value.get("type").and_then(Value::as_str)?;

			match inner {
				"number" => value.get("number").and_then(Value::as_f64).map(format_number),
				"date" => value.get("date").and_then(date_text),
				"array" => {
					let items: Vec<String> = value
						.get("array")
						.and_then(Value::as_array)?
						.iter()
						.filter_map(property_text)
						.filter(|text| !text.is_empty())
						.collect();

					Some(items.join(", "))
				},
				_ => None,
			}
		},
		"created_time" | "last_edited_time" => value.as_str().map(str::to_string),
		_ => None,
	}
}

fn join_names(value: &Value) -> String {
	value
		.as_array()
		.map(|items| {
			items
				.iter()
				.filter_map(|item| item.get("name").and_then(Value::as_str))
				.collect::<Vec<_>>()
				.join(", ")
		})
		.unwrap_or_default()
}

fn date_text(value: &Value) -> Option<String> {
	let start = value.get("start").and_then(Value::as_str)?;

	match value.get("end").and_then(Value::as_str) {
		Some(end) => Some(format!("{start} → {end}")),
		None => Some(start.to_string()),
	}
}

fn format_number(value: f64) -> String {
	if value.fract() == 0.0 && value.abs() < 1e15 {
		format!("{}", value as i64)
	} else {
		value.to_string()
	}
}

pub fn blocks_to_text(blocks: &[Block]) -> String {
	let mut lines = Vec::new();

	render_blocks(blocks, 0, &mut lines);

	lines.join("\n").trim_end().to_string()
}

fn render_blocks(blocks: &[Block], depth: usize, lines: &mut Vec<String>) {
	let indent = INDENT.repeat(depth);
	let mut number = 0_usize;

	for block in blocks {
		if block.kind == "numbered_list_item" {
			number += 1;
		} else {
			number = 0;
		}

		if let Some(text) = block_text(block, number) {
			for line in text.lines() {
				lines.push(format!("{indent}{line}"));
			}
		}

		render_blocks(&block.children, depth + 1, lines);
	}
}

fn block_text(block: &Block, number: usize) -> Option<String> {
	let text = block.payload.get("rich_text").map(rich_text).unwrap_or_default();
	let rendered = match block.kind.as_str() {
		"paragraph" => text,
		"heading_1" => format!("# {text}"),
		"heading_2" => format!("## {text}"),
		"heading_3" => format!("### {text}"),
		"bulleted_list_item" => format!("- {text}"),
		"numbered_list_item" => format!("{number}. {text}"),
		"to_do" => {
			let checked = block.payload.get("checked").and_then(Value::as_bool).unwrap_or(false);

			format!("- [{}] {text}", if checked { "x" } else { " " })
		},
		"toggle" => format!("▸ {text}"),
		"quote" => format!("> {text}"),
		"callout" => {
			match block
				.payload
				.get("icon")
				.and_then(|icon| icon.get("emoji"))
				.and_then(Value::as_str)
			{
				Some(emoji) => format!("> {emoji} {text}"),
				None => format!("> {text}"),
			}
		},
		"code" => {
			let language =
				block.payload.get("language").and_then(Value::as_str).unwrap_or_default();

			format!("```{language}\n{text}\n```")
		},
		"divider" => "---".to_string(),
		"child_page" => format!(
			"[Page] {}",
			block.payload.get("title").and_then(Value::as_str).unwrap_or_default()
		),
		"child_database" => format!(
			"[Base] {}",
			block.payload.get("title").and_then(Value::as_str).unwrap_or_default()
		),
		_ => text,
	};

	(!rendered.trim().is_empty()).then_some(rendered)
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn block(kind: &str, payload: Value) -> Block {
		Block {
			id: format!("{kind}-id"),
			kind: kind.to_string(),
			has_children: false,
			payload,
			children: Vec::new(),
		}
	}

	fn text(content: &str) -> Value {
		json!({ "rich_text": [{ "plain_text": content }] })
	}

	#[test]
	fn reads_title_whatever_its_name() {
		let page = json!({
			"properties": {
				"Rôle": { "type": "select", "select": { "name": "PNJ" } },
				"Nom": { "type": "title", "title": [{ "plain_text": "Kael " }, { "plain_text": "Drunmor" }] }
			}
		});

		assert_eq!(page_title(&page), "Kael Drunmor");
		assert_eq!(page_properties(&page).get("Rôle").map(String::as_str), Some("PNJ"));
	}

	#[test]
	fn renders_property_types() {
		let cases = [
			(json!({ "type": "multi_select", "multi_select": [{ "name": "a" }, { "name": "b" }] }), "a, b"),
			(json!({ "type": "number", "number": 12.0 }), "12"),
			(json!({ "type": "number", "number": 1.5 }), "1.5"),
			(json!({ "type": "checkbox", "checkbox": true }), "oui"),
			(json!({ "type": "date", "date": { "start": "2024-01-01", "end": "2024-02-01" } }), "2024-01-01 → 2024-02-01"),
			(json!({ "type": "people", "people": [{ "name": "Ana" }] }), "Ana"),
			(json!({ "type": "relation", "relation": [{ "id": "p1" }, { "id": "p2" }] }), "2 page(s): p1, p2"),
			(json!({ "type": "formula", "formula": { "type": "string", "string": "x" } }), "x"),
			(json!({ "type": "rollup", "rollup": { "type": "array", "array": [
				{ "type": "rich_text", "rich_text": [{ "plain_text": "r" }] }
			] } }), "r"),
			(json!({ "type": "status", "status": { "name": "Brouillon" } }), "Brouillon"),
		];

		for (prop, expected) in cases {
			assert_eq!(property_text(&prop).as_deref(), Some(expected), "{prop}");
		}

		assert_eq!(property_text(&json!({ "type": "select", "select": null })), None);
	}

	#[test]
	fn renders_nested_blocks_with_indentation() {
		let mut toggle = block("toggle", text("Secrets"));

		toggle.children = vec![block("paragraph", text("Il ment."))];

		let blocks = vec![
			block("heading_2", text("Histoire")),
			block("numbered_list_item", text("Naissance")),
			block("numbered_list_item", text("Exil")),
			block("paragraph", text("")),
			block("to_do", json!({ "rich_text": [{ "plain_text": "Relire" }], "checked": true })),
			block("code", json!({ "rich_text": [{ "plain_text": "x = 1" }], "language": "lua" })),
			block("divider", json!({})),
			toggle,
		];

		assert_eq!(
			blocks_to_text(&blocks),
			"## Histoire\n1. Naissance\n2. Exil\n- [x] Relire\n```lua\nx = 1\n```\n---\n▸ Secrets\n  Il ment."
		);
	}
}
