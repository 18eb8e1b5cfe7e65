use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::format;

/// Minimal page description held in the list tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
	pub id: String,
	pub title: String,
	pub url: Option<String>,
	pub last_edited_time: Option<String>,
	pub database_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagePreview {
	pub summary: PageSummary,
	pub properties: BTreeMap<String, String>,
	pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
	pub summary: PageSummary,
	pub properties: BTreeMap<String, String>,
	pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
	pub id: String,
	/// Notion block type, e.g. `paragraph` or `heading_2`.
	pub kind: String,
	pub has_children: bool,
	/// The type-specific object (`value[kind]`).
	pub payload: Value,
	pub children: Vec<Block>,
}

impl PageSummary {
	pub fn from_page(page: &Value) -> Option<Self> {
		let id = page.get("id").and_then(Value::as_str)?.to_string();
		let database_id = page
			.get("parent")
			.and_then(|parent| parent.get("database_id"))
			.and_then(Value::as_str)
			.map(str::to_string);

		Some(Self {
			id,
			title: format::page_title(page),
			url: page.get("url").and_then(Value::as_str).map(str::to_string),
			last_edited_time: page
				.get("last_edited_time")
				.and_then(Value::as_str)
				.map(str::to_string),
			database_id,
		})
	}
}

impl Block {
	pub fn from_value(value: &Value) -> Option<Self> {
		let id = value.get("id").and_then(Value::as_str)?.to_string();
		let kind = value.get("type").and_then(Value::as_str)?.to_string();
		let payload = value.get(&kind).cloned().unwrap_or(Value::Null);
		let has_children = value.get("has_children").and_then(Value::as_bool).unwrap_or(false);

		Some(Self { id, kind, has_children, payload, children: Vec::new() })
	}
}

impl PageContent {
	pub fn preview(&self, preview_chars: usize) -> PagePreview {
		PagePreview {
			summary: self.summary.clone(),
			properties: self.properties.clone(),
			excerpt: gdd_domain::tokens::truncate_chars(&self.body, preview_chars),
		}
	}
}
