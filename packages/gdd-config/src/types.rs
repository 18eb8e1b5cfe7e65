use std::{collections::BTreeMap, path::PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

/// Config keys of the content domains, in display order.
pub const DOMAIN_KEYS: [&str; 4] = ["personnages", "lieux", "communautes", "especes"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub notion: Notion,
	pub cache: Cache,
	pub context: Context,
	pub matching: Matching,
	pub providers: Providers,
	pub pipeline: Pipeline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub log_level: String,
	/// Optional. Generation runs are written here as JSON and markdown when set.
	pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Notion {
	pub api_base: String,
	pub api_key: String,
	#[serde(default = "default_notion_version")]
	pub version: String,
	pub timeout_ms: u64,
	#[serde(default = "default_page_size")]
	pub page_size: u32,
	#[serde(default = "default_max_block_depth")]
	pub max_block_depth: u32,
	/// Map keys are domain keys, e.g. "personnages".
	pub databases: BTreeMap<String, DatabaseIds>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseIds {
	/// Read-only reference database.
	pub main: String,
	/// Optional. Write-enabled database for drafted content.
	pub sandbox: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cache {
	pub enabled: bool,
	pub list_ttl_secs: i64,
	pub preview_ttl_secs: i64,
	pub full_ttl_secs: i64,
	pub max_payload_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Context {
	pub max_tokens: u32,
	#[serde(default = "default_chars_per_token")]
	pub chars_per_token: f32,
	pub preview_chars: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Matching {
	pub min_score: f32,
	pub max_suggestions: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub llm: LlmProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub max_tokens: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
	/// Optional. Forwarded as `reasoning_effort` to OpenAI-compatible providers.
	pub reasoning_effort: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
	/// Runs the Reviewer and Corrector stages.
	pub review: bool,
	/// Runs the Validator stage.
	pub validate: bool,
	#[serde(default = "default_max_validation_issues")]
	pub max_validation_issues: u32,
}

impl Notion {
	pub fn database(&self, domain_key: &str) -> Option<&DatabaseIds> {
		self.databases.get(domain_key)
	}
}

fn default_notion_version() -> String {
	"2022-06-28".to_string()
}

fn default_page_size() -> u32 {
	100
}

fn default_max_block_depth() -> u32 {
	3
}

fn default_chars_per_token() -> f32 {
	4.0
}

fn default_max_validation_issues() -> u32 {
	12
}
