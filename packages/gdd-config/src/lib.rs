mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Cache, Config, Context, DOMAIN_KEYS, DatabaseIds, LlmProviderConfig, Matching, Notion,
	Pipeline, Providers, Service,
};

use std::{env, fs, path::Path};

const ENV_PREFIX: &str = "env:";

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	resolve_env_keys(&mut cfg, |name| env::var(name).ok())?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}
	if cfg.notion.api_base.trim().is_empty() {
		return Err(Error::Validation {
			message: "notion.api_base must be non-empty.".to_string(),
		});
	}
	if cfg.notion.version.trim().is_empty() {
		return Err(Error::Validation { message: "notion.version must be non-empty.".to_string() });
	}
	if cfg.notion.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "notion.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if !(1..=100).contains(&cfg.notion.page_size) {
		return Err(Error::Validation {
			message: "notion.page_size must be in the range 1-100.".to_string(),
		});
	}
	if cfg.notion.max_block_depth == 0 {
		return Err(Error::Validation {
			message: "notion.max_block_depth must be greater than zero.".to_string(),
		});
	}
	if cfg.notion.databases.is_empty() {
		return Err(Error::Validation {
			message: "notion.databases must configure at least one domain.".to_string(),
		});
	}

	for (key, ids) in &cfg.notion.databases {
		if !DOMAIN_KEYS.contains(&key.as_str()) {
			return Err(Error::Validation {
				message: format!(
					"notion.databases.{key} is not a known domain. Expected one of {}.",
					DOMAIN_KEYS.join(", ")
				),
			});
		}
		if !is_notion_id(&ids.main) {
			return Err(Error::Validation {
				message: format!("notion.databases.{key}.main must be a Notion id."),
			});
		}

		if let Some(sandbox) = ids.sandbox.as_deref() {
			if !is_notion_id(sandbox) {
				return Err(Error::Validation {
					message: format!("notion.databases.{key}.sandbox must be a Notion id."),
				});
			}
			if compact_id(sandbox) == compact_id(&ids.main) {
				return Err(Error::Validation {
					message: format!(
						"notion.databases.{key}.sandbox must differ from the main database."
					),
				});
			}
		}
	}

	for (label, ttl) in [
		("cache.list_ttl_secs", cfg.cache.list_ttl_secs),
		("cache.preview_ttl_secs", cfg.cache.preview_ttl_secs),
		("cache.full_ttl_secs", cfg.cache.full_ttl_secs),
	] {
		if ttl <= 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if let Some(max) = cfg.cache.max_payload_bytes
		&& max == 0
	{
		return Err(Error::Validation {
			message: "cache.max_payload_bytes must be greater than zero.".to_string(),
		});
	}

	if cfg.context.max_tokens == 0 {
		return Err(Error::Validation {
			message: "context.max_tokens must be greater than zero.".to_string(),
		});
	}
	if !cfg.context.chars_per_token.is_finite() || cfg.context.chars_per_token <= 0.0 {
		return Err(Error::Validation {
			message: "context.chars_per_token must be a finite number greater than zero."
				.to_string(),
		});
	}
	if cfg.context.preview_chars == 0 {
		return Err(Error::Validation {
			message: "context.preview_chars must be greater than zero.".to_string(),
		});
	}
	if !cfg.matching.min_score.is_finite() || !(0.0..=1.0).contains(&cfg.matching.min_score) {
		return Err(Error::Validation {
			message: "matching.min_score must be in the range 0.0-1.0.".to_string(),
		});
	}
	if cfg.matching.max_suggestions == 0 {
		return Err(Error::Validation {
			message: "matching.max_suggestions must be greater than zero.".to_string(),
		});
	}

	let llm = &cfg.providers.llm;

	if !matches!(llm.provider_id.as_str(), "openai" | "anthropic") {
		return Err(Error::Validation {
			message: "providers.llm.provider_id must be one of openai or anthropic.".to_string(),
		});
	}
	if llm.model.trim().is_empty() {
		return Err(Error::Validation {
			message: "providers.llm.model must be non-empty.".to_string(),
		});
	}
	if !llm.temperature.is_finite() || !(0.0..=2.0).contains(&llm.temperature) {
		return Err(Error::Validation {
			message: "providers.llm.temperature must be in the range 0.0-2.0.".to_string(),
		});
	}
	if llm.max_tokens == 0 {
		return Err(Error::Validation {
			message: "providers.llm.max_tokens must be greater than zero.".to_string(),
		});
	}
	if llm.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "providers.llm.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if llm.default_headers.values().any(|value| !value.is_string()) {
		return Err(Error::Validation {
			message: "providers.llm.default_headers values must be strings.".to_string(),
		});
	}

	for (label, key) in [("notion", &cfg.notion.api_key), ("providers.llm", &llm.api_key)] {
		if key.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label}.api_key must be non-empty.") });
		}
	}

	if cfg.pipeline.validate && cfg.pipeline.max_validation_issues == 0 {
		return Err(Error::Validation {
			message: "pipeline.max_validation_issues must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

/// Accepts dashed or undashed 32-digit hex ids.
pub fn is_notion_id(raw: &str) -> bool {
	let compact = compact_id(raw);

	compact.len() == 32 && compact.chars().all(|ch| ch.is_ascii_hexdigit())
}

fn compact_id(raw: &str) -> String {
	raw.trim().chars().filter(|ch| *ch != '-').map(|ch| ch.to_ascii_lowercase()).collect()
}

fn resolve_env_keys<F>(cfg: &mut Config, lookup: F) -> Result<()>
where
	F: Fn(&str) -> Option<String>,
{
	for (field, key) in [
		("notion.api_key", &mut cfg.notion.api_key),
		("providers.llm.api_key", &mut cfg.providers.llm.api_key),
	] {
		let Some(name) = key.trim().strip_prefix(ENV_PREFIX).map(str::trim) else { continue };
		let name = name.to_string();
		let value = lookup(&name)
			.ok_or_else(|| Error::MissingEnv { field: field.to_string(), name: name.clone() })?;

		*key = value;
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.service.output_dir.as_ref().map(|dir| dir.as_os_str().is_empty()).unwrap_or(false) {
		cfg.service.output_dir = None;
	}
	if cfg
		.providers
		.llm
		.reasoning_effort
		.as_deref()
		.map(|effort| effort.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.providers.llm.reasoning_effort = None;
	}

	for ids in cfg.notion.databases.values_mut() {
		if ids.sandbox.as_deref().map(|id| id.trim().is_empty()).unwrap_or(false) {
			ids.sandbox = None;
		}
	}

	trim_trailing_slash(&mut cfg.notion.api_base);
	trim_trailing_slash(&mut cfg.providers.llm.api_base);
}

fn trim_trailing_slash(value: &mut String) {
	while value.ends_with('/') {
		value.pop();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const MINIMAL: &str = r#"
[service]
log_level = "info"

[notion]
api_base = "https://api.notion.com/"
api_key = "env:NOTION_TOKEN"
timeout_ms = 5000

[notion.databases.personnages]
main = "1886e4d21b4581a29340f77f5f2e5a1e"
sandbox = ""

[cache]
enabled = true
list_ttl_secs = 300
preview_ttl_secs = 600
full_ttl_secs = 1800

[context]
max_tokens = 4000
preview_chars = 600

[matching]
min_score = 0.6
max_suggestions = 3

[providers.llm]
provider_id = "openai"
api_base = "https://api.openai.com/v1/"
api_key = "sk-test"
path = "/chat/completions"
model = "gpt-4o-mini"
temperature = 0.7
max_tokens = 2000
timeout_ms = 60000

[pipeline]
review = true
validate = true
"#;

	#[test]
	fn resolves_env_keys_and_normalizes() {
		let mut cfg: Config = toml::from_str(MINIMAL).expect("Failed to parse minimal config.");

		resolve_env_keys(&mut cfg, |name| (name == "NOTION_TOKEN").then(|| "secret".to_string()))
			.expect("Failed to resolve env keys.");
		normalize(&mut cfg);

		assert_eq!(cfg.notion.api_key, "secret");
		assert_eq!(cfg.notion.api_base, "https://api.notion.com");
		assert_eq!(cfg.providers.llm.api_base, "https://api.openai.com/v1");
		assert!(cfg.notion.databases["personnages"].sandbox.is_none());
		assert_eq!(cfg.notion.version, "2022-06-28");
		assert_eq!(cfg.context.chars_per_token, 4.0);
		assert!(validate(&cfg).is_ok());
	}

	#[test]
	fn missing_env_key_is_reported() {
		let mut cfg: Config = toml::from_str(MINIMAL).expect("Failed to parse minimal config.");
		let err = resolve_env_keys(&mut cfg, |_| None).expect_err("Expected missing env error.");

		assert!(matches!(err, Error::MissingEnv { ref name, .. } if name == "NOTION_TOKEN"));
	}

	#[test]
	fn accepts_dashed_and_compact_ids() {
		assert!(is_notion_id("1886e4d2-1b45-81a2-9340-f77f5f2e5a1e"));
		assert!(is_notion_id("1886E4D21B4581A29340F77F5F2E5A1E"));
		assert!(!is_notion_id("not-an-id"));
		assert!(!is_notion_id("1886e4d21b4581a29340f77f5f2e5a1"));
	}
}
