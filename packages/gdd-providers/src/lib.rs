pub mod chat;
pub mod error;
pub mod sse;

pub use chat::{ChatCompletion, ChatMessage, ChatRequest, ProviderKind, Role, StreamDelta};
pub use error::{Error, Result};

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub fn auth_headers(
	kind: ProviderKind,
	api_key: &str,
	default_headers: &Map<String, Value>,
) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	match kind {
		ProviderKind::OpenAi => {
			headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);
		},
		ProviderKind::Anthropic => {
			headers.insert(HeaderName::from_static("x-api-key"), api_key.parse()?);
			headers.insert(
				HeaderName::from_static("anthropic-version"),
				HeaderValue::from_static(ANTHROPIC_VERSION),
			);
		},
	}

	headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: "Default header values must be strings.".to_string(),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}
