use std::time::Duration;

use reqwest::{Client, Response, StatusCode, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
	Error, Result,
	sse::{SseDecoder, SseEvent},
};
use gdd_config::LlmProviderConfig;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 500;
const MAX_ERROR_BODY_CHARS: usize = 1_024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
	OpenAi,
	Anthropic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	User,
	Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub role: Role,
	pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
	pub system: String,
	pub messages: Vec<ChatMessage>,
	/// Overrides `providers.llm.temperature`.
	pub temperature: Option<f32>,
	/// Overrides `providers.llm.max_tokens`.
	pub max_tokens: Option<u32>,
}

/// Incremental output forwarded while the response streams in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
	Text(String),
	Reasoning(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
	pub text: String,
	pub reasoning: String,
	pub finish_reason: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
	Continue,
	Done,
}

impl ProviderKind {
	pub fn from_id(provider_id: &str) -> Result<Self> {
		match provider_id {
			"openai" => Ok(Self::OpenAi),
			"anthropic" => Ok(Self::Anthropic),
			other => Err(Error::InvalidConfig {
				message: format!("Unsupported LLM provider `{other}`."),
			}),
		}
	}
}

impl ChatMessage {
	pub fn user(content: impl Into<String>) -> Self {
		Self { role: Role::User, content: content.into() }
	}

	pub fn assistant(content: impl Into<String>) -> Self {
		Self { role: Role::Assistant, content: content.into() }
	}
}

impl ChatCompletion {
	fn apply(&mut self, delta: &StreamDelta) {
		match delta {
			StreamDelta::Text(text) => self.text.push_str(text),
			StreamDelta::Reasoning(text) => self.reasoning.push_str(text),
		}
	}
}

/// Sends a streaming chat request and forwards every delta to `on_delta` as it arrives.
pub async fn stream_chat(
	cfg: &LlmProviderConfig,
	request: &ChatRequest,
	on_delta: &mut (dyn FnMut(StreamDelta) + Send),
) -> Result<ChatCompletion> {
	let kind = ProviderKind::from_id(&cfg.provider_id)?;
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = build_body(kind, cfg, request);
	let res = send_with_retry(&client, &url, kind, cfg, &body).await?;
	let is_json = res
		.headers()
		.get(CONTENT_TYPE)
		.and_then(|value| value.to_str().ok())
		.map(|value| value.starts_with("application/json"))
		.unwrap_or(false);

	if is_json {
		let json: Value = res.json().await?;
		let completion = parse_completion_json(kind, &json)?;

		if !completion.reasoning.is_empty() {
			on_delta(StreamDelta::Reasoning(completion.reasoning.clone()));
		}
		if !completion.text.is_empty() {
			on_delta(StreamDelta::Text(completion.text.clone()));
		}

		return Ok(completion);
	}

	read_stream(kind, res, on_delta).await
}

/// Non-streaming convenience wrapper.
pub async fn complete(cfg: &LlmProviderConfig, request: &ChatRequest) -> Result<ChatCompletion> {
	stream_chat(cfg, request, &mut |_| {}).await
}

async fn send_with_retry(
	client: &Client,
	url: &str,
	kind: ProviderKind,
	cfg: &LlmProviderConfig,
	body: &Value,
) -> Result<Response> {
	let mut attempt = 0;

	loop {
		attempt += 1;

		let res = client
			.post(url)
			.headers(crate::auth_headers(kind, &cfg.api_key, &cfg.default_headers)?)
			.json(body)
			.send()
			.await?;
		let status = res.status();

		if status.is_success() {
			return Ok(res);
		}

		let retryable =
			status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
		let text = res.text().await.unwrap_or_default();

		if !retryable || attempt >= MAX_ATTEMPTS {
			return Err(Error::Status {
				status: status.as_u16(),
				body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
			});
		}

		let backoff = BASE_BACKOFF_MS * 2_u64.pow(attempt - 1);

		tracing::warn!(%status, attempt, backoff_ms = backoff, "LLM request failed; retrying.");

		tokio::time::sleep(Duration::from_millis(backoff)).await;
	}
}

async fn read_stream(
	kind: ProviderKind,
	mut res: Response,
	on_delta: &mut (dyn FnMut(StreamDelta) + Send),
) -> Result<ChatCompletion> {
	let mut decoder = SseDecoder::default();
	let mut completion = ChatCompletion::default();

	'stream: while let Some(chunk) = res.chunk().await? {
		for event in decoder.push(&chunk) {
			if handle_event(kind, &event, &mut completion, on_delta)? == Flow::Done {
				break 'stream;
			}
		}
	}

	if let Some(event) = decoder.finish() {
		handle_event(kind, &event, &mut completion, on_delta)?;
	}

	Ok(completion)
}

fn handle_event(
	kind: ProviderKind,
	event: &SseEvent,
	completion: &mut ChatCompletion,
	on_delta: &mut (dyn FnMut(StreamDelta) + Send),
) -> Result<Flow> {
	let (deltas, finish_reason, flow) = match kind {
		ProviderKind::OpenAi => parse_openai_event(event)?,
		ProviderKind::Anthropic => parse_anthropic_event(event)?,
	};

	for delta in deltas {
		completion.apply(&delta);
		on_delta(delta);
	}

	if finish_reason.is_some() {
		completion.finish_reason = finish_reason;
	}

	Ok(flow)
}

type ParsedEvent = (Vec<StreamDelta>, Option<String>, Flow);

fn parse_openai_event(event: &SseEvent) -> Result<ParsedEvent> {
	let data = event.data.trim();

	if data == "[DONE]" {
		return Ok((Vec::new(), None, Flow::Done));
	}

	let json: Value = serde_json::from_str(data)?;

	if let Some(error) = json.get("error") {
		return Err(provider_error(error));
	}

	let mut deltas = Vec::new();
	let mut finish_reason = None;

	if let Some(choice) = json.get("choices").and_then(Value::as_array).and_then(|arr| arr.first())
	{
		if let Some(delta) = choice.get("delta") {
			let reasoning = delta
				.get("reasoning_content")
				.or_else(|| delta.get("reasoning"))
				.and_then(Value::as_str);

			if let Some(text) = reasoning.filter(|text| !text.is_empty()) {
				deltas.push(StreamDelta::Reasoning(text.to_string()));
			}
			if let Some(text) =
				delta.get("content").and_then(Value::as_str).filter(|text| !text.is_empty())
			{
				deltas.push(StreamDelta::Text(text.to_string()));
			}
		}

		finish_reason = choice.get("finish_reason").and_then(Value::as_str).map(str::to_string);
	}

	Ok((deltas, finish_reason, Flow::Continue))
}

fn parse_anthropic_event(event: &SseEvent) -> Result<ParsedEvent> {
	let json: Value = serde_json::from_str(event.data.trim())?;
	let event_type = json
		.get("type")
		.and_then(Value::as_str)
		.or(event.event.as_deref())
		.unwrap_or_default();

	match event_type {
		"content_block_delta" => {
			let Some(delta) = json.get("delta") else {
				return Ok((Vec::new(), None, Flow::Continue));
			};
			let mut deltas = Vec::new();

			match delta.get("type").and_then(Value::as_str) {
				Some("text_delta") => {
					if let Some(text) = delta.get("text").and_then(Value::as_str) {
						deltas.push(StreamDelta::Text(text.to_string()));
					}
				},
				Some("thinking_delta") => {
					if let Some(text) = delta.get("thinking").and_then(Value::as_str) {
						deltas.push(StreamDelta::Reasoning(text.to_string()));
					}
				},
				_ => {},
			}

			Ok((deltas, None, Flow::Continue))
		},
		"message_delta" => {
			let stop_reason = json
				.get("delta")
				.and_then(|delta| delta.get("stop_reason"))
				.and_then(Value::as_str)
				.map(str::to_string);

			Ok((Vec::new(), stop_reason, Flow::Continue))
		},
		"message_stop" => Ok((Vec::new(), None, Flow::Done)),
		"error" => Err(provider_error(json.get("error").unwrap_or(&json))),
		_ => Ok((Vec::new(), None, Flow::Continue)),
	}
}

fn parse_completion_json(kind: ProviderKind, json: &Value) -> Result<ChatCompletion> {
	if let Some(error) = json.get("error") {
		return Err(provider_error(error));
	}

	match kind {
		ProviderKind::OpenAi => {
			let choice = json
				.get("choices")
				.and_then(Value::as_array)
				.and_then(|arr| arr.first())
				.ok_or_else(|| Error::InvalidResponse {
					message: "Completion response is missing choices.".to_string(),
				})?;
			let message = choice.get("message");
			let text = message
				.and_then(|msg| msg.get("content"))
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_string();
			let reasoning = message
				.and_then(|msg| msg.get("reasoning_content"))
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_string();
			let finish_reason =
				choice.get("finish_reason").and_then(Value::as_str).map(str::to_string);

			Ok(ChatCompletion { text, reasoning, finish_reason })
		},
		ProviderKind::Anthropic => {
			let blocks = json.get("content").and_then(Value::as_array).ok_or_else(|| {
				Error::InvalidResponse {
					message: "Completion response is missing content blocks.".to_string(),
				}
			})?;
			let mut completion = ChatCompletion {
				finish_reason: json.get("stop_reason").and_then(Value::as_str).map(str::to_string),
				..Default::default()
			};

			for block in blocks {
				match block.get("type").and_then(Value::as_str) {
					Some("text") => {
						completion.text.push_str(
							block.get("text").and_then(Value::as_str).unwrap_or_default(),
						);
					},
					Some("thinking") => {
						completion.reasoning.push_str(
							block.get("thinking").and_then(Value::as_str).unwrap_or_default(),
						);
					},
					_ => {},
				}
			}

			Ok(completion)
		},
	}
}

fn provider_error(error: &Value) -> Error {
	let message = error
		.get("message")
		.and_then(Value::as_str)
		.map(str::to_string)
		.unwrap_or_else(|| error.to_string());

	Error::InvalidResponse { message: format!("Provider reported an error: {message}") }
}

fn build_body(kind: ProviderKind, cfg: &LlmProviderConfig, request: &ChatRequest) -> Value {
	let temperature = request.temperature.unwrap_or(cfg.temperature);
	let max_tokens = request.max_tokens.unwrap_or(cfg.max_tokens);

	match kind {
		ProviderKind::OpenAi => {
			let mut messages = Vec::with_capacity(request.messages.len() + 1);

			if !request.system.is_empty() {
				messages.push(serde_json::json!({ "role": "system", "content": request.system }));
			}

			for message in &request.messages {
				messages.push(serde_json::json!({
					"role": message.role,
					"content": message.content,
				}));
			}

			let mut body = serde_json::json!({
				"model": cfg.model,
				"stream": true,
				"temperature": temperature,
				"max_tokens": max_tokens,
				"messages": messages,
			});

			if let Some(effort) = cfg.reasoning_effort.as_deref() {
				body["reasoning_effort"] = Value::String(effort.to_string());
			}

			body
		},
		ProviderKind::Anthropic => {
			let mut body = serde_json::json!({
				"model": cfg.model,
				"stream": true,
				"temperature": temperature,
				"max_tokens": max_tokens,
				"messages": request.messages,
			});

			if !request.system.is_empty() {
				body["system"] = Value::String(request.system.clone());
			}

			body
		},
	}
}

#[cfg(test)]
mod tests {
	use serde_json::Map;

	use super::*;

	fn cfg(provider_id: &str) -> LlmProviderConfig {
		LlmProviderConfig {
			provider_id: provider_id.to_string(),
			api_base: "http://localhost".to_string(),
			api_key: "key".to_string(),
			path: "/chat".to_string(),
			model: "m".to_string(),
			temperature: 0.4,
			max_tokens: 256,
			timeout_ms: 1_000,
			default_headers: Map::new(),
			reasoning_effort: Some("low".to_string()),
		}
	}

	fn event(data: &str) -> SseEvent {
		SseEvent { event: None, data: data.to_string() }
	}

	#[test]
	fn openai_body_puts_system_first_and_applies_overrides() {
		let request = ChatRequest {
			system: "sys".to_string(),
			messages: vec![ChatMessage::user("hi")],
			temperature: Some(1.1),
			max_tokens: None,
		};
		let body = build_body(ProviderKind::OpenAi, &cfg("openai"), &request);

		assert_eq!(body["messages"][0]["role"], "system");
		assert_eq!(body["messages"][1]["content"], "hi");
		assert_eq!(body["max_tokens"], 256);
		assert_eq!(body["reasoning_effort"], "low");
		assert!((body["temperature"].as_f64().unwrap_or_default() - 1.1).abs() < 1e-6);
	}

	#[test]
	fn anthropic_body_uses_top_level_system() {
		let request = ChatRequest {
			system: "sys".to_string(),
			messages: vec![ChatMessage::user("hi")],
			..Default::default()
		};
		let body = build_body(ProviderKind::Anthropic, &cfg("anthropic"), &request);

		assert_eq!(body["system"], "sys");
		assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
		assert!(body.get("reasoning_effort").is_none());
	}

	#[test]
	fn parses_openai_text_and_reasoning_deltas() {
		let (deltas, finish, flow) = parse_openai_event(&event(
			r#"{"choices":[{"delta":{"content":"Bon","reasoning_content":"hmm"},"finish_reason":null}]}"#,
		))
		.expect("parse failed");

		assert_eq!(
			deltas,
			vec![StreamDelta::Reasoning("hmm".to_string()), StreamDelta::Text("Bon".to_string())]
		);
		assert_eq!(finish, None);
		assert_eq!(flow, Flow::Continue);
		assert_eq!(parse_openai_event(&event("[DONE]")).expect("parse failed").2, Flow::Done);
	}

	#[test]
	fn parses_anthropic_stream_events() {
		let (deltas, _, _) = parse_anthropic_event(&event(
			r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"plan"}}"#,
		))
		.expect("parse failed");

		assert_eq!(deltas, vec![StreamDelta::Reasoning("plan".to_string())]);

		let (_, stop, _) = parse_anthropic_event(&event(
			r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#,
		))
		.expect("parse failed");

		assert_eq!(stop.as_deref(), Some("end_turn"));
		assert_eq!(
			parse_anthropic_event(&event(r#"{"type":"message_stop"}"#)).expect("parse failed").2,
			Flow::Done
		);
	}

	#[test]
	fn error_events_become_errors() {
		let err = parse_anthropic_event(&event(
			r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
		))
		.expect_err("Expected provider error.");

		assert!(err.to_string().contains("Overloaded"));
		assert!(parse_openai_event(&event(r#"{"error":{"message":"quota"}}"#)).is_err());
	}

	#[test]
	fn parses_non_streaming_fallbacks() {
		let openai = parse_completion_json(
			ProviderKind::OpenAi,
			&serde_json::json!({
				"choices": [{ "message": { "content": "Texte" }, "finish_reason": "stop" }]
			}),
		)
		.expect("parse failed");

		assert_eq!(openai.text, "Texte");
		assert_eq!(openai.finish_reason.as_deref(), Some("stop"));

		let anthropic = parse_completion_json(
			ProviderKind::Anthropic,
			&serde_json::json!({
				"content": [
					{ "type": "thinking", "thinking": "a" },
					{ "type": "text", "text": "b" }
				],
				"stop_reason": "end_turn"
			}),
		)
		.expect("parse failed");

		assert_eq!(anthropic.reasoning, "a");
		assert_eq!(anthropic.text, "b");
	}
}
