use std::{future::Future, pin::Pin, time::Duration};

use reqwest::{
	Client, RequestBuilder, StatusCode,
	header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const MAX_RATE_LIMIT_ATTEMPTS: u32 = 3;
const MAX_RETRY_AFTER_SECS: u64 = 30;
/// Notion rejects `children` arrays longer than this.
pub const MAX_CHILDREN_PER_REQUEST: usize = 100;

/// One page of a paginated Notion list response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paginated {
	#[serde(default)]
	pub results: Vec<Value>,
	#[serde(default)]
	pub has_more: bool,
	#[serde(default)]
	pub next_cursor: Option<String>,
}

pub trait NotionApi
where
	Self: Send + Sync,
{
	fn query_database<'a>(
		&'a self,
		database_id: &'a str,
		filter: Option<&'a Value>,
		cursor: Option<&'a str>,
	) -> BoxFuture<'a, Result<Paginated>>;

	fn retrieve_page<'a>(&'a self, page_id: &'a str) -> BoxFuture<'a, Result<Value>>;

	fn block_children<'a>(
		&'a self,
		block_id: &'a str,
		cursor: Option<&'a str>,
	) -> BoxFuture<'a, Result<Paginated>>;

	fn create_page<'a>(&'a self, body: &'a Value) -> BoxFuture<'a, Result<Value>>;

	fn append_block_children<'a>(
		&'a self,
		block_id: &'a str,
		children: &'a [Value],
	) -> BoxFuture<'a, Result<Paginated>>;
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
	#[serde(default)]
	code: String,
	#[serde(default)]
	message: String,
}

#[derive(Debug, Clone)]
pub struct NotionClient {
	http: Client,
	api_base: String,
	page_size: u32,
}

impl NotionClient {
	pub fn new(cfg: &gdd_config::Notion) -> Result<Self> {
		let mut headers = HeaderMap::new();

		headers.insert(AUTHORIZATION, format!("Bearer {}", cfg.api_key).parse()?);
		headers.insert(HeaderName::from_static("notion-version"), cfg.version.parse()?);
		headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

		let http = Client::builder()
			.default_headers(headers)
			.timeout(Duration::from_millis(cfg.timeout_ms))
			.build()?;

		Ok(Self { http, api_base: cfg.api_base.clone(), page_size: cfg.page_size })
	}

	fn url(&self, path: &str) -> String {
		format!("{}/v1/{path}", self.api_base)
	}

	async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Value> {
		let mut attempt = 0;

		loop {
			attempt += 1;

			let res = build().send().await?;
			let status = res.status();

			if status.is_success() {
				return Ok(res.json().await?);
			}

			let retry_after = res
				.headers()
				.get(RETRY_AFTER)
				.and_then(|value| value.to_str().ok())
				.and_then(|value| value.trim().parse::<u64>().ok());
			let text = res.text().await.unwrap_or_default();

			if status == StatusCode::TOO_MANY_REQUESTS {
				if attempt >= MAX_RATE_LIMIT_ATTEMPTS {
					return Err(Error::RateLimited { retry_after });
				}

				let wait = retry_after.unwrap_or(1).min(MAX_RETRY_AFTER_SECS);

				tracing::warn!(attempt, wait_secs = wait, "Notion rate limit hit; waiting.");

				tokio::time::sleep(Duration::from_secs(wait)).await;

				continue;
			}

			return Err(status_error(status, &text));
		}
	}

	pub async fn query_database_page(
		&self,
		database_id: &str,
		filter: Option<&Value>,
		cursor: Option<&str>,
	) -> Result<Paginated> {
		let mut body = serde_json::json!({ "page_size": self.page_size });

		if let Some(filter) = filter {
			body["filter"] = filter.clone();
		}
		if let Some(cursor) = cursor {
			body["start_cursor"] = Value::String(cursor.to_string());
		}

		let url = self.url(&format!("databases/{database_id}/query"));
		let value = self.send(|| self.http.post(&url).json(&body)).await?;

		Ok(serde_json::from_value(value)?)
	}

	pub async fn retrieve_page_value(&self, page_id: &str) -> Result<Value> {
		let url = self.url(&format!("pages/{page_id}"));

		self.send(|| self.http.get(&url)).await
	}

	pub async fn block_children_page(
		&self,
		block_id: &str,
		cursor: Option<&str>,
	) -> Result<Paginated> {
		let url = self.url(&format!("blocks/{block_id}/children"));
		let page_size = self.page_size.to_string();
		let value = self
			.send(|| {
				let mut query = vec![("page_size", page_size.as_str())];

				if let Some(cursor) = cursor {
					query.push(("start_cursor", cursor));
				}

				self.http.get(&url).query(&query)
			})
			.await?;

		Ok(serde_json::from_value(value)?)
	}

	pub async fn create_page_value(&self, body: &Value) -> Result<Value> {
		let url = self.url("pages");

		self.send(|| self.http.post(&url).json(body)).await
	}

	pub async fn append_children_value(
		&self,
		block_id: &str,
		children: &[Value],
	) -> Result<Paginated> {
		if children.len() > MAX_CHILDREN_PER_REQUEST {
			return Err(Error::InvalidResponse {
				message: format!(
					"Cannot append {} blocks in one request; the limit is {MAX_CHILDREN_PER_REQUEST}.",
					children.len()
				),
			});
		}

		let url = self.url(&format!("blocks/{block_id}/children"));
		let body = serde_json::json!({ "children": children });
		let value = self.send(|| self.http.patch(&url).json(&body)).await?;

		Ok(serde_json::from_value(value)?)
	}
}

impl NotionApi for NotionClient {
	fn query_database<'a>(
		&'a self,
		database_id: &'a str,
		filter: Option<&'a Value>,
		cursor: Option<&'a str>,
	) -> BoxFuture<'a, Result<Paginated>> {
		Box::pin(self.query_database_page(database_id, filter, cursor))
	}

	fn retrieve_page<'a>(&'a self, page_id: &'a str) -> BoxFuture<'a, Result<Value>> {
		Box::pin(self.retrieve_page_value(page_id))
	}

	fn block_children<'a>(
		&'a self,
		block_id: &'a str,
		cursor: Option<&'a str>,
	) -> BoxFuture<'a, Result<Paginated>> {
		Box::pin(self.block_children_page(block_id, cursor))
	}

	fn create_page<'a>(&'a self, body: &'a Value) -> BoxFuture<'a, Result<Value>> {
		Box::pin(self.create_page_value(body))
	}

	fn append_block_children<'a>(
		&'a self,
		block_id: &'a str,
		children: &'a [Value],
	) -> BoxFuture<'a, Result<Paginated>> {
		Box::pin(self.append_children_value(block_id, children))
	}
}

/// Follows `next_cursor` until the database query is exhausted.
pub async fn query_all(
	api: &dyn NotionApi,
	database_id: &str,
	filter: Option<&Value>,
) -> Result<Vec<Value>> {
	let mut out = Vec::new();
	let mut cursor: Option<String> = None;

	loop {
		let page = api.query_database(database_id, filter, cursor.as_deref()).await?;

		out.extend(page.results);

		match page.next_cursor {
			Some(next) if page.has_more => cursor = Some(next),
			_ => break,
		}
	}

	Ok(out)
}

pub async fn children_all(api: &dyn NotionApi, block_id: &str) -> Result<Vec<Value>> {
	let mut out = Vec::new();
	let mut cursor: Option<String> = None;

	loop {
		let page = api.block_children(block_id, cursor.as_deref()).await?;

		out.extend(page.results);

		match page.next_cursor {
			Some(next) if page.has_more => cursor = Some(next),
			_ => break,
		}
	}

	Ok(out)
}

/// Accepts dashed, undashed, or URL-suffixed ids and returns the dashed form.
pub fn normalize_id(raw: &str) -> Result<String> {
	let trimmed = raw.trim();
	let without_query = trimmed.split(['?', '#']).next().unwrap_or_default();
	let last_segment =
		without_query.trim_end_matches('/').rsplit('/').next().unwrap_or_default().replace('-', "");

	if last_segment.len() < 32 {
		return Err(Error::InvalidId { message: format!("`{raw}` is too short.") });
	}

	let candidate = last_segment.get(last_segment.len() - 32..).unwrap_or_default();

	if candidate.len() != 32 || !candidate.chars().all(|ch| ch.is_ascii_hexdigit()) {
		return Err(Error::InvalidId { message: format!("`{raw}` is not hexadecimal.") });
	}

	let id = uuid::Uuid::parse_str(candidate)
		.map_err(|err| Error::InvalidId { message: format!("`{raw}`: {err}") })?;

	Ok(id.hyphenated().to_string())
}

fn status_error(status: StatusCode, text: &str) -> Error {
	let parsed: Option<ApiErrorBody> = serde_json::from_str(text).ok();
	let (code, message) = match parsed {
		Some(body) => (body.code, body.message),
		None => (String::new(), text.chars().take(512).collect()),
	};

	if status == StatusCode::NOT_FOUND {
		return Error::NotFound { message };
	}

	Error::Api { status: status.as_u16(), code, message }
}
