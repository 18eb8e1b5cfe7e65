use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
	BoxFuture, Error, NotionApi, Result,
	cache::{self, Namespace, NotionCache},
	client, format,
	models::{Block, PageContent, PagePreview, PageSummary},
};
use gdd_domain::Domain;

#[derive(Debug, Clone, Copy)]
pub struct FetchSettings {
	pub preview_chars: usize,
	pub max_block_depth: u32,
}

/// A database to list, tagged with the domain it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
	pub domain: Domain,
	pub database_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcedPage {
	pub domain: Domain,
	pub page: PageSummary,
}

/// Cached access to Notion pages at three levels of detail.
pub struct ContextFetcher {
	api: Arc<dyn NotionApi>,
	cache: Arc<NotionCache>,
	settings: FetchSettings,
}

impl FetchSettings {
	pub fn from_config(cfg: &gdd_config::Config) -> Self {
		Self {
			preview_chars: cfg.context.preview_chars as usize,
			max_block_depth: cfg.notion.max_block_depth,
		}
	}
}

impl ContextFetcher {
	pub fn new(api: Arc<dyn NotionApi>, cache: Arc<NotionCache>, settings: FetchSettings) -> Self {
		Self { api, cache, settings }
	}

	pub fn api(&self) -> &dyn NotionApi {
		self.api.as_ref()
	}

	pub fn cache(&self) -> &NotionCache {
		&self.cache
	}

	pub async fn list_pages(&self, database_id: &str) -> Result<Vec<PageSummary>> {
		let database_id = client::normalize_id(database_id)?;
		let key = cache::list_key(&database_id, None);

		if let Some(pages) = self.cache.get::<Vec<PageSummary>>(Namespace::List, &key) {
			return Ok(pages);
		}

		let raw = client::query_all(self.api.as_ref(), &database_id, None).await?;
		let pages: Vec<PageSummary> = raw
			.iter()
			.filter(|page| !page.get("archived").and_then(Value::as_bool).unwrap_or(false))
			.filter_map(PageSummary::from_page)
			.map(|mut page| {
				page.id = client::normalize_id(&page.id).unwrap_or(page.id);

				if page.database_id.is_none() {
					page.database_id = Some(database_id.clone());
				}

				page
			})
			.collect();

		tracing::debug!(database_id = %database_id, pages = pages.len(), "Listed Notion database.");

		self.cache.put(Namespace::List, &key, &pages);

		Ok(pages)
	}

	/// Lists several databases as one candidate pool. A failing database is skipped unless every
	/// database fails.
	pub async fn list_domains(&self, sources: &[Source]) -> Result<Vec<SourcedPage>> {
		let mut out = Vec::new();
		let mut last_error = None;
		let mut succeeded = 0_usize;

		for source in sources {
			match self.list_pages(&source.database_id).await {
				Ok(pages) => {
					succeeded += 1;

					out.extend(
						pages.into_iter().map(|page| SourcedPage { domain: source.domain, page }),
					);
				},
				Err(err) => {
					tracing::warn!(
						domain = source.domain.key(),
						database_id = %source.database_id,
						error = %err,
						"Skipping Notion database that failed to list."
					);

					last_error = Some(err);
				},
			}
		}

		if succeeded == 0
			&& let Some(err) = last_error
		{
			return Err(err);
		}

		Ok(out)
	}

	pub async fn preview(&self, page_id: &str) -> Result<PagePreview> {
		let page_id = client::normalize_id(page_id)?;

		if let Some(preview) = self.cache.get::<PagePreview>(Namespace::Preview, &page_id) {
			return Ok(preview);
		}

		let page = self.api.retrieve_page(&page_id).await?;
		let summary = summarize(&page, &page_id)?;
		let blocks = self.fetch_blocks(&page_id, 1).await?;
		let content = PageContent {
			summary,
			properties: format::page_properties(&page),
			body: format::blocks_to_text(&blocks),
		};
		let preview = content.preview(self.settings.preview_chars);

		self.cache.put(Namespace::Preview, &page_id, &preview);

		Ok(preview)
	}

	pub async fn full(&self, page_id: &str) -> Result<PageContent> {
		let page_id = client::normalize_id(page_id)?;

		if let Some(content) = self.cache.get::<PageContent>(Namespace::Full, &page_id) {
			return Ok(content);
		}

		let page = self.api.retrieve_page(&page_id).await?;
		let summary = summarize(&page, &page_id)?;
		let blocks = self.fetch_blocks(&page_id, self.settings.max_block_depth).await?;
		let content = PageContent {
			summary,
			properties: format::page_properties(&page),
			body: format::blocks_to_text(&blocks),
		};

		tracing::debug!(
			page_id = %page_id,
			body_chars = content.body.chars().count(),
			"Fetched full Notion page."
		);

		self.cache.put(Namespace::Full, &page_id, &content);
		self.cache.put(Namespace::Preview, &page_id, &content.preview(self.settings.preview_chars));

		Ok(content)
	}

	pub async fn refresh_page(&self, page_id: &str) -> Result<PageContent> {
		let page_id = client::normalize_id(page_id)?;

		self.cache.invalidate_page(&page_id);

		self.full(&page_id).await
	}

	fn fetch_blocks<'a>(
		&'a self,
		block_id: &'a str,
		depth: u32,
	) -> BoxFuture<'a, Result<Vec<Block>>> {
		Box::pin(async move {
			let raw = client::children_all(self.api.as_ref(), block_id).await?;
			let mut blocks = Vec::with_capacity(raw.len());

			for value in &raw {
				let Some(mut block) = Block::from_value(value) else { continue };

				// Child pages are separate entities; their content is not inlined.
				if block.has_children && depth > 1 && block.kind != "child_page" {
					block.children = self.fetch_blocks(&block.id, depth - 1).await?;
				}

				blocks.push(block);
			}

			Ok(blocks)
		})
	}
}

fn summarize(page: &Value, page_id: &str) -> Result<PageSummary> {
	let mut summary = PageSummary::from_page(page).ok_or_else(|| Error::InvalidResponse {
		message: format!("Page `{page_id}` has no id."),
	})?;

	summary.id = page_id.to_string();

	Ok(summary)
}
