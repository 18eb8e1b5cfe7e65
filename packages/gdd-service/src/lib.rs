pub mod context;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod prompts;
pub mod relations;
pub mod runs;

pub use context::{
	ContextItem, ContextPayload, ContextRequest, ContextSelection, ContextSummary, Mention,
	SkippedItem, Target, Tier, UnresolvedName,
};
pub use error::{Error, Result};
pub use export::ExportReport;
pub use pipeline::{
	DeltaKind, GenerationRequest, GenerationResult, PipelineEvent, Stage, StageRecord,
	ValidationReport,
};
pub use relations::{RelationReport, RelationResolution};
pub use runs::RunFiles;

use std::{future::Future, pin::Pin, sync::Arc};

use gdd_config::{Config, LlmProviderConfig};
use gdd_domain::Domain;
use gdd_notion::{ContextFetcher, FetchSettings, NotionApi, NotionCache, NotionClient, Source};
use gdd_providers::{ChatCompletion, ChatRequest, StreamDelta, chat};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type DeltaSink<'a> = dyn FnMut(StreamDelta) + Send + 'a;

pub trait LlmProvider
where
	Self: Send + Sync,
{
	fn stream<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		request: &'a ChatRequest,
		on_delta: &'a mut DeltaSink<'_>,
	) -> BoxFuture<'a, gdd_providers::Result<ChatCompletion>>;
}

#[derive(Clone)]
pub struct Providers {
	pub llm: Arc<dyn LlmProvider>,
}

pub struct GddService {
	pub cfg: Config,
	pub notion: Arc<dyn NotionApi>,
	pub cache: Arc<NotionCache>,
	pub fetcher: ContextFetcher,
	pub providers: Providers,
}

struct DefaultProviders;

impl LlmProvider for DefaultProviders {
	fn stream<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		request: &'a ChatRequest,
		on_delta: &'a mut DeltaSink<'_>,
	) -> BoxFuture<'a, gdd_providers::Result<ChatCompletion>> {
		Box::pin(chat::stream_chat(cfg, request, on_delta))
	}
}

impl Providers {
	pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
		Self { llm }
	}
}

impl Default for Providers {
	fn default() -> Self {
		Self { llm: Arc::new(DefaultProviders) }
	}
}

impl GddService {
	pub fn new(cfg: Config) -> Result<Self> {
		let client = NotionClient::new(&cfg.notion)?;

		Ok(Self::with_parts(cfg, Arc::new(client), Providers::default()))
	}

	pub fn with_parts(cfg: Config, notion: Arc<dyn NotionApi>, providers: Providers) -> Self {
		let cache = Arc::new(NotionCache::from_config(&cfg.cache));
		let fetcher =
			ContextFetcher::new(notion.clone(), cache.clone(), FetchSettings::from_config(&cfg));

		Self { cfg, notion, cache, fetcher, providers }
	}

	/// Configured domains, in declaration order.
	pub fn domains(&self) -> Vec<Domain> {
		Domain::ALL
			.into_iter()
			.filter(|domain| self.cfg.notion.database(domain.key()).is_some())
			.collect()
	}

	/// Main (read-only) databases of every configured domain.
	pub fn sources(&self) -> Vec<Source> {
		self.domains()
			.into_iter()
			.filter_map(|domain| {
				self.cfg
					.notion
					.database(domain.key())
					.map(|ids| Source { domain, database_id: ids.main.clone() })
			})
			.collect()
	}

	pub fn main_database(&self, domain: Domain) -> Result<&str> {
		self.cfg.notion.database(domain.key()).map(|ids| ids.main.as_str()).ok_or_else(|| {
			Error::InvalidRequest {
				message: format!("No Notion database is configured for {}.", domain.key()),
			}
		})
	}

	pub fn sandbox_database(&self, domain: Domain) -> Result<&str> {
		self.cfg
			.notion
			.database(domain.key())
			.and_then(|ids| ids.sandbox.as_deref())
			.ok_or_else(|| Error::WriteDenied {
				message: format!("No sandbox database is configured for {}.", domain.key()),
			})
	}

	/// Maps a database id (any Notion id form) back to the domain it is configured for.
	pub fn domain_of_database(&self, database_id: &str) -> Option<Domain> {
		let wanted = gdd_notion::normalize_id(database_id).ok()?;

		self.domains().into_iter().find(|domain| {
			self.cfg.notion.database(domain.key()).is_some_and(|ids| {
				gdd_notion::normalize_id(&ids.main).is_ok_and(|id| id == wanted)
					|| ids
						.sandbox
						.as_deref()
						.and_then(|sandbox| gdd_notion::normalize_id(sandbox).ok())
						.is_some_and(|id| id == wanted)
			})
		})
	}
}
