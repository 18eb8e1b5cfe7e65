pub mod cache;
pub mod client;
pub mod error;
pub mod fetcher;
pub mod format;
pub mod models;

pub use cache::{CacheSettings, CacheStats, Namespace, NotionCache};
pub use client::{BoxFuture, NotionApi, NotionClient, Paginated, normalize_id};
pub use error::{Error, Result};
pub use fetcher::{ContextFetcher, FetchSettings, Source, SourcedPage};
pub use models::{Block, PageContent, PagePreview, PageSummary};
