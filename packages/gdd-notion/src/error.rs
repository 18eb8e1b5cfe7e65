pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error(transparent)]
	InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
	#[error("Invalid Notion id: {message}")]
	InvalidId { message: String },
	#[error("Notion object not found: {message}")]
	NotFound { message: String },
	#[error("Notion rate limit exceeded.")]
	RateLimited { retry_after: Option<u64> },
	#[error("Notion API returned HTTP {status} ({code}): {message}")]
	Api { status: u16, code: String, message: String },
	#[error("{message}")]
	InvalidResponse { message: String },
}
