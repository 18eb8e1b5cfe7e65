pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Write denied: {message}")]
	WriteDenied { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Notion error: {message}")]
	Notion { message: String },
	#[error("Stage {stage} failed: {message}")]
	Stage { stage: String, message: String },
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
}

impl From<gdd_providers::Error> for Error {
	fn from(err: gdd_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

impl From<gdd_notion::Error> for Error {
	fn from(err: gdd_notion::Error) -> Self {
		match err {
			gdd_notion::Error::NotFound { message } => Self::NotFound { message },
			gdd_notion::Error::InvalidId { message } => Self::InvalidRequest { message },
			other => Self::Notion { message: other.to_string() },
		}
	}
}
