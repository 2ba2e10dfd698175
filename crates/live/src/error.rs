use std::path::PathBuf;

/// Errors surfaced to callers of [`LivePreview`](crate::LivePreview).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PreviewError {
	#[error("live preview is not initialized; call initialize(token) first")]
	NotInitialized,
	#[error("live preview has been shut down")]
	ShutDown,
	#[error("live preview must be initialized from within a tokio runtime")]
	NoRuntime,
	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// Errors reported by a [`ContentClient`](crate::ContentClient).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
	/// The request was aborted before it produced a response.
	#[error("request cancelled")]
	Cancelled,
	#[error("request failed: {0}")]
	Request(String),
	#[error("transport failed: {0}")]
	Transport(String),
}

impl ClientError {
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse preview config: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("invalid preview config: {0}")]
	Invalid(String),
}

/// Result type for preview operations.
pub type Result<T, E = PreviewError> = std::result::Result<T, E>;
