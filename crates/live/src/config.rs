//! Preview configuration.
//!
//! [`PreviewConfig`] is what an application writes down (usually in TOML);
//! [`ClientConfig`] is what the content client is actually built with once a
//! token is known.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sightline_csm::Perspective;

use crate::error::ConfigError;

/// Request tag prefix used when none is configured.
pub const DEFAULT_REQUEST_TAG_PREFIX: &str = "sanity.preview-kit";

/// Number of documents the document cache holds by default.
pub const DEFAULT_DOCUMENT_CACHE_CAPACITY: usize = 500;

/// How result source maps are requested from the content API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSourceMapMode {
	#[default]
	Enabled,
	/// Array items are addressed by `_key` in source paths.
	WithKeyArraySelector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreviewConfig {
	pub project_id: String,
	pub dataset: String,
	/// Periodic revalidation interval; `0` disables the timer.
	pub refresh_interval_ms: u64,
	pub document_cache_capacity: usize,
	/// Filter passed to the mutation listener.
	pub listen_filter: String,
	pub request_tag_prefix: Option<String>,
	pub result_source_map: ResultSourceMapMode,
	pub use_cdn: bool,
	/// Perspective used when no token is given.
	pub perspective: Perspective,
}

impl Default for PreviewConfig {
	fn default() -> Self {
		Self {
			project_id: String::new(),
			dataset: "production".to_owned(),
			refresh_interval_ms: 0,
			document_cache_capacity: DEFAULT_DOCUMENT_CACHE_CAPACITY,
			listen_filter: "*".to_owned(),
			request_tag_prefix: None,
			result_source_map: ResultSourceMapMode::Enabled,
			use_cdn: true,
			perspective: Perspective::PreviewDrafts,
		}
	}
}

impl PreviewConfig {
	pub fn new(project_id: impl Into<String>, dataset: impl Into<String>) -> Self {
		Self {
			project_id: project_id.into(),
			dataset: dataset.into(),
			..Self::default()
		}
	}

	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses and validates a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&input)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.project_id.is_empty() {
			return Err(ConfigError::Invalid("project_id must not be empty".to_owned()));
		}
		if self.dataset.is_empty() {
			return Err(ConfigError::Invalid("dataset must not be empty".to_owned()));
		}
		if self.document_cache_capacity == 0 {
			return Err(ConfigError::Invalid("document_cache_capacity must be at least 1".to_owned()));
		}
		Ok(())
	}

	pub fn refresh_interval(&self) -> Option<Duration> {
		(self.refresh_interval_ms > 0).then(|| Duration::from_millis(self.refresh_interval_ms))
	}

	/// Effective client configuration for `token`; an empty token means anonymous access.
	pub fn client_config(&self, token: &str) -> ClientConfig {
		let mut client = ClientConfig {
			project_id: self.project_id.clone(),
			dataset: self.dataset.clone(),
			request_tag_prefix: self
				.request_tag_prefix
				.clone()
				.unwrap_or_else(|| DEFAULT_REQUEST_TAG_PREFIX.to_owned()),
			result_source_map: self.result_source_map,
			token: None,
			use_cdn: self.use_cdn,
			perspective: self.perspective,
		};
		if !token.is_empty() {
			client.token = Some(token.to_owned());
			client.use_cdn = false;
			client.perspective = Perspective::PreviewDrafts;
		}
		client
	}
}

/// Configuration a [`ContentClient`](crate::ContentClient) is built with.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
	pub project_id: String,
	pub dataset: String,
	pub request_tag_prefix: String,
	pub result_source_map: ResultSourceMapMode,
	pub token: Option<String>,
	pub use_cdn: bool,
	pub perspective: Perspective,
}

impl std::fmt::Debug for ClientConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClientConfig")
			.field("project_id", &self.project_id)
			.field("dataset", &self.dataset)
			.field("request_tag_prefix", &self.request_tag_prefix)
			.field("result_source_map", &self.result_source_map)
			.field("token", &self.token.as_ref().map(|_| "<redacted>"))
			.field("use_cdn", &self.use_cdn)
			.field("perspective", &self.perspective)
			.finish()
	}
}
