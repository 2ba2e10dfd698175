//! Content client capability.
//!
//! The preview core never talks HTTP itself. It is handed a factory that
//! builds a [`ContentClient`] from the effective [`ClientConfig`] once
//! `initialize` knows the token.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sightline_csm::ContentSourceMap;

use crate::config::ClientConfig;
use crate::error::ClientError;

/// A query result together with its source map, when the API sent one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
	pub result: Value,
	#[serde(default, rename = "resultSourceMap", skip_serializing_if = "Option::is_none")]
	pub source_map: Option<ContentSourceMap>,
}

/// Patch effects of one mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationEffects {
	/// Mendoza patch that turns the previous revision into the new one.
	#[serde(default)]
	pub apply: Vec<Value>,
}

/// One event from the mutation feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEvent {
	pub document_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub effects: Option<MutationEffects>,
}

impl MutationEvent {
	/// The patch to apply, if the event carries a non-empty one.
	pub fn patch(&self) -> Option<&[Value]> {
		self.effects
			.as_ref()
			.map(|effects| effects.apply.as_slice())
			.filter(|patch| !patch.is_empty())
	}
}

pub type MutationStream = BoxStream<'static, Result<MutationEvent, ClientError>>;

#[async_trait]
pub trait ContentClient: Send + Sync + 'static {
	/// Runs `query` and returns the unfiltered response.
	async fn fetch(&self, query: &str, params: &Value) -> Result<QueryResponse, ClientError>;

	/// Opens the mutation feed for documents matching `filter`.
	async fn listen(&self, filter: &str) -> Result<MutationStream, ClientError>;

	/// Fetches documents by id; missing documents come back as `None`.
	async fn get_documents(&self, ids: &[String]) -> Result<Vec<Option<Value>>, ClientError>;
}

/// Builds the client once the effective configuration is known.
pub trait ClientFactory: Send + Sync {
	fn create(&self, config: &ClientConfig) -> Arc<dyn ContentClient>;
}

impl<F> ClientFactory for F
where
	F: Fn(&ClientConfig) -> Arc<dyn ContentClient> + Send + Sync,
{
	fn create(&self, config: &ClientConfig) -> Arc<dyn ContentClient> {
		self(config)
	}
}
