use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Source map attached to a query result.
///
/// `mappings` is keyed by result paths in mapping form (`$['title']`,
/// `$['items'][0]`); each mapping points at an entry of `documents` and a
/// source path in `paths`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentSourceMap {
	#[serde(default)]
	pub documents: Vec<CsmDocument>,
	#[serde(default)]
	pub paths: Vec<String>,
	#[serde(default)]
	pub mappings: BTreeMap<String, Mapping>,
}

impl ContentSourceMap {
	/// Whether the map references any document at all.
	pub fn has_documents(&self) -> bool {
		!self.documents.is_empty()
	}

	/// Ids of all referenced documents, in map order.
	pub fn document_ids(&self) -> impl Iterator<Item = &str> {
		self.documents.iter().map(|doc| doc.id.as_str())
	}
}

/// A document referenced by a source map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CsmDocument {
	#[serde(rename = "_id")]
	pub id: String,
	#[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
	pub doc_type: Option<String>,
	/// Set only for documents that live in another project (cross-dataset references).
	#[serde(rename = "_projectId", default, skip_serializing_if = "Option::is_none")]
	pub project_id: Option<String>,
	#[serde(rename = "_dataset", default, skip_serializing_if = "Option::is_none")]
	pub dataset: Option<String>,
}

impl CsmDocument {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			doc_type: None,
			project_id: None,
			dataset: None,
		}
	}

	pub fn is_cross_dataset(&self) -> bool {
		self.project_id.is_some()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mapping {
	Value { source: MappingSource },
	#[serde(other)]
	Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MappingSource {
	/// Index into [`ContentSourceMap::documents`] and [`ContentSourceMap::paths`].
	DocumentValue { document: usize, path: usize },
	#[serde(other)]
	Other,
}
