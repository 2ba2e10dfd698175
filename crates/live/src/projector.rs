//! Live projection of query results.
//!
//! Replaces every leaf a source map attributes to a cached document with
//! the cached value, so edits show up without refetching the query. String
//! leaves keep the stega marker of the value they replace.

use serde_json::Value;
use sightline_csm::{ContentSourceMap, CsmDocument, Perspective, SourceContext, apply_source_documents, merge_stega};
use tracing::warn;

use crate::key::document_key;
use crate::store::DocumentStore;

#[derive(Debug)]
pub struct Projector {
	project_id: String,
	dataset: String,
	perspective: Perspective,
	cross_dataset_warned: bool,
}

impl Projector {
	pub fn new(project_id: impl Into<String>, dataset: impl Into<String>, perspective: Perspective) -> Self {
		Self {
			project_id: project_id.into(),
			dataset: dataset.into(),
			perspective,
			cross_dataset_warned: false,
		}
	}

	pub fn document_key(&self, id: &str) -> String {
		document_key(&self.project_id, &self.dataset, id)
	}

	/// Projects `raw` through `source_map` against the cached documents.
	pub fn project(&mut self, raw: &Value, source_map: Option<&ContentSourceMap>, store: &mut DocumentStore) -> Value {
		let Some(csm) = source_map.filter(|csm| csm.has_documents()) else {
			return raw.clone();
		};

		let Self {
			project_id,
			dataset,
			perspective,
			cross_dataset_warned,
		} = self;
		let lookup = |doc: &CsmDocument| {
			if doc.is_cross_dataset() {
				if !*cross_dataset_warned {
					*cross_dataset_warned = true;
					warn!(
						document_id = %doc.id,
						project_id = doc.project_id.as_deref().unwrap_or_default(),
						"cross dataset references are not supported; leaving fields unprojected"
					);
				}
				return None;
			}
			perspective
				.lookup_ids(&doc.id)
				.iter()
				.find_map(|id| store.get(&document_key(project_id, dataset, id)).cloned())
		};
		apply_source_documents(raw.clone(), csm, lookup, keep_stega)
	}
}

fn keep_stega(changed: Value, ctx: SourceContext<'_>) -> Value {
	match (&changed, ctx.previous_value) {
		(Value::String(next), Value::String(previous)) => Value::String(merge_stega(previous, next)),
		_ => changed,
	}
}

#[cfg(test)]
mod tests {
	use std::num::NonZeroUsize;

	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;

	const MARK: &str = "\u{200B}\u{200C}\u{200D}\u{FEFF}";

	fn title_map(doc_id: &str, project: Option<&str>) -> ContentSourceMap {
		let mut doc = json!({"_id": doc_id, "_type": "post"});
		if let Some(project) = project {
			doc["_projectId"] = json!(project);
		}
		serde_json::from_value(json!({
			"documents": [doc],
			"paths": ["$['title']"],
			"mappings": {
				"$['title']": {"type": "value", "source": {"type": "documentValue", "document": 0, "path": 0}}
			}
		}))
		.unwrap()
	}

	fn store() -> DocumentStore {
		DocumentStore::new(NonZeroUsize::new(8).unwrap())
	}

	#[test]
	fn cached_edit_replaces_text_and_keeps_marker() {
		let mut projector = Projector::new("p", "d", Perspective::Published);
		let mut docs = store();
		docs.set(projector.document_key("post-1"), json!({"_id": "post-1", "title": "Hello World"}));

		let raw = json!({"title": format!("{MARK}Hello"), "other": 1});
		let projected = projector.project(&raw, Some(&title_map("post-1", None)), &mut docs);
		assert_eq!(projected, json!({"title": format!("{MARK}Hello World"), "other": 1}));
	}

	#[test]
	fn preview_drafts_prefers_the_draft_copy() {
		let mut projector = Projector::new("p", "d", Perspective::PreviewDrafts);
		let mut docs = store();
		docs.set(projector.document_key("post-1"), json!({"title": "published"}));
		docs.set(projector.document_key("drafts.post-1"), json!({"title": "draft"}));

		let raw = json!({"title": "old"});
		let projected = projector.project(&raw, Some(&title_map("post-1", None)), &mut docs);
		assert_eq!(projected["title"], json!("draft"));
	}

	#[test]
	fn uncached_or_unmapped_results_pass_through() {
		let mut projector = Projector::new("p", "d", Perspective::Published);
		let mut docs = store();
		let raw = json!({"title": "old"});
		assert_eq!(projector.project(&raw, Some(&title_map("post-1", None)), &mut docs), raw);
		assert_eq!(projector.project(&raw, None, &mut docs), raw);
	}

	#[test]
	fn cross_dataset_documents_are_left_alone() {
		let mut projector = Projector::new("p", "d", Perspective::Published);
		let mut docs = store();
		docs.set(projector.document_key("post-1"), json!({"title": "cached"}));
		let map = title_map("post-1", Some("elsewhere"));

		let raw = json!({"title": "old"});
		assert_eq!(projector.project(&raw, Some(&map), &mut docs), raw);
		assert!(projector.cross_dataset_warned);
		assert_eq!(projector.project(&raw, Some(&map), &mut docs), raw);
	}
}
