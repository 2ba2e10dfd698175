//! Turbo ids and the missing-document loader.
//!
//! Every document a source map mentions becomes a turbo id. The cache must
//! hold a full copy of each so mutations can be patched in locally; ids the
//! cache lacks are fetched in one batch.

use std::collections::HashSet;

use indexmap::IndexSet;
use serde_json::Value;
use sightline_csm::ContentSourceMap;

use crate::store::DocumentStore;

/// Insertion-ordered set of document ids referenced by any source map seen
/// this session. It only grows.
#[derive(Debug, Default)]
pub struct TurboIds {
	ids: IndexSet<String>,
}

impl TurboIds {
	/// Adds the ids `csm` references; returns how many were new.
	pub fn extend_from(&mut self, csm: &ContentSourceMap) -> usize {
		let before = self.ids.len();
		self.ids.extend(csm.document_ids().map(str::to_owned));
		self.ids.len() - before
	}

	pub fn contains(&self, id: &str) -> bool {
		self.ids.contains(id)
	}

	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.ids.iter().map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.ids.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ids.is_empty()
	}
}

/// Tracks which turbo ids are being fetched so a batch is never requested twice.
#[derive(Debug, Default)]
pub struct MissingDocuments {
	loading: HashSet<String>,
}

impl MissingDocuments {
	/// Turbo ids neither cached nor already loading, marked as loading.
	pub fn take_missing<K>(&mut self, turbo: &TurboIds, store: &DocumentStore, key_of: K) -> Vec<String>
	where
		K: Fn(&str) -> String,
	{
		let missing: Vec<String> = turbo
			.iter()
			.filter(|id| !self.loading.contains(*id) && !store.has(&key_of(*id)))
			.map(str::to_owned)
			.collect();
		self.loading.extend(missing.iter().cloned());
		missing
	}

	/// Clears the loading mark for a finished (or failed) batch.
	pub fn finish(&mut self, ids: &[String]) {
		for id in ids {
			self.loading.remove(id);
		}
	}
}

/// Caches every fetched document that has an `_id`; returns how many were stored.
pub fn store_documents<K>(store: &mut DocumentStore, documents: Vec<Option<Value>>, key_of: K) -> usize
where
	K: Fn(&str) -> String,
{
	let mut stored = 0;
	for doc in documents.into_iter().flatten() {
		let Some(key) = doc.get("_id").and_then(Value::as_str).map(&key_of) else {
			continue;
		};
		store.set(key, doc);
		stored += 1;
	}
	stored
}
