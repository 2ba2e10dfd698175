//! Bounded cache of full document bodies.

use std::num::NonZeroUsize;

use lru::LruCache;
use serde_json::Value;

/// Least-recently-used document cache keyed by [`document_key`](crate::key::document_key).
///
/// [`get`](Self::get) counts as an access; [`peek`](Self::peek) and
/// [`has`](Self::has) do not.
pub struct DocumentStore {
	docs: LruCache<String, Value>,
}

impl DocumentStore {
	pub fn new(capacity: NonZeroUsize) -> Self {
		Self {
			docs: LruCache::new(capacity),
		}
	}

	pub fn get(&mut self, key: &str) -> Option<&Value> {
		self.docs.get(key)
	}

	pub fn peek(&self, key: &str) -> Option<&Value> {
		self.docs.peek(key)
	}

	pub fn has(&self, key: &str) -> bool {
		self.docs.contains(key)
	}

	/// Inserts or replaces `key`, marking it most recently used. Returns the
	/// key evicted to make room, if any.
	pub fn set(&mut self, key: String, doc: Value) -> Option<String> {
		match self.docs.push(key, doc) {
			Some((evicted, _)) if !self.docs.contains(&evicted) => Some(evicted),
			_ => None,
		}
	}

	pub fn len(&self) -> usize {
		self.docs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.docs.is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.docs.cap().get()
	}

	/// Keys from most to least recently used.
	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.docs.iter().map(|(key, _)| key.as_str())
	}
}

impl std::fmt::Debug for DocumentStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DocumentStore")
			.field("len", &self.len())
			.field("capacity", &self.capacity())
			.finish()
	}
}
