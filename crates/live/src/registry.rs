//! Reference-counted table of live query snapshots.
//!
//! Each entry owns the latest raw result for one [`QueryKey`], its source
//! map, and the `watch` sender every subscriber of that key reads from.
//! Entries are created by the first subscriber and evicted when the last one
//! leaves; a later subscriber gets a fresh entry with a new generation.

use std::collections::HashMap;

use serde_json::Value;
use sightline_csm::ContentSourceMap;
use sightline_worker::{GenerationClock, GenerationToken};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::key::QueryKey;

pub struct Entry {
	query: String,
	params: Value,
	ref_count: usize,
	next_seq: u64,
	applied_seq: u64,
	raw: Value,
	source_map: Option<ContentSourceMap>,
	tx: watch::Sender<Value>,
	/// Carries the entry's generation; parent of every fetch started for it.
	lifetime: GenerationToken,
}

impl Drop for Entry {
	fn drop(&mut self) {
		self.lifetime.cancel();
	}
}

/// Identity of one fetch started for an entry.
#[derive(Debug, Clone)]
pub struct FetchTicket {
	pub seq: u64,
	pub cancel: GenerationToken,
}

impl FetchTicket {
	pub const fn generation(&self) -> u64 {
		self.cancel.generation()
	}
}

impl Entry {
	pub fn query(&self) -> &str {
		&self.query
	}

	pub fn params(&self) -> &Value {
		&self.params
	}

	pub const fn ref_count(&self) -> usize {
		self.ref_count
	}

	pub const fn generation(&self) -> u64 {
		self.lifetime.generation()
	}

	pub fn raw(&self) -> &Value {
		&self.raw
	}

	pub fn source_map(&self) -> Option<&ContentSourceMap> {
		self.source_map.as_ref()
	}

	/// Whether re-projection could change this entry's result.
	pub fn has_source_documents(&self) -> bool {
		self.source_map.as_ref().is_some_and(ContentSourceMap::has_documents)
	}

	pub fn subscribe(&self) -> watch::Receiver<Value> {
		self.tx.subscribe()
	}

	/// Allocates the sequence number and cancellation scope for a new fetch.
	pub fn begin_fetch(&mut self) -> FetchTicket {
		self.next_seq += 1;
		FetchTicket {
			seq: self.next_seq,
			cancel: self.lifetime.child(),
		}
	}

	/// Records a fetch result if it is newer than the last one applied.
	///
	/// Returns `false` for results from an older generation of this key or
	/// overtaken by a later fetch.
	pub fn accept(&mut self, seq: u64, generation: u64, raw: Value, source_map: Option<ContentSourceMap>) -> bool {
		if generation != self.generation() || seq <= self.applied_seq {
			return false;
		}
		self.applied_seq = seq;
		self.raw = raw;
		self.source_map = source_map;
		true
	}

	/// Publishes `value` unless it equals what subscribers already have.
	pub fn publish(&self, value: Value) -> bool {
		self.tx.send_if_modified(|current| {
			if *current == value {
				return false;
			}
			*current = value;
			true
		})
	}
}

/// Outcome of [`Registry::acquire`].
#[derive(Debug)]
pub struct Acquired {
	pub receiver: watch::Receiver<Value>,
	pub generation: u64,
	/// First subscriber: the caller should start a fetch.
	pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
	Remaining(usize),
	Evicted,
	/// No entry for that key and generation.
	Unknown,
}

#[derive(Default)]
pub struct Registry {
	entries: HashMap<QueryKey, Entry>,
	generations: GenerationClock,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds one subscriber to `key`, creating the entry (seeded with
	/// `initial`, or `null`) when it does not exist.
	pub fn acquire(
		&mut self,
		key: QueryKey,
		query: &str,
		params: &Value,
		initial: Option<Value>,
		parent: &CancellationToken,
	) -> Acquired {
		if let Some(entry) = self.entries.get_mut(&key) {
			entry.ref_count += 1;
			return Acquired {
				receiver: entry.subscribe(),
				generation: entry.generation(),
				created: false,
			};
		}

		let seed = initial.unwrap_or(Value::Null);
		let (tx, receiver) = watch::channel(seed.clone());
		let generation = self.generations.next();
		self.entries.insert(
			key,
			Entry {
				query: query.to_owned(),
				params: params.clone(),
				ref_count: 1,
				next_seq: 0,
				applied_seq: 0,
				raw: seed,
				source_map: None,
				tx,
				lifetime: GenerationToken::new(generation, parent.child_token()),
			},
		);
		Acquired {
			receiver,
			generation,
			created: true,
		}
	}

	/// Removes one subscriber; the entry is dropped with its last subscriber.
	pub fn release(&mut self, key: &QueryKey, generation: u64) -> Released {
		let Some(entry) = self.entries.get_mut(key).filter(|entry| entry.generation() == generation) else {
			return Released::Unknown;
		};
		entry.ref_count = entry.ref_count.saturating_sub(1);
		if entry.ref_count > 0 {
			return Released::Remaining(entry.ref_count);
		}
		self.entries.remove(key);
		Released::Evicted
	}

	pub fn get(&self, key: &QueryKey) -> Option<&Entry> {
		self.entries.get(key)
	}

	pub fn get_mut(&mut self, key: &QueryKey) -> Option<&mut Entry> {
		self.entries.get_mut(key)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&QueryKey, &Entry)> {
		self.entries.iter()
	}

	/// Drops every entry; subscribers see their streams end.
	pub fn clear(&mut self) {
		self.entries.clear();
	}
}
