//! Mutation feed handling.
//!
//! Mutations only ever patch documents that are already cached: a document
//! the cache has never seen is loaded in full by the loader instead. Patches
//! apply atomically; a malformed patch leaves the cached copy untouched.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use sightline_patch::{PatchError, apply_patch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::client::{ContentClient, MutationEvent};
use crate::store::DocumentStore;

/// Revision marker stripped before patching.
const REVISION_FIELD: &str = "_rev";

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
	Patched,
	/// The document is not cached; nothing to patch.
	NotCached,
	/// The event carries no patch.
	NoEffects,
	Rejected(PatchError),
}

/// Applies the patch carried by `event` to the cached document at `key`.
pub fn apply_mutation(store: &mut DocumentStore, key: &str, event: &MutationEvent) -> PatchOutcome {
	let Some(patch) = event.patch() else {
		return PatchOutcome::NoEffects;
	};
	let Some(cached) = store.peek(key) else {
		return PatchOutcome::NotCached;
	};

	let mut base = cached.clone();
	if let Value::Object(fields) = &mut base {
		fields.remove(REVISION_FIELD);
	}
	match apply_patch(&base, patch) {
		Ok(patched) => {
			store.set(key.to_owned(), patched);
			PatchOutcome::Patched
		}
		Err(error) => PatchOutcome::Rejected(error),
	}
}

/// Pumps the mutation feed into `sink` until the feed ends, `cancel` fires
/// or `sink` refuses an event.
pub async fn forward_mutations<F>(client: Arc<dyn ContentClient>, filter: String, cancel: CancellationToken, mut sink: F)
where
	F: FnMut(MutationEvent) -> bool + Send,
{
	let opened = tokio::select! {
		biased;
		_ = cancel.cancelled() => return,
		opened = client.listen(&filter) => opened,
	};
	let mut feed = match opened {
		Ok(feed) => feed,
		Err(error) => {
			warn!(%error, filter = %filter, "mutation feed failed to open");
			return;
		}
	};
	debug!(filter = %filter, "mutation feed open");

	loop {
		let next = tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			next = feed.next() => next,
		};
		match next {
			Some(Ok(event)) => {
				trace!(document_id = %event.document_id, "mutation received");
				if !sink(event) {
					break;
				}
			}
			Some(Err(error)) => warn!(%error, "mutation feed error"),
			None => {
				debug!("mutation feed ended");
				break;
			}
		}
	}
}
