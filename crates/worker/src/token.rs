//! Generations: a monotonically increasing id paired with a cancellation
//! scope.
//!
//! Each incarnation of a cached query entry owns one generation. Evicting the
//! entry cancels its scope, which stops every fetch spawned under it, and a
//! result that arrives stamped with an older generation belongs to an entry
//! that no longer exists and is dropped. Each fetch runs under a child token
//! of the entry's scope, so cancelling one fetch never touches the entry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Hands out generation ids, starting at 1. Clones share the counter, so
/// ids stay unique across everything stamped from one session.
#[derive(Debug, Default, Clone)]
pub struct GenerationClock {
	last: Arc<AtomicU64>,
}

impl GenerationClock {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn next(&self) -> u64 {
		self.last.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}
}

/// Cancellation scope stamped with the generation that owns it.
///
/// Cancelling a token cancels every [`child`](Self::child) derived from it.
#[derive(Debug, Clone)]
pub struct GenerationToken {
	generation: u64,
	scope: CancellationToken,
}

impl GenerationToken {
	pub fn new(generation: u64, scope: CancellationToken) -> Self {
		Self { generation, scope }
	}

	pub const fn generation(&self) -> u64 {
		self.generation
	}

	pub fn is_cancelled(&self) -> bool {
		self.scope.is_cancelled()
	}

	pub fn cancel(&self) {
		self.scope.cancel();
	}

	/// Resolves once this scope or any parent is cancelled.
	pub async fn cancelled(&self) {
		self.scope.cancelled().await;
	}

	/// Nested scope in the same generation.
	pub fn child(&self) -> Self {
		Self {
			generation: self.generation,
			scope: self.scope.child_token(),
		}
	}
}
