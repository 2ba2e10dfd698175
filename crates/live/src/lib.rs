//! Live-updating preview queries.
//!
//! A [`LivePreview`] session keeps every subscribed query result fresh:
//!
//! * Results are fetched with source maps. Every document a source map
//!   mentions is cached in full ([`DocumentStore`]), and mutations from the
//!   content lake's listener are patched into those copies as they happen.
//! * Patched documents are projected back into the results that use them,
//!   so edits appear keystroke by keystroke without refetching the query.
//! * A [`RevalidateMachine`] decides when all queries refetch: on focus, on
//!   an interval, after connectivity returns, or on demand.
//!
//! All session state is owned by one actor; subscribers read from `watch`
//! channels and never block it.

mod client;
mod config;
mod error;
mod key;
mod listener;
mod loader;
mod projector;
mod registry;
mod revalidate;
mod session;
mod store;
pub mod testing;

pub use client::{ClientFactory, ContentClient, MutationEffects, MutationEvent, MutationStream, QueryResponse};
pub use config::{ClientConfig, DEFAULT_DOCUMENT_CACHE_CAPACITY, DEFAULT_REQUEST_TAG_PREFIX, PreviewConfig, ResultSourceMapMode};
pub use error::{ClientError, ConfigError, PreviewError, Result};
pub use key::{QueryKey, canonical_json, document_key};
pub use listener::{PatchOutcome, apply_mutation};
pub use loader::TurboIds;
pub use projector::Projector;
pub use revalidate::{RefreshTicket, RevalidateMachine, RevalidateState, Visibility};
pub use session::{DocumentsInUse, EntryInfo, LivePreview, LiveQuery, PreviewEvent};
pub use sightline_csm::Perspective;
pub use store::DocumentStore;
