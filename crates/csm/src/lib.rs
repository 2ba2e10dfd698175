//! Content source maps.
//!
//! A query result fetched with a source map carries, next to the result, a
//! description of where every leaf came from: which document and which path
//! inside it. This crate models that map and uses it to project a result
//! against newer copies of its source documents, which is what makes "type as
//! you edit" previews possible without refetching the query.
//!
//! String leaves may carry an invisible stega marker (a run of zero-width
//! characters) used by click-to-edit overlays; [`merge_stega`] keeps that
//! marker when the visible text is replaced.

mod apply;
mod ids;
mod map;
mod path;
mod stega;

pub use apply::{ResolvedMapping, SourceContext, apply_source_documents, resolve_mapping};
pub use ids::{DRAFTS_PREFIX, Perspective, draft_id, is_draft_id, published_id};
pub use map::{ContentSourceMap, CsmDocument, Mapping, MappingSource};
pub use path::{PathError, PathSegment, get_at_path, parse_json_path, to_json_path, to_mapping_path};
pub use stega::{StegaSplit, merge_stega, split_stega};
