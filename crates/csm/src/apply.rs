//! Projecting a query result onto newer copies of its source documents.

use serde_json::Value;

use crate::map::{ContentSourceMap, CsmDocument, Mapping, MappingSource};
use crate::path::{PathSegment, get_at_path, parse_json_path, to_mapping_path};

/// The mapping that covers a result path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedMapping<'m> {
	pub mapping: &'m Mapping,
	/// Mapping key that matched, either the path itself or a prefix of it.
	pub matched_path: &'m str,
	/// Part of the result path below `matched_path`, to be appended to the source path.
	pub path_suffix: &'m str,
}

/// Finds the mapping for `mapping_path`: the exact entry, or else the entry
/// with the longest key that is a prefix of it.
pub fn resolve_mapping<'m>(csm: &'m ContentSourceMap, mapping_path: &'m str) -> Option<ResolvedMapping<'m>> {
	if let Some((matched_path, mapping)) = csm.mappings.get_key_value(mapping_path) {
		return Some(ResolvedMapping {
			mapping,
			matched_path,
			path_suffix: "",
		});
	}

	csm.mappings
		.iter()
		.filter(|(key, _)| mapping_path.starts_with(key.as_str()))
		.max_by_key(|(key, _)| key.len())
		.map(|(matched_path, mapping)| ResolvedMapping {
			mapping,
			matched_path,
			path_suffix: &mapping_path[matched_path.len()..],
		})
}

/// What the update callback learns about a leaf being replaced.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
	/// The leaf as it appears in the result.
	pub previous_value: &'a Value,
	pub source_document: &'a CsmDocument,
	/// Path of the value inside the source document.
	pub source_path: &'a [PathSegment],
}

/// Walks `result` and replaces every leaf that the source map attributes to
/// a document field with `update(current_field_value, context)`.
///
/// `lookup` is asked at most once per source map document; a `None` leaves
/// every leaf from that document untouched, as does a source path that no
/// longer exists in the document. Portable text is walked narrowly: blocks
/// only through `children`, spans only through `text`.
pub fn apply_source_documents<L, U>(result: Value, csm: &ContentSourceMap, lookup: L, update: U) -> Value
where
	L: FnMut(&CsmDocument) -> Option<Value>,
	U: FnMut(Value, SourceContext<'_>) -> Value,
{
	if !csm.has_documents() {
		return result;
	}
	let mut walker = Walker {
		csm,
		documents: vec![None; csm.documents.len()],
		lookup,
		update,
		path: Vec::new(),
	};
	let mut result = result;
	walker.walk(&mut result);
	result
}

struct Walker<'m, L, U> {
	csm: &'m ContentSourceMap,
	/// Lookup results by document index; outer `None` means not asked yet.
	documents: Vec<Option<Option<Value>>>,
	lookup: L,
	update: U,
	path: Vec<PathSegment>,
}

impl<L, U> Walker<'_, L, U>
where
	L: FnMut(&CsmDocument) -> Option<Value>,
	U: FnMut(Value, SourceContext<'_>) -> Value,
{
	fn walk(&mut self, value: &mut Value) {
		match value {
			Value::Array(items) => {
				for (index, item) in items.iter_mut().enumerate() {
					let segment = match item.get("_key").and_then(Value::as_str) {
						Some(key) => PathSegment::Keyed {
							key: key.to_owned(),
							index: Some(index),
						},
						None => PathSegment::Index(index),
					};
					self.descend(segment, item);
				}
			}
			Value::Object(fields) => {
				let portable_text_field = match fields.get("_type").and_then(Value::as_str) {
					Some("block") => Some("children"),
					Some("span") => Some("text"),
					_ => None,
				};
				match portable_text_field {
					Some(name) => {
						if let Some(child) = fields.get_mut(name) {
							self.descend(PathSegment::Key(name.to_owned()), child);
						}
					}
					None => {
						for (name, child) in fields.iter_mut() {
							self.descend(PathSegment::Key(name.clone()), child);
						}
					}
				}
			}
			leaf => self.map_leaf(leaf),
		}
	}

	fn descend(&mut self, segment: PathSegment, value: &mut Value) {
		self.path.push(segment);
		self.walk(value);
		self.path.pop();
	}

	fn map_leaf(&mut self, leaf: &mut Value) {
		let csm = self.csm;
		let Some(mapping_path) = to_mapping_path(&self.path) else {
			return;
		};
		let Some(resolved) = resolve_mapping(csm, &mapping_path) else {
			return;
		};
		let Mapping::Value {
			source: MappingSource::DocumentValue { document, path },
		} = resolved.mapping
		else {
			return;
		};
		let (Some(source_document), Some(source_path)) = (csm.documents.get(*document), csm.paths.get(*path)) else {
			tracing::trace!(document, path, "source map mapping points outside its tables");
			return;
		};

		let full_path = format!("{source_path}{}", resolved.path_suffix);
		let segments = match parse_json_path(&full_path) {
			Ok(segments) => segments,
			Err(error) => {
				tracing::trace!(%error, "unparseable source path");
				return;
			}
		};

		let lookup = &mut self.lookup;
		let cached = self.documents[*document].get_or_insert_with(|| lookup(source_document));
		let Some(changed) = cached.as_ref().and_then(|doc| get_at_path(doc, &segments)).cloned() else {
			return;
		};

		let previous = std::mem::take(leaf);
		*leaf = (self.update)(
			changed,
			SourceContext {
				previous_value: &previous,
				source_document,
				source_path: &segments,
			},
		);
	}
}
