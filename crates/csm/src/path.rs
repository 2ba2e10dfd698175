//! JSON paths as used by source maps.
//!
//! Grammar: `$` followed by any number of `['field']`, `[index]` or
//! `[?(@._key=='key')]` segments. Inside quotes `\'` and `\\` are escapes.

use std::fmt::Write as _;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
	Key(String),
	Index(usize),
	/// Array element addressed by its `_key`; `index` is its position when known.
	Keyed { key: String, index: Option<usize> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
	#[error("json path must start with '$': {0}")]
	MissingRoot(String),
	#[error("malformed json path segment at byte {offset} in {path}")]
	Malformed { path: String, offset: usize },
}

const KEYED_OPEN: &str = "[?(@._key=='";
const KEYED_CLOSE: &str = "')]";

pub fn parse_json_path(path: &str) -> Result<Vec<PathSegment>, PathError> {
	let rest = path.strip_prefix('$').ok_or_else(|| PathError::MissingRoot(path.to_owned()))?;
	let malformed = |rest: &str| PathError::Malformed {
		path: path.to_owned(),
		offset: path.len() - rest.len(),
	};

	let mut segments = Vec::new();
	let mut rest = rest;
	while !rest.is_empty() {
		if let Some(after) = rest.strip_prefix(KEYED_OPEN) {
			let (key, after) = read_quoted(after).ok_or_else(|| malformed(rest))?;
			rest = after.strip_prefix(&KEYED_CLOSE[1..]).ok_or_else(|| malformed(rest))?;
			segments.push(PathSegment::Keyed { key, index: None });
		} else if let Some(after) = rest.strip_prefix("['") {
			let (key, after) = read_quoted(after).ok_or_else(|| malformed(rest))?;
			rest = after.strip_prefix(']').ok_or_else(|| malformed(rest))?;
			segments.push(PathSegment::Key(key));
		} else if let Some(after) = rest.strip_prefix('[') {
			let end = after.find(']').ok_or_else(|| malformed(rest))?;
			let index = after[..end].parse::<usize>().map_err(|_| malformed(rest))?;
			rest = &after[end + 1..];
			segments.push(PathSegment::Index(index));
		} else {
			return Err(malformed(rest));
		}
	}
	Ok(segments)
}

/// Reads up to the closing unescaped `'`, returning the unescaped text and
/// the remainder after the quote.
fn read_quoted(input: &str) -> Option<(String, &str)> {
	let mut out = String::new();
	let mut chars = input.char_indices();
	while let Some((idx, ch)) = chars.next() {
		match ch {
			'\\' => {
				let (_, escaped) = chars.next()?;
				out.push(escaped);
			}
			'\'' => return Some((out, &input[idx + 1..])),
			other => out.push(other),
		}
	}
	None
}

fn push_quoted(out: &mut String, key: &str) {
	for ch in key.chars() {
		if matches!(ch, '\'' | '\\') {
			out.push('\\');
		}
		out.push(ch);
	}
}

/// Renders segments back to a JSON path; keyed segments keep their key.
pub fn to_json_path(segments: &[PathSegment]) -> String {
	let mut out = String::from("$");
	for segment in segments {
		match segment {
			PathSegment::Key(key) => {
				out.push_str("['");
				push_quoted(&mut out, key);
				out.push_str("']");
			}
			PathSegment::Index(index) => {
				let _ = write!(out, "[{index}]");
			}
			PathSegment::Keyed { key, .. } => {
				out.push_str(KEYED_OPEN);
				push_quoted(&mut out, key);
				out.push_str(KEYED_CLOSE);
			}
		}
	}
	out
}

/// Renders segments in the form used as source map mapping keys: keyed
/// segments collapse to their position.
///
/// Returns `None` when a keyed segment has no known position.
pub fn to_mapping_path(segments: &[PathSegment]) -> Option<String> {
	let positional: Option<Vec<PathSegment>> = segments
		.iter()
		.map(|segment| match segment {
			PathSegment::Keyed { index, .. } => index.map(PathSegment::Index),
			other => Some(other.clone()),
		})
		.collect();
	positional.map(|segments| to_json_path(&segments))
}

/// Resolves `segments` inside `value`.
pub fn get_at_path<'v>(value: &'v Value, segments: &[PathSegment]) -> Option<&'v Value> {
	segments.iter().try_fold(value, |current, segment| match segment {
		PathSegment::Key(key) => current.as_object()?.get(key),
		PathSegment::Index(index) => current.as_array()?.get(*index),
		PathSegment::Keyed { key, .. } => current
			.as_array()?
			.iter()
			.find(|item| item.get("_key").and_then(Value::as_str) == Some(key.as_str())),
	})
}
