//! Invisible stega markers embedded in string leaves.

use std::sync::LazyLock;

use regex::Regex;

/// A marker is any run of at least four zero-width characters.
static STEGA_RUN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new("[\u{200B}\u{200C}\u{200D}\u{FEFF}]{4,}").unwrap_or_else(|err| panic!("stega pattern: {err}"))
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StegaSplit<'a> {
	/// First marker found, or empty.
	pub encoded: &'a str,
	/// Text with every marker removed.
	pub cleaned: String,
}

pub fn split_stega(text: &str) -> StegaSplit<'_> {
	let encoded = STEGA_RUN.find(text).map_or("", |m| m.as_str());
	let cleaned = STEGA_RUN.replace_all(text, "").into_owned();
	StegaSplit { encoded, cleaned }
}

/// Replaces the visible text of `previous` with `changed`, keeping the marker
/// carried by `previous`. Markers inside `changed` are dropped.
pub fn merge_stega(previous: &str, changed: &str) -> String {
	let encoded = split_stega(previous).encoded;
	let cleaned = split_stega(changed).cleaned;
	let mut out = String::with_capacity(encoded.len() + cleaned.len());
	out.push_str(encoded);
	out.push_str(&cleaned);
	out
}
