use serde::{Deserialize, Serialize};

/// Prefix carried by the id of a document's unpublished draft.
pub const DRAFTS_PREFIX: &str = "drafts.";

pub fn is_draft_id(id: &str) -> bool {
	id.starts_with(DRAFTS_PREFIX)
}

pub fn published_id(id: &str) -> &str {
	id.strip_prefix(DRAFTS_PREFIX).unwrap_or(id)
}

pub fn draft_id(id: &str) -> String {
	format!("{DRAFTS_PREFIX}{}", published_id(id))
}

/// Which revision of a document a query reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
	/// Drafts overlaid on published documents.
	#[default]
	PreviewDrafts,
	/// Published documents only.
	Published,
	/// Ids taken verbatim.
	Raw,
}

impl Perspective {
	/// Ids to try, in order, when looking up the cached copy of `id`.
	pub fn lookup_ids(self, id: &str) -> Vec<String> {
		match self {
			Self::PreviewDrafts => vec![draft_id(id), published_id(id).to_owned()],
			Self::Published => vec![published_id(id).to_owned()],
			Self::Raw => vec![id.to_owned()],
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::PreviewDrafts => "previewDrafts",
			Self::Published => "published",
			Self::Raw => "raw",
		}
	}
}
