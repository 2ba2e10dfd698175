//! Cache keys.
//!
//! Query keys canonicalize their parameters: object keys are sorted at every
//! depth, so `{a, b}` and `{b, a}` share one registry entry.

use std::fmt;

use serde_json::Value;

/// Registry key for one `(query, params)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
	pub fn new(query: &str, params: &Value) -> Self {
		let mut key = String::with_capacity(query.len() + 16);
		key.push_str(query);
		key.push('-');
		write_canonical(params, &mut key);
		Self(key)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for QueryKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Document cache key, scoped to one project and dataset.
pub fn document_key(project_id: &str, dataset: &str, id: &str) -> String {
	format!("{project_id}-{dataset}-{id}")
}

/// Compact JSON with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
	let mut out = String::new();
	write_canonical(value, &mut out);
	out
}

fn write_canonical(value: &Value, out: &mut String) {
	match value {
		Value::Object(map) => {
			let mut entries: Vec<_> = map.iter().collect();
			entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
			out.push('{');
			for (idx, (key, child)) in entries.into_iter().enumerate() {
				if idx > 0 {
					out.push(',');
				}
				out.push_str(&Value::String(key.clone()).to_string());
				out.push(':');
				write_canonical(child, out);
			}
			out.push('}');
		}
		Value::Array(items) => {
			out.push('[');
			for (idx, item) in items.iter().enumerate() {
				if idx > 0 {
					out.push(',');
				}
				write_canonical(item, out);
			}
			out.push(']');
		}
		scalar => out.push_str(&scalar.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;
	use serde_json::{Map, json};

	use super::*;

	#[test]
	fn key_order_does_not_matter() {
		let a = json!({"slug": "hello", "filter": {"lang": "en", "limit": 3}});
		let b: Value = serde_json::from_str(r#"{"filter": {"limit": 3, "lang": "en"}, "slug": "hello"}"#).unwrap();
		assert_eq!(QueryKey::new("*[slug == $slug]", &a), QueryKey::new("*[slug == $slug]", &b));
		assert_eq!(canonical_json(&a), r#"{"filter":{"lang":"en","limit":3},"slug":"hello"}"#);
	}

	#[test]
	fn array_order_and_query_text_do_matter() {
		let params = json!({"ids": [1, 2]});
		assert_ne!(QueryKey::new("q", &params), QueryKey::new("q", &json!({"ids": [2, 1]})));
		assert_ne!(QueryKey::new("q", &params), QueryKey::new("q2", &params));
	}

	#[test]
	fn document_key_is_scoped() {
		assert_eq!(document_key("p1", "production", "post-1"), "p1-production-post-1");
	}

	fn arb_json() -> impl Strategy<Value = Value> {
		let leaf = prop_oneof![
			Just(Value::Null),
			any::<bool>().prop_map(Value::from),
			any::<i64>().prop_map(Value::from),
			"[a-z\"\\\\]{0,6}".prop_map(Value::from),
		];
		leaf.prop_recursive(3, 24, 4, |inner| {
			prop_oneof![
				prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
				prop::collection::vec(("[a-e]{1,2}", inner), 0..4)
					.prop_map(|fields| Value::Object(fields.into_iter().collect::<Map<_, _>>())),
			]
		})
	}

	/// Rebuilds every object with its fields inserted in reverse order.
	fn reversed(value: &Value) -> Value {
		match value {
			Value::Object(map) => {
				let mut fields: Vec<_> = map.iter().collect();
				fields.reverse();
				Value::Object(fields.into_iter().map(|(k, v)| (k.clone(), reversed(v))).collect())
			}
			Value::Array(items) => Value::Array(items.iter().map(reversed).collect()),
			other => other.clone(),
		}
	}

	proptest! {
		#[test]
		fn equal_params_share_a_key(params in arb_json()) {
			prop_assert_eq!(QueryKey::new("q", &params), QueryKey::new("q", &reversed(&params)));
		}

		#[test]
		fn canonical_json_parses_back_to_the_same_value(params in arb_json()) {
			let parsed: Value = serde_json::from_str(&canonical_json(&params)).unwrap();
			prop_assert_eq!(parsed, params);
		}
	}
}
