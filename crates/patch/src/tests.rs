use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{Value, json};

use super::*;

fn post() -> Value {
	// Sorted field order: _id, _type, body, tags, title.
	json!({
		"_id": "post-1",
		"_type": "post",
		"body": "Hello world",
		"tags": ["a", "b"],
		"title": "Hello",
	})
}

fn patch(ops: Value) -> Vec<Value> {
	match ops {
		Value::Array(ops) => ops,
		other => panic!("patch fixture must be an array, got {other}"),
	}
}

#[test]
fn set_field_on_copied_root() {
	let doc = post();
	let out = apply_patch(&doc, &patch(json!([1, 17, "Hi", "title"]))).unwrap();

	let mut expected = post();
	expected["title"] = json!("Hi");
	assert_eq!(out, expected);
	assert_eq!(doc, post(), "input must not be mutated");
}

#[test]
fn delete_field_by_sorted_index() {
	let out = apply_patch(&post(), &patch(json!([1, 19, 3]))).unwrap();
	assert_eq!(
		out,
		json!({"_id": "post-1", "_type": "post", "body": "Hello world", "title": "Hello"})
	);
}

#[test]
fn blank_root_is_rebuilt_from_copied_fields() {
	let out = apply_patch(&post(), &patch(json!([2, 18, 0, 18, 1, 17, "New", "title"]))).unwrap();
	assert_eq!(out, json!({"_id": "post-1", "_type": "post", "title": "New"}));
}

#[test]
fn string_slices_splice_new_text() {
	let ops = json!([1, 11, 2, 23, 0, 6, 22, "brave ", 23, 6, 11, 15]);
	let out = apply_patch(&post(), &patch(ops)).unwrap();
	assert_eq!(out["body"], json!("Hello brave world"));
	assert_eq!(out["title"], json!("Hello"));
}

#[test]
fn array_slices_splice_new_element() {
	let ops = json!([1, 11, 3, 21, 0, 1, 20, "x", 21, 1, 2, 15]);
	let out = apply_patch(&post(), &patch(ops)).unwrap();
	assert_eq!(out["tags"], json!(["a", "x", "b"]));
}

#[test]
fn push_parent_reads_sibling_of_current_field() {
	let doc = json!({"a": {"b": "x"}, "c": "y"});
	let ops = json!([1, 10, 0, 8, 0, 6, 1, 1, 4, "c", 9, 9, 15]);
	let out = apply_patch(&doc, &patch(ops)).unwrap();
	assert_eq!(out, json!({"a": {"b": "x", "c": "y"}, "c": "y"}));
}

#[test]
fn value_replaces_whole_document() {
	let out = apply_patch(&post(), &patch(json!([0, {"_id": "post-1", "title": "Reset"}]))).unwrap();
	assert_eq!(out, json!({"_id": "post-1", "title": "Reset"}));
}

#[test]
fn empty_patch_is_identity() {
	assert_eq!(apply_patch(&post(), &[]).unwrap(), post());
}

#[rstest]
#[case::unknown_opcode(json!([99]), PatchError::UnknownOpcode { position: 0 })]
#[case::non_numeric_opcode(json!([1, "x"]), PatchError::UnknownOpcode { position: 1 })]
#[case::truncated_operands(json!([1, 17, "Hi"]), PatchError::UnexpectedEnd { op: Opcode::ObjectSetFieldValue })]
#[case::field_out_of_range(json!([1, 6, 42]), PatchError::IndexOutOfRange { op: Opcode::PushField, index: 42, len: 5 })]
#[case::element_on_object(json!([1, 7, 0]), PatchError::InputType { op: Opcode::PushElement, expected: "array", found: "object" })]
#[case::return_without_output(json!([3]), PatchError::EmptyOutput { op: Opcode::ReturnIntoArray })]
#[case::two_outputs(json!([1, 1]), PatchError::UnbalancedOutput { count: 2 })]
#[case::key_must_be_string(json!([1, 17, "Hi", 3]), PatchError::InvalidOperand { op: Opcode::ObjectSetFieldValue, position: 3, expected: "a string" })]
fn malformed_patches_are_rejected(#[case] ops: Value, #[case] expected: PatchError) {
	assert_eq!(apply_patch(&post(), &patch(ops)), Err(expected));
}

#[test]
fn string_slice_inside_character_is_rejected() {
	let doc = json!({"t": "é"});
	let err = apply_patch(&doc, &patch(json!([1, 11, 0, 23, 0, 1, 15]))).unwrap_err();
	assert_eq!(
		err,
		PatchError::InvalidSlice {
			op: Opcode::StringAppendSlice,
			left: 0,
			right: 1,
			len: 2,
		}
	);
}
