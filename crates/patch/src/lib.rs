//! Structural patches in the mendoza format.
//!
//! A patch is a flat JSON array of `opcode, operand...` sequences. Applying it
//! runs a small two-stack machine: the *input* stack walks the original
//! document, the *output* stack builds the new one. Whatever single value is
//! left on the output stack when the patch ends is the patched document.
//!
//! Application is all-or-nothing: [`apply_patch`] never mutates its input and
//! either returns the complete new document or a [`PatchError`].

mod op;
mod patcher;

use serde_json::Value;

pub use op::Opcode;

/// Errors raised while decoding or applying a patch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PatchError {
	/// The opcode slot holds something that is not a known opcode.
	#[error("unknown opcode at position {position}")]
	UnknownOpcode { position: usize },
	/// The patch ended in the middle of an operation.
	#[error("patch ended while reading operands for {op:?}")]
	UnexpectedEnd { op: Opcode },
	/// An operand has the wrong JSON type.
	#[error("operand at position {position} for {op:?} must be {expected}")]
	InvalidOperand {
		op: Opcode,
		position: usize,
		expected: &'static str,
	},
	/// The operation needs an input value of a different type.
	#[error("{op:?} expects {expected} input, found {found}")]
	InputType {
		op: Opcode,
		expected: &'static str,
		found: &'static str,
	},
	/// The operation needs an output value of a different type.
	#[error("{op:?} expects {expected} output, found {found}")]
	OutputType {
		op: Opcode,
		expected: &'static str,
		found: &'static str,
	},
	/// A field or element index does not exist in the input.
	#[error("{op:?} index {index} out of range (len {len})")]
	IndexOutOfRange { op: Opcode, index: usize, len: usize },
	/// A slice is out of bounds or splits a UTF-8 character.
	#[error("{op:?} slice {left}..{right} invalid for length {len}")]
	InvalidSlice {
		op: Opcode,
		left: usize,
		right: usize,
		len: usize,
	},
	/// The input stack was popped or read while empty.
	#[error("{op:?} with empty input stack")]
	EmptyInput { op: Opcode },
	/// The output stack was popped or written while empty.
	#[error("{op:?} with empty output stack")]
	EmptyOutput { op: Opcode },
	/// The current input entry was not reached through a field.
	#[error("{op:?} needs a field key on the input stack")]
	MissingKey { op: Opcode },
	/// The patch did not leave exactly one value on the output stack.
	#[error("patch left {count} values on the output stack")]
	UnbalancedOutput { count: usize },
}

/// Applies `patch` to `root`, returning the patched document.
///
/// An empty patch returns `root` unchanged.
pub fn apply_patch(root: &Value, patch: &[Value]) -> Result<Value, PatchError> {
	if patch.is_empty() {
		return Ok(root.clone());
	}
	patcher::Patcher::new(root, patch).run()
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "bool",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}

#[cfg(test)]
mod tests;
