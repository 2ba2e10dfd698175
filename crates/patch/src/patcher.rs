use serde_json::{Map, Value};

use crate::{Opcode, PatchError, kind_name};

type Result<T> = std::result::Result<T, PatchError>;

#[derive(Clone)]
struct InputEntry {
	value: Value,
	/// Field this entry was pushed from, for `*SameKey` returns.
	key: Option<String>,
	/// Sorted field names, computed on first field access.
	keys: Option<Vec<String>>,
}

impl InputEntry {
	fn new(value: Value, key: Option<String>) -> Self {
		Self { value, key, keys: None }
	}
}

struct OutputEntry {
	value: Value,
	/// Blank entries take the type of their first write.
	blank: bool,
}

pub(crate) struct Patcher<'a> {
	patch: &'a [Value],
	pos: usize,
	input: Vec<InputEntry>,
	output: Vec<OutputEntry>,
}

impl<'a> Patcher<'a> {
	pub(crate) fn new(root: &Value, patch: &'a [Value]) -> Self {
		Self {
			patch,
			pos: 0,
			input: vec![InputEntry::new(root.clone(), None)],
			output: Vec::new(),
		}
	}

	pub(crate) fn run(mut self) -> Result<Value> {
		let patch: &'a [Value] = self.patch;
		while let Some(slot) = patch.get(self.pos) {
			let position = self.pos;
			let op = slot
				.as_u64()
				.and_then(Opcode::from_code)
				.ok_or(PatchError::UnknownOpcode { position })?;
			self.pos += 1;
			self.step(op)?;
		}

		if self.output.len() != 1 {
			return Err(PatchError::UnbalancedOutput {
				count: self.output.len(),
			});
		}
		self.pop_output(Opcode::Pop)
	}

	fn step(&mut self, op: Opcode) -> Result<()> {
		match op {
			Opcode::Value => self.value(op),
			Opcode::Copy => self.copy(op),
			Opcode::Blank => {
				self.push_blank();
				Ok(())
			}
			Opcode::ReturnIntoArray => self.return_into_array(op),
			Opcode::ReturnIntoObject => self.return_into_object(op),
			Opcode::ReturnIntoObjectSameKey => self.return_into_object_same_key(op),

			Opcode::PushField => self.push_field(op),
			Opcode::PushElement => self.push_element(op),
			Opcode::PushParent => self.push_parent(op),
			Opcode::Pop => self.pop_input(op),

			Opcode::PushFieldCopy => {
				self.push_field(op)?;
				self.copy(op)
			}
			Opcode::PushFieldBlank => {
				self.push_field(op)?;
				self.push_blank();
				Ok(())
			}
			Opcode::PushElementCopy => {
				self.push_element(op)?;
				self.copy(op)
			}
			Opcode::PushElementBlank => {
				self.push_element(op)?;
				self.push_blank();
				Ok(())
			}
			Opcode::ReturnIntoObjectPop => {
				self.return_into_object(op)?;
				self.pop_input(op)
			}
			Opcode::ReturnIntoObjectSameKeyPop => {
				self.return_into_object_same_key(op)?;
				self.pop_input(op)
			}
			Opcode::ReturnIntoArrayPop => {
				self.return_into_array(op)?;
				self.pop_input(op)
			}

			Opcode::ObjectSetFieldValue => {
				self.value(op)?;
				self.return_into_object(op)
			}
			Opcode::ObjectCopyField => {
				self.push_field(op)?;
				self.copy(op)?;
				self.return_into_object_same_key(op)?;
				self.pop_input(op)
			}
			Opcode::ObjectDeleteField => {
				let idx = self.read_index(op)?;
				let key = self.input_key(op, idx)?;
				self.output_object(op)?.remove(&key);
				Ok(())
			}

			Opcode::ArrayAppendValue => {
				let value = self.operand(op)?.clone();
				self.output_array(op)?.push(value);
				Ok(())
			}
			Opcode::ArrayAppendSlice => {
				let left = self.read_index(op)?;
				let right = self.read_index(op)?;
				let entry = self.input_top(op)?;
				let Value::Array(items) = &entry.value else {
					return Err(PatchError::InputType {
						op,
						expected: "array",
						found: kind_name(&entry.value),
					});
				};
				let slice = items.get(left..right).ok_or(PatchError::InvalidSlice {
					op,
					left,
					right,
					len: items.len(),
				})?;
				let slice = slice.to_vec();
				self.output_array(op)?.extend(slice);
				Ok(())
			}

			Opcode::StringAppendString => {
				let text = self.read_str(op)?;
				self.output_string(op)?.push_str(text);
				Ok(())
			}
			Opcode::StringAppendSlice => {
				let left = self.read_index(op)?;
				let right = self.read_index(op)?;
				let entry = self.input_top(op)?;
				let Value::String(text) = &entry.value else {
					return Err(PatchError::InputType {
						op,
						expected: "string",
						found: kind_name(&entry.value),
					});
				};
				// Byte offsets; `get` also rejects splits inside a character.
				let piece = text
					.get(left..right)
					.ok_or(PatchError::InvalidSlice {
						op,
						left,
						right,
						len: text.len(),
					})?
					.to_owned();
				self.output_string(op)?.push_str(&piece);
				Ok(())
			}
		}
	}

	fn operand(&mut self, op: Opcode) -> Result<&'a Value> {
		let patch: &'a [Value] = self.patch;
		let value = patch.get(self.pos).ok_or(PatchError::UnexpectedEnd { op })?;
		self.pos += 1;
		Ok(value)
	}

	fn read_index(&mut self, op: Opcode) -> Result<usize> {
		let position = self.pos;
		self.operand(op)?
			.as_u64()
			.and_then(|n| usize::try_from(n).ok())
			.ok_or(PatchError::InvalidOperand {
				op,
				position,
				expected: "an unsigned integer",
			})
	}

	fn read_str(&mut self, op: Opcode) -> Result<&'a str> {
		let position = self.pos;
		self.operand(op)?.as_str().ok_or(PatchError::InvalidOperand {
			op,
			position,
			expected: "a string",
		})
	}

	fn value(&mut self, op: Opcode) -> Result<()> {
		let value = self.operand(op)?.clone();
		self.push_output(value);
		Ok(())
	}

	fn copy(&mut self, op: Opcode) -> Result<()> {
		let value = self.input_top(op)?.value.clone();
		self.push_output(value);
		Ok(())
	}

	fn return_into_array(&mut self, op: Opcode) -> Result<()> {
		let result = self.pop_output(op)?;
		self.output_array(op)?.push(result);
		Ok(())
	}

	fn return_into_object(&mut self, op: Opcode) -> Result<()> {
		let key = self.read_str(op)?.to_owned();
		let result = self.pop_output(op)?;
		self.output_object(op)?.insert(key, result);
		Ok(())
	}

	fn return_into_object_same_key(&mut self, op: Opcode) -> Result<()> {
		let key = self.input_top(op)?.key.clone().ok_or(PatchError::MissingKey { op })?;
		let result = self.pop_output(op)?;
		self.output_object(op)?.insert(key, result);
		Ok(())
	}

	fn push_field(&mut self, op: Opcode) -> Result<()> {
		let idx = self.read_index(op)?;
		let key = self.input_key(op, idx)?;
		let value = self.input_top(op)?.value.get(key.as_str()).cloned().unwrap_or(Value::Null);
		self.input.push(InputEntry::new(value, Some(key)));
		Ok(())
	}

	fn push_element(&mut self, op: Opcode) -> Result<()> {
		let idx = self.read_index(op)?;
		let entry = self.input_top(op)?;
		let Value::Array(items) = &entry.value else {
			return Err(PatchError::InputType {
				op,
				expected: "array",
				found: kind_name(&entry.value),
			});
		};
		let value = items.get(idx).cloned().ok_or(PatchError::IndexOutOfRange {
			op,
			index: idx,
			len: items.len(),
		})?;
		self.input.push(InputEntry::new(value, None));
		Ok(())
	}

	fn push_parent(&mut self, op: Opcode) -> Result<()> {
		let depth = self.read_index(op)?;
		let len = self.input.len();
		let entry = len
			.checked_sub(depth.saturating_add(2))
			.and_then(|at| self.input.get(at))
			.cloned()
			.ok_or(PatchError::IndexOutOfRange { op, index: depth, len })?;
		self.input.push(entry);
		Ok(())
	}

	fn pop_input(&mut self, op: Opcode) -> Result<()> {
		self.input.pop().map(|_| ()).ok_or(PatchError::EmptyInput { op })
	}

	fn input_top(&self, op: Opcode) -> Result<&InputEntry> {
		self.input.last().ok_or(PatchError::EmptyInput { op })
	}

	/// Resolves a field index against the sorted keys of the current input object.
	fn input_key(&mut self, op: Opcode, idx: usize) -> Result<String> {
		let entry = self.input.last_mut().ok_or(PatchError::EmptyInput { op })?;
		let Value::Object(map) = &entry.value else {
			return Err(PatchError::InputType {
				op,
				expected: "object",
				found: kind_name(&entry.value),
			});
		};
		let keys = entry.keys.get_or_insert_with(|| {
			let mut keys: Vec<String> = map.keys().cloned().collect();
			keys.sort();
			keys
		});
		keys.get(idx).cloned().ok_or(PatchError::IndexOutOfRange {
			op,
			index: idx,
			len: keys.len(),
		})
	}

	fn push_output(&mut self, value: Value) {
		self.output.push(OutputEntry { value, blank: false });
	}

	fn push_blank(&mut self) {
		self.output.push(OutputEntry {
			value: Value::Null,
			blank: true,
		});
	}

	fn pop_output(&mut self, op: Opcode) -> Result<Value> {
		self.output.pop().map(|entry| entry.value).ok_or(PatchError::EmptyOutput { op })
	}

	fn output_top(&mut self, op: Opcode, blank: impl FnOnce() -> Value) -> Result<&mut Value> {
		let entry = self.output.last_mut().ok_or(PatchError::EmptyOutput { op })?;
		if entry.blank {
			entry.value = blank();
			entry.blank = false;
		}
		Ok(&mut entry.value)
	}

	fn output_object(&mut self, op: Opcode) -> Result<&mut Map<String, Value>> {
		match self.output_top(op, || Value::Object(Map::new()))? {
			Value::Object(map) => Ok(map),
			other => Err(PatchError::OutputType {
				op,
				expected: "object",
				found: kind_name(other),
			}),
		}
	}

	fn output_array(&mut self, op: Opcode) -> Result<&mut Vec<Value>> {
		match self.output_top(op, || Value::Array(Vec::new()))? {
			Value::Array(items) => Ok(items),
			other => Err(PatchError::OutputType {
				op,
				expected: "array",
				found: kind_name(other),
			}),
		}
	}

	fn output_string(&mut self, op: Opcode) -> Result<&mut String> {
		match self.output_top(op, || Value::String(String::new()))? {
			Value::String(text) => Ok(text),
			other => Err(PatchError::OutputType {
				op,
				expected: "string",
				found: kind_name(other),
			}),
		}
	}
}
