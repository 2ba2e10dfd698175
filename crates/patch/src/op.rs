/// Mendoza opcodes, in wire order.
///
/// The first group manipulates the output stack, the second the input stack;
/// the rest are fused shorthands and type-specific helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
	Value = 0,
	Copy = 1,
	Blank = 2,
	ReturnIntoArray = 3,
	ReturnIntoObject = 4,
	ReturnIntoObjectSameKey = 5,

	PushField = 6,
	PushElement = 7,
	PushParent = 8,
	Pop = 9,

	PushFieldCopy = 10,
	PushFieldBlank = 11,
	PushElementCopy = 12,
	PushElementBlank = 13,
	ReturnIntoObjectPop = 14,
	ReturnIntoObjectSameKeyPop = 15,
	ReturnIntoArrayPop = 16,

	ObjectSetFieldValue = 17,
	ObjectCopyField = 18,
	ObjectDeleteField = 19,

	ArrayAppendValue = 20,
	ArrayAppendSlice = 21,

	StringAppendString = 22,
	StringAppendSlice = 23,
}

impl Opcode {
	const ALL: [Opcode; 24] = [
		Self::Value,
		Self::Copy,
		Self::Blank,
		Self::ReturnIntoArray,
		Self::ReturnIntoObject,
		Self::ReturnIntoObjectSameKey,
		Self::PushField,
		Self::PushElement,
		Self::PushParent,
		Self::Pop,
		Self::PushFieldCopy,
		Self::PushFieldBlank,
		Self::PushElementCopy,
		Self::PushElementBlank,
		Self::ReturnIntoObjectPop,
		Self::ReturnIntoObjectSameKeyPop,
		Self::ReturnIntoArrayPop,
		Self::ObjectSetFieldValue,
		Self::ObjectCopyField,
		Self::ObjectDeleteField,
		Self::ArrayAppendValue,
		Self::ArrayAppendSlice,
		Self::StringAppendString,
		Self::StringAppendSlice,
	];

	/// Decodes a wire opcode.
	pub fn from_code(code: u64) -> Option<Self> {
		usize::try_from(code).ok().and_then(|idx| Self::ALL.get(idx).copied())
	}

	/// Wire representation of this opcode.
	pub const fn code(self) -> u8 {
		self as u8
	}
}
