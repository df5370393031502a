//! Abstract categories of evaluation-stack values.
//!
//! The emitter models the target machine's operand stack as a depth counter
//! plus, in checked emission, a parallel stack of [`ValueKind`]s. Kind
//! checking catches malformed emissions (a float fed to a bitwise op, an
//! object where an int32 is required) at the call site that produced them
//! instead of at routine load time.

use strum::IntoStaticStr;

/// The abstract category of a single evaluation-stack value.
///
/// Mirrors the target machine's verification types: integers are tracked at
/// 32-bit, 64-bit, and native width; all floating-point values widen to one
/// `Float` category; object references and managed pointers are distinct.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum ValueKind {
    /// 32-bit integer (also carries booleans and unsigned 32-bit values).
    Int32,
    /// 64-bit integer, signed or unsigned.
    Int64,
    /// Pointer-width integer (array lengths, native handles).
    NativeInt,
    /// Floating-point value; the stack holds all floats at full width.
    Float,
    /// Object reference.
    Object,
    /// Managed pointer (address of a local or argument).
    ManagedPointer,
}

impl ValueKind {
    /// Single-bit mask for this kind, for use in [`KindSet`].
    #[inline]
    const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Human-readable name, used in error messages and disassembly.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// A set of [`ValueKind`]s, stored as a bitmask.
///
/// Used to express which operand kinds an instruction accepts. The mask fits
/// in a byte; set operations are const so the emitter's expected-kind tables
/// can be built at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSet(u8);

impl KindSet {
    /// The empty set. Popping against it always fails; used for operations
    /// that accept no operand of any kind (a codegen bug by construction).
    pub const NONE: Self = Self(0);

    /// All six kinds.
    pub const ANY: Self = Self::NONE
        .with(ValueKind::Int32)
        .with(ValueKind::Int64)
        .with(ValueKind::NativeInt)
        .with(ValueKind::Float)
        .with(ValueKind::Object)
        .with(ValueKind::ManagedPointer);

    /// Kinds valid for arithmetic: every integer width plus float.
    pub const NUMERIC: Self = Self::NONE
        .with(ValueKind::Int32)
        .with(ValueKind::Int64)
        .with(ValueKind::NativeInt)
        .with(ValueKind::Float);

    /// 32-bit integers only, the operand domain of bitwise and shift ops.
    pub const INT32: Self = Self::NONE.with(ValueKind::Int32);

    /// Object references only.
    pub const OBJECT: Self = Self::NONE.with(ValueKind::Object);

    /// Kinds comparable by the equality opcode: numerics and references.
    pub const EQUATABLE: Self = Self::NUMERIC.with(ValueKind::Object);

    /// Singleton set containing `kind`.
    #[must_use]
    pub const fn of(kind: ValueKind) -> Self {
        Self(kind.bit())
    }

    /// This set extended with `kind`.
    #[must_use]
    pub const fn with(self, kind: ValueKind) -> Self {
        Self(self.0 | kind.bit())
    }

    /// Whether `kind` is a member of this set.
    #[must_use]
    pub const fn contains(self, kind: ValueKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for KindSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const ALL: [ValueKind; 6] = [
            ValueKind::Int32,
            ValueKind::Int64,
            ValueKind::NativeInt,
            ValueKind::Float,
            ValueKind::Object,
            ValueKind::ManagedPointer,
        ];
        if self.is_empty() {
            return f.write_str("(none)");
        }
        let mut first = true;
        for kind in ALL {
            if self.contains(kind) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(kind.name())?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Element categories for array instructions.
///
/// Arrays specialize their load/store opcodes by element width, which is a
/// finer distinction than [`ValueKind`]: signed and unsigned 64-bit elements
/// are different categories here even though both occupy an `Int64` stack
/// slot. The loader ABI folds them onto shared opcodes (see
/// [`crate::codegen::Opcode`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 32-bit signed integer element.
    Int32,
    /// 64-bit signed integer element.
    Int64,
    /// 64-bit unsigned integer element. Shares the store opcode with `Int64`
    /// and reuses the signed load opcode; the loader ABI has no unsigned
    /// 64-bit forms.
    UInt64,
    /// Native-width integer element.
    NativeInt,
    /// 64-bit float element.
    Double,
    /// Object-reference element.
    Object,
}

impl ElementType {
    /// The stack kind a loaded element of this type occupies.
    #[must_use]
    pub fn stack_kind(self) -> ValueKind {
        match self {
            Self::Int32 => ValueKind::Int32,
            Self::Int64 | Self::UInt64 => ValueKind::Int64,
            Self::NativeInt => ValueKind::NativeInt,
            Self::Double => ValueKind::Float,
            Self::Object => ValueKind::Object,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_set_membership() {
        assert!(KindSet::NUMERIC.contains(ValueKind::Int32));
        assert!(KindSet::NUMERIC.contains(ValueKind::Float));
        assert!(!KindSet::NUMERIC.contains(ValueKind::Object));
        assert!(!KindSet::NONE.contains(ValueKind::Int32));
        assert!(KindSet::ANY.contains(ValueKind::ManagedPointer));
    }

    #[test]
    fn kind_set_display() {
        assert_eq!(KindSet::INT32.to_string(), "int32");
        assert_eq!(KindSet::of(ValueKind::Object).to_string(), "object");
        assert_eq!(
            KindSet::of(ValueKind::Int32).with(ValueKind::Float).to_string(),
            "int32|float"
        );
        assert_eq!(KindSet::NONE.to_string(), "(none)");
    }

    #[test]
    fn element_stack_kinds() {
        assert_eq!(ElementType::Int64.stack_kind(), ValueKind::Int64);
        assert_eq!(ElementType::UInt64.stack_kind(), ValueKind::Int64);
        assert_eq!(ElementType::Double.stack_kind(), ValueKind::Float);
    }
}
