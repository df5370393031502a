//! The stack machine's instruction set.
//!
//! One-byte primary opcodes occupy 0x00–0xDE; less common operations live
//! behind the 0xFE prefix as two-byte extended opcodes. Discriminants are the
//! loader ABI and must not be renumbered. Integer operands are little-endian;
//! branch operands are signed offsets relative to the next instruction.
//!
//! Short-form branches (1-byte offsets) are decoded but never emitted: the
//! emitter stays single-pass and always writes 4-byte branch operands.

use strum::{FromRepr, IntoStaticStr};

/// Marker byte introducing a two-byte extended opcode.
pub const EXTENDED_PREFIX: u8 = 0xFE;

/// Primary (one-byte) opcodes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    Nop = 0x00,
    /// Signal an attached debugger.
    #[strum(serialize = "break")]
    Break = 0x01,
    #[strum(serialize = "ldarg.0")]
    Ldarg0 = 0x02,
    #[strum(serialize = "ldarg.1")]
    Ldarg1 = 0x03,
    #[strum(serialize = "ldarg.2")]
    Ldarg2 = 0x04,
    #[strum(serialize = "ldarg.3")]
    Ldarg3 = 0x05,
    #[strum(serialize = "ldloc.0")]
    Ldloc0 = 0x06,
    #[strum(serialize = "ldloc.1")]
    Ldloc1 = 0x07,
    #[strum(serialize = "ldloc.2")]
    Ldloc2 = 0x08,
    #[strum(serialize = "ldloc.3")]
    Ldloc3 = 0x09,
    #[strum(serialize = "stloc.0")]
    Stloc0 = 0x0A,
    #[strum(serialize = "stloc.1")]
    Stloc1 = 0x0B,
    #[strum(serialize = "stloc.2")]
    Stloc2 = 0x0C,
    #[strum(serialize = "stloc.3")]
    Stloc3 = 0x0D,
    #[strum(serialize = "ldarg.s")]
    LdargS = 0x0E,
    #[strum(serialize = "ldarga.s")]
    LdargaS = 0x0F,
    #[strum(serialize = "starg.s")]
    StargS = 0x10,
    #[strum(serialize = "ldloc.s")]
    LdlocS = 0x11,
    #[strum(serialize = "ldloca.s")]
    LdlocaS = 0x12,
    #[strum(serialize = "stloc.s")]
    StlocS = 0x13,
    Ldnull = 0x14,
    #[strum(serialize = "ldc.i4.m1")]
    LdcI4M1 = 0x15,
    #[strum(serialize = "ldc.i4.0")]
    LdcI40 = 0x16,
    #[strum(serialize = "ldc.i4.1")]
    LdcI41 = 0x17,
    #[strum(serialize = "ldc.i4.2")]
    LdcI42 = 0x18,
    #[strum(serialize = "ldc.i4.3")]
    LdcI43 = 0x19,
    #[strum(serialize = "ldc.i4.4")]
    LdcI44 = 0x1A,
    #[strum(serialize = "ldc.i4.5")]
    LdcI45 = 0x1B,
    #[strum(serialize = "ldc.i4.6")]
    LdcI46 = 0x1C,
    #[strum(serialize = "ldc.i4.7")]
    LdcI47 = 0x1D,
    #[strum(serialize = "ldc.i4.8")]
    LdcI48 = 0x1E,
    #[strum(serialize = "ldc.i4.s")]
    LdcI4S = 0x1F,
    #[strum(serialize = "ldc.i4")]
    LdcI4 = 0x20,
    #[strum(serialize = "ldc.i8")]
    LdcI8 = 0x21,
    #[strum(serialize = "ldc.r4")]
    LdcR4 = 0x22,
    #[strum(serialize = "ldc.r8")]
    LdcR8 = 0x23,
    Dup = 0x25,
    Pop = 0x26,
    Call = 0x28,
    Ret = 0x2A,
    #[strum(serialize = "br.s")]
    BrS = 0x2B,
    #[strum(serialize = "brfalse.s")]
    BrfalseS = 0x2C,
    #[strum(serialize = "brtrue.s")]
    BrtrueS = 0x2D,
    #[strum(serialize = "beq.s")]
    BeqS = 0x2E,
    #[strum(serialize = "bge.s")]
    BgeS = 0x2F,
    #[strum(serialize = "bgt.s")]
    BgtS = 0x30,
    #[strum(serialize = "ble.s")]
    BleS = 0x31,
    #[strum(serialize = "blt.s")]
    BltS = 0x32,
    #[strum(serialize = "bne.un.s")]
    BneUnS = 0x33,
    #[strum(serialize = "bge.un.s")]
    BgeUnS = 0x34,
    #[strum(serialize = "bgt.un.s")]
    BgtUnS = 0x35,
    #[strum(serialize = "ble.un.s")]
    BleUnS = 0x36,
    #[strum(serialize = "blt.un.s")]
    BltUnS = 0x37,
    Br = 0x38,
    Brfalse = 0x39,
    Brtrue = 0x3A,
    Beq = 0x3B,
    Bge = 0x3C,
    Bgt = 0x3D,
    Ble = 0x3E,
    Blt = 0x3F,
    #[strum(serialize = "bne.un")]
    BneUn = 0x40,
    #[strum(serialize = "bge.un")]
    BgeUn = 0x41,
    #[strum(serialize = "bgt.un")]
    BgtUn = 0x42,
    #[strum(serialize = "ble.un")]
    BleUn = 0x43,
    #[strum(serialize = "blt.un")]
    BltUn = 0x44,
    Switch = 0x45,
    Add = 0x58,
    Sub = 0x59,
    Mul = 0x5A,
    Div = 0x5B,
    #[strum(serialize = "div.un")]
    DivUn = 0x5C,
    Rem = 0x5D,
    #[strum(serialize = "rem.un")]
    RemUn = 0x5E,
    And = 0x5F,
    Or = 0x60,
    Xor = 0x61,
    Shl = 0x62,
    Shr = 0x63,
    #[strum(serialize = "shr.un")]
    ShrUn = 0x64,
    Neg = 0x65,
    Not = 0x66,
    #[strum(serialize = "conv.i4")]
    ConvI4 = 0x69,
    #[strum(serialize = "conv.i8")]
    ConvI8 = 0x6A,
    #[strum(serialize = "conv.r8")]
    ConvR8 = 0x6C,
    #[strum(serialize = "conv.u4")]
    ConvU4 = 0x6D,
    Callvirt = 0x6F,
    Ldstr = 0x72,
    Newobj = 0x73,
    Castclass = 0x74,
    Isinst = 0x75,
    Throw = 0x7A,
    Ldfld = 0x7B,
    Stfld = 0x7D,
    Ldsfld = 0x7E,
    Stsfld = 0x80,
    #[strum(serialize = "box")]
    BoxValue = 0x8C,
    Newarr = 0x8D,
    Ldlen = 0x8E,
    #[strum(serialize = "ldelem.i4")]
    LdelemI4 = 0x94,
    /// Shared by signed and unsigned 64-bit element loads; the ABI has no
    /// unsigned form.
    #[strum(serialize = "ldelem.i8")]
    LdelemI8 = 0x96,
    #[strum(serialize = "ldelem.i")]
    LdelemI = 0x97,
    #[strum(serialize = "ldelem.r8")]
    LdelemR8 = 0x99,
    #[strum(serialize = "ldelem.ref")]
    LdelemRef = 0x9A,
    #[strum(serialize = "stelem.i")]
    StelemI = 0x9B,
    #[strum(serialize = "stelem.i4")]
    StelemI4 = 0x9E,
    /// Shared by signed and unsigned 64-bit element stores.
    #[strum(serialize = "stelem.i8")]
    StelemI8 = 0x9F,
    #[strum(serialize = "stelem.r8")]
    StelemR8 = 0xA1,
    #[strum(serialize = "stelem.ref")]
    StelemRef = 0xA2,
    Endfinally = 0xDC,
    Leave = 0xDD,
    #[strum(serialize = "leave.s")]
    LeaveS = 0xDE,
}

/// Extended opcodes, encoded as `0xFE <byte>`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ExtOpcode {
    Ceq = 0x01,
    Cgt = 0x02,
    #[strum(serialize = "cgt.un")]
    CgtUn = 0x03,
    Clt = 0x04,
    #[strum(serialize = "clt.un")]
    CltUn = 0x05,
    Ldarg = 0x09,
    Ldarga = 0x0A,
    Starg = 0x0B,
    Ldloc = 0x0C,
    Ldloca = 0x0D,
    Stloc = 0x0E,
    Endfilter = 0x11,
    Rethrow = 0x1A,
}

/// Either a primary or an extended opcode.
///
/// Used where the two spaces flow through one channel: tracing hooks and
/// decoded instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnyOpcode {
    Primary(Opcode),
    Extended(ExtOpcode),
}

impl AnyOpcode {
    /// The instruction's mnemonic as it appears in disassembly.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Primary(op) => op.mnemonic(),
            Self::Extended(op) => op.mnemonic(),
        }
    }

    /// The inline operand this opcode carries.
    #[must_use]
    pub fn operand_width(self) -> OperandWidth {
        match self {
            Self::Primary(op) => op.operand_width(),
            Self::Extended(op) => op.operand_width(),
        }
    }
}

impl From<Opcode> for AnyOpcode {
    fn from(op: Opcode) -> Self {
        Self::Primary(op)
    }
}

impl From<ExtOpcode> for AnyOpcode {
    fn from(op: ExtOpcode) -> Self {
        Self::Extended(op)
    }
}

/// Width and interpretation of an instruction's inline operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandWidth {
    /// No inline operand.
    None,
    /// One signed byte (`ldc.i4.s`).
    Int8,
    /// One unsigned byte (short local/argument indices).
    UInt8,
    /// Two unsigned bytes (extended local/argument indices).
    UInt16,
    /// Four signed bytes (`ldc.i4`).
    Int32,
    /// Eight signed bytes (`ldc.i8`).
    Int64,
    /// Four bytes, IEEE-754 single (`ldc.r4`).
    Float32,
    /// Eight bytes, IEEE-754 double stored as a little-endian integer.
    Float64,
    /// Four bytes, an opaque loader token.
    Token,
    /// One signed byte, branch offset relative to the next instruction.
    BranchTarget8,
    /// Four signed bytes, branch offset relative to the next instruction.
    BranchTarget32,
    /// Four-byte count followed by that many 4-byte relative offsets.
    SwitchTable,
}

impl Opcode {
    /// The instruction's mnemonic as it appears in disassembly.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// The inline operand this opcode carries.
    #[must_use]
    pub fn operand_width(self) -> OperandWidth {
        match self {
            Self::LdargS | Self::LdargaS | Self::StargS | Self::LdlocS | Self::LdlocaS | Self::StlocS => {
                OperandWidth::UInt8
            }
            Self::LdcI4S => OperandWidth::Int8,
            Self::LdcI4 => OperandWidth::Int32,
            Self::LdcI8 => OperandWidth::Int64,
            Self::LdcR4 => OperandWidth::Float32,
            Self::LdcR8 => OperandWidth::Float64,
            Self::Call
            | Self::Callvirt
            | Self::Ldstr
            | Self::Newobj
            | Self::Castclass
            | Self::Isinst
            | Self::Ldfld
            | Self::Stfld
            | Self::Ldsfld
            | Self::Stsfld
            | Self::BoxValue
            | Self::Newarr => OperandWidth::Token,
            Self::BrS
            | Self::BrfalseS
            | Self::BrtrueS
            | Self::BeqS
            | Self::BgeS
            | Self::BgtS
            | Self::BleS
            | Self::BltS
            | Self::BneUnS
            | Self::BgeUnS
            | Self::BgtUnS
            | Self::BleUnS
            | Self::BltUnS
            | Self::LeaveS => OperandWidth::BranchTarget8,
            Self::Br
            | Self::Brfalse
            | Self::Brtrue
            | Self::Beq
            | Self::Bge
            | Self::Bgt
            | Self::Ble
            | Self::Blt
            | Self::BneUn
            | Self::BgeUn
            | Self::BgtUn
            | Self::BleUn
            | Self::BltUn
            | Self::Leave => OperandWidth::BranchTarget32,
            Self::Switch => OperandWidth::SwitchTable,
            _ => OperandWidth::None,
        }
    }
}

impl ExtOpcode {
    /// The instruction's mnemonic as it appears in disassembly.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// The inline operand this opcode carries.
    #[must_use]
    pub fn operand_width(self) -> OperandWidth {
        match self {
            Self::Ldarg | Self::Ldarga | Self::Starg | Self::Ldloc | Self::Ldloca | Self::Stloc => OperandWidth::UInt16,
            _ => OperandWidth::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_are_the_abi() {
        assert_eq!(Opcode::Nop as u8, 0x00);
        assert_eq!(Opcode::LdcI41 as u8, 0x17);
        assert_eq!(Opcode::Add as u8, 0x58);
        assert_eq!(Opcode::Br as u8, 0x38);
        assert_eq!(Opcode::Switch as u8, 0x45);
        assert_eq!(Opcode::BoxValue as u8, 0x8C);
        assert_eq!(Opcode::StelemI8 as u8, 0x9F);
        assert_eq!(Opcode::LdelemI8 as u8, 0x96);
        assert_eq!(Opcode::Leave as u8, 0xDD);
        assert_eq!(ExtOpcode::Ceq as u8, 0x01);
        assert_eq!(ExtOpcode::Endfilter as u8, 0x11);
    }

    #[test]
    fn repr_round_trip() {
        for byte in 0u8..=0xDE {
            if let Some(op) = Opcode::from_repr(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(Opcode::from_repr(0x24), None);
        assert_eq!(Opcode::from_repr(0xFE), None);
    }

    #[test]
    fn mnemonics() {
        assert_eq!(Opcode::LdcI4S.mnemonic(), "ldc.i4.s");
        assert_eq!(Opcode::BneUn.mnemonic(), "bne.un");
        assert_eq!(Opcode::BoxValue.mnemonic(), "box");
        assert_eq!(Opcode::Ldnull.mnemonic(), "ldnull");
        assert_eq!(ExtOpcode::CltUn.mnemonic(), "clt.un");
    }

    #[test]
    fn operand_widths() {
        assert_eq!(Opcode::Nop.operand_width(), OperandWidth::None);
        assert_eq!(Opcode::LdcI4.operand_width(), OperandWidth::Int32);
        assert_eq!(Opcode::LdcR8.operand_width(), OperandWidth::Float64);
        assert_eq!(Opcode::Br.operand_width(), OperandWidth::BranchTarget32);
        assert_eq!(Opcode::BrS.operand_width(), OperandWidth::BranchTarget8);
        assert_eq!(Opcode::Call.operand_width(), OperandWidth::Token);
        assert_eq!(ExtOpcode::Ldloc.operand_width(), OperandWidth::UInt16);
        assert_eq!(ExtOpcode::Rethrow.operand_width(), OperandWidth::None);
    }
}
