//! Reference decoder for the emitted byte stream.
//!
//! Walks a finished routine's bytes back into `(offset, opcode, operand)`
//! rows. The decoder understands everything the emitter can produce plus the
//! short branch forms the ABI defines; round-trip tests lean on it, and the
//! rendered listing is the debugging view of a compiled routine.

use std::fmt;

use crate::{intern::Interner, tokens::TokenTable};

use super::opcode::{AnyOpcode, EXTENDED_PREFIX, ExtOpcode, Opcode, OperandWidth};

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset of the opcode.
    pub offset: u32,
    pub opcode: AnyOpcode,
    pub operand: Operand,
}

/// A decoded inline operand. Branch targets are converted to absolute byte
/// offsets.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int8(i8),
    UInt8(u8),
    UInt16(u16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Token(u32),
    /// Absolute byte offset of a branch target.
    Target(u32),
    /// Absolute byte offsets of a switch table's targets.
    Table(Vec<u32>),
}

/// A malformed byte stream handed to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisasmError {
    /// A byte that is not a known primary opcode.
    UnknownOpcode { offset: u32, byte: u8 },
    /// An extended-prefix byte followed by an unknown second byte.
    UnknownExtended { offset: u32, byte: u8 },
    /// The stream ended in the middle of an instruction.
    Truncated { offset: u32 },
}

impl fmt::Display for DisasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode { offset, byte } => {
                write!(f, "unknown opcode {byte:#04x} at offset {offset:#06x}")
            }
            Self::UnknownExtended { offset, byte } => {
                write!(f, "unknown extended opcode 0xfe {byte:#04x} at offset {offset:#06x}")
            }
            Self::Truncated { offset } => {
                write!(f, "instruction truncated at offset {offset:#06x}")
            }
        }
    }
}

impl std::error::Error for DisasmError {}

struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, count: usize) -> Result<&'a [u8], DisasmError> {
        let start = self.position;
        let end = start.checked_add(count).ok_or(DisasmError::Truncated {
            offset: start as u32,
        })?;
        if end > self.bytes.len() {
            return Err(DisasmError::Truncated { offset: start as u32 });
        }
        self.position = end;
        Ok(&self.bytes[start..end])
    }

    fn u8(&mut self) -> Result<u8, DisasmError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DisasmError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("2 bytes")))
    }

    fn u32(&mut self) -> Result<u32, DisasmError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> Result<u64, DisasmError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }
}

fn absolute_target(next: usize, displacement: i64) -> u32 {
    let target = next as i64 + displacement;
    u32::try_from(target).unwrap_or(0)
}

/// Decodes a routine's byte stream into instruction rows.
pub fn disassemble(bytes: &[u8]) -> Result<Vec<Instruction>, DisasmError> {
    let mut cursor = Cursor { bytes, position: 0 };
    let mut instructions = Vec::new();
    while cursor.position < bytes.len() {
        let offset = cursor.position as u32;
        let first = cursor.u8()?;
        let opcode: AnyOpcode = if first == EXTENDED_PREFIX {
            let second = cursor.u8()?;
            ExtOpcode::from_repr(second)
                .ok_or(DisasmError::UnknownExtended { offset, byte: second })?
                .into()
        } else {
            Opcode::from_repr(first)
                .ok_or(DisasmError::UnknownOpcode { offset, byte: first })?
                .into()
        };
        let operand = match opcode.operand_width() {
            OperandWidth::None => Operand::None,
            OperandWidth::Int8 => Operand::Int8(cursor.u8()? as i8),
            OperandWidth::UInt8 => Operand::UInt8(cursor.u8()?),
            OperandWidth::UInt16 => Operand::UInt16(cursor.u16()?),
            OperandWidth::Int32 => Operand::Int32(cursor.u32()? as i32),
            OperandWidth::Int64 => Operand::Int64(cursor.u64()? as i64),
            OperandWidth::Float32 => Operand::Float32(f32::from_bits(cursor.u32()?)),
            OperandWidth::Float64 => Operand::Float64(f64::from_bits(cursor.u64()?)),
            OperandWidth::Token => Operand::Token(cursor.u32()?),
            OperandWidth::BranchTarget8 => {
                let displacement = i64::from(cursor.u8()? as i8);
                Operand::Target(absolute_target(cursor.position, displacement))
            }
            OperandWidth::BranchTarget32 => {
                let displacement = i64::from(cursor.u32()? as i32);
                Operand::Target(absolute_target(cursor.position, displacement))
            }
            OperandWidth::SwitchTable => {
                let count = cursor.u32()? as usize;
                let mut raw = Vec::with_capacity(count);
                for _ in 0..count {
                    raw.push(cursor.u32()? as i32);
                }
                let next = cursor.position;
                Operand::Table(raw.into_iter().map(|entry| absolute_target(next, i64::from(entry))).collect())
            }
        };
        instructions.push(Instruction { offset, opcode, operand });
    }
    Ok(instructions)
}

/// Formats instruction rows as a listing. The interner resolves string
/// tokens and the token table names type/method/field tokens when provided.
#[must_use]
pub fn render(instructions: &[Instruction], interner: Option<&Interner>, tokens: Option<&TokenTable>) -> String {
    let mut out = String::new();
    let mut float_buffer = ryu::Buffer::new();
    for instruction in instructions {
        out.push_str(&format!("{:#06x}: {}", instruction.offset, instruction.opcode.mnemonic()));
        match &instruction.operand {
            Operand::None => {}
            Operand::Int8(value) => out.push_str(&format!(" {value}")),
            Operand::UInt8(value) => out.push_str(&format!(" {value}")),
            Operand::UInt16(value) => out.push_str(&format!(" {value}")),
            Operand::Int32(value) => out.push_str(&format!(" {value}")),
            Operand::Int64(value) => out.push_str(&format!(" {value}")),
            Operand::Float32(value) => out.push_str(&format!(" {value}")),
            Operand::Float64(value) => {
                out.push(' ');
                out.push_str(float_buffer.format(*value));
            }
            Operand::Token(raw) => {
                if raw & 0xFF00_0000 == 0x7000_0000
                    && let Some(interner) = interner
                {
                    let id = crate::intern::StringId::from_index(raw & 0x00FF_FFFF);
                    out.push_str(&format!(" \"{}\"", interner.resolve(id)));
                } else if let Some(description) = tokens.and_then(|table| table.describe(*raw)) {
                    out.push_str(&format!(" {description}"));
                } else {
                    out.push_str(&format!(" {raw:#010x}"));
                }
            }
            Operand::Target(target) => out.push_str(&format!(" {target:#06x}")),
            Operand::Table(targets) => {
                let rendered: Vec<String> = targets.iter().map(|target| format!("{target:#06x}")).collect();
                out.push_str(&format!(" ({})", rendered.join(", ")));
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{CodeEmitter, EmitterConfig, ValueKind};
    use crate::tokens::TokenTable;

    fn emit_sample() -> Vec<u8> {
        let tokens = TokenTable::new();
        let config = EmitterConfig {
            checked: true,
            arg_kinds: Vec::new(),
            return_kind: None,
            track_locations: false,
        };
        let mut em = CodeEmitter::new(&tokens, config);
        let done = em.create_label();
        em.load_int32(5).unwrap();
        em.load_int32(900).unwrap();
        em.add().unwrap();
        em.branch_if_zero(done).unwrap();
        em.define_label_position(done).unwrap();
        em.no_operation().unwrap();
        em.complete().unwrap().bytes
    }

    #[test]
    fn decodes_emitted_stream() {
        let bytes = emit_sample();
        let instructions = disassemble(&bytes).unwrap();
        let mnemonics: Vec<&str> = instructions.iter().map(|i| i.opcode.mnemonic()).collect();
        assert_eq!(mnemonics, vec!["ldc.i4.5", "ldc.i4", "add", "brfalse", "nop"]);
        // brfalse falls through to the label right after it
        let target = match &instructions[3].operand {
            Operand::Target(target) => *target,
            other => panic!("expected branch target, got {other:?}"),
        };
        assert_eq!(target, instructions[4].offset);
    }

    #[test]
    fn rejects_unknown_opcode() {
        let err = disassemble(&[0x24]).unwrap_err();
        assert_eq!(err, DisasmError::UnknownOpcode { offset: 0, byte: 0x24 });
    }

    #[test]
    fn rejects_truncated_operand() {
        // ldc.i4 with only two operand bytes
        let err = disassemble(&[0x20, 1, 2]).unwrap_err();
        assert!(matches!(err, DisasmError::Truncated { .. }));
    }

    #[test]
    fn renders_doubles_with_shortest_form() {
        let tokens = TokenTable::new();
        let config = EmitterConfig {
            checked: true,
            arg_kinds: Vec::new(),
            return_kind: Some(ValueKind::Float),
            track_locations: false,
        };
        let mut em = CodeEmitter::new(&tokens, config);
        em.load_double(0.5).unwrap();
        em.return_value().unwrap();
        let bytes = em.complete().unwrap().bytes;
        let listing = render(&disassemble(&bytes).unwrap(), None, None);
        assert!(listing.contains("ldc.r8 0.5"));
        assert!(listing.contains("ret"));
    }
}
