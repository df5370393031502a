//! The stack machine's assembler.
//!
//! `CodeEmitter` translates high-level emission calls into raw opcode bytes
//! with correct operand encoding, while tracking the evaluation stack at
//! every point. Branches to not-yet-defined labels write placeholder operands
//! and queue fix-ups that `complete` patches. Exception regions are built on
//! a stack and serialized into the loader's table at completion.
//!
//! Two bookkeeping regimes exist: unchecked emission enforces stack depth
//! only; checked emission additionally tracks the kind of every stack value
//! and validates each pop against the instruction's accepted kinds. Both
//! produce identical bytes.

use smallvec::SmallVec;

use crate::{
    code::LocationEntry,
    intern::StringId,
    parse::SourceSpan,
    tokens::{FieldToken, MethodFlavor, MethodToken, TokenTable, TypeToken, string_token},
    tracer::{CodegenTracer, NoopTracer, RegionEvent},
};

use super::{
    error::{EmitError, EmitResult},
    exceptions::{ClauseKind, ExceptionClause, ExceptionRegion, RegionState, serialize_exception_table},
    kind::{ElementType, KindSet, ValueKind},
    label::{Fixup, Label, LabelId, StackState},
    locals::{LocalId, LocalTable},
    opcode::{AnyOpcode, EXTENDED_PREFIX, ExtOpcode, Opcode},
};

/// Construction parameters for a [`CodeEmitter`].
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Track per-value kinds and validate pops against accepted kind sets.
    pub checked: bool,
    /// Kinds of the routine's formal parameters, in order. By convention the
    /// first parameter is the current-scope handle and the second the `this`
    /// receiver.
    pub arg_kinds: Vec<ValueKind>,
    /// Kind of the routine's return value; `None` for void routines.
    pub return_kind: Option<ValueKind>,
    /// Record source locations into the location table.
    pub track_locations: bool,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            checked: cfg!(debug_assertions),
            arg_kinds: Vec::new(),
            return_kind: None,
            track_locations: false,
        }
    }
}

/// Everything `complete` hands back: the byte stream and the metadata the
/// runtime loader and tooling need.
#[derive(Debug, PartialEq)]
pub struct EmittedBody {
    pub bytes: Vec<u8>,
    pub max_stack: u32,
    pub local_signature: Vec<u8>,
    pub exception_table: Vec<u8>,
    pub location_table: Vec<LocationEntry>,
    /// Declared local names by slot, for diagnostics.
    pub local_names: Vec<Option<StringId>>,
}

/// The assembler for one routine.
///
/// Created at generation start and consumed by [`complete`](Self::complete);
/// labels and local handles it returns are bound to it and cannot cross
/// emitters.
#[derive(Debug)]
pub struct CodeEmitter<'t, Tr: CodegenTracer = NoopTracer> {
    tokens: &'t TokenTable,
    code: Vec<u8>,
    stack_depth: u32,
    max_stack: u32,
    /// Set after an unconditional terminator; the next emission must be
    /// reached through a label definition that re-establishes the stack.
    indeterminate: bool,
    /// Parallel kind stack; `Some` iff checked emission.
    operand_kinds: Option<Vec<ValueKind>>,
    locals: LocalTable,
    arg_kinds: Vec<ValueKind>,
    return_kind: Option<ValueKind>,
    labels: Vec<Label>,
    fixups: SmallVec<[Fixup; 8]>,
    regions_active: Vec<ExceptionRegion>,
    regions_done: Vec<ExceptionRegion>,
    location_table: Vec<LocationEntry>,
    current_location: Option<SourceSpan>,
    track_locations: bool,
    tracer: Tr,
}

impl<'t> CodeEmitter<'t, NoopTracer> {
    /// Creates an emitter with the zero-cost tracer.
    #[must_use]
    pub fn new(tokens: &'t TokenTable, config: EmitterConfig) -> Self {
        Self::with_tracer(tokens, config, NoopTracer)
    }
}

impl<'t, Tr: CodegenTracer> CodeEmitter<'t, Tr> {
    /// Creates an emitter that reports emission events to `tracer`.
    #[must_use]
    pub fn with_tracer(tokens: &'t TokenTable, config: EmitterConfig, tracer: Tr) -> Self {
        Self {
            tokens,
            code: Vec::with_capacity(64),
            stack_depth: 0,
            max_stack: 0,
            indeterminate: false,
            operand_kinds: config.checked.then(Vec::new),
            locals: LocalTable::new(),
            arg_kinds: config.arg_kinds,
            return_kind: config.return_kind,
            labels: Vec::new(),
            fixups: SmallVec::new(),
            regions_active: Vec::new(),
            regions_done: Vec::new(),
            location_table: Vec::new(),
            current_location: None,
            track_locations: config.track_locations,
            tracer,
        }
    }

    // ===== accessors =====

    /// Current write position in the code buffer.
    #[must_use]
    pub fn offset(&self) -> u32 {
        u32::try_from(self.code.len()).expect("code length exceeds u32")
    }

    /// Current evaluation-stack depth.
    #[must_use]
    pub fn stack_depth(&self) -> u32 {
        self.stack_depth
    }

    /// Whether the stack is indeterminate (fresh after a terminator).
    #[must_use]
    pub fn is_indeterminate(&self) -> bool {
        self.indeterminate
    }

    /// Number of exception regions currently open.
    #[must_use]
    pub fn active_region_depth(&self) -> usize {
        self.regions_active.len()
    }

    /// Sets the source range recorded for subsequently emitted instructions.
    /// Ignored unless location tracking was requested.
    pub fn set_location(&mut self, span: Option<SourceSpan>) {
        self.current_location = span;
    }

    // ===== stack bookkeeping =====

    fn push_value(&mut self, kind: ValueKind) {
        self.stack_depth += 1;
        self.max_stack = self.max_stack.max(self.stack_depth);
        if let Some(kinds) = &mut self.operand_kinds {
            kinds.push(kind);
        }
    }

    /// Pops one value, validating its kind against `expected` in checked
    /// emission. Returns the popped kind when tracked.
    fn pop_value(&mut self, expected: KindSet) -> EmitResult<Option<ValueKind>> {
        if self.stack_depth == 0 {
            return Err(EmitError::StackUnderflow { offset: self.offset() });
        }
        self.stack_depth -= 1;
        let Some(kinds) = &mut self.operand_kinds else {
            return Ok(None);
        };
        let actual = kinds.pop().expect("kind stack tracks depth");
        if !expected.contains(actual) {
            return Err(EmitError::KindMismatch {
                offset: self.offset(),
                expected,
                actual,
            });
        }
        Ok(Some(actual))
    }

    /// Pops two operands that must share one kind out of `accepted`; returns
    /// the shared kind when tracked.
    fn pop_matched_pair(&mut self, accepted: KindSet) -> EmitResult<Option<ValueKind>> {
        let second = self.pop_value(accepted)?;
        let first = match second {
            Some(kind) => self.pop_value(KindSet::of(kind))?,
            None => self.pop_value(accepted)?,
        };
        Ok(first.or(second))
    }

    fn clear_stack(&mut self) {
        self.stack_depth = 0;
        if let Some(kinds) = &mut self.operand_kinds {
            kinds.clear();
        }
    }

    fn replace_stack_with(&mut self, values: &[ValueKind]) {
        self.clear_stack();
        for &kind in values {
            self.push_value(kind);
        }
    }

    fn current_stack_state(&self) -> StackState {
        StackState {
            depth: self.stack_depth,
            kinds: self.operand_kinds.as_ref().map(|kinds| SmallVec::from_slice(kinds)),
        }
    }

    fn restore_stack_state(&mut self, state: &StackState) {
        self.stack_depth = state.depth;
        self.max_stack = self.max_stack.max(self.stack_depth);
        if let Some(kinds) = &mut self.operand_kinds {
            kinds.clear();
            if let Some(expected) = &state.kinds {
                kinds.extend_from_slice(expected);
            }
        }
    }

    // ===== instruction plumbing =====

    /// Guards the start of every instruction: emission while the stack is
    /// indeterminate is unreachable code, a codegen bug.
    fn instruction_start(&mut self) -> EmitResult {
        if self.indeterminate {
            return Err(EmitError::UnreachableEmission { offset: self.offset() });
        }
        if self.track_locations
            && let Some(span) = self.current_location
        {
            self.location_table.push(LocationEntry::new(self.offset(), span));
        }
        Ok(())
    }

    fn write_primary(&mut self, op: Opcode) -> u32 {
        let at = self.offset();
        self.code.push(op as u8);
        at
    }

    fn write_extended(&mut self, op: ExtOpcode) -> u32 {
        let at = self.offset();
        self.code.push(EXTENDED_PREFIX);
        self.code.push(op as u8);
        at
    }

    fn finish(&mut self, at: u32, op: AnyOpcode) {
        self.tracer.on_instruction(at, op, self.stack_depth);
    }

    fn write_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    // ===== constants and simple stack ops =====

    /// Pushes the null reference.
    pub fn load_null(&mut self) -> EmitResult {
        self.instruction_start()?;
        let at = self.write_primary(Opcode::Ldnull);
        self.push_value(ValueKind::Object);
        self.finish(at, Opcode::Ldnull.into());
        Ok(())
    }

    /// Pushes a string literal by token.
    pub fn load_string(&mut self, id: StringId) -> EmitResult {
        self.instruction_start()?;
        let at = self.write_primary(Opcode::Ldstr);
        self.write_u32(string_token(id));
        self.push_value(ValueKind::Object);
        self.finish(at, Opcode::Ldstr.into());
        Ok(())
    }

    /// Pushes a 32-bit integer constant using the shortest encoding:
    /// dedicated opcodes for -1..=8, the one-byte form for i8 range, the
    /// four-byte form otherwise.
    pub fn load_int32(&mut self, value: i32) -> EmitResult {
        self.instruction_start()?;
        let (at, op) = match value {
            -1 => (self.write_primary(Opcode::LdcI4M1), Opcode::LdcI4M1),
            0..=8 => {
                let at = self.offset();
                // Safe cast: 0..=8 stays within the dedicated opcode range
                let byte = Opcode::LdcI40 as u8 + value as u8;
                self.code.push(byte);
                (at, Opcode::from_repr(byte).expect("dedicated ldc.i4 range is contiguous"))
            }
            _ => {
                if let Ok(short) = i8::try_from(value) {
                    let at = self.write_primary(Opcode::LdcI4S);
                    self.code.push(short as u8);
                    (at, Opcode::LdcI4S)
                } else {
                    let at = self.write_primary(Opcode::LdcI4);
                    self.code.extend_from_slice(&value.to_le_bytes());
                    (at, Opcode::LdcI4)
                }
            }
        };
        self.push_value(ValueKind::Int32);
        self.finish(at, op.into());
        Ok(())
    }

    /// Pushes a boolean as the 32-bit integer 0 or 1.
    pub fn load_boolean(&mut self, value: bool) -> EmitResult {
        self.load_int32(i32::from(value))
    }

    /// Pushes a 64-bit float constant.
    pub fn load_double(&mut self, value: f64) -> EmitResult {
        self.instruction_start()?;
        let at = self.write_primary(Opcode::LdcR8);
        self.code.extend_from_slice(&value.to_bits().to_le_bytes());
        self.push_value(ValueKind::Float);
        self.finish(at, Opcode::LdcR8.into());
        Ok(())
    }

    /// Discards the top of the stack.
    pub fn pop(&mut self) -> EmitResult {
        self.instruction_start()?;
        self.pop_value(KindSet::ANY)?;
        let at = self.write_primary(Opcode::Pop);
        self.finish(at, Opcode::Pop.into());
        Ok(())
    }

    /// Duplicates the top of the stack, preserving its kind.
    pub fn duplicate(&mut self) -> EmitResult {
        self.instruction_start()?;
        if self.stack_depth == 0 {
            return Err(EmitError::StackUnderflow { offset: self.offset() });
        }
        let top = self.operand_kinds.as_ref().map(|kinds| kinds[kinds.len() - 1]);
        self.stack_depth += 1;
        self.max_stack = self.max_stack.max(self.stack_depth);
        if let Some(kinds) = &mut self.operand_kinds {
            kinds.push(top.expect("checked emission tracks every value"));
        }
        let at = self.write_primary(Opcode::Dup);
        self.finish(at, Opcode::Dup.into());
        Ok(())
    }

    // ===== locals and arguments =====

    /// Declares a local slot of `kind`, optionally named for diagnostics.
    pub fn declare_variable(&mut self, kind: ValueKind, name: Option<StringId>) -> EmitResult<LocalId> {
        self.locals.declare(kind, name)
    }

    /// Pushes a local's value, choosing the shortest encoding by slot index.
    pub fn load_variable(&mut self, local: LocalId) -> EmitResult {
        self.instruction_start()?;
        let kind = self.locals.kind(local);
        let (at, op) = match local.index() {
            0 => (self.write_primary(Opcode::Ldloc0), Opcode::Ldloc0.into()),
            1 => (self.write_primary(Opcode::Ldloc1), Opcode::Ldloc1.into()),
            2 => (self.write_primary(Opcode::Ldloc2), Opcode::Ldloc2.into()),
            3 => (self.write_primary(Opcode::Ldloc3), Opcode::Ldloc3.into()),
            slot => {
                if let Ok(short) = u8::try_from(slot) {
                    let at = self.write_primary(Opcode::LdlocS);
                    self.code.push(short);
                    (at, Opcode::LdlocS.into())
                } else {
                    let at = self.write_extended(ExtOpcode::Ldloc);
                    self.code.extend_from_slice(&slot.to_le_bytes());
                    (at, ExtOpcode::Ldloc.into())
                }
            }
        };
        self.push_value(kind);
        self.finish(at, op);
        Ok(())
    }

    /// Pops into a local slot; the value's kind must match the declaration.
    pub fn store_variable(&mut self, local: LocalId) -> EmitResult {
        self.instruction_start()?;
        let kind = self.locals.kind(local);
        self.pop_value(KindSet::of(kind))?;
        let (at, op) = match local.index() {
            0 => (self.write_primary(Opcode::Stloc0), Opcode::Stloc0.into()),
            1 => (self.write_primary(Opcode::Stloc1), Opcode::Stloc1.into()),
            2 => (self.write_primary(Opcode::Stloc2), Opcode::Stloc2.into()),
            3 => (self.write_primary(Opcode::Stloc3), Opcode::Stloc3.into()),
            slot => {
                if let Ok(short) = u8::try_from(slot) {
                    let at = self.write_primary(Opcode::StlocS);
                    self.code.push(short);
                    (at, Opcode::StlocS.into())
                } else {
                    let at = self.write_extended(ExtOpcode::Stloc);
                    self.code.extend_from_slice(&slot.to_le_bytes());
                    (at, ExtOpcode::Stloc.into())
                }
            }
        };
        self.finish(at, op);
        Ok(())
    }

    /// Pushes the address of a local slot as a managed pointer.
    pub fn load_address_of_variable(&mut self, local: LocalId) -> EmitResult {
        self.instruction_start()?;
        let (at, op) = if let Ok(short) = u8::try_from(local.index()) {
            let at = self.write_primary(Opcode::LdlocaS);
            self.code.push(short);
            (at, Opcode::LdlocaS.into())
        } else {
            let at = self.write_extended(ExtOpcode::Ldloca);
            self.code.extend_from_slice(&local.index().to_le_bytes());
            (at, ExtOpcode::Ldloca.into())
        };
        self.push_value(ValueKind::ManagedPointer);
        self.finish(at, op);
        Ok(())
    }

    fn argument_kind(&self, index: usize) -> EmitResult<ValueKind> {
        self.arg_kinds.get(index).copied().ok_or(EmitError::TooManyArguments {
            index,
            declared: self.arg_kinds.len(),
        })
    }

    /// Pushes an argument's value, choosing the shortest encoding by index.
    pub fn load_argument(&mut self, index: usize) -> EmitResult {
        self.instruction_start()?;
        let kind = self.argument_kind(index)?;
        let (at, op) = match index {
            0 => (self.write_primary(Opcode::Ldarg0), Opcode::Ldarg0.into()),
            1 => (self.write_primary(Opcode::Ldarg1), Opcode::Ldarg1.into()),
            2 => (self.write_primary(Opcode::Ldarg2), Opcode::Ldarg2.into()),
            3 => (self.write_primary(Opcode::Ldarg3), Opcode::Ldarg3.into()),
            _ => {
                if let Ok(short) = u8::try_from(index) {
                    let at = self.write_primary(Opcode::LdargS);
                    self.code.push(short);
                    (at, Opcode::LdargS.into())
                } else {
                    let at = self.write_extended(ExtOpcode::Ldarg);
                    // Safe cast: argument_kind bounds index below the declared
                    // count, which the config keeps within u16
                    self.code.extend_from_slice(&(index as u16).to_le_bytes());
                    (at, ExtOpcode::Ldarg.into())
                }
            }
        };
        self.push_value(kind);
        self.finish(at, op);
        Ok(())
    }

    /// Pops into an argument slot; the value's kind must match.
    pub fn store_argument(&mut self, index: usize) -> EmitResult {
        self.instruction_start()?;
        let kind = self.argument_kind(index)?;
        self.pop_value(KindSet::of(kind))?;
        let (at, op) = if let Ok(short) = u8::try_from(index) {
            let at = self.write_primary(Opcode::StargS);
            self.code.push(short);
            (at, Opcode::StargS.into())
        } else {
            let at = self.write_extended(ExtOpcode::Starg);
            self.code.extend_from_slice(&(index as u16).to_le_bytes());
            (at, ExtOpcode::Starg.into())
        };
        self.finish(at, op);
        Ok(())
    }

    /// Pushes the address of an argument slot as a managed pointer.
    pub fn load_address_of_argument(&mut self, index: usize) -> EmitResult {
        self.instruction_start()?;
        self.argument_kind(index)?;
        let (at, op) = if let Ok(short) = u8::try_from(index) {
            let at = self.write_primary(Opcode::LdargaS);
            self.code.push(short);
            (at, Opcode::LdargaS.into())
        } else {
            let at = self.write_extended(ExtOpcode::Ldarga);
            self.code.extend_from_slice(&(index as u16).to_le_bytes());
            (at, ExtOpcode::Ldarga.into())
        };
        self.push_value(ValueKind::ManagedPointer);
        self.finish(at, op);
        Ok(())
    }

    // ===== arithmetic, bitwise, comparison, conversion =====

    fn binary_arithmetic(&mut self, op: Opcode) -> EmitResult {
        self.instruction_start()?;
        let kind = self.pop_matched_pair(KindSet::NUMERIC)?;
        self.push_value(kind.unwrap_or(ValueKind::Int32));
        let at = self.write_primary(op);
        self.finish(at, op.into());
        Ok(())
    }

    /// Adds the top two values; both must share one numeric kind.
    pub fn add(&mut self) -> EmitResult {
        self.binary_arithmetic(Opcode::Add)
    }

    pub fn subtract(&mut self) -> EmitResult {
        self.binary_arithmetic(Opcode::Sub)
    }

    pub fn multiply(&mut self) -> EmitResult {
        self.binary_arithmetic(Opcode::Mul)
    }

    pub fn divide(&mut self) -> EmitResult {
        self.binary_arithmetic(Opcode::Div)
    }

    pub fn remainder(&mut self) -> EmitResult {
        self.binary_arithmetic(Opcode::Rem)
    }

    /// Negates the top value in place; kind is preserved.
    pub fn negate(&mut self) -> EmitResult {
        self.instruction_start()?;
        let kind = self.pop_value(KindSet::NUMERIC)?;
        self.push_value(kind.unwrap_or(ValueKind::Int32));
        let at = self.write_primary(Opcode::Neg);
        self.finish(at, Opcode::Neg.into());
        Ok(())
    }

    fn binary_int32(&mut self, op: Opcode) -> EmitResult {
        self.instruction_start()?;
        self.pop_value(KindSet::INT32)?;
        self.pop_value(KindSet::INT32)?;
        self.push_value(ValueKind::Int32);
        let at = self.write_primary(op);
        self.finish(at, op.into());
        Ok(())
    }

    pub fn bitwise_and(&mut self) -> EmitResult {
        self.binary_int32(Opcode::And)
    }

    pub fn bitwise_or(&mut self) -> EmitResult {
        self.binary_int32(Opcode::Or)
    }

    pub fn bitwise_xor(&mut self) -> EmitResult {
        self.binary_int32(Opcode::Xor)
    }

    /// Bitwise complement of the top 32-bit integer.
    pub fn bitwise_not(&mut self) -> EmitResult {
        self.instruction_start()?;
        self.pop_value(KindSet::INT32)?;
        self.push_value(ValueKind::Int32);
        let at = self.write_primary(Opcode::Not);
        self.finish(at, Opcode::Not.into());
        Ok(())
    }

    pub fn shift_left(&mut self) -> EmitResult {
        self.binary_int32(Opcode::Shl)
    }

    pub fn shift_right(&mut self) -> EmitResult {
        self.binary_int32(Opcode::Shr)
    }

    pub fn shift_right_unsigned(&mut self) -> EmitResult {
        self.binary_int32(Opcode::ShrUn)
    }

    fn comparison(&mut self, op: ExtOpcode, accepted: KindSet) -> EmitResult {
        self.instruction_start()?;
        self.pop_matched_pair(accepted)?;
        self.push_value(ValueKind::Int32);
        let at = self.write_extended(op);
        self.finish(at, op.into());
        Ok(())
    }

    /// Pushes 1 if the top two values are equal, else 0. Accepts numerics
    /// and object references.
    pub fn compare_equal(&mut self) -> EmitResult {
        self.comparison(ExtOpcode::Ceq, KindSet::EQUATABLE)
    }

    pub fn compare_greater_than(&mut self) -> EmitResult {
        self.comparison(ExtOpcode::Cgt, KindSet::NUMERIC)
    }

    /// Unsigned/unordered greater-than; on floats this is the NaN-tolerant
    /// variant.
    pub fn compare_greater_than_unsigned(&mut self) -> EmitResult {
        self.comparison(ExtOpcode::CgtUn, KindSet::NUMERIC)
    }

    pub fn compare_less_than(&mut self) -> EmitResult {
        self.comparison(ExtOpcode::Clt, KindSet::NUMERIC)
    }

    pub fn compare_less_than_unsigned(&mut self) -> EmitResult {
        self.comparison(ExtOpcode::CltUn, KindSet::NUMERIC)
    }

    fn conversion(&mut self, op: Opcode, result: ValueKind) -> EmitResult {
        self.instruction_start()?;
        self.pop_value(KindSet::NUMERIC)?;
        self.push_value(result);
        let at = self.write_primary(op);
        self.finish(at, op.into());
        Ok(())
    }

    /// Converts the top numeric value to a 32-bit integer.
    pub fn convert_to_integer(&mut self) -> EmitResult {
        self.conversion(Opcode::ConvI4, ValueKind::Int32)
    }

    /// Converts the top numeric value to an unsigned 32-bit integer (held on
    /// the stack as int32).
    pub fn convert_to_unsigned_integer(&mut self) -> EmitResult {
        self.conversion(Opcode::ConvU4, ValueKind::Int32)
    }

    /// Converts the top numeric value to a 64-bit integer.
    pub fn convert_to_long(&mut self) -> EmitResult {
        self.conversion(Opcode::ConvI8, ValueKind::Int64)
    }

    /// Converts the top numeric value to a 64-bit float.
    pub fn convert_to_double(&mut self) -> EmitResult {
        self.conversion(Opcode::ConvR8, ValueKind::Float)
    }

    /// Boxes the top value into an instance of `boxed_type`; the value's
    /// kind must be one the type declares as its primitive representation.
    pub fn box_value(&mut self, boxed_type: TypeToken) -> EmitResult {
        self.instruction_start()?;
        let accepted = self.tokens.type_def(boxed_type).unboxed;
        self.pop_value(accepted)?;
        self.push_value(ValueKind::Object);
        let at = self.write_primary(Opcode::BoxValue);
        self.write_u32(boxed_type.raw());
        self.finish(at, Opcode::BoxValue.into());
        Ok(())
    }

    /// Casts the top object reference to `target_type`, faulting at runtime
    /// on mismatch.
    pub fn cast_class(&mut self, target_type: TypeToken) -> EmitResult {
        self.instruction_start()?;
        self.pop_value(KindSet::OBJECT)?;
        self.push_value(ValueKind::Object);
        let at = self.write_primary(Opcode::Castclass);
        self.write_u32(target_type.raw());
        self.finish(at, Opcode::Castclass.into());
        Ok(())
    }

    /// Type-tests the top object reference, pushing the instance or null.
    pub fn is_instance(&mut self, target_type: TypeToken) -> EmitResult {
        self.instruction_start()?;
        self.pop_value(KindSet::OBJECT)?;
        self.push_value(ValueKind::Object);
        let at = self.write_primary(Opcode::Isinst);
        self.write_u32(target_type.raw());
        self.finish(at, Opcode::Isinst.into());
        Ok(())
    }

    // ===== labels and branches =====

    /// Creates a label bound to this emitter. The label's expected stack
    /// state is captured at its first touch (branch or definition).
    #[must_use]
    pub fn create_label(&mut self) -> LabelId {
        let id = LabelId::new(self.labels.len());
        self.labels.push(Label::new());
        id
    }

    /// Captures or validates the stack state recorded on `label`.
    fn touch_label(&mut self, label: LabelId) -> EmitResult {
        let current = self.current_stack_state();
        let slot = &mut self.labels[label.index()];
        match &slot.expected {
            None => {
                slot.expected = Some(current);
                Ok(())
            }
            Some(expected) => {
                let kinds_agree = match (&expected.kinds, &current.kinds) {
                    (Some(a), Some(b)) => a == b,
                    _ => true,
                };
                if expected.depth != current.depth || !kinds_agree {
                    return Err(EmitError::StackMismatch {
                        label: label.raw(),
                        expected_depth: expected.depth,
                        actual_depth: current.depth,
                    });
                }
                Ok(())
            }
        }
    }

    /// Binds `label` to the current offset, reconciling the evaluation
    /// stack: an indeterminate stack is restored from the label's recorded
    /// state; a live stack must match it.
    pub fn define_label_position(&mut self, label: LabelId) -> EmitResult {
        if self.labels[label.index()].offset.is_some() {
            return Err(EmitError::DoubleDefinedLabel { label: label.raw() });
        }
        let offset = self.offset();
        self.labels[label.index()].offset = Some(offset);
        if self.indeterminate {
            match self.labels[label.index()].expected.clone() {
                Some(state) => self.restore_stack_state(&state),
                None => {
                    // Nothing branched here yet: the label starts with an
                    // empty stack and records that as its expectation.
                    self.clear_stack();
                    let state = self.current_stack_state();
                    self.labels[label.index()].expected = Some(state);
                }
            }
            self.indeterminate = false;
        } else {
            self.touch_label(label)?;
        }
        self.tracer.on_label_defined(label.raw(), offset);
        Ok(())
    }

    /// Writes a 4-byte branch operand: inline when the target is defined,
    /// a queued fix-up otherwise.
    fn write_branch_target(&mut self, label: LabelId) {
        let write_position = self.offset();
        let next_instruction_offset = write_position + 4;
        if let Some(target) = self.labels[label.index()].offset {
            let displacement = i64::from(target) - i64::from(next_instruction_offset);
            // Safe cast: code length is bounded well below i32 range
            self.code.extend_from_slice(&(displacement as i32).to_le_bytes());
        } else {
            self.fixups.push(Fixup {
                write_position,
                length: 4,
                next_instruction_offset,
                label,
            });
            self.code.extend_from_slice(&[0, 0, 0, 0]);
        }
    }

    fn branch_to(&mut self, op: Opcode, label: LabelId, unconditional: bool) -> EmitResult {
        self.touch_label(label)?;
        let at = self.write_primary(op);
        self.write_branch_target(label);
        if unconditional {
            self.indeterminate = true;
        }
        self.finish(at, op.into());
        Ok(())
    }

    /// Unconditional branch; marks the stack indeterminate.
    pub fn branch(&mut self, label: LabelId) -> EmitResult {
        self.instruction_start()?;
        self.branch_to(Opcode::Br, label, true)
    }

    fn conditional_branch_one(&mut self, op: Opcode, label: LabelId, accepted: KindSet) -> EmitResult {
        self.instruction_start()?;
        self.pop_value(accepted)?;
        self.branch_to(op, label, false)
    }

    fn conditional_branch_pair(&mut self, op: Opcode, label: LabelId, accepted: KindSet) -> EmitResult {
        self.instruction_start()?;
        self.pop_matched_pair(accepted)?;
        self.branch_to(op, label, false)
    }

    /// Branches if the popped value is zero or null.
    pub fn branch_if_zero(&mut self, label: LabelId) -> EmitResult {
        self.conditional_branch_one(Opcode::Brfalse, label, KindSet::INT32.with(ValueKind::Object))
    }

    /// Branches if the popped value is non-zero or non-null.
    pub fn branch_if_not_zero(&mut self, label: LabelId) -> EmitResult {
        self.conditional_branch_one(Opcode::Brtrue, label, KindSet::INT32.with(ValueKind::Object))
    }

    pub fn branch_if_equal(&mut self, label: LabelId) -> EmitResult {
        self.conditional_branch_pair(Opcode::Beq, label, KindSet::EQUATABLE)
    }

    /// Branches if unequal or unordered; this is the NaN-tolerant inequality.
    pub fn branch_if_not_equal(&mut self, label: LabelId) -> EmitResult {
        self.conditional_branch_pair(Opcode::BneUn, label, KindSet::EQUATABLE)
    }

    pub fn branch_if_greater(&mut self, label: LabelId) -> EmitResult {
        self.conditional_branch_pair(Opcode::Bgt, label, KindSet::NUMERIC)
    }

    pub fn branch_if_greater_or_equal(&mut self, label: LabelId) -> EmitResult {
        self.conditional_branch_pair(Opcode::Bge, label, KindSet::NUMERIC)
    }

    pub fn branch_if_less(&mut self, label: LabelId) -> EmitResult {
        self.conditional_branch_pair(Opcode::Blt, label, KindSet::NUMERIC)
    }

    pub fn branch_if_less_or_equal(&mut self, label: LabelId) -> EmitResult {
        self.conditional_branch_pair(Opcode::Ble, label, KindSet::NUMERIC)
    }

    pub fn branch_if_greater_unsigned(&mut self, label: LabelId) -> EmitResult {
        self.conditional_branch_pair(Opcode::BgtUn, label, KindSet::NUMERIC)
    }

    pub fn branch_if_greater_or_equal_unsigned(&mut self, label: LabelId) -> EmitResult {
        self.conditional_branch_pair(Opcode::BgeUn, label, KindSet::NUMERIC)
    }

    pub fn branch_if_less_unsigned(&mut self, label: LabelId) -> EmitResult {
        self.conditional_branch_pair(Opcode::BltUn, label, KindSet::NUMERIC)
    }

    pub fn branch_if_less_or_equal_unsigned(&mut self, label: LabelId) -> EmitResult {
        self.conditional_branch_pair(Opcode::BleUn, label, KindSet::NUMERIC)
    }

    /// Jump table: pops a 32-bit index and branches to the matching entry,
    /// falling through when out of range.
    pub fn switch(&mut self, targets: &[LabelId]) -> EmitResult {
        self.instruction_start()?;
        self.pop_value(KindSet::INT32)?;
        let at = self.write_primary(Opcode::Switch);
        let count = u32::try_from(targets.len()).expect("switch table exceeds u32 entries");
        self.write_u32(count);
        let next_instruction_offset = self.offset() + count * 4;
        for &label in targets {
            self.touch_label(label)?;
            let write_position = self.offset();
            if let Some(target) = self.labels[label.index()].offset {
                let displacement = i64::from(target) - i64::from(next_instruction_offset);
                self.code.extend_from_slice(&(displacement as i32).to_le_bytes());
            } else {
                self.fixups.push(Fixup {
                    write_position,
                    length: 4,
                    next_instruction_offset,
                    label,
                });
                self.code.extend_from_slice(&[0, 0, 0, 0]);
            }
        }
        self.finish(at, Opcode::Switch.into());
        Ok(())
    }

    /// Returns from the routine, popping the return value for non-void
    /// routines. The stack must be balanced afterwards.
    pub fn return_value(&mut self) -> EmitResult {
        self.instruction_start()?;
        if let Some(kind) = self.return_kind {
            self.pop_value(KindSet::of(kind))?;
        }
        if self.stack_depth != 0 {
            return Err(EmitError::UnbalancedStack {
                depth: self.stack_depth,
            });
        }
        let at = self.write_primary(Opcode::Ret);
        self.indeterminate = true;
        self.finish(at, Opcode::Ret.into());
        Ok(())
    }

    // ===== calls and object model =====

    /// Calls a static runtime method, validating argument kinds against the
    /// declared signature.
    pub fn call_static(&mut self, method: MethodToken) -> EmitResult {
        self.instruction_start()?;
        let signature = self.tokens.method_def(method).signature.clone();
        debug_assert!(
            signature.flavor == MethodFlavor::Static,
            "call_static on a non-static method token"
        );
        for &param in signature.params.iter().rev() {
            self.pop_value(KindSet::of(param))?;
        }
        if let Some(kind) = signature.returns {
            self.push_value(kind);
        }
        let at = self.write_primary(Opcode::Call);
        self.write_u32(method.raw());
        self.finish(at, Opcode::Call.into());
        Ok(())
    }

    /// Calls an instance method through the receiver beneath the arguments.
    pub fn call_virtual(&mut self, method: MethodToken) -> EmitResult {
        self.instruction_start()?;
        let signature = self.tokens.method_def(method).signature.clone();
        debug_assert!(
            signature.flavor == MethodFlavor::Instance,
            "call_virtual on a non-instance method token"
        );
        for &param in signature.params.iter().rev() {
            self.pop_value(KindSet::of(param))?;
        }
        self.pop_value(KindSet::OBJECT)?;
        if let Some(kind) = signature.returns {
            self.push_value(kind);
        }
        let at = self.write_primary(Opcode::Callvirt);
        self.write_u32(method.raw());
        self.finish(at, Opcode::Callvirt.into());
        Ok(())
    }

    /// Allocates an instance via `ctor`, popping its arguments and pushing
    /// the new object.
    pub fn new_object(&mut self, ctor: MethodToken) -> EmitResult {
        self.instruction_start()?;
        let signature = self.tokens.method_def(ctor).signature.clone();
        debug_assert!(
            signature.flavor == MethodFlavor::Constructor,
            "new_object on a non-constructor method token"
        );
        for &param in signature.params.iter().rev() {
            self.pop_value(KindSet::of(param))?;
        }
        self.push_value(ValueKind::Object);
        let at = self.write_primary(Opcode::Newobj);
        self.write_u32(ctor.raw());
        self.finish(at, Opcode::Newobj.into());
        Ok(())
    }

    /// Loads a field's value; instance fields pop their receiver.
    pub fn load_field(&mut self, field: FieldToken) -> EmitResult {
        self.instruction_start()?;
        let def = self.tokens.field_def(field);
        let (kind, is_static) = (def.kind, def.is_static);
        let op = if is_static {
            Opcode::Ldsfld
        } else {
            self.pop_value(KindSet::OBJECT)?;
            Opcode::Ldfld
        };
        self.push_value(kind);
        let at = self.write_primary(op);
        self.write_u32(field.raw());
        self.finish(at, op.into());
        Ok(())
    }

    /// Stores into a field; instance fields pop their receiver beneath the
    /// value.
    pub fn store_field(&mut self, field: FieldToken) -> EmitResult {
        self.instruction_start()?;
        let def = self.tokens.field_def(field);
        let (kind, is_static) = (def.kind, def.is_static);
        self.pop_value(KindSet::of(kind))?;
        let op = if is_static {
            Opcode::Stsfld
        } else {
            self.pop_value(KindSet::OBJECT)?;
            Opcode::Stfld
        };
        let at = self.write_primary(op);
        self.write_u32(field.raw());
        self.finish(at, op.into());
        Ok(())
    }

    // ===== arrays =====

    /// Allocates an array of `element_type`, popping the length.
    pub fn new_array(&mut self, element_type: TypeToken) -> EmitResult {
        self.instruction_start()?;
        self.pop_value(KindSet::INT32)?;
        self.push_value(ValueKind::Object);
        let at = self.write_primary(Opcode::Newarr);
        self.write_u32(element_type.raw());
        self.finish(at, Opcode::Newarr.into());
        Ok(())
    }

    /// Loads an array element, specialized by element kind. Unsigned 64-bit
    /// elements reuse the signed opcode; the ABI has no unsigned form.
    pub fn load_array_element(&mut self, element: ElementType) -> EmitResult {
        self.instruction_start()?;
        self.pop_value(KindSet::INT32)?;
        self.pop_value(KindSet::OBJECT)?;
        self.push_value(element.stack_kind());
        let op = match element {
            ElementType::Int32 => Opcode::LdelemI4,
            ElementType::Int64 | ElementType::UInt64 => Opcode::LdelemI8,
            ElementType::NativeInt => Opcode::LdelemI,
            ElementType::Double => Opcode::LdelemR8,
            ElementType::Object => Opcode::LdelemRef,
        };
        let at = self.write_primary(op);
        self.finish(at, op.into());
        Ok(())
    }

    /// Stores an array element, specialized by element kind. Signed and
    /// unsigned 64-bit elements share one opcode.
    pub fn store_array_element(&mut self, element: ElementType) -> EmitResult {
        self.instruction_start()?;
        self.pop_value(KindSet::of(element.stack_kind()))?;
        self.pop_value(KindSet::INT32)?;
        self.pop_value(KindSet::OBJECT)?;
        let op = match element {
            ElementType::Int32 => Opcode::StelemI4,
            ElementType::Int64 | ElementType::UInt64 => Opcode::StelemI8,
            ElementType::NativeInt => Opcode::StelemI,
            ElementType::Double => Opcode::StelemR8,
            ElementType::Object => Opcode::StelemRef,
        };
        let at = self.write_primary(op);
        self.finish(at, op.into());
        Ok(())
    }

    /// Pushes an array's length as a native integer.
    pub fn load_array_length(&mut self) -> EmitResult {
        self.instruction_start()?;
        self.pop_value(KindSet::OBJECT)?;
        self.push_value(ValueKind::NativeInt);
        let at = self.write_primary(Opcode::Ldlen);
        self.finish(at, Opcode::Ldlen.into());
        Ok(())
    }

    // ===== exceptions =====

    /// Throws the object on top of the stack; marks the stack indeterminate.
    pub fn throw_exception(&mut self) -> EmitResult {
        self.instruction_start()?;
        self.pop_value(KindSet::OBJECT)?;
        let at = self.write_primary(Opcode::Throw);
        self.indeterminate = true;
        self.finish(at, Opcode::Throw.into());
        Ok(())
    }

    /// Exits a protected region: empties the evaluation stack, then branches.
    /// The only permitted exit from try, catch, and filter-handler code.
    pub fn leave(&mut self, label: LabelId) -> EmitResult {
        self.instruction_start()?;
        self.clear_stack();
        self.branch_to(Opcode::Leave, label, true)
    }

    /// Opens a new exception region over the code emitted until the first
    /// clause. Returns the region's end label, where control resumes after
    /// the region.
    pub fn begin_exception_block(&mut self) -> EmitResult<LabelId> {
        let end_label = self.create_label();
        let region = ExceptionRegion::new(self.offset(), end_label);
        self.regions_active.push(region);
        let offset = self.offset();
        self.tracer.on_region(RegionEvent::Begin, offset);
        Ok(end_label)
    }

    /// Terminates whichever part of the top region is in progress, recording
    /// its extent. Emission is skipped when the code there already ended in
    /// a terminator.
    fn close_current_clause(&mut self) -> EmitResult {
        let (state, end_label) = {
            let region = self
                .regions_active
                .last()
                .ok_or(EmitError::NoActiveExceptionRegion {
                    operation: "clause transition",
                })?;
            (region.state, region.end_label)
        };
        match state {
            RegionState::Try | RegionState::Catch | RegionState::FilterHandler => {
                if !self.indeterminate {
                    self.leave(end_label)?;
                }
            }
            RegionState::Finally | RegionState::Fault => {
                if !self.indeterminate {
                    self.emit_end_finally_op()?;
                }
            }
            RegionState::Filter => return Err(EmitError::UnterminatedFilter),
        }
        let offset = self.offset();
        let region = self.regions_active.last_mut().expect("region checked above");
        if state == RegionState::Try {
            region.try_length = offset - region.try_start;
        } else {
            let clause = region.clauses.last_mut().expect("clause exists outside try state");
            clause.handler_length = offset - clause.handler_start;
        }
        Ok(())
    }

    fn enter_clause(&mut self, clause: ExceptionClause, state: RegionState, stack: &[ValueKind]) {
        let offset = self.offset();
        let kind = clause.kind;
        let region = self.regions_active.last_mut().expect("caller validated the region");
        region.clauses.push(clause);
        region.state = state;
        self.replace_stack_with(stack);
        self.indeterminate = false;
        self.tracer.on_region(RegionEvent::Clause(kind), offset);
    }

    /// Opens a catch clause for `exception_type`. The handler starts with
    /// the thrown exception as the only stack value.
    pub fn begin_catch_block(&mut self, exception_type: TypeToken) -> EmitResult {
        let region = self
            .regions_active
            .last()
            .ok_or(EmitError::NoActiveExceptionRegion {
                operation: "begin_catch_block",
            })?;
        if region.has_catch_for(exception_type) {
            return Err(EmitError::DuplicateCatch {
                type_token: exception_type.raw(),
            });
        }
        self.close_current_clause()?;
        let clause = ExceptionClause {
            kind: ClauseKind::Catch,
            catch_type: Some(exception_type),
            filter_start: 0,
            handler_start: self.offset(),
            handler_length: 0,
        };
        self.enter_clause(clause, RegionState::Catch, &[ValueKind::Object]);
        Ok(())
    }

    /// Opens the region's finally clause. The handler starts with an empty
    /// stack.
    pub fn begin_finally_block(&mut self) -> EmitResult {
        let region = self
            .regions_active
            .last()
            .ok_or(EmitError::NoActiveExceptionRegion {
                operation: "begin_finally_block",
            })?;
        if region.has_clause(ClauseKind::Finally) {
            return Err(EmitError::DuplicateFinally);
        }
        self.close_current_clause()?;
        let clause = ExceptionClause {
            kind: ClauseKind::Finally,
            catch_type: None,
            filter_start: 0,
            handler_start: self.offset(),
            handler_length: 0,
        };
        self.enter_clause(clause, RegionState::Finally, &[]);
        Ok(())
    }

    /// Opens the region's fault clause, which runs only on exceptional exit.
    pub fn begin_fault_block(&mut self) -> EmitResult {
        let region = self
            .regions_active
            .last()
            .ok_or(EmitError::NoActiveExceptionRegion {
                operation: "begin_fault_block",
            })?;
        if region.has_clause(ClauseKind::Fault) {
            return Err(EmitError::DuplicateFault);
        }
        self.close_current_clause()?;
        let clause = ExceptionClause {
            kind: ClauseKind::Fault,
            catch_type: None,
            filter_start: 0,
            handler_start: self.offset(),
            handler_length: 0,
        };
        self.enter_clause(clause, RegionState::Fault, &[]);
        Ok(())
    }

    /// Opens the region's filter clause: a predicate over the thrown
    /// exception that must end with [`end_filter`](Self::end_filter).
    pub fn begin_filter_block(&mut self) -> EmitResult {
        let region = self
            .regions_active
            .last()
            .ok_or(EmitError::NoActiveExceptionRegion {
                operation: "begin_filter_block",
            })?;
        if region.has_clause(ClauseKind::Filter) {
            return Err(EmitError::DuplicateFilter);
        }
        self.close_current_clause()?;
        let clause = ExceptionClause {
            kind: ClauseKind::Filter,
            catch_type: None,
            filter_start: self.offset(),
            handler_start: 0,
            handler_length: 0,
        };
        self.enter_clause(clause, RegionState::Filter, &[ValueKind::Object]);
        Ok(())
    }

    /// Ends the filter predicate, popping its 32-bit verdict; the filter's
    /// handler follows immediately, entered with the exception on the stack.
    pub fn end_filter(&mut self) -> EmitResult {
        let in_filter = self
            .regions_active
            .last()
            .is_some_and(|region| region.state == RegionState::Filter);
        if !in_filter {
            return Err(EmitError::MisplacedEndFilter);
        }
        self.instruction_start()?;
        self.pop_value(KindSet::INT32)?;
        let at = self.write_extended(ExtOpcode::Endfilter);
        self.finish(at, ExtOpcode::Endfilter.into());
        let offset = self.offset();
        let region = self.regions_active.last_mut().expect("filter state checked above");
        region.state = RegionState::FilterHandler;
        let clause = region.clauses.last_mut().expect("filter clause in progress");
        clause.handler_start = offset;
        self.replace_stack_with(&[ValueKind::Object]);
        Ok(())
    }

    fn emit_end_finally_op(&mut self) -> EmitResult {
        self.instruction_start()?;
        self.clear_stack();
        let at = self.write_primary(Opcode::Endfinally);
        self.indeterminate = true;
        self.finish(at, Opcode::Endfinally.into());
        Ok(())
    }

    /// Terminates the finally clause in progress; the stack is discarded.
    pub fn end_finally(&mut self) -> EmitResult {
        let in_finally = self
            .regions_active
            .last()
            .is_some_and(|region| matches!(region.state, RegionState::Finally | RegionState::Fault));
        if !in_finally {
            return Err(EmitError::MisplacedEndFinally);
        }
        self.emit_end_finally_op()
    }

    /// Closes the top exception region: terminates its last clause, defines
    /// the end label here, and moves the region to the done list.
    pub fn end_exception_block(&mut self) -> EmitResult {
        let region = self
            .regions_active
            .last()
            .ok_or(EmitError::NoActiveExceptionRegion {
                operation: "end_exception_block",
            })?;
        if region.clauses.is_empty() && region.state == RegionState::Try {
            return Err(EmitError::EmptyExceptionRegion);
        }
        self.close_current_clause()?;
        let region = self.regions_active.pop().expect("region checked above");
        self.define_label_position(region.end_label)?;
        let offset = self.offset();
        self.regions_done.push(region);
        self.tracer.on_region(RegionEvent::End, offset);
        Ok(())
    }

    // ===== miscellany =====

    /// Emits a debugger breakpoint.
    pub fn breakpoint(&mut self) -> EmitResult {
        self.instruction_start()?;
        let at = self.write_primary(Opcode::Break);
        self.finish(at, Opcode::Break.into());
        Ok(())
    }

    /// Emits a no-op.
    pub fn no_operation(&mut self) -> EmitResult {
        self.instruction_start()?;
        let at = self.write_primary(Opcode::Nop);
        self.finish(at, Opcode::Nop.into());
        Ok(())
    }

    // ===== completion =====

    /// Finalizes the routine: patches every queued branch fix-up, verifies
    /// the region stack and evaluation stack are clean, and yields the byte
    /// stream with its loader metadata.
    pub fn complete(mut self) -> EmitResult<EmittedBody> {
        if !self.regions_active.is_empty() {
            return Err(EmitError::UnclosedExceptionRegion {
                open: self.regions_active.len(),
            });
        }
        for fixup in std::mem::take(&mut self.fixups) {
            let target = self.labels[fixup.label.index()]
                .offset
                .ok_or(EmitError::UndefinedLabel {
                    label: fixup.label.raw(),
                })?;
            let displacement = i64::from(target) - i64::from(fixup.next_instruction_offset);
            let bytes = (displacement as i32).to_le_bytes();
            let position = fixup.write_position as usize;
            self.code[position..position + usize::from(fixup.length)].copy_from_slice(&bytes);
        }
        if !self.indeterminate && self.stack_depth != 0 {
            return Err(EmitError::UnbalancedStack {
                depth: self.stack_depth,
            });
        }
        Ok(EmittedBody {
            bytes: self.code,
            max_stack: self.max_stack,
            local_signature: self.locals.signature_blob(),
            exception_table: serialize_exception_table(&self.regions_done),
            location_table: self.location_table,
            local_names: self.locals.names().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checked_config() -> EmitterConfig {
        EmitterConfig {
            checked: true,
            arg_kinds: vec![ValueKind::Object, ValueKind::Object, ValueKind::Object],
            return_kind: Some(ValueKind::Object),
            track_locations: false,
        }
    }

    fn void_config() -> EmitterConfig {
        EmitterConfig {
            checked: true,
            arg_kinds: Vec::new(),
            return_kind: None,
            track_locations: false,
        }
    }

    #[test]
    fn shortest_int32_encodings() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        em.load_int32(-1).unwrap();
        em.load_int32(0).unwrap();
        em.load_int32(8).unwrap();
        em.load_int32(9).unwrap();
        em.load_int32(-128).unwrap();
        em.load_int32(128).unwrap();
        for _ in 0..6 {
            em.pop().unwrap();
        }
        let body = em.complete().unwrap();
        assert_eq!(
            &body.bytes[..11],
            &[
                Opcode::LdcI4M1 as u8,
                Opcode::LdcI40 as u8,
                Opcode::LdcI48 as u8,
                Opcode::LdcI4S as u8,
                9,
                Opcode::LdcI4S as u8,
                0x80, // -128 as a signed byte
                Opcode::LdcI4 as u8,
                0x80,
                0,
                0,
            ]
        );
        assert_eq!(body.max_stack, 6);
    }

    #[test]
    fn double_encoding_is_ieee_little_endian() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        em.load_double(1.5).unwrap();
        em.pop().unwrap();
        let body = em.complete().unwrap();
        assert_eq!(body.bytes[0], Opcode::LdcR8 as u8);
        assert_eq!(&body.bytes[1..9], &1.5f64.to_bits().to_le_bytes());
    }

    #[test]
    fn local_access_form_selection() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        let mut locals = Vec::new();
        for _ in 0..300 {
            locals.push(em.declare_variable(ValueKind::Int32, None).unwrap());
        }
        em.load_variable(locals[0]).unwrap();
        em.load_variable(locals[3]).unwrap();
        em.load_variable(locals[4]).unwrap();
        em.load_variable(locals[256]).unwrap();
        for _ in 0..4 {
            em.pop().unwrap();
        }
        let body = em.complete().unwrap();
        assert_eq!(
            &body.bytes[..8],
            &[
                Opcode::Ldloc0 as u8,
                Opcode::Ldloc3 as u8,
                Opcode::LdlocS as u8,
                4,
                EXTENDED_PREFIX,
                ExtOpcode::Ldloc as u8,
                0,
                1, // 256 little-endian
            ]
        );
    }

    #[test]
    fn forward_branch_is_patched_at_complete() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        let label = em.create_label();
        em.branch(label).unwrap();
        em.define_label_position(label).unwrap();
        em.no_operation().unwrap();
        let body = em.complete().unwrap();
        // br at 0, operand at 1..5, next instruction at 5, target 5: +0
        assert_eq!(body.bytes, vec![Opcode::Br as u8, 0, 0, 0, 0, Opcode::Nop as u8]);
    }

    #[test]
    fn backward_branch_has_negative_displacement() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        let top = em.create_label();
        em.define_label_position(top).unwrap();
        em.no_operation().unwrap();
        em.branch(top).unwrap();
        let done = em.create_label();
        em.define_label_position(done).unwrap();
        let body = em.complete().unwrap();
        // br at 1, next instruction at 6, target 0: -6
        assert_eq!(
            body.bytes,
            vec![
                Opcode::Nop as u8,
                Opcode::Br as u8,
                0xFA,
                0xFF,
                0xFF,
                0xFF,
            ]
        );
    }

    #[test]
    fn conditional_branch_records_stack_state() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        let label = em.create_label();
        em.load_int32(1).unwrap();
        em.load_int32(0).unwrap();
        em.branch_if_not_zero(label).unwrap();
        // branch taken with one int32 on the stack; reaching the label with
        // a different depth must fail
        em.pop().unwrap();
        let err = em.define_label_position(label).unwrap_err();
        assert_eq!(
            err,
            EmitError::StackMismatch {
                label: 0,
                expected_depth: 1,
                actual_depth: 0,
            }
        );
    }

    #[test]
    fn undefined_label_fails_at_complete() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        let label = em.create_label();
        em.branch(label).unwrap();
        let err = em.complete().unwrap_err();
        assert_eq!(err, EmitError::UndefinedLabel { label: 0 });
    }

    #[test]
    fn double_defined_label_is_rejected() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        let label = em.create_label();
        em.define_label_position(label).unwrap();
        let err = em.define_label_position(label).unwrap_err();
        assert_eq!(err, EmitError::DoubleDefinedLabel { label: 0 });
    }

    #[test]
    fn add_requires_two_operands() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        em.load_int32(1).unwrap();
        let err = em.add().unwrap_err();
        assert!(matches!(err, EmitError::StackUnderflow { .. }));
    }

    #[test]
    fn add_requires_matching_kinds() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        em.load_int32(1).unwrap();
        em.load_int32(2).unwrap();
        em.add().unwrap();
        em.pop().unwrap();
        em.complete().unwrap();

        // float under int32: the second pop expects int32
        let mut em = CodeEmitter::new(&tokens, void_config());
        em.load_double(1.0).unwrap();
        em.load_int32(2).unwrap();
        let err = em.add().unwrap_err();
        assert!(matches!(
            err,
            EmitError::KindMismatch {
                actual: ValueKind::Float,
                ..
            }
        ));
    }

    #[test]
    fn bitwise_rejects_floats() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        em.load_double(1.0).unwrap();
        em.load_double(2.0).unwrap();
        let err = em.bitwise_and().unwrap_err();
        assert!(matches!(err, EmitError::KindMismatch { .. }));
    }

    #[test]
    fn emission_after_terminator_is_rejected() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        let label = em.create_label();
        em.branch(label).unwrap();
        let err = em.load_int32(1).unwrap_err();
        assert!(matches!(err, EmitError::UnreachableEmission { .. }));
    }

    #[test]
    fn label_definition_restores_indeterminate_stack() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        let label = em.create_label();
        em.load_int32(7).unwrap();
        em.branch(label).unwrap();
        assert!(em.is_indeterminate());
        em.define_label_position(label).unwrap();
        assert!(!em.is_indeterminate());
        assert_eq!(em.stack_depth(), 1);
        em.pop().unwrap();
        em.complete().unwrap();
    }

    #[test]
    fn return_pops_the_declared_kind() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, checked_config());
        em.load_null().unwrap();
        em.return_value().unwrap();
        let body = em.complete().unwrap();
        assert_eq!(body.bytes, vec![Opcode::Ldnull as u8, Opcode::Ret as u8]);
        assert_eq!(body.max_stack, 1);
    }

    #[test]
    fn switch_emits_count_and_relative_offsets() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        let first = em.create_label();
        let second = em.create_label();
        let done = em.create_label();
        em.load_int32(0).unwrap();
        em.switch(&[first, second]).unwrap();
        em.branch(done).unwrap();
        em.define_label_position(first).unwrap();
        em.branch(done).unwrap();
        em.define_label_position(second).unwrap();
        em.branch(done).unwrap();
        em.define_label_position(done).unwrap();
        let body = em.complete().unwrap();
        // layout: ldc.i4.0 (1) switch (1+4+8) br (5) L1: br (5) L2: br (5)
        let table_end = 1 + 1 + 4 + 8;
        assert_eq!(body.bytes[1], Opcode::Switch as u8);
        assert_eq!(&body.bytes[2..6], &2u32.to_le_bytes());
        let first_entry = i32::from_le_bytes(body.bytes[6..10].try_into().unwrap());
        let second_entry = i32::from_le_bytes(body.bytes[10..14].try_into().unwrap());
        // first target sits 5 bytes past the table (after the default br)
        assert_eq!(first_entry, 5);
        assert_eq!(second_entry, 10);
        assert_eq!(body.bytes[table_end], Opcode::Br as u8);
    }

    #[test]
    fn complete_rejects_leftover_stack() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        em.load_int32(1).unwrap();
        let err = em.complete().unwrap_err();
        assert_eq!(err, EmitError::UnbalancedStack { depth: 1 });
    }

    #[test]
    fn stelem_shares_the_signed_opcode_for_unsigned_elements() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        em.load_null().unwrap(); // array
        em.load_int32(0).unwrap(); // index
        em.load_int32(1).unwrap();
        em.convert_to_long().unwrap(); // value as int64
        em.store_array_element(ElementType::UInt64).unwrap();
        em.load_null().unwrap();
        em.load_int32(0).unwrap();
        em.load_array_element(ElementType::UInt64).unwrap();
        em.pop().unwrap();
        let body = em.complete().unwrap();
        assert!(body.bytes.contains(&(Opcode::StelemI8 as u8)));
        assert!(body.bytes.contains(&(Opcode::LdelemI8 as u8)));
    }

    #[test]
    fn argument_index_out_of_range() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, checked_config());
        let err = em.load_argument(3).unwrap_err();
        assert_eq!(err, EmitError::TooManyArguments { index: 3, declared: 3 });
    }

    #[test]
    fn call_validates_argument_kinds() {
        let mut tokens = TokenTable::new();
        let runtime = tokens.define_type("runtime", KindSet::NONE);
        let helper = tokens.define_method(
            runtime,
            "to_number",
            &[ValueKind::Object],
            Some(ValueKind::Float),
            MethodFlavor::Static,
        );
        let mut em = CodeEmitter::new(&tokens, void_config());
        em.load_int32(1).unwrap();
        let err = em.call_static(helper).unwrap_err();
        assert!(matches!(
            err,
            EmitError::KindMismatch {
                actual: ValueKind::Int32,
                ..
            }
        ));

        let mut em = CodeEmitter::new(&tokens, void_config());
        em.load_null().unwrap();
        em.call_static(helper).unwrap();
        assert_eq!(em.stack_depth(), 1);
        em.pop().unwrap();
        em.complete().unwrap();
    }

    #[test]
    fn reference_casts_preserve_object_kind() {
        let mut tokens = TokenTable::new();
        let function_type = tokens.define_type("function", KindSet::NONE);
        let mut em = CodeEmitter::new(&tokens, void_config());
        em.load_null().unwrap();
        em.is_instance(function_type).unwrap();
        em.cast_class(function_type).unwrap();
        em.pop().unwrap();
        let body = em.complete().unwrap();
        assert_eq!(body.bytes[0], Opcode::Ldnull as u8);
        assert_eq!(body.bytes[1], Opcode::Isinst as u8);
        assert_eq!(body.bytes[6], Opcode::Castclass as u8);
        assert_eq!(body.bytes[11], Opcode::Pop as u8);
    }

    #[test]
    fn address_loads_push_managed_pointers() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, checked_config());
        em.breakpoint().unwrap();
        let slot = em.declare_variable(ValueKind::Int32, None).unwrap();
        em.load_address_of_variable(slot).unwrap();
        em.pop().unwrap();
        em.load_address_of_argument(1).unwrap();
        em.pop().unwrap();
        let body = em.complete().unwrap();
        assert_eq!(
            body.bytes,
            vec![
                Opcode::Break as u8,
                Opcode::LdlocaS as u8,
                0,
                Opcode::Pop as u8,
                Opcode::LdargaS as u8,
                1,
                Opcode::Pop as u8,
            ]
        );
    }

    #[test]
    fn unclosed_region_fails_at_complete() {
        let tokens = TokenTable::new();
        let mut em = CodeEmitter::new(&tokens, void_config());
        em.begin_exception_block().unwrap();
        em.no_operation().unwrap();
        let err = em.complete().unwrap_err();
        assert_eq!(err, EmitError::UnclosedExceptionRegion { open: 1 });
    }
}
