//! Expression nodes and their code generation.
//!
//! Every expression leaves exactly one value on the evaluation stack;
//! [`Expression::result_kind`] reports its kind so parent nodes can pick
//! machine arithmetic over runtime helpers when both operands are
//! statically numeric. Comparisons in branch position fuse into
//! compare-and-branch instructions instead of materializing a boolean.

use crate::{
    codegen::{ElementType, EmitResult, LabelId, ValueKind},
    generator::CodegenContext,
    intern::StringId,
    runtime::{ARG_SCOPE, ARG_THIS},
    tracer::CodegenTracer,
};

use super::FunctionLiteral;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Negate,
    /// `!` — boolean negation.
    LogicalNot,
    /// `~` — 32-bit complement.
    BitwiseNot,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    ShiftLeft,
    ShiftRight,
    ShiftRightUnsigned,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    LessThan,
    GreaterThan,
    LessOrEqual,
    GreaterOrEqual,
    LogicalAnd,
    LogicalOr,
}

/// An expression node.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Expression {
    Null,
    Boolean(bool),
    Number(f64),
    Str(StringId),
    This,
    /// A name resolved through the scope chain.
    Name(StringId),
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// `target = value` or a compound form like `target += value`.
    Assignment {
        target: StringId,
        op: Option<BinaryOp>,
        value: Box<Expression>,
    },
    Call {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
    },
    /// A function expression; compiles into a nested routine closed over
    /// the live scope chain.
    Function(FunctionLiteral),
}

/// The i32 a number literal denotes, when it denotes one exactly.
/// Negative zero is excluded: it is not representable as an int32.
pub(crate) fn int32_literal(value: f64) -> Option<i32> {
    if value.fract() == 0.0
        && value >= f64::from(i32::MIN)
        && value <= f64::from(i32::MAX)
        && !(value == 0.0 && value.is_sign_negative())
    {
        Some(value as i32)
    } else {
        None
    }
}

fn is_numeric(kind: ValueKind) -> bool {
    matches!(kind, ValueKind::Int32 | ValueKind::Float)
}

/// Emits both operands with unified kinds: the int32 path when both are
/// statically int32, the float path (with numeric coercion) otherwise.
/// Returns the shared kind.
fn generate_numeric_pair<Tr: CodegenTracer>(
    left: &Expression,
    right: &Expression,
    ctx: &mut CodegenContext<'_, '_, Tr>,
) -> EmitResult<ValueKind> {
    if left.result_kind() == ValueKind::Int32 && right.result_kind() == ValueKind::Int32 {
        left.generate_code(ctx)?;
        right.generate_code(ctx)?;
        Ok(ValueKind::Int32)
    } else {
        left.generate_as_number(ctx)?;
        right.generate_as_number(ctx)?;
        Ok(ValueKind::Float)
    }
}

impl Expression {
    /// The kind of value this expression leaves on the stack.
    #[must_use]
    pub fn result_kind(&self) -> ValueKind {
        match self {
            Self::Null | Self::Str(_) | Self::This | Self::Name(_) | Self::Call { .. } | Self::Function(_) => {
                ValueKind::Object
            }
            Self::Boolean(_) => ValueKind::Int32,
            Self::Number(value) => {
                if int32_literal(*value).is_some() {
                    ValueKind::Int32
                } else {
                    ValueKind::Float
                }
            }
            Self::Unary { op, operand } => match op {
                UnaryOp::Negate => match operand.result_kind() {
                    ValueKind::Int32 => ValueKind::Int32,
                    _ => ValueKind::Float,
                },
                UnaryOp::LogicalNot | UnaryOp::BitwiseNot => ValueKind::Int32,
            },
            Self::Binary { op, left, right } => match op {
                BinaryOp::Add => match (left.result_kind(), right.result_kind()) {
                    (ValueKind::Int32, ValueKind::Int32) => ValueKind::Int32,
                    (lk, rk) if is_numeric(lk) && is_numeric(rk) => ValueKind::Float,
                    _ => ValueKind::Object,
                },
                BinaryOp::Subtract | BinaryOp::Remainder => {
                    match (left.result_kind(), right.result_kind()) {
                        (ValueKind::Int32, ValueKind::Int32) => ValueKind::Int32,
                        _ => ValueKind::Float,
                    }
                }
                BinaryOp::Multiply | BinaryOp::Divide => ValueKind::Float,
                BinaryOp::BitwiseAnd
                | BinaryOp::BitwiseOr
                | BinaryOp::BitwiseXor
                | BinaryOp::ShiftLeft
                | BinaryOp::ShiftRight
                | BinaryOp::ShiftRightUnsigned => ValueKind::Int32,
                BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::StrictEqual
                | BinaryOp::StrictNotEqual
                | BinaryOp::LessThan
                | BinaryOp::GreaterThan
                | BinaryOp::LessOrEqual
                | BinaryOp::GreaterOrEqual => ValueKind::Int32,
                BinaryOp::LogicalAnd | BinaryOp::LogicalOr => ValueKind::Object,
            },
            Self::Assignment { .. } => ValueKind::Object,
        }
    }

    /// Whether an int32 result denotes a boolean rather than a number,
    /// which decides the boxing type.
    fn is_boolean_valued(&self) -> bool {
        match self {
            Self::Boolean(_) => true,
            Self::Unary {
                op: UnaryOp::LogicalNot,
                ..
            } => true,
            Self::Binary { op, .. } => matches!(
                op,
                BinaryOp::Equal
                    | BinaryOp::NotEqual
                    | BinaryOp::StrictEqual
                    | BinaryOp::StrictNotEqual
                    | BinaryOp::LessThan
                    | BinaryOp::GreaterThan
                    | BinaryOp::LessOrEqual
                    | BinaryOp::GreaterOrEqual
            ),
            _ => false,
        }
    }

    /// Emits this expression, leaving its [`result_kind`](Self::result_kind)
    /// value on the stack.
    pub(crate) fn generate_code<Tr: CodegenTracer>(&self, ctx: &mut CodegenContext<'_, '_, Tr>) -> EmitResult {
        match self {
            Self::Null => ctx.emitter.load_null(),
            Self::Boolean(value) => ctx.emitter.load_boolean(*value),
            Self::Number(value) => match int32_literal(*value) {
                Some(int) => ctx.emitter.load_int32(int),
                None => ctx.emitter.load_double(*value),
            },
            Self::Str(id) => ctx.emitter.load_string(*id),
            Self::This => ctx.emitter.load_argument(ARG_THIS),
            Self::Name(name) => ctx.build_get(*name),
            Self::Unary { op, operand } => match op {
                UnaryOp::Negate => {
                    match operand.result_kind() {
                        ValueKind::Int32 | ValueKind::Float => operand.generate_code(ctx)?,
                        _ => operand.generate_as_number(ctx)?,
                    }
                    ctx.emitter.negate()
                }
                UnaryOp::LogicalNot => {
                    operand.generate_condition_value(ctx)?;
                    ctx.emitter.load_int32(0)?;
                    ctx.emitter.compare_equal()
                }
                UnaryOp::BitwiseNot => {
                    operand.generate_as_int32(ctx)?;
                    ctx.emitter.bitwise_not()
                }
            },
            Self::Binary { op, left, right } => generate_binary(*op, left, right, ctx),
            Self::Assignment { target, op, value } => {
                match op {
                    None => value.generate_boxed(ctx)?,
                    Some(op) => {
                        let expanded = Self::Binary {
                            op: *op,
                            left: Box::new(Self::Name(*target)),
                            right: value.clone(),
                        };
                        expanded.generate_boxed(ctx)?;
                    }
                }
                ctx.emitter.duplicate()?;
                ctx.build_set(*target)
            }
            Self::Call { callee, arguments } => {
                match &**callee {
                    Self::Name(name) => ctx.build_call_target(*name)?,
                    other => {
                        ctx.emit_default_receiver()?;
                        other.generate_boxed(ctx)?;
                    }
                }
                ctx.emitter
                    .load_int32(i32::try_from(arguments.len()).expect("argument count exceeds i32"))?;
                ctx.emitter.new_array(ctx.runtime.types.object)?;
                for (index, argument) in arguments.iter().enumerate() {
                    ctx.emitter.duplicate()?;
                    ctx.emitter
                        .load_int32(i32::try_from(index).expect("argument count exceeds i32"))?;
                    argument.generate_boxed(ctx)?;
                    ctx.emitter.store_array_element(ElementType::Object)?;
                }
                ctx.emitter.call_static(ctx.runtime.methods.call_function)
            }
            Self::Function(literal) => {
                let id = ctx.compile_inner(literal)?;
                ctx.emitter.load_argument(ARG_SCOPE)?;
                ctx.emitter.load_int32(id)?;
                ctx.emitter.call_static(ctx.runtime.methods.create_function)
            }
        }
    }

    /// Emits this expression boxed into an object reference: int32 and
    /// float results box as numbers (or booleans for boolean-valued
    /// expressions); object results pass through.
    pub(crate) fn generate_boxed<Tr: CodegenTracer>(&self, ctx: &mut CodegenContext<'_, '_, Tr>) -> EmitResult {
        self.generate_code(ctx)?;
        match self.result_kind() {
            ValueKind::Object => Ok(()),
            ValueKind::Int32 | ValueKind::Float => {
                let boxed_type = if self.is_boolean_valued() {
                    ctx.runtime.types.boolean
                } else {
                    ctx.runtime.types.number
                };
                ctx.emitter.box_value(boxed_type)
            }
            kind => unreachable!("script expressions never produce {} values", kind.name()),
        }
    }
}

fn generate_binary<Tr: CodegenTracer>(
    op: BinaryOp,
    left: &Expression,
    right: &Expression,
    ctx: &mut CodegenContext<'_, '_, Tr>,
) -> EmitResult {
    match op {
        BinaryOp::Add => {
            if is_numeric(left.result_kind()) && is_numeric(right.result_kind()) {
                generate_numeric_pair(left, right, ctx)?;
                ctx.emitter.add()
            } else {
                left.generate_boxed(ctx)?;
                right.generate_boxed(ctx)?;
                ctx.emitter.call_static(ctx.runtime.methods.add_values)
            }
        }
        BinaryOp::Subtract => {
            generate_numeric_pair(left, right, ctx)?;
            ctx.emitter.subtract()
        }
        BinaryOp::Remainder => {
            generate_numeric_pair(left, right, ctx)?;
            ctx.emitter.remainder()
        }
        BinaryOp::Multiply => {
            left.generate_as_number(ctx)?;
            right.generate_as_number(ctx)?;
            ctx.emitter.multiply()
        }
        BinaryOp::Divide => {
            left.generate_as_number(ctx)?;
            right.generate_as_number(ctx)?;
            ctx.emitter.divide()
        }
        BinaryOp::BitwiseAnd => {
            left.generate_as_int32(ctx)?;
            right.generate_as_int32(ctx)?;
            ctx.emitter.bitwise_and()
        }
        BinaryOp::BitwiseOr => {
            left.generate_as_int32(ctx)?;
            right.generate_as_int32(ctx)?;
            ctx.emitter.bitwise_or()
        }
        BinaryOp::BitwiseXor => {
            left.generate_as_int32(ctx)?;
            right.generate_as_int32(ctx)?;
            ctx.emitter.bitwise_xor()
        }
        BinaryOp::ShiftLeft => {
            left.generate_as_int32(ctx)?;
            right.generate_as_int32(ctx)?;
            ctx.emitter.shift_left()
        }
        BinaryOp::ShiftRight => {
            left.generate_as_int32(ctx)?;
            right.generate_as_int32(ctx)?;
            ctx.emitter.shift_right()
        }
        BinaryOp::ShiftRightUnsigned => {
            left.generate_as_uint32(ctx)?;
            right.generate_as_int32(ctx)?;
            ctx.emitter.shift_right_unsigned()
        }
        BinaryOp::Equal | BinaryOp::NotEqual => {
            if is_numeric(left.result_kind()) && is_numeric(right.result_kind()) {
                generate_numeric_pair(left, right, ctx)?;
                ctx.emitter.compare_equal()?;
            } else {
                left.generate_boxed(ctx)?;
                right.generate_boxed(ctx)?;
                ctx.emitter.call_static(ctx.runtime.methods.equals)?;
            }
            if op == BinaryOp::NotEqual {
                ctx.emitter.load_int32(0)?;
                ctx.emitter.compare_equal()?;
            }
            Ok(())
        }
        BinaryOp::StrictEqual | BinaryOp::StrictNotEqual => {
            if is_numeric(left.result_kind()) && is_numeric(right.result_kind()) {
                generate_numeric_pair(left, right, ctx)?;
                ctx.emitter.compare_equal()?;
            } else {
                left.generate_boxed(ctx)?;
                right.generate_boxed(ctx)?;
                ctx.emitter.call_static(ctx.runtime.methods.strict_equals)?;
            }
            if op == BinaryOp::StrictNotEqual {
                ctx.emitter.load_int32(0)?;
                ctx.emitter.compare_equal()?;
            }
            Ok(())
        }
        BinaryOp::LessThan => {
            generate_numeric_pair(left, right, ctx)?;
            ctx.emitter.compare_less_than()
        }
        BinaryOp::GreaterThan => {
            generate_numeric_pair(left, right, ctx)?;
            ctx.emitter.compare_greater_than()
        }
        BinaryOp::LessOrEqual => {
            // a <= b compiles as !(a > b); the unsigned form keeps the
            // comparison false on NaN for floats
            let kind = generate_numeric_pair(left, right, ctx)?;
            if kind == ValueKind::Float {
                ctx.emitter.compare_greater_than_unsigned()?;
            } else {
                ctx.emitter.compare_greater_than()?;
            }
            ctx.emitter.load_int32(0)?;
            ctx.emitter.compare_equal()
        }
        BinaryOp::GreaterOrEqual => {
            let kind = generate_numeric_pair(left, right, ctx)?;
            if kind == ValueKind::Float {
                ctx.emitter.compare_less_than_unsigned()?;
            } else {
                ctx.emitter.compare_less_than()?;
            }
            ctx.emitter.load_int32(0)?;
            ctx.emitter.compare_equal()
        }
        BinaryOp::LogicalAnd => {
            left.generate_boxed(ctx)?;
            let end = ctx.emitter.create_label();
            ctx.emitter.duplicate()?;
            ctx.emitter.call_static(ctx.runtime.methods.to_boolean)?;
            ctx.emitter.branch_if_zero(end)?;
            ctx.emitter.pop()?;
            right.generate_boxed(ctx)?;
            ctx.emitter.define_label_position(end)
        }
        BinaryOp::LogicalOr => {
            left.generate_boxed(ctx)?;
            let end = ctx.emitter.create_label();
            ctx.emitter.duplicate()?;
            ctx.emitter.call_static(ctx.runtime.methods.to_boolean)?;
            ctx.emitter.branch_if_not_zero(end)?;
            ctx.emitter.pop()?;
            right.generate_boxed(ctx)?;
            ctx.emitter.define_label_position(end)
        }
    }
}

impl Expression {
    /// Emits this expression coerced to a float.
    pub(crate) fn generate_as_number<Tr: CodegenTracer>(&self, ctx: &mut CodegenContext<'_, '_, Tr>) -> EmitResult {
        match self.result_kind() {
            ValueKind::Float => self.generate_code(ctx),
            ValueKind::Int32 => {
                self.generate_code(ctx)?;
                ctx.emitter.convert_to_double()
            }
            _ => {
                self.generate_boxed(ctx)?;
                ctx.emitter.call_static(ctx.runtime.methods.to_number)
            }
        }
    }

    /// Emits this expression coerced to a 32-bit integer.
    pub(crate) fn generate_as_int32<Tr: CodegenTracer>(&self, ctx: &mut CodegenContext<'_, '_, Tr>) -> EmitResult {
        match self.result_kind() {
            ValueKind::Int32 => self.generate_code(ctx),
            ValueKind::Float => {
                self.generate_code(ctx)?;
                ctx.emitter.convert_to_integer()
            }
            _ => {
                self.generate_boxed(ctx)?;
                ctx.emitter.call_static(ctx.runtime.methods.to_int32)
            }
        }
    }

    /// Emits this expression coerced to an unsigned 32-bit integer.
    pub(crate) fn generate_as_uint32<Tr: CodegenTracer>(&self, ctx: &mut CodegenContext<'_, '_, Tr>) -> EmitResult {
        match self.result_kind() {
            ValueKind::Int32 => self.generate_code(ctx),
            ValueKind::Float => {
                self.generate_code(ctx)?;
                ctx.emitter.convert_to_unsigned_integer()
            }
            _ => {
                self.generate_boxed(ctx)?;
                ctx.emitter.call_static(ctx.runtime.methods.to_uint32)
            }
        }
    }

    /// Emits this expression as a truthiness test, leaving 0 or 1.
    pub(crate) fn generate_condition_value<Tr: CodegenTracer>(
        &self,
        ctx: &mut CodegenContext<'_, '_, Tr>,
    ) -> EmitResult {
        match self.result_kind() {
            ValueKind::Int32 => self.generate_code(ctx),
            _ => {
                self.generate_boxed(ctx)?;
                ctx.emitter.call_static(ctx.runtime.methods.to_boolean)
            }
        }
    }

    /// Emits this expression in branch position: comparisons fuse into a
    /// compare-and-branch instruction; everything else materializes a
    /// truthiness value and branches on it.
    ///
    /// `jump_when` selects which outcome takes the branch, so statement
    /// codegen can jump on false without an extra negation.
    pub(crate) fn generate_branch<Tr: CodegenTracer>(
        &self,
        ctx: &mut CodegenContext<'_, '_, Tr>,
        target: LabelId,
        jump_when: bool,
    ) -> EmitResult {
        if let Self::Binary { op, left, right } = self {
            let relational = matches!(
                op,
                BinaryOp::LessThan | BinaryOp::GreaterThan | BinaryOp::LessOrEqual | BinaryOp::GreaterOrEqual
            );
            let numeric_equality = matches!(
                op,
                BinaryOp::Equal | BinaryOp::NotEqual | BinaryOp::StrictEqual | BinaryOp::StrictNotEqual
            ) && is_numeric(left.result_kind())
                && is_numeric(right.result_kind());
            if relational || numeric_equality {
                let kind = generate_numeric_pair(left, right, ctx)?;
                let float = kind == ValueKind::Float;
                // Negated float comparisons use the unordered forms so NaN
                // takes the branch, matching the operator's falseness
                return match (op, jump_when) {
                    (BinaryOp::LessThan, true) => ctx.emitter.branch_if_less(target),
                    (BinaryOp::LessThan, false) if float => ctx.emitter.branch_if_greater_or_equal_unsigned(target),
                    (BinaryOp::LessThan, false) => ctx.emitter.branch_if_greater_or_equal(target),
                    (BinaryOp::GreaterThan, true) => ctx.emitter.branch_if_greater(target),
                    (BinaryOp::GreaterThan, false) if float => ctx.emitter.branch_if_less_or_equal_unsigned(target),
                    (BinaryOp::GreaterThan, false) => ctx.emitter.branch_if_less_or_equal(target),
                    (BinaryOp::LessOrEqual, true) => ctx.emitter.branch_if_less_or_equal(target),
                    (BinaryOp::LessOrEqual, false) if float => ctx.emitter.branch_if_greater_unsigned(target),
                    (BinaryOp::LessOrEqual, false) => ctx.emitter.branch_if_greater(target),
                    (BinaryOp::GreaterOrEqual, true) => ctx.emitter.branch_if_greater_or_equal(target),
                    (BinaryOp::GreaterOrEqual, false) if float => ctx.emitter.branch_if_less_unsigned(target),
                    (BinaryOp::GreaterOrEqual, false) => ctx.emitter.branch_if_less(target),
                    (BinaryOp::Equal | BinaryOp::StrictEqual, true) => ctx.emitter.branch_if_equal(target),
                    (BinaryOp::Equal | BinaryOp::StrictEqual, false) => ctx.emitter.branch_if_not_equal(target),
                    (BinaryOp::NotEqual | BinaryOp::StrictNotEqual, true) => ctx.emitter.branch_if_not_equal(target),
                    (BinaryOp::NotEqual | BinaryOp::StrictNotEqual, false) => ctx.emitter.branch_if_equal(target),
                    _ => unreachable!("branch fusion covers exactly the comparison operators"),
                };
            }
        }
        self.generate_condition_value(ctx)?;
        if jump_when {
            ctx.emitter.branch_if_not_zero(target)
        } else {
            ctx.emitter.branch_if_zero(target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_literal_range() {
        assert_eq!(int32_literal(0.0), Some(0));
        assert_eq!(int32_literal(-1.0), Some(-1));
        assert_eq!(int32_literal(2147483647.0), Some(i32::MAX));
        assert_eq!(int32_literal(2147483648.0), None);
        assert_eq!(int32_literal(1.5), None);
        assert_eq!(int32_literal(-0.0), None);
        assert_eq!(int32_literal(f64::NAN), None);
    }

    #[test]
    fn result_kinds() {
        let one = Expression::Number(1.0);
        let half = Expression::Number(0.5);
        assert_eq!(one.result_kind(), ValueKind::Int32);
        assert_eq!(half.result_kind(), ValueKind::Float);

        let sum = Expression::Binary {
            op: BinaryOp::Add,
            left: Box::new(one.clone()),
            right: Box::new(Expression::Number(2.0)),
        };
        assert_eq!(sum.result_kind(), ValueKind::Int32);

        let mixed = Expression::Binary {
            op: BinaryOp::Add,
            left: Box::new(one.clone()),
            right: Box::new(half),
        };
        assert_eq!(mixed.result_kind(), ValueKind::Float);

        let concat = Expression::Binary {
            op: BinaryOp::Add,
            left: Box::new(one.clone()),
            right: Box::new(Expression::Null),
        };
        assert_eq!(concat.result_kind(), ValueKind::Object);

        let compare = Expression::Binary {
            op: BinaryOp::LessThan,
            left: Box::new(one),
            right: Box::new(Expression::Number(2.0)),
        };
        assert_eq!(compare.result_kind(), ValueKind::Int32);
        assert!(compare.is_boolean_valued());
    }
}
