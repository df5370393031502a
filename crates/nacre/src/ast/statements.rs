//! Statement nodes and their code generation.
//!
//! Statements begin and end with an empty evaluation stack. Loops compile
//! test-at-bottom (one unconditional entry branch, one conditional
//! back-edge); `break` and `continue` always compile to `leave`, so exits
//! that cross protected regions are uniformly legal. Code after a
//! terminator inside a statement list is unreachable and skipped.

use crate::{
    codegen::{ElementType, EmitResult, LabelId, ValueKind},
    generator::{CodegenContext, LoopTargets},
    intern::StringId,
    parse::SourceSpan,
    runtime::ARG_SCOPE,
    tracer::CodegenTracer,
};

use super::{Expression, FunctionLiteral, expressions::int32_literal};

/// The `catch` arm of a try statement.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CatchClause {
    /// Name the exception binds to, in its own one-slot scope.
    pub binding: StringId,
    pub body: Vec<Statement>,
}

/// One `case` (or `default`, when `test` is `None`) of a switch statement.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SwitchCase {
    pub test: Option<Expression>,
    pub body: Vec<Statement>,
}

/// The initializer clause of a for statement.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ForInit {
    VarDeclaration {
        declarations: Vec<(StringId, Option<Expression>)>,
    },
    Expression(Expression),
}

/// A statement node.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Statement {
    Empty,
    Expression(Expression),
    /// `var` declarations; the names are hoisted into the function scope,
    /// so only the initializers emit code here.
    VarDeclaration {
        declarations: Vec<(StringId, Option<Expression>)>,
    },
    /// Hoisted and bound in the routine prologue; emits nothing in place.
    FunctionDeclaration(FunctionLiteral),
    Block(Vec<Statement>),
    If {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    DoWhile {
        body: Box<Statement>,
        condition: Expression,
    },
    For {
        init: Option<ForInit>,
        condition: Option<Expression>,
        increment: Option<Expression>,
        body: Box<Statement>,
    },
    Return(Option<Expression>),
    Throw(Expression),
    Try {
        body: Vec<Statement>,
        catch: Option<CatchClause>,
        finally: Option<Vec<Statement>>,
    },
    With {
        object: Expression,
        body: Box<Statement>,
    },
    Switch {
        discriminant: Expression,
        cases: Vec<SwitchCase>,
    },
    Break,
    Continue,
    /// Source-range annotation produced by the parser; records the span
    /// for debug info and generates the inner statement.
    Spanned(SourceSpan, Box<Statement>),
}

/// Dense-switch eligibility: every `case` label is the integer literal
/// equal to its ordinal among the labeled cases, counting from zero, with
/// at most 64 entries. Such switches compile to a jump table.
fn dense_case_count(cases: &[SwitchCase]) -> Option<usize> {
    let mut next = 0usize;
    for case in cases {
        match &case.test {
            None => {}
            Some(Expression::Number(value)) if int32_literal(*value) == Some(next as i32) => next += 1,
            Some(_) => return None,
        }
    }
    (1..=64).contains(&next).then_some(next)
}

impl Statement {
    /// Emits the statements in order, dropping anything after a point where
    /// the stack became indeterminate (unreachable code).
    pub(crate) fn generate_list<Tr: CodegenTracer>(
        statements: &[Self],
        ctx: &mut CodegenContext<'_, '_, Tr>,
    ) -> EmitResult {
        for statement in statements {
            if ctx.emitter.is_indeterminate() {
                break;
            }
            statement.generate_code(ctx)?;
        }
        Ok(())
    }

    /// Emits this statement. The evaluation stack is empty before and
    /// after.
    pub(crate) fn generate_code<Tr: CodegenTracer>(&self, ctx: &mut CodegenContext<'_, '_, Tr>) -> EmitResult {
        match self {
            Self::Empty | Self::FunctionDeclaration(_) => Ok(()),
            Self::Expression(expression) => {
                expression.generate_code(ctx)?;
                ctx.emitter.pop()
            }
            Self::VarDeclaration { declarations } => {
                for (name, initializer) in declarations {
                    if let Some(initializer) = initializer {
                        initializer.generate_boxed(ctx)?;
                        ctx.build_set(*name)?;
                    }
                }
                Ok(())
            }
            Self::Block(body) => Self::generate_list(body, ctx),
            Self::If {
                condition,
                then_branch,
                else_branch,
            } => match else_branch {
                Some(else_branch) => {
                    let else_label = ctx.emitter.create_label();
                    let end = ctx.emitter.create_label();
                    condition.generate_branch(ctx, else_label, false)?;
                    then_branch.generate_code(ctx)?;
                    if !ctx.emitter.is_indeterminate() {
                        ctx.emitter.branch(end)?;
                    }
                    ctx.emitter.define_label_position(else_label)?;
                    else_branch.generate_code(ctx)?;
                    ctx.emitter.define_label_position(end)
                }
                None => {
                    let end = ctx.emitter.create_label();
                    condition.generate_branch(ctx, end, false)?;
                    then_branch.generate_code(ctx)?;
                    ctx.emitter.define_label_position(end)
                }
            },
            Self::While { condition, body } => {
                let condition_label = ctx.emitter.create_label();
                let body_label = ctx.emitter.create_label();
                let break_label = ctx.emitter.create_label();
                ctx.loop_targets.push(LoopTargets {
                    break_label,
                    continue_label: Some(condition_label),
                });
                ctx.emitter.branch(condition_label)?;
                ctx.emitter.define_label_position(body_label)?;
                body.generate_code(ctx)?;
                ctx.emitter.define_label_position(condition_label)?;
                condition.generate_branch(ctx, body_label, true)?;
                ctx.emitter.define_label_position(break_label)?;
                ctx.loop_targets.pop();
                Ok(())
            }
            Self::DoWhile { body, condition } => {
                let body_label = ctx.emitter.create_label();
                let condition_label = ctx.emitter.create_label();
                let break_label = ctx.emitter.create_label();
                ctx.loop_targets.push(LoopTargets {
                    break_label,
                    continue_label: Some(condition_label),
                });
                ctx.emitter.define_label_position(body_label)?;
                body.generate_code(ctx)?;
                ctx.emitter.define_label_position(condition_label)?;
                condition.generate_branch(ctx, body_label, true)?;
                ctx.emitter.define_label_position(break_label)?;
                ctx.loop_targets.pop();
                Ok(())
            }
            Self::For {
                init,
                condition,
                increment,
                body,
            } => {
                match init {
                    Some(ForInit::VarDeclaration { declarations }) => {
                        for (name, initializer) in declarations {
                            if let Some(initializer) = initializer {
                                initializer.generate_boxed(ctx)?;
                                ctx.build_set(*name)?;
                            }
                        }
                    }
                    Some(ForInit::Expression(expression)) => {
                        expression.generate_code(ctx)?;
                        ctx.emitter.pop()?;
                    }
                    None => {}
                }
                let condition_label = ctx.emitter.create_label();
                let body_label = ctx.emitter.create_label();
                let increment_label = ctx.emitter.create_label();
                let break_label = ctx.emitter.create_label();
                ctx.loop_targets.push(LoopTargets {
                    break_label,
                    continue_label: Some(increment_label),
                });
                ctx.emitter.branch(condition_label)?;
                ctx.emitter.define_label_position(body_label)?;
                body.generate_code(ctx)?;
                ctx.emitter.define_label_position(increment_label)?;
                if let Some(increment) = increment {
                    increment.generate_code(ctx)?;
                    ctx.emitter.pop()?;
                }
                ctx.emitter.define_label_position(condition_label)?;
                match condition {
                    Some(condition) => condition.generate_branch(ctx, body_label, true)?,
                    None => ctx.emitter.branch(body_label)?,
                }
                ctx.emitter.define_label_position(break_label)?;
                ctx.loop_targets.pop();
                Ok(())
            }
            Self::Return(value) => {
                match value {
                    Some(value) => value.generate_boxed(ctx)?,
                    None => ctx.emit_undefined()?,
                }
                if ctx.emitter.active_region_depth() > 0 {
                    // A return out of a protected region spills the value
                    // and leaves to the shared epilogue, which runs the
                    // finally clauses on the way
                    let (label, slot) = ctx.return_target()?;
                    ctx.emitter.store_variable(slot)?;
                    ctx.emitter.leave(label)
                } else {
                    ctx.emitter.return_value()
                }
            }
            Self::Throw(value) => {
                value.generate_boxed(ctx)?;
                ctx.emitter.throw_exception()
            }
            Self::Try { body, catch, finally } => {
                if catch.is_none() && finally.is_none() {
                    return Self::generate_list(body, ctx);
                }
                ctx.emitter.begin_exception_block()?;
                Self::generate_list(body, ctx)?;
                if let Some(catch) = catch {
                    ctx.emitter.begin_catch_block(ctx.runtime.types.script_error)?;
                    // The exception binds in its own one-slot scope
                    let catch_scope = ctx.scopes.push_declarative(ctx.current_scope);
                    let slot = ctx.scopes.declare(catch_scope, catch.binding);
                    let spill = ctx.scratch.value_slot(&mut ctx.emitter)?;
                    ctx.emitter.store_variable(spill)?;
                    ctx.enter_declarative(catch_scope)?;
                    let saved_scope = ctx.current_scope;
                    ctx.current_scope = catch_scope;
                    ctx.emitter.load_argument(ARG_SCOPE)?;
                    ctx.emitter.load_field(ctx.runtime.fields.scope_values)?;
                    ctx.emitter.load_int32(slot as i32)?;
                    ctx.emitter.load_variable(spill)?;
                    ctx.emitter.store_array_element(ElementType::Object)?;
                    Self::generate_list(&catch.body, ctx)?;
                    if !ctx.emitter.is_indeterminate() {
                        ctx.exit_scope()?;
                    }
                    ctx.current_scope = saved_scope;
                }
                if let Some(finally) = finally {
                    ctx.emitter.begin_finally_block()?;
                    Self::generate_list(finally, ctx)?;
                }
                ctx.emitter.end_exception_block()
            }
            Self::With { object, body } => {
                ctx.emitter.load_argument(ARG_SCOPE)?;
                object.generate_boxed(ctx)?;
                ctx.emitter.call_static(ctx.runtime.methods.to_object)?;
                ctx.emitter.call_static(ctx.runtime.methods.push_object_scope)?;
                ctx.emitter.store_argument(ARG_SCOPE)?;
                let with_scope = ctx.scopes.push_object(ctx.current_scope, true);
                let saved_scope = ctx.current_scope;
                ctx.current_scope = with_scope;
                body.generate_code(ctx)?;
                if !ctx.emitter.is_indeterminate() {
                    ctx.exit_scope()?;
                }
                ctx.current_scope = saved_scope;
                Ok(())
            }
            Self::Switch { discriminant, cases } => generate_switch(discriminant, cases, ctx),
            Self::Break => {
                let targets = *ctx
                    .loop_targets
                    .last()
                    .expect("the parser rejects break outside loops and switches");
                ctx.emitter.leave(targets.break_label)
            }
            Self::Continue => {
                let target = ctx
                    .loop_targets
                    .iter()
                    .rev()
                    .find_map(|targets| targets.continue_label)
                    .expect("the parser rejects continue outside loops");
                ctx.emitter.leave(target)
            }
            Self::Spanned(span, inner) => {
                ctx.emitter.set_location(Some(*span));
                inner.generate_code(ctx)
            }
        }
    }
}

fn generate_switch<Tr: CodegenTracer>(
    discriminant: &Expression,
    cases: &[SwitchCase],
    ctx: &mut CodegenContext<'_, '_, Tr>,
) -> EmitResult {
    let break_label = ctx.emitter.create_label();
    ctx.loop_targets.push(LoopTargets {
        break_label,
        continue_label: None,
    });
    let case_labels: Vec<LabelId> = cases.iter().map(|_| ctx.emitter.create_label()).collect();
    let default_label = cases
        .iter()
        .position(|case| case.test.is_none())
        .map(|index| case_labels[index]);

    if dense_case_count(cases).is_some() {
        discriminant.generate_boxed(ctx)?;
        ctx.emitter.call_static(ctx.runtime.methods.to_switch_index)?;
        let table: Vec<LabelId> = cases
            .iter()
            .zip(&case_labels)
            .filter(|(case, _)| case.test.is_some())
            .map(|(_, &label)| label)
            .collect();
        ctx.emitter.switch(&table)?;
    } else {
        let dispatch = ctx.emitter.declare_variable(ValueKind::Object, None)?;
        discriminant.generate_boxed(ctx)?;
        ctx.emitter.store_variable(dispatch)?;
        for (case, &label) in cases.iter().zip(&case_labels) {
            if let Some(test) = &case.test {
                ctx.emitter.load_variable(dispatch)?;
                test.generate_boxed(ctx)?;
                ctx.emitter.call_static(ctx.runtime.methods.strict_equals)?;
                ctx.emitter.branch_if_not_zero(label)?;
            }
        }
    }
    ctx.emitter.branch(default_label.unwrap_or(break_label))?;

    for (case, &label) in cases.iter().zip(&case_labels) {
        ctx.emitter.define_label_position(label)?;
        Statement::generate_list(&case.body, ctx)?;
    }
    ctx.emitter.define_label_position(break_label)?;
    ctx.loop_targets.pop();
    Ok(())
}
