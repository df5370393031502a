//! Routine generation: parse, optimize, generate code.
//!
//! `FunctionGenerator` drives one compilation: it requests the AST from the
//! external parser (or is handed one directly), runs the no-op optimize
//! stage, then walks the tree emitting into a fresh [`CodeEmitter`]. The
//! walk happens through [`CodegenContext`], which carries the emitter, the
//! scope arena, the runtime surface, and the control-flow bookkeeping
//! (loop targets, the spilled-return protocol for exits that cross
//! protected regions).
//!
//! Nested function literals compile recursively into their own routines;
//! the parent's byte stream refers to them by index through the runtime's
//! `create_function` helper.

use std::fmt;

use crate::{
    ast::{FunctionLiteral, Statement},
    code::CompiledFunction,
    codegen::{CodeEmitter, EmitError, EmitResult, EmitterConfig, LabelId, LocalId, ValueKind},
    options::CompileOptions,
    parse::{ParseError, SourceParser},
    runtime::{ARG_ARGUMENTS, ARG_SCOPE, RuntimeLibrary},
    scope::{CacheCells, ScopeArena, ScopeCompiler, ScopeId, ScratchLocals},
    tracer::{CodegenTracer, NoopTracer},
};

/// Error type for compilation, separating failures by pipeline stage.
///
/// Parse errors are user errors and propagate from the external parser
/// unchanged. Emission errors indicate a bug in code generation and should
/// never reach users of a correct compiler.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// Parsing failed before code generation started.
    Parse(ParseError),
    /// Code generation produced a malformed emission.
    Emit(EmitError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(error) => write!(f, "parse error: {error}"),
            Self::Emit(error) => write!(f, "emission error: {error}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<ParseError> for CompileError {
    fn from(error: ParseError) -> Self {
        Self::Parse(error)
    }
}

impl From<EmitError> for CompileError {
    fn from(error: EmitError) -> Self {
        Self::Emit(error)
    }
}

/// Branch targets for the innermost enclosing loop or switch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopTargets {
    pub break_label: LabelId,
    /// `None` for switch statements, which accept `break` but not
    /// `continue`.
    pub continue_label: Option<LabelId>,
}

/// Everything the AST walk emits through.
pub(crate) struct CodegenContext<'a, 't, Tr: CodegenTracer> {
    pub emitter: CodeEmitter<'t, Tr>,
    pub scopes: &'a mut ScopeArena,
    pub current_scope: ScopeId,
    pub runtime: &'t RuntimeLibrary,
    pub strict: bool,
    pub options: &'a CompileOptions,
    pub cells: CacheCells,
    pub scratch: ScratchLocals,
    pub loop_targets: Vec<LoopTargets>,
    /// Spilled-return protocol: a return inside a protected region stores
    /// its value and leaves to this label, where the epilogue returns it.
    pub return_label: Option<LabelId>,
    pub return_slot: Option<LocalId>,
    pub inner_functions: Vec<CompiledFunction>,
}

impl<'t, Tr: CodegenTracer> CodegenContext<'_, 't, Tr> {
    /// Emits the chain walk pushing `name`'s value.
    pub fn build_get(&mut self, name: crate::intern::StringId) -> EmitResult {
        let compiler = ScopeCompiler {
            scopes: self.scopes,
            runtime: self.runtime,
            strict: self.strict,
        };
        compiler.build_get(&mut self.emitter, self.current_scope, name, &mut self.cells)
    }

    /// Emits the chain walk storing the object on top of the stack into
    /// `name`.
    pub fn build_set(&mut self, name: crate::intern::StringId) -> EmitResult {
        let compiler = ScopeCompiler {
            scopes: self.scopes,
            runtime: self.runtime,
            strict: self.strict,
        };
        compiler.build_set(&mut self.emitter, self.current_scope, name, &mut self.cells, &mut self.scratch)
    }

    /// Emits callee resolution for a call site, leaving `this` under the
    /// callee.
    pub fn build_call_target(&mut self, name: crate::intern::StringId) -> EmitResult {
        let compiler = ScopeCompiler {
            scopes: self.scopes,
            runtime: self.runtime,
            strict: self.strict,
        };
        compiler.build_call_target(&mut self.emitter, self.current_scope, name, &mut self.cells, &mut self.scratch)
    }

    /// Emits entry into a declarative scope, making it current.
    pub fn enter_declarative(&mut self, scope: ScopeId) -> EmitResult {
        let compiler = ScopeCompiler {
            scopes: self.scopes,
            runtime: self.runtime,
            strict: self.strict,
        };
        compiler.build_enter_declarative(&mut self.emitter, scope)
    }

    /// Emits scope exit, restoring the parent as current.
    pub fn exit_scope(&mut self) -> EmitResult {
        let compiler = ScopeCompiler {
            scopes: self.scopes,
            runtime: self.runtime,
            strict: self.strict,
        };
        compiler.build_exit(&mut self.emitter)
    }

    /// Pushes the `undefined` singleton.
    pub fn emit_undefined(&mut self) -> EmitResult {
        self.emitter.load_field(self.runtime.fields.undefined_value)
    }

    /// Pushes the default call receiver: the global instance, or
    /// `undefined` under strict mode.
    pub fn emit_default_receiver(&mut self) -> EmitResult {
        if self.strict {
            self.emitter.load_field(self.runtime.fields.undefined_value)
        } else {
            self.emitter.load_field(self.runtime.fields.global_instance)
        }
    }

    /// The spilled-return label and slot, created on first use.
    pub fn return_target(&mut self) -> EmitResult<(LabelId, LocalId)> {
        let label = match self.return_label {
            Some(label) => label,
            None => {
                let label = self.emitter.create_label();
                self.return_label = Some(label);
                label
            }
        };
        let slot = match self.return_slot {
            Some(slot) => slot,
            None => {
                let slot = self.emitter.declare_variable(ValueKind::Object, None)?;
                self.return_slot = Some(slot);
                slot
            }
        };
        Ok((label, slot))
    }

    /// Compiles a nested function literal into its own routine, returning
    /// the id the byte stream refers to it by.
    pub fn compile_inner(&mut self, literal: &FunctionLiteral) -> EmitResult<i32> {
        let routine = compile_routine(
            self.runtime,
            self.options,
            self.scopes,
            self.current_scope,
            literal,
            self.strict,
            NoopTracer,
        )?;
        let id = i32::try_from(self.inner_functions.len()).expect("inner function count exceeds i32");
        self.inner_functions.push(routine);
        Ok(id)
    }
}

/// Collects the names `var` statements and function declarations bind, in
/// source order, without descending into nested function literals.
fn collect_declarations(statements: &[Statement], names: &mut Vec<crate::intern::StringId>) {
    for statement in statements {
        collect_declarations_from(statement, names);
    }
}

fn collect_declarations_from(statement: &Statement, names: &mut Vec<crate::intern::StringId>) {
    match statement {
        Statement::VarDeclaration { declarations } => {
            for (name, _) in declarations {
                names.push(*name);
            }
        }
        Statement::FunctionDeclaration(literal) => {
            if let Some(name) = literal.name {
                names.push(name);
            }
        }
        Statement::Block(body) => collect_declarations(body, names),
        Statement::If {
            then_branch,
            else_branch,
            ..
        } => {
            collect_declarations_from(then_branch, names);
            if let Some(else_branch) = else_branch {
                collect_declarations_from(else_branch, names);
            }
        }
        Statement::While { body, .. } | Statement::DoWhile { body, .. } | Statement::With { body, .. } => {
            collect_declarations_from(body, names);
        }
        Statement::For { init, body, .. } => {
            if let Some(crate::ast::ForInit::VarDeclaration { declarations }) = init {
                for (name, _) in declarations {
                    names.push(*name);
                }
            }
            collect_declarations_from(body, names);
        }
        Statement::Try { body, catch, finally } => {
            collect_declarations(body, names);
            if let Some(catch) = catch {
                collect_declarations(&catch.body, names);
            }
            if let Some(finally) = finally {
                collect_declarations(finally, names);
            }
        }
        Statement::Switch { cases, .. } => {
            for case in cases {
                collect_declarations(&case.body, names);
            }
        }
        Statement::Spanned(_, inner) => collect_declarations_from(inner, names),
        _ => {}
    }
}

/// Collects hoisted function declarations, in source order, without
/// descending into nested function literals.
fn collect_function_declarations<'s>(statements: &'s [Statement], found: &mut Vec<&'s FunctionLiteral>) {
    for statement in statements {
        collect_function_declarations_from(statement, found);
    }
}

fn collect_function_declarations_from<'s>(statement: &'s Statement, found: &mut Vec<&'s FunctionLiteral>) {
    match statement {
        Statement::FunctionDeclaration(literal) => found.push(literal),
        Statement::Block(body) => collect_function_declarations(body, found),
        Statement::If {
            then_branch,
            else_branch,
            ..
        } => {
            collect_function_declarations_from(then_branch, found);
            if let Some(else_branch) = else_branch {
                collect_function_declarations_from(else_branch, found);
            }
        }
        Statement::While { body, .. } | Statement::DoWhile { body, .. } | Statement::With { body, .. } => {
            collect_function_declarations_from(body, found);
        }
        Statement::For { body, .. } => {
            collect_function_declarations_from(body, found);
        }
        Statement::Try { body, catch, finally } => {
            collect_function_declarations(body, found);
            if let Some(catch) = catch {
                collect_function_declarations(&catch.body, found);
            }
            if let Some(finally) = finally {
                collect_function_declarations(finally, found);
            }
        }
        Statement::Switch { cases, .. } => {
            for case in cases {
                collect_function_declarations(&case.body, found);
            }
        }
        Statement::Spanned(_, inner) => collect_function_declarations_from(inner, found),
        _ => {}
    }
}

/// Compiles one routine: scope setup, formal binding, hoisted functions,
/// body, epilogue.
pub(crate) fn compile_routine<Tr: CodegenTracer>(
    runtime: &RuntimeLibrary,
    options: &CompileOptions,
    scopes: &mut ScopeArena,
    parent: ScopeId,
    literal: &FunctionLiteral,
    strict: bool,
    tracer: Tr,
) -> Result<CompiledFunction, EmitError> {
    let function_scope = scopes.push_declarative(parent);
    for &param in &literal.params {
        scopes.declare(function_scope, param);
    }
    let mut hoisted = Vec::new();
    collect_declarations(&literal.body, &mut hoisted);
    for name in hoisted {
        scopes.declare(function_scope, name);
    }

    let config = EmitterConfig {
        checked: options.checked,
        arg_kinds: vec![ValueKind::Object, ValueKind::Object, ValueKind::Object],
        return_kind: Some(ValueKind::Object),
        track_locations: options.include_debug_info,
    };
    let mut ctx = CodegenContext {
        emitter: CodeEmitter::with_tracer(&runtime.tokens, config, tracer),
        scopes,
        current_scope: function_scope,
        runtime,
        strict,
        options,
        cells: CacheCells::new(),
        scratch: ScratchLocals::new(),
        loop_targets: Vec::new(),
        return_label: None,
        return_slot: None,
        inner_functions: Vec::new(),
    };

    // Prologue: enter the function scope, then bind formals from the
    // arguments array into their slots.
    ctx.enter_declarative(function_scope)?;
    for (index, &param) in literal.params.iter().enumerate() {
        let slot = ctx
            .scopes
            .slot_of(function_scope, param)
            .expect("formals were declared above");
        ctx.emitter.load_argument(ARG_SCOPE)?;
        ctx.emitter.load_field(runtime.fields.scope_values)?;
        ctx.emitter.load_int32(slot as i32)?;
        ctx.emitter.load_argument(ARG_ARGUMENTS)?;
        ctx.emitter
            .load_int32(i32::try_from(index).expect("formal count exceeds i32"))?;
        ctx.emitter.call_static(runtime.methods.argument_or_undefined)?;
        ctx.emitter
            .store_array_element(crate::codegen::ElementType::Object)?;
    }

    // Hoisted function declarations bind before any statement runs.
    let mut declarations = Vec::new();
    collect_function_declarations(&literal.body, &mut declarations);
    for declaration in declarations {
        let name = declaration.name.expect("function declarations are named");
        let slot = ctx
            .scopes
            .slot_of(function_scope, name)
            .expect("declaration names were hoisted above");
        let id = ctx.compile_inner(declaration)?;
        ctx.emitter.load_argument(ARG_SCOPE)?;
        ctx.emitter.load_field(runtime.fields.scope_values)?;
        ctx.emitter.load_int32(slot as i32)?;
        ctx.emitter.load_argument(ARG_SCOPE)?;
        ctx.emitter.load_int32(id)?;
        ctx.emitter.call_static(runtime.methods.create_function)?;
        ctx.emitter
            .store_array_element(crate::codegen::ElementType::Object)?;
    }

    Statement::generate_list(&literal.body, &mut ctx)?;

    // Falling off the end returns undefined.
    if !ctx.emitter.is_indeterminate() {
        ctx.emit_undefined()?;
        ctx.emitter.return_value()?;
    }
    // Epilogue for returns spilled out of protected regions.
    if let Some(label) = ctx.return_label {
        let slot = ctx.return_slot.expect("return label and slot are created together");
        ctx.emitter.define_label_position(label)?;
        ctx.emitter.load_variable(slot)?;
        ctx.emitter.return_value()?;
    }

    let inner_functions = ctx.inner_functions;
    let cache_cell_count = ctx.cells.count();
    let body = ctx.emitter.complete()?;
    Ok(CompiledFunction {
        name: literal.name,
        param_count: u32::try_from(literal.params.len()).expect("formal count exceeds u32"),
        bytes: body.bytes,
        max_stack: body.max_stack,
        local_signature: body.local_signature,
        exception_table: body.exception_table,
        location_table: body.location_table,
        inner_functions,
        cache_cell_count,
        document: options.document_name.clone(),
    })
}

/// Drives one compilation: `parse` then `optimize` then `generate_code`.
pub struct FunctionGenerator<'r> {
    runtime: &'r RuntimeLibrary,
    options: CompileOptions,
    parser: Option<&'r dyn SourceParser>,
    source: Option<String>,
    ast: Option<FunctionLiteral>,
}

impl<'r> FunctionGenerator<'r> {
    /// A generator over an already-parsed tree.
    #[must_use]
    pub fn from_ast(runtime: &'r RuntimeLibrary, options: CompileOptions, ast: FunctionLiteral) -> Self {
        Self {
            runtime,
            options,
            parser: None,
            source: None,
            ast: Some(ast),
        }
    }

    /// A generator that will request the tree from `parser`.
    #[must_use]
    pub fn from_source(
        runtime: &'r RuntimeLibrary,
        options: CompileOptions,
        parser: &'r dyn SourceParser,
        source: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            options,
            parser: Some(parser),
            source: Some(source.into()),
            ast: None,
        }
    }

    /// Obtains the AST from the external parser. Idempotent; a no-op when
    /// the generator was built from a tree.
    pub fn parse(&mut self) -> Result<(), CompileError> {
        if self.ast.is_some() {
            return Ok(());
        }
        let parser = self.parser.expect("generator has either a tree or a parser");
        let source = self.source.as_deref().expect("source accompanies the parser");
        self.ast = Some(parser.parse_program(source)?);
        Ok(())
    }

    /// AST-level optimization stage. Deliberately a no-op; the hook exists
    /// so rewrites have a place to live.
    pub fn optimize(&mut self) {}

    /// Generates the routine, parsing first if needed.
    pub fn generate_code(&mut self) -> Result<CompiledFunction, CompileError> {
        self.parse()?;
        let ast = self.ast.as_ref().expect("parse populated the tree");
        let mut scopes = ScopeArena::new();
        let routine = compile_routine(
            self.runtime,
            &self.options,
            &mut scopes,
            ScopeId::GLOBAL,
            ast,
            self.options.strict_mode,
            NoopTracer,
        )?;
        Ok(routine)
    }

    /// Generates the routine, reporting emission events to `tracer`.
    /// Nested routines are not traced.
    pub fn generate_code_traced<Tr: CodegenTracer>(&mut self, tracer: Tr) -> Result<CompiledFunction, CompileError> {
        self.parse()?;
        let ast = self.ast.as_ref().expect("parse populated the tree");
        let mut scopes = ScopeArena::new();
        let routine = compile_routine(
            self.runtime,
            &self.options,
            &mut scopes,
            ScopeId::GLOBAL,
            ast,
            self.options.strict_mode,
            tracer,
        )?;
        Ok(routine)
    }

    /// The whole pipeline in one call.
    pub fn compile(mut self) -> Result<CompiledFunction, CompileError> {
        self.parse()?;
        self.optimize();
        self.generate_code()
    }
}
