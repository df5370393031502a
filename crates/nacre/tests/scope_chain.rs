//! Scope-chain compilation: slot-backed declarative access, the object
//! property protocol with inline-cache cells, global fallback, and the
//! runtime reference error on a complete miss.

use nacre::ast::{CatchClause, Expression, FunctionLiteral, Statement};
use nacre::codegen::{Operand, disassemble};
use nacre::{CompileOptions, CompiledFunction, FunctionGenerator, Interner, RuntimeLibrary};
use pretty_assertions::assert_eq;

fn compile(runtime: &RuntimeLibrary, program: FunctionLiteral) -> CompiledFunction {
    FunctionGenerator::from_ast(runtime, CompileOptions::checked(), program)
        .compile()
        .expect("program should compile")
}

fn compile_with(runtime: &RuntimeLibrary, options: CompileOptions, program: FunctionLiteral) -> CompiledFunction {
    FunctionGenerator::from_ast(runtime, options, program)
        .compile()
        .expect("program should compile")
}

fn token_count(routine: &CompiledFunction, raw: u32) -> usize {
    disassemble(&routine.bytes)
        .unwrap()
        .into_iter()
        .filter(|instruction| instruction.operand == Operand::Token(raw))
        .count()
}

/// A declared variable compiles to direct slot loads: no runtime probe, no
/// property protocol.
#[test]
fn declared_variable_binds_directly_to_its_slot() {
    let mut interner = Interner::new();
    let x = interner.intern("x");
    let runtime = RuntimeLibrary::new();
    let program = FunctionLiteral::program(vec![
        Statement::VarDeclaration {
            declarations: vec![(x, Some(Expression::Number(7.0)))],
        },
        Statement::Return(Some(Expression::Name(x))),
    ]);
    let routine = compile(&runtime, program);

    assert_eq!(token_count(&routine, runtime.methods.has_value.raw()), 0);
    assert_eq!(token_count(&routine, runtime.methods.get_value.raw()), 0);
    // one values-array load for the store, one for the read
    assert_eq!(token_count(&routine, runtime.fields.scope_values.raw()), 2);
    let mnemonics: Vec<&str> = disassemble(&routine.bytes)
        .unwrap()
        .into_iter()
        .map(|instruction| instruction.opcode.mnemonic())
        .collect();
    assert!(mnemonics.contains(&"ldelem.ref"));
    assert!(mnemonics.contains(&"stelem.ref"));
}

/// An undeclared name walks to the global scope: existence probe, cached
/// read on the hit path, thrown reference error on the miss path.
#[test]
fn global_lookup_probes_and_throws_on_miss() {
    let mut interner = Interner::new();
    let x = interner.intern("x");
    let runtime = RuntimeLibrary::new();
    let program = FunctionLiteral::program(vec![Statement::Return(Some(Expression::Name(x)))]);
    let routine = compile(&runtime, program);

    assert_eq!(token_count(&routine, runtime.methods.has_value.raw()), 1);
    assert_eq!(token_count(&routine, runtime.methods.get_value.raw()), 1);
    // miss path: new reference error, throw
    assert_eq!(token_count(&routine, runtime.methods.reference_error_ctor.raw()), 1);
    let mnemonics: Vec<&str> = disassemble(&routine.bytes)
        .unwrap()
        .into_iter()
        .map(|instruction| instruction.opcode.mnemonic())
        .collect();
    assert!(mnemonics.contains(&"newobj"));
    assert!(mnemonics.contains(&"throw"));
}

/// Assignment to an undeclared name writes unconditionally at the root:
/// the global scope creates the property.
#[test]
fn global_assignment_creates_the_property() {
    let mut interner = Interner::new();
    let y = interner.intern("y");
    let runtime = RuntimeLibrary::new();
    let program = FunctionLiteral::program(vec![Statement::Expression(Expression::Assignment {
        target: y,
        op: None,
        value: Box::new(Expression::Number(1.0)),
    })]);
    let routine = compile(&runtime, program);

    assert_eq!(token_count(&routine, runtime.methods.set_value.raw()), 1);
    assert_eq!(token_count(&routine, runtime.methods.set_value_if_exists.raw()), 0);
}

/// Under a `with` scope the write tries the backing object first and only
/// falls through to the unconditional root write.
#[test]
fn with_scope_write_tries_the_object_first() {
    let mut interner = Interner::new();
    let o = interner.intern("o");
    let y = interner.intern("y");
    let runtime = RuntimeLibrary::new();
    let program = FunctionLiteral::program(vec![Statement::With {
        object: Expression::Name(o),
        body: Box::new(Statement::Expression(Expression::Assignment {
            target: y,
            op: None,
            value: Box::new(Expression::Number(2.0)),
        })),
    }]);
    let routine = compile(&runtime, program);

    assert_eq!(token_count(&routine, runtime.methods.set_value_if_exists.raw()), 1);
    assert_eq!(token_count(&routine, runtime.methods.set_value.raw()), 1);
}

/// Each object-scope access site gets its own fresh pair of inline-cache
/// cells, and the routine reports the total for the loader.
#[test]
fn cache_cells_are_per_site() {
    let mut interner = Interner::new();
    let x = interner.intern("x");
    let runtime = RuntimeLibrary::new();
    // two reads of the same global name: two sites, two cell pairs
    let program = FunctionLiteral::program(vec![
        Statement::Expression(Expression::Name(x)),
        Statement::Expression(Expression::Name(x)),
    ]);
    let routine = compile(&runtime, program);
    assert_eq!(routine.cache_cell_count, 4);
    assert_eq!(token_count(&routine, runtime.methods.get_value.raw()), 2);
}

/// The exception binds in its own one-slot scope and reads back out of it.
#[test]
fn catch_binding_lives_in_its_own_scope() {
    let mut interner = Interner::new();
    let e = interner.intern("e");
    let runtime = RuntimeLibrary::new();
    let program = FunctionLiteral::program(vec![Statement::Try {
        body: vec![Statement::Throw(Expression::Null)],
        catch: Some(CatchClause {
            binding: e,
            body: vec![Statement::Return(Some(Expression::Name(e)))],
        }),
        finally: None,
    }]);
    let routine = compile(&runtime, program);

    // the catch scope is entered through the declarative push helper:
    // once for the function scope, once for the catch scope
    assert_eq!(token_count(&routine, runtime.methods.push_declarative_scope.raw()), 2);
    // no property protocol involved in resolving `e`
    assert_eq!(token_count(&routine, runtime.methods.has_value.raw()), 0);
}

/// Strict mode swaps the default call receiver from the global instance to
/// `undefined`.
#[test]
fn strict_mode_changes_the_default_receiver() {
    let mut interner = Interner::new();
    let f = interner.intern("f");
    let runtime = RuntimeLibrary::new();
    let build = || {
        FunctionLiteral::program(vec![Statement::Expression(Expression::Call {
            callee: Box::new(Expression::Name(f)),
            arguments: Vec::new(),
        })])
    };

    let relaxed = compile(&runtime, build());
    assert!(token_count(&relaxed, runtime.fields.global_instance.raw()) >= 1);
    assert_eq!(token_count(&relaxed, runtime.fields.undefined_value.raw()), 1);

    let strict_options = CompileOptions {
        strict_mode: true,
        ..CompileOptions::checked()
    };
    let strict = compile_with(&runtime, strict_options, build());
    assert_eq!(token_count(&strict, runtime.fields.global_instance.raw()), 0);
    assert!(token_count(&strict, runtime.fields.undefined_value.raw()) >= 2);
}

/// Formals bind from the arguments array in the prologue, one helper call
/// per parameter.
#[test]
fn formals_bind_from_the_arguments_array() {
    let mut interner = Interner::new();
    let a = interner.intern("a");
    let b = interner.intern("b");
    let runtime = RuntimeLibrary::new();
    let function = FunctionLiteral::new(
        None,
        vec![a, b],
        vec![Statement::Return(Some(Expression::Name(a)))],
    );
    let routine = compile(&runtime, function);
    assert_eq!(routine.param_count, 2);
    assert_eq!(token_count(&routine, runtime.methods.argument_or_undefined.raw()), 2);
}
