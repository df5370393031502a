//! End-to-end code generation scenarios: whole trees in, byte streams out,
//! checked against the loader ABI through the reference decoder.

use nacre::ast::{BinaryOp, CatchClause, Expression, FunctionLiteral, Statement, SwitchCase};
use nacre::codegen::{Instruction, Operand, disassemble};
use nacre::{CompileOptions, CompiledFunction, FunctionGenerator, Interner, RuntimeLibrary};
use pretty_assertions::assert_eq;

fn compile(runtime: &RuntimeLibrary, program: FunctionLiteral) -> CompiledFunction {
    FunctionGenerator::from_ast(runtime, CompileOptions::checked(), program)
        .compile()
        .expect("program should compile")
}

fn mnemonics(bytes: &[u8]) -> Vec<&'static str> {
    disassemble(bytes)
        .expect("emitted stream should decode")
        .into_iter()
        .map(|instruction| instruction.opcode.mnemonic())
        .collect()
}

fn decoded(bytes: &[u8]) -> Vec<Instruction> {
    disassemble(bytes).expect("emitted stream should decode")
}

fn number(value: f64) -> Expression {
    Expression::Number(value)
}

fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
    Expression::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn call(interner: &mut Interner, name: &str, arguments: Vec<Expression>) -> Expression {
    Expression::Call {
        callee: Box::new(Expression::Name(interner.intern(name))),
        arguments,
    }
}

/// `return 1 + 2;` — integer constants use the dedicated short opcodes, the
/// machine add runs on int32, and the result boxes as a number before ret.
#[test]
fn integer_addition_returns_boxed_number() {
    let runtime = RuntimeLibrary::new();
    let program = FunctionLiteral::program(vec![Statement::Return(Some(binary(
        BinaryOp::Add,
        number(1.0),
        number(2.0),
    )))]);
    let routine = compile(&runtime, program);

    assert_eq!(
        mnemonics(&routine.bytes),
        vec!["ldarg.0", "ldc.i4.0", "call", "starg.s", "ldc.i4.1", "ldc.i4.2", "add", "box", "ret"]
    );
    let instructions = decoded(&routine.bytes);
    let boxing = instructions
        .iter()
        .find(|instruction| instruction.opcode.mnemonic() == "box")
        .unwrap();
    assert_eq!(boxing.operand, Operand::Token(runtime.types.number.raw()));
    assert_eq!(routine.max_stack, 2);
}

/// `var x = 0; while (x < 10) x = x + 1;` — test-at-bottom loop: one
/// unconditional entry branch, one fused compare-branch on the back edge
/// with a negative displacement.
#[test]
fn while_loop_compiles_to_one_branch_and_one_compare_branch() {
    let mut interner = Interner::new();
    let x = interner.intern("x");
    let runtime = RuntimeLibrary::new();
    let program = FunctionLiteral::program(vec![
        Statement::VarDeclaration {
            declarations: vec![(x, Some(number(0.0)))],
        },
        Statement::While {
            condition: binary(BinaryOp::LessThan, Expression::Name(x), number(10.0)),
            body: Box::new(Statement::Expression(Expression::Assignment {
                target: x,
                op: None,
                value: Box::new(binary(BinaryOp::Add, Expression::Name(x), number(1.0))),
            })),
        },
    ]);
    let routine = compile(&runtime, program);
    let instructions = decoded(&routine.bytes);

    let unconditional: Vec<&Instruction> = instructions
        .iter()
        .filter(|instruction| instruction.opcode.mnemonic() == "br")
        .collect();
    let compare_branches: Vec<&Instruction> = instructions
        .iter()
        .filter(|instruction| matches!(instruction.opcode.mnemonic(), "blt" | "blt.un" | "blt.s"))
        .collect();
    assert_eq!(unconditional.len(), 1);
    assert_eq!(compare_branches.len(), 1);

    // entry branch jumps forward to the condition; the compare-branch back
    // edge jumps backwards to the body
    let Operand::Target(entry_target) = unconditional[0].operand else {
        panic!("branch without a target");
    };
    let Operand::Target(back_target) = compare_branches[0].operand else {
        panic!("branch without a target");
    };
    assert!(entry_target > unconditional[0].offset);
    assert!(back_target < compare_branches[0].offset);
}

/// `try { f(); } catch (e) { g(e); } finally { h(); }` — one region; the
/// try and catch bodies each exit with `leave` to the region's end label.
#[test]
fn try_catch_finally_emits_two_leaves_to_the_end_label() {
    let mut interner = Interner::new();
    let e = interner.intern("e");
    let runtime = RuntimeLibrary::new();
    let program = FunctionLiteral::program(vec![Statement::Try {
        body: vec![Statement::Expression(call(&mut interner, "f", vec![]))],
        catch: Some(CatchClause {
            binding: e,
            body: vec![Statement::Expression(call(
                &mut interner,
                "g",
                vec![Expression::Name(e)],
            ))],
        }),
        finally: Some(vec![Statement::Expression(call(&mut interner, "h", vec![]))]),
    }]);
    let routine = compile(&runtime, program);
    let instructions = decoded(&routine.bytes);

    let leaves: Vec<&Instruction> = instructions
        .iter()
        .filter(|instruction| instruction.opcode.mnemonic() == "leave")
        .collect();
    assert_eq!(leaves.len(), 2);
    let Operand::Target(first) = leaves[0].operand else {
        panic!("leave without a target");
    };
    let Operand::Target(second) = leaves[1].operand else {
        panic!("leave without a target");
    };
    assert_eq!(first, second);

    // the end label sits right after the finally clause's endfinally
    let end_of_finally = instructions
        .iter()
        .find(|instruction| instruction.opcode.mnemonic() == "endfinally")
        .unwrap();
    assert_eq!(first, end_of_finally.offset + 1);

    // one region, two clauses: catch (flags 0) then finally (flags 2)
    let table = &routine.exception_table;
    assert_eq!(table.len(), 4 + 2 * 24);
    assert_eq!(table[0], 0x41);
    let flags = |clause: usize| u32::from_le_bytes(table[4 + clause * 24..8 + clause * 24].try_into().unwrap());
    assert_eq!(flags(0), 0);
    assert_eq!(flags(1), 2);
    let catch_token = u32::from_le_bytes(table[24..28].try_into().unwrap());
    assert_eq!(catch_token, runtime.types.script_error.raw());
}

/// `function outer(a) { return function(b) { return a + b; }; }` — the
/// inner routine's lookup of `a` walks exactly one parent link; the closure
/// captures the scope by reference through `create_function`.
#[test]
fn closure_lookup_walks_one_parent_link() {
    let mut interner = Interner::new();
    let a = interner.intern("a");
    let b = interner.intern("b");
    let outer_name = interner.intern("outer");
    let runtime = RuntimeLibrary::new();

    let inner = FunctionLiteral::new(
        None,
        vec![b],
        vec![Statement::Return(Some(binary(
            BinaryOp::Add,
            Expression::Name(a),
            Expression::Name(b),
        )))],
    );
    let outer = FunctionLiteral::new(
        Some(outer_name),
        vec![a],
        vec![Statement::Return(Some(Expression::Function(inner)))],
    );
    let routine = compile(&runtime, outer);

    // the outer routine materializes the closure over the live scope
    let outer_instructions = decoded(&routine.bytes);
    assert!(
        outer_instructions
            .iter()
            .any(|instruction| instruction.operand == Operand::Token(runtime.methods.create_function.raw()))
    );
    assert_eq!(routine.inner_functions.len(), 1);

    // the inner routine hops to the parent scope exactly once
    let inner_routine = &routine.inner_functions[0];
    let inner_instructions = decoded(&inner_routine.bytes);
    let parent_hops = inner_instructions
        .iter()
        .filter(|instruction| {
            instruction.opcode.mnemonic() == "ldfld"
                && instruction.operand == Operand::Token(runtime.fields.scope_parent.raw())
        })
        .count();
    assert_eq!(parent_hops, 1);
    // both operands come out of scope slots, added through the runtime
    assert!(
        inner_instructions
            .iter()
            .any(|instruction| instruction.operand == Operand::Token(runtime.methods.add_values.raw()))
    );
}

/// `with (o) { return x; }` — the backing object is coerced, pushed as an
/// object scope, stored into the scope argument; `x` resolves through the
/// property protocol.
#[test]
fn with_scope_uses_the_property_protocol() {
    let mut interner = Interner::new();
    let o = interner.intern("o");
    let x = interner.intern("x");
    let runtime = RuntimeLibrary::new();
    let program = FunctionLiteral::program(vec![Statement::With {
        object: Expression::Name(o),
        body: Box::new(Statement::Return(Some(Expression::Name(x)))),
    }]);
    let routine = compile(&runtime, program);
    let instructions = decoded(&routine.bytes);

    let has_token = |raw: u32| {
        instructions
            .iter()
            .any(|instruction| instruction.operand == Operand::Token(raw))
    };
    assert!(has_token(runtime.methods.to_object.raw()));
    assert!(has_token(runtime.methods.push_object_scope.raw()));
    assert!(has_token(runtime.methods.has_value.raw()));
    assert!(has_token(runtime.methods.get_value.raw()));

    // the new scope replaces argument 0
    let push_scope = instructions
        .iter()
        .position(|instruction| instruction.operand == Operand::Token(runtime.methods.push_object_scope.raw()))
        .unwrap();
    assert_eq!(instructions[push_scope + 1].opcode.mnemonic(), "starg.s");
    assert_eq!(instructions[push_scope + 1].operand, Operand::UInt8(0));
}

/// `with (o) { f(); }` — a callee resolved under a `with` scope receives
/// its receiver through the spilled-receiver protocol: `this` and the
/// callee reload from locals right before the call.
#[test]
fn with_scope_supplies_the_implicit_receiver() {
    let mut interner = Interner::new();
    let o = interner.intern("o");
    let runtime = RuntimeLibrary::new();
    let f_call = call(&mut interner, "f", vec![]);
    let program = FunctionLiteral::program(vec![Statement::With {
        object: Expression::Name(o),
        body: Box::new(Statement::Expression(f_call)),
    }]);
    let routine = compile(&runtime, program);
    let instructions = decoded(&routine.bytes);

    let call_index = instructions
        .iter()
        .position(|instruction| instruction.operand == Operand::Token(runtime.methods.call_function.raw()))
        .unwrap();
    // ... ldloc (receiver), ldloc (callee), then the arguments array, then
    // the call; the receiver spill only exists on the with path
    let before: Vec<&str> = instructions[..call_index]
        .iter()
        .map(|instruction| instruction.opcode.mnemonic())
        .collect();
    let spill_loads = before.iter().filter(|mnemonic| mnemonic.starts_with("ldloc")).count();
    assert!(spill_loads >= 2, "receiver and callee reload from locals: {before:?}");
}

/// `switch (n) { case 0: a(); break; case 1: b(); break; }` — a dense
/// switch compiles to one jump-table instruction with two entries, and each
/// case body exits with `leave` to the switch end.
#[test]
fn dense_switch_uses_a_jump_table() {
    let mut interner = Interner::new();
    let n = interner.intern("n");
    let runtime = RuntimeLibrary::new();
    let program = FunctionLiteral::program(vec![Statement::Switch {
        discriminant: Expression::Name(n),
        cases: vec![
            SwitchCase {
                test: Some(number(0.0)),
                body: vec![
                    Statement::Expression(call(&mut interner, "a", vec![])),
                    Statement::Break,
                ],
            },
            SwitchCase {
                test: Some(number(1.0)),
                body: vec![
                    Statement::Expression(call(&mut interner, "b", vec![])),
                    Statement::Break,
                ],
            },
        ],
    }]);
    let routine = compile(&runtime, program);
    let instructions = decoded(&routine.bytes);

    let tables: Vec<&Instruction> = instructions
        .iter()
        .filter(|instruction| instruction.opcode.mnemonic() == "switch")
        .collect();
    assert_eq!(tables.len(), 1);
    let Operand::Table(targets) = &tables[0].operand else {
        panic!("switch without a table");
    };
    assert_eq!(targets.len(), 2);

    let leaves: Vec<&Instruction> = instructions
        .iter()
        .filter(|instruction| instruction.opcode.mnemonic() == "leave")
        .collect();
    assert_eq!(leaves.len(), 2);
    let Operand::Target(first) = leaves[0].operand else {
        panic!("leave without a target");
    };
    let Operand::Target(second) = leaves[1].operand else {
        panic!("leave without a target");
    };
    assert_eq!(first, second, "both breaks target the switch end");
}
