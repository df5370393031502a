// Use codspeed-criterion-compat when running on CodSpeed (CI), real criterion otherwise (for flamegraphs)
#[cfg(codspeed)]
use codspeed_criterion_compat::{Criterion, black_box, criterion_group, criterion_main};
#[cfg(not(codspeed))]
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use nacre::ast::{BinaryOp, Expression, FunctionLiteral, Statement};
use nacre::{CompileOptions, FunctionGenerator, Interner, RuntimeLibrary};

/// A loop-heavy program exercising slot access, the global property
/// protocol, branch fix-ups, and an exception region.
fn build_program(interner: &mut Interner) -> FunctionLiteral {
    let i = interner.intern("i");
    let total = interner.intern("total");
    let e = interner.intern("e");
    FunctionLiteral::program(vec![
        Statement::VarDeclaration {
            declarations: vec![(i, Some(Expression::Number(0.0))), (total, Some(Expression::Number(0.0)))],
        },
        Statement::While {
            condition: Expression::Binary {
                op: BinaryOp::LessThan,
                left: Box::new(Expression::Name(i)),
                right: Box::new(Expression::Number(1000.0)),
            },
            body: Box::new(Statement::Block(vec![
                Statement::Expression(Expression::Assignment {
                    target: total,
                    op: Some(BinaryOp::Add),
                    value: Box::new(Expression::Name(i)),
                }),
                Statement::Expression(Expression::Assignment {
                    target: i,
                    op: Some(BinaryOp::Add),
                    value: Box::new(Expression::Number(1.0)),
                }),
            ])),
        },
        Statement::Try {
            body: vec![Statement::Return(Some(Expression::Name(total)))],
            catch: Some(nacre::ast::CatchClause {
                binding: e,
                body: vec![Statement::Return(Some(Expression::Null))],
            }),
            finally: None,
        },
    ])
}

fn bench_compile(criterion: &mut Criterion) {
    let runtime = RuntimeLibrary::new();
    let mut interner = Interner::new();
    let program = build_program(&mut interner);

    criterion.bench_function("compile_loop_program", |bench| {
        bench.iter(|| {
            let routine = FunctionGenerator::from_ast(&runtime, CompileOptions::checked(), black_box(program.clone()))
                .compile()
                .unwrap();
            black_box(routine.bytes.len());
        });
    });

    criterion.bench_function("compile_loop_program_unchecked", |bench| {
        let options = CompileOptions {
            checked: false,
            ..CompileOptions::new()
        };
        bench.iter(|| {
            let routine = FunctionGenerator::from_ast(&runtime, options.clone(), black_box(program.clone()))
                .compile()
                .unwrap();
            black_box(routine.max_stack);
        });
    });
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
