#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing in encoders is checked by construction")]
#![expect(clippy::cast_sign_loss, reason = "byte-level encoders reinterpret signs intentionally")]
#![expect(clippy::cast_possible_wrap, reason = "token and slot indices stay well below the sign bit")]
#![expect(clippy::missing_panics_doc, reason = "panics guard internal invariants, not caller input")]

pub mod ast;
mod code;
pub mod codegen;
mod generator;
mod intern;
mod options;
mod parse;
mod runtime;
mod scope;
mod tokens;
pub mod tracer;

pub use crate::{
    code::{CompiledFunction, DynamicTarget, LoadedRoutine, LocationEntry, RoutineId, RoutineLoader, RoutinePayload},
    codegen::{CodeEmitter, EmitError, EmitterConfig, ValueKind},
    generator::{CompileError, FunctionGenerator},
    intern::{Interner, StringId},
    options::CompileOptions,
    parse::{ParseError, SourceParser, SourceSpan},
    runtime::{ARG_ARGUMENTS, ARG_SCOPE, ARG_THIS, RuntimeLibrary},
    scope::{CacheCells, ScopeArena, ScopeId, ScopeKind, ScratchLocals},
    tokens::{FieldToken, MethodFlavor, MethodToken, TokenTable, TypeToken, string_token},
    tracer::{CodegenTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
};
