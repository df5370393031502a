//! Code-generation tracing infrastructure.
//!
//! Provides a trait-based tracing system for the emitter with zero-cost
//! abstraction. When using [`NoopTracer`], all trace methods compile away
//! entirely via monomorphization.
//!
//! # Architecture
//!
//! The [`CodegenTracer`] trait defines hook points at key emission events
//! (instruction emission, label definition, exception-region transitions).
//! Concrete implementations collect different kinds of data:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable emission log to stderr |
//! | [`RecordingTracer`] | Full event recording for tests or post-mortem |
//!
//! The emitter carries the tracer as a type parameter, so the compiler can
//! inline and eliminate no-op calls at compile time.

use crate::codegen::{AnyOpcode, ClauseKind};

/// An exception-region transition observed during emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionEvent {
    /// A new region was opened.
    Begin,
    /// A clause of the given kind was entered.
    Clause(ClauseKind),
    /// The region was closed.
    End,
}

/// Trace event emitted during code generation.
///
/// Used by [`RecordingTracer`] to capture a full emission trace.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// An instruction was written at the given offset.
    Instruction {
        /// Byte offset of the opcode in the code buffer.
        offset: u32,
        /// The opcode that was written.
        opcode: AnyOpcode,
        /// Evaluation-stack depth after the instruction's effect.
        stack_depth: u32,
    },
    /// A label's position was defined.
    LabelDefined {
        /// Raw label id.
        label: u32,
        /// Byte offset the label was bound to.
        offset: u32,
    },
    /// An exception-region transition occurred.
    Region {
        event: RegionEvent,
        /// Byte offset at the time of the transition.
        offset: u32,
    },
}

/// Trait for code-generation tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`] requires
/// zero lines of code and compiles to zero instructions. Implementations only
/// override the hooks they care about.
pub trait CodegenTracer {
    /// Called after each instruction is written.
    ///
    /// This is the hottest hook; implementations should be lightweight.
    #[inline(always)]
    fn on_instruction(&mut self, _offset: u32, _opcode: AnyOpcode, _stack_depth: u32) {}

    /// Called when a label's position is defined.
    #[inline(always)]
    fn on_label_defined(&mut self, _label: u32, _offset: u32) {}

    /// Called on exception-region transitions.
    #[inline(always)]
    fn on_region(&mut self, _event: RegionEvent, _offset: u32) {}
}

/// A mutable reference forwards to its referent, so callers can hand an
/// emitter a tracer and still own it after completion.
impl<T: CodegenTracer> CodegenTracer for &mut T {
    fn on_instruction(&mut self, offset: u32, opcode: AnyOpcode, stack_depth: u32) {
        (**self).on_instruction(offset, opcode, stack_depth);
    }

    fn on_label_defined(&mut self, label: u32, offset: u32) {
        (**self).on_label_defined(label, offset);
    }

    fn on_region(&mut self, event: RegionEvent, offset: u32) {
        (**self).on_region(event, offset);
    }
}

/// Zero-cost tracer: every hook is the default no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl CodegenTracer for NoopTracer {}

/// Records every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded events, in emission order.
    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Consumes the tracer, returning the recorded events.
    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl CodegenTracer for RecordingTracer {
    fn on_instruction(&mut self, offset: u32, opcode: AnyOpcode, stack_depth: u32) {
        self.events.push(TraceEvent::Instruction {
            offset,
            opcode,
            stack_depth,
        });
    }

    fn on_label_defined(&mut self, label: u32, offset: u32) {
        self.events.push(TraceEvent::LabelDefined { label, offset });
    }

    fn on_region(&mut self, event: RegionEvent, offset: u32) {
        self.events.push(TraceEvent::Region { event, offset });
    }
}

/// Logs emissions to stderr, one line per event.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CodegenTracer for StderrTracer {
    fn on_instruction(&mut self, offset: u32, opcode: AnyOpcode, stack_depth: u32) {
        eprintln!("{offset:#06x}: {:<12} [depth {stack_depth}]", opcode.mnemonic());
    }

    fn on_label_defined(&mut self, label: u32, offset: u32) {
        eprintln!("{offset:#06x}: label {label}:");
    }

    fn on_region(&mut self, event: RegionEvent, offset: u32) {
        eprintln!("{offset:#06x}: region {event:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::Opcode;

    #[test]
    fn recording_tracer_captures_order() {
        let mut tracer = RecordingTracer::new();
        tracer.on_instruction(0, Opcode::Ldnull.into(), 1);
        tracer.on_label_defined(3, 1);
        assert_eq!(
            tracer.events(),
            &[
                TraceEvent::Instruction {
                    offset: 0,
                    opcode: Opcode::Ldnull.into(),
                    stack_depth: 1,
                },
                TraceEvent::LabelDefined { label: 3, offset: 1 },
            ]
        );
    }
}
