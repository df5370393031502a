//! Compiled routine artifacts and the loader-facing payload.
//!
//! A finished compilation produces a [`CompiledFunction`]: the byte stream
//! plus everything the runtime loader needs to construct an invocable
//! (max stack, local signature, exception table) and everything tooling
//! needs (location table, nested functions, cache-cell count). Artifacts are
//! serde-derived and round-trip through postcard for snapshotting.

use crate::{intern::StringId, parse::SourceSpan};

/// Maps a byte offset in the code stream to the source range that produced
/// it. Recorded only when debug info is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LocationEntry {
    /// Byte offset of the first instruction of the range.
    pub offset: u32,
    /// Source range the instructions came from.
    pub span: SourceSpan,
}

impl LocationEntry {
    #[must_use]
    pub fn new(offset: u32, span: SourceSpan) -> Self {
        Self { offset, span }
    }
}

/// A compiled routine: the executable byte stream and its metadata.
///
/// The calling convention of every compiled routine is
/// `(scope, this, arguments[]) -> value`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompiledFunction {
    /// Function name, if the source gave one.
    pub name: Option<StringId>,
    /// Number of declared formal parameters.
    pub param_count: u32,
    /// The executable byte stream.
    pub bytes: Vec<u8>,
    /// Deepest evaluation stack the routine can reach; told to the loader.
    pub max_stack: u32,
    /// The loader's encoding of the ordered local slot kinds.
    pub local_signature: Vec<u8>,
    /// Serialized exception-handling table; empty when the routine has no
    /// protected regions.
    pub exception_table: Vec<u8>,
    /// Offset-to-source mapping; empty unless debug info was requested.
    pub location_table: Vec<LocationEntry>,
    /// Routines for nested function literals, indexed by the ids embedded in
    /// this routine's byte stream.
    pub inner_functions: Vec<CompiledFunction>,
    /// Number of inline-cache cells the routine's scope accesses allocate;
    /// the loader sizes the cache array from this.
    pub cache_cell_count: u32,
    /// Name of the source document the location table refers to, when debug
    /// info was requested with one.
    pub document: Option<String>,
}

impl CompiledFunction {
    /// The loader payload for this routine (inner functions excluded; the
    /// host loads those separately and provides the id mapping).
    #[must_use]
    pub fn payload(&self) -> RoutinePayload<'_> {
        RoutinePayload {
            bytes: &self.bytes,
            code_length: u32::try_from(self.bytes.len()).expect("code length exceeds u32"),
            max_stack: self.max_stack,
            local_signature: &self.local_signature,
            exception_table: &self.exception_table,
        }
    }

    /// Serializes the artifact, inner functions included, for snapshotting.
    ///
    /// # Panics
    /// Panics if serialization fails, which should not happen for well-formed
    /// artifacts.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("compiled function serialization should not fail")
    }

    /// Restores an artifact from [`snapshot`](Self::snapshot) bytes.
    pub fn restore(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// What the runtime loader receives for one routine.
#[derive(Debug, Clone, Copy)]
pub struct RoutinePayload<'a> {
    pub bytes: &'a [u8],
    pub code_length: u32,
    pub max_stack: u32,
    pub local_signature: &'a [u8],
    pub exception_table: &'a [u8],
}

/// Handle the loader returns for a loaded routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutineId(pub u32);

/// The outbound interface to the runtime loader.
///
/// The compiler finishes by handing each routine's payload to a loader; the
/// loader turns it into an invocable. Hosts emitting to a persisted module
/// must serialize access themselves (one writer per module).
pub trait RoutineLoader {
    /// Loads one routine and returns its handle.
    fn load(&mut self, payload: RoutinePayload<'_>) -> RoutineId;
}

/// In-memory loader that copies payloads; the dynamic (non-persisted) output
/// target, also convenient in tests.
#[derive(Debug, Default)]
pub struct DynamicTarget {
    routines: Vec<LoadedRoutine>,
}

/// One routine captured by [`DynamicTarget`].
#[derive(Debug, Clone)]
pub struct LoadedRoutine {
    pub bytes: Vec<u8>,
    pub max_stack: u32,
    pub local_signature: Vec<u8>,
    pub exception_table: Vec<u8>,
}

impl DynamicTarget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routines in load order.
    #[must_use]
    pub fn routines(&self) -> &[LoadedRoutine] {
        &self.routines
    }
}

impl RoutineLoader for DynamicTarget {
    fn load(&mut self, payload: RoutinePayload<'_>) -> RoutineId {
        let id = RoutineId(u32::try_from(self.routines.len()).expect("routine count exceeds u32"));
        self.routines.push(LoadedRoutine {
            bytes: payload.bytes.to_vec(),
            max_stack: payload.max_stack,
            local_signature: payload.local_signature.to_vec(),
            exception_table: payload.exception_table.to_vec(),
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CompiledFunction {
        CompiledFunction {
            name: None,
            param_count: 2,
            bytes: vec![0x14, 0x2A],
            max_stack: 1,
            local_signature: vec![0x07, 0],
            exception_table: Vec::new(),
            location_table: Vec::new(),
            inner_functions: Vec::new(),
            cache_cell_count: 0,
            document: None,
        }
    }

    #[test]
    fn snapshot_round_trip() {
        let original = sample();
        let restored = CompiledFunction::restore(&original.snapshot()).unwrap();
        assert_eq!(restored.bytes, original.bytes);
        assert_eq!(restored.max_stack, original.max_stack);
        assert_eq!(restored.param_count, original.param_count);
    }

    #[test]
    fn dynamic_target_captures_payloads() {
        let function = sample();
        let mut target = DynamicTarget::new();
        let id = target.load(function.payload());
        assert_eq!(id, RoutineId(0));
        assert_eq!(target.routines()[0].bytes, function.bytes);
        assert_eq!(target.routines()[0].max_stack, 1);
    }
}
