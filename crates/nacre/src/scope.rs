//! The lexical-scope model and the code it compiles to.
//!
//! Scopes live in an arena keyed by [`ScopeId`]; children refer to parents
//! only by index, so closures can outlive the syntactic function that
//! created them without reference cycles. Three kinds exist: declarative
//! scopes bind names to slots in the scope record's value array, object
//! scopes resolve names through the property protocol of a backing object
//! (the `with` form additionally supplies that object as the implicit call
//! receiver), and the distinguished global scope backs the chain's root with
//! the process-wide global instance.
//!
//! Name resolution walks leaf-to-root at compile time. Declarative scopes
//! resolve statically: a hit compiles to a direct slot load, a miss emits
//! only the parent-link hop. Object scopes cannot be resolved statically, so
//! the walk emits a runtime existence probe per object scope, with the two
//! inline-cache cell ids threaded into every property read and write. A
//! complete miss at the root compiles to a thrown reference error.

use indexmap::IndexMap;

use crate::{
    codegen::{CodeEmitter, ElementType, EmitResult, LocalId, ValueKind},
    intern::StringId,
    runtime::{ARG_SCOPE, RuntimeLibrary},
    tracer::CodegenTracer,
};

/// Index of a scope record in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ScopeId(u32);

impl ScopeId {
    /// The arena's distinguished global scope.
    pub const GLOBAL: Self = Self(0);

    fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("scope count exceeds u32"))
    }

    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What backs a scope and how names resolve against it.
#[derive(Debug)]
pub enum ScopeKind {
    /// Slot-backed: names bind to indices in the record's value array at
    /// compile time.
    Declarative {
        /// Declaration-ordered name-to-slot map.
        slots: IndexMap<StringId, u32>,
    },
    /// Property-backed: names resolve through the backing object at runtime.
    /// The backing object is produced by code emitted at scope entry.
    Object {
        /// `with`-style: a callee resolved here receives the backing object
        /// as its `this` argument.
        provides_implicit_receiver: bool,
    },
    /// The root: an object scope over the process-wide global instance.
    Global,
}

/// One lexical scope: its kind plus the parent link.
#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
}

/// Arena of scope records for one compilation.
///
/// Index 0 is always the global scope. Using indices instead of references
/// keeps the chain walkable in both directions of the borrow checker and
/// matches how emitted code stores the chain (parent links in scope
/// records).
#[derive(Debug)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl Default for ScopeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeArena {
    /// Creates an arena holding only the global scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                parent: None,
                kind: ScopeKind::Global,
            }],
        }
    }

    /// Appends a declarative scope under `parent`.
    pub fn push_declarative(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId::new(self.scopes.len());
        self.scopes.push(Scope {
            parent: Some(parent),
            kind: ScopeKind::Declarative { slots: IndexMap::new() },
        });
        id
    }

    /// Appends an object scope under `parent`.
    pub fn push_object(&mut self, parent: ScopeId, provides_implicit_receiver: bool) -> ScopeId {
        let id = ScopeId::new(self.scopes.len());
        self.scopes.push(Scope {
            parent: Some(parent),
            kind: ScopeKind::Object {
                provides_implicit_receiver,
            },
        });
        id
    }

    /// Binds `name` in a declarative scope, returning its slot. Re-declaring
    /// an existing name returns the original slot.
    ///
    /// # Panics
    /// Panics when `scope` is not declarative; only declarative scopes have
    /// compile-time bindings.
    pub fn declare(&mut self, scope: ScopeId, name: StringId) -> u32 {
        let ScopeKind::Declarative { slots } = &mut self.scopes[scope.index()].kind else {
            panic!("declare on a non-declarative scope");
        };
        let next = u32::try_from(slots.len()).expect("slot count exceeds u32");
        *slots.entry(name).or_insert(next)
    }

    /// The slot bound to `name` in `scope`, when `scope` is declarative and
    /// has it.
    #[must_use]
    pub fn slot_of(&self, scope: ScopeId, name: StringId) -> Option<u32> {
        match &self.scopes[scope.index()].kind {
            ScopeKind::Declarative { slots } => slots.get(&name).copied(),
            _ => None,
        }
    }

    /// Number of slots a declarative scope's record needs.
    #[must_use]
    pub fn slot_count(&self, scope: ScopeId) -> u32 {
        match &self.scopes[scope.index()].kind {
            ScopeKind::Declarative { slots } => u32::try_from(slots.len()).expect("slot count exceeds u32"),
            _ => 0,
        }
    }

    #[must_use]
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    /// Whether any scope on the chain from `from` to the root supplies an
    /// implicit call receiver.
    #[must_use]
    pub fn chain_has_implicit_receiver(&self, from: ScopeId) -> bool {
        let mut current = Some(from);
        while let Some(id) = current {
            let scope = self.scope(id);
            if matches!(
                scope.kind,
                ScopeKind::Object {
                    provides_implicit_receiver: true
                }
            ) {
                return true;
            }
            current = scope.parent;
        }
        false
    }
}

/// Allocator for inline-cache cells.
///
/// Every object-scope access site gets a fresh (key, index) cell pair; the
/// runtime sizes the per-routine cache array from the final count. Cells are
/// never shared between sites.
#[derive(Debug, Default)]
pub struct CacheCells {
    next: u32,
}

impl CacheCells {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the (key, index) cell pair for one access site.
    pub fn allocate_pair(&mut self) -> (i32, i32) {
        let key = self.next;
        self.next += 2;
        (key as i32, (key + 1) as i32)
    }

    /// Total cells allocated.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.next
    }
}

/// Scratch locals the scope compiler spills through.
///
/// Declared lazily, once per routine, and reused across sites; all hold
/// object references.
#[derive(Debug, Default)]
pub struct ScratchLocals {
    value: Option<LocalId>,
    receiver: Option<LocalId>,
    callee: Option<LocalId>,
}

impl ScratchLocals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn value_slot<Tr: CodegenTracer>(&mut self, em: &mut CodeEmitter<'_, Tr>) -> EmitResult<LocalId> {
        if let Some(slot) = self.value {
            return Ok(slot);
        }
        let slot = em.declare_variable(ValueKind::Object, None)?;
        self.value = Some(slot);
        Ok(slot)
    }

    fn receiver_slot<Tr: CodegenTracer>(&mut self, em: &mut CodeEmitter<'_, Tr>) -> EmitResult<LocalId> {
        if let Some(slot) = self.receiver {
            return Ok(slot);
        }
        let slot = em.declare_variable(ValueKind::Object, None)?;
        self.receiver = Some(slot);
        Ok(slot)
    }

    fn callee_slot<Tr: CodegenTracer>(&mut self, em: &mut CodeEmitter<'_, Tr>) -> EmitResult<LocalId> {
        if let Some(slot) = self.callee {
            return Ok(slot);
        }
        let slot = em.declare_variable(ValueKind::Object, None)?;
        self.callee = Some(slot);
        Ok(slot)
    }
}

/// Compiles scope-chain operations against an emitter.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScopeCompiler<'a> {
    pub scopes: &'a ScopeArena,
    pub runtime: &'a RuntimeLibrary,
    pub strict: bool,
}

impl ScopeCompiler<'_> {
    /// Emits scope entry for a declarative scope: push a record with the
    /// scope's slot count and make it the current scope.
    pub fn build_enter_declarative<Tr: CodegenTracer>(
        &self,
        em: &mut CodeEmitter<'_, Tr>,
        scope: ScopeId,
    ) -> EmitResult {
        em.load_argument(ARG_SCOPE)?;
        em.load_int32(self.scopes.slot_count(scope) as i32)?;
        em.call_static(self.runtime.methods.push_declarative_scope)?;
        em.store_argument(ARG_SCOPE)
    }

    /// Emits scope exit: restore the parent as the current scope.
    pub fn build_exit<Tr: CodegenTracer>(&self, em: &mut CodeEmitter<'_, Tr>) -> EmitResult {
        em.load_argument(ARG_SCOPE)?;
        em.load_field(self.runtime.fields.scope_parent)?;
        em.store_argument(ARG_SCOPE)
    }

    /// Emits the chain walk that finds `name` and pushes its value.
    ///
    /// Declarative hits compile to a direct slot load; object scopes get a
    /// runtime probe with a per-site cache pair; a miss at the root becomes
    /// a thrown reference error.
    pub fn build_get<Tr: CodegenTracer>(
        &self,
        em: &mut CodeEmitter<'_, Tr>,
        from: ScopeId,
        name: StringId,
        cells: &mut CacheCells,
    ) -> EmitResult {
        em.load_argument(ARG_SCOPE)?;
        let end = em.create_label();
        let mut needs_end = false;
        let mut current = Some(from);
        while let Some(id) = current {
            let scope = self.scopes.scope(id);
            match &scope.kind {
                ScopeKind::Declarative { slots } => {
                    if let Some(&slot) = slots.get(&name) {
                        em.load_field(self.runtime.fields.scope_values)?;
                        em.load_int32(slot as i32)?;
                        em.load_array_element(ElementType::Object)?;
                        break;
                    }
                    em.load_field(self.runtime.fields.scope_parent)?;
                }
                ScopeKind::Object { .. } => {
                    let miss = em.create_label();
                    em.duplicate()?;
                    em.load_string(name)?;
                    em.call_static(self.runtime.methods.has_value)?;
                    em.branch_if_zero(miss)?;
                    self.emit_cached_get(em, name, cells)?;
                    em.branch(end)?;
                    needs_end = true;
                    em.define_label_position(miss)?;
                    em.load_field(self.runtime.fields.scope_parent)?;
                }
                ScopeKind::Global => {
                    let miss = em.create_label();
                    em.duplicate()?;
                    em.load_string(name)?;
                    em.call_static(self.runtime.methods.has_value)?;
                    em.branch_if_zero(miss)?;
                    self.emit_cached_get(em, name, cells)?;
                    em.branch(end)?;
                    needs_end = true;
                    em.define_label_position(miss)?;
                    self.emit_reference_error(em, name)?;
                }
            }
            current = scope.parent;
        }
        if needs_end {
            em.define_label_position(end)?;
        }
        Ok(())
    }

    /// Emits the chain walk that stores the object on top of the stack into
    /// `name`. Object scopes try a conditional write and fall to the parent
    /// on miss; the root write is unconditional and creates the property.
    pub fn build_set<Tr: CodegenTracer>(
        &self,
        em: &mut CodeEmitter<'_, Tr>,
        from: ScopeId,
        name: StringId,
        cells: &mut CacheCells,
        scratch: &mut ScratchLocals,
    ) -> EmitResult {
        let value_slot = scratch.value_slot(em)?;
        em.store_variable(value_slot)?;
        em.load_argument(ARG_SCOPE)?;
        let end = em.create_label();
        let stored = em.create_label();
        let mut needs_cleanup = false;
        let mut current = Some(from);
        while let Some(id) = current {
            let scope = self.scopes.scope(id);
            match &scope.kind {
                ScopeKind::Declarative { slots } => {
                    if let Some(&slot) = slots.get(&name) {
                        em.load_field(self.runtime.fields.scope_values)?;
                        em.load_int32(slot as i32)?;
                        em.load_variable(value_slot)?;
                        em.store_array_element(ElementType::Object)?;
                        break;
                    }
                    em.load_field(self.runtime.fields.scope_parent)?;
                }
                ScopeKind::Object { .. } => {
                    em.duplicate()?;
                    em.load_string(name)?;
                    em.load_variable(value_slot)?;
                    let (key_cell, index_cell) = cells.allocate_pair();
                    em.load_int32(key_cell)?;
                    em.load_int32(index_cell)?;
                    em.call_static(self.runtime.methods.set_value_if_exists)?;
                    em.branch_if_not_zero(stored)?;
                    needs_cleanup = true;
                    em.load_field(self.runtime.fields.scope_parent)?;
                }
                ScopeKind::Global => {
                    em.load_string(name)?;
                    em.load_variable(value_slot)?;
                    em.call_static(self.runtime.methods.set_value)?;
                    break;
                }
            }
            current = scope.parent;
        }
        if needs_cleanup {
            em.branch(end)?;
            em.define_label_position(stored)?;
            em.pop()?;
            em.define_label_position(end)?;
        }
        Ok(())
    }

    /// Emits callee resolution for a call site, leaving `this` under the
    /// callee function on the stack.
    ///
    /// When no scope on the chain supplies an implicit receiver this is the
    /// default receiver followed by a plain get. Otherwise each resolution
    /// branch spills the callee and its receiver into scratch locals: a hit
    /// in a `with` scope passes that scope's backing object, every other hit
    /// passes the default.
    pub fn build_call_target<Tr: CodegenTracer>(
        &self,
        em: &mut CodeEmitter<'_, Tr>,
        from: ScopeId,
        name: StringId,
        cells: &mut CacheCells,
        scratch: &mut ScratchLocals,
    ) -> EmitResult {
        if !self.scopes.chain_has_implicit_receiver(from) {
            self.emit_default_receiver(em)?;
            return self.build_get(em, from, name, cells);
        }

        let receiver_slot = scratch.receiver_slot(em)?;
        let callee_slot = scratch.callee_slot(em)?;
        em.load_argument(ARG_SCOPE)?;
        let done = em.create_label();
        let mut current = Some(from);
        while let Some(id) = current {
            let scope = self.scopes.scope(id);
            match &scope.kind {
                ScopeKind::Declarative { slots } => {
                    if let Some(&slot) = slots.get(&name) {
                        em.load_field(self.runtime.fields.scope_values)?;
                        em.load_int32(slot as i32)?;
                        em.load_array_element(ElementType::Object)?;
                        em.store_variable(callee_slot)?;
                        self.emit_default_receiver(em)?;
                        em.store_variable(receiver_slot)?;
                        break;
                    }
                    em.load_field(self.runtime.fields.scope_parent)?;
                }
                ScopeKind::Object {
                    provides_implicit_receiver,
                } => {
                    let miss = em.create_label();
                    em.duplicate()?;
                    em.load_string(name)?;
                    em.call_static(self.runtime.methods.has_value)?;
                    em.branch_if_zero(miss)?;
                    if *provides_implicit_receiver {
                        em.duplicate()?;
                        em.store_variable(receiver_slot)?;
                    } else {
                        self.emit_default_receiver(em)?;
                        em.store_variable(receiver_slot)?;
                    }
                    self.emit_cached_get(em, name, cells)?;
                    em.store_variable(callee_slot)?;
                    em.branch(done)?;
                    em.define_label_position(miss)?;
                    em.load_field(self.runtime.fields.scope_parent)?;
                }
                ScopeKind::Global => {
                    let miss = em.create_label();
                    em.duplicate()?;
                    em.load_string(name)?;
                    em.call_static(self.runtime.methods.has_value)?;
                    em.branch_if_zero(miss)?;
                    self.emit_default_receiver(em)?;
                    em.store_variable(receiver_slot)?;
                    self.emit_cached_get(em, name, cells)?;
                    em.store_variable(callee_slot)?;
                    em.branch(done)?;
                    em.define_label_position(miss)?;
                    self.emit_reference_error(em, name)?;
                }
            }
            current = scope.parent;
        }
        em.define_label_position(done)?;
        em.load_variable(receiver_slot)?;
        em.load_variable(callee_slot)?;
        Ok(())
    }

    /// The cached property read against the scope object on top of the
    /// stack.
    fn emit_cached_get<Tr: CodegenTracer>(
        &self,
        em: &mut CodeEmitter<'_, Tr>,
        name: StringId,
        cells: &mut CacheCells,
    ) -> EmitResult {
        em.load_string(name)?;
        let (key_cell, index_cell) = cells.allocate_pair();
        em.load_int32(key_cell)?;
        em.load_int32(index_cell)?;
        em.call_static(self.runtime.methods.get_value)
    }

    /// Drops the scope object on top of the stack and throws the
    /// unresolvable-reference error for `name`.
    fn emit_reference_error<Tr: CodegenTracer>(&self, em: &mut CodeEmitter<'_, Tr>, name: StringId) -> EmitResult {
        em.pop()?;
        em.load_string(name)?;
        em.new_object(self.runtime.methods.reference_error_ctor)?;
        em.throw_exception()
    }

    /// The receiver used when the callee was not resolved in a `with`
    /// scope: the global instance, or `undefined` under strict mode.
    fn emit_default_receiver<Tr: CodegenTracer>(&self, em: &mut CodeEmitter<'_, Tr>) -> EmitResult {
        if self.strict {
            em.load_field(self.runtime.fields.undefined_value)
        } else {
            em.load_field(self.runtime.fields.global_instance)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    #[test]
    fn arena_starts_with_the_global_scope() {
        let arena = ScopeArena::new();
        assert!(matches!(arena.scope(ScopeId::GLOBAL).kind, ScopeKind::Global));
        assert!(arena.scope(ScopeId::GLOBAL).parent.is_none());
    }

    #[test]
    fn declare_is_idempotent_per_name() {
        let mut interner = Interner::new();
        let mut arena = ScopeArena::new();
        let scope = arena.push_declarative(ScopeId::GLOBAL);
        let a = interner.intern("a");
        let b = interner.intern("b");
        assert_eq!(arena.declare(scope, a), 0);
        assert_eq!(arena.declare(scope, b), 1);
        assert_eq!(arena.declare(scope, a), 0);
        assert_eq!(arena.slot_count(scope), 2);
        assert_eq!(arena.slot_of(scope, b), Some(1));
    }

    #[test]
    fn implicit_receiver_detection_walks_the_chain() {
        let mut arena = ScopeArena::new();
        let function = arena.push_declarative(ScopeId::GLOBAL);
        let with_scope = arena.push_object(function, true);
        let inner = arena.push_declarative(with_scope);
        assert!(arena.chain_has_implicit_receiver(inner));
        assert!(!arena.chain_has_implicit_receiver(function));
    }

    #[test]
    fn cache_cells_come_in_fresh_pairs() {
        let mut cells = CacheCells::new();
        assert_eq!(cells.allocate_pair(), (0, 1));
        assert_eq!(cells.allocate_pair(), (2, 3));
        assert_eq!(cells.count(), 4);
    }
}
