//! The well-known runtime surface the compiler emits calls against.
//!
//! The runtime value domain lives outside this crate; the compiler only
//! needs tokens for the handful of types, fields, and helper methods the
//! generated code touches: scope records and their access protocol, the
//! boxing types, the global/undefined statics, and the call protocol.
//! [`RuntimeLibrary::new`] registers all of them into one [`TokenTable`]
//! with the signatures the emitter validates against.

use crate::{
    codegen::{KindSet, ValueKind},
    tokens::{FieldToken, MethodFlavor, MethodToken, TokenTable, TypeToken},
};

/// Calling convention: argument 0 is the current-scope handle.
pub const ARG_SCOPE: usize = 0;
/// Calling convention: argument 1 is the `this` receiver.
pub const ARG_THIS: usize = 1;
/// Calling convention: argument 2 is the caller-built arguments array.
pub const ARG_ARGUMENTS: usize = 2;

/// Well-known runtime types.
#[derive(Debug)]
pub struct WellKnownTypes {
    pub object: TypeToken,
    /// Boxes from int32 or float.
    pub number: TypeToken,
    /// Boxes from int32.
    pub boolean: TypeToken,
    pub string: TypeToken,
    pub function: TypeToken,
    /// Every script-visible exception; catch clauses match against this.
    pub script_error: TypeToken,
    pub reference_error: TypeToken,
    /// Scope records: `parent` link plus the slot-value array.
    pub scope_record: TypeToken,
}

/// Well-known runtime fields.
#[derive(Debug)]
pub struct WellKnownFields {
    /// The process-wide global object (static).
    pub global_instance: FieldToken,
    /// The `undefined` singleton (static).
    pub undefined_value: FieldToken,
    /// A scope record's parent link (instance).
    pub scope_parent: FieldToken,
    /// A scope record's slot-value array (instance).
    pub scope_values: FieldToken,
}

/// Well-known runtime helper methods.
#[derive(Debug)]
pub struct WellKnownMethods {
    /// `(parent, slot_count) -> scope` — enter a declarative scope.
    pub push_declarative_scope: MethodToken,
    /// `(parent, backing_object) -> scope` — enter an object scope.
    pub push_object_scope: MethodToken,
    /// `(value) -> object` — coercion applied to `with` operands.
    pub to_object: MethodToken,
    /// `(scope, name) -> int32` — property-existence probe.
    pub has_value: MethodToken,
    /// `(scope, name, cache_key_cell, cache_index_cell) -> value` —
    /// cached property read.
    pub get_value: MethodToken,
    /// `(scope, name, value, cache_key_cell, cache_index_cell) -> int32` —
    /// cached conditional write; reports whether the name existed.
    pub set_value_if_exists: MethodToken,
    /// `(scope, name, value)` — unconditional write; creates the property.
    pub set_value: MethodToken,
    /// `(name) -> error` — constructor for unresolvable-reference errors.
    pub reference_error_ctor: MethodToken,
    /// `(this, function, arguments[]) -> value` — the call protocol.
    pub call_function: MethodToken,
    /// `(scope, function_id) -> function` — closes a nested routine over
    /// the live scope chain.
    pub create_function: MethodToken,
    /// `(arguments[], index) -> value` — formal binding with the undefined
    /// default for missing arguments.
    pub argument_or_undefined: MethodToken,
    /// `(value) -> float` — numeric coercion.
    pub to_number: MethodToken,
    /// `(value) -> int32` — truthiness coercion.
    pub to_boolean: MethodToken,
    /// `(value) -> int32` — 32-bit integer coercion.
    pub to_int32: MethodToken,
    /// `(value) -> int32` — unsigned 32-bit coercion (held as int32).
    pub to_uint32: MethodToken,
    /// `(left, right) -> value` — the addition operator, including string
    /// concatenation.
    pub add_values: MethodToken,
    /// `(left, right) -> int32` — loose equality.
    pub equals: MethodToken,
    /// `(left, right) -> int32` — strict equality.
    pub strict_equals: MethodToken,
    /// `(value) -> int32` — jump-table index for dense switches; yields an
    /// out-of-range index for values no integral case can match.
    pub to_switch_index: MethodToken,
}

/// The registered runtime surface: one token table plus handles for
/// everything in it.
#[derive(Debug)]
pub struct RuntimeLibrary {
    pub tokens: TokenTable,
    pub types: WellKnownTypes,
    pub fields: WellKnownFields,
    pub methods: WellKnownMethods,
}

impl Default for RuntimeLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeLibrary {
    #[must_use]
    pub fn new() -> Self {
        let mut tokens = TokenTable::new();
        const OBJ: ValueKind = ValueKind::Object;
        const I32: ValueKind = ValueKind::Int32;

        let object = tokens.define_type("object", KindSet::NONE);
        let number = tokens.define_type("number", KindSet::INT32.with(ValueKind::Float));
        let boolean = tokens.define_type("boolean", KindSet::INT32);
        let string = tokens.define_type("string", KindSet::NONE);
        let function = tokens.define_type("function", KindSet::NONE);
        let script_error = tokens.define_type("script_error", KindSet::NONE);
        let reference_error = tokens.define_type("reference_error", KindSet::NONE);
        let scope_record = tokens.define_type("scope_record", KindSet::NONE);
        let global_object = tokens.define_type("global_object", KindSet::NONE);
        let type_converter = tokens.define_type("type_converter", KindSet::NONE);
        let operations = tokens.define_type("operations", KindSet::NONE);

        let global_instance = tokens.define_field(global_object, "instance", OBJ, true);
        let undefined_value = tokens.define_field(global_object, "undefined", OBJ, true);
        let scope_parent = tokens.define_field(scope_record, "parent", OBJ, false);
        let scope_values = tokens.define_field(scope_record, "values", OBJ, false);

        let st = MethodFlavor::Static;
        let push_declarative_scope =
            tokens.define_method(scope_record, "push_declarative", &[OBJ, I32], Some(OBJ), st);
        let push_object_scope = tokens.define_method(scope_record, "push_object", &[OBJ, OBJ], Some(OBJ), st);
        let to_object = tokens.define_method(type_converter, "to_object", &[OBJ], Some(OBJ), st);
        let has_value = tokens.define_method(scope_record, "has_value", &[OBJ, OBJ], Some(I32), st);
        let get_value = tokens.define_method(scope_record, "get_value", &[OBJ, OBJ, I32, I32], Some(OBJ), st);
        let set_value_if_exists =
            tokens.define_method(scope_record, "set_value_if_exists", &[OBJ, OBJ, OBJ, I32, I32], Some(I32), st);
        let set_value = tokens.define_method(scope_record, "set_value", &[OBJ, OBJ, OBJ], None, st);
        let reference_error_ctor =
            tokens.define_method(reference_error, ".ctor", &[OBJ], None, MethodFlavor::Constructor);
        let call_function = tokens.define_method(operations, "call_function", &[OBJ, OBJ, OBJ], Some(OBJ), st);
        let create_function = tokens.define_method(operations, "create_function", &[OBJ, I32], Some(OBJ), st);
        let argument_or_undefined =
            tokens.define_method(operations, "argument_or_undefined", &[OBJ, I32], Some(OBJ), st);
        let to_number = tokens.define_method(type_converter, "to_number", &[OBJ], Some(ValueKind::Float), st);
        let to_boolean = tokens.define_method(type_converter, "to_boolean", &[OBJ], Some(I32), st);
        let to_int32 = tokens.define_method(type_converter, "to_int32", &[OBJ], Some(I32), st);
        let to_uint32 = tokens.define_method(type_converter, "to_uint32", &[OBJ], Some(I32), st);
        let add_values = tokens.define_method(operations, "add", &[OBJ, OBJ], Some(OBJ), st);
        let equals = tokens.define_method(operations, "equals", &[OBJ, OBJ], Some(I32), st);
        let strict_equals = tokens.define_method(operations, "strict_equals", &[OBJ, OBJ], Some(I32), st);
        let to_switch_index = tokens.define_method(type_converter, "to_switch_index", &[OBJ], Some(I32), st);

        Self {
            tokens,
            types: WellKnownTypes {
                object,
                number,
                boolean,
                string,
                function,
                script_error,
                reference_error,
                scope_record,
            },
            fields: WellKnownFields {
                global_instance,
                undefined_value,
                scope_parent,
                scope_values,
            },
            methods: WellKnownMethods {
                push_declarative_scope,
                push_object_scope,
                to_object,
                has_value,
                get_value,
                set_value_if_exists,
                set_value,
                reference_error_ctor,
                call_function,
                create_function,
                argument_or_undefined,
                to_number,
                to_boolean,
                to_int32,
                to_uint32,
                add_values,
                equals,
                strict_equals,
                to_switch_index,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxing_kinds() {
        let runtime = RuntimeLibrary::new();
        let number = runtime.tokens.type_def(runtime.types.number).unboxed;
        assert!(number.contains(ValueKind::Int32));
        assert!(number.contains(ValueKind::Float));
        assert!(!number.contains(ValueKind::Object));
        let boolean = runtime.tokens.type_def(runtime.types.boolean).unboxed;
        assert!(boolean.contains(ValueKind::Int32));
        assert!(!boolean.contains(ValueKind::Float));
    }

    #[test]
    fn scope_helpers_are_registered() {
        let runtime = RuntimeLibrary::new();
        let described = runtime.tokens.describe(runtime.methods.get_value.raw()).unwrap();
        assert_eq!(described, "scope_record::get_value");
        let described = runtime.tokens.describe(runtime.fields.scope_parent.raw()).unwrap();
        assert_eq!(described, "scope_record::parent");
    }
}
