//! Opaque loader tokens.
//!
//! The byte stream references types, methods, fields, and string literals
//! through 4-byte tokens whose high byte tags the table they index. The
//! compiler never inspects what a token denotes at runtime; it only needs the
//! signatures registered here to validate call emissions.

use smallvec::SmallVec;

use crate::{
    codegen::{KindSet, ValueKind},
    intern::StringId,
};

const TAG_TYPE: u32 = 0x0100_0000;
const TAG_FIELD: u32 = 0x0400_0000;
const TAG_METHOD: u32 = 0x0A00_0000;
const TAG_STRING: u32 = 0x7000_0000;
const INDEX_MASK: u32 = 0x00FF_FFFF;

/// Token identifying a runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TypeToken(u32);

/// Token identifying a runtime method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct MethodToken(u32);

/// Token identifying a runtime field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FieldToken(u32);

impl TypeToken {
    /// The 4-byte value written into the code stream.
    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }
}

impl MethodToken {
    /// The 4-byte value written into the code stream.
    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }
}

impl FieldToken {
    /// The 4-byte value written into the code stream.
    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }
}

/// The 4-byte token for a string literal: the string tag over the interner id.
#[must_use]
pub fn string_token(id: StringId) -> u32 {
    TAG_STRING | (id.index() as u32 & INDEX_MASK)
}

/// How a method is invoked, which decides receiver handling at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodFlavor {
    /// No receiver; all operands are declared parameters.
    Static,
    /// Pops an object receiver beneath the declared parameters.
    Instance,
    /// Allocates the owner type and pushes the new instance.
    Constructor,
}

/// A method's declared shape, validated against popped operands at call sites.
#[derive(Debug, Clone)]
pub struct MethodSignature {
    /// Parameter kinds in declaration order (receiver excluded).
    pub params: SmallVec<[ValueKind; 6]>,
    /// Return kind; `None` for void.
    pub returns: Option<ValueKind>,
    /// Invocation flavor.
    pub flavor: MethodFlavor,
}

#[derive(Debug)]
pub(crate) struct TypeDef {
    pub name: Box<str>,
    /// Stack kinds this type boxes from; empty for types with no primitive
    /// representation.
    pub unboxed: KindSet,
}

#[derive(Debug)]
pub(crate) struct MethodDef {
    pub name: Box<str>,
    pub owner: TypeToken,
    pub signature: MethodSignature,
}

#[derive(Debug)]
pub(crate) struct FieldDef {
    pub name: Box<str>,
    pub owner: TypeToken,
    pub kind: ValueKind,
    pub is_static: bool,
}

/// Registry of every type, method, and field the compiler may reference.
///
/// Registration order is the token index; tokens from one table are
/// meaningless against another.
#[derive(Debug, Default)]
pub struct TokenTable {
    types: Vec<TypeDef>,
    methods: Vec<MethodDef>,
    fields: Vec<FieldDef>,
}

impl TokenTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type; `unboxed` lists the stack kinds a box instruction
    /// for this type accepts.
    pub fn define_type(&mut self, name: &str, unboxed: KindSet) -> TypeToken {
        let index = u32::try_from(self.types.len()).expect("type count exceeds u32");
        self.types.push(TypeDef {
            name: name.into(),
            unboxed,
        });
        TypeToken(TAG_TYPE | index)
    }

    /// Registers a method with its signature.
    pub fn define_method(
        &mut self,
        owner: TypeToken,
        name: &str,
        params: &[ValueKind],
        returns: Option<ValueKind>,
        flavor: MethodFlavor,
    ) -> MethodToken {
        let index = u32::try_from(self.methods.len()).expect("method count exceeds u32");
        self.methods.push(MethodDef {
            name: name.into(),
            owner,
            signature: MethodSignature {
                params: SmallVec::from_slice(params),
                returns,
                flavor,
            },
        });
        MethodToken(TAG_METHOD | index)
    }

    /// Registers a field.
    pub fn define_field(&mut self, owner: TypeToken, name: &str, kind: ValueKind, is_static: bool) -> FieldToken {
        let index = u32::try_from(self.fields.len()).expect("field count exceeds u32");
        self.fields.push(FieldDef {
            name: name.into(),
            owner,
            kind,
            is_static,
        });
        FieldToken(TAG_FIELD | index)
    }

    pub(crate) fn type_def(&self, token: TypeToken) -> &TypeDef {
        &self.types[token.index()]
    }

    pub(crate) fn method_def(&self, token: MethodToken) -> &MethodDef {
        &self.methods[token.index()]
    }

    pub(crate) fn field_def(&self, token: FieldToken) -> &FieldDef {
        &self.fields[token.index()]
    }

    /// Best-effort description of a raw token for disassembly output.
    #[must_use]
    pub fn describe(&self, raw: u32) -> Option<String> {
        let index = (raw & INDEX_MASK) as usize;
        match raw & !INDEX_MASK {
            TAG_TYPE => self.types.get(index).map(|def| def.name.to_string()),
            TAG_METHOD => {
                let def = self.methods.get(index)?;
                let owner = &self.types[def.owner.index()].name;
                Some(format!("{owner}::{}", def.name))
            }
            TAG_FIELD => {
                let def = self.fields.get(index)?;
                let owner = &self.types[def.owner.index()].name;
                Some(format!("{owner}::{}", def.name))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_carry_table_tags() {
        let mut table = TokenTable::new();
        let object = table.define_type("object", KindSet::NONE);
        let number = table.define_type("number", KindSet::NUMERIC);
        assert_eq!(object.raw(), 0x0100_0000);
        assert_eq!(number.raw(), 0x0100_0001);

        let method = table.define_method(object, "to_string", &[], Some(ValueKind::Object), MethodFlavor::Instance);
        assert_eq!(method.raw(), 0x0A00_0000);

        let field = table.define_field(object, "instance", ValueKind::Object, true);
        assert_eq!(field.raw(), 0x0400_0000);
    }

    #[test]
    fn describe_renders_owner_and_name() {
        let mut table = TokenTable::new();
        let scope = table.define_type("scope_record", KindSet::NONE);
        let field = table.define_field(scope, "parent", ValueKind::Object, false);
        assert_eq!(table.describe(field.raw()).unwrap(), "scope_record::parent");
        assert_eq!(table.describe(0x7000_0005), None);
    }

    #[test]
    fn string_tokens_use_the_string_tag() {
        let id = StringId::from_index(7);
        assert_eq!(string_token(id), 0x7000_0007);
    }
}
