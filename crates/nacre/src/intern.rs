//! String interning for identifiers and string literals.
//!
//! The AST and the emitted byte stream refer to strings only through
//! [`StringId`] indices; the interner owns the single copy of each string.
//! Ids are stable for the lifetime of the interner, so a compiled routine and
//! the interner that fed it can be handed to the loader together.

use ahash::AHashMap;

/// Index into the string interner's storage.
///
/// Uses `u32` to save space (4 bytes vs 8 bytes for `usize`). This limits us
/// to ~4 billion unique interns, which is more than sufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    /// Creates a StringId from a raw index value.
    ///
    /// Used when reconstructing ids from token operands stored in bytecode.
    /// The caller is responsible for ensuring the index is valid.
    #[inline]
    #[must_use]
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stores unique strings and hands out [`StringId`]s for them.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Interner {
    strings: Vec<Box<str>>,
    lookup: AHashMap<Box<str>, StringId>,
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `value`, returning the existing id if it was seen before.
    pub fn intern(&mut self, value: &str) -> StringId {
        if let Some(&id) = self.lookup.get(value) {
            return id;
        }
        let id = StringId(u32::try_from(self.strings.len()).expect("interned string count exceeds u32"));
        self.strings.push(value.into());
        self.lookup.insert(value.into(), id);
        id
    }

    /// Resolves an id back to its string.
    ///
    /// # Panics
    /// Panics if `id` did not come from this interner.
    #[must_use]
    pub fn resolve(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Looks up an id without interning.
    #[must_use]
    pub fn get(&self, value: &str) -> Option<StringId> {
        self.lookup.get(value).copied()
    }

    /// Number of distinct strings interned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut interner = Interner::new();
        let a = interner.intern("x");
        let b = interner.intern("y");
        let a2 = interner.intern("x");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(interner.resolve(a), "x");
        assert_eq!(interner.resolve(b), "y");
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn get_does_not_intern() {
        let mut interner = Interner::new();
        assert_eq!(interner.get("missing"), None);
        let id = interner.intern("present");
        assert_eq!(interner.get("present"), Some(id));
        assert_eq!(interner.len(), 1);
    }
}
