//! Caller-facing compilation configuration.

/// Options for one compilation.
///
/// The defaults compile non-strict code with checked emission in debug
/// builds and no debug info; hosts override per field.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Compile under strict-mode semantics (affects the default call
    /// receiver).
    pub strict_mode: bool,
    /// Track per-value operand kinds and validate every pop. Defaults to on
    /// in debug builds; the byte stream is identical either way.
    pub checked: bool,
    /// Record a location table mapping byte offsets to source ranges.
    pub include_debug_info: bool,
    /// Name of the source document, carried into the compiled artifact for
    /// tooling.
    pub document_name: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            strict_mode: false,
            checked: cfg!(debug_assertions),
            include_debug_info: false,
            document_name: None,
        }
    }
}

impl CompileOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with checked emission forced on regardless of build profile.
    #[must_use]
    pub fn checked() -> Self {
        Self {
            checked: true,
            ..Self::default()
        }
    }

    /// Options for debugging: checked emission plus a location table for
    /// `document_name`.
    #[must_use]
    pub fn debugging(document_name: impl Into<String>) -> Self {
        Self {
            checked: true,
            include_debug_info: true,
            document_name: Some(document_name.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debugging_options_carry_the_document() {
        let options = CompileOptions::debugging("main.js");
        assert!(options.include_debug_info);
        assert!(options.checked);
        assert_eq!(options.document_name.as_deref(), Some("main.js"));
        assert!(!options.strict_mode);
    }
}
