//! Exception-handling regions.
//!
//! Regions are built on a stack: `begin_exception_block` pushes, clause
//! transitions mutate the top, `end_exception_block` pops onto the done list.
//! Nesting is implicit in close order, which is also the order the loader
//! requires in the serialized table (innermost first). Serialization uses the
//! fat section format: a 4-byte header, then 24 bytes per clause.

use smallvec::SmallVec;

use crate::tokens::TypeToken;

use super::label::LabelId;

/// The kind of a handler clause within an exception region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    /// Runs when the thrown exception matches the clause's type token.
    Catch,
    /// Runs a user predicate to decide whether its handler applies.
    Filter,
    /// Runs on every exit path, exceptional or not.
    Finally,
    /// Runs only on exceptional exit.
    Fault,
}

impl ClauseKind {
    /// Flag word used in the serialized table.
    pub(crate) fn flags(self) -> u32 {
        match self {
            Self::Catch => 0,
            Self::Filter => 1,
            Self::Finally => 2,
            Self::Fault => 4,
        }
    }
}

/// Which part of the region the emitter is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegionState {
    Try,
    Catch,
    /// Filter predicate, before `end_filter`.
    Filter,
    /// Filter handler, after `end_filter`.
    FilterHandler,
    Finally,
    Fault,
}

/// One handler clause of a region.
#[derive(Debug, Clone)]
pub(crate) struct ExceptionClause {
    pub kind: ClauseKind,
    /// Matched type; `Catch` only.
    pub catch_type: Option<TypeToken>,
    /// Offset of the filter predicate; `Filter` only, zero otherwise.
    pub filter_start: u32,
    pub handler_start: u32,
    pub handler_length: u32,
}

/// An in-progress or completed exception region.
#[derive(Debug)]
pub(crate) struct ExceptionRegion {
    pub try_start: u32,
    /// Set when the first clause opens (the try body is closed by then).
    pub try_length: u32,
    /// Label all `leave` exits from the region branch to; defined at
    /// `end_exception_block`.
    pub end_label: LabelId,
    pub clauses: SmallVec<[ExceptionClause; 2]>,
    pub state: RegionState,
}

impl ExceptionRegion {
    pub(crate) fn new(try_start: u32, end_label: LabelId) -> Self {
        Self {
            try_start,
            try_length: 0,
            end_label,
            clauses: SmallVec::new(),
            state: RegionState::Try,
        }
    }

    /// Whether a clause of `kind` is already present (catch duplicates are
    /// detected per type token, not here).
    pub(crate) fn has_clause(&self, kind: ClauseKind) -> bool {
        self.clauses.iter().any(|clause| clause.kind == kind)
    }

    /// Whether a catch clause for `token` is already present.
    pub(crate) fn has_catch_for(&self, token: TypeToken) -> bool {
        self.clauses
            .iter()
            .any(|clause| clause.kind == ClauseKind::Catch && clause.catch_type == Some(token))
    }
}

/// Serializes completed regions into the loader's fat-format table.
///
/// Layout: `{0x41, length-low, length-mid, length-high}` where length covers
/// the header plus 24 bytes per clause, followed by the clause records in
/// region completion order. Each record is six little-endian words: flags,
/// try offset, try length, handler offset, handler length, and the class
/// token (catch), filter offset (filter), or zero.
pub(crate) fn serialize_exception_table(regions: &[ExceptionRegion]) -> Vec<u8> {
    let clause_count: usize = regions.iter().map(|region| region.clauses.len()).sum();
    if clause_count == 0 {
        return Vec::new();
    }
    let data_size = 4 + clause_count * 24;
    let mut table = Vec::with_capacity(data_size);
    table.push(0x41);
    table.push((data_size & 0xFF) as u8);
    table.push(((data_size >> 8) & 0xFF) as u8);
    table.push(((data_size >> 16) & 0xFF) as u8);
    for region in regions {
        for clause in &region.clauses {
            table.extend_from_slice(&clause.kind.flags().to_le_bytes());
            table.extend_from_slice(&region.try_start.to_le_bytes());
            table.extend_from_slice(&region.try_length.to_le_bytes());
            table.extend_from_slice(&clause.handler_start.to_le_bytes());
            table.extend_from_slice(&clause.handler_length.to_le_bytes());
            let last_word = match clause.kind {
                ClauseKind::Catch => clause.catch_type.map_or(0, TypeToken::raw),
                ClauseKind::Filter => clause.filter_start,
                ClauseKind::Finally | ClauseKind::Fault => 0,
            };
            table.extend_from_slice(&last_word.to_le_bytes());
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::KindSet;
    use crate::tokens::TokenTable;

    #[test]
    fn clause_flags_match_the_abi() {
        assert_eq!(ClauseKind::Catch.flags(), 0);
        assert_eq!(ClauseKind::Filter.flags(), 1);
        assert_eq!(ClauseKind::Finally.flags(), 2);
        assert_eq!(ClauseKind::Fault.flags(), 4);
    }

    #[test]
    fn empty_table_serializes_to_nothing() {
        assert!(serialize_exception_table(&[]).is_empty());
    }

    #[test]
    fn single_catch_clause_layout() {
        let mut tokens = TokenTable::new();
        let error_type = tokens.define_type("script_error", KindSet::NONE);

        let mut region = ExceptionRegion::new(0, LabelId::new(0));
        region.try_length = 10;
        region.clauses.push(ExceptionClause {
            kind: ClauseKind::Catch,
            catch_type: Some(error_type),
            filter_start: 0,
            handler_start: 10,
            handler_length: 6,
        });

        let table = serialize_exception_table(&[region]);
        // 4-byte header + one 24-byte record
        assert_eq!(table.len(), 28);
        assert_eq!(&table[..4], &[0x41, 28, 0, 0]);
        assert_eq!(&table[4..8], &0u32.to_le_bytes()); // flags: catch
        assert_eq!(&table[8..12], &0u32.to_le_bytes()); // try offset
        assert_eq!(&table[12..16], &10u32.to_le_bytes()); // try length
        assert_eq!(&table[16..20], &10u32.to_le_bytes()); // handler offset
        assert_eq!(&table[20..24], &6u32.to_le_bytes()); // handler length
        assert_eq!(&table[24..28], &error_type.raw().to_le_bytes());
    }
}
