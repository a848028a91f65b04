//! Full-text selector
//!
//! Drives ranked document selection over the built full-text state in
//! `tern_db_core::fulltext`:
//!
//! 1. parse the term expression ([`parse`])
//! 2. expand each term into variants: translit, keyboard layout, stems,
//!    synonyms ([`variants`])
//! 3. walk the per-step suffix arrays and typo maps, scoring each matched
//!    word with a match percent
//! 4. merge postings per document: BM25 blended with positional rank and
//!    term-length boost, AND-term proximity gating, NOT-term exclusion,
//!    full-match bonus ([`select`])

pub mod bm25;
pub mod parse;
pub mod select;
pub mod variants;

pub use parse::{parse_ft_expression, FtQuery, FtTerm, TermOp};
pub use select::{FtMergeEntry, FtSelector};
