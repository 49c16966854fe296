//! Error types surfaced by the tokenizer.
//!
//! Usage and i/o failures are returned as explicit error values; decoding an
//! unknown token id is non-fatal and handled inline by `decode`.

use std::io;

use thiserror::Error;

use crate::types::Token;

/// Errors raised by [`crate::Tokenizer::train`].
#[derive(Debug, Error)]
pub enum TrainError {
    /// The training corpus contained no bytes.
    #[error("training corpus is empty")]
    EmptyCorpus,

    /// The requested vocabulary cannot hold the 256 single-byte tokens.
    #[error("vocab size {0} is below the 256 single-byte floor")]
    VocabSizeTooSmall(usize),
}

/// Errors raised by [`crate::Tokenizer::chunk_with_overlap`].
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Chunks must be non-empty and strictly longer than their overlap,
    /// otherwise the chunk start offset cannot advance.
    #[error("overlap {overlap} must be smaller than chunk size {chunk_size}")]
    InvalidOverlap { chunk_size: usize, overlap: usize },
}

/// Errors raised by [`crate::Tokenizer::save`] and [`crate::Tokenizer::load`].
///
/// Corruption variants abort a load before any internal state is replaced,
/// so a failed load leaves the tokenizer unchanged.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    /// The file ended in the middle of a record.
    #[error("file truncated mid-record")]
    Truncated,

    /// A stored id does not fit the expected range.
    #[error("token id {0} out of range for vocab of {1}")]
    IdOutOfRange(i64, usize),

    /// The vocabulary table named the same id twice.
    #[error("duplicate vocab entry for id {0}")]
    DuplicateVocabId(Token),

    /// The vocabulary is missing (or has rewritten) a single-byte entry.
    #[error("vocab lacks single-byte entry for byte {0}")]
    MissingByteEntry(u8),

    /// The vocabulary table left a gap in the dense id space.
    #[error("vocab has no entry for id {0}")]
    MissingVocabEntry(Token),

    /// A merge rule references a token id absent from the vocabulary.
    #[error("merge ({first}, {second}) -> {id} references an id absent from vocab")]
    DanglingMerge { first: Token, second: Token, id: Token },

    /// The same pair appeared in the merge table twice.
    #[error("merge pair ({0}, {1}) recorded twice")]
    DuplicateMerge(Token, Token),

    /// A radix-tree node record violated a structural invariant.
    #[error("malformed radix tree: {0}")]
    MalformedTree(&'static str),
}
