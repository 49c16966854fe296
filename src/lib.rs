//! Byte-level BPE tokenizer with an incremental trainer and radix-tree
//! encoding.
//!
//! Training maintains the corpus as a doubly-linked byte list with a
//! pair-position index and a lazily invalidated pair-frequency heap, so
//! each merge costs time proportional to the occurrences it rewrites
//! rather than a full corpus scan. Learned tokens feed a compressed trie
//! that drives greedy longest-prefix encoding.
//!
//! Any byte string round-trips: `decode(encode(text)) == text`, with
//! unmatched bytes falling back to their single-byte tokens (ids 0..=255).
//!
//! ```no_run
//! use radixtok::Tokenizer;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tok = Tokenizer::default();
//! tok.train("the quick brown fox jumps over the lazy dog", 300)?;
//! let ids = tok.encode("the fox");
//! assert_eq!(tok.decode(&ids), b"the fox");
//! tok.save("fox.tok")?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(unused_must_use)]

mod error;
mod list;
mod multiset;
mod persist;
mod radix;
mod tokenizer;
mod trainer;
mod types;

pub use error::{ChunkError, PersistError, TrainError};
pub use tokenizer::Tokenizer;
pub use types::{ByteSeq, Pair, Token};
