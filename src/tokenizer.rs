//! Tokenizer facade: vocabulary, merge rules and the encode/decode surface.
//!
//! Encoding walks the radix tree greedily: at each input position the
//! longest learned byte string wins, with a raw single-byte fallback when
//! nothing matches. Decoding concatenates vocabulary entries. Training
//! drives the incremental merge loop and feeds every learned token into the
//! tree, so the encoder is ready the moment training returns.
//!
//! A frozen tokenizer is read-only; the batch helpers fan out over Rayon
//! with no further synchronization.

use std::path::Path;

use log::info;
use rand::Rng;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::error::{ChunkError, PersistError, TrainError};
use crate::persist;
use crate::radix::RadixTree;
use crate::trainer::MergeSession;
use crate::types::{ByteSeq, Pair, Token};

/// Byte-level BPE tokenizer with radix-tree encoding.
pub struct Tokenizer {
    /// id -> byte sequence; ids are dense, 0..=255 are the single bytes.
    pub(crate) vocab: Vec<ByteSeq>,
    /// (left, right) -> merged id.
    pub(crate) merges: FxHashMap<Pair, Token>,
    pub(crate) tree: RadixTree,
    /// Longest token length the dropout encoder considers. Zero disables
    /// the dropout path entirely.
    max_depth: usize,
    /// Terms granted whole-token status before frequency-driven training.
    tech_terms: Vec<String>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(0, Vec::new())
    }
}

impl Tokenizer {
    /// Creates an empty tokenizer: 256 single-byte vocab entries, no
    /// merges, an empty radix tree.
    ///
    /// `max_depth` bounds the token lengths the dropout encoder enumerates;
    /// the primary [`encode`](Self::encode) has no such bound. `tech_terms`
    /// are byte strings promoted to whole tokens when training starts.
    pub fn new(max_depth: usize, tech_terms: Vec<String>) -> Self {
        let vocab = (0..=255u8).map(|b| vec![b]).collect();
        Tokenizer {
            vocab,
            merges: FxHashMap::default(),
            tree: RadixTree::new(),
            max_depth,
            tech_terms,
        }
    }

    /// Learns merges from `corpus` until the vocabulary reaches
    /// `vocab_size` or no adjacent pair repeats.
    ///
    /// Technical terms are premerged first and consume vocabulary budget.
    /// Training again on another corpus continues from the current state.
    pub fn train(&mut self, corpus: &str, vocab_size: usize) -> Result<(), TrainError> {
        if corpus.is_empty() {
            return Err(TrainError::EmptyCorpus);
        }
        if vocab_size < 256 {
            return Err(TrainError::VocabSizeTooSmall(vocab_size));
        }

        self.premerge_tech_terms();

        let remaining = vocab_size.saturating_sub(256 + self.merges.len());
        info!(
            "training on {} bytes, {} merges to learn",
            corpus.len(),
            remaining
        );

        let mut session = MergeSession::new(
            corpus.as_bytes(),
            &mut self.vocab,
            &mut self.merges,
            &mut self.tree,
        );
        let performed = session.run(remaining);

        info!(
            "training done: {} merges learned, vocab size {}",
            performed,
            self.vocab.len()
        );
        Ok(())
    }

    /// Encodes text into token ids by greedy longest-prefix matching.
    pub fn encode(&self, text: &str) -> Vec<Token> {
        self.encode_bytes(text.as_bytes())
    }

    /// Byte-slice variant of [`encode`](Self::encode); accepts arbitrary,
    /// not necessarily UTF-8, input.
    pub fn encode_bytes(&self, bytes: &[u8]) -> Vec<Token> {
        // learned tokens compress text roughly 3x on natural language
        let mut ids = Vec::with_capacity(bytes.len() / 3 + 1);
        let mut pos = 0;

        while pos < bytes.len() {
            match self.tree.longest_match(bytes, pos) {
                Some((id, end)) => {
                    ids.push(id);
                    pos = end;
                }
                None => {
                    ids.push(bytes[pos] as Token);
                    pos += 1;
                }
            }
        }
        ids
    }

    /// Decodes token ids into their concatenated byte sequences.
    ///
    /// Ids absent from the vocabulary emit their low byte and decoding
    /// continues; feeding ids that `encode` never produced therefore does
    /// not round-trip.
    pub fn decode(&self, ids: &[Token]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ids.len() * 2);
        for &id in ids {
            match self.vocab.get(id) {
                Some(bytes) => out.extend_from_slice(bytes),
                None => out.push((id % 256) as u8),
            }
        }
        out
    }

    /// Decodes into a `String`, replacing invalid UTF-8 with U+FFFD.
    pub fn decode_to_string(&self, ids: &[Token]) -> String {
        String::from_utf8_lossy(&self.decode(ids)).into_owned()
    }

    /// Encodes many texts in parallel, preserving input order.
    pub fn encode_batch(&self, texts: &[&str]) -> Vec<Vec<Token>> {
        texts.par_iter().map(|text| self.encode(text)).collect()
    }

    /// Decodes many id sequences in parallel, preserving input order.
    pub fn decode_batch(&self, id_seqs: &[&[Token]]) -> Vec<ByteSeq> {
        id_seqs.par_iter().map(|ids| self.decode(ids)).collect()
    }

    /// BPE-dropout encoding: candidate matches longer than one byte are
    /// each dropped independently with probability `dropout_prob`, and the
    /// longest survivor is emitted. Uses thread-local randomness; callers
    /// needing determinism should use
    /// [`encode_with_dropout_rng`](Self::encode_with_dropout_rng).
    pub fn encode_with_dropout(&self, text: &str, dropout_prob: f64) -> Vec<Token> {
        self.encode_with_dropout_rng(text, dropout_prob, &mut rand::thread_rng())
    }

    /// Seedable variant of [`encode_with_dropout`](Self::encode_with_dropout).
    ///
    /// A `max_depth` of zero disables the candidate search and yields the
    /// raw byte encoding.
    pub fn encode_with_dropout_rng<R: Rng + ?Sized>(
        &self,
        text: &str,
        dropout_prob: f64,
        rng: &mut R,
    ) -> Vec<Token> {
        let bytes = text.as_bytes();
        if self.max_depth == 0 {
            return bytes.iter().map(|&b| b as Token).collect();
        }

        let mut ids = Vec::with_capacity(bytes.len() / 3 + 1);
        let mut pos = 0;

        while pos < bytes.len() {
            let limit = self.max_depth.min(bytes.len() - pos);
            let mut best: Option<(Token, usize)> = None;

            for len in 1..=limit {
                let Some(id) = self.tree.get(&bytes[pos..pos + len]) else {
                    continue;
                };
                // single-byte matches are exempt from dropout
                let keep = len == 1 || rng.gen::<f64>() >= dropout_prob;
                if keep && best.map_or(true, |(_, best_len)| len > best_len) {
                    best = Some((id, len));
                }
            }

            match best {
                Some((id, len)) => {
                    ids.push(id);
                    pos += len;
                }
                None => {
                    ids.push(bytes[pos] as Token);
                    pos += 1;
                }
            }
        }
        ids
    }

    /// Encodes `text` and slices the ids into chunks of at most
    /// `chunk_size`, consecutive chunks sharing `overlap` ids.
    pub fn chunk_with_overlap(
        &self,
        text: &str,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Vec<Vec<Token>>, ChunkError> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(ChunkError::InvalidOverlap {
                chunk_size,
                overlap,
            });
        }

        let tokens = self.encode(text);
        if tokens.len() <= chunk_size {
            return Ok(vec![tokens]);
        }

        let stride = chunk_size - overlap;
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < tokens.len() {
            let end = (start + chunk_size).min(tokens.len());
            chunks.push(tokens[start..end].to_vec());
            start += stride;
            if start >= tokens.len() {
                break;
            }
        }
        Ok(chunks)
    }

    /// Writes vocabulary, merges and radix tree to `path` in the canonical
    /// binary layout.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        persist::save(self, path.as_ref())
    }

    /// Replaces the learned state with the contents of `path`.
    ///
    /// The file is fully read and validated before any state is swapped in,
    /// so a failed load leaves the tokenizer unchanged.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let state = persist::read(path.as_ref())?;
        self.vocab = state.vocab;
        self.merges = state.merges;
        self.tree = state.tree;
        Ok(())
    }

    /// Number of tokens in the vocabulary.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Number of learned merge rules.
    pub fn num_merges(&self) -> usize {
        self.merges.len()
    }

    /// Byte sequence for `id`, if it is in the vocabulary.
    pub fn token_bytes(&self, id: Token) -> Option<&[u8]> {
        self.vocab.get(id).map(Vec::as_slice)
    }

    /// Grants each technical term a whole-token vocabulary entry by
    /// repeatedly merging the term's most frequent internal pair, ties
    /// going to the numerically smallest pair. Terms already covered by a
    /// learned token are skipped; new merges land in the same merge table
    /// the main loop uses and count against its budget.
    fn premerge_tech_terms(&mut self) {
        let terms = std::mem::take(&mut self.tech_terms);

        for term in &terms {
            let bytes = term.as_bytes();
            if bytes.len() < 2 || self.tree.get(bytes).is_some() {
                continue;
            }

            let mut seq: Vec<Token> = bytes.iter().map(|&b| b as Token).collect();
            while seq.len() > 1 {
                let mut counts: FxHashMap<Pair, usize> = FxHashMap::default();
                for w in seq.windows(2) {
                    *counts.entry((w[0], w[1])).or_insert(0) += 1;
                }
                let Some((&best, _)) = counts
                    .iter()
                    .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                else {
                    break;
                };

                let id = match self.merges.get(&best) {
                    Some(&id) => id,
                    None => {
                        let new_id = 256 + self.merges.len();
                        let mut merged = self.vocab[best.0].clone();
                        merged.extend_from_slice(&self.vocab[best.1]);
                        self.merges.insert(best, new_id);
                        self.tree.insert(&merged, new_id);
                        self.vocab.push(merged);
                        new_id
                    }
                };
                seq = replace_pair(&seq, best, id);
            }
        }

        self.tech_terms = terms;
    }
}

/// Rewrites every non-overlapping occurrence of `pair` in `seq`, leftmost
/// first.
fn replace_pair(seq: &[Token], pair: Pair, new_id: Token) -> Vec<Token> {
    let mut out = Vec::with_capacity(seq.len());
    let mut i = 0;
    while i < seq.len() {
        if i + 1 < seq.len() && (seq[i], seq[i + 1]) == pair {
            out.push(new_id);
            i += 2;
        } else {
            out.push(seq[i]);
            i += 1;
        }
    }
    out
}
