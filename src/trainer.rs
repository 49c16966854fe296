//! Incremental BPE merge loop.
//!
//! Worst case O(N log V) over a whole run, against O(N*V) for a trainer
//! that rescans the corpus per merge: the pair index supplies candidate
//! positions, the multiset answers max-frequency queries, and each merge
//! touches only the edges adjacent to the positions it rewrites.

use log::debug;
use rustc_hash::FxHashMap;

use crate::list::IndexedList;
use crate::multiset::PairMultiset;
use crate::radix::RadixTree;
use crate::types::{ByteSeq, Pair, Token};

/// One training run over a corpus, borrowing the tokenizer's learned state.
///
/// The list and multiset are private to the run and dropped with it; vocab,
/// merges and the radix tree accumulate across runs, so a later run
/// continues allocating ids where the previous one stopped.
pub(crate) struct MergeSession<'a> {
    list: IndexedList,
    stats: PairMultiset,
    vocab: &'a mut Vec<ByteSeq>,
    merges: &'a mut FxHashMap<Pair, Token>,
    tree: &'a mut RadixTree,
}

impl<'a> MergeSession<'a> {
    /// Builds the linked list from the corpus and seeds pair counts from
    /// every adjacent position.
    pub(crate) fn new(
        text: &[u8],
        vocab: &'a mut Vec<ByteSeq>,
        merges: &'a mut FxHashMap<Pair, Token>,
        tree: &'a mut RadixTree,
    ) -> Self {
        let list = IndexedList::from_bytes(text);
        let mut stats = PairMultiset::new();
        for w in text.windows(2) {
            stats.add((w[0] as Token, w[1] as Token));
        }

        MergeSession {
            list,
            stats,
            vocab,
            merges,
            tree,
        }
    }

    /// Runs up to `remaining` merge steps, stopping early once no pairs
    /// remain. Returns the number of merges performed.
    pub(crate) fn run(&mut self, remaining: usize) -> usize {
        let mut performed = 0;
        for _ in 0..remaining {
            if !self.merge_step() {
                break;
            }
            performed += 1;
        }
        performed
    }

    /// Performs one merge of the currently most frequent pair.
    ///
    /// Returns false when no pairs remain.
    fn merge_step(&mut self) -> bool {
        let Some((pair, count)) = self.stats.max() else {
            return false;
        };
        if count == 0 {
            return false;
        }

        let new_id = 256 + self.merges.len();
        let mut merged = self.vocab[pair.0].clone();
        merged.extend_from_slice(&self.vocab[pair.1]);

        debug_assert_eq!(new_id, self.vocab.len());
        debug!("merge ({}, {}) x{} -> token {}", pair.0, pair.1, count, new_id);

        self.merges.insert(pair, new_id);
        self.tree.insert(&merged, new_id);
        self.vocab.push(merged);

        self.apply_merge(pair, new_id);
        true
    }

    /// Rewrites every current occurrence of `pair` to `new_id`, re-scoring
    /// only the edges adjacent to each rewritten position.
    fn apply_merge(&mut self, pair: Pair, new_id: Token) {
        let positions = self.list.positions_of(pair).to_vec();

        for left in positions {
            // the index is permissive; a neighboring merge may have consumed
            // or rewritten this position since it was registered
            let Some(a) = self.list.val(left) else {
                continue;
            };
            let Some(right) = self.list.next(left) else {
                continue;
            };
            let Some(b) = self.list.val(right) else {
                continue;
            };
            if (a, b) != pair {
                continue;
            }

            let before = self.list.prev(left);
            let after = self.list.next(right);

            if let Some(p) = before {
                if let Some(pv) = self.list.val(p) {
                    self.stats.remove((pv, a));
                }
            }
            self.stats.remove((a, b));
            if let Some(rr) = after {
                if let Some(rv) = self.list.val(rr) {
                    self.stats.remove((b, rv));
                }
            }

            self.list.splice_pair(left, new_id);
            self.list.update_index(left);

            if let Some(p) = before {
                if let Some(pv) = self.list.val(p) {
                    self.stats.add((pv, new_id));
                }
            }
            if let Some(rr) = after {
                if let Some(rv) = self.list.val(rr) {
                    self.stats.add((new_id, rv));
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn tokens(&self) -> Vec<Token> {
        self.list.tokens()
    }

    #[cfg(test)]
    pub(crate) fn distinct_pairs(&self) -> usize {
        self.stats.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_state() -> (Vec<ByteSeq>, FxHashMap<Pair, Token>, RadixTree) {
        let vocab = (0..=255u8).map(|b| vec![b]).collect();
        (vocab, FxHashMap::default(), RadixTree::new())
    }

    #[test]
    fn test_single_forced_merge() {
        let (mut vocab, mut merges, mut tree) = fresh_state();
        let mut session = MergeSession::new(b"ababab", &mut vocab, &mut merges, &mut tree);
        assert_eq!(session.run(1), 1);
        assert_eq!(session.tokens(), vec![256, 256, 256]);
        assert_eq!(merges.get(&(97, 98)), Some(&256));
        assert_eq!(vocab[256], b"ab".to_vec());
        assert_eq!(tree.get(b"ab"), Some(256));
    }

    #[test]
    fn test_hierarchical_merges_on_run() {
        let (mut vocab, mut merges, mut tree) = fresh_state();
        let mut session = MergeSession::new(b"aaaa", &mut vocab, &mut merges, &mut tree);
        let performed = session.run(2);
        assert!(performed <= 2);
        // every learned token must decompose into a run of 'a'
        for id in 256..vocab.len() {
            assert!(vocab[id].iter().all(|&b| b == b'a'));
        }
        assert_eq!(vocab.len(), 256 + merges.len());
    }

    #[test]
    fn test_overlapping_occurrences_counted_once() {
        let (mut vocab, mut merges, mut tree) = fresh_state();
        let mut session = MergeSession::new(b"aaa", &mut vocab, &mut merges, &mut tree);
        assert_eq!(session.run(1), 1);
        // "aaa" holds one rewritable (a, a) occurrence plus one overlap
        assert_eq!(session.tokens(), vec![256, 97]);
    }

    #[test]
    fn test_merges_compose_from_existing_tokens() {
        let (mut vocab, mut merges, mut tree) = fresh_state();
        let mut session = MergeSession::new(b"abcabcabc", &mut vocab, &mut merges, &mut tree);
        let performed = session.run(3);
        assert_eq!(performed, 3);
        assert_eq!(vocab.len(), 256 + merges.len());
        for (&(a, b), &k) in merges.iter() {
            assert!(a < k && b < k);
            let mut expect = vocab[a].clone();
            expect.extend_from_slice(&vocab[b]);
            assert_eq!(vocab[k], expect);
        }
    }

    #[test]
    fn test_run_stops_when_pairs_exhausted() {
        let (mut vocab, mut merges, mut tree) = fresh_state();
        let mut session = MergeSession::new(b"ab", &mut vocab, &mut merges, &mut tree);
        // one merge empties the sequence of pairs
        assert_eq!(session.run(10), 1);
        assert_eq!(session.tokens(), vec![256]);
        assert_eq!(session.distinct_pairs(), 0);
    }

    #[test]
    fn test_empty_corpus_yields_no_merges() {
        let (mut vocab, mut merges, mut tree) = fresh_state();
        let mut session = MergeSession::new(b"", &mut vocab, &mut merges, &mut tree);
        assert_eq!(session.run(5), 0);
        assert!(merges.is_empty());
    }
}
