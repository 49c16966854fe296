//! Doubly-linked byte sequence with a pair-position index.
//!
//! The training corpus lives in a *Vec-as-arena* linked list: nodes are
//! stored in a `Vec<Option<Node>>`, deletion is O(1) by setting an entry to
//! `None`, and prev/next links are arena indices. Direct node-to-node
//! references are avoided on purpose; index links sidestep the ownership
//! cycles a doubly-linked list would otherwise create.
//!
//! Alongside the list sits an index from each adjacent token pair `(a, b)`
//! to the positions of its left nodes. The index is *permissive*: a merge in
//! a neighboring position may silently invalidate an entry, so consumers
//! must re-verify `val(pos) == a && val(next(pos)) == b` before acting on
//! any returned position. That trade keeps index maintenance local to the
//! two edges a merge actually changes.

use rustc_hash::FxHashMap;

use crate::types::{NodeIdx, Pair, Token};

/// One position of the training sequence.
#[derive(Debug)]
struct Node {
    /// Current token id at this position (starts as a byte value).
    val: Token,
    prev: Option<NodeIdx>,
    next: Option<NodeIdx>,
}

/// The arena-backed list plus its pair-position index.
#[derive(Debug, Default)]
pub(crate) struct IndexedList {
    /// `None` marks a node consumed by a merge.
    nodes: Vec<Option<Node>>,
    head: Option<NodeIdx>,
    /// pair -> left-node positions, possibly containing stale entries.
    pair_index: FxHashMap<Pair, Vec<NodeIdx>>,
}

impl IndexedList {
    /// Builds the list from raw corpus bytes and registers every adjacent
    /// pair under its left position.
    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        let n = bytes.len();
        let mut nodes = Vec::with_capacity(n);

        for (i, &b) in bytes.iter().enumerate() {
            let prev = if i > 0 { Some(i - 1) } else { None };
            let next = if i + 1 < n { Some(i + 1) } else { None };
            nodes.push(Some(Node {
                val: b as Token,
                prev,
                next,
            }));
        }

        let mut pair_index: FxHashMap<Pair, Vec<NodeIdx>> = FxHashMap::default();
        for i in 0..n.saturating_sub(1) {
            pair_index
                .entry((bytes[i] as Token, bytes[i + 1] as Token))
                .or_default()
                .push(i);
        }

        IndexedList {
            nodes,
            head: if n == 0 { None } else { Some(0) },
            pair_index,
        }
    }

    /// Token id at `idx`, or `None` if the node was consumed.
    pub(crate) fn val(&self, idx: NodeIdx) -> Option<Token> {
        self.nodes[idx].as_ref().map(|n| n.val)
    }

    pub(crate) fn next(&self, idx: NodeIdx) -> Option<NodeIdx> {
        self.nodes[idx].as_ref().and_then(|n| n.next)
    }

    pub(crate) fn prev(&self, idx: NodeIdx) -> Option<NodeIdx> {
        self.nodes[idx].as_ref().and_then(|n| n.prev)
    }

    /// Left-node positions recorded for `pair`.
    ///
    /// Entries may be stale; callers re-verify against current node values.
    pub(crate) fn positions_of(&self, pair: Pair) -> &[NodeIdx] {
        self.pair_index.get(&pair).map_or(&[], Vec::as_slice)
    }

    /// Rewrites `left` to carry `new_val` and detaches its right neighbor,
    /// which the pending merge consumes. Callers must have verified that a
    /// right neighbor exists.
    pub(crate) fn splice_pair(&mut self, left: NodeIdx, new_val: Token) {
        let right = match self.nodes[left].as_ref().and_then(|n| n.next) {
            Some(r) => r,
            None => return,
        };
        let after = self.nodes[right].as_ref().and_then(|n| n.next);

        if let Some(node) = self.nodes[left].as_mut() {
            node.val = new_val;
            node.next = after;
        }
        if let Some(rr) = after {
            if let Some(node) = self.nodes[rr].as_mut() {
                node.prev = Some(left);
            }
        }
        // release the consumed right neighbor
        self.nodes[right] = None;
    }

    /// Re-registers the edges around `idx` after its value changed.
    ///
    /// Refreshes the `(prev.val, val)` entry at the left neighbor and the
    /// `(val, next.val)` entry at `idx` itself, removing first so repeated
    /// calls stay idempotent. Entries under the node's *old* keys are left
    /// behind deliberately; the re-verification contract on
    /// [`Self::positions_of`] makes them harmless.
    pub(crate) fn update_index(&mut self, idx: NodeIdx) {
        let val = match self.val(idx) {
            Some(v) => v,
            None => return,
        };

        if let Some(p) = self.prev(idx) {
            if let Some(pv) = self.val(p) {
                self.unregister((pv, val), p);
                self.register((pv, val), p);
            }
        }
        if let Some(nx) = self.next(idx) {
            if let Some(nv) = self.val(nx) {
                self.unregister((val, nv), idx);
                self.register((val, nv), idx);
            }
        }
    }

    /// Collects the surviving token sequence in order.
    #[cfg(test)]
    pub(crate) fn tokens(&self) -> Vec<Token> {
        let mut out = Vec::new();
        let mut cur = self.head;
        while let Some(idx) = cur {
            match &self.nodes[idx] {
                Some(node) => {
                    out.push(node.val);
                    cur = node.next;
                }
                None => break,
            }
        }
        out
    }

    fn register(&mut self, pair: Pair, idx: NodeIdx) {
        self.pair_index.entry(pair).or_default().push(idx);
    }

    fn unregister(&mut self, pair: Pair, idx: NodeIdx) {
        if let Some(positions) = self.pair_index.get_mut(&pair) {
            positions.retain(|&p| p != idx);
            if positions.is_empty() {
                self.pair_index.remove(&pair);
            }
        }
    }

    /// Walks every interior node checking `prev`/`next` mutual consistency.
    #[cfg(test)]
    pub(crate) fn assert_links_consistent(&self) {
        let mut cur = self.head;
        while let Some(idx) = cur {
            let node = self.nodes[idx].as_ref().unwrap_or_else(|| {
                panic!("reachable node {idx} was deleted");
            });
            if let Some(p) = node.prev {
                let prev = self.nodes[p].as_ref().expect("prev points at deleted node");
                assert_eq!(prev.next, Some(idx));
            }
            if let Some(nx) = node.next {
                let next = self.nodes[nx].as_ref().expect("next points at deleted node");
                assert_eq!(next.prev, Some(idx));
            }
            cur = node.next;
        }
    }
}
