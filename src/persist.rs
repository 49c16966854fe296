//! Binary persistence for the learned tokenizer state.
//!
//! Layout, all integers little-endian (`u64` sizes, `i32` ids):
//!
//! 1. `vocab_size`, then per entry `id`, `len`, `len` bytes.
//! 2. `merges_size`, then per rule `first`, `second`, `id`.
//! 3. The radix tree in depth-first preorder: per node `prefix_len`,
//!    prefix bytes, `value` (−1 for non-terminal), `num_children`, then per
//!    child its key byte followed by the child's record.
//!
//! Merges are written in allocation order and children sorted by key, so
//! identical state always produces identical bytes.
//!
//! Loading is transactional: the whole file is parsed and validated into a
//! [`LoadedState`] before the tokenizer swaps anything in, so corruption
//! never leaves a half-replaced tokenizer behind.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use rustc_hash::FxHashMap;

use crate::error::PersistError;
use crate::radix::RadixTree;
use crate::tokenizer::Tokenizer;
use crate::types::{ByteSeq, NodeIdx, Pair, Token};

/// Smallest possible on-disk footprint of a vocab or merge record; used to
/// reject size fields no file of the observed length could satisfy.
const MIN_RECORD_BYTES: u64 = 12;

/// Fully validated replacement state produced by [`read`].
pub(crate) struct LoadedState {
    pub(crate) vocab: Vec<ByteSeq>,
    pub(crate) merges: FxHashMap<Pair, Token>,
    pub(crate) tree: RadixTree,
}

pub(crate) fn save(tok: &Tokenizer, path: &Path) -> Result<(), PersistError> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    write_u64(&mut w, tok.vocab.len() as u64)?;
    for (id, bytes) in tok.vocab.iter().enumerate() {
        write_i32(&mut w, id as i32)?;
        write_u64(&mut w, bytes.len() as u64)?;
        w.write_all(bytes)?;
    }

    let mut merges: Vec<(Pair, Token)> = tok.merges.iter().map(|(&p, &id)| (p, id)).collect();
    merges.sort_by_key(|&(_, id)| id);
    write_u64(&mut w, merges.len() as u64)?;
    for ((first, second), id) in merges {
        write_i32(&mut w, first as i32)?;
        write_i32(&mut w, second as i32)?;
        write_i32(&mut w, id as i32)?;
    }

    write_node(&mut w, &tok.tree, tok.tree.root())?;
    w.flush()?;
    Ok(())
}

pub(crate) fn read(path: &Path) -> Result<LoadedState, PersistError> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut r = BufReader::new(file);

    let vocab = read_vocab(&mut r, file_len)?;
    let merges = read_merges(&mut r, file_len, vocab.len())?;

    let mut tree = RadixTree::new();
    read_node(&mut r, &mut tree, vocab.len(), None)?;

    Ok(LoadedState {
        vocab,
        merges,
        tree,
    })
}

fn read_vocab<R: Read>(r: &mut R, file_len: u64) -> Result<Vec<ByteSeq>, PersistError> {
    let vocab_len = read_u64(r)?;
    if vocab_len > file_len / MIN_RECORD_BYTES {
        return Err(PersistError::Truncated);
    }
    let vocab_len = vocab_len as usize;
    if vocab_len < 256 {
        return Err(PersistError::MissingByteEntry(vocab_len as u8));
    }

    let mut slots: Vec<Option<ByteSeq>> = Vec::new();
    slots.resize_with(vocab_len, || None);
    for _ in 0..vocab_len {
        let id = read_index(r, vocab_len)?;
        let len = read_u64(r)? as usize;
        let bytes = read_bytes(r, len)?;
        if slots[id].replace(bytes).is_some() {
            return Err(PersistError::DuplicateVocabId(id));
        }
    }

    let mut vocab = Vec::with_capacity(vocab_len);
    for (id, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(bytes) => vocab.push(bytes),
            None => return Err(PersistError::MissingVocabEntry(id)),
        }
    }
    for (b, entry) in vocab.iter().take(256).enumerate() {
        if entry.as_slice() != &[b as u8][..] {
            return Err(PersistError::MissingByteEntry(b as u8));
        }
    }
    Ok(vocab)
}

fn read_merges<R: Read>(
    r: &mut R,
    file_len: u64,
    vocab_len: usize,
) -> Result<FxHashMap<Pair, Token>, PersistError> {
    let merges_len = read_u64(r)?;
    if merges_len > file_len / MIN_RECORD_BYTES {
        return Err(PersistError::Truncated);
    }

    let mut merges = FxHashMap::default();
    for _ in 0..merges_len {
        let first = read_i32(r)?;
        let second = read_i32(r)?;
        let id = read_i32(r)?;
        let (Ok(first), Ok(second), Ok(id)) = (
            usize::try_from(first),
            usize::try_from(second),
            usize::try_from(id),
        ) else {
            return Err(PersistError::IdOutOfRange(
                first.min(second).min(id) as i64,
                vocab_len,
            ));
        };
        if first >= vocab_len || second >= vocab_len || id >= vocab_len {
            return Err(PersistError::DanglingMerge { first, second, id });
        }
        if merges.insert((first, second), id).is_some() {
            return Err(PersistError::DuplicateMerge(first, second));
        }
    }
    Ok(merges)
}

fn write_node<W: Write>(w: &mut W, tree: &RadixTree, idx: NodeIdx) -> Result<(), PersistError> {
    let node = tree.node(idx);
    write_u64(w, node.prefix.len() as u64)?;
    w.write_all(&node.prefix)?;
    write_i32(w, node.value.map_or(-1, |v| v as i32))?;

    let mut keys: Vec<u8> = node.children.keys().copied().collect();
    keys.sort_unstable();
    write_u64(w, keys.len() as u64)?;
    for key in keys {
        w.write_all(&[key])?;
        write_node(w, tree, node.children[&key])?;
    }
    Ok(())
}

/// Reads one preorder node record into the tree. `parent` is `None` for the
/// root, which reuses the arena's pre-allocated node 0.
fn read_node<R: Read>(
    r: &mut R,
    tree: &mut RadixTree,
    vocab_len: usize,
    parent: Option<(NodeIdx, u8)>,
) -> Result<(), PersistError> {
    let prefix_len = read_u64(r)? as usize;
    let prefix = read_bytes(r, prefix_len)?;
    let raw_value = read_i32(r)?;
    let value = match raw_value {
        -1 => None,
        v => {
            let v = usize::try_from(v)
                .map_err(|_| PersistError::IdOutOfRange(v as i64, vocab_len))?;
            if v >= vocab_len {
                return Err(PersistError::IdOutOfRange(v as i64, vocab_len));
            }
            Some(v)
        }
    };

    let idx = match parent {
        None => {
            if !prefix.is_empty() {
                return Err(PersistError::MalformedTree("root prefix must be empty"));
            }
            if value.is_some() {
                return Err(PersistError::MalformedTree("root cannot be terminal"));
            }
            tree.root()
        }
        Some((parent_idx, key)) => {
            if prefix.first() != Some(&key) {
                return Err(PersistError::MalformedTree(
                    "child key disagrees with its prefix head",
                ));
            }
            let idx = tree.push_node(prefix, value);
            tree.link_child(parent_idx, key, idx);
            idx
        }
    };

    let num_children = read_u64(r)? as usize;
    if num_children > 256 {
        return Err(PersistError::MalformedTree("node with more than 256 children"));
    }
    for _ in 0..num_children {
        let key = read_byte(r)?;
        if tree.node(idx).children.contains_key(&key) {
            return Err(PersistError::MalformedTree("duplicate child key"));
        }
        read_node(r, tree, vocab_len, Some((idx, key)))?;
    }
    Ok(())
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<(), PersistError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_i32<W: Write>(w: &mut W, v: i32) -> Result<(), PersistError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, PersistError> {
    let mut buf = [0u8; 8];
    read_exact_or_truncated(r, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i32<R: Read>(r: &mut R) -> Result<i32, PersistError> {
    let mut buf = [0u8; 4];
    read_exact_or_truncated(r, &mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_byte<R: Read>(r: &mut R) -> Result<u8, PersistError> {
    let mut buf = [0u8; 1];
    read_exact_or_truncated(r, &mut buf)?;
    Ok(buf[0])
}

/// Reads an `i32` id and range-checks it against the vocab table size.
fn read_index<R: Read>(r: &mut R, len: usize) -> Result<usize, PersistError> {
    let raw = read_i32(r)?;
    let id = usize::try_from(raw).map_err(|_| PersistError::IdOutOfRange(raw as i64, len))?;
    if id >= len {
        return Err(PersistError::IdOutOfRange(raw as i64, len));
    }
    Ok(id)
}

/// Reads exactly `len` bytes without pre-allocating untrusted lengths; a
/// short read surfaces as [`PersistError::Truncated`].
fn read_bytes<R: Read>(r: &mut R, len: usize) -> Result<ByteSeq, PersistError> {
    let mut buf = Vec::new();
    r.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(PersistError::Truncated);
    }
    Ok(buf)
}

fn read_exact_or_truncated<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), PersistError> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            PersistError::Truncated
        } else {
            PersistError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn push_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_i32(buf: &mut Vec<u8>, v: i32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// 256 single-byte vocab entries, no merges yet, no tree yet.
    fn minimal_header() -> Vec<u8> {
        let mut buf = Vec::new();
        push_u64(&mut buf, 256);
        for b in 0..256i32 {
            push_i32(&mut buf, b);
            push_u64(&mut buf, 1);
            buf.push(b as u8);
        }
        buf
    }

    fn empty_root(buf: &mut Vec<u8>) {
        push_u64(buf, 0); // prefix_len
        push_i32(buf, -1); // value
        push_u64(buf, 0); // num_children
    }

    #[test]
    fn test_save_load_identity() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tok.bin");

        let mut trained = Tokenizer::default();
        trained
            .train("the theatre there is their thermos theme", 300)
            .expect("training failed");
        trained.save(&path).expect("save failed");

        let mut loaded = Tokenizer::default();
        loaded.load(&path).expect("load failed");

        assert_eq!(loaded.vocab_size(), trained.vocab_size());
        assert_eq!(loaded.num_merges(), trained.num_merges());
        let samples = [
            "the", "theatre", "there", "them", "t", "", "zzz", "the the", "athe", "rethe",
        ];
        for s in samples {
            assert_eq!(trained.encode(s), loaded.encode(s), "diverged on {s:?}");
        }
    }

    #[test]
    fn test_save_is_canonical() {
        let dir = tempdir().expect("tempdir");
        let first = dir.path().join("a.bin");
        let second = dir.path().join("b.bin");

        let mut tok = Tokenizer::default();
        tok.train("banana bandana cabana", 280).expect("training failed");
        tok.save(&first).expect("save failed");

        let mut reloaded = Tokenizer::default();
        reloaded.load(&first).expect("load failed");
        reloaded.save(&second).expect("save failed");

        let a = fs::read(&first).expect("read a");
        let b = fs::read(&second).expect("read b");
        assert_eq!(a, b);
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tok.bin");

        let mut tok = Tokenizer::default();
        tok.train("ababab", 260).expect("training failed");
        tok.save(&path).expect("save failed");

        let bytes = fs::read(&path).expect("read");
        fs::write(&path, &bytes[..bytes.len() - 5]).expect("write");

        let mut fresh = Tokenizer::default();
        assert!(matches!(
            fresh.load(&path),
            Err(PersistError::Truncated)
        ));
    }

    #[test]
    fn test_failed_load_leaves_state_unchanged() {
        let dir = tempdir().expect("tempdir");
        let good = dir.path().join("good.bin");
        let bad = dir.path().join("bad.bin");

        let mut tok = Tokenizer::default();
        tok.train("ababab", 257).expect("training failed");
        tok.save(&good).expect("save failed");
        fs::write(&bad, b"not a tokenizer file").expect("write");

        let mut loaded = Tokenizer::default();
        loaded.load(&good).expect("load failed");
        let before = loaded.encode("ababab");

        assert!(loaded.load(&bad).is_err());
        assert_eq!(loaded.encode("ababab"), before);
        assert_eq!(loaded.num_merges(), 1);
    }

    #[test]
    fn test_dangling_merge_is_rejected() {
        let mut buf = minimal_header();
        push_u64(&mut buf, 1);
        push_i32(&mut buf, 300); // first: beyond the 256-entry vocab
        push_i32(&mut buf, 301);
        push_i32(&mut buf, 302);
        empty_root(&mut buf);

        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tok.bin");
        fs::write(&path, &buf).expect("write");

        let mut tok = Tokenizer::default();
        assert!(matches!(
            tok.load(&path),
            Err(PersistError::DanglingMerge { first: 300, .. })
        ));
    }

    #[test]
    fn test_duplicate_vocab_id_is_rejected() {
        let mut buf = Vec::new();
        push_u64(&mut buf, 256);
        for b in 0..256i32 {
            // id 0 written twice, id 255 never
            let id = if b == 255 { 0 } else { b };
            push_i32(&mut buf, id);
            push_u64(&mut buf, 1);
            buf.push(id as u8);
        }
        push_u64(&mut buf, 0);
        empty_root(&mut buf);

        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tok.bin");
        fs::write(&path, &buf).expect("write");

        let mut tok = Tokenizer::default();
        assert!(matches!(
            tok.load(&path),
            Err(PersistError::DuplicateVocabId(0))
        ));
    }

    #[test]
    fn test_rewritten_single_byte_entry_is_rejected() {
        let mut buf = Vec::new();
        push_u64(&mut buf, 256);
        for b in 0..256i32 {
            push_i32(&mut buf, b);
            if b == 65 {
                // entry for 'A' claims two bytes
                push_u64(&mut buf, 2);
                buf.extend_from_slice(b"AB");
            } else {
                push_u64(&mut buf, 1);
                buf.push(b as u8);
            }
        }
        push_u64(&mut buf, 0);
        empty_root(&mut buf);

        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tok.bin");
        fs::write(&path, &buf).expect("write");

        let mut tok = Tokenizer::default();
        assert!(matches!(
            tok.load(&path),
            Err(PersistError::MissingByteEntry(65))
        ));
    }

    #[test]
    fn test_malformed_root_is_rejected() {
        let mut buf = minimal_header();
        push_u64(&mut buf, 0); // merges
        push_u64(&mut buf, 1); // root prefix_len: must be 0
        buf.push(b'x');
        push_i32(&mut buf, -1);
        push_u64(&mut buf, 0);

        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tok.bin");
        fs::write(&path, &buf).expect("write");

        let mut tok = Tokenizer::default();
        assert!(matches!(
            tok.load(&path),
            Err(PersistError::MalformedTree(_))
        ));
    }

    #[test]
    fn test_loaded_tree_round_trips_encoding() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tok.bin");

        let mut tok = Tokenizer::default();
        tok.train("mississippi mississippi", 270).expect("training failed");
        tok.save(&path).expect("save failed");

        let mut loaded = Tokenizer::default();
        loaded.load(&path).expect("load failed");
        let ids = loaded.encode("mississippi");
        assert_eq!(loaded.decode(&ids), b"mississippi".to_vec());
    }
}
