//! Digest primitives.
//!
//! All content addressing in the node uses one 32-byte digest, applied
//! uniformly to headers, transactions and Merkle aggregation.

use blake2::{Blake2s256, Digest};

use crate::Hash;

/// Digest a sequence of byte slices as one message.
pub fn digest(parts: &[&[u8]]) -> Hash {
    let mut hasher = Blake2s256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash::new(hasher.finalize().into())
}

/// Compute a Merkle root over a list of leaf hashes.
///
/// Pairwise digests, duplicating the last element of odd-length
/// levels. An empty list yields the zero hash.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }

    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 != 0 {
            level.push(*level.last().expect("non-empty level"));
        }
        level = level
            .chunks(2)
            .map(|pair| digest(&[pair[0].as_ref(), pair[1].as_ref()]))
            .collect();
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_leaf_is_its_own_root() {
        let leaf = digest(&[b"leaf"]);
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn odd_levels_duplicate_last() {
        let a = digest(&[b"a"]);
        let b = digest(&[b"b"]);
        let c = digest(&[b"c"]);
        let ab = digest(&[a.as_ref(), b.as_ref()]);
        let cc = digest(&[c.as_ref(), c.as_ref()]);
        let expected = digest(&[ab.as_ref(), cc.as_ref()]);
        assert_eq!(merkle_root(&[a, b, c]), expected);
    }

    #[test]
    fn empty_list_is_zero() {
        assert_eq!(merkle_root(&[]), Hash::ZERO);
    }
}
