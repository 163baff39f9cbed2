//! Grouping of input keys by bucket index during construction.
//!
//! Buckets live in a contiguous node arena threaded with 32-bit next links;
//! appends go to the chain tail so every bucket keeps its members in input
//! order, which placement relies on for reproducibility.

use std::cmp::Reverse;

use wordmix::WordHash;

use crate::error::BuildError;
use crate::policy::SizePolicy;

const NONE: u32 = u32::MAX;

/// A single classified key: its index in the input slice, its hash, and the
/// arena index of the next member of the same bucket.
#[derive(Debug)]
pub(crate) struct BucketNode {
    pub key: u32,
    pub hash: u64,
    next: u32,
}

/// Input keys grouped by the bucket index their hash maps to.
#[derive(Debug)]
pub(crate) struct Buckets {
    nodes: Vec<BucketNode>,
    heads: Box<[u32]>,
    sizes: Box<[u32]>,
}

impl Buckets {
    /// Groups `keys` by the `P`-position of their hash in a table encoded by
    /// `size_index`.
    ///
    /// A hash already present in the target bucket stops classification: with
    /// an equal key it is [`BuildError::DuplicateElement`], otherwise
    /// [`BuildError::DuplicateHash`].
    pub(crate) fn classify<K, H, P>(keys: &[K], hash: &H, size_index: usize) -> Result<Self, BuildError>
    where
        K: Eq,
        H: WordHash<K>,
        P: SizePolicy,
    {
        assert!(keys.len() < NONE as usize, "at most 2^32 - 1 keys are supported");
        let bucket_count = P::size(size_index);
        let mut nodes: Vec<BucketNode> = Vec::with_capacity(keys.len());
        let mut heads = vec![NONE; bucket_count].into_boxed_slice();
        let mut sizes = vec![0u32; bucket_count].into_boxed_slice();

        for (i, key) in keys.iter().enumerate() {
            let h = hash.hash_word(key);
            let b = P::position(h, size_index);

            let mut last = NONE;
            let mut cur = heads[b];
            while cur != NONE {
                let node = &nodes[cur as usize];
                if node.hash == h {
                    return Err(if keys[node.key as usize] == *key {
                        BuildError::DuplicateElement
                    } else {
                        BuildError::DuplicateHash
                    });
                }
                last = cur;
                cur = node.next;
            }

            let new = nodes.len() as u32;
            nodes.push(BucketNode { key: i as u32, hash: h, next: NONE });
            if last == NONE {
                heads[b] = new;
            } else {
                nodes[last as usize].next = new;
            }
            sizes[b] += 1;
        }

        Ok(Self { nodes, heads, sizes })
    }

    /// Number of keys in bucket `b`.
    #[inline]
    pub(crate) fn size(&self, b: usize) -> usize {
        self.sizes[b] as usize
    }

    /// Members of bucket `b`, in input order.
    #[inline]
    pub(crate) fn members(&self, b: usize) -> Members<'_> {
        Members { nodes: &self.nodes, cur: self.heads[b] }
    }

    /// Bucket indices ordered by decreasing size; ties keep the smaller index
    /// first, so the order is fully deterministic.
    pub(crate) fn by_decreasing_size(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = (0..self.sizes.len() as u32).collect();
        indices.sort_unstable_by_key(|&b| (Reverse(self.sizes[b as usize]), b));
        indices
    }
}

pub(crate) struct Members<'a> {
    nodes: &'a [BucketNode],
    cur: u32,
}

impl<'a> Iterator for Members<'a> {
    type Item = &'a BucketNode;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == NONE {
            return None;
        }
        let node = &self.nodes[self.cur as usize];
        self.cur = node.next;
        Some(node)
    }
}

/// Moves each key into its assigned slot: `assignment[slot]` is the input
/// index of the key stored there, and every input index occurs exactly once.
pub(crate) fn place_elements<K>(keys: Vec<K>, assignment: &[u32]) -> Box<[K]> {
    let mut keys: Vec<Option<K>> = keys.into_iter().map(Some).collect();
    assignment
        .iter()
        .map(|&i| keys[i as usize].take().expect("every slot is assigned a distinct key"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Pow2Lower, Pow2Upper};
    use wordmix::{Mulx, WordHash};

    /// Mixer that maps every key to the same word.
    #[derive(Debug)]
    struct Stuck;

    impl WordHash<u64> for Stuck {
        fn hash_word(&self, _key: &u64) -> u64 {
            0x42
        }
    }

    /// Mixer that returns the key itself, so bucket indices are transparent.
    struct Id;

    impl WordHash<u64> for Id {
        fn hash_word(&self, key: &u64) -> u64 {
            *key
        }
    }

    #[test]
    fn groups_by_low_bits_in_input_order() {
        let keys = [0u64, 1, 5, 4, 13, 8];
        let idx = Pow2Lower::size_index(4);
        let buckets = Buckets::classify::<_, _, Pow2Lower>(&keys, &Id, idx).unwrap();
        assert_eq!(buckets.size(0), 3);
        assert_eq!(buckets.size(1), 3);
        assert_eq!(buckets.size(2), 0);
        assert_eq!(buckets.size(3), 0);
        let b0: Vec<u32> = buckets.members(0).map(|node| node.key).collect();
        assert_eq!(b0, [0, 3, 5]);
        let b1: Vec<u64> = buckets.members(1).map(|node| node.hash).collect();
        assert_eq!(b1, [1, 5, 13]);
    }

    #[test]
    fn orders_buckets_by_size_then_index() {
        let keys = [0u64, 1, 5, 4, 13, 8, 2, 3];
        let idx = Pow2Lower::size_index(4);
        let buckets = Buckets::classify::<_, _, Pow2Lower>(&keys, &Id, idx).unwrap();
        assert_eq!(buckets.by_decreasing_size(), [0, 1, 2, 3]);
    }

    #[test]
    fn equal_keys_are_duplicate_elements() {
        let keys = [1u64, 1];
        let idx = Pow2Upper::size_index(2);
        let err = Buckets::classify::<_, _, Pow2Upper>(&keys, &Mulx, idx).unwrap_err();
        assert_eq!(err, BuildError::DuplicateElement);
    }

    #[test]
    fn colliding_distinct_keys_are_duplicate_hashes() {
        let keys = [1u64, 2];
        let idx = Pow2Upper::size_index(2);
        let err = Buckets::classify::<_, _, Pow2Upper>(&keys, &Stuck, idx).unwrap_err();
        assert_eq!(err, BuildError::DuplicateHash);
    }

    #[test]
    fn places_keys_by_assignment() {
        let elements = place_elements(vec!["a", "b", "c"], &[2, 0, 1]);
        assert_eq!(elements.as_ref(), ["c", "a", "b"]);
    }
}
