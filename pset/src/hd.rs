//! Perfect set built by hash and displace.
//!
//! Every key occupies one slot of an element array whose length equals the
//! number of keys. The low bits of a key's hash select a bucket; the bucket's
//! displacement pair, found during construction, steers each member to its
//! own slot through a multiply-add on the high bits. Lookup therefore costs
//! one displacement load, one arithmetic chain and one key comparison.
//!
//! The construction follows the hash-and-displace family of D. Belazzougui,
//! F. C. Botelho and M. Dietzfelbinger, *Hash, displace, and compress*,
//! ESA 2009.

use std::borrow::Borrow;

use bitm::{BitAccess, BitVec};
use dyn_size_of::GetSize;
use wordmix::{DefaultWordHash, WordHash};

use crate::buckets::{place_elements, Buckets};
use crate::error::BuildError;
use crate::policy::{Pow2Lower, Pow2Upper, SizePolicy};
use crate::stats::BuildStatsCollector;

/// The default target for the average number of keys per bucket.
pub const DEFAULT_LAMBDA: usize = 4;

/// Displacement pair stored per bucket, pre-encoded for the lookup formula:
/// the first word is `d0 << size_index`, which keeps the `d0` contribution
/// above the slot bits, and the second is `(d1 << 32) | 1`, odd and therefore
/// invertible modulo any power of two. The slot of a key with hash `h` is
/// `(first + second * h) >> size_index` in wrapping arithmetic.
type Displacement = (u64, u64);

#[inline(always)]
fn element_position(hash: u64, d: Displacement, size_index: usize) -> usize {
    Pow2Upper::position(d.0.wrapping_add(d.1.wrapping_mul(hash)), size_index)
}

/// Searches displacement pairs for bucket `b` against the committed
/// occupancy in `taken`. On success `positions` holds the slot of each
/// member, in member order.
///
/// Candidates are tried in lexicographic `(d0, d1)` order over the extended
/// capacity, so the chosen pair only depends on the occupancy left behind by
/// previously committed buckets.
fn displace(
    buckets: &Buckets,
    b: usize,
    n: usize,
    size_index: usize,
    extended: u64,
    taken: &[u64],
    positions: &mut Vec<usize>,
) -> Option<Displacement> {
    for d0 in 0..extended {
        'candidate: for d1 in 0..extended {
            let d = (d0 << size_index, (d1 << 32) | 1);
            positions.clear();
            for node in buckets.members(b) {
                let pos = element_position(node.hash, d, size_index);
                if pos >= n || taken.get_bit(pos) || positions.contains(&pos) {
                    continue 'candidate;
                }
                positions.push(pos);
            }
            return Some(d);
        }
    }
    None
}

struct Placement {
    dsize_index: usize,
    size_index: usize,
    displacements: Box<[Displacement]>,
    /// For each element slot, the input index of the key assigned to it.
    assignment: Box<[u32]>,
}

/// Immutable set of distinct keys with collision-free, single-probe lookup.
///
/// Built once from a finite key sequence by
/// [`PerfectSet::try_with_hash_lambda`] and friends; read-only afterwards.
/// The element array length equals the number of keys, so iteration in slot
/// order visits every key exactly once.
#[derive(Clone, Debug)]
pub struct PerfectSet<K, H = DefaultWordHash> {
    hash: H,
    dsize_index: usize,
    size_index: usize,
    displacements: Box<[Displacement]>,
    elements: Box<[K]>,
}

impl<K: Eq, H: WordHash<K>> PerfectSet<K, H> {
    /// Builds the set from `keys`, reporting construction events to `stats`.
    ///
    /// The load target `lambda` is halved after every failed placement
    /// attempt; reaching zero raises [`BuildError::ConstructionFailure`].
    /// Duplicate keys and duplicate hashes are input defects and fail
    /// immediately, without retrying.
    pub fn try_with_hash_lambda_stats(
        keys: impl IntoIterator<Item = K>,
        hash: H,
        lambda: usize,
        stats: &mut impl BuildStatsCollector,
    ) -> Result<Self, BuildError> {
        let keys: Vec<K> = keys.into_iter().collect();
        let mut lambda = lambda;
        while lambda > 0 {
            stats.attempt(lambda, Pow2Lower::size(Pow2Lower::size_index(keys.len() / lambda)));
            match Self::try_place(&keys, &hash, lambda) {
                Ok(Some(placement)) => {
                    stats.end(true);
                    let elements = place_elements(keys, &placement.assignment);
                    return Ok(Self {
                        hash,
                        dsize_index: placement.dsize_index,
                        size_index: placement.size_index,
                        displacements: placement.displacements,
                        elements,
                    });
                }
                Ok(None) => lambda /= 2,
                Err(err) => {
                    stats.end(false);
                    return Err(err);
                }
            }
        }
        stats.end(false);
        Err(BuildError::ConstructionFailure)
    }

    /// Builds the set from `keys` with the load target `lambda`.
    #[inline]
    pub fn try_with_hash_lambda(keys: impl IntoIterator<Item = K>, hash: H, lambda: usize) -> Result<Self, BuildError> {
        Self::try_with_hash_lambda_stats(keys, hash, lambda, &mut ())
    }

    /// Builds the set from `keys` with the default load target.
    #[inline]
    pub fn try_with_hash(keys: impl IntoIterator<Item = K>, hash: H) -> Result<Self, BuildError> {
        Self::try_with_hash_lambda(keys, hash, DEFAULT_LAMBDA)
    }

    /// Builds the set from `keys`.
    ///
    /// Panics when construction fails; see [`PerfectSet::try_with_hash`] for
    /// the fallible form.
    pub fn with_hash(keys: impl IntoIterator<Item = K>, hash: H) -> Self {
        Self::try_with_hash(keys, hash)
            .expect("Constructing hd::PerfectSet failed. The input contains duplicate keys or colliding hashes.")
    }

    /// One placement attempt at a fixed `lambda`. `Ok(None)` means some
    /// bucket exhausted the displacement space and the caller should retry
    /// with a smaller `lambda`.
    fn try_place(keys: &[K], hash: &H, lambda: usize) -> Result<Option<Placement>, BuildError> {
        let n = keys.len();
        let dsize_index = Pow2Lower::size_index(n / lambda);
        // The extended capacity is a power of two strictly larger than the
        // element array; construction and lookup act on a virtual array of
        // that size whose positions from n on count as occupied.
        let size_index = Pow2Upper::size_index(n + 1);
        let extended = Pow2Upper::size(size_index) as u64;

        let buckets = Buckets::classify::<K, H, Pow2Lower>(keys, hash, dsize_index)?;

        let mut displacements = vec![(0u64, 0u64); Pow2Lower::size(dsize_index)].into_boxed_slice();
        let mut assignment = vec![0u32; n].into_boxed_slice();
        let mut taken = Box::<[u64]>::with_zeroed_bits(n);
        let mut positions = Vec::new();

        for &b in &buckets.by_decreasing_size() {
            let b = b as usize;
            if buckets.size(b) == 0 {
                break; // remaining buckets also empty
            }
            match displace(&buckets, b, n, size_index, extended, &taken, &mut positions) {
                Some(d) => {
                    for (node, &pos) in buckets.members(b).zip(positions.iter()) {
                        assignment[pos] = node.key;
                        taken.set_bit(pos);
                    }
                    displacements[b] = d;
                }
                None => return Ok(None),
            }
        }

        Ok(Some(Placement { dsize_index, size_index, displacements, assignment }))
    }
}

impl<K: Eq, H: WordHash<K> + Default> PerfectSet<K, H> {
    /// Builds the set from `keys` with the default hash and load target.
    #[inline]
    pub fn try_new(keys: impl IntoIterator<Item = K>) -> Result<Self, BuildError> {
        Self::try_with_hash(keys, H::default())
    }

    /// Builds the set from `keys` with the default hash and load target.
    ///
    /// Panics when construction fails; see [`PerfectSet::try_new`] for the
    /// fallible form.
    pub fn new(keys: impl IntoIterator<Item = K>) -> Self {
        Self::with_hash(keys, H::default())
    }
}

impl<K, H> PerfectSet<K, H> {
    /// Number of keys in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns `true` if the set contains no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The stored keys in slot order.
    #[inline]
    pub fn as_slice(&self) -> &[K] {
        &self.elements
    }

    /// Iterates over the stored keys in slot order.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, K> {
        self.elements.iter()
    }

    /// The hash mixer the set was built with.
    #[inline]
    pub fn hasher(&self) -> &H {
        &self.hash
    }

    /// Length of the displacement table. Always a power of two of roughly
    /// `len() / lambda` entries for the load target the construction
    /// succeeded at.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.displacements.len()
    }

    /// Slot of `key` in [`as_slice`](PerfectSet::as_slice), or `None` if the
    /// set does not contain it.
    ///
    /// `key` may be any borrowed form of the stored type, as long as the
    /// mixer hashes both forms identically.
    #[inline]
    pub fn index_of<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: WordHash<Q>,
    {
        let hash = self.hash.hash_word(key);
        let d = self.displacements[Pow2Lower::position(hash, self.dsize_index)];
        let pos = element_position(hash, d, self.size_index);
        // Positions in the virtual extension of the element array signal a
        // miss; for stored keys the branch never fires.
        (pos < self.elements.len() && self.elements[pos].borrow() == key).then_some(pos)
    }

    /// The stored key equal to `key`, or `None` if the set does not contain
    /// it.
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<&K>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: WordHash<Q>,
    {
        self.index_of(key).map(|pos| &self.elements[pos])
    }

    /// Returns `true` if the set contains a key equal to `key`.
    #[inline]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: WordHash<Q>,
    {
        self.index_of(key).is_some()
    }
}

impl<'a, K, H> IntoIterator for &'a PerfectSet<K, H> {
    type Item = &'a K;
    type IntoIter = std::slice::Iter<'a, K>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: GetSize, H> GetSize for PerfectSet<K, H> {
    fn size_bytes_dyn(&self) -> usize {
        self.elements.size_bytes_dyn() + self.displacements.size_bytes_dyn()
    }
    fn size_bytes_content_dyn(&self) -> usize {
        self.elements.size_bytes_content_dyn() + self.displacements.size_bytes_content_dyn()
    }
    const USES_DYN_MEM: bool = true;
}
