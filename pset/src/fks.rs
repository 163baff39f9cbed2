//! Perfect set built by two-level FKS hashing.
//!
//! The high bits of a key's hash select a bucket; each bucket owns a window
//! of the shared element array, located by its jump entry, and a bit window
//! of the hash selects the slot inside it. Windows of different buckets
//! interleave freely, so the element array stays exactly as long as the
//! number of keys.
//!
//! The construction follows M. L. Fredman, J. Komlós and E. Szemerédi,
//! *Storing a Sparse Table with O(1) Worst Case Access Time*, JACM 1984.

use std::borrow::Borrow;

use bitm::{n_lowest_bits, BitAccess, BitVec};
use dyn_size_of::GetSize;
use wordmix::{DefaultWordHash, WordHash};

use crate::buckets::{place_elements, Buckets};
use crate::error::BuildError;
use crate::policy::{Pow2Upper, SizePolicy};
use crate::stats::BuildStatsCollector;

/// The default target for the average number of keys per bucket.
pub const DEFAULT_LAMBDA: usize = 4;

/// Widths are kept below this bound so `ws` cannot overflow and the window
/// never reaches past a 64-bit hash.
const MAX_WIDTH: u8 = 56;

/// Per-bucket locator of a window within the element array.
///
/// `ws` packs the hash window that selects the in-window offset:
///
/// ```text
///  63                      8 7       0
/// +-------------------------+---------+
/// | width mask (`w` one bits) | shift |
/// +-------------------------+---------+
/// ```
///
/// The slot of a key with hash `h` is `pos + ((h >> shift) & width_mask)`,
/// two dependent arithmetic operations after one load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct JumpEntry {
    pos: u64,
    ws: u64,
}

impl JumpEntry {
    #[inline]
    fn window(shift: u8, width: u8) -> Self {
        Self { pos: 0, ws: (n_lowest_bits(width) << 8) | shift as u64 }
    }

    #[inline(always)]
    fn element_position(&self, hash: u64) -> usize {
        (self.pos + ((hash >> (self.ws as u8)) & (self.ws >> 8))) as usize
    }
}

impl GetSize for JumpEntry {}

/// Finds the narrowest hash window that separates all members of bucket `b`;
/// on success `offsets` holds each member's in-window offset, in member
/// order.
///
/// Windows narrower than `log2(bucket size)` are skipped: they cannot be
/// injective by pigeonhole, so the outcome is the same as searching from
/// width zero.
fn offset_window(buckets: &Buckets, b: usize, size: usize, offsets: &mut Vec<usize>) -> Option<JumpEntry> {
    let min_width = size.next_power_of_two().trailing_zeros() as u8;
    for width in min_width..MAX_WIDTH {
        'shift: for shift in 0..64u8 {
            let jump = JumpEntry::window(shift, width);
            offsets.clear();
            for node in buckets.members(b) {
                let off = jump.element_position(node.hash);
                if offsets.contains(&off) {
                    continue 'shift;
                }
                offsets.push(off);
            }
            return Some(jump);
        }
    }
    None
}

/// First base position at which every offset lands on an available slot of
/// the `n`-slot element array.
fn base_position(available: &[u64], offsets: &[usize], n: usize) -> Option<usize> {
    'base: for base in 0..n {
        for &off in offsets {
            let pos = base + off;
            if pos >= n || !available.get_bit(pos) {
                continue 'base;
            }
        }
        return Some(base);
    }
    None
}

struct Placement {
    jsize_index: usize,
    jumps: Box<[JumpEntry]>,
    /// For each element slot, the input index of the key assigned to it.
    assignment: Box<[u32]>,
}

/// Immutable set of distinct keys with collision-free lookup through one
/// jump-table load.
///
/// Built once from a finite key sequence by
/// [`PerfectSet::try_with_hash_lambda`] and friends; read-only afterwards.
/// The element array length equals the number of keys, so iteration in slot
/// order visits every key exactly once.
#[derive(Clone, Debug)]
pub struct PerfectSet<K, H = DefaultWordHash> {
    hash: H,
    jsize_index: usize,
    jumps: Box<[JumpEntry]>,
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
            stats.attempt(lambda, Pow2Upper::size(Pow2Upper::size_index(keys.len() / lambda)));
            match Self::try_place(&keys, &hash, lambda) {
                Ok(Some(placement)) => {
                    stats.end(true);
                    let elements = place_elements(keys, &placement.assignment);
                    return Ok(Self {
                        hash,
                        jsize_index: placement.jsize_index,
                        jumps: placement.jumps,
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
            .expect("Constructing fks::PerfectSet failed. The input contains duplicate keys or colliding hashes.")
    }

    /// One placement attempt at a fixed `lambda`. `Ok(None)` means some
    /// bucket could not be placed and the caller should retry with a smaller
    /// `lambda`.
    fn try_place(keys: &[K], hash: &H, lambda: usize) -> Result<Option<Placement>, BuildError> {
        let n = keys.len();
        let jsize_index = Pow2Upper::size_index(n / lambda);

        let buckets = Buckets::classify::<K, H, Pow2Upper>(keys, hash, jsize_index)?;

        let mut jumps = vec![JumpEntry::default(); Pow2Upper::size(jsize_index)].into_boxed_slice();
        let mut assignment = vec![0u32; n].into_boxed_slice();
        let mut available = Box::<[u64]>::with_filled_bits(n);
        let mut offsets = Vec::new();

        for &b in &buckets.by_decreasing_size() {
            let b = b as usize;
            let size = buckets.size(b);
            if size == 0 {
                break; // remaining buckets also empty
            }
            // The first injective window decides: when no base position fits
            // its offsets, the whole attempt fails and lambda is halved.
            let Some(mut jump) = offset_window(&buckets, b, size, &mut offsets) else {
                return Ok(None);
            };
            let Some(base) = base_position(&available, &offsets, n) else {
                return Ok(None);
            };
            jump.pos = base as u64;
            for (node, &off) in buckets.members(b).zip(offsets.iter()) {
                assignment[base + off] = node.key;
                available.clear_bit(base + off);
            }
            jumps[b] = jump;
        }

        Ok(Some(Placement { jsize_index, jumps, assignment }))
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

    /// Length of the jump table. Always a power of two of roughly
    /// `len() / lambda` entries for the load target the construction
    /// succeeded at.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.jumps.len()
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
        let jump = self.jumps[Pow2Upper::position(hash, self.jsize_index)];
        let pos = jump.element_position(hash);
        // A successful construction fills every slot, so only positions past
        // the end signal a miss; for stored keys the branch never fires.
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
        self.elements.size_bytes_dyn() + self.jumps.size_bytes_dyn()
    }
    fn size_bytes_content_dyn(&self) -> usize {
        self.elements.size_bytes_content_dyn() + self.jumps.size_bytes_content_dyn()
    }
    const USES_DYN_MEM: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hd::tests::{check_perfect, Recorder};
    use wordmix::{Mulx, Mulxp3, M};

    #[test]
    fn jump_entry_packs_shift_and_width() {
        let jump = JumpEntry::window(13, 5);
        assert_eq!(jump.ws as u8, 13);
        assert_eq!(jump.ws >> 8, 0b11111);
        // Hash window: bits [13, 18) select the offset.
        assert_eq!(JumpEntry { pos: 0, ..jump }.element_position(0b10110 << 13), 0b10110);
        assert_eq!(JumpEntry { pos: 100, ..jump }.element_position(0b10110 << 13), 100 + 0b10110);
        // The widest window still fits below the shift byte.
        let wide = JumpEntry::window(0, MAX_WIDTH - 1);
        assert_eq!(wide.ws >> 8, n_lowest_bits(55));
    }

    #[test]
    fn small_integers() {
        let keys = [17u64, 42, 128, 256, 513, 1024];
        let set = PerfectSet::try_with_hash(keys, M).unwrap();
        assert_eq!(set.len(), 6);
        check_perfect(6, &keys, |key| set.index_of(key));
        for key in &keys {
            assert_eq!(set.get(key), Some(key));
        }
        assert_eq!(set.get(&0), None);
        assert!(set.bucket_count().is_power_of_two());
    }

    #[test]
    fn empty_set() {
        let set = PerfectSet::try_with_hash(Vec::<u64>::new(), Mulx).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.get(&5), None);
        assert_eq!(set.iter().next(), None);
    }

    #[test]
    fn tiny_sets() {
        for n in 1..=3u64 {
            let keys: Vec<u64> = (0..n).map(|i| i * 1000 + 7).collect();
            let set = PerfectSet::try_with_hash(keys.clone(), Mulx).unwrap();
            assert_eq!(set.len(), n as usize);
            check_perfect(n as usize, &keys, |key| set.index_of(key));
            assert_eq!(set.get(&3), None);
        }
    }

    #[test]
    fn string_keys_with_transparent_lookup() {
        let keys: Vec<String> = (0..100).map(|i| format!("pfx_{}_sfx", i)).collect();
        let set = PerfectSet::try_with_hash(keys.clone(), Mulxp3::default()).unwrap();
        check_perfect(100, &keys, |key| set.index_of(key));
        assert_eq!(set.get("pfx_64_sfx"), Some(&keys[64]));
        assert_eq!(set.get("pfx_100_sfx"), None);
    }

    #[test]
    fn duplicate_elements_are_rejected() {
        assert_eq!(
            PerfectSet::try_with_hash([1u64, 1], Mulx).unwrap_err(),
            BuildError::DuplicateElement
        );
    }

    #[test]
    fn duplicate_hash_recovery() {
        #[derive(Debug)]
        struct Stuck;
        impl WordHash<u64> for Stuck {
            fn hash_word(&self, _key: &u64) -> u64 {
                7
            }
        }
        let keys = [10u64, 20];
        assert_eq!(
            PerfectSet::try_with_hash(keys, Stuck).unwrap_err(),
            BuildError::DuplicateHash
        );
        let set = PerfectSet::try_with_hash(keys, Mulx).unwrap();
        assert!(set.contains(&10) && set.contains(&20));
    }

    #[test]
    fn placement_is_deterministic() {
        let keys: Vec<u64> = (0..500).map(|i| i * i + 3).collect();
        let a = PerfectSet::try_with_hash(keys.clone(), Mulx).unwrap();
        let b = PerfectSet::try_with_hash(keys, Mulx).unwrap();
        assert_eq!(a.jumps, b.jumps);
        assert_eq!(a.elements, b.elements);
        assert_eq!(a.jsize_index, b.jsize_index);
    }

    #[test]
    fn succeeds_at_smaller_lambdas() {
        let keys: Vec<u64> = (0..300).map(|i| i * 2654435761 + 1).collect();
        for lambda in [4, 2, 1] {
            let set = PerfectSet::try_with_hash_lambda(keys.clone(), Mulx, lambda).unwrap();
            check_perfect(keys.len(), &keys, |key| set.index_of(key));
        }
    }

    #[test]
    fn jump_table_tracks_successful_lambda() {
        let keys: Vec<u64> = (0..1000).map(|i| i * 0x9E37_79B9 + 11).collect();
        let mut stats = Recorder::default();
        let set = PerfectSet::try_with_hash_lambda_stats(keys.clone(), Mulx, 4, &mut stats).unwrap();
        assert_eq!(stats.outcome, Some(true));
        assert_eq!(stats.attempts[0], 4);
        let successful_lambda = *stats.attempts.last().unwrap();
        let expected = Pow2Upper::size(Pow2Upper::size_index(keys.len() / successful_lambda));
        assert_eq!(set.bucket_count(), expected);
    }

    #[test]
    fn zero_lambda_cannot_construct() {
        let err = PerfectSet::try_with_hash_lambda([1u64, 2, 3], Mulx, 0).unwrap_err();
        assert_eq!(err, BuildError::ConstructionFailure);
    }

    #[test]
    fn all_slots_are_occupied() {
        let keys: Vec<u64> = (0..777).map(|i| i * 31 + 5).collect();
        let set = PerfectSet::try_with_hash(keys.clone(), Mulx).unwrap();
        assert_eq!(set.as_slice().len(), keys.len());
        let mut stored: Vec<u64> = set.iter().copied().collect();
        stored.sort_unstable();
        let mut expected = keys;
        expected.sort_unstable();
        assert_eq!(stored, expected);
    }
}
