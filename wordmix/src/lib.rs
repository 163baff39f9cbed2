#![doc = include_str!("../README.md")]

mod mix;
pub use mix::{mulx, Mulx, Xmx, Xm, M, Mbs};

mod string;
pub use string::Mulxp3;

use std::collections::hash_map::DefaultHasher;
use std::hash::{BuildHasher, BuildHasherDefault, Hash, Hasher};

/// Family of hash functions that map keys to a single 64-bit word.
///
/// Implementations must be deterministic: within the lifetime of one value of
/// the mixer, equal keys hash to equal words. When a mixer is implemented for
/// both an owned key type and a borrowed form of it (such as [`String`] and
/// [`str`]), both implementations must agree on every value.
pub trait WordHash<K: ?Sized> {
    /// Returns the 64-bit hash of `key`.
    fn hash_word(&self, key: &K) -> u64;
}

/// [`WordHash`] that hashes any `K: Hash` through a standard [`BuildHasher`].
#[derive(Default, Copy, Clone)]
pub struct StdHash<BH: BuildHasher = BuildHasherDefault<DefaultHasher>>(pub BH);

impl<K: Hash + ?Sized, BH: BuildHasher> WordHash<K> for StdHash<BH> {
    #[inline(always)]
    fn hash_word(&self, key: &K) -> u64 {
        let mut hasher = self.0.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }
}

/// The default [`WordHash`]. Deterministic across runs.
pub type DefaultWordHash = StdHash;

/// [`WordHash`] that hashes any `K: Hash` with the `wyhash` crate, using the
/// wrapped seed.
#[cfg(feature = "wyhash")]
#[derive(Default, Copy, Clone)]
pub struct Wy(pub u64);

#[cfg(feature = "wyhash")]
impl<K: Hash + ?Sized> WordHash<K> for Wy {
    #[inline(always)]
    fn hash_word(&self, key: &K) -> u64 {
        let mut hasher = wyhash::WyHash::with_seed(self.0);
        key.hash(&mut hasher);
        hasher.finish()
    }
}
