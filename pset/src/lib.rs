#![doc = include_str!("../README.md")]

pub mod policy;
pub mod stats;

mod error;
pub use error::BuildError;

pub(crate) mod buckets;

pub mod hd;
pub mod fks;

pub use wordmix;
pub use wordmix::{DefaultWordHash, StdHash, WordHash};

pub use dyn_size_of::GetSize;
