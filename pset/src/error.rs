use thiserror::Error;

/// Reasons why construction of a perfect set can fail.
///
/// The variants are distinct because they call for different reactions:
/// duplicate elements make the input itself unusable, duplicate hashes are
/// cured by switching to another mixer, and a placement failure by retrying
/// with another mixer or fewer keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Two inputs compare equal. The input must be deduplicated.
    #[error("duplicate elements found")]
    DuplicateElement,

    /// Two distinct inputs hash to the same word.
    #[error("duplicate hash values found")]
    DuplicateHash,

    /// The displacement search exhausted every load target down to zero.
    #[error("could not construct the container")]
    ConstructionFailure,
}
