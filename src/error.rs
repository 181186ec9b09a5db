use thiserror::Error;

/// Convenience alias for fallible trie operations.
pub type Result<T> = std::result::Result<T, RamusError>;

/// Errors surfaced by the adjacency trie and its epoch machinery.
///
/// Duplicate inserts and missing keys are reported through boolean or
/// optional results, never through this type. `Corruption` marks an internal
/// invariant violation and is unrecoverable; callers should drop the affected
/// tree rather than retry.
#[derive(Debug, Error)]
pub enum RamusError {
    /// An internal structural invariant does not hold.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The caller passed an argument the tree cannot honor.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}
