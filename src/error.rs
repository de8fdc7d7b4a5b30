use thiserror::Error;

/// Errors surfaced by the collector core to its embedder.
///
/// Everything else — free-list corruption, double frees, color
/// inconsistency — is a programmer bug and is caught by `debug_assert!`
/// rather than returned here.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GcError {
    /// The host allocator returned null for a positive-sized request, even
    /// after a full collection was run and the request retried once.
    #[error("Out of memory")]
    OutOfMemory,

    /// `protect` was called while the arena was already at capacity.
    #[error("arena overflow error")]
    ArenaOverflow,
}
