//! Shared error type for every layer of the decoder stack.

/// Failure surfaced by any read on a [`crate::buffer::Buffer`] or by the
/// layers built on top of it.
///
/// All variants are terminal: callers must not keep decoding on the same
/// stream after one is returned (see spec §7 — "the decoder's internal
/// frames are left in a state that tolerates further use only after reset").
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Read past the buffer limit, a negative size, or an aggregate
    /// sequence-size budget violation.
    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    /// Encapsulation header/footer mismatch: size smaller than the 6-byte
    /// header, cursor not at `start + sz` on `end_encapsulation`, or a 1.0
    /// empty encapsulation whose size isn't exactly 6.
    #[error("encapsulation error: {0}")]
    Encapsulation(String),

    /// Structurally invalid bytes: bad object id, bad indirection-table
    /// index, mismatched tagged-member format, invalid UTF-8, missing
    /// slice size, class-graph-depth exceeded, ...
    #[error("marshal error: {0}")]
    Marshal(String),

    /// Compact-format slice with an unresolvable type and no registered
    /// factory. Not recoverable by slicing (compact format carries no
    /// per-slice size to skip over).
    #[error("no class factory for compact id {0}")]
    NoClassFactory(i32),

    /// A user exception's most-derived slice (and every slice above it)
    /// is unknown to this receiver.
    #[error("unknown user exception: {0}")]
    UnknownUserException(String),
}

/// Result alias used throughout the decoder stack.
pub type WireResult<T> = Result<T, WireError>;

impl WireError {
    /// Build an [`WireError::OutOfBounds`] from anything string-like.
    pub fn out_of_bounds(msg: impl Into<String>) -> Self {
        WireError::OutOfBounds(msg.into())
    }

    /// Build a [`WireError::Marshal`] from anything string-like.
    pub fn marshal(msg: impl Into<String>) -> Self {
        WireError::Marshal(msg.into())
    }

    /// Build an [`WireError::Encapsulation`] from anything string-like.
    pub fn encapsulation(msg: impl Into<String>) -> Self {
        WireError::Encapsulation(msg.into())
    }
}
