//! slicewire-core — buffer cursor and shared error type for the
//! slicewire decoder stack.
//!
//! Provides:
//! - [`buffer::Buffer`]: little-endian primitive reads over a bounded byte
//!   region, the compact-size codec, and the cumulative sequence-size guard
//!   hostile-input defenses lean on.
//! - [`error::WireError`] / [`error::WireResult`]: the error type every
//!   layer above this one propagates.

#![deny(missing_docs)]

pub mod buffer;
pub mod error;

pub use buffer::{Buffer, WireScalar};
pub use error::{WireError, WireResult};

/// Convenience re-exports for a quick `use slicewire_core::prelude::*;`.
pub mod prelude {
    pub use crate::{Buffer, WireError, WireResult, WireScalar};
}
