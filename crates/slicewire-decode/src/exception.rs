//! User exceptions: the `UserException` root trait (spec §4.7).

use std::fmt;

use slicewire_core::WireResult;

use crate::decoder::Decoder;

/// Root trait for every decodable user exception.
///
/// Unlike [`crate::class::AnyClass`], exceptions never back-reference
/// themselves, so their indirection tables are read eagerly rather than
/// deferred, and there is no unmarshaled map to register into.
pub trait UserException: fmt::Debug {
    /// The most-derived Slice type-id this concrete Rust type implements.
    fn type_id(&self) -> &str;

    /// Read this exception's data members, walking up the inheritance
    /// chain via `startSlice`/`endSlice` pairs as needed.
    fn read(&mut self, decoder: &mut Decoder) -> WireResult<()>;
}
