//! slicewire-decode — a decoder for the Slice 1.1 (and 1.0-header-only)
//! wire encoding: encapsulations, tagged members, sliced polymorphic class
//! and exception graphs, type-id tables, enums, and proxies.
//!
//! This crate only reads. There is no encoder: wherever a value's
//! most-derived type can't be resolved locally, its bytes are preserved
//! in [`slice::SlicedData`] so a caller with its own wire writer can
//! re-emit it losslessly, but writing that wire format back out is out of
//! scope here.
//!
//! Start with [`decoder::Decoder`]; everything else is the state it
//! manages along the way.

#![deny(missing_docs)]

pub mod class;
pub mod config;
pub mod decoder;
pub mod encaps;
pub mod exception;
pub mod registry;
pub mod slice;
pub mod tagged;
pub mod typeid;

pub use class::{AnyClass, ClassRef, UnknownSlicedClass};
pub use config::DecoderConfig;
pub use decoder::Decoder;
pub use encaps::{EncodingVersion, ENCODING_1_0, ENCODING_1_1};
pub use exception::UserException;
pub use registry::{ClassResolver, CompactIdResolver, ExceptionFactory, Identity, ProxyFactory};
pub use slice::{PreservedSlice, SlicedData, SlicedSliceData};
pub use tagged::OptionalFormat;

/// Convenience re-exports for a quick `use slicewire_decode::prelude::*;`.
pub mod prelude {
    pub use crate::{
        AnyClass, ClassRef, ClassResolver, CompactIdResolver, Decoder, DecoderConfig,
        EncodingVersion, ExceptionFactory, Identity, OptionalFormat, PreservedSlice, ProxyFactory,
        SlicedData, UnknownSlicedClass, UserException, ENCODING_1_0, ENCODING_1_1,
    };
    pub use slicewire_core::{WireError, WireResult};
}
