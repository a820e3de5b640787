//! Polymorphic class instances: the `AnyClass` root trait, the shared
//! `ClassRef` handle, and the unknown-type fallback (spec §4.6, §9).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use slicewire_core::WireResult;

use crate::decoder::Decoder;
use crate::slice::SlicedData;

/// Root trait for every decodable class instance.
///
/// `read` is invoked with the instance already registered in the
/// unmarshaled map (spec §4.6 step 5 — "register first, then fill"), so
/// implementations may themselves call back into `decoder.read_class` for
/// fields that form a cycle back to `self`.
pub trait AnyClass: fmt::Debug {
    /// The most-derived Slice type-id this concrete Rust type implements.
    fn type_id(&self) -> &str;

    /// Read this instance's data members, walking up the inheritance chain
    /// via `startSlice`/`endSlice` pairs as needed.
    fn read(&mut self, decoder: &mut Decoder) -> WireResult<()>;

    /// Attach preserved slices accumulated while resolving this instance's
    /// most-derived type (spec §6 "produced interfaces"). No-op unless the
    /// implementer wants to carry them; only [`UnknownSlicedClass`] does.
    fn set_sliced_data(&mut self, _data: SlicedData) {}

    /// Narrow a `dyn AnyClass` back to its concrete type. Every
    /// implementation should return `self`; this exists purely so callers
    /// holding a [`ClassRef`] can `downcast_ref` without the decoder
    /// needing a closed type registry.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Shared handle to a class instance.
///
/// Interior-mutable by construction: spec §9 requires that a partially
/// constructed instance be visible (and mutable) to nested `read_class`
/// calls that resolve a cyclic back-reference before the instance's own
/// `read` has returned.
pub type ClassRef = Rc<RefCell<dyn AnyClass>>;

/// Fallback value for a class whose most-derived type (and every slice
/// down to some recognized ancestor, or none at all) isn't registered
/// locally. Carries the preserved wire bytes so the value can be
/// re-encoded without loss when `preserve` was requested.
#[derive(Debug)]
pub struct UnknownSlicedClass {
    /// The most-derived type-id as seen on the wire.
    pub type_id: String,
    /// Preserved slice data, present only when decoding with `preserve = true`.
    pub sliced_data: Option<SlicedData>,
}

impl AnyClass for UnknownSlicedClass {
    fn type_id(&self) -> &str {
        &self.type_id
    }

    fn read(&mut self, _decoder: &mut Decoder) -> WireResult<()> {
        // All slices were already consumed by `skip_slice` while resolving
        // this instance; there's nothing left to read.
        Ok(())
    }

    fn set_sliced_data(&mut self, data: SlicedData) {
        self.sliced_data = Some(data);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sliced_class_reports_its_type_id() {
        let v = UnknownSlicedClass {
            type_id: "::Mod::Derived".into(),
            sliced_data: None,
        };
        assert_eq!(v.type_id(), "::Mod::Derived");
    }
}
