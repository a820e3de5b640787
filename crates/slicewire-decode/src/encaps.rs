//! Encapsulation header parsing and the frame stack (spec §4.2).

use std::collections::HashMap;
use std::fmt;

use crate::class::ClassRef;
use crate::slice::InstanceData;
use crate::typeid::TypeIdTable;

/// `(major, minor)` encoding version pair. Only `1.0` and `1.1` are
/// recognized; `1.0` disables tagged members and class/exception decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodingVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

/// Encoding 1.0: no tagged members, no class/exception slicing support.
pub const ENCODING_1_0: EncodingVersion = EncodingVersion { major: 1, minor: 0 };
/// Encoding 1.1: the fully-featured sliced format this crate decodes.
pub const ENCODING_1_1: EncodingVersion = EncodingVersion { major: 1, minor: 1 };

impl fmt::Display for EncodingVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl EncodingVersion {
    /// True for any version this crate recognizes at all (1.0 or 1.1).
    #[must_use]
    pub fn is_supported(self) -> bool {
        self == ENCODING_1_0 || self == ENCODING_1_1
    }
}

/// Per-encapsulation resolution cache entry for a compact id or type id:
/// either the resolved type-id / constructibility, or a memoized "known
/// absent" so repeated lookups of the same unknown type are O(1).
#[derive(Debug, Clone)]
pub enum CacheEntry<T> {
    /// Resolution succeeded, with the cached payload.
    Resolved(T),
    /// Resolution was attempted and failed; don't try again.
    Unresolvable,
}

/// Lazily-allocated per-encapsulation decoder state: the type-id table,
/// the class back-reference map, and the compact-id/type-id resolution
/// caches (spec §3, §4.6, §9).
#[derive(Debug)]
pub struct EncapsState {
    pub(crate) type_id_table: TypeIdTable,
    pub(crate) unmarshaled_map: HashMap<i32, ClassRef>,
    pub(crate) compact_id_cache: HashMap<i32, CacheEntry<String>>,
    pub(crate) type_id_cache: HashMap<String, bool>,
    pub(crate) value_id_index: i32,
    pub(crate) instance_stack: Vec<InstanceData>,
}

/// Wire value `1` is the permanent "an instance follows inline" sentinel
/// (spec §4.6), so the first instance registered in `unmarshaled_map` must
/// be assigned key `2`, never `1` — otherwise a back-reference to the very
/// first instance in an encapsulation would be indistinguishable from "a new
/// instance follows". `value_id_index` therefore starts at `1`, not `0`, so
/// that `++value_id_index` yields `2` on the first instance.
const INITIAL_VALUE_ID_INDEX: i32 = 1;

impl Default for EncapsState {
    fn default() -> Self {
        EncapsState {
            type_id_table: TypeIdTable::default(),
            unmarshaled_map: HashMap::new(),
            compact_id_cache: HashMap::new(),
            type_id_cache: HashMap::new(),
            value_id_index: INITIAL_VALUE_ID_INDEX,
            instance_stack: Vec::new(),
        }
    }
}

impl EncapsState {
    fn reset(&mut self) {
        self.type_id_table.clear();
        self.unmarshaled_map.clear();
        self.compact_id_cache.clear();
        self.type_id_cache.clear();
        self.value_id_index = INITIAL_VALUE_ID_INDEX;
        self.instance_stack.clear();
    }
}

/// One entry in the encapsulation stack (spec §3 "Encapsulation Frame").
#[derive(Debug)]
pub struct EncapsFrame {
    /// Absolute buffer position of the encaps size word.
    pub start: usize,
    /// Total encapsulation size in bytes, including the 6-byte header.
    pub sz: i32,
    /// Encoding version read from the header.
    pub encoding: EncodingVersion,
    pub(crate) state: Option<Box<EncapsState>>,
}

impl EncapsFrame {
    /// Absolute buffer position one past the end of this encapsulation.
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.sz as usize
    }
}

/// The encapsulation stack plus its single-slot state free-list (spec
/// §4.2 — "the free-list holds at most one popped frame").
#[derive(Debug, Default)]
pub struct EncapsStack {
    pub(crate) frames: Vec<EncapsFrame>,
    recycled: Option<Box<EncapsState>>,
}

impl EncapsStack {
    /// An empty stack, as seen before the first `start_encapsulation`.
    #[must_use]
    pub fn new() -> Self {
        EncapsStack::default()
    }

    /// Push a freshly-parsed encapsulation header frame.
    pub fn push(&mut self, start: usize, sz: i32, encoding: EncodingVersion) {
        self.frames.push(EncapsFrame {
            start,
            sz,
            encoding,
            state: None,
        });
    }

    /// Pop the innermost frame, handing ownership back to the caller (who
    /// is expected to [`EncapsStack::recycle`] it).
    pub fn pop(&mut self) -> Option<EncapsFrame> {
        self.frames.pop()
    }

    /// Recycle a popped frame's state into the free-list, resetting it
    /// first so the next `start_encapsulation` gets a clean slate without
    /// a fresh allocation.
    pub fn recycle(&mut self, frame: EncapsFrame) {
        if let Some(mut state) = frame.state {
            state.reset();
            self.recycled = Some(state);
        }
    }

    /// Read-only access to the innermost frame, if any.
    #[must_use]
    pub fn current(&self) -> Option<&EncapsFrame> {
        self.frames.last()
    }

    /// Mutable access to the innermost frame, if any.
    pub fn current_mut(&mut self) -> Option<&mut EncapsFrame> {
        self.frames.last_mut()
    }

    /// Lazily allocate (or reuse from the free-list) the slice state
    /// machine for the current frame.
    pub fn ensure_state(&mut self) -> &mut EncapsState {
        let recycled = &mut self.recycled;
        let frame = self
            .frames
            .last_mut()
            .expect("ensure_state called with no active encapsulation");
        if frame.state.is_none() {
            frame.state = Some(recycled.take().unwrap_or_default());
        }
        frame.state.as_mut().expect("just inserted")
    }

    /// Read-only access to the innermost frame's lazily-allocated state,
    /// if it's been allocated yet.
    #[must_use]
    pub fn state(&self) -> Option<&EncapsState> {
        self.frames.last().and_then(|f| f.state.as_deref())
    }

    /// Mutable access to the innermost frame's lazily-allocated state, if
    /// it's been allocated yet. Use [`EncapsStack::ensure_state`] to
    /// allocate it on demand instead.
    pub fn state_mut(&mut self) -> Option<&mut EncapsState> {
        self.frames.last_mut().and_then(|f| f.state.as_deref_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_dotted_form() {
        assert_eq!(ENCODING_1_1.to_string(), "1.1");
        assert_eq!(ENCODING_1_0.to_string(), "1.0");
    }

    #[test]
    fn unsupported_version_rejected() {
        let v = EncodingVersion { major: 2, minor: 0 };
        assert!(!v.is_supported());
    }

    #[test]
    fn state_reused_after_recycle() {
        let mut stack = EncapsStack::new();
        stack.push(0, 10, ENCODING_1_1);
        stack.ensure_state().value_id_index = 7;
        let frame = stack.pop().unwrap();
        stack.recycle(frame);

        stack.push(0, 10, ENCODING_1_1);
        assert_eq!(stack.ensure_state().value_id_index, INITIAL_VALUE_ID_INDEX);
    }
}
