//! Slice-header flags and the per-instance decode state (spec §3, §4.4).

use bitflags::bitflags;

use crate::class::ClassRef;

bitflags! {
    /// The slice header flag byte. `HAS_TYPE_ID_STRING`/`HAS_TYPE_ID_INDEX`
    /// act together as a 2-bit field: their OR, `0x03`, selects the compact
    /// encoding instead of either bit alone.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SliceFlags: u8 {
        /// Type-id encoded as a string on this slice.
        const HAS_TYPE_ID_STRING   = 0x01;
        /// Type-id encoded as an index into the type-id table.
        const HAS_TYPE_ID_INDEX    = 0x02;
        /// Tagged (optional) members follow the mandatory members.
        const HAS_OPTIONAL_MEMBERS = 0x04;
        /// An indirection table trails this slice.
        const HAS_INDIRECTION_TABLE = 0x08;
        /// An explicit slice size precedes the slice body.
        const HAS_SLICE_SIZE       = 0x10;
        /// This is the last (most-base) slice of the instance.
        const IS_LAST_SLICE        = 0x20;
    }
}

impl SliceFlags {
    /// The type-id is compact-encoded (both type-id bits set).
    pub const HAS_TYPE_ID_COMPACT: SliceFlags =
        SliceFlags::HAS_TYPE_ID_STRING.union(SliceFlags::HAS_TYPE_ID_INDEX);
}

/// Which polymorphic root is currently being decoded; governs whether
/// indirection tables are read eagerly (exceptions) or deferred (classes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    /// A class instance (`AnyClass`); supports cyclic back-references.
    Class,
    /// A user exception; no back-reference map, indirection tables read
    /// eagerly.
    Exception,
}

/// The header fields of the slice currently being read.
#[derive(Debug, Clone)]
pub struct CurrentSlice {
    /// Raw flag byte for this slice.
    pub flags: SliceFlags,
    /// Type-id, if string/index-encoded. Empty when compact-encoded or
    /// absent (non-most-derived slice with no type-id bits set).
    pub type_id: String,
    /// Compact id, or `-1` if this slice didn't use compact encoding.
    pub compact_id: i32,
    /// Slice body size in bytes (including the 4 size bytes themselves),
    /// or `0` if `HAS_SLICE_SIZE` wasn't set.
    pub slice_size: i32,
}

impl Default for CurrentSlice {
    fn default() -> Self {
        CurrentSlice {
            flags: SliceFlags::empty(),
            type_id: String::new(),
            compact_id: -1,
            slice_size: 0,
        }
    }
}

impl Default for SliceFlags {
    fn default() -> Self {
        SliceFlags::empty()
    }
}

/// Verbatim bytes of one unknown (unresolvable) slice, preserved so the
/// value can be re-encoded losslessly (spec §4.4 `skipSlice`).
#[derive(Debug, Clone)]
pub struct PreservedSlice {
    /// Type-id of the preserved slice (stripped of compact-id encoding;
    /// always present even if the wire used a compact id, resolved via the
    /// type-id table where possible).
    pub type_id: String,
    /// Compact id, or `-1` if none.
    pub compact_id: i32,
    /// Slice body bytes, verbatim, excluding the trailing tagged-end
    /// marker when `has_optional_members` is set.
    pub bytes: Vec<u8>,
    /// Whether this slice carried a tagged-member section.
    pub has_optional_members: bool,
    /// Whether this was the most-base slice in the chain.
    pub is_last_slice: bool,
}

/// One preserved slice, zipped with the class references its indirection
/// table (if any) resolved to.
#[derive(Debug, Clone)]
pub struct SlicedSliceData {
    /// The preserved slice's header/bytes.
    pub info: PreservedSlice,
    /// Resolved indirection-table entries for this slice, if it had one.
    pub instances: Option<Vec<ClassRef>>,
}

/// Everything needed to re-encode a value whose most-derived type wasn't
/// recognized locally (spec §6 "produced interfaces").
#[derive(Debug, Clone, Default)]
pub struct SlicedData {
    /// Preserved slices, most-derived first.
    pub slices: Vec<SlicedSliceData>,
}

/// Per-instance decode frame (spec §3 "Instance-Data Frame").
#[derive(Debug, Clone, Default)]
pub struct InstanceData {
    pub(crate) kind_is_exception: bool,
    pub(crate) skip_first_slice: bool,
    pub(crate) current: CurrentSlice,
    pub(crate) indirection_table: Option<Vec<ClassRef>>,
    pub(crate) pos_after_indirection_table: Option<usize>,
    pub(crate) indirection_table_list: Vec<Option<Vec<ClassRef>>>,
    pub(crate) deferred_indirection_table_list: Vec<usize>,
    pub(crate) slices: Vec<PreservedSlice>,
}

impl InstanceData {
    pub(crate) fn new(kind: SliceKind) -> Self {
        InstanceData {
            kind_is_exception: matches!(kind, SliceKind::Exception),
            ..InstanceData::default()
        }
    }

    pub(crate) fn kind(&self) -> SliceKind {
        if self.kind_is_exception {
            SliceKind::Exception
        } else {
            SliceKind::Class
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_flag_is_union_of_string_and_index() {
        let compact = SliceFlags::HAS_TYPE_ID_COMPACT;
        assert!(compact.contains(SliceFlags::HAS_TYPE_ID_STRING));
        assert!(compact.contains(SliceFlags::HAS_TYPE_ID_INDEX));
        assert_eq!(compact.bits(), 0x03);
    }

    #[test]
    fn default_instance_data_is_class_kind() {
        let inst = InstanceData::new(SliceKind::Class);
        assert_eq!(inst.kind(), SliceKind::Class);
        assert!(inst.slices.is_empty());
    }
}
