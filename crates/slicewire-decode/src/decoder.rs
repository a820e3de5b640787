//! The `Decoder`: ties the buffer cursor, the encapsulation stack, and the
//! slice/class/exception state machines together into the operations a
//! generated (or hand-written) Slice type's `read` method calls (spec §4).

use std::cell::RefCell;
use std::rc::Rc;

use slicewire_core::{Buffer, WireError, WireResult};

use crate::class::{AnyClass, ClassRef, UnknownSlicedClass};
use crate::config::DecoderConfig;
use crate::encaps::{EncapsFrame, EncapsStack, EncodingVersion, ENCODING_1_0, ENCODING_1_1};
use crate::exception::UserException;
use crate::registry::{ClassResolver, CompactIdResolver, ExceptionFactory, Identity, ProxyFactory};
use crate::slice::{CurrentSlice, InstanceData, PreservedSlice, SliceFlags, SliceKind, SlicedData, SlicedSliceData};
use crate::tagged::{OptionalFormat, EXTENDED_TAG_MARKER, OPTIONAL_END_MARKER};

/// Reads one Slice-encoded byte stream.
///
/// Owns the buffer cursor and every piece of state an encapsulation, a
/// slice, or a class/exception instance needs while being decoded. A
/// `Decoder` is single-use in the sense spec §7 describes: once any method
/// returns `Err`, don't keep calling further read methods on it.
pub struct Decoder<'a> {
    buffer: Buffer<'a>,
    encaps: EncapsStack,
    class_graph_depth: u32,
    config: DecoderConfig,
    class_resolver: Box<dyn ClassResolver>,
    compact_id_resolver: Option<Box<dyn CompactIdResolver>>,
    exception_resolver: Option<Box<dyn ExceptionFactory>>,
}

impl<'a> Decoder<'a> {
    /// Wrap `data` with a fresh cursor and an empty encapsulation stack.
    #[must_use]
    pub fn new(data: &'a [u8], class_resolver: Box<dyn ClassResolver>) -> Self {
        Decoder {
            buffer: Buffer::new(data),
            encaps: EncapsStack::new(),
            class_graph_depth: 0,
            config: DecoderConfig::default(),
            class_resolver,
            compact_id_resolver: None,
            exception_resolver: None,
        }
    }

    /// Override the default decoder configuration.
    #[must_use]
    pub fn with_config(mut self, config: DecoderConfig) -> Self {
        self.config = config;
        self
    }

    /// Supply a compact-id resolver (spec §4.6's "negotiated compact ids").
    #[must_use]
    pub fn with_compact_id_resolver(mut self, resolver: Box<dyn CompactIdResolver>) -> Self {
        self.compact_id_resolver = Some(resolver);
        self
    }

    /// Supply the general user-exception factory registry (spec §4.7).
    #[must_use]
    pub fn with_exception_resolver(mut self, resolver: Box<dyn ExceptionFactory>) -> Self {
        self.exception_resolver = Some(resolver);
        self
    }

    /// Read-only access to the underlying buffer cursor.
    #[must_use]
    pub fn buffer(&self) -> &Buffer<'a> {
        &self.buffer
    }

    /// Mutable access to the underlying buffer, for scalar/string reads
    /// that don't go through the encapsulation/slice machinery.
    pub fn buffer_mut(&mut self) -> &mut Buffer<'a> {
        &mut self.buffer
    }

    /// Current class-graph nesting depth. `0` outside any instance decode.
    #[must_use]
    pub fn class_graph_depth(&self) -> u32 {
        self.class_graph_depth
    }

    // -- Encapsulations (spec §4.2) -----------------------------------

    /// Read and push an encapsulation header, returning its encoding.
    pub fn start_encapsulation(&mut self) -> WireResult<EncodingVersion> {
        let start = self.buffer.position();
        let sz = self.buffer.read_i32()?;
        if sz < 6 {
            return Err(WireError::encapsulation(format!(
                "encapsulation size {sz} smaller than the 6-byte header"
            )));
        }
        if (sz as i64 - 4) > self.buffer.remaining() as i64 {
            return Err(WireError::encapsulation(
                "encapsulation size exceeds remaining buffer",
            ));
        }
        let major = self.buffer.read_u8()?;
        let minor = self.buffer.read_u8()?;
        let encoding = EncodingVersion { major, minor };
        if !encoding.is_supported() {
            return Err(WireError::marshal(format!("unsupported encoding {encoding}")));
        }
        self.encaps.push(start, sz, encoding);
        Ok(encoding)
    }

    /// Pop the current encapsulation, verifying the cursor landed exactly
    /// at its end (after consuming any trailing tagged members for 1.1, or
    /// tolerating a single stray byte for 1.0).
    pub fn end_encapsulation(&mut self) -> WireResult<()> {
        let frame = self
            .encaps
            .pop()
            .ok_or_else(|| WireError::encapsulation("no active encapsulation to end"))?;
        let end = frame.end();

        if frame.encoding == ENCODING_1_1 {
            self.skip_trailing_tagged(end)?;
            if self.buffer.position() != end {
                return Err(WireError::encapsulation(format!(
                    "cursor at {} after trailing tagged members, expected {end}",
                    self.buffer.position()
                )));
            }
        } else {
            let pos = self.buffer.position();
            if pos == end {
                // exact match, nothing to do.
            } else if pos + 1 == end {
                self.buffer.read_u8()?;
            } else {
                return Err(WireError::encapsulation(format!(
                    "cursor at {pos} does not match encapsulation end {end} (encoding 1.0)"
                )));
            }
        }

        self.encaps.recycle(frame);
        Ok(())
    }

    /// Skip a whole encapsulation without decoding its contents.
    pub fn skip_encapsulation(&mut self) -> WireResult<EncodingVersion> {
        let start = self.buffer.position();
        let sz = self.buffer.read_i32()?;
        if sz < 6 {
            return Err(WireError::encapsulation(
                "encapsulation size smaller than the 6-byte header",
            ));
        }
        let major = self.buffer.read_u8()?;
        let minor = self.buffer.read_u8()?;
        let encoding = EncodingVersion { major, minor };
        self.buffer.set_position(start + sz as usize)?;
        Ok(encoding)
    }

    /// Read the header and hand back the encapsulation's raw payload bytes
    /// without interpreting them (e.g. to forward an opaque request body).
    pub fn read_encapsulation(&mut self) -> WireResult<(EncodingVersion, &'a [u8])> {
        let start = self.buffer.position();
        let sz = self.buffer.read_i32()?;
        if sz < 6 {
            return Err(WireError::encapsulation(
                "encapsulation size smaller than the 6-byte header",
            ));
        }
        let major = self.buffer.read_u8()?;
        let minor = self.buffer.read_u8()?;
        let encoding = EncodingVersion { major, minor };
        let end = start + sz as usize;
        let remaining_in_encaps = end.saturating_sub(self.buffer.position());
        let bytes = self.buffer.read_blob(remaining_in_encaps)?;
        Ok((encoding, bytes))
    }

    /// Read and validate a header known in advance to wrap no payload
    /// (e.g. a void operation's empty request body).
    pub fn skip_empty_encapsulation(&mut self) -> WireResult<EncodingVersion> {
        let start = self.buffer.position();
        let sz = self.buffer.read_i32()?;
        if sz < 6 {
            return Err(WireError::encapsulation(
                "encapsulation size smaller than the 6-byte header",
            ));
        }
        let major = self.buffer.read_u8()?;
        let minor = self.buffer.read_u8()?;
        let encoding = EncodingVersion { major, minor };
        if encoding == ENCODING_1_0 && sz != 6 {
            return Err(WireError::encapsulation(
                "encoding 1.0 empty encapsulation must have size 6",
            ));
        }
        self.buffer.set_position(start + sz as usize)?;
        Ok(encoding)
    }

    fn skip_trailing_tagged(&mut self, end: usize) -> WireResult<()> {
        while self.buffer.position() < end {
            let byte = self.buffer.read_u8()?;
            if byte == OPTIONAL_END_MARKER {
                break;
            }
            let format = OptionalFormat::from_bits(byte)
                .ok_or_else(|| WireError::marshal("invalid tagged-member format"))?;
            if u32::from(byte >> 3) == EXTENDED_TAG_MARKER {
                self.buffer.read_size()?;
            }
            self.skip_optional(format)?;
        }
        Ok(())
    }

    fn current_encoding(&self) -> Option<EncodingVersion> {
        self.encaps.current().map(|f: &EncapsFrame| f.encoding)
    }

    fn current_encaps_end(&self) -> WireResult<usize> {
        self.encaps
            .current()
            .map(EncapsFrame::end)
            .ok_or_else(|| WireError::marshal("no active encapsulation"))
    }

    // -- Tagged (optional) members (spec §4.3) -------------------------

    /// Scan forward for a tagged member with `expected_tag`, leaving the
    /// cursor positioned to read its payload when found. Returns `false`
    /// (with the cursor rewound to just before the first header it read
    /// past `expected_tag`, or left unmoved if the section/encaps ended)
    /// when the tag isn't present.
    pub fn read_optional(&mut self, expected_tag: u32, expected_format: OptionalFormat) -> WireResult<bool> {
        if self.current_encoding() == Some(ENCODING_1_0) {
            return Ok(false);
        }

        let gated_off = self
            .encaps
            .state()
            .and_then(|s| s.instance_stack.last())
            .map(|inst| !inst.current.flags.contains(SliceFlags::HAS_OPTIONAL_MEMBERS))
            .unwrap_or(false);
        if gated_off {
            return Ok(false);
        }

        let end = self.current_encaps_end()?;

        loop {
            if self.buffer.position() >= end {
                return Ok(false);
            }
            let header_start = self.buffer.position();
            let byte = self.buffer.read_u8()?;
            if byte == OPTIONAL_END_MARKER {
                self.buffer.set_position(header_start)?;
                return Ok(false);
            }
            let format = OptionalFormat::from_bits(byte)
                .ok_or_else(|| WireError::marshal("invalid tagged-member format"))?;
            let mut tag = u32::from(byte >> 3);
            if tag == EXTENDED_TAG_MARKER {
                tag = self.buffer.read_size()? as u32;
            }

            if tag > expected_tag {
                self.buffer.set_position(header_start)?;
                return Ok(false);
            }
            if tag < expected_tag {
                self.skip_optional(format)?;
                continue;
            }
            if format != expected_format {
                return Err(WireError::marshal(format!(
                    "tag {tag}: expected format {expected_format:?}, found {format:?}"
                )));
            }
            return Ok(true);
        }
    }

    fn skip_optional(&mut self, format: OptionalFormat) -> WireResult<()> {
        match format {
            OptionalFormat::F1 => {
                self.buffer.read_blob(1)?;
            }
            OptionalFormat::F2 => {
                self.buffer.read_blob(2)?;
            }
            OptionalFormat::F4 => {
                self.buffer.read_blob(4)?;
            }
            OptionalFormat::F8 => {
                self.buffer.read_blob(8)?;
            }
            OptionalFormat::Size => {
                self.buffer.read_size()?;
            }
            OptionalFormat::VSize => {
                let n = self.buffer.read_size()? as usize;
                self.buffer.read_blob(n)?;
            }
            OptionalFormat::FSize => {
                let n = self.buffer.read_i32()?;
                if n < 0 {
                    return Err(WireError::out_of_bounds(format!(
                        "negative FSize tagged member length {n}"
                    )));
                }
                self.buffer.read_blob(n as usize)?;
            }
            OptionalFormat::Class => {
                self.read_class(false)?;
            }
        }
        Ok(())
    }

    // -- Slice header state machine (spec §4.4) ------------------------

    fn push_instance(&mut self, kind: SliceKind) {
        self.encaps.ensure_state().instance_stack.push(InstanceData::new(kind));
    }

    fn pop_instance(&mut self) -> Option<InstanceData> {
        self.encaps.state_mut().and_then(|s| s.instance_stack.pop())
    }

    fn top_instance(&self) -> &InstanceData {
        self.encaps
            .state()
            .and_then(|s| s.instance_stack.last())
            .expect("start_slice/end_slice called with no active instance")
    }

    fn top_instance_mut(&mut self) -> &mut InstanceData {
        self.encaps
            .state_mut()
            .and_then(|s| s.instance_stack.last_mut())
            .expect("start_slice/end_slice called with no active instance")
    }

    fn intern_type_id(&mut self, type_id: String) {
        if let Some(state) = self.encaps.state_mut() {
            state.type_id_table.intern(type_id);
        }
    }

    fn read_type_id(&mut self, flags: SliceFlags) -> WireResult<String> {
        if flags.contains(SliceFlags::HAS_TYPE_ID_STRING) {
            let s = self.buffer.read_string()?;
            self.intern_type_id(s.clone());
            Ok(s)
        } else {
            let idx = self.buffer.read_size()?;
            let state = self
                .encaps
                .state()
                .ok_or_else(|| WireError::marshal("no active encapsulation"))?;
            state
                .type_id_table
                .get(idx)
                .map(str::to_string)
                .ok_or_else(|| WireError::marshal(format!("unknown type-id table index {idx}")))
        }
    }

    /// Read (or reuse) the header of the next slice of the instance
    /// currently being decoded.
    pub fn start_slice(&mut self) -> WireResult<()> {
        let kind = self.top_instance().kind();

        if self.top_instance().skip_first_slice {
            self.top_instance_mut().skip_first_slice = false;
            return Ok(());
        }

        let flags_byte = self.buffer.read_u8()?;
        let flags = SliceFlags::from_bits_truncate(flags_byte);

        let mut type_id = String::new();
        let mut compact_id = -1_i32;
        match kind {
            SliceKind::Class => {
                if flags.contains(SliceFlags::HAS_TYPE_ID_COMPACT) {
                    compact_id = self.buffer.read_size()?;
                } else if flags.intersects(SliceFlags::HAS_TYPE_ID_STRING | SliceFlags::HAS_TYPE_ID_INDEX) {
                    type_id = self.read_type_id(flags)?;
                }
            }
            SliceKind::Exception => {
                type_id = self.buffer.read_string()?;
                self.intern_type_id(type_id.clone());
            }
        }

        if flags.contains(SliceFlags::HAS_INDIRECTION_TABLE) && !flags.contains(SliceFlags::HAS_SLICE_SIZE) {
            return Err(WireError::marshal(
                "slice has an indirection table but no slice size to locate it",
            ));
        }

        let mut slice_size = 0_i32;
        if flags.contains(SliceFlags::HAS_SLICE_SIZE) {
            slice_size = self.buffer.read_i32()?;
            if slice_size < 4 {
                return Err(WireError::marshal("slice size smaller than its own header"));
            }
        }

        self.top_instance_mut().current = CurrentSlice {
            flags,
            type_id,
            compact_id,
            slice_size,
        };

        if kind == SliceKind::Exception && flags.contains(SliceFlags::HAS_INDIRECTION_TABLE) {
            self.read_indirection_table_eager()?;
        }

        Ok(())
    }

    fn read_indirection_table_eager(&mut self) -> WireResult<()> {
        let saved = self.buffer.position();
        let slice_size = self.top_instance().current.slice_size;
        let table_start = saved + slice_size as usize - 4;
        self.buffer.set_position(table_start)?;
        let table = self.read_indirection_table_contents(false)?;
        let pos_after = self.buffer.position();
        self.buffer.set_position(saved)?;

        let inst = self.top_instance_mut();
        inst.indirection_table = Some(table);
        inst.pos_after_indirection_table = Some(pos_after);
        Ok(())
    }

    /// Finish the slice currently being read: consume any trailing tagged
    /// members, then resolve (exceptions) or defer (classes) its
    /// indirection table.
    pub fn end_slice(&mut self) -> WireResult<()> {
        let kind = self.top_instance().kind();
        let flags = self.top_instance().current.flags;

        if flags.contains(SliceFlags::HAS_OPTIONAL_MEMBERS) {
            loop {
                let byte = self.buffer.read_u8()?;
                if byte == OPTIONAL_END_MARKER {
                    break;
                }
                let format = OptionalFormat::from_bits(byte)
                    .ok_or_else(|| WireError::marshal("invalid tagged-member format"))?;
                if u32::from(byte >> 3) == EXTENDED_TAG_MARKER {
                    self.buffer.read_size()?;
                }
                self.skip_optional(format)?;
            }
        }

        if flags.contains(SliceFlags::HAS_INDIRECTION_TABLE) {
            match kind {
                SliceKind::Exception => {
                    let pos_after = self.top_instance().pos_after_indirection_table;
                    if let Some(p) = pos_after {
                        self.buffer.set_position(p)?;
                    }
                    let inst = self.top_instance_mut();
                    inst.indirection_table = None;
                    inst.pos_after_indirection_table = None;
                }
                SliceKind::Class => {
                    let pos = self.buffer.position();
                    self.skip_indirection_table_bytes()?;
                    self.top_instance_mut().deferred_indirection_table_list.push(pos);
                    // `indirection_table` only covers the slice it was read
                    // for (the eager read in `read_instance`'s discovery
                    // loop, or none at all); clearing it here stops a stale
                    // table from a more-derived slice leaking into a base
                    // slice's own (unsupported) indirection table lookup.
                    self.top_instance_mut().indirection_table = None;
                }
            }
        } else if kind == SliceKind::Class {
            self.top_instance_mut().deferred_indirection_table_list.push(0);
        }

        Ok(())
    }

    /// Skip the slice currently being read without decoding it, preserving
    /// its bytes for later re-encoding.
    fn skip_slice(&mut self) -> WireResult<()> {
        let (flags, slice_size, compact_id, type_id) = {
            let cur = &self.top_instance().current;
            (cur.flags, cur.slice_size, cur.compact_id, cur.type_id.clone())
        };
        let kind = self.top_instance().kind();

        if !flags.contains(SliceFlags::HAS_SLICE_SIZE) {
            return match kind {
                SliceKind::Class => Err(WireError::NoClassFactory(compact_id)),
                SliceKind::Exception => Err(WireError::UnknownUserException(
                    type_id.trim_start_matches("::").to_string(),
                )),
            };
        }

        let body_len = (slice_size as usize).saturating_sub(4);
        let raw = self.buffer.read_blob(body_len)?;
        let bytes = if flags.contains(SliceFlags::HAS_OPTIONAL_MEMBERS) {
            raw[..raw.len().saturating_sub(1)].to_vec()
        } else {
            raw.to_vec()
        };

        self.top_instance_mut().slices.push(PreservedSlice {
            type_id,
            compact_id,
            bytes,
            has_optional_members: flags.contains(SliceFlags::HAS_OPTIONAL_MEMBERS),
            is_last_slice: flags.contains(SliceFlags::IS_LAST_SLICE),
        });

        match kind {
            SliceKind::Class => {
                if flags.contains(SliceFlags::HAS_INDIRECTION_TABLE) {
                    let pos = self.buffer.position();
                    self.skip_indirection_table_bytes()?;
                    self.top_instance_mut().deferred_indirection_table_list.push(pos);
                } else {
                    self.top_instance_mut().deferred_indirection_table_list.push(0);
                }
            }
            SliceKind::Exception => {
                if flags.contains(SliceFlags::HAS_INDIRECTION_TABLE) {
                    let table = self.read_indirection_table_contents(false)?;
                    self.top_instance_mut().indirection_table_list.push(Some(table));
                } else {
                    self.top_instance_mut().indirection_table_list.push(None);
                }
            }
        }
        Ok(())
    }

    // -- Indirection tables (spec §4.5) --------------------------------

    fn skip_indirection_table_bytes(&mut self) -> WireResult<()> {
        let size = self.buffer.read_and_check_seq_size(1)?;
        if size <= 0 {
            return Err(WireError::marshal("indirection table size must be positive"));
        }
        for _ in 0..size {
            let index = self.buffer.read_size()?;
            if index == 1 {
                self.skip_inline_instance()?;
            }
        }
        Ok(())
    }

    fn skip_inline_instance(&mut self) -> WireResult<()> {
        self.class_graph_depth += 1;
        if self.class_graph_depth > self.config.class_graph_depth_max {
            self.class_graph_depth -= 1;
            return Err(WireError::marshal("class graph depth exceeded while skipping"));
        }

        let result = (|| -> WireResult<()> {
            loop {
                let flags_byte = self.buffer.read_u8()?;
                let flags = SliceFlags::from_bits_truncate(flags_byte);

                if flags.contains(SliceFlags::HAS_TYPE_ID_COMPACT) {
                    self.buffer.read_size()?;
                } else if flags.contains(SliceFlags::HAS_TYPE_ID_STRING) {
                    let s = self.buffer.read_string()?;
                    self.intern_type_id(s);
                } else if flags.contains(SliceFlags::HAS_TYPE_ID_INDEX) {
                    self.buffer.read_size()?;
                }

                if !flags.contains(SliceFlags::HAS_SLICE_SIZE) {
                    return Err(WireError::NoClassFactory(-1));
                }
                let start = self.buffer.position();
                let slice_size = self.buffer.read_i32()?;
                if slice_size < 4 {
                    return Err(WireError::marshal("slice size smaller than its own header"));
                }
                let body_end = start + slice_size as usize - 4;
                self.buffer.set_position(body_end)?;

                if flags.contains(SliceFlags::HAS_INDIRECTION_TABLE) {
                    self.skip_indirection_table_bytes()?;
                }
                if flags.contains(SliceFlags::IS_LAST_SLICE) {
                    break;
                }
            }
            Ok(())
        })();

        self.class_graph_depth -= 1;
        result
    }

    fn read_indirection_table_contents(&mut self, preserve: bool) -> WireResult<Vec<ClassRef>> {
        let size = self.buffer.read_and_check_seq_size(1)?;
        if size <= 0 {
            return Err(WireError::marshal("indirection table size must be positive"));
        }
        let mut out = Vec::with_capacity(size as usize);
        for _ in 0..size {
            let index = self.buffer.read_size()?;
            if index <= 0 {
                return Err(WireError::marshal("indirection table entry must reference an instance"));
            }
            out.push(self.read_instance(index, preserve)?);
        }
        Ok(out)
    }

    fn replay_deferred_indirection_tables(&mut self, preserve: bool) -> WireResult<()> {
        let deferred = std::mem::take(&mut self.top_instance_mut().deferred_indirection_table_list);
        let saved = self.buffer.position();
        let mut resolved = Vec::with_capacity(deferred.len());
        for pos in deferred {
            if pos == 0 {
                resolved.push(None);
                continue;
            }
            self.buffer.set_position(pos)?;
            let table = self.read_indirection_table_contents(preserve)?;
            resolved.push(Some(table));
        }
        self.buffer.set_position(saved)?;
        self.top_instance_mut().indirection_table_list = resolved;
        Ok(())
    }

    fn finish_instance(&mut self, preserve: bool) -> Option<SlicedData> {
        if !preserve {
            let inst = self.top_instance_mut();
            inst.slices.clear();
            inst.indirection_table_list.clear();
            return None;
        }
        let inst = self.top_instance_mut();
        if inst.slices.is_empty() {
            return None;
        }
        let slices = std::mem::take(&mut inst.slices);
        let tables = std::mem::take(&mut inst.indirection_table_list);
        let zipped = slices
            .into_iter()
            .zip(tables)
            .map(|(info, instances)| SlicedSliceData { info, instances })
            .collect();
        Some(SlicedData { slices: zipped })
    }

    // -- Class graph decoder (spec §4.6, §9) ---------------------------

    fn resolve_compact_id_instance(&mut self, compact_id: i32) -> Option<Box<dyn AnyClass>> {
        use crate::encaps::CacheEntry;

        let cached = self
            .encaps
            .state()
            .and_then(|s| s.compact_id_cache.get(&compact_id).cloned());

        let type_id = match cached {
            Some(CacheEntry::Resolved(tid)) => Some(tid),
            Some(CacheEntry::Unresolvable) => None,
            None => {
                let resolved = self
                    .compact_id_resolver
                    .as_ref()
                    .and_then(|r| r.resolve(compact_id));
                let entry = match &resolved {
                    Some(tid) => CacheEntry::Resolved(tid.clone()),
                    None => CacheEntry::Unresolvable,
                };
                if let Some(state) = self.encaps.state_mut() {
                    state.compact_id_cache.insert(compact_id, entry);
                }
                resolved
            }
        };

        #[cfg(feature = "tracing")]
        if self.config.trace_slicing {
            tracing::trace!(compact_id, resolved = type_id.is_some(), "compact id lookup");
        }

        let type_id = type_id?;
        self.resolve_type_id_instance(&type_id)
    }

    fn resolve_type_id_instance(&mut self, type_id: &str) -> Option<Box<dyn AnyClass>> {
        let cached = self
            .encaps
            .state()
            .and_then(|s| s.type_id_cache.get(type_id).copied());
        if cached == Some(false) {
            return None;
        }

        let result = self.class_resolver.resolve(type_id);

        #[cfg(feature = "tracing")]
        if self.config.trace_slicing {
            tracing::trace!(type_id, found = result.is_some(), "class factory lookup");
        }

        if let Some(state) = self.encaps.state_mut() {
            state.type_id_cache.insert(type_id.to_string(), result.is_some());
        }
        result
    }

    /// Read a class reference field: `None` for a null reference, a
    /// lookup into the current slice's indirection table when one is
    /// active, or a full (possibly cyclic) instance decode otherwise.
    pub fn read_class(&mut self, preserve: bool) -> WireResult<Option<ClassRef>> {
        let index = self.buffer.read_size()?;
        if index < 0 {
            return Err(WireError::marshal("invalid object id"));
        }
        if index == 0 {
            return Ok(None);
        }

        let via_indirection = self
            .encaps
            .state()
            .and_then(|s| s.instance_stack.last())
            .map(|inst| inst.current.flags.contains(SliceFlags::HAS_INDIRECTION_TABLE))
            .unwrap_or(false);

        if via_indirection {
            let entry = {
                let inst = self.top_instance();
                let table = inst.indirection_table.as_ref().ok_or_else(|| {
                    WireError::marshal("indirection table requested before it was read")
                })?;
                table.get((index - 1) as usize).cloned()
            };
            return entry
                .map(Some)
                .ok_or_else(|| WireError::marshal("indirection table index out of bounds"));
        }

        self.read_instance(index, preserve).map(Some)
    }

    fn read_instance(&mut self, index: i32, preserve: bool) -> WireResult<ClassRef> {
        if index != 1 {
            let state = self
                .encaps
                .state()
                .ok_or_else(|| WireError::marshal("no active encapsulation"))?;
            return state
                .unmarshaled_map
                .get(&index)
                .cloned()
                .ok_or_else(|| WireError::marshal(format!("could not find index {index} in unmarshaledMap")));
        }

        if self.current_encoding() != Some(ENCODING_1_1) {
            return Err(WireError::marshal(
                "encoding 1.0 does not support class instance decoding",
            ));
        }

        self.push_instance(SliceKind::Class);
        self.start_slice()?;
        let most_derived_id = self.top_instance().current.type_id.clone();

        let produced: Box<dyn AnyClass> = loop {
            let cur = self.top_instance().current.clone();

            let resolved = if cur.compact_id >= 0 {
                self.resolve_compact_id_instance(cur.compact_id)
            } else if !cur.type_id.is_empty() {
                self.resolve_type_id_instance(&cur.type_id)
            } else {
                None
            };

            if let Some(v) = resolved {
                if cur.flags.contains(SliceFlags::HAS_INDIRECTION_TABLE) {
                    self.read_indirection_table_eager()?;
                }
                break v;
            }

            if !self.config.sliced_format {
                self.pop_instance();
                return Err(WireError::NoClassFactory(cur.compact_id));
            }

            let is_last = cur.flags.contains(SliceFlags::IS_LAST_SLICE);
            self.skip_slice()?;

            if is_last {
                if let Some(v) = self.resolve_type_id_instance("::Ice::Object") {
                    break v;
                }
                break Box::new(UnknownSlicedClass {
                    type_id: most_derived_id.clone(),
                    sliced_data: None,
                });
            }

            self.start_slice()?;
        };

        self.class_graph_depth += 1;
        if self.class_graph_depth > self.config.class_graph_depth_max {
            self.class_graph_depth -= 1;
            self.pop_instance();
            return Err(WireError::marshal("class graph depth exceeded"));
        }

        let new_index = {
            let state = self.encaps.ensure_state();
            state.value_id_index += 1;
            state.value_id_index
        };

        let class_ref: ClassRef = Rc::new(RefCell::new(produced));
        if let Some(state) = self.encaps.state_mut() {
            state.unmarshaled_map.insert(new_index, class_ref.clone());
        }

        // The most-derived slice's own indirection table, if it declared one,
        // was already read eagerly above (mirroring the exception path) so
        // it's reachable via `indirection_table` for the duration of this
        // slice's body read. `indirection_table_list` here only holds tables
        // from slices skipped during the discovery loop above (unrecognized
        // derived types); it isn't involved in resolving the recognized
        // slice's own table.
        self.replay_deferred_indirection_tables(preserve)?;
        self.top_instance_mut().skip_first_slice = true;

        class_ref.borrow_mut().read(self)?;

        if let Some(data) = self.finish_instance(preserve) {
            class_ref.borrow_mut().set_sliced_data(data);
        }

        self.class_graph_depth -= 1;
        self.pop_instance();
        Ok(class_ref)
    }

    // -- Exceptions (spec §4.7) -----------------------------------------

    /// Decode a user exception, trying `exception_factory` before the
    /// registry supplied via [`Decoder::with_exception_resolver`].
    pub fn throw_exception(
        &mut self,
        exception_factory: Option<&dyn ExceptionFactory>,
    ) -> WireResult<Box<dyn UserException>> {
        if self.current_encoding() != Some(ENCODING_1_1) {
            return Err(WireError::marshal(
                "encoding 1.0 does not support user exception decoding",
            ));
        }

        self.push_instance(SliceKind::Exception);
        self.start_slice()?;
        let most_derived_id = self.top_instance().current.type_id.clone();

        let result = loop {
            let cur_type_id = self.top_instance().current.type_id.clone();

            let mut resolved = exception_factory.and_then(|f| f.resolve(&cur_type_id));
            if resolved.is_none() {
                resolved = self
                    .exception_resolver
                    .as_ref()
                    .and_then(|r| r.resolve(&cur_type_id));
            }

            if let Some(mut ex) = resolved {
                self.top_instance_mut().skip_first_slice = true;
                ex.read(self)?;
                break ex;
            }

            let is_last = self.top_instance().current.flags.contains(SliceFlags::IS_LAST_SLICE);
            self.skip_slice()?;
            if is_last {
                self.pop_instance();
                return Err(WireError::UnknownUserException(
                    most_derived_id.trim_start_matches("::").to_string(),
                ));
            }
            self.start_slice()?;
        };

        self.pop_instance();
        Ok(result)
    }

    // -- Enums and proxies (spec §4.8) -----------------------------------

    /// Read an enumerator value. 1.1 always uses a compact size; 1.0 picks
    /// the narrowest fixed width that fits `max_value`.
    pub fn read_enum(&mut self, max_value: i32) -> WireResult<i32> {
        match self.current_encoding() {
            Some(ENCODING_1_0) => {
                if max_value < 127 {
                    Ok(i32::from(self.buffer.read_u8()?))
                } else if max_value < 32_767 {
                    Ok(i32::from(self.buffer.read_i16()?))
                } else {
                    self.buffer.read_i32()
                }
            }
            _ => self.buffer.read_size(),
        }
    }

    /// Read a proxy: an identity (name + category), or `None` for a null
    /// reference. `factory` builds the caller's concrete proxy type from
    /// the decoded identity; endpoint/reference data is out of scope here.
    pub fn read_proxy<P>(&mut self, factory: &dyn ProxyFactory<P>) -> WireResult<Option<P>> {
        let name = self.buffer.read_string()?;
        if name.is_empty() {
            return Ok(None);
        }
        let category = self.buffer.read_string()?;
        Ok(Some(factory.build(Identity { name, category })))
    }
}
