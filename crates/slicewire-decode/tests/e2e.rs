//! End-to-end scenarios and round-trip properties from spec §8.

use std::rc::Rc;

use slicewire_decode::slice::SliceFlags;
use slicewire_decode::{
    AnyClass, ClassRef, ClassResolver, Decoder, OptionalFormat, ENCODING_1_0, ENCODING_1_1,
};
use slicewire_core::WireResult;

struct NoFactory;
impl ClassResolver for NoFactory {
    fn resolve(&self, _type_id: &str) -> Option<Box<dyn AnyClass>> {
        None
    }
}

fn encaps_1_1(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let sz = (body.len() + 6) as i32;
    out.extend_from_slice(&sz.to_le_bytes());
    out.push(1);
    out.push(1);
    out.extend_from_slice(body);
    out
}

/// Build one slice's on-wire bytes: flags byte, type-id (string form),
/// 4-byte slice size, then `body`. Mirrors the slice-size convention from
/// DESIGN.md: the size field covers itself plus everything after it up to
/// (but not including) the next slice or the end-of-instance marker.
fn build_slice(mut flags: SliceFlags, type_id: &str, body: &[u8]) -> Vec<u8> {
    flags |= SliceFlags::HAS_TYPE_ID_STRING | SliceFlags::HAS_SLICE_SIZE;
    let mut out = vec![flags.bits()];
    out.push(type_id.len() as u8);
    out.extend_from_slice(type_id.as_bytes());
    let slice_size = (body.len() + 4) as i32;
    out.extend_from_slice(&slice_size.to_le_bytes());
    out.extend_from_slice(body);
    out
}

// -- Scenario 1: empty encapsulation, encoding 1.1 -----------------------

#[test]
fn scenario_1_empty_encapsulation() {
    let data: Vec<u8> = vec![0x06, 0, 0, 0, 0x01, 0x01];
    let mut dec = Decoder::new(&data, Box::new(NoFactory));
    let encoding = dec.start_encapsulation().unwrap();
    assert_eq!(encoding, ENCODING_1_1);
    dec.end_encapsulation().unwrap();
    assert_eq!(dec.buffer().position(), 6);
}

// -- Scenario 2: tagged member absent -------------------------------------

#[test]
fn scenario_2_tagged_absent() {
    let data = encaps_1_1(&[0xFF]);
    let mut dec = Decoder::new(&data, Box::new(NoFactory));
    dec.start_encapsulation().unwrap();
    let pos_before = dec.buffer().position();
    assert!(!dec.read_optional(5, OptionalFormat::F4).unwrap());
    assert_eq!(dec.buffer().position(), pos_before);
    assert_eq!(dec.buffer_mut().read_u8().unwrap(), 0xFF);
}

// -- Scenario 3: tagged F4 present -----------------------------------------

#[test]
fn scenario_3_tagged_f4_present() {
    let header = (5u8 << 3) | (OptionalFormat::F4 as u8);
    let body = [header, 0xDE, 0xAD, 0xBE, 0xEF, 0xFF];
    let data = encaps_1_1(&body);
    let mut dec = Decoder::new(&data, Box::new(NoFactory));
    dec.start_encapsulation().unwrap();
    assert!(dec.read_optional(5, OptionalFormat::F4).unwrap());
    assert_eq!(dec.buffer_mut().read_i32().unwrap(), 0xEFBE_ADDEu32 as i32);
    assert!(!dec.read_optional(9, OptionalFormat::F4).unwrap());
}

// -- Scenario 4: unknown derived class is sliced, preserving its bytes ----

#[test]
fn scenario_4_unknown_derived_class_is_preserved_verbatim() {
    let derived_body = [7u8, 8, 9, 10];
    let slice_bytes = build_slice(
        SliceFlags::IS_LAST_SLICE,
        "::Mod::Derived",
        &derived_body,
    );

    let mut body = vec![1u8]; // "an instance follows"
    body.extend_from_slice(&slice_bytes);
    let data = encaps_1_1(&body);

    let mut dec = Decoder::new(&data, Box::new(NoFactory));
    dec.start_encapsulation().unwrap();
    let class_ref = dec.read_class(true).unwrap().expect("non-null");
    dec.end_encapsulation().unwrap();

    let borrowed = class_ref.borrow();
    assert_eq!(borrowed.type_id(), "::Mod::Derived");
    let any = borrowed.as_any();
    let unknown = any
        .downcast_ref::<slicewire_decode::UnknownSlicedClass>()
        .expect("falls back to UnknownSlicedClass");
    let sliced = unknown.sliced_data.as_ref().expect("preserved when preserve=true");
    assert_eq!(sliced.slices.len(), 1);
    assert_eq!(sliced.slices[0].info.type_id, "::Mod::Derived");
    assert_eq!(sliced.slices[0].info.bytes, derived_body);
    assert!(sliced.slices[0].info.is_last_slice);
}

// -- Scenario 5: cyclic class graph ---------------------------------------
//
// A references B, B references back to A. Tests that `read_class` resolves
// the back-reference to the same (partially-constructed-at-the-time)
// instance, that the graph is fully linked once both `read`s return, and
// that `class_graph_depth` is restored to 0 at the end.

#[derive(Debug, Default)]
struct NodeA {
    b: Option<ClassRef>,
}

impl AnyClass for NodeA {
    fn type_id(&self) -> &str {
        "::Mod::A"
    }
    fn read(&mut self, decoder: &mut Decoder) -> WireResult<()> {
        decoder.start_slice()?;
        self.b = decoder.read_class(false)?;
        decoder.end_slice()?;
        Ok(())
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug, Default)]
struct NodeB {
    a: Option<ClassRef>,
}

impl AnyClass for NodeB {
    fn type_id(&self) -> &str {
        "::Mod::B"
    }
    fn read(&mut self, decoder: &mut Decoder) -> WireResult<()> {
        decoder.start_slice()?;
        self.a = decoder.read_class(false)?;
        decoder.end_slice()?;
        Ok(())
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct AbResolver;
impl ClassResolver for AbResolver {
    fn resolve(&self, type_id: &str) -> Option<Box<dyn AnyClass>> {
        match type_id {
            "::Mod::A" => Some(Box::new(NodeA::default())),
            "::Mod::B" => Some(Box::new(NodeB::default())),
            _ => None,
        }
    }
}

#[test]
fn scenario_5_cyclic_graph_round_trips_and_depth_is_restored() {
    // B's body: a single read_class reference back to A, wire value 2
    // (A's assigned unmarshaled-map key, since the first instance in any
    // encapsulation is assigned key 2 — key 1 is reserved for "instance
    // follows inline").
    let b_body = vec![2u8];
    let b_slice = build_slice(SliceFlags::IS_LAST_SLICE, "::Mod::B", &b_body);

    // A's body: a read_class call that inlines B (wire value 1).
    let mut a_body = vec![1u8];
    a_body.extend_from_slice(&b_slice);
    let a_slice = build_slice(SliceFlags::IS_LAST_SLICE, "::Mod::A", &a_body);

    let mut root_body = vec![1u8]; // root A: instance follows inline
    root_body.extend_from_slice(&a_slice);
    let data = encaps_1_1(&root_body);

    let mut dec = Decoder::new(&data, Box::new(AbResolver));
    dec.start_encapsulation().unwrap();
    let a_ref = dec.read_class(false).unwrap().expect("non-null");
    dec.end_encapsulation().unwrap();

    assert_eq!(dec.class_graph_depth(), 0);

    let a_borrow = a_ref.borrow();
    let a_concrete = a_borrow.as_any().downcast_ref::<NodeA>().unwrap();
    let b_ref = a_concrete.b.clone().expect("a.b is set");

    let b_borrow = b_ref.borrow();
    let b_concrete = b_borrow.as_any().downcast_ref::<NodeB>().unwrap();
    let a_back = b_concrete.a.clone().expect("b.a is set");

    assert!(Rc::ptr_eq(&a_back, &a_ref));
}

// -- Scenario 6: hostile declared sequence size ----------------------------

#[test]
fn scenario_6_hostile_seq_size_fails_before_allocating() {
    let mut body = vec![0xFFu8];
    body.extend_from_slice(&0x7FFF_FFFF_i32.to_le_bytes());
    let data = encaps_1_1(&body);

    let mut dec = Decoder::new(&data, Box::new(NoFactory));
    dec.start_encapsulation().unwrap();
    let err = dec.buffer_mut().read_and_check_seq_size(1).unwrap_err();
    assert!(matches!(err, slicewire_core::WireError::OutOfBounds(_)));
}

// -- Testable property: type-id indexing ----------------------------------

#[derive(Debug, Default)]
struct Twice;

impl AnyClass for Twice {
    fn type_id(&self) -> &str {
        "::Mod::Twice"
    }
    fn read(&mut self, decoder: &mut Decoder) -> WireResult<()> {
        decoder.start_slice()?;
        decoder.end_slice()?;
        Ok(())
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct TwiceResolver;
impl ClassResolver for TwiceResolver {
    fn resolve(&self, type_id: &str) -> Option<Box<dyn AnyClass>> {
        if type_id == "::Mod::Twice" {
            Some(Box::new(Twice))
        } else {
            None
        }
    }
}

#[test]
fn type_id_table_second_reference_by_index_resolves_same_type() {
    let type_id = "::Mod::Twice";

    // First instance: type-id encoded as a string, interning it at index 1.
    let mut first_slice = vec![
        (SliceFlags::HAS_TYPE_ID_STRING | SliceFlags::HAS_SLICE_SIZE | SliceFlags::IS_LAST_SLICE)
            .bits(),
    ];
    first_slice.push(type_id.len() as u8);
    first_slice.extend_from_slice(type_id.as_bytes());
    first_slice.extend_from_slice(&4_i32.to_le_bytes()); // empty body

    // Second instance: type-id encoded as an index (one size byte: 1).
    let mut second_slice = vec![
        (SliceFlags::HAS_TYPE_ID_INDEX | SliceFlags::HAS_SLICE_SIZE | SliceFlags::IS_LAST_SLICE)
            .bits(),
    ];
    second_slice.push(1u8); // index into the type-id table
    second_slice.extend_from_slice(&4_i32.to_le_bytes()); // empty body

    let mut body = vec![1u8];
    body.extend_from_slice(&first_slice);
    body.push(1u8);
    body.extend_from_slice(&second_slice);
    let data = encaps_1_1(&body);

    let mut dec = Decoder::new(&data, Box::new(TwiceResolver));
    dec.start_encapsulation().unwrap();
    let first_ref = dec.read_class(false).unwrap().expect("non-null");
    let second_ref = dec.read_class(false).unwrap().expect("non-null");
    dec.end_encapsulation().unwrap();

    assert_eq!(first_ref.borrow().type_id(), "::Mod::Twice");
    assert_eq!(second_ref.borrow().type_id(), "::Mod::Twice");
}

// -- Legacy 1.0 encoding: class decoding is rejected, not implemented -----

#[test]
fn legacy_1_0_class_decoding_is_rejected() {
    let mut body = vec![1u8, 0, 0, 0]; // object-id 1 ("instance follows"), unread beyond that
    let sz = (body.len() + 6) as i32;
    let mut data = Vec::new();
    data.extend_from_slice(&sz.to_le_bytes());
    data.push(1);
    data.push(0);
    data.append(&mut body);

    let mut dec = Decoder::new(&data, Box::new(NoFactory));
    let encoding = dec.start_encapsulation().unwrap();
    assert_eq!(encoding, ENCODING_1_0);
    let err = dec.read_class(false).unwrap_err();
    assert!(matches!(err, slicewire_core::WireError::Marshal(_)));
}

// -- Recognized class with its own indirection table ----------------------
//
// Holder's single (most-derived, recognized) slice sets HAS_INDIRECTION_TABLE
// and reads one class-typed field through it. This is the path `read_class`'s
// `via_indirection` branch takes, which previously failed with
// `Marshal("indirection table requested before it was read")` for any
// normally-encoded (non-skipped) class whose slice used an indirection table,
// since nothing read that table before the slice's own body was read.

#[derive(Debug, Default)]
struct Leaf;

impl AnyClass for Leaf {
    fn type_id(&self) -> &str {
        "::Mod::Leaf"
    }
    fn read(&mut self, decoder: &mut Decoder) -> WireResult<()> {
        decoder.start_slice()?;
        decoder.end_slice()?;
        Ok(())
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug, Default)]
struct Holder {
    leaf: Option<ClassRef>,
}

impl AnyClass for Holder {
    fn type_id(&self) -> &str {
        "::Mod::Holder"
    }
    fn read(&mut self, decoder: &mut Decoder) -> WireResult<()> {
        decoder.start_slice()?;
        self.leaf = decoder.read_class(false)?;
        decoder.end_slice()?;
        Ok(())
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct HolderLeafResolver;
impl ClassResolver for HolderLeafResolver {
    fn resolve(&self, type_id: &str) -> Option<Box<dyn AnyClass>> {
        match type_id {
            "::Mod::Holder" => Some(Box::new(Holder::default())),
            "::Mod::Leaf" => Some(Box::new(Leaf)),
            _ => None,
        }
    }
}

#[test]
fn recognized_class_resolves_its_own_indirection_table() {
    // The indirection table itself: one entry, wire value 1 ("instance
    // follows inline"), then the inline `Leaf` instance's own slice.
    let leaf_slice = build_slice(SliceFlags::IS_LAST_SLICE, "::Mod::Leaf", &[]);
    let mut table_bytes = vec![1u8, 1u8];
    table_bytes.extend_from_slice(&leaf_slice);

    // Holder's slice body is just the field: a `read_size` value of 1,
    // meaning "index 1 into the indirection table" (`via_indirection`).
    let holder_body = vec![1u8];
    let mut holder_slice = build_slice(
        SliceFlags::HAS_INDIRECTION_TABLE | SliceFlags::IS_LAST_SLICE,
        "::Mod::Holder",
        &holder_body,
    );
    holder_slice.extend_from_slice(&table_bytes);

    let mut body = vec![1u8]; // root: instance follows inline
    body.extend_from_slice(&holder_slice);
    let data = encaps_1_1(&body);

    let mut dec = Decoder::new(&data, Box::new(HolderLeafResolver));
    dec.start_encapsulation().unwrap();
    let holder_ref = dec.read_class(false).unwrap().expect("non-null");
    dec.end_encapsulation().unwrap();

    let holder_borrow = holder_ref.borrow();
    let holder = holder_borrow.as_any().downcast_ref::<Holder>().unwrap();
    let leaf_ref = holder.leaf.clone().expect("leaf resolved via indirection table");
    assert_eq!(leaf_ref.borrow().type_id(), "::Mod::Leaf");
}

// -- Testable property: tag scanning monotonicity --------------------------

#[test]
fn tag_scanning_is_monotonic_and_non_consuming_on_miss() {
    // Tags 2 and 7 present; reader asks for 1, 2 (hit), 5 (miss, should not
    // consume tag 7's header), 7 (hit).
    let h2 = (2u8 << 3) | (OptionalFormat::F1 as u8);
    let h7 = (7u8 << 3) | (OptionalFormat::F1 as u8);
    let body = [h2, 0xAA, h7, 0xBB, 0xFF];
    let data = encaps_1_1(&body);
    let mut dec = Decoder::new(&data, Box::new(NoFactory));
    dec.start_encapsulation().unwrap();

    assert!(!dec.read_optional(1, OptionalFormat::F1).unwrap());
    assert!(dec.read_optional(2, OptionalFormat::F1).unwrap());
    assert_eq!(dec.buffer_mut().read_u8().unwrap(), 0xAA);

    let pos_before_miss = dec.buffer().position();
    assert!(!dec.read_optional(5, OptionalFormat::F1).unwrap());
    assert_eq!(dec.buffer().position(), pos_before_miss);

    assert!(dec.read_optional(7, OptionalFormat::F1).unwrap());
    assert_eq!(dec.buffer_mut().read_u8().unwrap(), 0xBB);
}
