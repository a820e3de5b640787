//! Little-endian primitive reads over a bounded byte region.

use crate::error::{WireError, WireResult};

/// A fixed-width scalar that can be read off the wire in little-endian form.
///
/// Sealed on purpose: the wire format only ever carries the widths below,
/// and `read_primitive_array` relies on `WIDTH` matching `from_le_bytes`'s
/// array length exactly.
pub trait WireScalar: Copy + sealed::Sealed {
    /// Width of the scalar on the wire, in bytes.
    const WIDTH: usize;

    /// Decode one value from exactly `WIDTH` little-endian bytes.
    fn from_le(bytes: &[u8]) -> Self;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for i16 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

macro_rules! impl_wire_scalar {
    ($ty:ty, $width:expr) => {
        impl WireScalar for $ty {
            const WIDTH: usize = $width;
            fn from_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $width];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }
        }
    };
}

impl_wire_scalar!(u8, 1);
impl_wire_scalar!(i16, 2);
impl_wire_scalar!(i32, 4);
impl_wire_scalar!(i64, 8);
impl_wire_scalar!(f32, 4);
impl_wire_scalar!(f64, 8);

/// A contiguous, little-endian byte region with a mutable read cursor.
///
/// `Buffer` exclusively owns the cursor position; it never allocates on
/// behalf of the caller except for its own reusable UTF-8 scratch buffer,
/// which grows monotonically to the largest string seen (spec §5).
#[derive(Debug)]
pub struct Buffer<'a> {
    data: &'a [u8],
    pos: usize,
    limit: usize,
    /// Cumulative `size * min_element_size` across every successful
    /// `read_and_check_seq_size` call on this buffer — the aggregate
    /// allocation guard from spec §4.1.
    min_total_seq_size: u64,
    scratch: Vec<u8>,
}

impl<'a> Buffer<'a> {
    /// Wrap `data` with the cursor at position 0 and the limit at `data.len()`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Buffer {
            data,
            pos: 0,
            limit: data.len(),
            min_total_seq_size: 0,
            scratch: Vec::new(),
        }
    }

    /// Current cursor position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Upper bound the cursor may advance to.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes left to read before hitting the limit.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.pos)
    }

    /// Move the cursor to an absolute position, without bounds checking
    /// beyond the buffer's total length. Used by slice-size jumps and
    /// indirection-table seeks, which must be able to rewind.
    pub fn set_position(&mut self, pos: usize) -> WireResult<()> {
        if pos > self.data.len() {
            return Err(WireError::out_of_bounds(format!(
                "set_position({pos}) beyond buffer length {}",
                self.data.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    /// Rewind the cursor by `n` bytes. Used by `readOptional`'s lookahead.
    pub fn rewind(&mut self, n: usize) -> WireResult<()> {
        let pos = self.pos.checked_sub(n).ok_or_else(|| {
            WireError::out_of_bounds(format!("rewind({n}) before buffer start"))
        })?;
        self.pos = pos;
        Ok(())
    }

    /// Raw bytes of the wrapped region (for CRC/slicing-preservation callers
    /// that need to copy verbatim wire bytes).
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Read `n` raw bytes and advance the cursor.
    pub fn read_blob(&mut self, n: usize) -> WireResult<&'a [u8]> {
        if self.pos + n > self.limit {
            return Err(WireError::out_of_bounds(format!(
                "read_blob({n}) at position {} exceeds limit {}",
                self.pos, self.limit
            )));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }

    /// Read one scalar of type `T`.
    pub fn read<T: WireScalar>(&mut self) -> WireResult<T> {
        let bytes = self.read_blob(T::WIDTH)?;
        Ok(T::from_le(bytes))
    }

    /// Read `u8`.
    pub fn read_u8(&mut self) -> WireResult<u8> {
        self.read::<u8>()
    }

    /// Read `i16`.
    pub fn read_i16(&mut self) -> WireResult<i16> {
        self.read::<i16>()
    }

    /// Read `i32`.
    pub fn read_i32(&mut self) -> WireResult<i32> {
        self.read::<i32>()
    }

    /// Read `i64`.
    pub fn read_i64(&mut self) -> WireResult<i64> {
        self.read::<i64>()
    }

    /// Read `f32`.
    pub fn read_f32(&mut self) -> WireResult<f32> {
        self.read::<f32>()
    }

    /// Read `f64`.
    pub fn read_f64(&mut self) -> WireResult<f64> {
        self.read::<f64>()
    }

    /// Read a bool as a single byte, `0` or `1`. Any other byte value is
    /// still accepted as truthy (non-zero), matching the reference
    /// decoder's leniency here.
    pub fn read_bool(&mut self) -> WireResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read `n` scalars of type `T` in bulk.
    pub fn read_primitive_array<T: WireScalar>(&mut self, n: usize) -> WireResult<Vec<T>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.read::<T>()?);
        }
        Ok(out)
    }

    /// Compact size integer: one byte; if that byte is `255`, a trailing
    /// `i32` follows and must be non-negative.
    pub fn read_size(&mut self) -> WireResult<i32> {
        let b = self.read_u8()?;
        if b == 255 {
            let v = self.read_i32()?;
            if v < 0 {
                return Err(WireError::out_of_bounds(format!(
                    "negative size {v} in extended size encoding"
                )));
            }
            Ok(v)
        } else {
            Ok(i32::from(b))
        }
    }

    /// Read a size and enforce the hostile-input sequence-size guard
    /// (spec §4.1): the sequence must fit in the remaining buffer at
    /// `min_element_size` bytes per element, *and* the running total of
    /// `size * min_element_size` across the whole stream must not exceed
    /// the buffer's limit. Returns the element count.
    pub fn read_and_check_seq_size(&mut self, min_element_size: usize) -> WireResult<i32> {
        let size = self.read_size()?;
        let needed = (size as u64).saturating_mul(min_element_size as u64);

        if (self.pos as u64) + needed > self.limit as u64 {
            return Err(WireError::out_of_bounds(format!(
                "sequence of {size} elements at {min_element_size} bytes each exceeds remaining buffer"
            )));
        }

        let total = self.min_total_seq_size.saturating_add(needed);
        if total > self.limit as u64 {
            return Err(WireError::out_of_bounds(format!(
                "cumulative minimum sequence size {total} exceeds buffer limit {}",
                self.limit
            )));
        }
        self.min_total_seq_size = total;

        Ok(size)
    }

    /// Read a length-prefixed UTF-8 string, reusing the buffer's scratch
    /// vector to avoid a fresh allocation per call.
    pub fn read_string(&mut self) -> WireResult<String> {
        let len = self.read_and_check_seq_size(1)? as usize;
        let bytes = self.read_blob(len)?;
        self.scratch.clear();
        self.scratch.extend_from_slice(bytes);
        String::from_utf8(core::mem::take(&mut self.scratch))
            .map_err(|e| WireError::marshal(format!("invalid UTF-8 string: {e}")))
    }
}
