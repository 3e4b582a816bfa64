//! # Page Bitmap
//!
//! A flat bit-vector over an externally owned byte buffer. Bit `i` lives in
//! byte `i / 8` at position `i % 8` (LSB first). The frame allocator uses one
//! bit per 4 KiB frame: `1` = unavailable, `0` = free.
//!
//! The bitmap owns no memory and enforces no allocation policy; callers
//! serialize access themselves.
//!
//! ## Bounds
//!
//! Indices at or beyond [`Bitmap::len`] are a caller bug. [`Bitmap::get`],
//! [`Bitmap::set`] and [`Bitmap::clear`] assert this in debug builds and
//! degrade to a no-op (or `false`) in release builds. The `try_*` variants
//! report the violation as [`BitmapError::OutOfRange`] instead.

use core::ops::Range;

/// Bit-vector view over a borrowed byte buffer.
pub struct Bitmap<'a> {
    bytes: &'a mut [u8],
    bit_count: usize,
}

impl<'a> Bitmap<'a> {
    /// Bind `bit_count` bits over `bytes` without copying.
    ///
    /// # Errors
    /// [`BitmapError::BufferTooSmall`] if `bytes` holds fewer than
    /// `bit_count` bits.
    pub const fn new(bytes: &'a mut [u8], bit_count: usize) -> Result<Self, BitmapError> {
        if bit_count.div_ceil(8) > bytes.len() {
            return Err(BitmapError::BufferTooSmall {
                bytes: bytes.len(),
                bits: bit_count,
            });
        }

        Ok(Self { bytes, bit_count })
    }

    /// Rebind to new storage. The previous buffer is released untouched.
    ///
    /// # Errors
    /// As for [`Bitmap::new`]; the current binding is kept on error.
    pub fn initialize(&mut self, bytes: &'a mut [u8], bit_count: usize) -> Result<(), BitmapError> {
        *self = Self::new(bytes, bit_count)?;
        Ok(())
    }

    /// Number of addressable bits.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bit_count
    }

    /// The raw backing bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &*self.bytes
    }

    #[inline]
    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.bit_count, "bitmap index {idx} out of range");
        self.try_get(idx).unwrap_or(false)
    }

    #[inline]
    pub fn set(&mut self, idx: usize) {
        debug_assert!(idx < self.bit_count, "bitmap index {idx} out of range");
        let _ = self.try_set(idx);
    }

    #[inline]
    pub fn clear(&mut self, idx: usize) {
        debug_assert!(idx < self.bit_count, "bitmap index {idx} out of range");
        let _ = self.try_clear(idx);
    }

    /// Checked [`get`](Self::get).
    ///
    /// # Errors
    /// [`BitmapError::OutOfRange`] if `idx >= len()`.
    #[inline]
    pub fn try_get(&self, idx: usize) -> Result<bool, BitmapError> {
        let (byte, mask) = self.locate(idx)?;
        Ok(self.bytes[byte] & mask != 0)
    }

    /// Checked [`set`](Self::set).
    ///
    /// # Errors
    /// [`BitmapError::OutOfRange`] if `idx >= len()`; nothing is written.
    #[inline]
    pub fn try_set(&mut self, idx: usize) -> Result<(), BitmapError> {
        let (byte, mask) = self.locate(idx)?;
        self.bytes[byte] |= mask;
        Ok(())
    }

    /// Checked [`clear`](Self::clear).
    ///
    /// # Errors
    /// [`BitmapError::OutOfRange`] if `idx >= len()`; nothing is written.
    #[inline]
    pub fn try_clear(&mut self, idx: usize) -> Result<(), BitmapError> {
        let (byte, mask) = self.locate(idx)?;
        self.bytes[byte] &= !mask;
        Ok(())
    }

    /// Set every bit in `range`.
    pub fn set_range(&mut self, range: Range<usize>) {
        for idx in range {
            self.set(idx);
        }
    }

    /// Clear every bit in `range`.
    pub fn clear_range(&mut self, range: Range<usize>) {
        for idx in range {
            self.clear(idx);
        }
    }

    /// Fill the whole backing buffer with ones (`true`) or zeros (`false`).
    pub fn fill(&mut self, value: bool) {
        self.bytes.fill(if value { 0xFF } else { 0x00 });
    }

    /// Whether every bit in `range` is set.
    #[must_use]
    pub fn all_set(&self, mut range: Range<usize>) -> bool {
        range.all(|idx| self.get(idx))
    }

    #[inline]
    const fn locate(&self, idx: usize) -> Result<(usize, u8), BitmapError> {
        if idx >= self.bit_count {
            return Err(BitmapError::OutOfRange {
                index: idx,
                len: self.bit_count,
            });
        }

        Ok((idx / 8, 1 << (idx % 8)))
    }
}

impl core::fmt::Debug for Bitmap<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bitmap")
            .field("bytes", &self.bytes.len())
            .field("bits", &self.bit_count)
            .finish()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BitmapError {
    #[error("bit index {index} is out of range for a bitmap of {len} bits")]
    OutOfRange { index: usize, len: usize },
    #[error("a buffer of {bytes} bytes cannot hold {bits} bits")]
    BufferTooSmall { bytes: usize, bits: usize },
}
