//! # Frame Cursor
//!
//! Sequential big-endian reader over a received frame buffer. Every decoder in
//! this crate reads through a [`FrameCursor`]; nothing indexes raw bytes.

use crate::error::Underrun;

/// Read position over an immutable byte buffer
#[derive(Debug, Clone)]
pub struct FrameCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Return the next `n` bytes and advance past them
    ///
    /// # Errors
    ///
    /// Returns [`Underrun`] without advancing if fewer than `n` bytes remain.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], Underrun> {
        if n > self.remaining() {
            return Err(Underrun {
                offset: self.pos,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Advance past `n` bytes
    pub fn skip(&mut self, n: usize) -> Result<(), Underrun> {
        self.take(n).map(|_| ())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], Underrun> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, Underrun> {
        self.array::<1>().map(u8::from_be_bytes)
    }

    pub fn read_u16(&mut self) -> Result<u16, Underrun> {
        self.array().map(u16::from_be_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, Underrun> {
        self.array().map(u32::from_be_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64, Underrun> {
        self.array().map(u64::from_be_bytes)
    }

    pub fn read_i8(&mut self) -> Result<i8, Underrun> {
        self.array::<1>().map(i8::from_be_bytes)
    }

    pub fn read_i16(&mut self) -> Result<i16, Underrun> {
        self.array().map(i16::from_be_bytes)
    }

    /// Signed read; the full 32-bit pattern is taken as two's complement
    pub fn read_i32(&mut self) -> Result<i32, Underrun> {
        self.array().map(i32::from_be_bytes)
    }

    pub fn read_i64(&mut self) -> Result<i64, Underrun> {
        self.array().map(i64::from_be_bytes)
    }
}
