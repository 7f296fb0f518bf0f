//! Owned datagram buffers

use core::fmt;

use as_slice::{AsMutSlice, AsSlice};
use cast::{u16, usize};

use crate::traits::UncheckedIndex;

/// Buffer that owns a chunk of memory and provides a slice view into (a prefix of) it
///
/// Packet buffer allocators usually hand out chunks that are larger than what was asked for (e.g.
/// fixed size blocks of 1280 bytes). `Buffer` remembers the requested length so that
/// `as_slice` covers exactly the datagram and nothing else.
///
/// `Buffer` is the owner of the memory: dropping it returns the chunk to wherever it came from
/// (provided the `CHUNK` type does that on drop, as `alloc::vec::Vec` or a memory pool box do).
/// The reassembly code relies on this; every path that abandons a datagram simply drops its
/// `Buffer`.
pub struct Buffer<CHUNK>
where
    CHUNK: AsSlice<Element = u8>,
{
    chunk: CHUNK,
    len: u16,
}

impl<C> Buffer<C>
where
    C: AsSlice<Element = u8>,
{
    /// Creates a new buffer that spans the whole `chunk`
    pub fn new(chunk: C) -> Self {
        let len = u16(chunk.as_slice().len()).unwrap_or(u16::MAX);
        Buffer { chunk, len }
    }

    /// Creates a new buffer that spans the first `len` bytes of `chunk`
    ///
    /// Returns the chunk back if it's smaller than `len`
    pub fn with_len(chunk: C, len: u16) -> Result<Self, C> {
        if chunk.as_slice().len() < usize(len) {
            Err(chunk)
        } else {
            Ok(Buffer { chunk, len })
        }
    }

    /// Length of the slice view
    pub fn len(&self) -> u16 {
        self.len
    }

    /// Is the slice view empty?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Truncates the buffer to the specified length
    pub fn truncate(&mut self, len: u16) {
        Resize::truncate(self, len)
    }

    /// Frees the chunk of memory
    pub fn free(self) -> C {
        self.chunk
    }
}

impl<C> AsSlice for Buffer<C>
where
    C: AsSlice<Element = u8>,
{
    type Element = u8;

    fn as_slice(&self) -> &[u8] {
        &self.chunk.as_slice()[..usize(self.len)]
    }
}

impl<C> AsMutSlice for Buffer<C>
where
    C: AsMutSlice<Element = u8>,
{
    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.chunk.as_mut_slice()[..usize(self.len)]
    }
}

impl<C> Resize for Buffer<C>
where
    C: AsSlice<Element = u8>,
{
    fn truncate(&mut self, len: u16) {
        if self.len > len {
            self.len = len;
        }
    }
}

/// A buffer whose length can be shrunk in place
pub trait Resize {
    /// Truncates the buffer to the specified length
    ///
    /// Does nothing if `len` is greater than the current length
    fn truncate(&mut self, len: u16);
}

impl<'a> Resize for &'a [u8] {
    fn truncate(&mut self, len: u16) {
        let len = usize(len);
        if self.len() > len {
            *self = unsafe { self.rt(..len) };
        }
    }
}

impl<'a> Resize for &'a mut [u8] {
    fn truncate(&mut self, len: u16) {
        let len = usize(len);
        if self.len() > len {
            // NOTE(take) moves the borrow out so the shortened slice keeps lifetime `'a`
            let whole = core::mem::take(self);
            *self = &mut whole[..len];
        }
    }
}

impl<C> fmt::Debug for Buffer<C>
where
    C: AsSlice<Element = u8>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer").field("len", &self.len).finish()
    }
}
