//! Packet buffer allocation
//!
//! The reassembly code never frees memory explicitly. It asks an [`Alloc`] implementation for a
//! chunk big enough to hold a datagram and then either hands the chunk over to the upper layer or
//! drops it. Releasing memory back to the allocator must therefore happen in the chunk's
//! destructor.

use as_slice::AsMutSlice;

/// Packet buffer allocator
pub trait Alloc {
    /// Chunk of memory handed out by this allocator; must release itself on drop
    type Chunk: AsMutSlice<Element = u8>;

    /// Allocates a chunk that's at least `size` bytes long
    ///
    /// Returns `None` if there's no memory left
    fn alloc(&mut self, size: u16) -> Option<Self::Chunk>;
}

impl<'a, A> Alloc for &'a mut A
where
    A: Alloc + ?Sized,
{
    type Chunk = A::Chunk;

    fn alloc(&mut self, size: u16) -> Option<A::Chunk> {
        (**self).alloc(size)
    }
}

#[cfg(feature = "alloc")]
pub use self::heap::{Heap, HeapChunk};

#[cfg(feature = "alloc")]
mod heap {
    use alloc::vec::Vec;

    use as_slice::{AsMutSlice, AsSlice};

    use super::Alloc;

    /// Allocator backed by the global heap
    #[derive(Clone, Copy, Debug)]
    pub struct Heap {
        max_size: u16,
    }

    impl Heap {
        /// Creates an allocator that refuses requests larger than `max_size` bytes
        pub const fn new(max_size: u16) -> Self {
            Heap { max_size }
        }
    }

    impl Alloc for Heap {
        type Chunk = HeapChunk;

        fn alloc(&mut self, size: u16) -> Option<HeapChunk> {
            if size > self.max_size {
                return None;
            }

            let mut bytes = Vec::new();
            bytes.try_reserve_exact(usize::from(size)).ok()?;
            bytes.resize(usize::from(size), 0);
            Some(HeapChunk(bytes))
        }
    }

    /// Chunk handed out by [`Heap`]
    #[derive(Debug)]
    pub struct HeapChunk(Vec<u8>);

    impl AsSlice for HeapChunk {
        type Element = u8;

        fn as_slice(&self) -> &[u8] {
            &self.0
        }
    }

    impl AsMutSlice for HeapChunk {
        fn as_mut_slice(&mut self) -> &mut [u8] {
            &mut self.0
        }
    }

}
