use core::ops::{Range, RangeFrom, RangeTo};
#[cfg(not(debug_assertions))]
use core::slice;

/// IMPLEMENTATION DETAIL
///
/// Bounds checked indexing in debug builds; unchecked indexing in release builds. Callers must
/// have validated the ranges beforehand (usually in a `parse` constructor).
pub trait UncheckedIndex {
    unsafe fn r(&self, r: Range<usize>) -> &Self;
    unsafe fn rt(&self, r: RangeTo<usize>) -> &Self;
    unsafe fn rf(&self, r: RangeFrom<usize>) -> &Self;
    unsafe fn rfm(&mut self, r: RangeFrom<usize>) -> &mut Self;
}

impl<T> UncheckedIndex for [T] {
    #[cfg(debug_assertions)]
    unsafe fn r(&self, r: Range<usize>) -> &[T] {
        &self[r]
    }

    #[cfg(not(debug_assertions))]
    unsafe fn r(&self, r: Range<usize>) -> &[T] {
        let o = r.start;
        let l = r.end - o;
        slice::from_raw_parts(self.as_ptr().add(o), l)
    }

    #[cfg(debug_assertions)]
    unsafe fn rt(&self, r: RangeTo<usize>) -> &[T] {
        &self[r]
    }

    #[cfg(not(debug_assertions))]
    unsafe fn rt(&self, r: RangeTo<usize>) -> &[T] {
        slice::from_raw_parts(self.as_ptr(), r.end)
    }

    #[cfg(debug_assertions)]
    unsafe fn rf(&self, r: RangeFrom<usize>) -> &[T] {
        &self[r]
    }

    #[cfg(not(debug_assertions))]
    unsafe fn rf(&self, r: RangeFrom<usize>) -> &[T] {
        let o = r.start;
        let l = self.len() - o;
        slice::from_raw_parts(self.as_ptr().add(o), l)
    }

    #[cfg(debug_assertions)]
    unsafe fn rfm(&mut self, r: RangeFrom<usize>) -> &mut [T] {
        &mut self[r]
    }

    #[cfg(not(debug_assertions))]
    unsafe fn rfm(&mut self, r: RangeFrom<usize>) -> &mut [T] {
        let o = r.start;
        let l = self.len() - o;
        slice::from_raw_parts_mut(self.as_mut_ptr().add(o), l)
    }
}
