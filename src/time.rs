//! Time keeping
//!
//! Radio stacks usually timestamp frames with a free-running hardware counter that wraps around
//! every few minutes (a 32-bit microsecond counter wraps every ~71.6 minutes). `Instant` keeps
//! that width on purpose: comparing two instants is only meaningful through their (wrapping)
//! difference, never with `<`.

use core::fmt;

/// A reading of a free-running 32-bit tick counter
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Instant(pub u32);

impl Instant {
    /// Ticks elapsed from `earlier` to `self`, modulo 2^32
    pub fn elapsed_since(self, earlier: Instant) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Returns the instant `ticks` ticks after `self`, modulo 2^32
    pub fn wrapping_add(self, ticks: u32) -> Instant {
        Instant(self.0.wrapping_add(ticks))
    }
}

impl fmt::Debug for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instant({})", self.0)
    }
}
