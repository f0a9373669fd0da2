//! Early-boot memory: steal frames off the free region before the frame
//! table exists.

use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};

/// Bump allocator over the single free region `[first, last)`.
///
/// Every successful [`steal`](Self::steal) moves `first` up; nothing can be
/// given back. Once the frame table is built, whatever is left between
/// `first` and `last` is handed over to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StealMem {
    first: PhysicalAddress,
    last: PhysicalAddress,
}

impl StealMem {
    /// A free region from `first` (rounded up to a page) to `last` (rounded down).
    #[must_use]
    pub const fn new(first: PhysicalAddress, last: PhysicalAddress) -> Self {
        let first = kernel_memory_addresses::page_round_up(first.as_u32());
        let last = last.align_down();
        let first = if first > last.as_u32() {
            last
        } else {
            PhysicalAddress::new(first)
        };
        Self { first, last }
    }

    /// Takes `npages` frames from the bottom of the region.
    pub const fn steal(&mut self, npages: u32) -> Option<PhysicalAddress> {
        let Some(bytes) = npages.checked_mul(PAGE_SIZE) else {
            return None;
        };
        if bytes > self.last.as_u32() - self.first.as_u32() {
            return None;
        }
        let pa = self.first;
        self.first = PhysicalAddress::new(self.first.as_u32() + bytes);
        Some(pa)
    }

    /// The region still available, as `(first, last)`.
    #[must_use]
    pub const fn remaining(&self) -> (PhysicalAddress, PhysicalAddress) {
        (self.first, self.last)
    }

    /// Number of whole frames still available.
    #[must_use]
    pub const fn frames_left(&self) -> u32 {
        (self.last.as_u32() - self.first.as_u32()) / PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steal_moves_the_bottom_up() {
        let mut s = StealMem::new(PhysicalAddress::new(0x1000), PhysicalAddress::new(0x5000));
        assert_eq!(s.steal(1), Some(PhysicalAddress::new(0x1000)));
        assert_eq!(s.steal(2), Some(PhysicalAddress::new(0x2000)));
        assert_eq!(s.remaining().0, PhysicalAddress::new(0x4000));
        assert_eq!(s.frames_left(), 1);
    }

    #[test]
    fn steal_fails_without_consuming() {
        let mut s = StealMem::new(PhysicalAddress::new(0x0), PhysicalAddress::new(0x2000));
        assert_eq!(s.steal(3), None);
        assert_eq!(s.frames_left(), 2);
    }

    #[test]
    fn unaligned_bounds_are_trimmed() {
        let s = StealMem::new(PhysicalAddress::new(0x0800), PhysicalAddress::new(0x3800));
        assert_eq!(
            s.remaining(),
            (PhysicalAddress::new(0x1000), PhysicalAddress::new(0x3000))
        );
    }
}
