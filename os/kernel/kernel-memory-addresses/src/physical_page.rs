use crate::{PAGE_FRAME, PAGE_SHIFT, PhysicalAddress};
use core::fmt;

/// Physical frame base.
///
/// The page-aligned base of a 4 KiB frame of RAM. Its [`number`](Self::number)
/// indexes the frame table and fills the PFN field of a TLB entry.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(u32);

impl PhysicalPage {
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: PhysicalAddress) -> Self {
        Self(addr.as_u32() & PAGE_FRAME)
    }

    /// Frame with the given physical frame number.
    #[inline]
    #[must_use]
    pub const fn from_number(pfn: u32) -> Self {
        Self(pfn << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0)
    }

    /// Physical frame number.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0 >> PAGE_SHIFT
    }

    /// The frame `n` frames above this one.
    #[inline]
    #[must_use]
    pub const fn add_frames(self, n: u32) -> Self {
        Self::from_number(self.number() + n)
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage(0x{:08X})", self.0)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}
