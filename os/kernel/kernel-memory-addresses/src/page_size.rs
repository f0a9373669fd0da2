use crate::VirtualAddress;

/// Page size in bytes. The MIPS TLB maps 4 KiB pages only.
pub const PAGE_SIZE: u32 = 4096;

/// log2([`PAGE_SIZE`]), i.e. the number of low bits used for the in-page offset.
pub const PAGE_SHIFT: u32 = 12;

/// Mask selecting the page base of an address.
pub const PAGE_FRAME: u32 = !(PAGE_SIZE - 1);

/// Rounds `bytes` up to the next multiple of [`PAGE_SIZE`].
///
/// Saturates at the last page boundary representable in 32 bits.
#[inline]
#[must_use]
pub const fn page_round_up(bytes: u32) -> u32 {
    match bytes.checked_add(PAGE_SIZE - 1) {
        Some(v) => v & PAGE_FRAME,
        None => PAGE_FRAME,
    }
}

/// Number of pages touched by the byte range `[start, start + len)`.
#[inline]
#[must_use]
pub const fn pages_spanning(start: VirtualAddress, len: u32) -> u32 {
    if len == 0 {
        return 0;
    }
    page_round_up(len.saturating_add(start.offset())) >> PAGE_SHIFT
}
