//! # Memory Layout

use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};

pub use kernel_memory_addresses::{PAGE_FRAME, PAGE_SHIFT};

/// Top of the user stack; the first byte above user space.
pub const USER_STACK_TOP: VirtualAddress = VirtualAddress::new(0x8000_0000);

/// Number of pages backing every user stack.
pub const STACK_PAGES: u32 = 12;

/// Lowest address of the user stack segment.
pub const USER_STACK_BASE: VirtualAddress =
    VirtualAddress::new(USER_STACK_TOP.as_u32() - STACK_PAGES * PAGE_SIZE);

/// Number of TLB slots of the R3000 MMU.
pub const NUM_TLB: usize = 64;

/// Width of a user pointer in bytes.
pub const USER_POINTER_SIZE: u32 = 4;

/// Alignment of the user stack pointer handed to a new program.
pub const STACK_ALIGN: u32 = 8;

/// Alignment of each argument string copied onto a new user stack.
pub const ARG_STRING_ALIGN: u32 = 4;

/// Page size in bytes as a `usize`, for buffer lengths.
pub const PAGE_BYTES: usize = PAGE_SIZE as usize;

const _: () = {
    assert!(USER_STACK_TOP.is_page_aligned());
    assert!(USER_STACK_BASE.as_u32() < USER_STACK_TOP.as_u32());
    assert!(STACK_ALIGN.is_power_of_two());
    assert!(ARG_STRING_ALIGN.is_power_of_two());
};
