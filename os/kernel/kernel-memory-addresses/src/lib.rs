//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the 32-bit addresses and page bases of the
//! simulated MIPS machine.
//!
//! ## Overview
//!
//! The machine has a single page size of 4 KiB and a 32-bit address space
//! on both sides of the TLB. The types in this crate only carry the *kind* of
//! an address at the type level so that virtual and physical values cannot be
//! mixed by accident:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | A user or kernel virtual address (translated by the TLB). |
//! | [`PhysicalAddress`] | A byte offset into physical RAM. |
//! | [`VirtualPage`] | A page-aligned virtual base; its number is the TLB's VPN. |
//! | [`PhysicalPage`] | A page-aligned physical base; its number is the frame number. |
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0040_1234);
//! let page = va.page();
//! assert_eq!(page.base().as_u32(), 0x0040_1000);
//! assert_eq!(va.offset(), 0x234);
//! assert_eq!(page.number(), 0x401);
//!
//! let pa = PhysicalAddress::new(0x0003_2000);
//! assert_eq!(pa.frame().number(), 0x32);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`, and
//!   `Hash`, making them suitable as map keys.
//! - All alignment and offset calculations are `const fn`.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use page_size::{PAGE_FRAME, PAGE_SHIFT, PAGE_SIZE, page_round_up, pages_spanning};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;
