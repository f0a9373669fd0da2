//! # Virtual Memory Support
//!
//! Per-process address spaces, software page tables and the TLB refill path
//! of a MIPS R3000 style machine.
//!
//! ## What you get
//! - A [`Vm`] context that bundles the frame allocator, physical memory, the
//!   TLB and the processor's interrupt flag. Everything else borrows it.
//! - An [`AddressSpace`] with two loader-defined regions (code, data) and a
//!   fixed-size stack, each backed by a [`PageTable`] whose storage itself
//!   lives in allocator-owned frames.
//! - A software model of the [`Tlb`] with [`EntryHi`]/[`EntryLo`] words.
//! - The fault handler [`handle_fault`] (and its raw entry point [`vm_fault`]).
//!
//! ## Translation
//!
//! The MIPS MMU has no page-table walker. A user access either hits a TLB
//! entry or traps:
//!
//! ```text
//!  user access ──► TLB hit? ──yes──► dirty or read? ──yes──► physical address
//!                     │no                   │no
//!                     ▼                     ▼
//!             VM_FAULT_READ/WRITE    VM_FAULT_READONLY
//!                     │                     │
//!                     ▼                     ▼
//!         segment lookup + PTE read   process is killed
//!                     │
//!                     ▼
//!        install into invalid or random TLB slot
//! ```
//!
//! Every page is backed when the address space is prepared, so the fault
//! path never allocates.
//!
//! ## Virtual Address Layout
//!
//! ```text
//! | 31‒12 | 11‒0   |
//! |  VPN  | Offset |
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod address_space;
mod error;
pub mod fault;
pub mod page_table;
mod segment;
pub mod tlb;
mod vm;

pub use crate::address_space::{Access, AddressSpace};
pub use crate::error::VmError;
pub use crate::fault::{FaultKind, handle_fault, vm_fault};
pub use crate::page_table::{PageTable, PageTableEntry};
pub use crate::segment::{Segment, SegmentKind};
pub use crate::tlb::{EntryHi, EntryLo, Tlb, TlbException};
pub use crate::vm::Vm;

/// Re-export constants as info module.
pub use kernel_info::memory as info;
