//! # Kernel Configuration and ABI Constants
//!
//! This crate is the single source of truth for the numbers every other kernel
//! crate has to agree on: the user address-space layout, the fixed capacities
//! the process layer enforces, the error and system-call numbers that cross
//! the user/kernel boundary, and the runtime shape of the simulated machine.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! The MIPS-style user layout:
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  code segment (region 1)        │
//!             │  data segment (region 2)        │
//!             │              ...                │
//! stack base  ├─────────────────────────────────┤ USER_STACK_TOP - STACK_PAGES * PAGE_SIZE
//!             │  fixed-size user stack          │
//! 0x8000_0000 ├─────────────────────────────────┤ USER_STACK_TOP
//!             │  kernel (kseg0, direct mapped)  │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ### Limits ([`limits`])
//! Process-count, path, and argument limits. Every limit is checked by the
//! kernel and reported as a typed error, never silently truncated.
//!
//! ### User ABI ([`abi`])
//! Error numbers, system-call numbers, fault kinds, and the wait-status
//! encoding shared with user programs.
//!
//! ### Machine Configuration ([`config`])
//! [`MachineConfig`](config::MachineConfig) describes the simulated board:
//! RAM size, how much of it the kernel image occupies, the TLB's random seed,
//! and the log level the console starts with.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod abi;
pub mod config;
pub mod limits;
pub mod memory;
