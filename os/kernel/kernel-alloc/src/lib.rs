//! # Physical Memory Management
//!
//! This crate owns every byte of physical memory of the simulated machine and
//! hands it out in page-sized frames.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Frame Allocator (coremap)              │
//! │    • first-fit runs of contiguous frames            │
//! │    • run length recorded on the run's head          │
//! │    • one lock, held only while scanning or clearing │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ before bootstrap
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Steal-Memory Allocator                 │
//! │    • bumps the start of the free region             │
//! │    • no reclamation                                 │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │            Physical Mapper / RAM                    │
//! │    • frame number → bytes                           │
//! │    • zero-fill and frame-to-frame copy              │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame Allocator ([`frame_alloc`])
//! [`FrameAllocator`] starts in bootstrap mode and switches to the frame
//! table once [`FrameAllocator::bootstrap`] runs. After that every request is
//! served by a linear first-fit scan; the table's own storage is accounted to
//! the first managed frames, which are marked permanently in use.
//!
//! ### Steal Memory ([`bootstrap`])
//! The [`StealMem`] bump allocator carves frames off the bottom of the
//! single free region left over after the kernel image.
//!
//! ### Physical Mapper ([`phys_mapper`])
//! [`PhysMapper`] is the only way to touch frame contents. [`Ram`] is the
//! simulated board memory that implements it.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::{FrameAllocator, PhysMapper, Ram};
//! use kernel_info::config::MachineConfig;
//!
//! let cfg = MachineConfig::default();
//! let ram = Ram::new(&cfg);
//! let frames = FrameAllocator::new(&cfg);
//! frames.bootstrap();
//!
//! let pa = frames.allocate(2).unwrap();
//! ram.zero_frame(pa.frame());
//! assert_eq!(frames.release(pa).unwrap(), 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod bootstrap;
pub mod frame_alloc;
pub mod phys_mapper;

pub use bootstrap::StealMem;
pub use frame_alloc::{FrameAllocError, FrameAllocator, FrameSlot, FrameStats};
pub use phys_mapper::{PhysMapper, Ram};
