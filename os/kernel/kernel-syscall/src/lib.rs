//! # Processes and System Calls
//!
//! The process layer on top of [`kernel_vmem`]: a process table, the
//! lifecycle calls `fork`, `execv`, `_exit`, `waitpid` and `getpid`, the
//! user/kernel copy primitives, and the system-call dispatcher.
//!
//! ## Collaborators
//!
//! Loading executables and running threads are somebody else's job. The
//! kernel talks to them through two traits:
//!
//! - [`ProgramLoader`]: opens a program and fills an [`AddressSpace`](kernel_vmem::AddressSpace).
//! - [`ThreadLayer`]: creates, ends and schedules threads and enters user mode.
//!
//! ## Locking
//!
//! ```text
//!  process table ──► address space ──► frame table
//!                                  └─► TLB (interrupts off)
//! ```
//!
//! Locks are only ever taken in this order. `waitpid` releases the table
//! lock while it sleeps on the caller's wait channel.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod error;
pub mod exec;
mod kernel;
mod loader;
pub mod process;
mod syscall;
mod thread;
mod trapframe;
pub mod uio;

pub use crate::error::KernelError;
pub use crate::kernel::Kernel;
pub use crate::loader::ProgramLoader;
pub use crate::process::{Pid, ProcState, Process, ProcessTable};
pub use crate::thread::{ExecImage, ThreadLayer};
pub use crate::trapframe::TrapFrame;
