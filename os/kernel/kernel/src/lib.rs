//! # Hosted Kernel
//!
//! Boots the memory and process layers on the host. Kernel threads are host
//! threads sharing one simulated processor, programs are Rust functions
//! installed in a [`ProgramStore`], and user code touches memory only
//! through the simulated TLB.
//!
//! ```text
//!   boot ──► spawn("/bin/init") ──► user code ──► syscall / vm_fault
//!                                       ▲                │
//!                                       └── TrapFrame ◄──┘
//! ```

pub mod config;
pub mod demo;
pub mod logger;
pub mod programs;
pub mod threads;
pub mod user;

pub use crate::programs::{Program, ProgramStore, UserMain};
pub use crate::threads::HostThreads;
pub use crate::user::User;

use kernel_info::config::MachineConfig;
use kernel_syscall::{Kernel, KernelError, Pid};
use std::sync::Arc;

/// The kernel as assembled for the host.
pub type HostKernel = Kernel<ProgramStore, HostThreads>;

/// Builds the machine and wires the thread layer to it.
#[must_use]
pub fn boot(config: &MachineConfig, programs: ProgramStore) -> Arc<HostKernel> {
    let kernel = Arc::new(Kernel::boot(config, programs, HostThreads::new()));
    kernel.threads().attach(&kernel);
    kernel
}

/// Starts `path` as a new process without a parent.
///
/// # Errors
/// Whatever loading the program or starting its thread reports. Nothing of
/// the process is left behind.
pub fn spawn<S: AsRef<str>>(kernel: &Arc<HostKernel>, path: &str, args: &[S]) -> Result<Pid, KernelError> {
    let (process, image) = kernel.run_program(path, args)?;
    let pid = process.pid();
    if let Err(e) = kernel.threads().start(Arc::clone(&process), image) {
        if let Some(space) = process.take_address_space() {
            space.destroy(kernel.vm());
        }
        kernel.processes().remove(pid);
        return Err(e);
    }
    Ok(pid)
}
