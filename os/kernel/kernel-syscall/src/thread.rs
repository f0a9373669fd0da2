use crate::{KernelError, Process, TrapFrame};
use alloc::boxed::Box;
use alloc::sync::Arc;
use kernel_memory_addresses::VirtualAddress;

/// Where a freshly loaded program starts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExecImage {
    pub argc: u32,
    /// User address of the argument pointer array.
    pub argv: VirtualAddress,
    /// Initial stack pointer, 8-byte aligned.
    pub stack_pointer: VirtualAddress,
    pub entry_point: VirtualAddress,
}

impl ExecImage {
    /// The register state user mode is entered with.
    #[must_use]
    pub fn trap_frame(&self) -> TrapFrame {
        TrapFrame::for_entry(self.argc, self.argv, self.stack_pointer, self.entry_point)
    }
}

/// Thread creation and scheduling, as seen by the process layer.
///
/// The process layer never creates or destroys threads itself; it asks this
/// collaborator to.
pub trait ThreadLayer: Send + Sync {
    /// Starts a thread for `child` that returns to user mode with `frame`.
    ///
    /// # Errors
    /// Any failure to create the thread; `fork` rolls back the child.
    fn fork_thread(&self, child: Arc<Process>, frame: Box<TrapFrame>) -> Result<(), KernelError>;

    /// Ends the calling thread. Its process has already been torn down.
    fn exit_current(&self) -> !;

    /// Gives up the processor while waiting.
    fn yield_now(&self);

    /// Enters user mode in the program described by `image`; does not return.
    fn enter_new_process(&self, process: &Arc<Process>, image: ExecImage) -> !;
}
