use crate::KernelError;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{AddressSpace, Vm};

/// The file system and executable loader, as seen by `execv`.
///
/// `load` defines the program's regions in `space`, calls
/// [`AddressSpace::prepare_load`], copies the image in and finishes with
/// [`AddressSpace::complete_load`]. It returns the entry point.
pub trait ProgramLoader: Send + Sync {
    /// An open executable.
    type Vnode;

    /// # Errors
    /// [`KernelError::NoSuchFile`] if `path` does not name a program.
    fn open(&self, path: &str) -> Result<Self::Vnode, KernelError>;

    fn close(&self, vnode: Self::Vnode);

    /// # Errors
    /// Whatever defining, preparing or filling the address space reports, or
    /// [`KernelError::NotExecutable`] for a malformed image.
    fn load(
        &self,
        vnode: &Self::Vnode,
        vm: &Vm,
        space: &mut AddressSpace,
    ) -> Result<VirtualAddress, KernelError>;
}
