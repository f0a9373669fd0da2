use kernel_alloc::FrameAllocError;
use kernel_memory_addresses::VirtualAddress;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("address space already has two regions")]
    TooManyRegions,
    #[error("no mapping for {0}")]
    BadAddress(VirtualAddress),
    #[error("invalid argument")]
    InvalidArgument,
    #[error("write to read-only code page at {0}")]
    IllegalModification(VirtualAddress),
    #[error("user stack has no frames attached")]
    StackNotPrepared,
}

impl From<FrameAllocError> for VmError {
    fn from(e: FrameAllocError) -> Self {
        match e {
            FrameAllocError::OutOfMemory { .. } => Self::OutOfMemory,
            FrameAllocError::InvalidRequest | FrameAllocError::NotAllocated(_) => {
                Self::InvalidArgument
            }
        }
    }
}
