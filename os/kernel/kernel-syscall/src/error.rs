use kernel_info::abi::errno;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::VmError;

/// Failures reported by the process layer.
///
/// Each one maps onto an OS/161 error number via [`errno`](Self::errno), which
/// is what a user program sees in `v0`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("out of memory")]
    OutOfMemory,
    /// A user address is unmapped, or the caller has no address space (reported as `0x0`).
    #[error("bad address {0}")]
    BadAddress(VirtualAddress),
    #[error("invalid argument")]
    InvalidArgument,
    #[error("too many regions in one executable")]
    TooManyRegions,
    #[error("process table is full")]
    TooManyProcesses,
    #[error("name or argument too long")]
    NameTooLong,
    #[error("argument list too long")]
    ArgumentsTooLong,
    #[error("no such process")]
    NoSuchProcess,
    #[error("not a child of the caller")]
    NotMyChild,
    #[error("no such file")]
    NoSuchFile,
    #[error("write to read-only page at {0}")]
    IllegalModification(VirtualAddress),
    #[error("not an executable")]
    NotExecutable,
    #[error("unknown system call")]
    NoSuchSyscall,
}

impl KernelError {
    /// The error number handed back to user space.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::OutOfMemory => errno::ENOMEM,
            Self::BadAddress(_) | Self::IllegalModification(_) => errno::EFAULT,
            Self::InvalidArgument => errno::EINVAL,
            Self::TooManyRegions => errno::EUNIMP,
            Self::TooManyProcesses => errno::ENPROC,
            Self::NameTooLong => errno::ENAMETOOLONG,
            Self::ArgumentsTooLong => errno::E2BIG,
            Self::NoSuchProcess => errno::ESRCH,
            Self::NotMyChild => errno::ECHILD,
            Self::NoSuchFile => errno::ENOENT,
            Self::NotExecutable => errno::ENOEXEC,
            Self::NoSuchSyscall => errno::ENOSYS,
        }
    }
}

impl From<VmError> for KernelError {
    fn from(e: VmError) -> Self {
        match e {
            VmError::OutOfMemory => Self::OutOfMemory,
            VmError::TooManyRegions => Self::TooManyRegions,
            VmError::BadAddress(va) => Self::BadAddress(va),
            VmError::IllegalModification(va) => Self::IllegalModification(va),
            VmError::InvalidArgument | VmError::StackNotPrepared => Self::InvalidArgument,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_follow_os161() {
        assert_eq!(KernelError::NoSuchSyscall.errno(), 1);
        assert_eq!(KernelError::OutOfMemory.errno(), 3);
        assert_eq!(KernelError::BadAddress(VirtualAddress::zero()).errno(), 6);
        assert_eq!(KernelError::InvalidArgument.errno(), 8);
        assert_eq!(KernelError::TooManyProcesses.errno(), 12);
        assert_eq!(KernelError::NoSuchProcess.errno(), 15);
        assert_eq!(KernelError::NotMyChild.errno(), 16);
        assert_eq!(KernelError::NoSuchFile.errno(), 19);
    }

    #[test]
    fn vm_errors_keep_their_address() {
        let va = VirtualAddress::new(0x1234);
        assert_eq!(KernelError::from(VmError::BadAddress(va)), KernelError::BadAddress(va));
        assert_eq!(
            KernelError::from(VmError::IllegalModification(va)),
            KernelError::IllegalModification(va)
        );
        assert_eq!(KernelError::from(VmError::OutOfMemory), KernelError::OutOfMemory);
    }
}
