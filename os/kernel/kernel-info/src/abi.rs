//! # User ABI
//!
//! Numbers shared with user programs. They follow the OS/161 headers so that
//! unmodified test programs interpret results the same way.

/// Error numbers returned in `v0` when `a3` is set.
pub mod errno {
    pub const ENOSYS: i32 = 1;
    pub const EUNIMP: i32 = 2;
    pub const ENOMEM: i32 = 3;
    pub const EFAULT: i32 = 6;
    pub const ENAMETOOLONG: i32 = 7;
    pub const EINVAL: i32 = 8;
    pub const ENPROC: i32 = 12;
    pub const E2BIG: i32 = 14;
    pub const ESRCH: i32 = 15;
    pub const ECHILD: i32 = 16;
    pub const ENOENT: i32 = 19;
    pub const ENOEXEC: i32 = 21;
}

/// System-call numbers passed in `v0`.
pub mod sysno {
    pub const SYS_FORK: u32 = 0;
    pub const SYS_EXECV: u32 = 2;
    pub const SYS_EXIT: u32 = 3;
    pub const SYS_WAITPID: u32 = 4;
    pub const SYS_GETPID: u32 = 5;
}

/// Raw fault kinds delivered by the trap layer.
pub mod fault {
    /// A read from a page with no TLB entry.
    pub const VM_FAULT_READ: u32 = 0;
    /// A write to a page with no TLB entry.
    pub const VM_FAULT_WRITE: u32 = 1;
    /// A write to a page whose TLB entry has the dirty bit clear.
    pub const VM_FAULT_READONLY: u32 = 2;
}

/// Signal numbers reported in a signalled wait status.
pub mod signal {
    /// Illegal instruction.
    pub const SIGILL: i32 = 4;
    /// Invalid memory reference.
    pub const SIGSEGV: i32 = 11;
}

/// Wait-status encoding.
///
/// The low two bits select the kind of termination and the remaining bits
/// carry the payload: `exited(code) = code << 2`,
/// `signaled(sig) = (sig << 2) | 1`.
pub mod wait {
    pub const WAIT_EXITED: i32 = 0;
    pub const WAIT_SIGNALED: i32 = 1;

    /// Payload used when a process is killed for writing to its code segment.
    pub const EX_MOD: i32 = 1;

    #[inline]
    #[must_use]
    pub const fn mkwait_exit(code: i32) -> i32 {
        (code << 2) | WAIT_EXITED
    }

    #[inline]
    #[must_use]
    pub const fn mkwait_sig(sig: i32) -> i32 {
        (sig << 2) | WAIT_SIGNALED
    }

    #[inline]
    #[must_use]
    pub const fn wifexited(status: i32) -> bool {
        status & 3 == WAIT_EXITED
    }

    #[inline]
    #[must_use]
    pub const fn wifsignaled(status: i32) -> bool {
        status & 3 == WAIT_SIGNALED
    }

    #[inline]
    #[must_use]
    pub const fn wexitstatus(status: i32) -> i32 {
        status >> 2
    }

    #[inline]
    #[must_use]
    pub const fn wtermsig(status: i32) -> i32 {
        status >> 2
    }
}

#[cfg(test)]
mod tests {
    use super::wait::*;

    #[test]
    fn exit_and_signal_statuses_are_distinct() {
        let exited = mkwait_exit(EX_MOD);
        let killed = mkwait_sig(EX_MOD);
        assert_ne!(exited, killed);
        assert!(wifexited(exited));
        assert!(wifsignaled(killed));
        assert_eq!(wexitstatus(exited), EX_MOD);
        assert_eq!(wtermsig(killed), EX_MOD);
    }

    #[test]
    fn negative_exit_codes_survive_encoding() {
        assert_eq!(wexitstatus(mkwait_exit(-3)), -3);
    }
}
