use crate::KernelError;
use kernel_memory_addresses::VirtualAddress;

/// Width of one MIPS instruction.
const INSTRUCTION_SIZE: u32 = 4;

/// Register state saved on entry to the kernel (MIPS calling convention).
///
/// System calls pass their number in `v0` and arguments in `a0`–`a3`. On
/// return `v0` holds the result or the error number, and `a3` is 0 for
/// success or 1 for failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TrapFrame {
    /// Faulting address (`BadVAddr`).
    pub vaddr: u32,
    pub status: u32,
    pub cause: u32,
    pub lo: u32,
    pub hi: u32,
    pub ra: u32,
    pub at: u32,
    pub v0: u32,
    pub v1: u32,
    pub a0: u32,
    pub a1: u32,
    pub a2: u32,
    pub a3: u32,
    pub t: [u32; 10],
    pub s: [u32; 9],
    pub gp: u32,
    pub sp: u32,
    pub k0: u32,
    pub k1: u32,
    /// Address of the instruction that trapped.
    pub epc: u32,
}

impl TrapFrame {
    /// Frame for the first entry into a freshly loaded program:
    /// `a0 = argc`, `a1 = argv`, `sp` and `epc` as given.
    #[must_use]
    pub fn for_entry(argc: u32, argv: VirtualAddress, sp: VirtualAddress, entry: VirtualAddress) -> Self {
        Self {
            a0: argc,
            a1: argv.as_u32(),
            sp: sp.as_u32(),
            epc: entry.as_u32(),
            ..Self::default()
        }
    }

    /// The frame a forked child resumes with: `fork` returns 0 there.
    #[must_use]
    pub fn for_child(&self) -> Self {
        let mut child = self.clone();
        child.v0 = 0;
        child.a3 = 0;
        child.advance();
        child
    }

    #[inline]
    #[must_use]
    pub const fn syscall_number(&self) -> u32 {
        self.v0
    }

    #[inline]
    #[must_use]
    pub const fn args(&self) -> [u32; 4] {
        [self.a0, self.a1, self.a2, self.a3]
    }

    /// Stores a system-call result the way user space expects it.
    pub const fn set_result(&mut self, result: Result<u32, KernelError>) {
        match result {
            Ok(value) => {
                self.v0 = value;
                self.a3 = 0;
            }
            Err(e) => {
                #[allow(clippy::cast_sign_loss)]
                let errno = e.errno() as u32;
                self.v0 = errno;
                self.a3 = 1;
            }
        }
    }

    /// Skips the `syscall` instruction so that the same call is not repeated.
    pub const fn advance(&mut self) {
        self.epc = self.epc.wrapping_add(INSTRUCTION_SIZE);
    }
}
