//! # User Mode
//!
//! What a program sees: registers, memory through the TLB, and the system
//! calls. Every load and store is translated by the simulated TLB; a miss
//! or a write to a clean entry traps into the kernel's fault handler,
//! exactly as on the real machine.

use crate::HostKernel;
use crate::programs::UserMain;
use crate::threads::HostThreads;
use kernel_alloc::PhysMapper;
use kernel_info::abi::signal::SIGSEGV;
use kernel_info::abi::sysno::{SYS_EXECV, SYS_EXIT, SYS_FORK, SYS_GETPID, SYS_WAITPID};
use kernel_info::abi::wait::mkwait_sig;
use kernel_info::memory::USER_POINTER_SIZE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_syscall::{ExecImage, Pid, Process, TrapFrame};
use log::{trace, warn};
use std::sync::Arc;

/// Longest string [`User::load_str`] reads, terminator included.
const MAX_STRING: usize = 1024;

/// The user-mode context of one thread.
pub struct User {
    kernel: Arc<HostKernel>,
    process: Arc<Process>,
    frame: TrapFrame,
}

impl User {
    /// Context for the first entry into a freshly loaded program.
    ///
    /// Like a C runtime start-up, this parks `argc`/`argv` in the saved
    /// registers `s0`/`s1` so that they survive system calls and `fork`.
    pub(crate) fn entering(kernel: Arc<HostKernel>, process: Arc<Process>, image: &ExecImage) -> Self {
        let mut frame = image.trap_frame();
        frame.s[0] = frame.a0;
        frame.s[1] = frame.a1;
        Self::resuming(kernel, process, frame)
    }

    /// Context returning to user mode with a saved `frame`.
    pub(crate) const fn resuming(kernel: Arc<HostKernel>, process: Arc<Process>, frame: TrapFrame) -> Self {
        Self {
            kernel,
            process,
            frame,
        }
    }

    #[must_use]
    pub const fn kernel(&self) -> &Arc<HostKernel> {
        &self.kernel
    }

    #[must_use]
    pub const fn frame(&self) -> &TrapFrame {
        &self.frame
    }

    #[must_use]
    pub const fn argc(&self) -> u32 {
        self.frame.s[0]
    }

    #[must_use]
    pub const fn argv(&self) -> VirtualAddress {
        VirtualAddress::new(self.frame.s[1])
    }

    /// The program arguments, read from the user stack.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let argv = self.argv();
        (0..self.argc())
            .map(|i| {
                let ptr = self.load_word(argv + i * USER_POINTER_SIZE);
                self.load_str(VirtualAddress::new(ptr))
            })
            .collect()
    }

    /// Address translation; traps until the TLB has a usable entry.
    fn translate(&self, va: VirtualAddress, write: bool) -> PhysicalAddress {
        loop {
            match self.kernel.vm().with_tlb(|tlb| tlb.access(va, write)) {
                Ok(pa) => return pa,
                Err(exception) => {
                    let kind = u32::from(exception.fault_kind());
                    trace!("pid {}: fault {kind} at {va}", self.process.pid());
                    if let Err(e) = self.kernel.vm_fault(&self.process, kind, va) {
                        warn!("pid {}: unhandled fault at {va}: {e}", self.process.pid());
                        self.kernel.kill(&self.process, mkwait_sig(SIGSEGV))
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn load_byte(&self, va: VirtualAddress) -> u8 {
        let pa = self.translate(va, false);
        self.kernel
            .vm()
            .mem()
            .with_frame(pa.frame(), |bytes| bytes[pa.offset() as usize])
    }

    pub fn store_byte(&self, va: VirtualAddress, value: u8) {
        let pa = self.translate(va, true);
        self.kernel
            .vm()
            .mem()
            .with_frame_mut(pa.frame(), |bytes| bytes[pa.offset() as usize] = value);
    }

    pub fn load(&self, va: VirtualAddress, buf: &mut [u8]) {
        for (i, byte) in (0u32..).zip(buf.iter_mut()) {
            *byte = self.load_byte(va + i);
        }
    }

    pub fn store(&self, va: VirtualAddress, data: &[u8]) {
        for (i, &byte) in (0u32..).zip(data) {
            self.store_byte(va + i, byte);
        }
    }

    /// Loads a big-endian word.
    #[must_use]
    pub fn load_word(&self, va: VirtualAddress) -> u32 {
        let mut word = [0u8; 4];
        self.load(va, &mut word);
        u32::from_be_bytes(word)
    }

    pub fn store_word(&self, va: VirtualAddress, value: u32) {
        self.store(va, &value.to_be_bytes());
    }

    /// Reads a NUL-terminated string, lossily decoded.
    #[must_use]
    pub fn load_str(&self, va: VirtualAddress) -> String {
        let mut bytes = Vec::new();
        for i in (0u32..).take(MAX_STRING) {
            match self.load_byte(va + i) {
                0 => break,
                b => bytes.push(b),
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Pushes `data` onto the user stack, word-aligned; returns its address.
    fn push(&mut self, data: &[u8]) -> VirtualAddress {
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        let sp = VirtualAddress::new(self.frame.sp) - len.next_multiple_of(USER_POINTER_SIZE);
        self.store(sp, data);
        self.frame.sp = sp.as_u32();
        sp
    }

    fn push_str(&mut self, s: &str) -> VirtualAddress {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.push(&bytes)
    }

    /// Traps into the kernel with `number` and up to three arguments.
    ///
    /// # Errors
    /// The error number the kernel returned.
    pub fn syscall(&mut self, number: u32, args: [u32; 3]) -> Result<u32, i32> {
        let mut tf = self.frame.clone();
        tf.v0 = number;
        [tf.a0, tf.a1, tf.a2] = args;
        tf.a3 = 0;
        self.kernel.syscall(&self.process, &mut tf);
        let result = if tf.a3 == 0 {
            Ok(tf.v0)
        } else {
            Err(tf.v0.cast_signed())
        };
        self.frame = tf;
        result
    }

    pub fn getpid(&mut self) -> Pid {
        self.syscall(SYS_GETPID, [0; 3]).map_or(-1, u32::cast_signed)
    }

    /// Forks; the child runs `child` and exits with its return value.
    ///
    /// # Errors
    /// The error number of a failed `fork`.
    pub fn fork(&mut self, child: UserMain) -> Result<Pid, i32> {
        HostThreads::prepare_fork(child);
        let result = self.syscall(SYS_FORK, [0; 3]);
        HostThreads::finish_fork();
        result.map(u32::cast_signed)
    }

    /// Replaces the running program. Returns only on failure, with the error
    /// number.
    pub fn execv(&mut self, path: &str, args: &[&str]) -> i32 {
        let sp = self.frame.sp;
        let program = self.push_str(path);
        let mut pointers: Vec<u32> = args.iter().map(|a| self.push_str(a).as_u32()).collect();
        pointers.push(0);
        let bytes: Vec<u8> = pointers.iter().flat_map(|p| p.to_be_bytes()).collect();
        let argv = self.push(&bytes);

        let errno = self.execv_raw(program, argv);
        self.frame.sp = sp;
        errno
    }

    /// `execv` with raw user pointers.
    pub fn execv_raw(&mut self, program: VirtualAddress, argv: VirtualAddress) -> i32 {
        match self.syscall(SYS_EXECV, [program.as_u32(), argv.as_u32(), 0]) {
            Err(errno) => errno,
            Ok(_) => unreachable!("execv returned success"),
        }
    }

    /// Waits for child `pid` and returns its wait status.
    ///
    /// # Errors
    /// The error number of a failed `waitpid`.
    pub fn waitpid(&mut self, pid: Pid) -> Result<i32, i32> {
        let sp = self.frame.sp;
        let status = self.push(&[0; 4]);
        let result = self.waitpid_raw(pid, status, 0);
        let status = self.load_word(status).cast_signed();
        self.frame.sp = sp;
        result.map(|_| status)
    }

    /// `waitpid` with a raw status pointer; returns the reaped pid.
    ///
    /// # Errors
    /// The error number of a failed `waitpid`.
    pub fn waitpid_raw(&mut self, pid: Pid, status: VirtualAddress, options: i32) -> Result<Pid, i32> {
        self.syscall(
            SYS_WAITPID,
            [pid.cast_unsigned(), status.as_u32(), options.cast_unsigned()],
        )
        .map(u32::cast_signed)
    }

    pub fn exit(&mut self, code: i32) -> ! {
        let _ = self.syscall(SYS_EXIT, [code.cast_unsigned(), 0, 0]);
        unreachable!("_exit returned")
    }
}

impl core::fmt::Debug for User {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("User")
            .field("pid", &self.process.pid())
            .field("epc", &format_args!("{:#010x}", self.frame.epc))
            .field("sp", &format_args!("{:#010x}", self.frame.sp))
            .finish_non_exhaustive()
    }
}
