//! System-call dispatch.
//!
//! The trap layer hands over the saved registers; this decodes the call,
//! runs it for the calling process and writes the result back in place.

use crate::uio::copyout_u32;
use crate::{Kernel, KernelError, Process, ProgramLoader, ThreadLayer, TrapFrame};
use alloc::sync::Arc;
use kernel_info::abi::sysno::{SYS_EXECV, SYS_EXIT, SYS_FORK, SYS_GETPID, SYS_WAITPID};
use kernel_memory_addresses::VirtualAddress;
use log::{debug, trace};

impl<L: ProgramLoader, T: ThreadLayer> Kernel<L, T> {
    /// Runs the system call in `tf.v0` on behalf of `current`.
    ///
    /// On return `v0`/`a3` hold the result and `epc` points past the
    /// `syscall` instruction. `_exit` and a successful `execv` do not return.
    pub fn syscall(&self, current: &Arc<Process>, tf: &mut TrapFrame) {
        let [a0, a1, a2, _] = tf.args();
        let callno = tf.syscall_number();
        trace!("syscall {callno} from pid {}", current.pid());

        let result = match callno {
            SYS_FORK => self.fork(current, tf).map(i32::cast_unsigned),
            SYS_EXECV => {
                match self.execv(current, VirtualAddress::new(a0), VirtualAddress::new(a1)) {
                    Ok(image) => self.threads().enter_new_process(current, image),
                    Err(e) => Err(e),
                }
            }
            SYS_EXIT => self.sys_exit(current, a0.cast_signed()),
            SYS_WAITPID => self
                .waitpid(current, a0.cast_signed(), a2.cast_signed(), |status| {
                    self.copyout_status(current, status, VirtualAddress::new(a1))
                })
                .map(i32::cast_unsigned),
            SYS_GETPID => Ok(self.getpid(current).cast_unsigned()),
            _ => {
                debug!("pid {}: unknown syscall {callno}", current.pid());
                Err(KernelError::NoSuchSyscall)
            }
        };

        tf.set_result(result);
        tf.advance();
    }

    fn copyout_status(
        &self,
        current: &Process,
        status: i32,
        dst: VirtualAddress,
    ) -> Result<(), KernelError> {
        current.with_address_space(|space| {
            let space = space.ok_or(KernelError::BadAddress(dst))?;
            copyout_u32(self.vm(), space, status.cast_unsigned(), dst)
        })
    }
}
