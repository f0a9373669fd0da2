use crate::exec::{check_args, check_path, copyin_args, program_name, push_args};
use crate::process::{Pid, ProcState, Process, ProcessTable};
use crate::uio::copyinstr;
use crate::{ExecImage, KernelError, ProgramLoader, ThreadLayer, TrapFrame};
use alloc::boxed::Box;
use alloc::sync::Arc;
use kernel_info::abi::signal::SIGSEGV;
use kernel_info::abi::wait::{EX_MOD, mkwait_exit, mkwait_sig};
use kernel_info::config::MachineConfig;
use kernel_info::limits::PATH_MAX;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{AddressSpace, Vm, VmError};
use log::{debug, info, warn};

/// The kernel: memory, processes and the collaborators they run on.
///
/// Every operation takes the calling process explicitly; there is no
/// "current process" global.
pub struct Kernel<L: ProgramLoader, T: ThreadLayer> {
    vm: Vm,
    procs: ProcessTable,
    loader: L,
    threads: T,
}

impl<L: ProgramLoader, T: ThreadLayer> Kernel<L, T> {
    #[must_use]
    pub const fn new(vm: Vm, loader: L, threads: T) -> Self {
        Self {
            vm,
            procs: ProcessTable::new(),
            loader,
            threads,
        }
    }

    /// Builds the machine described by `config` and bootstraps its VM.
    #[must_use]
    pub fn boot(config: &MachineConfig, loader: L, threads: T) -> Self {
        let vm = Vm::new(config);
        vm.bootstrap();
        info!(
            "kernel: {} KiB RAM, {} KiB kernel image",
            config.ram_size() / 1024,
            config.first_free() / 1024
        );
        Self::new(vm, loader, threads)
    }

    #[inline]
    #[must_use]
    pub const fn vm(&self) -> &Vm {
        &self.vm
    }

    #[inline]
    #[must_use]
    pub const fn processes(&self) -> &ProcessTable {
        &self.procs
    }

    #[inline]
    #[must_use]
    pub const fn loader(&self) -> &L {
        &self.loader
    }

    #[inline]
    #[must_use]
    pub const fn threads(&self) -> &T {
        &self.threads
    }

    /// `getpid()`.
    #[must_use]
    pub const fn getpid(&self, current: &Process) -> Pid {
        current.pid()
    }

    /// `fork()`: duplicates `current` and starts its first thread with a copy
    /// of `tf`. Returns the child's pid; the child sees 0.
    ///
    /// Nothing of the child survives a failure.
    ///
    /// # Errors
    /// - [`KernelError::TooManyProcesses`] if the process table is full.
    /// - [`KernelError::OutOfMemory`] if the address space cannot be copied.
    /// - [`KernelError::BadAddress`] if `current` has no address space.
    /// - Whatever the thread layer reports.
    pub fn fork(&self, current: &Process, tf: &TrapFrame) -> Result<Pid, KernelError> {
        let child = self.procs.create(current.name(), Some(current.pid()))?;
        let pid = child.pid();

        let copied = current.with_address_space(|space| match space {
            Some(space) => space.copy(&self.vm).map_err(KernelError::from),
            None => Err(KernelError::BadAddress(VirtualAddress::zero())),
        });
        let space = match copied {
            Ok(space) => space,
            Err(e) => {
                self.procs.remove(pid);
                return Err(e);
            }
        };
        child.set_address_space(space);

        if let Err(e) = self
            .threads
            .fork_thread(Arc::clone(&child), Box::new(tf.for_child()))
        {
            if let Some(space) = child.take_address_space() {
                space.destroy(&self.vm);
            }
            self.procs.remove(pid);
            return Err(e);
        }

        debug!("fork: pid {} -> child {pid}", current.pid());
        Ok(pid)
    }

    /// `execv()`: replaces the program running in `current`.
    ///
    /// The new program is loaded into a fresh address space while the old one
    /// stays installed; the old one is destroyed only once the new one is
    /// complete. On error the caller keeps running its old program.
    ///
    /// # Errors
    /// - [`KernelError::NoSuchFile`] for a null `program` or a missing file.
    /// - [`KernelError::NameTooLong`] / [`KernelError::ArgumentsTooLong`] for
    ///   oversized paths or arguments.
    /// - [`KernelError::BadAddress`] for unreadable user pointers.
    /// - Loader and memory errors.
    pub fn execv(
        &self,
        current: &Process,
        program: VirtualAddress,
        argv: VirtualAddress,
    ) -> Result<ExecImage, KernelError> {
        if program.is_null() {
            return Err(KernelError::NoSuchFile);
        }

        let (path, args) = current.with_address_space(|space| {
            let space = space.ok_or(KernelError::BadAddress(VirtualAddress::zero()))?;
            let path = copyinstr(&self.vm, space, program, PATH_MAX + 1)?;
            check_path(&path)?;
            let args = copyin_args(&self.vm, space, argv)?;
            Ok::<_, KernelError>((path, args))
        })?;

        let (space, image) = self.load_image(&path, &args)?;
        space.activate(&self.vm);
        if let Some(old) = current.set_address_space(space) {
            old.destroy(&self.vm);
        }
        debug!("execv: pid {} now runs {path} with {} args", current.pid(), image.argc);
        Ok(image)
    }

    /// Starts the first user program: a new process without a parent.
    ///
    /// # Errors
    /// As [`execv`](Self::execv), plus [`KernelError::TooManyProcesses`].
    pub fn run_program<S: AsRef<str>>(
        &self,
        path: &str,
        args: &[S],
    ) -> Result<(Arc<Process>, ExecImage), KernelError> {
        check_path(path)?;
        check_args(args)?;

        let process = self.procs.create(program_name(path), None)?;
        match self.load_image(path, args) {
            Ok((space, image)) => {
                space.activate(&self.vm);
                process.set_address_space(space);
                info!("runprogram: pid {} running {path}", process.pid());
                Ok((process, image))
            }
            Err(e) => {
                self.procs.remove(process.pid());
                Err(e)
            }
        }
    }

    /// Opens and loads `path` into a new address space and pushes `args`.
    fn load_image<S: AsRef<str>>(
        &self,
        path: &str,
        args: &[S],
    ) -> Result<(AddressSpace, ExecImage), KernelError> {
        let argc = u32::try_from(args.len()).map_err(|_| KernelError::ArgumentsTooLong)?;
        let vnode = self.loader.open(path)?;
        let mut space = AddressSpace::new();
        let entry = self.loader.load(&vnode, &self.vm, &mut space);
        self.loader.close(vnode);

        let image = entry.and_then(|entry_point| {
            let top = space.define_stack()?;
            let (argv, stack_pointer) = push_args(&self.vm, &space, top, args)?;
            Ok(ExecImage {
                argc,
                argv,
                stack_pointer,
                entry_point,
            })
        });
        match image {
            Ok(image) => Ok((space, image)),
            Err(e) => {
                space.destroy(&self.vm);
                Err(e)
            }
        }
    }

    /// `_exit()` minus the final thread exit: releases the address space and
    /// records the exit status for the parent.
    ///
    /// # Panics
    /// If `current` has no address space.
    pub fn exit(&self, current: &Process, code: i32) {
        self.terminate(current, mkwait_exit(code));
    }

    /// `_exit()`: never returns to the caller.
    pub fn sys_exit(&self, current: &Process, code: i32) -> ! {
        self.exit(current, code);
        self.threads.exit_current()
    }

    /// Terminates `current` with an already encoded wait status and ends the
    /// calling thread.
    pub fn kill(&self, current: &Process, status: i32) -> ! {
        self.terminate(current, status);
        self.threads.exit_current()
    }

    fn terminate(&self, current: &Process, status: i32) {
        let pid = current.pid();
        let Some(space) = current.take_address_space() else {
            panic!("exit: pid {pid} has no address space");
        };
        space.deactivate();
        space.destroy(&self.vm);

        let mut procs = self.procs.lock();
        let live_parent = procs.parent(pid).filter(|&parent| procs.is_running(parent));
        let reaped = match live_parent {
            None => {
                let reaped = procs.release_children(pid);
                procs.remove(pid);
                debug!("exit: pid {pid} has no parent, destroyed");
                reaped
            }
            Some(parent) => {
                procs.set_state(pid, ProcState::Exited(status));
                if let Some(parent) = procs.get(parent) {
                    parent.wait_child().notify_all();
                }
                debug!("exit: pid {pid} exited with {status:#x}, parent {parent} notified");
                procs.release_children(pid)
            }
        };
        if reaped > 0 {
            debug!("exit: pid {pid} reaped {reaped} exited children");
        }
    }

    /// `waitpid()`: blocks until child `pid` has exited, hands its status to
    /// `deliver`, then reaps it.
    ///
    /// If `deliver` fails the child is left unreaped and the error returned,
    /// so a later call can still collect it.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] for non-zero `options`.
    /// - [`KernelError::NoSuchProcess`] if `pid` is unknown or already reaped.
    /// - [`KernelError::NotMyChild`] if `pid` belongs to someone else.
    /// - Whatever `deliver` reports.
    pub fn waitpid(
        &self,
        current: &Process,
        pid: Pid,
        options: i32,
        deliver: impl FnOnce(i32) -> Result<(), KernelError>,
    ) -> Result<Pid, KernelError> {
        if options != 0 {
            return Err(KernelError::InvalidArgument);
        }

        let procs = self.procs.lock();
        if procs.state(pid).is_none() {
            return Err(KernelError::NoSuchProcess);
        }
        if procs.parent(pid) != Some(current.pid()) {
            return Err(KernelError::NotMyChild);
        }

        let mut procs = current.wait_child().wait_while(
            procs,
            |procs| procs.state(pid) == Some(ProcState::Running),
            || self.threads.yield_now(),
        );
        let Some(ProcState::Exited(status)) = procs.state(pid) else {
            return Err(KernelError::NoSuchProcess);
        };

        deliver(status)?;
        procs.remove(pid);
        debug!("waitpid: pid {} reaped {pid}", current.pid());
        Ok(pid)
    }

    /// TLB miss or protection fault raised while `current` was running.
    ///
    /// A write to read-only code kills the process with a signalled
    /// `EX_MOD` status; so does an access outside its address space, with
    /// `SIGSEGV`. Neither returns.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] for an unknown fault code.
    /// - [`KernelError::BadAddress`] if `current` has no address space; there
    ///   is nothing to tear down, so the process is left alone.
    pub fn vm_fault(
        &self,
        current: &Process,
        fault_type: u32,
        addr: VirtualAddress,
    ) -> Result<(), KernelError> {
        let result = current.with_address_space(|space| {
            kernel_vmem::vm_fault(&self.vm, space.map(|s| &*s), fault_type, addr)
        });
        match result {
            Ok(_) => Ok(()),
            Err(VmError::IllegalModification(va)) => {
                warn!("pid {}: write to code page at {va}, killed", current.pid());
                self.kill(current, mkwait_sig(EX_MOD))
            }
            Err(VmError::BadAddress(va)) if current.has_address_space() => {
                warn!("pid {}: bad address {va}, killed", current.pid());
                self.kill(current, mkwait_sig(SIGSEGV))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl<L: ProgramLoader, T: ThreadLayer> core::fmt::Debug for Kernel<L, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel")
            .field("vm", &self.vm)
            .field("processes", &self.procs.len())
            .finish_non_exhaustive()
    }
}
