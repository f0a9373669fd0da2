//! # Host Threads
//!
//! Every kernel thread is a host thread, and they all share one simulated
//! processor. A thread runs user code (and the kernel on its behalf) only
//! while it holds the processor:
//!
//! ```text
//!   spawn ──► switch_in ──► user code / syscalls ──► exit_current
//!                 ▲                │                      │
//!                 └── yield_now ◄──┘                      ▼
//!                                                 switch_out + unwind
//! ```
//!
//! Taking the processor flushes the TLB, so no translation survives a
//! context switch. A thread ends by unwinding with a private payload that is
//! caught at the top of the thread; nothing below the syscall that exited
//! runs again.

use crate::programs::UserMain;
use crate::{HostKernel, User};
use kernel_info::abi::signal::SIGILL;
use kernel_info::abi::wait::mkwait_sig;
use kernel_syscall::{ExecImage, KernelError, Process, ThreadLayer, TrapFrame};
use log::{debug, error, warn};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread::{self, JoinHandle};

thread_local! {
    /// Whether the calling thread holds the processor.
    static ON_CPU: Cell<bool> = const { Cell::new(false) };
    /// Body of the child of the `fork` in progress on this thread.
    static FORK_MAIN: Cell<Option<UserMain>> = const { Cell::new(None) };
}

/// Unwinding payload of [`ThreadLayer::exit_current`].
struct ThreadExit;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The single processor, handed out in ticket order so that a yielding
/// thread queues behind everyone already waiting.
#[derive(Debug, Default)]
struct Processor {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    serving: u64,
}

impl Processor {
    fn acquire(&self) {
        let mut tickets = lock(&self.tickets);
        let ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != ticket {
            tickets = self.turn.wait(tickets).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn release(&self) {
        lock(&self.tickets).serving += 1;
        self.turn.notify_all();
    }
}

/// [`ThreadLayer`] on host threads.
#[derive(Debug, Default)]
pub struct HostThreads {
    kernel: OnceLock<Weak<HostKernel>>,
    cpu: Processor,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl HostThreads {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects the layer to the kernel it runs threads for.
    pub fn attach(&self, kernel: &Arc<HostKernel>) {
        if self.kernel.set(Arc::downgrade(kernel)).is_err() {
            warn!("threads: already attached to a kernel");
        }
    }

    fn kernel(&self) -> Arc<HostKernel> {
        match self.kernel.get().and_then(Weak::upgrade) {
            Some(kernel) => kernel,
            None => panic!("threads: not attached to a running kernel"),
        }
    }

    /// Starts `process` at `image` on a new thread.
    ///
    /// # Errors
    /// [`KernelError::OutOfMemory`] if the host refuses another thread.
    pub fn start(&self, process: Arc<Process>, image: ExecImage) -> Result<(), KernelError> {
        let kernel = self.kernel();
        let name = process.name().to_owned();
        self.spawn(&name, move || kernel.threads().enter_new_process(&process, image))
    }

    /// Sets the body the next `fork` on this thread starts its child with.
    pub(crate) fn prepare_fork(main: UserMain) {
        FORK_MAIN.set(Some(main));
    }

    /// Clears a body the last `fork` did not consume.
    pub(crate) fn finish_fork() {
        FORK_MAIN.set(None);
    }

    /// Waits for every thread, including those started while waiting.
    pub fn join_all(&self) {
        loop {
            let handles = std::mem::take(&mut *lock(&self.threads));
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                let name = handle.thread().name().unwrap_or("?").to_owned();
                if handle.join().is_err() {
                    error!("threads: {name} panicked");
                }
            }
        }
    }

    /// Number of threads not yet joined.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.threads).len()
    }

    fn spawn(&self, name: &str, body: impl FnOnce() + Send + 'static) -> Result<(), KernelError> {
        let kernel = self.kernel();
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let threads = kernel.threads();
                threads.switch_in(&kernel);
                match panic::catch_unwind(AssertUnwindSafe(body)) {
                    Err(payload) if payload.is::<ThreadExit>() => {}
                    Err(payload) => {
                        threads.switch_out();
                        panic::resume_unwind(payload);
                    }
                    Ok(()) => threads.switch_out(),
                }
            })
            .map_err(|e| {
                warn!("threads: cannot start {name}: {e}");
                KernelError::OutOfMemory
            })?;
        lock(&self.threads).push(handle);
        Ok(())
    }

    fn switch_in(&self, kernel: &HostKernel) {
        self.cpu.acquire();
        ON_CPU.set(true);
        kernel.vm().flush_tlb();
    }

    fn switch_out(&self) {
        if ON_CPU.replace(false) {
            self.cpu.release();
        }
    }
}

impl ThreadLayer for HostThreads {
    fn fork_thread(&self, child: Arc<Process>, frame: Box<TrapFrame>) -> Result<(), KernelError> {
        let Some(main) = FORK_MAIN.take() else {
            warn!("threads: fork from pid {} without a child body", child.pid());
            return Err(KernelError::InvalidArgument);
        };
        let kernel = self.kernel();
        let name = child.name().to_owned();
        self.spawn(&name, move || {
            let mut user = User::resuming(Arc::clone(&kernel), Arc::clone(&child), *frame);
            let code = main(&mut user);
            kernel.sys_exit(&child, code)
        })
    }

    fn exit_current(&self) -> ! {
        self.switch_out();
        panic::resume_unwind(Box::new(ThreadExit))
    }

    fn yield_now(&self) {
        if ON_CPU.get() {
            self.switch_out();
            thread::yield_now();
            self.switch_in(&self.kernel());
        } else {
            thread::yield_now();
        }
    }

    fn enter_new_process(&self, process: &Arc<Process>, image: ExecImage) -> ! {
        let kernel = self.kernel();
        let mut user = User::entering(Arc::clone(&kernel), Arc::clone(process), &image);

        let word = user.load_word(image.entry_point);
        let Some(main) = kernel.loader().decode(word).map(|p| p.main()) else {
            warn!(
                "pid {}: illegal instruction {word:#010x} at {}",
                process.pid(),
                image.entry_point
            );
            kernel.kill(process, mkwait_sig(SIGILL))
        };

        debug!("pid {}: entering user mode at {}", process.pid(), image.entry_point);
        let code = main(&mut user);
        kernel.sys_exit(process, code)
    }
}
