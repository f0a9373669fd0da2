#![allow(dead_code)]

use kernel_info::config::MachineConfig;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_syscall::{ExecImage, Kernel, KernelError, Process, ProgramLoader, ThreadLayer, TrapFrame};
use kernel_vmem::{Access, AddressSpace, Vm};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const TEXT: VirtualAddress = VirtualAddress::new(0x0040_0000);
pub const DATA: VirtualAddress = VirtualAddress::new(0x1000_0000);

/// Programs as (text, data) byte images.
#[derive(Default)]
pub struct Images {
    programs: HashMap<String, (Vec<u8>, Vec<u8>)>,
}

impl Images {
    pub fn with(mut self, path: &str, text: &[u8], data: &[u8]) -> Self {
        self.programs.insert(path.to_owned(), (text.to_vec(), data.to_vec()));
        self
    }
}

impl ProgramLoader for Images {
    type Vnode = (Vec<u8>, Vec<u8>);

    fn open(&self, path: &str) -> Result<Self::Vnode, KernelError> {
        self.programs.get(path).cloned().ok_or(KernelError::NoSuchFile)
    }

    fn close(&self, _vnode: Self::Vnode) {}

    fn load(
        &self,
        (text, data): &Self::Vnode,
        vm: &Vm,
        space: &mut AddressSpace,
    ) -> Result<VirtualAddress, KernelError> {
        let len = |b: &Vec<u8>| u32::try_from(b.len()).map_err(|_| KernelError::NotExecutable);
        space.define_region(TEXT, len(text)?, Access::READ | Access::EXECUTE)?;
        space.define_region(DATA, len(data)?, Access::READ | Access::WRITE)?;
        space.prepare_load(vm)?;
        if text.is_empty() {
            return Err(KernelError::NotExecutable);
        }
        space.write(vm, TEXT, text)?;
        space.write(vm, DATA, data)?;
        space.complete_load(vm);
        Ok(TEXT)
    }
}

/// Payload used to unwind out of `exit_current`.
pub struct ThreadExit;

/// Records forks instead of running them.
#[derive(Default)]
pub struct Recorder {
    pub forked: Mutex<Vec<(Arc<Process>, TrapFrame)>>,
    pub fail_fork: AtomicBool,
}

impl ThreadLayer for Recorder {
    fn fork_thread(&self, child: Arc<Process>, frame: Box<TrapFrame>) -> Result<(), KernelError> {
        if self.fail_fork.load(Ordering::SeqCst) {
            return Err(KernelError::OutOfMemory);
        }
        self.forked.lock().unwrap().push((child, *frame));
        Ok(())
    }

    fn exit_current(&self) -> ! {
        panic::panic_any(ThreadExit)
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }

    fn enter_new_process(&self, _process: &Arc<Process>, image: ExecImage) -> ! {
        panic::panic_any(image)
    }
}

pub type TestKernel = Kernel<Images, Recorder>;

pub fn kernel(frames: u32) -> TestKernel {
    let config = MachineConfig::default()
        .with_ram_bytes(frames * PAGE_SIZE)
        .with_kernel_image_bytes(PAGE_SIZE);
    let images = Images::default()
        .with("/bin/init", &[0xAA; 64], &[1, 2, 3, 4])
        .with("/bin/big", &vec![0xBB; 3 * PAGE_SIZE as usize], &[0; 8])
        .with("/bin/bad", &[], &[]);
    Kernel::boot(&config, images, Recorder::default())
}

/// Runs `f`, which must end its thread; returns what it unwound with.
pub fn expect_no_return(f: impl FnOnce()) -> Box<dyn std::any::Any + Send> {
    panic::catch_unwind(AssertUnwindSafe(f)).expect_err("call returned")
}

/// Forks `parent` and returns the child process.
pub fn fork(kernel: &TestKernel, parent: &Process) -> Arc<Process> {
    let pid = kernel.fork(parent, &TrapFrame::default()).unwrap();
    kernel.processes().get(pid).unwrap()
}

pub fn free_frames(kernel: &TestKernel) -> u32 {
    kernel.vm().frames().stats().free
}
