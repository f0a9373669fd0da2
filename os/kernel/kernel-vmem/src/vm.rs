use crate::VmError;
use crate::tlb::Tlb;
use kernel_alloc::{FrameAllocator, PhysMapper, Ram};
use kernel_info::config::MachineConfig;
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::{InterruptState, SpinLock};
use log::{debug, info, warn};

/// The memory half of the machine: physical frames, their contents, the TLB
/// and the interrupt flag that guards it.
///
/// Built once at boot and shared by reference; there is no global instance.
pub struct Vm<M: PhysMapper = Ram> {
    frames: FrameAllocator,
    mem: M,
    tlb: SpinLock<Tlb>,
    cpu: InterruptState,
}

impl Vm<Ram> {
    /// A machine with zeroed RAM, the allocator still in bootstrap mode.
    #[must_use]
    pub fn new(config: &MachineConfig) -> Self {
        let ram = Ram::new(config);
        debug!("vm: {} KiB of RAM in {} frames", ram.size() / 1024, ram.frame_count());
        Self::with_parts(FrameAllocator::new(config), ram, config.tlb_seed)
    }
}

impl<M: PhysMapper> Vm<M> {
    #[must_use]
    pub const fn with_parts(frames: FrameAllocator, mem: M, tlb_seed: u32) -> Self {
        Self {
            frames,
            mem,
            tlb: SpinLock::new(Tlb::new(tlb_seed)),
            cpu: InterruptState::new(),
        }
    }

    /// `vm_bootstrap`: switch the frame allocator from stolen memory to the frame table.
    pub fn bootstrap(&self) {
        if self.frames.bootstrap() {
            let stats = self.frames.stats();
            info!(
                "vm: {} frames managed, {} free, {} stolen during boot",
                stats.managed, stats.free, stats.stolen
            );
        }
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    #[inline]
    #[must_use]
    pub const fn mem(&self) -> &M {
        &self.mem
    }

    #[inline]
    #[must_use]
    pub const fn cpu(&self) -> &InterruptState {
        &self.cpu
    }

    /// Allocates `npages` contiguous kernel frames.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] when no run of that length is free.
    pub fn alloc_kpages(&self, npages: u32) -> Result<PhysicalAddress, VmError> {
        Ok(self.frames.allocate(npages)?)
    }

    /// Releases a run obtained from [`alloc_kpages`](Self::alloc_kpages).
    pub fn free_kpages(&self, pa: PhysicalAddress) {
        if let Err(e) = self.frames.release(pa) {
            warn!("free_kpages: {e}");
        }
    }

    /// Runs `f` on the TLB with interrupts disabled.
    pub fn with_tlb<R>(&self, f: impl FnOnce(&mut Tlb) -> R) -> R {
        let mut tlb = self.tlb.lock_irq(&self.cpu);
        f(&mut tlb)
    }

    /// Invalidates every TLB entry.
    pub fn flush_tlb(&self) {
        self.with_tlb(Tlb::invalidate_all);
    }

    /// Cross-processor TLB invalidation is not supported on this machine.
    pub fn tlb_shootdown(&self) -> ! {
        panic!("tlb shootdown requested, but only one processor is supported");
    }
}

impl<M: PhysMapper> core::fmt::Debug for Vm<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vm")
            .field("frames", &self.frames)
            .field("interrupts_enabled", &self.cpu.enabled())
            .finish_non_exhaustive()
    }
}
