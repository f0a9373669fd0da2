//! # Address Space (two regions plus a fixed stack)
//!
//! Describes the user half of one process: up to two regions registered by
//! the program loader (the first is the code segment, the second the data
//! segment) and a stack of [`STACK_PAGES`] pages ending at [`USER_STACK_TOP`].
//!
//! ## Lifecycle
//!
//! 1. [`AddressSpace::new`] — nothing attached.
//! 2. [`define_region`](AddressSpace::define_region) once per loadable segment.
//! 3. [`prepare_load`](AddressSpace::prepare_load) — every page of every
//!    segment, stack included, gets a zeroed frame.
//! 4. The loader copies the program image in through
//!    [`write`](AddressSpace::write), then calls
//!    [`complete_load`](AddressSpace::complete_load), after which code pages
//!    are mapped read-only.
//! 5. [`copy`](AddressSpace::copy) on fork, [`destroy`](AddressSpace::destroy)
//!    on exit.
//!
//! ## Design
//!
//! - Requested access permissions are accepted but not enforced; the only
//!   read-only mapping is finalized code.
//! - Nothing is allocated on the fault path. A page without a frame is a bad
//!   address.
//! - An address space must be handed back through `destroy`; dropping one
//!   that still owns frames leaks them and logs a warning.

use crate::segment::{Segment, SegmentKind};
use crate::{Vm, VmError};
use core::iter;
use kernel_alloc::PhysMapper;
use kernel_info::memory::{NUM_TLB, STACK_PAGES, USER_STACK_BASE, USER_STACK_TOP};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress};
use log::{debug, trace, warn};

bitflags::bitflags! {
    /// Access requested for a region, as in an ELF program header's `p_flags`.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Access: u32 {
        const EXECUTE = 1 << 0;
        const WRITE   = 1 << 1;
        const READ    = 1 << 2;
    }
}

/// Virtual memory of one process.
#[derive(Debug)]
pub struct AddressSpace {
    /// Loader-defined regions; slot 0 is code, slot 1 is data.
    regions: [Option<Segment>; 2],
    stack: Segment,
    /// Set by `complete_load`: code pages are now mapped without the dirty bit.
    code_finalized: bool,
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace {
    /// `as_create`: an empty address space.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: [None, None],
            stack: Segment::new(SegmentKind::Stack, USER_STACK_BASE.page(), STACK_PAGES),
            code_finalized: false,
        }
    }

    /// Registers a region of `size` bytes at `vaddr`.
    ///
    /// The base is rounded down and the size up to whole pages.
    ///
    /// # Errors
    /// - [`VmError::TooManyRegions`] if both region slots are taken.
    /// - [`VmError::BadAddress`] if the region would wrap the address space.
    pub fn define_region(
        &mut self,
        vaddr: VirtualAddress,
        size: u32,
        access: Access,
    ) -> Result<(), VmError> {
        let size = size
            .checked_add(vaddr.offset())
            .ok_or(VmError::BadAddress(vaddr))?;
        let base = vaddr.page();
        let pages = size.div_ceil(PAGE_SIZE);
        // The last page must still be addressable; ending at 4 GiB is fine.
        if pages > 0 && base.checked_add_pages(pages - 1).is_none() {
            return Err(VmError::BadAddress(vaddr));
        }

        let Some(slot) = self.regions.iter().position(Option::is_none) else {
            warn!("as_define_region: no free region slot for {vaddr}");
            return Err(VmError::TooManyRegions);
        };
        let kind = if slot == 0 {
            SegmentKind::Code
        } else {
            SegmentKind::Data
        };
        let segment = Segment::new(kind, base, pages);
        debug!("as_define_region: {segment} access={access:?}");
        self.regions[slot] = Some(segment);
        Ok(())
    }

    /// Attaches a zeroed frame to every page of every segment, stack included.
    ///
    /// On failure the frames attached so far stay with the address space and
    /// are released by [`destroy`](Self::destroy).
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] when the frame allocator runs dry.
    pub fn prepare_load<M: PhysMapper>(&mut self, vm: &Vm<M>) -> Result<(), VmError> {
        for segment in self.segments_mut() {
            segment.populate(vm)?;
        }
        trace!("as_prepare_load: {} pages resident", self.resident_pages(vm));
        Ok(())
    }

    /// Marks the program image as loaded; code pages faulted in from now on
    /// are read-only. Drops the TLB entries of the code pages so no writable
    /// code mapping survives; a code segment larger than the TLB flushes it.
    pub fn complete_load<M: PhysMapper>(&mut self, vm: &Vm<M>) {
        self.code_finalized = true;
        let Some(code) = self.segment(SegmentKind::Code) else {
            return;
        };
        if code.pages() as usize > NUM_TLB {
            vm.flush_tlb();
            return;
        }
        let first = code.base().page();
        vm.with_tlb(|tlb| {
            for page in (0..code.pages()).filter_map(|i| first.checked_add_pages(i)) {
                tlb.invalidate_page(page);
            }
        });
        trace!("as_complete_load: {} code pages invalidated", code.pages());
    }

    /// Initial user stack pointer.
    ///
    /// # Errors
    /// [`VmError::StackNotPrepared`] if `prepare_load` has not attached the stack.
    pub fn define_stack(&self) -> Result<VirtualAddress, VmError> {
        if self.stack.table().storage().is_none() {
            return Err(VmError::StackNotPrepared);
        }
        Ok(USER_STACK_TOP)
    }

    /// Deep copy: same geometry, fresh frames, identical contents.
    ///
    /// The source must not be written to while the copy runs.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`]; the partial copy has been destroyed by then.
    pub fn copy<M: PhysMapper>(&self, vm: &Vm<M>) -> Result<Self, VmError> {
        let mut new = Self {
            regions: self
                .regions
                .each_ref()
                .map(|r| r.as_ref().map(Segment::same_geometry)),
            stack: self.stack.same_geometry(),
            code_finalized: self.code_finalized,
        };

        if let Err(e) = new.prepare_load(vm) {
            new.destroy(vm);
            return Err(e);
        }

        for (src, dst) in self.segments().zip(new.segments()) {
            for index in 0..src.pages() {
                if let (Some(from), Some(to)) =
                    (src.frame(vm.mem(), index), dst.frame(vm.mem(), index))
                {
                    vm.mem().copy_frame(from, to);
                }
            }
        }
        debug!("as_copy: {} pages copied", new.resident_pages(vm));
        Ok(new)
    }

    /// Releases every frame and every page table.
    pub fn destroy<M: PhysMapper>(mut self, vm: &Vm<M>) {
        for segment in self.segments_mut() {
            segment.release(vm);
        }
    }

    /// Makes this the current address space: drops every TLB entry.
    #[allow(clippy::unused_self)]
    pub fn activate<M: PhysMapper>(&self, vm: &Vm<M>) {
        vm.flush_tlb();
    }

    /// Nothing to undo; the next `activate` flushes the TLB.
    #[allow(clippy::unused_self)]
    pub const fn deactivate(&self) {}

    #[must_use]
    pub const fn code_finalized(&self) -> bool {
        self.code_finalized
    }

    /// Code, data and stack, in that order, skipping undefined regions.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.regions.iter().flatten().chain(iter::once(&self.stack))
    }

    fn segments_mut(&mut self) -> impl Iterator<Item = &mut Segment> {
        self.regions
            .iter_mut()
            .flatten()
            .chain(iter::once(&mut self.stack))
    }

    #[must_use]
    pub fn segment(&self, kind: SegmentKind) -> Option<&Segment> {
        self.segments().find(|s| s.kind() == kind)
    }

    /// Segment containing `va`.
    #[must_use]
    pub fn find_segment(&self, va: VirtualAddress) -> Option<&Segment> {
        self.segments().find(|s| s.contains(va))
    }

    /// Number of user pages with a frame attached.
    #[must_use]
    pub fn resident_pages<M: PhysMapper>(&self, vm: &Vm<M>) -> usize {
        self.segments()
            .map(|s| s.table().frames(vm.mem()).count())
            .sum()
    }

    /// Segment and frame backing the page that holds `va`.
    ///
    /// # Errors
    /// [`VmError::BadAddress`] if `va` is outside every segment or its page has
    /// no frame.
    pub fn resolve<M: PhysMapper>(
        &self,
        vm: &Vm<M>,
        va: VirtualAddress,
    ) -> Result<(SegmentKind, PhysicalPage), VmError> {
        let segment = self.find_segment(va).ok_or(VmError::BadAddress(va))?;
        let index = segment.page_index(va).ok_or(VmError::BadAddress(va))?;
        let frame = segment
            .frame(vm.mem(), index)
            .ok_or(VmError::BadAddress(va))?;
        Ok((segment.kind(), frame))
    }

    /// Physical address backing `va`.
    ///
    /// # Errors
    /// See [`resolve`](Self::resolve).
    pub fn translate<M: PhysMapper>(
        &self,
        vm: &Vm<M>,
        va: VirtualAddress,
    ) -> Result<PhysicalAddress, VmError> {
        let (_, frame) = self.resolve(vm, va)?;
        Ok(frame.base() + va.offset())
    }

    /// Copies user memory starting at `va` into `buf`.
    ///
    /// # Errors
    /// [`VmError::BadAddress`] at the first byte that is not mapped.
    pub fn read<M: PhysMapper>(
        &self,
        vm: &Vm<M>,
        va: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), VmError> {
        let mut cursor = va;
        let mut rest = buf;
        while !rest.is_empty() {
            let (_, frame) = self.resolve(vm, cursor)?;
            let (offset, n) = chunk(cursor, rest.len());
            let (head, tail) = core::mem::take(&mut rest).split_at_mut(n);
            vm.mem()
                .with_frame(frame, |bytes| head.copy_from_slice(&bytes[offset..offset + n]));
            rest = tail;
            cursor = advance(cursor, n, rest.is_empty())?;
        }
        Ok(())
    }

    /// Copies `data` into user memory starting at `va`.
    ///
    /// # Errors
    /// [`VmError::BadAddress`] at the first byte that is not mapped or that
    /// belongs to finalized code. Bytes before it have been written.
    pub fn write<M: PhysMapper>(
        &self,
        vm: &Vm<M>,
        va: VirtualAddress,
        data: &[u8],
    ) -> Result<(), VmError> {
        let mut cursor = va;
        let mut rest = data;
        while !rest.is_empty() {
            let (kind, frame) = self.resolve(vm, cursor)?;
            if kind == SegmentKind::Code && self.code_finalized {
                return Err(VmError::BadAddress(cursor));
            }
            let (offset, n) = chunk(cursor, rest.len());
            let (head, tail) = rest.split_at(n);
            vm.mem()
                .with_frame_mut(frame, |bytes| bytes[offset..offset + n].copy_from_slice(head));
            rest = tail;
            cursor = advance(cursor, n, rest.is_empty())?;
        }
        Ok(())
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        if self.segments().any(|s| s.table().storage().is_some()) {
            warn!("address space dropped without destroy; its frames are leaked");
        }
    }
}

/// In-page offset of `cursor` and how many of `remaining` bytes fit in its page.
fn chunk(cursor: VirtualAddress, remaining: usize) -> (usize, usize) {
    let offset = cursor.offset() as usize;
    let room = PAGE_SIZE as usize - offset;
    (offset, remaining.min(room))
}

fn advance(cursor: VirtualAddress, n: usize, done: bool) -> Result<VirtualAddress, VmError> {
    if done {
        return Ok(cursor);
    }
    u32::try_from(n)
        .ok()
        .and_then(|n| cursor.checked_add(n))
        .ok_or(VmError::BadAddress(cursor))
}
