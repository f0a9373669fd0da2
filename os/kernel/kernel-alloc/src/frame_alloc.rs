//! Physical frame allocator (the coremap).
//!
//! Before [`FrameAllocator::bootstrap`] requests are served by [`StealMem`].
//! Afterwards every frame between the end of stolen memory and the top of RAM
//! has a [`FrameSlot`], and allocations are contiguous first-fit runs.

use crate::bootstrap::StealMem;
use alloc::vec;
use alloc::vec::Vec;
use core::mem::size_of;
use kernel_info::config::MachineConfig;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};
use kernel_sync::SpinLock;
use log::{debug, info, trace, warn};

/// Errors reported by [`FrameAllocator`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("no run of {requested} free frames")]
    OutOfMemory { requested: u32 },
    #[error("a run must contain at least one frame")]
    InvalidRequest,
    #[error("{0} is not the start of an allocated run")]
    NotAllocated(PhysicalAddress),
}

/// State of one managed frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameSlot {
    Free,
    /// Holds the frame table itself; never released.
    Reserved,
    /// First frame of an allocated run of `run_length` frames.
    Head { run_length: u32 },
    /// Any later frame of a run; `head` is the slot index of the run's first frame.
    Tail { head: u32 },
}

impl FrameSlot {
    #[inline]
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free)
    }
}

/// Frame usage counters, as observed at one instant.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames covered by the frame table.
    pub managed: u32,
    /// Frames holding the frame table.
    pub reserved: u32,
    /// Frames in live runs.
    pub used: u32,
    /// Frames available for allocation.
    pub free: u32,
    /// Frames handed out by the bootstrap allocator, never reclaimable.
    pub stolen: u32,
}

struct FrameTable {
    /// Physical frame of slot 0.
    base: PhysicalPage,
    slots: Vec<FrameSlot>,
    reserved: usize,
}

impl FrameTable {
    /// Builds a table over `[first, last)` and reserves the frames that would
    /// hold it.
    fn new(first: PhysicalAddress, last: PhysicalAddress) -> Self {
        let count = ((last.as_u32() - first.as_u32()) / PAGE_SIZE) as usize;
        let table_bytes = count * size_of::<FrameSlot>();
        let reserved = table_bytes.div_ceil(PAGE_SIZE as usize).min(count);

        let mut slots = vec![FrameSlot::Free; count];
        slots[..reserved].fill(FrameSlot::Reserved);

        Self {
            base: first.frame(),
            slots,
            reserved,
        }
    }

    fn index_of(&self, pa: PhysicalAddress) -> Option<usize> {
        if !pa.is_page_aligned() {
            return None;
        }
        let n = pa.frame().number().checked_sub(self.base.number())? as usize;
        (n < self.slots.len()).then_some(n)
    }

    fn address_of(&self, index: usize) -> PhysicalAddress {
        // Slot indices never exceed the u32 frame-number space they were built from.
        #[allow(clippy::cast_possible_truncation)]
        let offset = index as u32;
        self.base.add_frames(offset).base()
    }

    /// First-fit scan for `n` free frames, starting after the reserved slots.
    fn find_run(&self, n: usize) -> Option<usize> {
        let mut start = self.reserved;
        while start + n <= self.slots.len() {
            match self.slots[start..start + n]
                .iter()
                .rposition(|slot| !slot.is_free())
            {
                None => return Some(start),
                Some(taken) => start += taken + 1,
            }
        }
        None
    }

    fn mark(&mut self, start: usize, n: u32) {
        #[allow(clippy::cast_possible_truncation)]
        let head = start as u32;
        self.slots[start] = FrameSlot::Head { run_length: n };
        self.slots[start + 1..start + n as usize].fill(FrameSlot::Tail { head });
    }

    fn clear(&mut self, start: usize) -> Option<u32> {
        let FrameSlot::Head { run_length } = self.slots[start] else {
            return None;
        };
        self.slots[start..start + run_length as usize].fill(FrameSlot::Free);
        Some(run_length)
    }

    fn stats(&self) -> FrameStats {
        let mut stats = FrameStats::default();
        for slot in &self.slots {
            match slot {
                FrameSlot::Free => stats.free += 1,
                FrameSlot::Reserved => stats.reserved += 1,
                FrameSlot::Head { .. } | FrameSlot::Tail { .. } => stats.used += 1,
            }
        }
        stats.managed = stats.free + stats.reserved + stats.used;
        stats
    }
}

enum State {
    Bootstrap(StealMem),
    Ready(FrameTable),
}

/// The system's physical frame allocator.
///
/// All bookkeeping sits behind one [`SpinLock`] that is held only for the
/// scan-and-mark or the clear; callers zero or copy frames after the call
/// returns.
pub struct FrameAllocator {
    state: SpinLock<State>,
    /// Start of free memory at power-on; everything below it up to here was stolen.
    origin: PhysicalAddress,
}

impl FrameAllocator {
    /// An allocator in bootstrap mode over the RAM described by `config`.
    #[must_use]
    pub fn new(config: &MachineConfig) -> Self {
        Self::with_region(
            PhysicalAddress::new(config.first_free()),
            PhysicalAddress::new(config.ram_size()),
        )
    }

    /// An allocator in bootstrap mode over the free region `[first, last)`.
    #[must_use]
    pub fn with_region(first: PhysicalAddress, last: PhysicalAddress) -> Self {
        let steal = StealMem::new(first, last);
        Self {
            origin: steal.remaining().0,
            state: SpinLock::new(State::Bootstrap(steal)),
        }
    }

    /// Builds the frame table over whatever the bootstrap allocator has left.
    ///
    /// Returns `false` (and changes nothing) if the table already exists.
    pub fn bootstrap(&self) -> bool {
        let mut state = self.state.lock();
        let State::Bootstrap(steal) = &*state else {
            warn!("frame allocator already bootstrapped");
            return false;
        };

        let (first, last) = steal.remaining();
        let table = FrameTable::new(first, last);
        info!(
            "frame table: {} frames at {first}..{last}, {} reserved for bookkeeping",
            table.slots.len(),
            table.reserved
        );
        *state = State::Ready(table);
        true
    }

    #[must_use]
    pub fn is_bootstrapped(&self) -> bool {
        matches!(&*self.state.lock(), State::Ready(_))
    }

    /// Allocates `npages` physically contiguous frames.
    ///
    /// # Errors
    /// - [`FrameAllocError::InvalidRequest`] for `npages == 0`.
    /// - [`FrameAllocError::OutOfMemory`] if no free run of that length exists.
    pub fn allocate(&self, npages: u32) -> Result<PhysicalAddress, FrameAllocError> {
        if npages == 0 {
            return Err(FrameAllocError::InvalidRequest);
        }
        let oom = FrameAllocError::OutOfMemory { requested: npages };

        let mut state = self.state.lock();
        match &mut *state {
            State::Bootstrap(steal) => {
                let pa = steal.steal(npages).ok_or(oom)?;
                trace!("stole {npages} frame(s) at {pa}");
                Ok(pa)
            }
            State::Ready(table) => {
                let start = table.find_run(npages as usize).ok_or(oom)?;
                table.mark(start, npages);
                let pa = table.address_of(start);
                trace!("allocated {npages} frame(s) at {pa}");
                Ok(pa)
            }
        }
    }

    /// Releases the run starting at `pa`; returns the number of frames freed.
    ///
    /// # Errors
    /// [`FrameAllocError::NotAllocated`] if `pa` is not the head of a live run.
    /// This includes memory handed out before bootstrap, which is never reclaimed.
    pub fn release(&self, pa: PhysicalAddress) -> Result<u32, FrameAllocError> {
        let mut state = self.state.lock();
        let State::Ready(table) = &mut *state else {
            debug!("ignoring release of {pa} before bootstrap");
            return Err(FrameAllocError::NotAllocated(pa));
        };

        let freed = table
            .index_of(pa)
            .and_then(|index| table.clear(index))
            .ok_or(FrameAllocError::NotAllocated(pa))?;
        trace!("released {freed} frame(s) at {pa}");
        Ok(freed)
    }

    /// Length of the live run starting at `pa`, if there is one.
    #[must_use]
    pub fn run_length(&self, pa: PhysicalAddress) -> Option<u32> {
        match &*self.state.lock() {
            State::Ready(table) => match table.slots[table.index_of(pa)?] {
                FrameSlot::Head { run_length } => Some(run_length),
                _ => None,
            },
            State::Bootstrap(_) => None,
        }
    }

    /// Slot state of the frame containing `pa`, if it is managed.
    #[must_use]
    pub fn slot(&self, pa: PhysicalAddress) -> Option<FrameSlot> {
        match &*self.state.lock() {
            State::Ready(table) => Some(table.slots[table.index_of(pa.align_down())?]),
            State::Bootstrap(_) => None,
        }
    }

    #[must_use]
    pub fn stats(&self) -> FrameStats {
        match &*self.state.lock() {
            State::Ready(table) => FrameStats {
                stolen: (table.base.base().as_u32() - self.origin.as_u32()) / PAGE_SIZE,
                ..table.stats()
            },
            State::Bootstrap(steal) => FrameStats {
                free: steal.frames_left(),
                stolen: (steal.remaining().0.as_u32() - self.origin.as_u32()) / PAGE_SIZE,
                ..FrameStats::default()
            },
        }
    }
}

impl core::fmt::Debug for FrameAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameAllocator")
            .field("bootstrapped", &self.is_bootstrapped())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(frames: u32) -> FrameAllocator {
        let alloc =
            FrameAllocator::with_region(PhysicalAddress::zero(), PhysicalAddress::new(frames * PAGE_SIZE));
        assert!(alloc.bootstrap());
        alloc
    }

    #[test]
    fn table_storage_is_reserved_up_front() {
        let alloc = ready(16);
        let stats = alloc.stats();
        assert_eq!(stats.managed, 16);
        assert_eq!(stats.reserved, 1);
        assert_eq!(alloc.slot(PhysicalAddress::zero()), Some(FrameSlot::Reserved));
        // First allocation lands right after the table.
        assert_eq!(alloc.allocate(1), Ok(PhysicalAddress::new(PAGE_SIZE)));
    }

    #[test]
    fn runs_record_head_and_tails() {
        let alloc = ready(16);
        let pa = alloc.allocate(3).unwrap();
        assert_eq!(alloc.run_length(pa), Some(3));
        assert_eq!(alloc.slot(pa + PAGE_SIZE), Some(FrameSlot::Tail { head: 1 }));
        assert_eq!(alloc.slot(pa + 2 * PAGE_SIZE + 5), Some(FrameSlot::Tail { head: 1 }));
        assert_eq!(alloc.stats().used, 3);
    }

    #[test]
    fn first_fit_skips_holes_that_are_too_small() {
        let alloc = ready(16);
        let a = alloc.allocate(1).unwrap();
        let b = alloc.allocate(2).unwrap();
        let _c = alloc.allocate(1).unwrap();
        alloc.release(a).unwrap();
        alloc.release(b).unwrap();

        // The freed a+b hole has room for three frames.
        assert_eq!(alloc.allocate(3), Ok(a));
        let d = alloc.allocate(2).unwrap();
        assert!(d > b);
    }

    #[test]
    fn release_frees_exactly_the_run() {
        let alloc = ready(8);
        let a = alloc.allocate(4).unwrap();
        let b = alloc.allocate(2).unwrap();
        assert_eq!(alloc.release(a), Ok(4));
        assert_eq!(alloc.run_length(b), Some(2));
        assert_eq!(alloc.stats().free, 8 - 1 - 2);
    }

    #[test]
    fn release_rejects_tails_free_frames_and_foreign_addresses() {
        let alloc = ready(8);
        let a = alloc.allocate(2).unwrap();
        let tail = a + PAGE_SIZE;
        assert_eq!(alloc.release(tail), Err(FrameAllocError::NotAllocated(tail)));
        assert_eq!(alloc.release(a + 1), Err(FrameAllocError::NotAllocated(a + 1)));
        let beyond = PhysicalAddress::new(64 * PAGE_SIZE);
        assert_eq!(alloc.release(beyond), Err(FrameAllocError::NotAllocated(beyond)));
        let table = PhysicalAddress::zero();
        assert_eq!(alloc.release(table), Err(FrameAllocError::NotAllocated(table)));

        alloc.release(a).unwrap();
        assert_eq!(alloc.release(a), Err(FrameAllocError::NotAllocated(a)));
    }

    #[test]
    fn out_of_memory_leaves_table_untouched() {
        let alloc = ready(4);
        let before = alloc.stats();
        assert_eq!(
            alloc.allocate(4),
            Err(FrameAllocError::OutOfMemory { requested: 4 })
        );
        assert_eq!(alloc.stats(), before);
        assert!(alloc.allocate(3).is_ok());
    }

    #[test]
    fn zero_frames_is_invalid() {
        let alloc = ready(4);
        assert_eq!(alloc.allocate(0), Err(FrameAllocError::InvalidRequest));
    }

    #[test]
    fn bootstrap_mode_steals_and_cannot_release() {
        let alloc =
            FrameAllocator::with_region(PhysicalAddress::new(0x2000), PhysicalAddress::new(0x10000));
        let early = alloc.allocate(2).unwrap();
        assert_eq!(early, PhysicalAddress::new(0x2000));
        assert_eq!(alloc.release(early), Err(FrameAllocError::NotAllocated(early)));

        assert!(alloc.bootstrap());
        assert!(!alloc.bootstrap());

        // Stolen frames stay out of the table for good.
        assert_eq!(alloc.stats().stolen, 2);
        assert_eq!(alloc.slot(early), None);
        assert_eq!(alloc.release(early), Err(FrameAllocError::NotAllocated(early)));
        assert!(alloc.allocate(1).unwrap() >= PhysicalAddress::new(0x4000));
    }
}
