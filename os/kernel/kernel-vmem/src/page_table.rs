//! Software page tables.
//!
//! A [`PageTable`] is a flat array of 32-bit [`PageTableEntry`] words, one per
//! page of a segment. The array lives in frames taken from the frame
//! allocator, so a page table costs physical memory like everything else.
//! Words are stored big-endian, the byte order of the simulated machine.

use crate::{Vm, VmError};
use bitfield_struct::bitfield;
use kernel_alloc::PhysMapper;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};
use log::warn;

/// Bytes per page-table entry.
const PTE_SIZE: u32 = 4;

/// One page-table entry.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    /// Bit 0 — the page has a frame attached.
    pub valid: bool,

    /// Bits 1–11 — unused.
    #[bits(11, default = 0)]
    _reserved_1_11: u16,

    /// Bits 12–31 — physical frame number.
    #[bits(20)]
    pub pfn: u32,
}

impl PageTableEntry {
    #[must_use]
    pub const fn mapping(frame: PhysicalPage) -> Self {
        Self::new().with_valid(true).with_pfn(frame.number())
    }

    /// The attached frame, if any.
    #[must_use]
    pub const fn frame(self) -> Option<PhysicalPage> {
        if self.valid() {
            Some(PhysicalPage::from_number(self.pfn()))
        } else {
            None
        }
    }
}

/// Page table of one segment.
#[derive(Debug)]
pub struct PageTable {
    /// First frame of the entry array, once allocated.
    storage: Option<PhysicalAddress>,
    entries: u32,
}

impl PageTable {
    /// A table for `entries` pages with no storage yet.
    #[must_use]
    pub const fn new(entries: u32) -> Self {
        Self {
            storage: None,
            entries,
        }
    }

    #[must_use]
    pub const fn len(&self) -> u32 {
        self.entries
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries == 0
    }

    #[must_use]
    pub const fn storage(&self) -> Option<PhysicalAddress> {
        self.storage
    }

    /// Frames needed to hold `entries` words.
    #[must_use]
    pub const fn storage_frames(entries: u32) -> u32 {
        (entries * PTE_SIZE).div_ceil(PAGE_SIZE)
    }

    /// Takes zeroed storage for the entry array from the frame allocator.
    /// Does nothing if the table is empty or already has storage.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if no run of frames is free.
    pub fn allocate<M: PhysMapper>(&mut self, vm: &Vm<M>) -> Result<(), VmError> {
        if self.storage.is_some() || self.entries == 0 {
            return Ok(());
        }
        let frames = Self::storage_frames(self.entries);
        let pa = vm.alloc_kpages(frames)?;
        for i in 0..frames {
            vm.mem().zero_frame(pa.frame().add_frames(i));
        }
        self.storage = Some(pa);
        Ok(())
    }

    fn locate(&self, index: u32) -> Option<(PhysicalPage, usize)> {
        if index >= self.entries {
            return None;
        }
        let storage = self.storage?;
        let byte = index * PTE_SIZE;
        Some((
            storage.frame().add_frames(byte / PAGE_SIZE),
            (byte % PAGE_SIZE) as usize,
        ))
    }

    /// Entry `index`; invalid if out of range or not yet allocated.
    #[must_use]
    pub fn get<M: PhysMapper>(&self, mem: &M, index: u32) -> PageTableEntry {
        let Some((frame, offset)) = self.locate(index) else {
            return PageTableEntry::new();
        };
        mem.with_frame(frame, |bytes| {
            let mut word = [0u8; PTE_SIZE as usize];
            word.copy_from_slice(&bytes[offset..offset + PTE_SIZE as usize]);
            PageTableEntry::from_bits(u32::from_be_bytes(word))
        })
    }

    /// Stores entry `index`.
    ///
    /// # Errors
    /// [`VmError::InvalidArgument`] if `index` is out of range or the table
    /// has no storage.
    pub fn set<M: PhysMapper>(
        &self,
        mem: &M,
        index: u32,
        entry: PageTableEntry,
    ) -> Result<(), VmError> {
        let (frame, offset) = self.locate(index).ok_or(VmError::InvalidArgument)?;
        mem.with_frame_mut(frame, |bytes| {
            bytes[offset..offset + PTE_SIZE as usize]
                .copy_from_slice(&entry.into_bits().to_be_bytes());
        });
        Ok(())
    }

    /// Iterates over the attached frames, in page order.
    pub fn frames<'a, M: PhysMapper>(
        &'a self,
        mem: &'a M,
    ) -> impl Iterator<Item = (u32, PhysicalPage)> + 'a {
        (0..self.entries).filter_map(move |i| self.get(mem, i).frame().map(|f| (i, f)))
    }

    /// Releases every attached frame, then the entry array itself.
    pub fn release<M: PhysMapper>(&mut self, vm: &Vm<M>) {
        let Some(storage) = self.storage else {
            return;
        };
        for i in 0..self.entries {
            if let Some(frame) = self.get(vm.mem(), i).frame() {
                if let Err(e) = vm.frames().release(frame.base()) {
                    warn!("page table entry {i}: {e}");
                }
            }
        }
        vm.free_kpages(storage);
        self.storage = None;
    }
}
