use crate::page_table::{PageTable, PageTableEntry};
use crate::{Vm, VmError};
use core::fmt;
use kernel_alloc::PhysMapper;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage, VirtualAddress, VirtualPage};

/// Role of a segment within an address space.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SegmentKind {
    Code,
    Data,
    Stack,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Code => "code",
            Self::Data => "data",
            Self::Stack => "stack",
        })
    }
}

/// A contiguous run of virtual pages and the page table backing it.
#[derive(Debug)]
pub struct Segment {
    kind: SegmentKind,
    base: VirtualPage,
    pages: u32,
    table: PageTable,
}

impl Segment {
    pub(crate) const fn new(kind: SegmentKind, base: VirtualPage, pages: u32) -> Self {
        Self {
            kind,
            base,
            pages,
            table: PageTable::new(pages),
        }
    }

    /// An unbacked segment with the same kind, base and size.
    pub(crate) const fn same_geometry(&self) -> Self {
        Self::new(self.kind, self.base, self.pages)
    }

    #[must_use]
    pub const fn kind(&self) -> SegmentKind {
        self.kind
    }

    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base.base()
    }

    #[must_use]
    pub const fn pages(&self) -> u32 {
        self.pages
    }

    /// Size in bytes. A segment may reach the top of the 32-bit address
    /// space, so the length can be 4 GiB.
    #[must_use]
    pub fn len(&self) -> u64 {
        u64::from(self.pages) * u64::from(PAGE_SIZE)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pages == 0
    }

    #[must_use]
    pub const fn table(&self) -> &PageTable {
        &self.table
    }

    /// Index of the page holding `va`, if `va` lies inside this segment.
    #[must_use]
    pub fn page_index(&self, va: VirtualAddress) -> Option<u32> {
        let delta = va.as_u32().checked_sub(self.base.base().as_u32())?;
        let index = delta / PAGE_SIZE;
        (index < self.pages).then_some(index)
    }

    #[must_use]
    pub fn contains(&self, va: VirtualAddress) -> bool {
        self.page_index(va).is_some()
    }

    /// Frame backing page `index`, if attached.
    #[must_use]
    pub fn frame<M: PhysMapper>(&self, mem: &M, index: u32) -> Option<PhysicalPage> {
        self.table.get(mem, index).frame()
    }

    /// Whether every page has a frame attached.
    #[must_use]
    pub fn is_backed<M: PhysMapper>(&self, mem: &M) -> bool {
        self.table.storage().is_some() && self.table.frames(mem).count() == self.pages as usize
    }

    /// Attaches a zeroed frame to every page that does not have one yet.
    ///
    /// Stops at the first allocation failure; frames attached so far stay
    /// recorded so that [`release`](Self::release) can give them back.
    pub(crate) fn populate<M: PhysMapper>(&mut self, vm: &Vm<M>) -> Result<(), VmError> {
        self.table.allocate(vm)?;
        for index in 0..self.pages {
            if self.frame(vm.mem(), index).is_some() {
                continue;
            }
            let pa = vm.alloc_kpages(1)?;
            vm.mem().zero_frame(pa.frame());
            self.table
                .set(vm.mem(), index, PageTableEntry::mapping(pa.frame()))?;
        }
        Ok(())
    }

    pub(crate) fn release<M: PhysMapper>(&mut self, vm: &Vm<M>) {
        self.table.release(vm);
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}..+{:#x} ({} pages)",
            self.kind,
            self.base,
            self.len(),
            self.pages
        )
    }
}
