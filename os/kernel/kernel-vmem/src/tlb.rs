//! Software model of the R3000 TLB.
//!
//! Sixty-four fully associative entries, each an [`EntryHi`]/[`EntryLo`] pair.
//! The kernel only ever writes entries with interrupts disabled; see
//! [`Vm::with_tlb`](crate::Vm::with_tlb).

use crate::fault::FaultKind;
use bitfield_struct::bitfield;
use kernel_info::memory::NUM_TLB;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};

/// Virtual half of a TLB entry.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryHi {
    /// Bits 0–5 — unused.
    #[bits(6, default = 0)]
    _reserved_0_5: u8,

    /// Bits 6–11 — address-space id. Always 0; the TLB is flushed on switch.
    #[bits(6)]
    pub asid: u8,

    /// Bits 12–31 — virtual page number.
    #[bits(20)]
    pub vpn: u32,
}

/// Physical half of a TLB entry.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryLo {
    /// Bits 0–7 — unused.
    #[bits(8, default = 0)]
    _reserved_0_7: u8,

    /// Bit 8 — global: ignore the ASID when matching.
    pub global: bool,

    /// Bit 9 — valid: the entry may be used for translation.
    pub valid: bool,

    /// Bit 10 — dirty: writes are permitted. Clear means read-only.
    pub dirty: bool,

    /// Bit 11 — uncached.
    pub nocache: bool,

    /// Bits 12–31 — physical frame number.
    #[bits(20)]
    pub pfn: u32,
}

impl EntryHi {
    /// Entry matching `page`.
    #[must_use]
    pub const fn for_page(page: VirtualPage) -> Self {
        Self::new().with_vpn(page.number())
    }

    /// The conventional invalid value for slot `index`: a kseg0 page that can
    /// never match a user address, distinct per slot.
    #[must_use]
    pub const fn invalid(index: usize) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let vpn = 0x80000 + index as u32;
        Self::new().with_vpn(vpn)
    }

    #[must_use]
    pub const fn page(self) -> VirtualPage {
        VirtualPage::from_number(self.vpn())
    }
}

impl EntryLo {
    /// A valid mapping of `frame`; `writable` sets the dirty bit.
    #[must_use]
    pub const fn mapping(frame: PhysicalPage, writable: bool) -> Self {
        Self::new()
            .with_pfn(frame.number())
            .with_valid(true)
            .with_dirty(writable)
    }

    #[must_use]
    pub const fn frame(self) -> PhysicalPage {
        PhysicalPage::from_number(self.pfn())
    }
}

/// Exceptions raised by a simulated user access.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TlbException {
    /// No valid entry matched (`TLBL` / `TLBS`).
    Miss { write: bool },
    /// A write hit an entry whose dirty bit is clear (`Mod`).
    Modified,
}

impl TlbException {
    /// The fault kind the trap layer reports for this exception.
    #[must_use]
    pub const fn fault_kind(self) -> FaultKind {
        match self {
            Self::Miss { write: false } => FaultKind::Read,
            Self::Miss { write: true } => FaultKind::Write,
            Self::Modified => FaultKind::ReadOnly,
        }
    }
}

#[derive(Debug)]
pub struct Tlb {
    entries: [(EntryHi, EntryLo); NUM_TLB],
    /// State of the pseudo-random victim selector (the `Random` register).
    random: u32,
}

impl Tlb {
    /// A TLB with every slot invalid.
    #[must_use]
    pub const fn new(seed: u32) -> Self {
        let mut entries = [(EntryHi::new(), EntryLo::new()); NUM_TLB];
        let mut i = 0;
        while i < NUM_TLB {
            entries[i].0 = EntryHi::invalid(i);
            i += 1;
        }
        Self {
            entries,
            // xorshift must not start at zero
            random: if seed == 0 { 0x9E37_79B9 } else { seed },
        }
    }

    #[must_use]
    pub const fn read(&self, index: usize) -> (EntryHi, EntryLo) {
        self.entries[index]
    }

    pub const fn write(&mut self, index: usize, hi: EntryHi, lo: EntryLo) {
        self.entries[index] = (hi, lo);
    }

    /// Slot whose `EntryHi` matches the page of `hi`, valid or not.
    #[must_use]
    pub fn probe(&self, hi: EntryHi) -> Option<usize> {
        self.entries.iter().position(|(h, _)| h.vpn() == hi.vpn())
    }

    /// Next value of the `Random` register.
    pub const fn random_index(&mut self) -> usize {
        let mut x = self.random;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.random = x;
        x as usize % NUM_TLB
    }

    /// Writes the mapping into the slot already holding its page, else the
    /// first invalid slot, else a random victim. Returns the slot used.
    pub fn install(&mut self, hi: EntryHi, lo: EntryLo) -> usize {
        let index = self
            .probe(hi)
            .or_else(|| self.entries.iter().position(|(_, l)| !l.valid()))
            .unwrap_or_else(|| self.random_index());
        self.write(index, hi, lo);
        index
    }

    /// Invalidates every slot.
    pub fn invalidate_all(&mut self) {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            *entry = (EntryHi::invalid(i), EntryLo::new());
        }
    }

    /// Invalidates the slot holding `page`, if any.
    pub fn invalidate_page(&mut self, page: VirtualPage) {
        if let Some(i) = self.probe(EntryHi::for_page(page)) {
            self.write(i, EntryHi::invalid(i), EntryLo::new());
        }
    }

    /// Number of slots currently holding a valid mapping.
    #[must_use]
    pub fn valid_entries(&self) -> usize {
        self.entries.iter().filter(|(_, lo)| lo.valid()).count()
    }

    /// What the MMU does on a user access to `va`.
    ///
    /// # Errors
    /// The exception the access would raise.
    pub fn access(&self, va: VirtualAddress, write: bool) -> Result<PhysicalAddress, TlbException> {
        let vpn = va.page().number();
        let (_, lo) = self
            .entries
            .iter()
            .find(|(hi, lo)| hi.vpn() == vpn && lo.valid())
            .ok_or(TlbException::Miss { write })?;
        if write && !lo.dirty() {
            return Err(TlbException::Modified);
        }
        Ok(lo.frame().base() + va.offset())
    }
}
