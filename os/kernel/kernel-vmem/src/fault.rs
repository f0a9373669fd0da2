use crate::segment::SegmentKind;
use crate::tlb::{EntryHi, EntryLo};
use crate::{AddressSpace, Vm, VmError};
use kernel_alloc::PhysMapper;
use kernel_info::abi::fault::{VM_FAULT_READ, VM_FAULT_READONLY, VM_FAULT_WRITE};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::IrqGuard;
use log::{debug, trace};

/// Why the MMU trapped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// Load from a page with no TLB entry.
    Read,
    /// Store to a page with no TLB entry.
    Write,
    /// Store to a page whose TLB entry is read-only.
    ReadOnly,
}

impl TryFrom<u32> for FaultKind {
    type Error = VmError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            VM_FAULT_READ => Ok(Self::Read),
            VM_FAULT_WRITE => Ok(Self::Write),
            VM_FAULT_READONLY => Ok(Self::ReadOnly),
            _ => Err(VmError::InvalidArgument),
        }
    }
}

impl From<FaultKind> for u32 {
    fn from(kind: FaultKind) -> Self {
        match kind {
            FaultKind::Read => VM_FAULT_READ,
            FaultKind::Write => VM_FAULT_WRITE,
            FaultKind::ReadOnly => VM_FAULT_READONLY,
        }
    }
}

/// Services a TLB miss at `addr` in `space`.
///
/// Looks up the segment and page-table entry for `addr` and writes the
/// mapping into the TLB with interrupts disabled. Code pages of a finalized
/// address space are installed without the dirty bit. Returns the TLB slot
/// that was written.
///
/// # Errors
/// - [`VmError::BadAddress`] if there is no current address space, whatever
///   the fault kind.
/// - [`VmError::IllegalModification`] for a write to a read-only page; the
///   caller is expected to kill the process.
/// - [`VmError::BadAddress`] if `addr` lies outside every segment or its page
///   has no frame.
pub fn handle_fault<M: PhysMapper>(
    vm: &Vm<M>,
    space: Option<&AddressSpace>,
    kind: FaultKind,
    addr: VirtualAddress,
) -> Result<usize, VmError> {
    // Kernel threads and processes that are being torn down have no address space.
    let space = space.ok_or(VmError::BadAddress(addr))?;

    if kind == FaultKind::ReadOnly {
        debug!("vm_fault: write to read-only page at {addr}");
        return Err(VmError::IllegalModification(addr));
    }

    let _irq = IrqGuard::new(vm.cpu());
    let (segment, frame) = space.resolve(vm, addr)?;
    let writable = !(segment == SegmentKind::Code && space.code_finalized());

    let hi = EntryHi::for_page(addr.page());
    let lo = EntryLo::mapping(frame, writable);
    let slot = vm.with_tlb(|tlb| tlb.install(hi, lo));
    trace!("vm_fault: {kind:?} {addr} -> {frame} ({segment}) in slot {slot}");
    Ok(slot)
}

/// Entry point used by the trap layer, which passes the raw fault code.
///
/// # Errors
/// [`VmError::InvalidArgument`] for an unknown fault code; otherwise see
/// [`handle_fault`].
pub fn vm_fault<M: PhysMapper>(
    vm: &Vm<M>,
    space: Option<&AddressSpace>,
    fault_type: u32,
    addr: VirtualAddress,
) -> Result<usize, VmError> {
    let kind = FaultKind::try_from(fault_type)?;
    handle_fault(vm, space, kind, addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Access;
    use kernel_info::config::MachineConfig;
    use kernel_info::memory::USER_STACK_TOP;
    use kernel_memory_addresses::PAGE_SIZE;

    const CODE: VirtualAddress = VirtualAddress::new(0x0040_0000);

    fn setup() -> (Vm, AddressSpace) {
        let vm = Vm::new(&MachineConfig::default().with_ram_bytes(64 * PAGE_SIZE));
        vm.bootstrap();
        let mut space = AddressSpace::new();
        space.define_region(CODE, PAGE_SIZE, Access::READ | Access::EXECUTE).unwrap();
        space.prepare_load(&vm).unwrap();
        (vm, space)
    }

    #[test]
    fn raw_fault_codes() {
        assert_eq!(FaultKind::try_from(0), Ok(FaultKind::Read));
        assert_eq!(FaultKind::try_from(1), Ok(FaultKind::Write));
        assert_eq!(FaultKind::try_from(2), Ok(FaultKind::ReadOnly));
        assert_eq!(FaultKind::try_from(3), Err(VmError::InvalidArgument));
        assert_eq!(u32::from(FaultKind::ReadOnly), 2);
    }

    #[test]
    fn readonly_fault_is_an_illegal_modification() {
        let (vm, space) = setup();
        assert_eq!(
            handle_fault(&vm, Some(&space), FaultKind::ReadOnly, CODE),
            Err(VmError::IllegalModification(CODE))
        );
        assert_eq!(vm.with_tlb(|t| t.valid_entries()), 0);
        space.destroy(&vm);
    }

    #[test]
    fn readonly_fault_without_address_space_is_a_bad_address() {
        let (vm, space) = setup();
        assert_eq!(
            vm_fault(&vm, None, VM_FAULT_READONLY, CODE),
            Err(VmError::BadAddress(CODE))
        );
        space.destroy(&vm);
    }

    #[test]
    fn no_address_space_is_a_bad_address() {
        let (vm, space) = setup();
        assert_eq!(
            vm_fault(&vm, None, VM_FAULT_READ, CODE),
            Err(VmError::BadAddress(CODE))
        );
        space.destroy(&vm);
    }

    #[test]
    fn miss_installs_translation_and_restores_interrupts() {
        let (vm, space) = setup();
        let va = USER_STACK_TOP - 4;
        vm_fault(&vm, Some(&space), VM_FAULT_WRITE, va).unwrap();
        assert!(vm.cpu().enabled());

        let pa = vm.with_tlb(|t| t.access(va, true)).unwrap();
        assert_eq!(pa, space.translate(&vm, va).unwrap());
        space.destroy(&vm);
    }

    #[test]
    fn code_is_writable_until_load_completes() {
        let (vm, mut space) = setup();
        handle_fault(&vm, Some(&space), FaultKind::Write, CODE).unwrap();
        assert!(vm.with_tlb(|t| t.access(CODE, true)).is_ok());

        space.complete_load(&vm);
        assert_eq!(vm.with_tlb(|t| t.valid_entries()), 0);
        handle_fault(&vm, Some(&space), FaultKind::Read, CODE).unwrap();
        assert!(vm.with_tlb(|t| t.access(CODE, false)).is_ok());
        assert_eq!(
            vm.with_tlb(|t| t.access(CODE, true)).map_err(|e| e.fault_kind()),
            Err(FaultKind::ReadOnly)
        );
        space.destroy(&vm);
    }

    #[test]
    fn addresses_outside_segments_are_rejected() {
        let (vm, space) = setup();
        let hole = VirtualAddress::new(0x0050_0000);
        assert_eq!(
            handle_fault(&vm, Some(&space), FaultKind::Read, hole),
            Err(VmError::BadAddress(hole))
        );
        space.destroy(&vm);
    }
}
