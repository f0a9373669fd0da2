use kernel_info::config::MachineConfig;
use kernel_info::memory::{NUM_TLB, STACK_PAGES, USER_STACK_BASE, USER_STACK_TOP};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_vmem::{
    Access, AddressSpace, FaultKind, SegmentKind, TlbException, Vm, VmError, handle_fault,
};
use std::sync::{Arc, Barrier};
use std::thread;

const TEXT: VirtualAddress = VirtualAddress::new(0x0040_0000);
const DATA: VirtualAddress = VirtualAddress::new(0x1000_0000);

fn machine(frames: u32) -> Vm {
    let vm = Vm::new(
        &MachineConfig::default()
            .with_ram_bytes(frames * PAGE_SIZE)
            .with_kernel_image_bytes(PAGE_SIZE),
    );
    vm.bootstrap();
    vm
}

fn program(vm: &Vm, text_pages: u32, data_pages: u32) -> AddressSpace {
    let mut space = AddressSpace::new();
    space
        .define_region(TEXT, text_pages * PAGE_SIZE, Access::READ | Access::EXECUTE)
        .unwrap();
    space
        .define_region(DATA, data_pages * PAGE_SIZE, Access::READ | Access::WRITE)
        .unwrap();
    space.prepare_load(vm).unwrap();
    space
}

#[test]
fn every_page_of_every_segment_resolves_after_prepare() {
    let vm = machine(128);
    let space = program(&vm, 4, 2);
    for segment in space.segments() {
        for page in 0..segment.pages() {
            let va = segment.base() + page * PAGE_SIZE;
            let slot = handle_fault(&vm, Some(&space), FaultKind::Read, va).unwrap();
            assert!(slot < NUM_TLB);
        }
    }
    assert_eq!(
        vm.with_tlb(|t| t.valid_entries()),
        (4 + 2 + STACK_PAGES) as usize
    );
    space.destroy(&vm);
}

#[test]
fn segments_are_listed_code_data_stack() {
    let vm = machine(128);
    let space = program(&vm, 1, 1);
    let kinds: Vec<_> = space.segments().map(|s| s.kind()).collect();
    assert_eq!(kinds, [SegmentKind::Code, SegmentKind::Data, SegmentKind::Stack]);
    assert_eq!(space.segment(SegmentKind::Stack).unwrap().base(), USER_STACK_BASE);
    space.destroy(&vm);
}

#[test]
fn more_pages_than_tlb_slots_still_fault_in() {
    let vm = machine(256);
    let space = program(&vm, 80, 1);
    for page in 0..80 {
        handle_fault(&vm, Some(&space), FaultKind::Read, TEXT + page * PAGE_SIZE).unwrap();
    }
    assert_eq!(vm.with_tlb(|t| t.valid_entries()), NUM_TLB);
    let last = TEXT + 79 * PAGE_SIZE;
    assert!(vm.with_tlb(|t| t.access(last, false)).is_ok());
    space.destroy(&vm);
}

#[test]
fn fork_style_copies_diverge() {
    let vm = machine(160);
    let parent = program(&vm, 2, 1);
    parent.write(&vm, DATA, &7_u32.to_be_bytes()).unwrap();

    let children: Vec<_> = (0..3).map(|_| parent.copy(&vm).unwrap()).collect();
    for (i, child) in children.iter().enumerate() {
        let value = u32::try_from(i).unwrap() + 100;
        child.write(&vm, DATA, &value.to_be_bytes()).unwrap();
    }

    let mut word = [0u8; 4];
    parent.read(&vm, DATA, &mut word).unwrap();
    assert_eq!(u32::from_be_bytes(word), 7);
    for (i, child) in children.iter().enumerate() {
        child.read(&vm, DATA, &mut word).unwrap();
        assert_eq!(u32::from_be_bytes(word), u32::try_from(i).unwrap() + 100);
    }

    let before = vm.frames().stats().free;
    for child in children {
        child.destroy(&vm);
    }
    assert_eq!(vm.frames().stats().free, before + 3 * (2 + 1 + STACK_PAGES + 3));
    parent.destroy(&vm);
}

#[test]
fn completing_the_load_drops_only_code_translations() {
    let vm = machine(128);
    let mut space = program(&vm, 2, 1);
    for va in [TEXT, TEXT + PAGE_SIZE, DATA] {
        handle_fault(&vm, Some(&space), FaultKind::Write, va).unwrap();
    }
    assert!(vm.with_tlb(|t| t.access(TEXT, true)).is_ok());

    space.complete_load(&vm);
    assert_eq!(vm.with_tlb(|t| t.valid_entries()), 1);
    assert!(vm.with_tlb(|t| t.access(DATA, true)).is_ok());
    assert_eq!(
        vm.with_tlb(|t| t.access(TEXT, true)),
        Err(TlbException::Miss { write: true })
    );

    handle_fault(&vm, Some(&space), FaultKind::Write, TEXT).unwrap();
    assert_eq!(
        vm.with_tlb(|t| t.access(TEXT, true)),
        Err(TlbException::Modified)
    );
    space.destroy(&vm);
}

#[test]
fn completing_a_large_code_load_flushes_everything() {
    let vm = machine(256);
    let mut space = program(&vm, 80, 1);
    handle_fault(&vm, Some(&space), FaultKind::Write, DATA).unwrap();
    handle_fault(&vm, Some(&space), FaultKind::Write, TEXT).unwrap();
    space.complete_load(&vm);
    assert_eq!(vm.with_tlb(|t| t.valid_entries()), 0);
    space.destroy(&vm);
}

#[test]
#[should_panic(expected = "tlb shootdown")]
fn tlb_shootdown_is_unsupported() {
    let vm = machine(16);
    vm.tlb_shootdown();
}

#[test]
fn region_ending_at_the_top_of_memory_is_accepted() {
    let mut space = AddressSpace::new();
    assert_eq!(
        space.define_region(VirtualAddress::new(0xFFFF_F000), PAGE_SIZE, Access::READ),
        Ok(())
    );
    assert_eq!(
        space.define_region(VirtualAddress::new(0xFFFF_F000), 2 * PAGE_SIZE, Access::READ),
        Err(VmError::BadAddress(VirtualAddress::new(0xFFFF_F000)))
    );
}

#[test]
fn concurrent_address_spaces_share_the_allocator() {
    let vm = Arc::new(machine(512));
    let free = vm.frames().stats().free;
    let threads = 4;
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let vm = Arc::clone(&vm);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for round in 0..10_u32 {
                    let space = program(&vm, 2, 1);
                    let tag = (u32::try_from(t).unwrap() << 16) | round;
                    space.write(&vm, USER_STACK_TOP - 4, &tag.to_be_bytes()).unwrap();
                    let copy = space.copy(&vm).unwrap();
                    let mut word = [0u8; 4];
                    copy.read(&vm, USER_STACK_TOP - 4, &mut word).unwrap();
                    assert_eq!(u32::from_be_bytes(word), tag);
                    copy.destroy(&vm);
                    space.destroy(&vm);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(vm.frames().stats().free, free);
}
