use kernel_alloc::{FrameAllocError, FrameAllocator, PhysMapper, Ram};
use kernel_info::config::MachineConfig;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

fn machine(frames: u32) -> (MachineConfig, FrameAllocator) {
    let cfg = MachineConfig::default()
        .with_ram_bytes(frames * PAGE_SIZE)
        .with_kernel_image_bytes(PAGE_SIZE);
    let alloc = FrameAllocator::new(&cfg);
    assert!(alloc.bootstrap());
    (cfg, alloc)
}

#[test]
fn concurrent_runs_never_overlap() {
    let (_, alloc) = machine(256);
    let alloc = Arc::new(alloc);
    let threads = 6;
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let alloc = Arc::clone(&alloc);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                let mut held = Vec::new();
                for i in 0..200_u32 {
                    let n = 1 + (i + t as u32) % 3;
                    if let Ok(pa) = alloc.allocate(n) {
                        held.push((pa, n));
                    }
                    if i % 4 == 3 {
                        if let Some((pa, n)) = held.pop() {
                            assert_eq!(alloc.release(pa), Ok(n));
                        }
                    }
                }
                held
            })
        })
        .collect();

    let mut owned = BTreeSet::new();
    for h in handles {
        for (pa, n) in h.join().unwrap() {
            for k in 0..n {
                let frame = pa.as_u32() / PAGE_SIZE + k;
                assert!(owned.insert(frame), "frame {frame} handed out twice");
            }
        }
    }
    assert_eq!(alloc.stats().used as usize, owned.len());
}

#[test]
fn released_run_is_reusable_for_the_same_size() {
    let (_, alloc) = machine(32);
    let mut runs = Vec::new();
    while let Ok(pa) = alloc.allocate(5) {
        runs.push(pa);
    }
    assert!(matches!(
        alloc.allocate(5),
        Err(FrameAllocError::OutOfMemory { requested: 5 })
    ));

    let victim = runs[1];
    alloc.release(victim).unwrap();
    assert_eq!(alloc.allocate(5), Ok(victim));
}

#[test]
fn allocator_and_ram_agree_on_geometry() {
    let (cfg, alloc) = machine(16);
    let ram = Ram::new(&cfg);
    let pa = alloc.allocate(1).unwrap();
    assert!(pa >= PhysicalAddress::new(cfg.first_free()));
    ram.with_frame_mut(pa.frame(), |bytes| bytes[10] = 7);
    assert_eq!(ram.with_frame(pa.frame(), |bytes| bytes[10]), 7);
}
