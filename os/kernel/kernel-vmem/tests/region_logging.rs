use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{Access, AddressSpace, SegmentKind};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::sync::Mutex;

/// Formats every record, the way a console logger would, and keeps the lines.
struct Capture {
    lines: Mutex<Vec<String>>,
}

impl Log for Capture {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record<'_>) {
        let line = format!("[{}] {}: {}", record.level(), record.target(), record.args());
        self.lines.lock().unwrap().push(line);
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture {
    lines: Mutex::new(Vec::new()),
};

#[test]
fn region_spanning_the_whole_address_space_is_logged() {
    log::set_logger(&CAPTURE).unwrap();
    log::set_max_level(LevelFilter::Trace);

    let mut space = AddressSpace::new();
    assert_eq!(
        space.define_region(VirtualAddress::new(0), u32::MAX, Access::READ),
        Ok(())
    );

    let code = space.segment(SegmentKind::Code).unwrap();
    assert_eq!(code.pages(), 0x10_0000);
    assert_eq!(code.len(), 0x1_0000_0000);

    let lines = CAPTURE.lines.lock().unwrap();
    assert!(
        lines
            .iter()
            .any(|l| l.contains("as_define_region") && l.contains("0x100000000")),
        "{lines:?}"
    );
}
