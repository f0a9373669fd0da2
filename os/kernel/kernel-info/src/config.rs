//! # Machine Configuration

use kernel_memory_addresses::{PAGE_SIZE, page_round_up};
use log::LevelFilter;

/// Shape of the simulated machine.
///
/// The defaults describe a 2 MiB board with the kernel image occupying the
/// first 64 KiB of RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Installed RAM in bytes. Rounded down to whole pages.
    pub ram_bytes: u32,
    /// Bytes at the bottom of RAM that hold the kernel image and are never managed.
    pub kernel_image_bytes: u32,
    /// Seed of the TLB's `Random` register.
    pub tlb_seed: u32,
    /// Initial console log level.
    pub log_level: LevelFilter,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            ram_bytes: 2 * 1024 * 1024,
            kernel_image_bytes: 64 * 1024,
            tlb_seed: 0x1234_5678,
            log_level: LevelFilter::Info,
        }
    }
}

impl MachineConfig {
    /// Installed RAM, rounded down to whole pages.
    #[must_use]
    pub const fn ram_size(&self) -> u32 {
        self.ram_bytes & !(PAGE_SIZE - 1)
    }

    /// First physical address not taken by the kernel image.
    #[must_use]
    pub const fn first_free(&self) -> u32 {
        page_round_up(self.kernel_image_bytes)
    }

    /// Number of whole frames installed.
    #[must_use]
    pub const fn total_frames(&self) -> u32 {
        self.ram_size() / PAGE_SIZE
    }

    #[must_use]
    pub const fn with_ram_bytes(mut self, ram_bytes: u32) -> Self {
        self.ram_bytes = ram_bytes;
        self
    }

    #[must_use]
    pub const fn with_kernel_image_bytes(mut self, bytes: u32) -> Self {
        self.kernel_image_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn with_tlb_seed(mut self, seed: u32) -> Self {
        self.tlb_seed = seed;
        self
    }

    #[must_use]
    pub const fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }
}
