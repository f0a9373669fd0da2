//! # Physical memory access
//!
//! Kernel code never holds a pointer into physical memory. It asks a
//! [`PhysMapper`] to run a closure over the bytes of one frame instead, which
//! keeps every access bounded to a single 4 KiB page and lets tests swap the
//! backing store.
//!
//! [`Ram`] is the simulated board memory: one lock per frame, so concurrent
//! processes touching different frames never contend.

use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_info::config::MachineConfig;
use kernel_info::memory::PAGE_BYTES;
use kernel_memory_addresses::PhysicalPage;
use kernel_sync::SpinLock;

/// Bytes of a single frame.
pub type FrameBytes = [u8; PAGE_BYTES];

/// Access to the contents of physical frames.
///
/// Implementations panic when asked for a frame that does not exist; that is
/// a bus error, not a recoverable condition.
pub trait PhysMapper {
    /// Runs `f` over the bytes of `frame`.
    fn with_frame<R>(&self, frame: PhysicalPage, f: impl FnOnce(&FrameBytes) -> R) -> R;

    /// Runs `f` over the mutable bytes of `frame`.
    fn with_frame_mut<R>(&self, frame: PhysicalPage, f: impl FnOnce(&mut FrameBytes) -> R) -> R;

    /// Fills `frame` with zeros.
    fn zero_frame(&self, frame: PhysicalPage) {
        self.with_frame_mut(frame, |bytes| bytes.fill(0));
    }

    /// Copies the whole of `src` over `dst`.
    fn copy_frame(&self, src: PhysicalPage, dst: PhysicalPage) {
        if src == dst {
            return;
        }
        let mut buf = [0u8; PAGE_BYTES];
        self.with_frame(src, |bytes| buf.copy_from_slice(bytes));
        self.with_frame_mut(dst, |bytes| bytes.copy_from_slice(&buf));
    }
}

/// Simulated physical memory.
pub struct Ram {
    frames: Box<[SpinLock<Box<FrameBytes>>]>,
}

impl Ram {
    /// Zeroed RAM sized after `config`.
    #[must_use]
    pub fn new(config: &MachineConfig) -> Self {
        Self::with_frames(config.total_frames())
    }

    /// Zeroed RAM of exactly `count` frames.
    #[must_use]
    pub fn with_frames(count: u32) -> Self {
        let frames: Vec<_> = (0..count)
            .map(|_| SpinLock::new(Box::new([0u8; PAGE_BYTES])))
            .collect();
        Self {
            frames: frames.into_boxed_slice(),
        }
    }

    /// Installed memory in bytes (`ram_getsize`).
    #[must_use]
    pub fn size(&self) -> u32 {
        u32::try_from(self.frame_count() * PAGE_BYTES).unwrap_or(u32::MAX)
    }

    /// Number of installed frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn slot(&self, frame: PhysicalPage) -> &SpinLock<Box<FrameBytes>> {
        let index = frame.number() as usize;
        match self.frames.get(index) {
            Some(slot) => slot,
            None => panic!(
                "bus error: frame {frame} beyond installed RAM ({} frames)",
                self.frames.len()
            ),
        }
    }
}

impl PhysMapper for Ram {
    fn with_frame<R>(&self, frame: PhysicalPage, f: impl FnOnce(&FrameBytes) -> R) -> R {
        let guard = self.slot(frame).lock();
        f(&guard)
    }

    fn with_frame_mut<R>(&self, frame: PhysicalPage, f: impl FnOnce(&mut FrameBytes) -> R) -> R {
        let mut guard = self.slot(frame).lock();
        f(&mut guard)
    }
}

impl core::fmt::Debug for Ram {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ram").field("frames", &self.frame_count()).finish()
    }
}
