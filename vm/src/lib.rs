//! Demand-paged virtual memory for user processes: a frame table with clock
//! eviction, per-process supplemental page tables, swap, and the page fault
//! handler that ties them together.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod block;
pub mod error;
pub mod mem;
pub mod process;
pub mod stats;
pub mod sync;

use alloc::{boxed::Box, sync::Arc};
use block::BlockManager;
use error::{Error, Result};
use kidneyos_shared::mem::{OFFSET, PAGE_FRAME_SIZE, STACK_PUSH_MARGIN, USER_STACK_SIZE};
use log::info;
use mem::frame_table::FrameAllocator;
use mem::page_directory::PageDirectory;
use mem::page_table::{FileSpan, Released};
use mem::phys::PhysicalMemory;
use mem::swap::SwapSpace;
use mem::{BackingFile, VirtPage};
use once_cell::race::OnceBox;
use process::{Pid, ProcessMemory};
use stats::VmStatsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Largest the user stack may grow, downward from the top of user space.
    stack_size: usize,
    /// How far below the stack pointer a fault still counts as a push.
    stack_margin: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_size: USER_STACK_SIZE,
            stack_margin: STACK_PUSH_MARGIN,
        }
    }
}

impl VmConfig {
    /// Panics if the stack would not fit below the kernel.
    #[must_use]
    pub fn with_stack_size(self, stack_size: usize) -> Self {
        assert!(
            stack_size <= OFFSET,
            "stack of {stack_size:#X} bytes does not fit in user space"
        );
        Self { stack_size, ..self }
    }

    #[must_use]
    pub fn with_stack_margin(self, stack_margin: usize) -> Self {
        Self {
            stack_margin,
            ..self
        }
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn stack_margin(&self) -> usize {
        self.stack_margin
    }
}

pub struct VirtualMemory {
    config: VmConfig,
    memory: Arc<PhysicalMemory>,
    swap: Arc<SwapSpace>,
    frames: FrameAllocator,
}

impl VirtualMemory {
    /// Manage `user_frames` frames of user memory, swapping to `swap`.
    pub fn new(config: VmConfig, user_frames: usize, swap: SwapSpace) -> Self {
        let memory = Arc::new(PhysicalMemory::new(user_frames));
        let swap = Arc::new(swap);
        info!(
            "vm: {} user frames, {} swap slots, stack limit {:#X}",
            user_frames,
            swap.capacity(),
            config.stack_size
        );

        Self {
            config,
            frames: FrameAllocator::new(memory.clone(), swap.clone()),
            memory,
            swap,
        }
    }

    /// Set up the memory of a new process, which starts with no pages.
    pub fn create_table(&self, pid: Pid, directory: Arc<dyn PageDirectory>) -> Arc<ProcessMemory> {
        Arc::new(ProcessMemory::new(pid, directory))
    }

    /// Tear down a process's memory, returning its frames and swap slots.
    pub fn destroy_table(&self, process: &ProcessMemory) -> Released {
        let _faulting = process.fault_lock.lock();
        let released = self.frames.release_process(process);
        info!(
            "vm: process {} released {} frames and {} swap slots",
            process.pid(),
            released.frames,
            released.slots
        );
        released
    }

    /// Give `process` a zeroed, resident page at `page` right away.
    pub fn map_new_page(
        &self,
        process: &Arc<ProcessMemory>,
        page: VirtPage,
        writable: bool,
    ) -> Result<()> {
        let _faulting = process.fault_lock.lock();
        if process.lookup(page).is_some() {
            return Err(Error::AlreadyMapped);
        }

        let frame = self.frames.allocate(process, page, true)?;
        if !process.directory().map(page, frame, writable) {
            self.frames.free(frame);
            return Err(Error::OutOfMemory);
        }
        if let Err(err) = process.table().insert_resident(page, frame, writable) {
            process.directory().clear(page);
            self.frames.free(frame);
            return Err(err);
        }
        self.frames.unpin(frame);
        Ok(())
    }

    /// Lazily map a segment of `file`: `read_bytes` bytes starting at
    /// `offset` go at `base`, followed by `zero_bytes` zeros. Nothing is read
    /// until the pages are touched.
    ///
    /// Panics if the segment is not a whole number of pages or `offset` is not
    /// page aligned. Fails without mapping anything if any page is taken.
    #[allow(clippy::too_many_arguments)]
    pub fn map_segment(
        &self,
        process: &ProcessMemory,
        file: Arc<dyn BackingFile>,
        offset: u64,
        base: VirtPage,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<()> {
        assert_eq!(
            (read_bytes + zero_bytes) % PAGE_FRAME_SIZE,
            0,
            "segment is not a whole number of pages"
        );
        assert_eq!(
            offset % PAGE_FRAME_SIZE as u64,
            0,
            "segment offset {offset:#X} is not page aligned"
        );
        let pages = (read_bytes + zero_bytes) / PAGE_FRAME_SIZE;

        let _faulting = process.fault_lock.lock();
        let mut table = process.table();
        if (0..pages).any(|n| table.lookup(base.add(n)).is_some()) {
            return Err(Error::AlreadyMapped);
        }

        let mut offset = offset;
        let mut remaining = read_bytes;
        for n in 0..pages {
            let page = base.add(n);
            let length = remaining.min(PAGE_FRAME_SIZE);
            if length > 0 {
                table.insert_file_backed(page, file.clone(), FileSpan { offset, length }, writable)?;
            } else {
                table.insert_zero(page, writable)?;
            }
            offset += length as u64;
            remaining -= length;
        }
        Ok(())
    }

    pub fn config(&self) -> VmConfig {
        self.config
    }

    pub fn memory(&self) -> &Arc<PhysicalMemory> {
        &self.memory
    }

    pub fn swap(&self) -> &SwapSpace {
        &self.swap
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    pub fn stats(&self) -> VmStatsSnapshot {
        self.frames.stats().snapshot()
    }
}

static VIRTUAL_MEMORY: OnceBox<VirtualMemory> = OnceBox::new();

/// Set up the system-wide virtual memory manager, taking the swap device out
/// of `blocks`.
///
/// Panics if called twice or if no swap device is registered.
pub fn init(config: VmConfig, user_frames: usize, blocks: &mut BlockManager) -> &'static VirtualMemory {
    let manager = VirtualMemory::new(config, user_frames, SwapSpace::from_blocks(blocks));
    if VIRTUAL_MEMORY.set(Box::new(manager)).is_err() {
        panic!("vm: already initialized");
    }
    vm()
}

/// The system-wide virtual memory manager.
///
/// Panics if [`init`] has not run.
pub fn vm() -> &'static VirtualMemory {
    VIRTUAL_MEMORY
        .get()
        .expect("Virtual memory not initialized.")
}
