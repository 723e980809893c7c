//! Swap space: page-sized slots on the swap block device.

// A slot count derived from a `BlockSector` device size always fits back in a
// `BlockSector`.
#![allow(clippy::cast_possible_truncation)]

use super::phys::FrameBytes;
use crate::block::{Block, BlockManager, BlockSector, BlockType, BLOCK_SECTOR_SIZE};
use crate::error::{Error, Result};
use crate::sync::Mutex;
use alloc::vec::Vec;
use bitvec::prelude::*;
use core::fmt;
use kidneyos_shared::mem::PAGE_FRAME_SIZE;
use log::{info, warn};

const SECTORS_PER_PAGE: BlockSector = (PAGE_FRAME_SIZE / BLOCK_SECTOR_SIZE) as BlockSector;

/// Index of a page-sized slot on the swap device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(BlockSector);

impl SwapSlot {
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    const fn first_sector(self) -> BlockSector {
        self.0 * SECTORS_PER_PAGE
    }
}

impl fmt::Display for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "swap slot {}", self.0)
    }
}

struct SlotAllocator {
    /// One bit per slot, set while the slot holds a page.
    occupied: BitVec,
    /// Slots freed since they were first handed out.
    free_list: Vec<SwapSlot>,
    /// Slots at or above this index have never been handed out.
    high_water: BlockSector,
}

impl SlotAllocator {
    fn check(&self, slot: SwapSlot) {
        if slot.index() >= self.occupied.len() {
            panic!(
                "{} out of bounds ({} slots)",
                slot,
                self.occupied.len()
            );
        }
    }
}

pub struct SwapSpace {
    slots: Mutex<SlotAllocator>,
    device: Mutex<Block>,
    capacity: usize,
}

impl SwapSpace {
    /// Use all of `device` for swap.
    pub fn new(device: Block) -> Self {
        let capacity = (device.size() / SECTORS_PER_PAGE) as usize;
        info!(
            "swap: using \"{}\" for {} page slots",
            device.name(),
            capacity
        );

        Self {
            slots: Mutex::new(SlotAllocator {
                occupied: bitvec![0; capacity],
                free_list: Vec::new(),
                high_water: 0,
            }),
            device: Mutex::new(device),
            capacity,
        }
    }

    /// Take the swap device out of `blocks`.
    ///
    /// Panics if no swap device has been registered.
    pub fn from_blocks(blocks: &mut BlockManager) -> Self {
        match blocks.take_by_type(BlockType::Swap) {
            Some(device) => Self::new(device),
            None => panic!("swap: no swap device registered"),
        }
    }

    /// Reserve a free slot, preferring recently freed ones.
    pub fn allocate(&self) -> Result<SwapSlot> {
        let mut slots = self.slots.lock();

        let slot = if let Some(slot) = slots.free_list.pop() {
            slot
        } else if (slots.high_water as usize) < self.capacity {
            slots.high_water += 1;
            SwapSlot(slots.high_water - 1)
        } else {
            warn!("swap: all {} slots in use", self.capacity);
            return Err(Error::SwapExhausted);
        };

        assert!(
            !slots.occupied[slot.index()],
            "{slot} handed out while occupied"
        );
        slots.occupied.set(slot.index(), true);
        Ok(slot)
    }

    /// Return `slot` to the free list.
    ///
    /// Panics if the slot is not occupied, since a double free means two page
    /// table entries believed they owned it.
    pub fn free(&self, slot: SwapSlot) {
        let mut slots = self.slots.lock();
        slots.check(slot);
        if !slots.occupied[slot.index()] {
            panic!("double free of {slot}");
        }
        slots.occupied.set(slot.index(), false);
        slots.free_list.push(slot);
    }

    /// Write one page into `slot`, which must be occupied.
    pub fn write(&self, slot: SwapSlot, page: &FrameBytes) {
        self.assert_occupied(slot);

        let mut device = self.device.lock();
        for (sector, chunk) in (slot.first_sector()..).zip(page.chunks_exact(BLOCK_SECTOR_SIZE)) {
            if let Err(err) = device.write(sector, chunk) {
                panic!("swap: writing {slot} (sector {sector}) failed: {err}");
            }
        }
    }

    /// Read one page out of `slot`, which must be occupied.
    pub fn read(&self, slot: SwapSlot, page: &mut FrameBytes) {
        self.assert_occupied(slot);

        let mut device = self.device.lock();
        for (sector, chunk) in
            (slot.first_sector()..).zip(page.chunks_exact_mut(BLOCK_SECTOR_SIZE))
        {
            if let Err(err) = device.read(sector, chunk) {
                panic!("swap: reading {slot} (sector {sector}) failed: {err}");
            }
        }
    }

    pub fn is_occupied(&self, slot: SwapSlot) -> bool {
        let slots = self.slots.lock();
        slots.occupied.get(slot.index()).is_some_and(|bit| *bit)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slots_in_use(&self) -> usize {
        self.slots.lock().occupied.count_ones()
    }

    fn assert_occupied(&self, slot: SwapSlot) {
        let slots = self.slots.lock();
        slots.check(slot);
        assert!(
            slots.occupied[slot.index()],
            "access to unassigned {slot}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::block_core::test::{ram_block, BrokenDisk};
    use crate::block::RamDisk;
    use alloc::boxed::Box;

    fn swap(pages: usize) -> SwapSpace {
        SwapSpace::new(ram_block(
            BlockType::Swap,
            (pages * SECTORS_PER_PAGE as usize) as BlockSector,
        ))
    }

    #[test]
    fn sizes_pool_from_device() {
        let swap = SwapSpace::new(ram_block(BlockType::Swap, 8 * 3 + 5));
        assert_eq!(swap.capacity(), 3);
        assert_eq!(swap.slots_in_use(), 0);
    }

    #[test]
    fn exhausts_then_reuses_freed_slots() {
        let swap = swap(2);
        let a = swap.allocate().unwrap();
        let b = swap.allocate().unwrap();
        assert_ne!(a, b);
        assert_eq!(swap.allocate(), Err(Error::SwapExhausted));

        swap.free(a);
        assert!(!swap.is_occupied(a));
        assert_eq!(swap.allocate(), Ok(a));
        assert_eq!(swap.slots_in_use(), 2);
    }

    #[test]
    fn prefers_free_list_over_high_water() {
        let swap = swap(4);
        let a = swap.allocate().unwrap();
        let _b = swap.allocate().unwrap();
        swap.free(a);
        assert_eq!(swap.allocate(), Ok(a));
        assert_eq!(swap.allocate().unwrap().index(), 2);
    }

    #[test]
    fn page_round_trip() {
        let swap = swap(2);
        let _first = swap.allocate().unwrap();
        let slot = swap.allocate().unwrap();

        let mut page = [0u8; PAGE_FRAME_SIZE];
        for (i, byte) in page.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        swap.write(slot, &page);

        let mut back = [0u8; PAGE_FRAME_SIZE];
        swap.read(slot, &mut back);
        assert_eq!(page, back);
        assert_eq!(swap.device.lock().writes(), SECTORS_PER_PAGE);
    }

    #[test]
    #[should_panic(expected = "double free of swap slot 0")]
    fn double_free_panics() {
        let swap = swap(2);
        let slot = swap.allocate().unwrap();
        swap.free(slot);
        swap.free(slot);
    }

    #[test]
    #[should_panic(expected = "double free of swap slot 1")]
    fn freeing_never_allocated_slot_panics() {
        let swap = swap(2);
        swap.free(SwapSlot(1));
    }

    #[test]
    #[should_panic(expected = "access to unassigned swap slot 0")]
    fn reading_free_slot_panics() {
        let swap = swap(1);
        let mut page = [0u8; PAGE_FRAME_SIZE];
        swap.read(SwapSlot(0), &mut page);
    }

    #[test]
    #[should_panic(expected = "writing swap slot 0 (sector 0) failed")]
    fn device_failure_is_fatal() {
        let swap = SwapSpace::new(Block::new(BlockType::Swap, "bad", 16, Box::new(BrokenDisk)));
        let slot = swap.allocate().unwrap();
        swap.write(slot, &[0u8; PAGE_FRAME_SIZE]);
    }

    #[test]
    #[should_panic(expected = "no swap device registered")]
    fn missing_swap_device_is_fatal() {
        let mut blocks = BlockManager::new();
        blocks.register_block(BlockType::FileSystem, "hda", 16, Box::new(RamDisk::new(16)));
        SwapSpace::from_blocks(&mut blocks);
    }
}
