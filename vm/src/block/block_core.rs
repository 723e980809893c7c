use crate::block::block_error::BlockError;
use alloc::{boxed::Box, string::String, vec::Vec};
use core::fmt;
use kidneyos_shared::sizes::SECTOR_SIZE;
use log::info;

pub const BLOCK_SECTOR_SIZE: usize = SECTOR_SIZE;

/// Index of a sector on a block device.
pub type BlockSector = u32;

/// What a block device is used for.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BlockType {
    Kernel,
    FileSystem,
    Scratch,
    /// Backing store for evicted pages.
    Swap,
    /// Unidentified contents.
    Raw,
    /// Belongs to another operating system; never written.
    Foreign,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            BlockType::Kernel => "kernel",
            BlockType::FileSystem => "file system",
            BlockType::Scratch => "scratch",
            BlockType::Swap => "swap",
            BlockType::Raw => "raw",
            BlockType::Foreign => "foreign",
        };
        f.write_str(name)
    }
}

/// Sector transfers, implemented by each block device driver.
pub trait BlockOp: Send {
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError>;
    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError>;
}

/// A block device: a driver plus what the kernel knows about it.
pub struct Block {
    index: usize,
    name: String,
    block_type: BlockType,
    driver: Box<dyn BlockOp>,
    /// Size in sectors.
    size: BlockSector,
    reads: u32,
    writes: u32,
}

impl Block {
    /// A device that is not registered with any [`BlockManager`].
    pub fn new(
        block_type: BlockType,
        name: &str,
        size: BlockSector,
        driver: Box<dyn BlockOp>,
    ) -> Self {
        Block {
            index: 0,
            name: String::from(name),
            block_type,
            driver,
            size,
            reads: 0,
            writes: 0,
        }
    }

    /// Panics unless `sector` is on the device and `buf` is exactly one sector.
    fn check_transfer(&self, sector: BlockSector, buf: &[u8]) {
        if sector >= self.size {
            panic!(
                "{}: sector {} past end of device ({} sectors)",
                self.name, sector, self.size
            );
        }
        if buf.len() != BLOCK_SECTOR_SIZE {
            panic!("{}: transfer of {} bytes is not one sector", self.name, buf.len());
        }
    }

    /// Read `sector` into `buf`, which must be one sector long.
    pub fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        self.check_transfer(sector, buf);
        self.driver.read(sector, buf)?;
        self.reads += 1;
        Ok(())
    }

    /// Write `buf`, which must be one sector long, to `sector`.
    ///
    /// Panics on foreign devices.
    pub fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        self.check_transfer(sector, buf);
        assert!(
            self.block_type != BlockType::Foreign,
            "{}: refusing to write to a foreign device",
            self.name
        );
        self.driver.write(sector, buf)?;
        self.writes += 1;
        Ok(())
    }

    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    pub fn size(&self) -> BlockSector {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn reads(&self) -> u32 {
        self.reads
    }

    pub fn writes(&self) -> u32 {
        self.writes
    }
}

/// The block devices found at boot, until their users claim them.
#[derive(Default)]
pub struct BlockManager {
    blocks: Vec<Block>,
    next_index: usize,
}

impl BlockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device of `size` sectors driven by `driver`, returning its
    /// index.
    pub fn register_block(
        &mut self,
        block_type: BlockType,
        name: &str,
        size: BlockSector,
        driver: Box<dyn BlockOp>,
    ) -> usize {
        let index = self.next_index;
        let mut block = Block::new(block_type, name, size, driver);
        block.index = index;
        self.next_index += 1;

        info!(
            "block: registered \"{}\" ({}) with {} sectors",
            block.name, block_type, size
        );
        self.blocks.push(block);
        index
    }

    /// Remove the first device of type `block_type` and hand it to the caller,
    /// who becomes its only user.
    pub fn take_by_type(&mut self, block_type: BlockType) -> Option<Block> {
        let at = self
            .blocks
            .iter()
            .position(|block| block.block_type == block_type)?;
        Some(self.blocks.remove(at))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
