//! A block device driver backed by kernel memory.

use super::block_core::{BlockOp, BlockSector, BLOCK_SECTOR_SIZE};
use super::block_error::BlockError;
use alloc::{vec, vec::Vec};

pub struct RamDisk {
    sects: Vec<[u8; BLOCK_SECTOR_SIZE]>,
}

impl RamDisk {
    pub fn new(sectors: usize) -> RamDisk {
        RamDisk {
            sects: vec![[0; BLOCK_SECTOR_SIZE]; sectors],
        }
    }

    pub fn sectors(&self) -> usize {
        self.sects.len()
    }
}

impl BlockOp for RamDisk {
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        let sect = self
            .sects
            .get(sector as usize)
            .ok_or(BlockError::SectorOutOfBounds)?;
        if buf.len() != BLOCK_SECTOR_SIZE {
            return Err(BlockError::BufferInvalid);
        }
        buf.copy_from_slice(sect);
        Ok(())
    }

    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        let sect = self
            .sects
            .get_mut(sector as usize)
            .ok_or(BlockError::SectorOutOfBounds)?;
        if buf.len() != BLOCK_SECTOR_SIZE {
            return Err(BlockError::BufferInvalid);
        }
        sect.copy_from_slice(buf);
        Ok(())
    }
}
