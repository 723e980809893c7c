pub mod fault;
pub mod frame_allocator;
pub mod frame_table;
pub mod page_directory;
pub mod page_table;
pub mod phys;
pub mod swap;

use alloc::vec::Vec;
use core::fmt;
use kidneyos_shared::mem::{page_offset, page_round_down, PAGE_FRAME_SIZE};

/// A user virtual page, identified by its page-aligned base address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtPage(usize);

impl VirtPage {
    /// The page containing `addr`.
    pub const fn containing(addr: usize) -> Self {
        Self(page_round_down(addr))
    }

    /// The page starting at `base`.
    ///
    /// Panics if `base` is not page aligned.
    pub fn from_base(base: usize) -> Self {
        assert_eq!(page_offset(base), 0, "{base:#X} is not page aligned");
        Self(base)
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    /// The page `count` pages above this one.
    pub const fn add(self, count: usize) -> Self {
        Self(self.0 + count * PAGE_FRAME_SIZE)
    }
}

impl fmt::Display for VirtPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {:#010X}", self.0)
    }
}

/// Read access to the file a demand-loaded page comes from, typically the
/// process's executable.
pub trait BackingFile: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`, returning how many
    /// bytes were read. Anything short of `buf.len()` is treated as failure.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize;
}

impl BackingFile for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let Ok(start) = usize::try_from(offset) else {
            return 0;
        };
        let Some(src) = self.get(start..) else {
            return 0;
        };
        let n = src.len().min(buf.len());
        buf[..n].copy_from_slice(&src[..n]);
        n
    }
}
