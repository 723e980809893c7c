//! The address-space capability the VM manager drives, plus a software page
//! directory that keeps x86 page table entries in a map.
//!
//! The software directory stands in for the MMU when the kernel runs hosted
//! (and in tests): its `read`/`write` methods behave like user-mode loads and
//! stores, setting the accessed and dirty bits and reporting a fault when the
//! page is not present or not writable.

use super::phys::{FrameNumber, PhysicalMemory};
use super::VirtPage;
use crate::sync::Mutex;
use alloc::{collections::BTreeMap, sync::Arc};
use kidneyos_shared::mem::{page_offset, PAGE_FRAME_SIZE};
use kidneyos_shared::paging::PageTableEntry;

/// Per-process page directory operations.
///
/// Clearing a page leaves its accessed and dirty bits readable until the page
/// is mapped again. Querying a page that was never mapped returns `false` and
/// updating it does nothing.
pub trait PageDirectory: Send + Sync {
    /// Map `page` to `frame`. Returns `false` if memory for the mapping could
    /// not be obtained.
    fn map(&self, page: VirtPage, frame: FrameNumber, writable: bool) -> bool;
    /// Mark `page` not present. Later accesses fault.
    fn clear(&self, page: VirtPage);
    fn is_accessed(&self, page: VirtPage) -> bool;
    fn set_accessed(&self, page: VirtPage, accessed: bool);
    fn is_dirty(&self, page: VirtPage) -> bool;
    fn set_dirty(&self, page: VirtPage, dirty: bool);
}

/// A user access that could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessFault {
    pub addr: usize,
    pub write: bool,
}

pub struct SoftPageDirectory {
    memory: Arc<PhysicalMemory>,
    entries: Mutex<BTreeMap<VirtPage, PageTableEntry>>,
}

impl SoftPageDirectory {
    pub fn new(memory: Arc<PhysicalMemory>) -> Self {
        Self {
            memory,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// The frame `page` is mapped to, if it is present.
    pub fn translate(&self, page: VirtPage) -> Option<FrameNumber> {
        self.entries
            .lock()
            .get(&page)
            .filter(|entry| entry.present())
            .map(|entry| FrameNumber(entry.frame_number()))
    }

    pub fn is_writable(&self, page: VirtPage) -> bool {
        self.entries
            .lock()
            .get(&page)
            .is_some_and(|entry| entry.present() && entry.read_write())
    }

    /// Number of pages currently present.
    pub fn mapped_pages(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.present())
            .count()
    }

    /// Copy `buf.len()` bytes of user memory starting at `addr` into `buf`.
    pub fn read(&self, addr: usize, buf: &mut [u8]) -> Result<(), AccessFault> {
        let mut done = 0;
        while done < buf.len() {
            let at = addr + done;
            let n = (PAGE_FRAME_SIZE - page_offset(at)).min(buf.len() - done);
            self.access(at, false, |bytes| {
                buf[done..done + n].copy_from_slice(&bytes[..n]);
            })?;
            done += n;
        }
        Ok(())
    }

    /// Copy `data` into user memory starting at `addr`.
    pub fn write(&self, addr: usize, data: &[u8]) -> Result<(), AccessFault> {
        let mut done = 0;
        while done < data.len() {
            let at = addr + done;
            let n = (PAGE_FRAME_SIZE - page_offset(at)).min(data.len() - done);
            self.access(at, true, |bytes| {
                bytes[..n].copy_from_slice(&data[done..done + n]);
            })?;
            done += n;
        }
        Ok(())
    }

    /// Run `f` on the bytes of the frame behind `addr`, from `addr` to the end of
    /// its page, the way the MMU would translate a single access.
    fn access(
        &self,
        addr: usize,
        write: bool,
        f: impl FnOnce(&mut [u8]),
    ) -> Result<(), AccessFault> {
        let page = VirtPage::containing(addr);
        let fault = AccessFault { addr, write };

        // The directory stays locked for the copy so the page cannot be
        // cleared and written out halfway through.
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&page).ok_or(fault)?;
        if !entry.present() || (write && !entry.read_write()) {
            return Err(fault);
        }
        *entry = entry.with_accessed(true).with_dirty(entry.dirty() || write);

        let mut bytes = self.memory.frame(FrameNumber(entry.frame_number()));
        f(&mut bytes[page_offset(addr)..]);
        Ok(())
    }

    fn update(&self, page: VirtPage, f: impl FnOnce(PageTableEntry) -> PageTableEntry) {
        if let Some(entry) = self.entries.lock().get_mut(&page) {
            *entry = f(*entry);
        }
    }

    fn query(&self, page: VirtPage, f: impl FnOnce(&PageTableEntry) -> bool) -> bool {
        self.entries.lock().get(&page).is_some_and(f)
    }
}

impl PageDirectory for SoftPageDirectory {
    fn map(&self, page: VirtPage, frame: FrameNumber, writable: bool) -> bool {
        self.entries
            .lock()
            .insert(page, PageTableEntry::user_page(frame.index(), writable));
        true
    }

    fn clear(&self, page: VirtPage) {
        self.update(page, |entry| entry.with_present(false));
    }

    fn is_accessed(&self, page: VirtPage) -> bool {
        self.query(page, |entry| entry.accessed())
    }

    fn set_accessed(&self, page: VirtPage, accessed: bool) {
        self.update(page, |entry| entry.with_accessed(accessed));
    }

    fn is_dirty(&self, page: VirtPage) -> bool {
        self.query(page, |entry| entry.dirty())
    }

    fn set_dirty(&self, page: VirtPage, dirty: bool) {
        self.update(page, |entry| entry.with_dirty(dirty));
    }
}
