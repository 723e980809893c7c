//! The supplemental page table: where every user page of a process lives when
//! it is not (or is) in a frame.

use super::page_directory::PageDirectory;
use super::phys::FrameNumber;
use super::swap::{SwapSlot, SwapSpace};
use super::{BackingFile, VirtPage};
use crate::error::{Error, Result};
use alloc::{collections::BTreeMap, sync::Arc};
use core::{fmt, mem};
use kidneyos_shared::mem::PAGE_FRAME_SIZE;

/// The bytes of a file that make up the start of a page. The rest of the page
/// is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    pub offset: u64,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    /// Not yet touched; comes in as a page of zeros.
    Zero,
    Resident(FrameNumber),
    Swapped(SwapSlot),
    /// Not yet loaded, or dropped while clean; comes in from the file.
    FileBacked(FileSpan),
}

/// Where an evicted page went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    Swapped(SwapSlot),
    /// A clean file page was dropped and will be read from the file again.
    Discarded,
}

#[derive(Clone)]
pub struct FileOrigin {
    pub file: Arc<dyn BackingFile>,
    pub span: FileSpan,
}

pub struct PageEntry {
    status: PageStatus,
    writable: bool,
    /// Set once the page has been found dirty at eviction. A file page that has
    /// ever been written no longer matches its file and always goes to swap.
    dirty: bool,
    origin: Option<FileOrigin>,
}

impl PageEntry {
    pub fn status(&self) -> PageStatus {
        self.status
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn origin(&self) -> Option<&FileOrigin> {
        self.origin.as_ref()
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageEntry")
            .field("status", &self.status)
            .field("writable", &self.writable)
            .field("dirty", &self.dirty)
            .field("origin", &self.origin.as_ref().map(|origin| origin.span))
            .finish()
    }
}

/// What tearing down a table gave back.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Released {
    pub frames: usize,
    pub slots: usize,
}

#[derive(Debug, Default)]
pub struct SupplementalPageTable {
    entries: BTreeMap<VirtPage, PageEntry>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_zero(&mut self, page: VirtPage, writable: bool) -> Result<()> {
        self.insert(
            page,
            PageEntry {
                status: PageStatus::Zero,
                writable,
                dirty: false,
                origin: None,
            },
        )
    }

    /// Record a page whose first `span.length` bytes come from `file`.
    ///
    /// Panics if the span is longer than a page.
    pub fn insert_file_backed(
        &mut self,
        page: VirtPage,
        file: Arc<dyn BackingFile>,
        span: FileSpan,
        writable: bool,
    ) -> Result<()> {
        assert!(
            span.length <= PAGE_FRAME_SIZE,
            "file span of {} bytes does not fit in a page",
            span.length
        );
        self.insert(
            page,
            PageEntry {
                status: PageStatus::FileBacked(span),
                writable,
                dirty: false,
                origin: Some(FileOrigin { file, span }),
            },
        )
    }

    pub fn insert_resident(
        &mut self,
        page: VirtPage,
        frame: FrameNumber,
        writable: bool,
    ) -> Result<()> {
        self.insert(
            page,
            PageEntry {
                status: PageStatus::Resident(frame),
                writable,
                dirty: false,
                origin: None,
            },
        )
    }

    fn insert(&mut self, page: VirtPage, entry: PageEntry) -> Result<()> {
        if self.entries.contains_key(&page) {
            return Err(Error::AlreadyMapped);
        }
        self.entries.insert(page, entry);
        Ok(())
    }

    pub fn get(&self, page: VirtPage) -> Option<&PageEntry> {
        self.entries.get(&page)
    }

    pub fn lookup(&self, page: VirtPage) -> Option<PageStatus> {
        self.get(page).map(PageEntry::status)
    }

    /// Record that the frame behind `page` was reclaimed. `dirty` is whether the
    /// page was modified while resident.
    ///
    /// Fails with [`Error::NotResident`] if the page is not in a frame.
    pub fn mark_evicted(&mut self, page: VirtPage, eviction: Eviction, dirty: bool) -> Result<()> {
        let Some(entry) = self.entries.get_mut(&page) else {
            return Err(Error::NotResident);
        };
        if !matches!(entry.status, PageStatus::Resident(_)) {
            return Err(Error::NotResident);
        }

        entry.dirty |= dirty;
        entry.status = match eviction {
            Eviction::Swapped(slot) => PageStatus::Swapped(slot),
            Eviction::Discarded => {
                assert!(!entry.dirty, "discarding dirty {page}");
                match &entry.origin {
                    Some(origin) => PageStatus::FileBacked(origin.span),
                    None => panic!("discarding {page}, which has no backing file"),
                }
            }
        };
        Ok(())
    }

    /// Record that `page` now lives in `frame`.
    ///
    /// Panics if the page has no entry.
    pub(crate) fn mark_resident(&mut self, page: VirtPage, frame: FrameNumber) {
        match self.entries.get_mut(&page) {
            Some(entry) => entry.status = PageStatus::Resident(frame),
            None => panic!("{page} made resident without a page table entry"),
        }
    }

    /// Drop every entry, handing resident frames to `release_frame` and freeing
    /// swap slots.
    pub fn destroy(
        &mut self,
        mut release_frame: impl FnMut(FrameNumber),
        swap: &SwapSpace,
        directory: &dyn PageDirectory,
    ) -> Released {
        let mut released = Released::default();
        for (page, entry) in mem::take(&mut self.entries) {
            match entry.status {
                PageStatus::Resident(frame) => {
                    directory.clear(page);
                    release_frame(frame);
                    released.frames += 1;
                }
                PageStatus::Swapped(slot) => {
                    swap.free(slot);
                    released.slots += 1;
                }
                PageStatus::Zero | PageStatus::FileBacked(_) => {}
            }
        }
        released
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VirtPage, &PageEntry)> {
        self.entries.iter().map(|(page, entry)| (*page, entry))
    }
}
