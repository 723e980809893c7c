//! The per-process half of virtual memory.

use crate::mem::page_directory::PageDirectory;
use crate::mem::page_table::{PageStatus, SupplementalPageTable};
use crate::mem::VirtPage;
use crate::sync::{Mutex, MutexGuard};
use alloc::sync::Arc;

pub type Pid = u16;

/// A process's address space as the VM manager sees it.
///
/// Two locks guard it. `fault_lock` serializes every operation that changes
/// which pages the process has (faults, new mappings, teardown) and is held
/// while a frame is found for the page, so it may wait on the frame table.
/// `table` is only ever held briefly and is never held while waiting for the
/// frame table; eviction takes it to update a victim's entry.
pub struct ProcessMemory {
    pid: Pid,
    directory: Arc<dyn PageDirectory>,
    pub(crate) fault_lock: Mutex<()>,
    table: Mutex<SupplementalPageTable>,
}

impl ProcessMemory {
    pub(crate) fn new(pid: Pid, directory: Arc<dyn PageDirectory>) -> Self {
        Self {
            pid,
            directory,
            fault_lock: Mutex::new(()),
            table: Mutex::new(SupplementalPageTable::new()),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn directory(&self) -> &dyn PageDirectory {
        &*self.directory
    }

    pub fn table(&self) -> MutexGuard<'_, SupplementalPageTable> {
        self.table.lock()
    }

    pub fn lookup(&self, page: VirtPage) -> Option<PageStatus> {
        self.table().lookup(page)
    }

    /// Number of pages currently in a frame.
    pub fn resident_pages(&self) -> usize {
        self.table()
            .iter()
            .filter(|(_, entry)| matches!(entry.status(), PageStatus::Resident(_)))
            .count()
    }
}
