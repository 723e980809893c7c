//! Page fault handling: bringing a page in from wherever it lives, and growing
//! the stack.

use super::page_table::PageStatus;
use super::VirtPage;
use crate::error::{Error, Result};
use crate::process::ProcessMemory;
use crate::VirtualMemory;
use alloc::sync::Arc;
use kidneyos_shared::mem::{is_user_vaddr, OFFSET};
use log::{debug, warn};

/// A fault raised by a user access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// faulting virtual address
    pub addr: usize,
    pub write: bool,
    /// user stack pointer at the time of the fault
    pub stack_pointer: usize,
}

impl VirtualMemory {
    /// Resolve a fault in `process`.
    ///
    /// On success the page is mapped and the access can be retried. An error
    /// means the access was invalid (or memory ran out) and the process should
    /// be killed.
    pub fn handle_page_fault(&self, process: &Arc<ProcessMemory>, fault: PageFault) -> Result<()> {
        if !is_user_vaddr(fault.addr) {
            debug!(
                "process {}: fault on kernel address {:#X}",
                process.pid(),
                fault.addr
            );
            return Err(Error::InvalidAccess);
        }
        let page = VirtPage::containing(fault.addr);

        let _faulting = process.fault_lock.lock();

        let (status, writable, file) = {
            let mut table = process.table();
            match table.get(page) {
                Some(entry) => {
                    if fault.write && !entry.writable() {
                        debug!("process {}: write to read-only {page}", process.pid());
                        return Err(Error::ReadOnly);
                    }
                    (
                        entry.status(),
                        entry.writable(),
                        entry.origin().map(|origin| origin.file.clone()),
                    )
                }
                None if self.is_stack_access(fault) => {
                    table.insert_zero(page, true)?;
                    debug!("process {}: stack grows to {page}", process.pid());
                    (PageStatus::Zero, true, None)
                }
                None => {
                    debug!(
                        "process {}: invalid access to {:#X} (esp {:#X})",
                        process.pid(),
                        fault.addr,
                        fault.stack_pointer
                    );
                    return Err(Error::InvalidAccess);
                }
            }
        };

        // Another thread of the process may have brought the page in between
        // the access and taking the fault lock.
        if let PageStatus::Resident(_) = status {
            return Ok(());
        }

        let frame = self
            .frames
            .allocate(process, page, status == PageStatus::Zero)?;

        match status {
            PageStatus::Zero | PageStatus::Resident(_) => {}
            PageStatus::Swapped(slot) => {
                self.swap.read(slot, &mut self.memory.frame(frame));
            }
            PageStatus::FileBacked(span) => {
                let Some(file) = file else {
                    panic!("{page} is file backed without a file");
                };
                let mut bytes = self.memory.frame(frame);
                let (head, tail) = bytes.split_at_mut(span.length);
                if file.read_at(span.offset, head) != span.length {
                    drop(bytes);
                    self.frames.free(frame);
                    warn!(
                        "process {}: short read loading {page} from offset {:#X}",
                        process.pid(),
                        span.offset
                    );
                    return Err(Error::FileRead);
                }
                tail.fill(0);
            }
        }

        if !process.directory().map(page, frame, writable) {
            self.frames.free(frame);
            return Err(Error::OutOfMemory);
        }
        process.directory().set_dirty(page, false);

        process.table().mark_resident(page, frame);
        match status {
            PageStatus::Swapped(slot) => {
                self.swap.free(slot);
                self.frames.stats().record_swap_in();
            }
            PageStatus::FileBacked(_) => self.frames.stats().record_file_load(),
            PageStatus::Zero | PageStatus::Resident(_) => {}
        }
        self.frames.unpin(frame);
        Ok(())
    }

    /// Whether `fault` looks like a push below the current stack pointer within
    /// the stack's reserved region.
    fn is_stack_access(&self, fault: PageFault) -> bool {
        fault.addr >= OFFSET.saturating_sub(self.config.stack_size())
            && fault.addr.saturating_add(self.config.stack_margin()) >= fault.stack_pointer
    }
}
